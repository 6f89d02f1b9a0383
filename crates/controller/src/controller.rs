//! Controller lifecycle
//!
//! A controller value owns the storage façade and the campaign loop.
//! While it holds the leader lease it runs the syncer, the health probe,
//! the failover executor and the migration coordinator; on lease loss the
//! loops stop, writes start failing with `not leader`, and the process
//! campaigns again.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use persist::Persist;

use crate::config::Config;
use crate::event::event_channel;
use crate::failover::{FailOverConfig, FailOverExecutor};
use crate::migrator::{Migrator, MigratorConfig};
use crate::probe::{HealthProbe, ProbeConfig};
use crate::store::{keys, MetaStore};
use crate::syncer::{Syncer, SyncerConfig};

/// Grace window for loops to drain on shutdown
pub const STOP_GRACE: Duration = Duration::from_secs(10);

/// The controller process value
pub struct Controller {
    config: Config,
    store: Arc<MetaStore>,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Controller {
    pub fn new(config: Config, persist: Arc<dyn Persist>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            store: Arc::new(MetaStore::new(persist)),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// The storage façade shared with the admin surface
    pub fn store(&self) -> Arc<MetaStore> {
        Arc::clone(&self.store)
    }

    /// Spawn the campaign loop and the leader observer
    pub fn start(&self) {
        let observer = tokio::spawn(observe_leader(
            Arc::clone(&self.store),
            self.shutdown_tx.subscribe(),
        ));
        let campaign = tokio::spawn(campaign_loop(
            Arc::clone(&self.store),
            self.config.clone(),
            self.shutdown_tx.subscribe(),
        ));
        let mut handles = self.handles.lock();
        handles.push(observer);
        handles.push(campaign);
    }

    /// Stop everything, waiting up to the grace window
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        let deadline = tokio::time::Instant::now() + STOP_GRACE;
        for handle in handles {
            if tokio::time::timeout_at(deadline, handle).await.is_err() {
                warn!("controller loop did not stop within the grace window");
            }
        }
        info!("controller stopped");
    }
}

/// Track the current leader identity through the election key
async fn observe_leader(store: Arc<MetaStore>, mut shutdown: watch::Receiver<bool>) {
    let mut stream = match store.persist().watch(keys::LEADER_KEY).await {
        Ok(stream) => stream,
        Err(err) => {
            error!("failed to watch the leader key: {}", err);
            return;
        }
    };
    if let Ok(Some(kv)) = store.persist().get(keys::LEADER_KEY).await {
        store.set_leader_id(&String::from_utf8_lossy(&kv.value));
    }
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            event = stream.recv() => match event {
                Some(event) => match event.kind {
                    persist::WatchEventKind::Put => {
                        store.set_leader_id(&String::from_utf8_lossy(&event.value));
                    }
                    persist::WatchEventKind::Delete => store.set_leader_id(""),
                },
                None => break,
            },
        }
    }
}

async fn campaign_loop(store: Arc<MetaStore>, config: Config, mut shutdown: watch::Receiver<bool>) {
    let candidate = config.addr.clone();
    loop {
        if *shutdown.borrow() {
            break;
        }
        let campaign = store.persist().campaign(
            keys::LEADER_KEY,
            &candidate,
            config.controller.election_ttl(),
        );
        let mut lease = tokio::select! {
            _ = shutdown.changed() => break,
            lease = campaign => match lease {
                Ok(lease) => lease,
                Err(err) => {
                    error!("leader campaign failed: {}", err);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            },
        };
        info!("elected as controller leader ({})", candidate);

        let term_handles = start_term(&store, &config);
        let resign = tokio::select! {
            _ = lease.lost() => {
                warn!("controller leadership lost");
                false
            }
            _ = shutdown.changed() => true,
        };

        store.set_leader(false);
        store.clear_event_sender();
        let _ = term_handles.term_tx.send(true);
        for handle in term_handles.handles {
            if tokio::time::timeout(Duration::from_secs(2), handle).await.is_err() {
                warn!("control loop did not stop in time");
            }
        }
        if resign {
            lease.resign();
            break;
        }
    }
    info!("campaign loop stopped");
}

struct TermHandles {
    term_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Start the control loops for one leadership term
fn start_term(store: &Arc<MetaStore>, config: &Config) -> TermHandles {
    let (term_tx, _) = watch::channel(false);
    let (event_tx, event_rx) = event_channel();
    store.install_event_sender(event_tx);
    store.set_leader(true);

    let timings = &config.controller;
    let mut handles = Vec::new();

    let syncer = Syncer::new(
        Arc::clone(store),
        SyncerConfig {
            rpc_timeout: timings.rpc_timeout(),
            cluster_timeout: timings.sync_timeout(),
        },
    );
    handles.push(tokio::spawn(syncer.run(event_rx, term_tx.subscribe())));

    let probe = Arc::new(HealthProbe::new(
        Arc::clone(store),
        ProbeConfig {
            interval: timings.probe_interval(),
            fail_threshold: timings.failover_threshold,
            ping_timeout: timings.rpc_timeout(),
        },
    ));
    handles.push(tokio::spawn(probe.run(term_tx.subscribe())));

    let failover = Arc::new(FailOverExecutor::new(
        Arc::clone(store),
        FailOverConfig {
            interval: timings.probe_interval(),
            rpc_timeout: timings.rpc_timeout(),
        },
    ));
    handles.push(tokio::spawn(failover.run(term_tx.subscribe())));

    let migrator = Arc::new(Migrator::new(
        Arc::clone(store),
        MigratorConfig {
            interval: timings.probe_interval(),
            poll_interval: timings.migrate_poll_interval(),
            task_timeout: timings.migrate_timeout(),
            rpc_timeout: timings.rpc_timeout(),
        },
    ));
    handles.push(tokio::spawn(migrator.run(term_tx.subscribe())));

    TermHandles { term_tx, handles }
}
