//! Health probe
//!
//! Pings every shard master on a fixed tick. Consecutive failures are
//! counted per master; when the count reaches the threshold an automatic
//! failover task is queued through the storage layer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use metadata::NodeInfo;

use crate::error::Result;
use crate::node_client::NodeClient;
use crate::store::{FailOverKind, FailOverTask, MetaStore};

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Time between probe rounds
    pub interval: Duration,
    /// Consecutive failures before a failover is queued
    pub fail_threshold: u32,
    /// Deadline for one ping
    pub ping_timeout: Duration,
}

type ProbeKey = (String, String, usize);

/// Periodic master prober
pub struct HealthProbe {
    store: Arc<MetaStore>,
    config: ProbeConfig,
    counters: Mutex<HashMap<ProbeKey, u32>>,
}

impl HealthProbe {
    pub fn new(store: Arc<MetaStore>, config: ProbeConfig) -> Self {
        Self {
            store,
            config,
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.probe_once().await {
                        warn!("probe round failed: {}", err);
                    }
                }
            }
        }
        info!("health probe stopped");
    }

    /// One probe round over every shard master of every cluster
    pub async fn probe_once(&self) -> Result<()> {
        let mut seen = Vec::new();
        for namespace in self.store.list_namespaces().await? {
            for cluster in self.store.list_clusters(&namespace).await? {
                let info = match self.store.get_cluster(&namespace, &cluster).await {
                    Ok(info) => info,
                    Err(err) => {
                        debug!("skipping probe of {}/{}: {}", namespace, cluster, err);
                        continue;
                    }
                };
                for (shard_idx, shard) in info.shards.iter().enumerate() {
                    let Some(master) = shard.master() else {
                        continue;
                    };
                    let key = (namespace.clone(), cluster.clone(), shard_idx);
                    seen.push(key.clone());
                    self.probe_master(key, master).await;
                }
            }
        }
        // forget counters of shards that no longer exist
        self.counters.lock().retain(|key, _| seen.contains(key));
        Ok(())
    }

    async fn probe_master(&self, key: ProbeKey, master: &NodeInfo) {
        match self.ping(master).await {
            Ok(()) => {
                self.counters.lock().remove(&key);
            }
            Err(err) => {
                let count = {
                    let mut counters = self.counters.lock();
                    let count = counters.entry(key.clone()).or_insert(0);
                    *count += 1;
                    *count
                };
                debug!(
                    "master {} of {}/{} shard {} unreachable ({}/{}): {}",
                    master.address,
                    key.0,
                    key.1,
                    key.2,
                    count,
                    self.config.fail_threshold,
                    err
                );
                if count >= self.config.fail_threshold {
                    self.counters.lock().remove(&key);
                    self.queue_auto_failover(&key.0, &key.1, key.2, count).await;
                }
            }
        }
    }

    async fn ping(&self, node: &NodeInfo) -> Result<()> {
        let mut client = NodeClient::connect_to(node, self.config.ping_timeout).await?;
        client.ping().await
    }

    async fn queue_auto_failover(
        &self,
        namespace: &str,
        cluster: &str,
        shard_idx: usize,
        probe_count: u32,
    ) {
        // an already queued task keeps its place
        match self.store.list_failover_tasks(namespace, cluster).await {
            Ok(tasks) if tasks.iter().any(|t| t.shard_idx == shard_idx) => return,
            Ok(_) => {}
            Err(err) => {
                warn!("failed to check pending failover tasks: {}", err);
                return;
            }
        }
        let task = FailOverTask {
            namespace: namespace.to_string(),
            cluster: cluster.to_string(),
            shard_idx,
            kind: FailOverKind::Auto,
            probe_count,
            queued_at: 0,
            started_at: 0,
            finished_at: 0,
            error_detail: None,
        };
        match self.store.update_failover_task(&task).await {
            Ok(()) => info!(
                "queued auto failover for {}/{} shard {} after {} failed probes",
                namespace, cluster, shard_idx, probe_count
            ),
            Err(err) => warn!(
                "failed to queue failover for {}/{} shard {}: {}",
                namespace, cluster, shard_idx, err
            ),
        }
    }
}
