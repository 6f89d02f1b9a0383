//! Topology syncer
//!
//! Consumes mutation events and pushes the resulting topology to every
//! node of the affected cluster. Per-node failures are collected and
//! logged without stopping the loop; the next event (or the full resync
//! after an election) is the recovery path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use metadata::{Cluster, NodeInfo};

use crate::error::{Error, Result};
use crate::event::{Event, EventCommand, EventType};
use crate::node_client::NodeClient;
use crate::store::MetaStore;

/// Attempts for pushing one node before giving up on the event
const PUSH_ATTEMPTS: u32 = 3;
/// Base backoff between push attempts
const PUSH_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct SyncerConfig {
    /// Deadline for a single data-node RPC
    pub rpc_timeout: Duration,
    /// Deadline for pushing one cluster to all of its nodes
    pub cluster_timeout: Duration,
}

/// The long-running event consumer
pub struct Syncer {
    store: Arc<MetaStore>,
    config: SyncerConfig,
    /// Last version every node accepted, per cluster; pushes for a
    /// version already applied everywhere are skipped
    synced_versions: HashMap<(String, String), i64>,
}

impl Syncer {
    pub fn new(store: Arc<MetaStore>, config: SyncerConfig) -> Self {
        Self {
            store,
            config,
            synced_versions: HashMap::new(),
        }
    }

    /// Run until shutdown or until the event channel closes
    ///
    /// The in-memory event log does not survive leadership transitions,
    /// so the first action of a new term is a full resync.
    pub async fn run(mut self, mut events: mpsc::Receiver<Event>, mut shutdown: watch::Receiver<bool>) {
        self.resync_all().await;
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(&event).await,
                    None => break,
                },
            }
        }
        info!("topology syncer stopped");
    }

    async fn handle_event(&mut self, event: &Event) {
        if event.event_type == EventType::Namespace {
            return;
        }
        if event.command == EventCommand::Remove {
            if event.event_type == EventType::Cluster {
                self.synced_versions
                    .remove(&(event.namespace.clone(), event.cluster.clone()));
                debug!(
                    "cluster {}/{} removed, dropping sync state",
                    event.namespace, event.cluster
                );
            }
            return;
        }
        if let Err(err) = self.sync_cluster(&event.namespace, &event.cluster).await {
            warn!(
                "failed to sync cluster {}/{}: {}",
                event.namespace, event.cluster, err
            );
        }
    }

    /// Push every cluster to every node
    pub async fn resync_all(&mut self) {
        let namespaces = match self.store.list_namespaces().await {
            Ok(namespaces) => namespaces,
            Err(err) => {
                warn!("full resync failed to list namespaces: {}", err);
                return;
            }
        };
        for namespace in namespaces {
            let clusters = match self.store.list_clusters(&namespace).await {
                Ok(clusters) => clusters,
                Err(err) => {
                    warn!("full resync failed to list {}: {}", namespace, err);
                    continue;
                }
            };
            for cluster in clusters {
                if let Err(err) = self.sync_cluster(&namespace, &cluster).await {
                    warn!("full resync of {}/{} failed: {}", namespace, cluster, err);
                }
            }
        }
    }

    /// Push the current topology of one cluster to all of its nodes
    pub async fn sync_cluster(&mut self, namespace: &str, cluster: &str) -> Result<()> {
        let info = match self.store.get_cluster(namespace, cluster).await {
            Ok(info) => info,
            // gone before we got to it, a remove event will follow
            Err(Error::NotExists) => return Ok(()),
            Err(err) => return Err(err),
        };
        if !info.is_initialized() {
            debug!("cluster {}/{} not initialized, skipping sync", namespace, cluster);
            return Ok(());
        }
        let key = (namespace.to_string(), cluster.to_string());
        if self.synced_versions.get(&key) == Some(&info.version) {
            debug!(
                "cluster {}/{} already synced at version {}",
                namespace, cluster, info.version
            );
            return Ok(());
        }
        let payload = info.to_slot_string()?;

        let all_accepted = tokio::time::timeout(
            self.config.cluster_timeout,
            self.push_to_all(&info, &payload),
        )
        .await
        .map_err(|_| Error::Timeout)?;

        // a partial push stays unrecorded so the next event or resync
        // repeats it even at the same version
        if all_accepted {
            self.synced_versions.insert(key, info.version);
            debug!(
                "synced cluster {}/{} at version {}",
                namespace, cluster, info.version
            );
        }
        Ok(())
    }

    async fn push_to_all(&self, info: &Cluster, payload: &str) -> bool {
        let mut failures = Vec::new();
        for shard in &info.shards {
            for node in &shard.nodes {
                if let Err(err) = self.push_to_node(node, payload, info.version).await {
                    failures.push(format!("{}: {}", node.address, err));
                }
            }
        }
        if !failures.is_empty() {
            warn!(
                "failed to push version {} to {} node(s): [{}]",
                info.version,
                failures.len(),
                failures.join("; ")
            );
        }
        failures.is_empty()
    }

    async fn push_to_node(&self, node: &NodeInfo, payload: &str, version: i64) -> Result<()> {
        let mut last_err = None;
        for attempt in 0..PUSH_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(PUSH_BACKOFF * (1 << attempt)).await;
            }
            match self.try_push(node, payload, version).await {
                Ok(()) => return Ok(()),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or(Error::Timeout))
    }

    async fn try_push(&self, node: &NodeInfo, payload: &str, version: i64) -> Result<()> {
        let mut client = NodeClient::connect_to(node, self.config.rpc_timeout).await?;
        client.set_node_id(&node.id).await?;
        client.set_nodes(payload, version).await?;
        Ok(())
    }
}
