//! Failover executor
//!
//! Drains queued failover tasks one cluster at a time. A task promotes
//! the best replica of its shard, rewrites the topology through the
//! storage layer (which propagates it to the data nodes), and lands in
//! the failover history whether it succeeded or not.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use metadata::NodeInfo;

use crate::error::{Error, Result};
use crate::node_client::NodeClient;
use crate::store::{now_ts, FailOverTask, MetaStore};

#[derive(Debug, Clone)]
pub struct FailOverConfig {
    /// Time between queue scans
    pub interval: Duration,
    /// Deadline for data-node RPCs issued during promotion
    pub rpc_timeout: Duration,
}

/// Executes queued failover tasks serially per cluster
pub struct FailOverExecutor {
    store: Arc<MetaStore>,
    config: FailOverConfig,
}

impl FailOverExecutor {
    pub fn new(store: Arc<MetaStore>, config: FailOverConfig) -> Self {
        Self { store, config }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.execute_pending().await {
                        warn!("failover scan failed: {}", err);
                    }
                }
            }
        }
        info!("failover executor stopped");
    }

    /// Execute every queued task, cluster by cluster
    pub async fn execute_pending(&self) -> Result<()> {
        for namespace in self.store.list_namespaces().await? {
            for cluster in self.store.list_clusters(&namespace).await? {
                for task in self.store.list_failover_tasks(&namespace, &cluster).await? {
                    if let Err(err) = self.execute_task(task).await {
                        warn!(
                            "failover task of {}/{} failed to finalize: {}",
                            namespace, cluster, err
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Run one task to completion and move it to history
    pub async fn execute_task(&self, mut task: FailOverTask) -> Result<()> {
        task.started_at = now_ts();
        match self.promote(&task).await {
            Ok(new_master) => {
                info!(
                    "failover of {}/{} shard {} promoted {}",
                    task.namespace, task.cluster, task.shard_idx, new_master
                );
            }
            Err(err) => {
                warn!(
                    "failover of {}/{} shard {} failed: {}",
                    task.namespace, task.cluster, task.shard_idx, err
                );
                task.error_detail = Some(err.to_string());
            }
        }
        task.finished_at = now_ts();
        self.store.add_failover_history(&task).await?;
        self.store
            .remove_failover_task(&task.namespace, &task.cluster, task.shard_idx)
            .await?;
        Ok(())
    }

    /// Pick and install the replacement master, returning its id
    async fn promote(&self, task: &FailOverTask) -> Result<String> {
        let info = self
            .store
            .get_cluster(&task.namespace, &task.cluster)
            .await?;
        let shard = info.shard(task.shard_idx).ok_or_else(|| {
            Error::InvalidArgument(format!("shard index {} out of range", task.shard_idx))
        })?;
        let old_master = shard
            .master()
            .ok_or_else(|| Error::InvalidArgument("shard has no master".to_string()))?
            .clone();
        if shard.replicas().is_empty() {
            return Err(Error::NoReplica);
        }

        let new_master_id = self.pick_replica(shard.replicas()).await?;
        // a master that still answers is kept as a replica, a dead one is
        // dropped from the shard
        let remove_old = self.ping(&old_master).await.is_err();
        self.store
            .promote_node(
                &task.namespace,
                &task.cluster,
                task.shard_idx,
                &new_master_id,
                remove_old,
            )
            .await?;
        Ok(new_master_id)
    }

    /// Choose the replica with the highest replication offset; ties fall
    /// to the lowest node id. Unreachable replicas rank below all others.
    async fn pick_replica(&self, replicas: &[NodeInfo]) -> Result<String> {
        let mut best: Option<(i64, String)> = None;
        for replica in replicas {
            let offset = match self.replication_offset(replica).await {
                Ok(offset) => offset,
                Err(err) => {
                    warn!("replica {} not answering: {}", replica.address, err);
                    -1
                }
            };
            let better = match &best {
                None => true,
                Some((best_offset, best_id)) => {
                    offset > *best_offset || (offset == *best_offset && replica.id < *best_id)
                }
            };
            if better {
                best = Some((offset, replica.id.clone()));
            }
        }
        best.map(|(_, id)| id).ok_or(Error::NoReplica)
    }

    async fn replication_offset(&self, node: &NodeInfo) -> Result<i64> {
        let mut client = NodeClient::connect_to(node, self.config.rpc_timeout).await?;
        client.replication_offset().await
    }

    async fn ping(&self, node: &NodeInfo) -> Result<()> {
        let mut client = NodeClient::connect_to(node, self.config.rpc_timeout).await?;
        client.ping().await
    }
}
