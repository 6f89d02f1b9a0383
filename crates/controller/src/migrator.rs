//! Migration coordinator
//!
//! Drives slot-range moves as durable tasks: pending groups are executed
//! one sub-task at a time per cluster, with the active sub-task recorded
//! so a restart resumes instead of restarting. A failed sub-task freezes
//! the rest of its group.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use metadata::SlotRange;

use crate::error::{Error, Result};
use crate::node_client::NodeClient;
use crate::store::{now_ts, MetaStore, MigrateTask};

#[derive(Debug, Clone)]
pub struct MigratorConfig {
    /// Time between queue scans
    pub interval: Duration,
    /// Poll interval while a transfer is in flight
    pub poll_interval: Duration,
    /// Deadline for one slot-range transfer
    pub task_timeout: Duration,
    /// Deadline for data-node RPCs
    pub rpc_timeout: Duration,
}

/// Drives the pending → doing → history task machine
pub struct Migrator {
    store: Arc<MetaStore>,
    config: MigratorConfig,
}

impl Migrator {
    pub fn new(store: Arc<MetaStore>, config: MigratorConfig) -> Self {
        Self { store, config }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => self.drive_all().await,
            }
        }
        info!("migration coordinator stopped");
    }

    async fn drive_all(&self) {
        let namespaces = match self.store.list_namespaces().await {
            Ok(namespaces) => namespaces,
            Err(err) => {
                warn!("migration scan failed: {}", err);
                return;
            }
        };
        for namespace in namespaces {
            let clusters = match self.store.list_clusters(&namespace).await {
                Ok(clusters) => clusters,
                Err(err) => {
                    warn!("migration scan of {} failed: {}", namespace, err);
                    continue;
                }
            };
            for cluster in clusters {
                if let Err(err) = self.drive_cluster(&namespace, &cluster).await {
                    warn!("migration of {}/{} failed: {}", namespace, cluster, err);
                }
            }
        }
    }

    /// Advance one cluster by at most one sub-task
    pub async fn drive_cluster(&self, namespace: &str, cluster: &str) -> Result<()> {
        // an interrupted sub-task is picked up before new work
        if let Some(task) = self.store.doing_migrate_task(namespace, cluster).await? {
            debug!(
                "resuming migrate task {}_{} of {}/{}",
                task.task_id, task.sub_id, namespace, cluster
            );
            return self.execute(task, true).await;
        }

        for group in self.store.pending_migrate_tasks(namespace, cluster).await? {
            let Some(head) = group.first() else {
                continue;
            };
            // a failed sub-task freezes the rest of its group
            let history = self
                .store
                .migrate_history_for_task(namespace, cluster, head.task_id)
                .await?;
            if history.iter().any(|t| t.error_detail.is_some()) {
                debug!(
                    "migrate group {} of {}/{} is frozen by an earlier failure",
                    head.task_id, namespace, cluster
                );
                continue;
            }

            let mut task = head.clone();
            task.doing_time = now_ts();
            self.store.add_migrate_task(&task).await?;
            self.store.remove_pending_migrate_task(&task).await?;
            return self.execute(task, false).await;
        }
        Ok(())
    }

    /// Run one sub-task to completion and record the outcome
    async fn execute(&self, mut task: MigrateTask, resumed: bool) -> Result<()> {
        if task.doing_time == 0 {
            task.doing_time = now_ts();
        }
        if let Err(err) = self.transfer(&task, resumed).await {
            warn!(
                "migrate task {}_{} of {}/{} failed: {}",
                task.task_id, task.sub_id, task.namespace, task.cluster, err
            );
            task.error_detail = Some(err.to_string());
            if let Err(err) = self
                .store
                .clear_migrating(&task.namespace, &task.cluster, task.source, task.target)
                .await
            {
                warn!("failed to clear migration markers: {}", err);
            }
        } else {
            info!(
                "migrate task {}_{} of {}/{} moved {} range(s) from shard {} to {}",
                task.task_id,
                task.sub_id,
                task.namespace,
                task.cluster,
                task.slot_ranges.len(),
                task.source,
                task.target
            );
        }
        task.done_time = now_ts();
        self.store.add_migrate_history(&task).await?;
        self.store.remove_doing_migrate_task(&task).await?;
        Ok(())
    }

    /// Transfer every range of the sub-task, one at a time
    async fn transfer(&self, task: &MigrateTask, resumed: bool) -> Result<()> {
        let info = self.store.get_cluster(&task.namespace, &task.cluster).await?;
        let source_master = info
            .shard(task.source)
            .and_then(|s| s.master())
            .ok_or_else(|| {
                Error::InvalidArgument(format!("source shard {} has no master", task.source))
            })?
            .clone();
        let target_master_id = info
            .shard(task.target)
            .and_then(|s| s.master())
            .ok_or_else(|| {
                Error::InvalidArgument(format!("target shard {} has no master", task.target))
            })?
            .id
            .clone();

        for (idx, range) in task.slot_ranges.iter().enumerate() {
            self.store
                .mark_migrating(&task.namespace, &task.cluster, task.source, task.target, *range)
                .await?;
            self.transfer_range(
                &source_master,
                &target_master_id,
                range,
                // only the first range can be mid-flight on resume
                resumed && idx == 0,
            )
            .await?;
            self.store
                .apply_migrated_range(
                    &task.namespace,
                    &task.cluster,
                    task.source,
                    task.target,
                    *range,
                )
                .await?;
        }
        Ok(())
    }

    /// Instruct the source master and poll it until the range has moved
    async fn transfer_range(
        &self,
        source_master: &metadata::NodeInfo,
        target_master_id: &str,
        range: &SlotRange,
        maybe_in_flight: bool,
    ) -> Result<()> {
        let mut client = NodeClient::connect_to(source_master, self.config.rpc_timeout).await?;

        let mut started = false;
        if maybe_in_flight {
            let fields = client.cluster_info().await?;
            started = matches!(
                fields.get("migrating_state").map(String::as_str),
                Some("start") | Some("migrating")
            );
        }
        if !started {
            client.migrate_slots(range, target_master_id).await?;
        }

        let deadline = tokio::time::Instant::now() + self.config.task_timeout;
        loop {
            tokio::time::sleep(self.config.poll_interval).await;
            if tokio::time::Instant::now() > deadline {
                return Err(Error::Timeout);
            }
            let fields = client.cluster_info().await?;
            match fields.get("migrating_state").map(String::as_str) {
                Some("success") => return Ok(()),
                Some("fail") | Some("failed") => {
                    return Err(Error::NodeRejected {
                        addr: source_master.address.clone(),
                        message: format!("migration of {} failed on the source", range),
                    })
                }
                _ => {}
            }
        }
    }
}
