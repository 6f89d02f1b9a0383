//! Migrate task records and their storage operations
//!
//! A task group shares one `task_id` and is stored as a whole under the
//! pending key of that id. Sub-tasks move individually through
//! pending, doing and history. Removing one sub-task never deletes its
//! siblings, so a group counts as existing until every sibling drained.

use bytes::Bytes;
use metadata::SlotRange;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::event::{Event, EventCommand};
use crate::store::{keys, now_ts, MetaStore};

/// One slot-range move between two shards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrateTask {
    /// Groups sub-tasks submitted together
    pub task_id: u64,
    /// Order within the group
    pub sub_id: u64,
    pub namespace: String,
    pub cluster: String,
    /// Source shard index
    pub source: usize,
    /// Target shard index
    pub target: usize,
    #[serde(default)]
    pub slot_ranges: Vec<SlotRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(default)]
    pub pending_time: i64,
    #[serde(default)]
    pub doing_time: i64,
    #[serde(default)]
    pub done_time: i64,
}

impl MetaStore {
    /// Queue a new task group
    ///
    /// Rejected when the group's `task_id` is already present in pending,
    /// doing or history.
    pub async fn add_pending_migrate_tasks(
        &self,
        namespace: &str,
        cluster: &str,
        mut tasks: Vec<MigrateTask>,
    ) -> Result<()> {
        self.check_leader()?;
        let task_id = tasks
            .first()
            .ok_or_else(|| Error::InvalidArgument("empty migrate task group".to_string()))?
            .task_id;
        if self
            .is_migrate_task_exists(namespace, cluster, task_id)
            .await?
        {
            return Err(Error::MigrationConflict(task_id));
        }
        let now = now_ts();
        for task in tasks.iter_mut() {
            if task.pending_time == 0 {
                task.pending_time = now;
            }
        }
        let key = keys::migrate_pending_key(namespace, cluster, task_id);
        self.persist
            .put(&key, Bytes::from(serde_json::to_vec(&tasks)?))
            .await?;
        Ok(())
    }

    /// Delete one sub-task from its pending group
    ///
    /// Missing groups and missing sub-tasks are fine; the group key stays
    /// while any sibling remains.
    pub async fn remove_pending_migrate_task(&self, task: &MigrateTask) -> Result<()> {
        self.check_leader()?;
        let key = keys::migrate_pending_key(&task.namespace, &task.cluster, task.task_id);
        let Some(kv) = self.persist.get(&key).await? else {
            return Ok(());
        };
        let mut tasks: Vec<MigrateTask> = serde_json::from_slice(&kv.value)?;
        tasks.retain(|t| !(t.task_id == task.task_id && t.sub_id == task.sub_id));
        if tasks.is_empty() {
            self.persist.delete(&key).await?;
        } else {
            self.persist
                .put(&key, Bytes::from(serde_json::to_vec(&tasks)?))
                .await?;
        }
        Ok(())
    }

    /// All pending groups of a cluster, in ascending task id order
    pub async fn pending_migrate_tasks(
        &self,
        namespace: &str,
        cluster: &str,
    ) -> Result<Vec<Vec<MigrateTask>>> {
        let listed = self
            .persist
            .list(&keys::migrate_pending_prefix(namespace, cluster))
            .await?;
        let mut groups = Vec::with_capacity(listed.len());
        for kv in listed {
            groups.push(serde_json::from_slice(&kv.value)?);
        }
        Ok(groups)
    }

    /// Record a sub-task as the active one of its cluster
    ///
    /// At most one sub-task may be active per cluster.
    pub async fn add_migrate_task(&self, task: &MigrateTask) -> Result<()> {
        self.check_leader()?;
        if let Some(active) = self
            .doing_migrate_task(&task.namespace, &task.cluster)
            .await?
        {
            if active.task_id != task.task_id || active.sub_id != task.sub_id {
                return Err(Error::MigrationConflict(active.task_id));
            }
        }
        let key = keys::migrate_doing_key(&task.namespace, &task.cluster, task.task_id, task.sub_id);
        self.persist
            .put(&key, Bytes::from(serde_json::to_vec(task)?))
            .await?;
        Ok(())
    }

    /// The active sub-task of a cluster, if any
    pub async fn doing_migrate_task(
        &self,
        namespace: &str,
        cluster: &str,
    ) -> Result<Option<MigrateTask>> {
        let listed = self
            .persist
            .list(&keys::migrate_doing_prefix(namespace, cluster))
            .await?;
        match listed.first() {
            Some(kv) => Ok(Some(serde_json::from_slice(&kv.value)?)),
            None => Ok(None),
        }
    }

    pub async fn remove_doing_migrate_task(&self, task: &MigrateTask) -> Result<()> {
        self.check_leader()?;
        let key = keys::migrate_doing_key(&task.namespace, &task.cluster, task.task_id, task.sub_id);
        self.persist.delete(&key).await?;
        Ok(())
    }

    /// Append a finished sub-task to the history
    pub async fn add_migrate_history(&self, task: &MigrateTask) -> Result<()> {
        self.check_leader()?;
        let key =
            keys::migrate_history_key(&task.namespace, &task.cluster, task.task_id, task.sub_id);
        self.persist
            .put(&key, Bytes::from(serde_json::to_vec(task)?))
            .await?;
        Ok(())
    }

    /// Full migrate history of a cluster in ascending `taskID_subID` order
    pub async fn migrate_history(&self, namespace: &str, cluster: &str) -> Result<Vec<MigrateTask>> {
        let listed = self
            .persist
            .list(&keys::migrate_history_prefix(namespace, cluster))
            .await?;
        let mut history = Vec::with_capacity(listed.len());
        for kv in listed {
            history.push(serde_json::from_slice(&kv.value)?);
        }
        Ok(history)
    }

    /// History entries of one task group
    pub async fn migrate_history_for_task(
        &self,
        namespace: &str,
        cluster: &str,
        task_id: u64,
    ) -> Result<Vec<MigrateTask>> {
        let listed = self
            .persist
            .list(&keys::migrate_history_task_prefix(namespace, cluster, task_id))
            .await?;
        let mut history = Vec::with_capacity(listed.len());
        for kv in listed {
            history.push(serde_json::from_slice(&kv.value)?);
        }
        Ok(history)
    }

    /// True while any pending, doing or history entry carries the task id
    pub async fn is_migrate_task_exists(
        &self,
        namespace: &str,
        cluster: &str,
        task_id: u64,
    ) -> Result<bool> {
        let pending = keys::migrate_pending_key(namespace, cluster, task_id);
        if self.persist.get(&pending).await?.is_some() {
            return Ok(true);
        }
        let doing = keys::migrate_doing_task_prefix(namespace, cluster, task_id);
        if !self.persist.list(&doing).await?.is_empty() {
            return Ok(true);
        }
        let history = keys::migrate_history_task_prefix(namespace, cluster, task_id);
        Ok(!self.persist.list(&history).await?.is_empty())
    }

    // ==================== Slot handoff ====================

    /// Mark the range as moving between the two shards
    pub async fn mark_migrating(
        &self,
        namespace: &str,
        cluster: &str,
        source: usize,
        target: usize,
        range: SlotRange,
    ) -> Result<()> {
        self.with_cluster(namespace, cluster, |info| {
            check_shard_pair(info, source, target)?;
            info.shards[source].migrating_slot = Some(range);
            info.shards[target].import_slot = Some(range);
            Ok(())
        })
        .await?;
        self.emit(Event::shard(namespace, cluster, source, EventCommand::Update))
            .await;
        Ok(())
    }

    /// Move a transferred range from source to target atomically
    pub async fn apply_migrated_range(
        &self,
        namespace: &str,
        cluster: &str,
        source: usize,
        target: usize,
        range: SlotRange,
    ) -> Result<()> {
        self.with_cluster(namespace, cluster, |info| {
            check_shard_pair(info, source, target)?;
            info.shards[source].remove_ranges(&[range]);
            info.shards[source].migrating_slot = None;
            info.shards[target].add_ranges(&[range]);
            info.shards[target].import_slot = None;
            Ok(())
        })
        .await?;
        self.emit(Event::shard(namespace, cluster, source, EventCommand::Update))
            .await;
        Ok(())
    }

    /// Clear in-flight markers after a failed transfer
    pub async fn clear_migrating(
        &self,
        namespace: &str,
        cluster: &str,
        source: usize,
        target: usize,
    ) -> Result<()> {
        self.with_cluster(namespace, cluster, |info| {
            check_shard_pair(info, source, target)?;
            info.shards[source].migrating_slot = None;
            info.shards[target].import_slot = None;
            Ok(())
        })
        .await?;
        self.emit(Event::shard(namespace, cluster, source, EventCommand::Update))
            .await;
        Ok(())
    }
}

fn check_shard_pair(info: &metadata::Cluster, source: usize, target: usize) -> Result<()> {
    if source == target {
        return Err(Error::InvalidArgument(
            "source and target shard are the same".to_string(),
        ));
    }
    if source >= info.shards.len() || target >= info.shards.len() {
        return Err(Error::InvalidArgument(format!(
            "shard pair {}/{} out of range",
            source, target
        )));
    }
    Ok(())
}
