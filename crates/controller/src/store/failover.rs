//! Failover task records and their storage operations

use bytes::Bytes;
use persist::REVISION_NONE;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::{keys, now_ts, MetaStore};

/// How a failover was triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum FailOverKind {
    /// Requested through the admin surface
    Manual,
    /// Declared by the health probe
    Auto,
}

impl From<FailOverKind> for i32 {
    fn from(kind: FailOverKind) -> i32 {
        match kind {
            FailOverKind::Manual => 0,
            FailOverKind::Auto => 1,
        }
    }
}

impl TryFrom<i32> for FailOverKind {
    type Error = String;

    fn try_from(value: i32) -> std::result::Result<Self, String> {
        match value {
            0 => Ok(FailOverKind::Manual),
            1 => Ok(FailOverKind::Auto),
            other => Err(format!("invalid failover kind: {}", other)),
        }
    }
}

/// A queued or finished master failover
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailOverTask {
    pub namespace: String,
    pub cluster: String,
    pub shard_idx: usize,
    #[serde(rename = "type")]
    pub kind: FailOverKind,
    #[serde(default)]
    pub probe_count: u32,
    #[serde(default)]
    pub queued_at: i64,
    #[serde(default)]
    pub started_at: i64,
    #[serde(default)]
    pub finished_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl MetaStore {
    /// Queue (or refresh) the pending failover task of a shard
    ///
    /// Tasks are keyed by shard index, so each shard carries at most one.
    /// The write goes through compare-and-swap so two controllers racing
    /// on the same shard cannot silently overwrite each other.
    pub async fn update_failover_task(&self, task: &FailOverTask) -> Result<()> {
        self.check_leader()?;
        let mut task = task.clone();
        if task.queued_at == 0 {
            task.queued_at = now_ts();
        }
        let key = keys::failover_task_key(&task.namespace, &task.cluster, task.shard_idx);
        let expected = self
            .persist
            .get(&key)
            .await?
            .map(|kv| kv.revision)
            .unwrap_or(REVISION_NONE);
        self.persist
            .compare_and_swap(&key, expected, Bytes::from(serde_json::to_vec(&task)?))
            .await?;
        Ok(())
    }

    /// First pending failover task of a cluster, if any
    pub async fn get_failover_task(
        &self,
        namespace: &str,
        cluster: &str,
    ) -> Result<Option<FailOverTask>> {
        let listed = self
            .persist
            .list(&keys::failover_tasks_prefix(namespace, cluster))
            .await?;
        match listed.first() {
            Some(kv) => Ok(Some(serde_json::from_slice(&kv.value)?)),
            None => Ok(None),
        }
    }

    /// All pending failover tasks of a cluster
    pub async fn list_failover_tasks(
        &self,
        namespace: &str,
        cluster: &str,
    ) -> Result<Vec<FailOverTask>> {
        let listed = self
            .persist
            .list(&keys::failover_tasks_prefix(namespace, cluster))
            .await?;
        let mut tasks = Vec::with_capacity(listed.len());
        for kv in listed {
            tasks.push(serde_json::from_slice(&kv.value)?);
        }
        Ok(tasks)
    }

    pub async fn remove_failover_task(
        &self,
        namespace: &str,
        cluster: &str,
        shard_idx: usize,
    ) -> Result<bool> {
        self.check_leader()?;
        Ok(self
            .persist
            .delete(&keys::failover_task_key(namespace, cluster, shard_idx))
            .await?)
    }

    /// Append a finished failover to the history
    pub async fn add_failover_history(&self, task: &FailOverTask) -> Result<()> {
        self.check_leader()?;
        let mut task = task.clone();
        if task.finished_at == 0 {
            task.finished_at = now_ts();
        }
        let key = keys::failover_history_key(
            &task.namespace,
            &task.cluster,
            task.finished_at,
            task.shard_idx,
        );
        self.persist
            .put(&key, Bytes::from(serde_json::to_vec(&task)?))
            .await?;
        Ok(())
    }

    /// Failover history of a cluster in ascending time order
    pub async fn failover_history(
        &self,
        namespace: &str,
        cluster: &str,
    ) -> Result<Vec<FailOverTask>> {
        let listed = self
            .persist
            .list(&keys::failover_history_prefix(namespace, cluster))
            .await?;
        let mut history = Vec::with_capacity(listed.len());
        for kv in listed {
            history.push(serde_json::from_slice(&kv.value)?);
        }
        Ok(history)
    }
}
