//! Storage façade
//!
//! All topology mutations flow through [`MetaStore`]: leadership is
//! checked first, the transition is validated, the record is persisted,
//! and one event is emitted after the write is acknowledged. Reads do not
//! require leadership.

mod failover;
pub mod keys;
mod migrate;

pub use failover::{FailOverKind, FailOverTask};
pub use migrate::MigrateTask;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use metadata::{Cluster, NodeInfo, Shard};
use parking_lot::RwLock;
use persist::{Persist, PersistError, REVISION_NONE};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::event::{Event, EventCommand};

/// Attempts for a read-modify-write before giving up on revision conflicts
const CAS_ATTEMPTS: usize = 5;

pub(crate) fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

/// The storage façade over the persistence backend
pub struct MetaStore {
    persist: Arc<dyn Persist>,
    leader: AtomicBool,
    leader_id: RwLock<String>,
    event_tx: RwLock<Option<mpsc::Sender<Event>>>,
}

impl MetaStore {
    pub fn new(persist: Arc<dyn Persist>) -> Self {
        Self {
            persist,
            leader: AtomicBool::new(false),
            leader_id: RwLock::new(String::new()),
            event_tx: RwLock::new(None),
        }
    }

    pub fn persist(&self) -> &Arc<dyn Persist> {
        &self.persist
    }

    pub fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    pub fn set_leader(&self, leader: bool) {
        self.leader.store(leader, Ordering::SeqCst);
    }

    /// Identity of the current leader, as observed on the election key
    pub fn leader_id(&self) -> String {
        self.leader_id.read().clone()
    }

    pub fn set_leader_id(&self, id: &str) {
        *self.leader_id.write() = id.to_string();
    }

    /// Install the event sender for the current leadership term
    pub fn install_event_sender(&self, tx: mpsc::Sender<Event>) {
        *self.event_tx.write() = Some(tx);
    }

    pub fn clear_event_sender(&self) {
        *self.event_tx.write() = None;
    }

    pub(crate) fn check_leader(&self) -> Result<()> {
        if self.is_leader() {
            Ok(())
        } else {
            Err(Error::NotLeader)
        }
    }

    /// Publish an event after a write has been acknowledged
    ///
    /// A full channel blocks the writer. A missing or closed receiver
    /// drops the event; the post-election full resync covers that loss.
    pub(crate) async fn emit(&self, event: Event) {
        let tx = self.event_tx.read().clone();
        match tx {
            Some(tx) => {
                if tx.send(event).await.is_err() {
                    warn!("event receiver gone, dropping event");
                }
            }
            None => debug!("no event subscriber installed, dropping event"),
        }
    }

    // ==================== Namespaces ====================

    pub async fn create_namespace(&self, namespace: &str) -> Result<()> {
        self.check_leader()?;
        validate_name(namespace, "namespace")?;
        let key = keys::namespace_key(namespace);
        if self.persist.get(&key).await?.is_some() {
            return Err(Error::AlreadyExists);
        }
        self.persist
            .put(&key, Bytes::from(namespace.to_string()))
            .await?;
        self.emit(Event::namespace(namespace, EventCommand::Create))
            .await;
        Ok(())
    }

    pub async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        Ok(self
            .persist
            .get(&keys::namespace_key(namespace))
            .await?
            .is_some())
    }

    pub async fn list_namespaces(&self) -> Result<Vec<String>> {
        let listed = self.persist.list(keys::NAMESPACE_PREFIX).await?;
        Ok(listed
            .into_iter()
            .map(|kv| kv.key[keys::NAMESPACE_PREFIX.len()..].to_string())
            .filter(|name| !name.contains('/'))
            .collect())
    }

    pub async fn remove_namespace(&self, namespace: &str) -> Result<()> {
        self.check_leader()?;
        if !self.namespace_exists(namespace).await? {
            return Err(Error::NotExists);
        }
        if !self.list_clusters(namespace).await?.is_empty() {
            return Err(Error::NotEmpty);
        }
        self.persist.delete(&keys::namespace_key(namespace)).await?;
        self.emit(Event::namespace(namespace, EventCommand::Remove))
            .await;
        Ok(())
    }

    // ==================== Clusters ====================

    /// Create a cluster from a full topology payload
    ///
    /// The payload must exist and describe at least one shard covering the
    /// whole slot space.
    pub async fn create_cluster(
        &self,
        namespace: &str,
        cluster: &str,
        info: Option<Cluster>,
    ) -> Result<()> {
        self.check_leader()?;
        let mut info =
            info.ok_or_else(|| Error::InvalidArgument("nil cluster info".to_string()))?;
        validate_name(cluster, "cluster")?;
        if !self.namespace_exists(namespace).await? {
            return Err(Error::NotExists);
        }
        info.validate()?;
        if info.shards.is_empty() || !info.is_initialized() {
            return Err(Error::InvalidArgument(
                "cluster slots are not fully covered".to_string(),
            ));
        }
        if info.version < 1 {
            info.version = 1;
        }

        let key = keys::cluster_info_key(namespace, cluster);
        let encoded = serde_json::to_vec(&info)?;
        match self
            .persist
            .compare_and_swap(&key, REVISION_NONE, Bytes::from(encoded))
            .await
        {
            Ok(_) => {}
            Err(PersistError::StaleRevision(_)) => return Err(Error::AlreadyExists),
            Err(err) => return Err(err.into()),
        }
        self.emit(Event::cluster(namespace, cluster, EventCommand::Create))
            .await;
        Ok(())
    }

    pub async fn get_cluster(&self, namespace: &str, cluster: &str) -> Result<Cluster> {
        let kv = self
            .persist
            .get(&keys::cluster_info_key(namespace, cluster))
            .await?
            .ok_or(Error::NotExists)?;
        Ok(serde_json::from_slice(&kv.value)?)
    }

    pub async fn cluster_exists(&self, namespace: &str, cluster: &str) -> Result<bool> {
        Ok(self
            .persist
            .get(&keys::cluster_info_key(namespace, cluster))
            .await?
            .is_some())
    }

    pub async fn list_clusters(&self, namespace: &str) -> Result<Vec<String>> {
        let root = keys::namespace_root(namespace);
        let listed = self.persist.list(&root).await?;
        Ok(listed
            .into_iter()
            .filter_map(|kv| {
                let rest = &kv.key[root.len()..];
                rest.strip_suffix("/info")
                    .filter(|name| !name.contains('/'))
                    .map(str::to_string)
            })
            .collect())
    }

    /// Remove a cluster and every record under it
    ///
    /// Idempotent: removing a cluster that does not exist succeeds, so a
    /// retry after a crash is safe. Always emits one remove event.
    pub async fn remove_cluster(&self, namespace: &str, cluster: &str) -> Result<()> {
        self.check_leader()?;
        for kv in self
            .persist
            .list(&keys::cluster_root(namespace, cluster))
            .await?
        {
            self.persist.delete(&kv.key).await?;
        }
        self.emit(Event::cluster(namespace, cluster, EventCommand::Remove))
            .await;
        Ok(())
    }

    /// Read-modify-write a cluster under compare-and-swap
    ///
    /// The mutation closure may run several times when concurrent writers
    /// conflict. The version is bumped after the closure, so every
    /// successful mutation is strictly newer.
    pub(crate) async fn with_cluster<F>(
        &self,
        namespace: &str,
        cluster: &str,
        mutate: F,
    ) -> Result<Cluster>
    where
        F: Fn(&mut Cluster) -> Result<()>,
    {
        self.check_leader()?;
        let key = keys::cluster_info_key(namespace, cluster);
        let mut attempt = 0;
        loop {
            let kv = self.persist.get(&key).await?.ok_or(Error::NotExists)?;
            let mut info: Cluster = serde_json::from_slice(&kv.value)?;
            mutate(&mut info)?;
            info.version += 1;
            let encoded = serde_json::to_vec(&info)?;
            match self
                .persist
                .compare_and_swap(&key, kv.revision, Bytes::from(encoded))
                .await
            {
                Ok(_) => return Ok(info),
                Err(PersistError::StaleRevision(_)) if attempt + 1 < CAS_ATTEMPTS => {
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    // ==================== Shards ====================

    pub async fn get_shard(&self, namespace: &str, cluster: &str, shard_idx: usize) -> Result<Shard> {
        let info = self.get_cluster(namespace, cluster).await?;
        info.shard(shard_idx)
            .cloned()
            .ok_or_else(|| shard_out_of_range(shard_idx))
    }

    /// Append a shard; its ranges must not collide with existing owners
    pub async fn add_shard(&self, namespace: &str, cluster: &str, shard: Shard) -> Result<()> {
        let updated = self
            .with_cluster(namespace, cluster, |info| {
                for existing in &info.shards {
                    for owned in &existing.slot_ranges {
                        for range in &shard.slot_ranges {
                            if owned.overlaps(range) {
                                return Err(Error::InvalidArgument(format!(
                                    "slot range {} is already owned",
                                    range
                                )));
                            }
                        }
                    }
                }
                for node in &shard.nodes {
                    if info.find_node(&node.id).is_some() {
                        return Err(Error::InvalidArgument(format!(
                            "node {} already exists in cluster",
                            node.id
                        )));
                    }
                }
                let mut shard = shard.clone();
                shard.validate(info.shards.len())?;
                info.shards.push(shard);
                Ok(())
            })
            .await?;
        self.emit(Event::shard(
            namespace,
            cluster,
            updated.shards.len() - 1,
            EventCommand::Create,
        ))
        .await;
        Ok(())
    }

    /// Drop a shard that no longer owns slots
    pub async fn remove_shard(&self, namespace: &str, cluster: &str, shard_idx: usize) -> Result<()> {
        self.with_cluster(namespace, cluster, |info| {
            let shard = info
                .shard(shard_idx)
                .ok_or_else(|| shard_out_of_range(shard_idx))?;
            if !shard.slot_ranges.is_empty() {
                return Err(Error::InvalidArgument(format!(
                    "shard {} still owns slots",
                    shard_idx
                )));
            }
            info.shards.remove(shard_idx);
            Ok(())
        })
        .await?;
        self.emit(Event::shard(namespace, cluster, shard_idx, EventCommand::Remove))
            .await;
        Ok(())
    }

    // ==================== Nodes ====================

    pub async fn add_node(
        &self,
        namespace: &str,
        cluster: &str,
        shard_idx: usize,
        node: NodeInfo,
    ) -> Result<()> {
        node.validate()?;
        self.with_cluster(namespace, cluster, |info| {
            if info.find_node(&node.id).is_some() {
                return Err(Error::InvalidArgument(format!(
                    "node {} already exists in cluster",
                    node.id
                )));
            }
            let shard = info
                .shards
                .get_mut(shard_idx)
                .ok_or_else(|| shard_out_of_range(shard_idx))?;
            let expect_master = shard.nodes.is_empty();
            if expect_master != node.is_master() {
                return Err(Error::InvalidArgument(if expect_master {
                    "first node of a shard must be a master".to_string()
                } else {
                    "shard already has a master".to_string()
                }));
            }
            shard.nodes.push(node.clone());
            Ok(())
        })
        .await?;
        self.emit(Event::node(
            namespace,
            cluster,
            shard_idx,
            &node.id,
            EventCommand::Create,
        ))
        .await;
        Ok(())
    }

    pub async fn remove_node(
        &self,
        namespace: &str,
        cluster: &str,
        shard_idx: usize,
        node_id: &str,
    ) -> Result<()> {
        self.with_cluster(namespace, cluster, |info| {
            let shard = info
                .shards
                .get_mut(shard_idx)
                .ok_or_else(|| shard_out_of_range(shard_idx))?;
            let node = shard
                .find_node(node_id)
                .ok_or(Error::NotExists)?;
            if node.is_master() && shard.nodes.len() > 1 {
                return Err(Error::InvalidArgument(
                    "cannot remove the master while replicas exist".to_string(),
                ));
            }
            shard.remove_node(node_id)?;
            Ok(())
        })
        .await?;
        self.emit(Event::node(
            namespace,
            cluster,
            shard_idx,
            node_id,
            EventCommand::Remove,
        ))
        .await;
        Ok(())
    }

    /// Promote a replica to master, optionally dropping the old master
    ///
    /// Used by the failover path; bumps the version and emits a shard
    /// update so the new topology propagates.
    pub async fn promote_node(
        &self,
        namespace: &str,
        cluster: &str,
        shard_idx: usize,
        node_id: &str,
        remove_old_master: bool,
    ) -> Result<Cluster> {
        let updated = self
            .with_cluster(namespace, cluster, |info| {
                let shard = info
                    .shards
                    .get_mut(shard_idx)
                    .ok_or_else(|| shard_out_of_range(shard_idx))?;
                let old_master = shard
                    .master()
                    .ok_or_else(|| Error::InvalidArgument("shard has no master".to_string()))?
                    .id
                    .clone();
                shard.promote(node_id)?;
                if remove_old_master && old_master != node_id {
                    shard.remove_node(&old_master)?;
                }
                Ok(())
            })
            .await?;
        self.emit(Event::shard(namespace, cluster, shard_idx, EventCommand::Update))
            .await;
        Ok(updated)
    }
}

fn validate_name(name: &str, kind: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') {
        return Err(Error::InvalidArgument(format!(
            "invalid {} name: {:?}",
            kind, name
        )));
    }
    Ok(())
}

fn shard_out_of_range(shard_idx: usize) -> Error {
    Error::InvalidArgument(format!("shard index {} out of range", shard_idx))
}
