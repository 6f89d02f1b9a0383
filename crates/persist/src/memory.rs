//! In-memory persistence engine
//!
//! Backs tests and single-node development. Implements the full
//! [`Persist`] contract including revisions, prefix watches and leader
//! election, but keeps nothing across restarts.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::election::{ElectionHub, LeaderLease};
use crate::watch::WatchHub;
use crate::{
    KeyValue, Persist, PersistError, WatchEvent, WatchEventKind, WatchStream, REVISION_NONE,
};

#[derive(Clone)]
struct Stored {
    value: Bytes,
    revision: u64,
}

struct Inner {
    data: Mutex<BTreeMap<String, Stored>>,
    revision: AtomicU64,
    watches: WatchHub,
    elections: Arc<ElectionHub>,
}

/// Process-local persistence engine
#[derive(Clone)]
pub struct MemoryPersist {
    inner: Arc<Inner>,
}

impl MemoryPersist {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                data: Mutex::new(BTreeMap::new()),
                revision: AtomicU64::new(0),
                watches: WatchHub::default(),
                elections: Arc::new(ElectionHub::default()),
            }),
        }
    }
}

impl Default for MemoryPersist {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn put_sync(&self, key: &str, value: Bytes) -> u64 {
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        self.data.lock().insert(
            key.to_string(),
            Stored {
                value: value.clone(),
                revision,
            },
        );
        self.watches.publish(WatchEvent {
            kind: WatchEventKind::Put,
            key: key.to_string(),
            value,
        });
        revision
    }

    fn delete_sync(&self, key: &str) -> bool {
        let existed = self.data.lock().remove(key).is_some();
        if existed {
            self.watches.publish(WatchEvent {
                kind: WatchEventKind::Delete,
                key: key.to_string(),
                value: Bytes::new(),
            });
        }
        existed
    }
}

#[async_trait]
impl Persist for MemoryPersist {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>, PersistError> {
        Ok(self.inner.data.lock().get(key).map(|stored| KeyValue {
            key: key.to_string(),
            value: stored.value.clone(),
            revision: stored.revision,
        }))
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<u64, PersistError> {
        Ok(self.inner.put_sync(key, value))
    }

    async fn delete(&self, key: &str) -> Result<bool, PersistError> {
        Ok(self.inner.delete_sync(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KeyValue>, PersistError> {
        let data = self.inner.data.lock();
        Ok(data
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, stored)| KeyValue {
                key: key.clone(),
                value: stored.value.clone(),
                revision: stored.revision,
            })
            .collect())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: u64,
        value: Bytes,
    ) -> Result<u64, PersistError> {
        // Revision check and write happen under one lock so concurrent
        // writers serialize.
        let revision = {
            let mut data = self.inner.data.lock();
            let current = data.get(key).map(|s| s.revision).unwrap_or(REVISION_NONE);
            if current != expected {
                return Err(PersistError::StaleRevision(key.to_string()));
            }
            let revision = self.inner.revision.fetch_add(1, Ordering::SeqCst) + 1;
            data.insert(
                key.to_string(),
                Stored {
                    value: value.clone(),
                    revision,
                },
            );
            revision
        };
        self.inner.watches.publish(WatchEvent {
            kind: WatchEventKind::Put,
            key: key.to_string(),
            value,
        });
        Ok(revision)
    }

    async fn campaign(
        &self,
        election_key: &str,
        candidate_id: &str,
        ttl: Duration,
    ) -> Result<LeaderLease, PersistError> {
        let (lost_rx, epoch) = self
            .inner
            .elections
            .campaign(election_key, candidate_id, ttl)
            .await;
        self.inner
            .put_sync(election_key, Bytes::from(candidate_id.to_string()));

        let inner = Arc::clone(&self.inner);
        let key = election_key.to_string();
        let cleanup_key = key.clone();
        Ok(LeaderLease::new(
            key,
            candidate_id.to_string(),
            epoch,
            lost_rx,
            Arc::clone(&self.inner.elections),
            Box::new(move || {
                inner.delete_sync(&cleanup_key);
            }),
        ))
    }

    async fn watch(&self, prefix: &str) -> Result<WatchStream, PersistError> {
        Ok(self.inner.watches.register(prefix))
    }
}
