//! RocksDB persistence engine
//!
//! Stores each value framed with the revision of its last write (8-byte
//! big-endian prefix). A global revision counter lives under an internal
//! key that sorts before every user key, so prefix scans never see it.
//! Writes are serialized by the revision lock, which also makes
//! compare-and-swap atomic.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use tracing::info;

use crate::election::{ElectionHub, LeaderLease};
use crate::watch::WatchHub;
use crate::{
    KeyValue, Persist, PersistError, WatchEvent, WatchEventKind, WatchStream, REVISION_NONE,
};

const REVISION_KEY: &[u8] = b"\x00revision";

struct Inner {
    db: DB,
    revision: Mutex<u64>,
    watches: WatchHub,
    elections: Arc<ElectionHub>,
}

/// Durable persistence engine backed by RocksDB
#[derive(Clone)]
pub struct RocksPersist {
    inner: Arc<Inner>,
}

impl RocksPersist {
    /// Open (or create) the database under the given directory
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PersistError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path.as_ref())
            .map_err(|e| PersistError::Storage(e.to_string()))?;

        let revision = match db
            .get(REVISION_KEY)
            .map_err(|e| PersistError::Storage(e.to_string()))?
        {
            Some(raw) => decode_revision(&raw)?,
            None => 0,
        };
        info!(
            "metadata store opened at {:?}, revision {}",
            path.as_ref(),
            revision
        );

        Ok(Self {
            inner: Arc::new(Inner {
                db,
                revision: Mutex::new(revision),
                watches: WatchHub::default(),
                elections: Arc::new(ElectionHub::default()),
            }),
        })
    }
}

impl Inner {
    /// Bump the revision and write key + counter in one batch
    fn write_framed(&self, key: &str, value: &Bytes) -> Result<u64, PersistError> {
        let mut revision = self.revision.lock();
        *revision += 1;
        let mut batch = WriteBatch::default();
        batch.put(REVISION_KEY, (*revision).to_be_bytes());
        batch.put(key.as_bytes(), frame(*revision, value));
        self.db
            .write(batch)
            .map_err(|e| PersistError::Storage(e.to_string()))?;
        Ok(*revision)
    }

    fn read_framed(&self, key: &str) -> Result<Option<(u64, Bytes)>, PersistError> {
        match self
            .db
            .get(key.as_bytes())
            .map_err(|e| PersistError::Storage(e.to_string()))?
        {
            Some(raw) => Ok(Some(unframe(&raw)?)),
            None => Ok(None),
        }
    }

    fn delete_sync(&self, key: &str) -> bool {
        let existed = matches!(self.db.get(key.as_bytes()), Ok(Some(_)));
        if self.db.delete(key.as_bytes()).is_ok() && existed {
            self.watches.publish(WatchEvent {
                kind: WatchEventKind::Delete,
                key: key.to_string(),
                value: Bytes::new(),
            });
        }
        existed
    }

    fn put_sync(&self, key: &str, value: Bytes) -> Result<u64, PersistError> {
        let revision = self.write_framed(key, &value)?;
        self.watches.publish(WatchEvent {
            kind: WatchEventKind::Put,
            key: key.to_string(),
            value,
        });
        Ok(revision)
    }
}

fn frame(revision: u64, value: &Bytes) -> Vec<u8> {
    let mut framed = Vec::with_capacity(8 + value.len());
    framed.extend_from_slice(&revision.to_be_bytes());
    framed.extend_from_slice(value);
    framed
}

fn unframe(raw: &[u8]) -> Result<(u64, Bytes), PersistError> {
    if raw.len() < 8 {
        return Err(PersistError::Storage("truncated value frame".to_string()));
    }
    let revision = decode_revision(&raw[..8])?;
    Ok((revision, Bytes::copy_from_slice(&raw[8..])))
}

fn decode_revision(raw: &[u8]) -> Result<u64, PersistError> {
    if raw.len() < 8 {
        return Err(PersistError::Storage("truncated revision".to_string()));
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&raw[..8]);
    Ok(u64::from_be_bytes(bytes))
}

#[async_trait]
impl Persist for RocksPersist {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>, PersistError> {
        Ok(self.inner.read_framed(key)?.map(|(revision, value)| KeyValue {
            key: key.to_string(),
            value,
            revision,
        }))
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<u64, PersistError> {
        self.inner.put_sync(key, value)
    }

    async fn delete(&self, key: &str) -> Result<bool, PersistError> {
        Ok(self.inner.delete_sync(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KeyValue>, PersistError> {
        let mode = IteratorMode::From(prefix.as_bytes(), Direction::Forward);
        let mut listed = Vec::new();
        for entry in self.inner.db.iterator(mode) {
            let (key, raw) = entry.map_err(|e| PersistError::Storage(e.to_string()))?;
            let key = String::from_utf8_lossy(&key).to_string();
            if !key.starts_with(prefix) {
                break;
            }
            let (revision, value) = unframe(&raw)?;
            listed.push(KeyValue {
                key,
                value,
                revision,
            });
        }
        Ok(listed)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: u64,
        value: Bytes,
    ) -> Result<u64, PersistError> {
        let revision = {
            let mut revision = self.inner.revision.lock();
            let current = self
                .inner
                .read_framed(key)?
                .map(|(rev, _)| rev)
                .unwrap_or(REVISION_NONE);
            if current != expected {
                return Err(PersistError::StaleRevision(key.to_string()));
            }
            *revision += 1;
            let mut batch = WriteBatch::default();
            batch.put(REVISION_KEY, (*revision).to_be_bytes());
            batch.put(key.as_bytes(), frame(*revision, &value));
            self.inner
                .db
                .write(batch)
                .map_err(|e| PersistError::Storage(e.to_string()))?;
            *revision
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
            .put_sync(election_key, Bytes::from(candidate_id.to_string()))?;

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
