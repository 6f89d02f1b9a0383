//! Durable key-value backend for cluster metadata
//!
//! All controller state lives behind the [`Persist`] trait: opaque byte
//! values under UTF-8 keys, compare-and-swap on per-key revisions, prefix
//! scans in key order, prefix watches, and lease-backed leader election.
//!
//! Two engines are provided: [`MemoryPersist`] for tests and single-node
//! development, and [`RocksPersist`] for durable deployments.

mod election;
mod memory;
mod rocks;
mod watch;

pub use election::LeaderLease;
pub use memory::MemoryPersist;
pub use rocks::RocksPersist;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors surfaced by a persistence engine
#[derive(Debug, Error)]
pub enum PersistError {
    /// A compare-and-swap saw a different revision than expected
    #[error("stale revision for key {0}")]
    StaleRevision(String),
    /// The backend cannot be reached or is shutting down
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    /// The backend failed to read or write
    #[error("storage error: {0}")]
    Storage(String),
}

/// A stored key with its value and revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Bytes,
    /// Revision of the last write to this key
    pub revision: u64,
}

/// Kind of a watch notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Put,
    Delete,
}

/// A single change observed under a watched prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub key: String,
    /// The new value for puts; empty for deletes
    pub value: Bytes,
}

/// Stream of watch notifications
pub type WatchStream = mpsc::UnboundedReceiver<WatchEvent>;

/// Expected revision meaning "the key must not exist yet"
pub const REVISION_NONE: u64 = 0;

/// The durable key-value interface backing all controller state
#[async_trait]
pub trait Persist: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>, PersistError>;

    /// Write a value, returning the new revision
    async fn put(&self, key: &str, value: Bytes) -> Result<u64, PersistError>;

    /// Delete a key; returns whether it existed
    async fn delete(&self, key: &str) -> Result<bool, PersistError>;

    /// List all keys under a prefix in ascending key order
    async fn list(&self, prefix: &str) -> Result<Vec<KeyValue>, PersistError>;

    /// Write only if the current revision matches `expected`
    ///
    /// Pass [`REVISION_NONE`] to require that the key does not exist.
    /// A mismatch fails with [`PersistError::StaleRevision`].
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: u64,
        value: Bytes,
    ) -> Result<u64, PersistError>;

    /// Block until this candidate holds the election key, then return the
    /// lease. The winner's identity is readable (and watchable) under the
    /// election key until the lease is resigned or lost.
    async fn campaign(
        &self,
        election_key: &str,
        candidate_id: &str,
        ttl: Duration,
    ) -> Result<LeaderLease, PersistError>;

    /// Watch all future changes under a prefix
    async fn watch(&self, prefix: &str) -> Result<WatchStream, PersistError>;
}
