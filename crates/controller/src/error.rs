//! Controller error types
//!
//! One error enum for every control-plane operation. Validation failures
//! surface to the caller directly; transport failures carry the node
//! address they happened against.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not leader")]
    NotLeader,
    #[error("already exists")]
    AlreadyExists,
    #[error("not exists")]
    NotExists,
    #[error("namespace is not empty")]
    NotEmpty,
    #[error("{0}")]
    InvalidArgument(String),
    #[error("no replica")]
    NoReplica,
    #[error("migrate task {0} already exists")]
    MigrationConflict(u64),
    #[error("timed out")]
    Timeout,
    #[error("node {addr} unreachable: {source}")]
    NodeUnreachable {
        addr: String,
        source: resp::RespError,
    },
    #[error("node {addr} rejected command: {message}")]
    NodeRejected { addr: String, message: String },
    #[error(transparent)]
    Persist(#[from] persist::PersistError),
    #[error(transparent)]
    Metadata(#[from] metadata::MetadataError),
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl Error {
    /// True for compare-and-swap conflicts worth retrying
    pub fn is_stale_revision(&self) -> bool {
        matches!(self, Error::Persist(persist::PersistError::StaleRevision(_)))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
