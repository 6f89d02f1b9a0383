//! Metadata validation errors

use thiserror::Error;

/// Errors produced by topology validation and parsing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    #[error("invalid slot range: {0}")]
    InvalidSlotRange(String),
    #[error("slot {0} is out of range")]
    SlotOutOfRange(u32),
    #[error("invalid node id: {0}")]
    InvalidNodeId(String),
    #[error("duplicate node id: {0}")]
    DuplicateNodeId(String),
    #[error("invalid node address: {0}")]
    InvalidNodeAddress(String),
    #[error("shard {0} has no nodes")]
    EmptyShard(usize),
    #[error("shard {0} has no master")]
    NoMaster(usize),
    #[error("slot ranges overlap: {0} and {1}")]
    SlotRangeOverlap(String, String),
    #[error("slot ranges do not cover the full slot space")]
    SlotsNotCovered,
    #[error("invalid slot string: {0}")]
    InvalidSlotString(String),
    #[error("invalid cluster topology: {0}")]
    InvalidTopology(String),
}
