//! Cluster topology metadata
//!
//! Defines the value types that describe a cluster: nodes, shards, slot
//! ranges and the cluster record itself, together with the slot-range
//! arithmetic and the wire encoding pushed to data nodes.

mod cluster;
mod error;
mod node;
mod shard;
mod slot;

pub use cluster::Cluster;
pub use error::MetadataError;
pub use node::{generate_node_id, validate_node_id, NodeInfo, Role, NODE_ID_LEN};
pub use shard::Shard;
pub use slot::{merge_ranges, SlotRange, TOTAL_SLOTS};
