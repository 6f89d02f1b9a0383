//! Mutation events
//!
//! Every acknowledged write on the storage layer produces one event. The
//! channel is deliberately small: a full buffer blocks the writer, which
//! couples the mutation rate to the speed of topology propagation.

use tokio::sync::mpsc;

/// Event channel depth
pub const EVENT_BUFFER_SIZE: usize = 8;

/// Which kind of record changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Namespace,
    Cluster,
    Shard,
    Node,
}

/// What happened to it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCommand {
    Create,
    Update,
    Remove,
}

/// A single topology mutation, delivered in mutation order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub event_type: EventType,
    pub command: EventCommand,
    pub namespace: String,
    pub cluster: String,
    pub shard_idx: Option<usize>,
    pub node_id: Option<String>,
}

impl Event {
    pub fn namespace(namespace: &str, command: EventCommand) -> Self {
        Self {
            event_type: EventType::Namespace,
            command,
            namespace: namespace.to_string(),
            cluster: String::new(),
            shard_idx: None,
            node_id: None,
        }
    }

    pub fn cluster(namespace: &str, cluster: &str, command: EventCommand) -> Self {
        Self {
            event_type: EventType::Cluster,
            command,
            namespace: namespace.to_string(),
            cluster: cluster.to_string(),
            shard_idx: None,
            node_id: None,
        }
    }

    pub fn shard(namespace: &str, cluster: &str, shard_idx: usize, command: EventCommand) -> Self {
        Self {
            event_type: EventType::Shard,
            command,
            namespace: namespace.to_string(),
            cluster: cluster.to_string(),
            shard_idx: Some(shard_idx),
            node_id: None,
        }
    }

    pub fn node(
        namespace: &str,
        cluster: &str,
        shard_idx: usize,
        node_id: &str,
        command: EventCommand,
    ) -> Self {
        Self {
            event_type: EventType::Node,
            command,
            namespace: namespace.to_string(),
            cluster: cluster.to_string(),
            shard_idx: Some(shard_idx),
            node_id: Some(node_id.to_string()),
        }
    }
}

/// Create the bounded event channel
pub fn event_channel() -> (mpsc::Sender<Event>, mpsc::Receiver<Event>) {
    mpsc::channel(EVENT_BUFFER_SIZE)
}
