//! Control plane for a fleet of slot-sharded in-memory KV data nodes
//!
//! The controller owns the authoritative cluster topology, persists it
//! through a replicated key-value backend, pushes changes to every data
//! node, probes masters for failures, and drives slot migrations as
//! durable tasks. Exactly one controller replica holds the leader lease
//! and performs writes; the rest wait to take over.

pub mod api;
pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod failover;
pub mod migrator;
pub mod node_client;
pub mod probe;
pub mod store;
pub mod syncer;

pub use config::Config;
pub use controller::Controller;
pub use error::{Error, Result};
pub use event::{Event, EventCommand, EventType};
pub use store::MetaStore;
