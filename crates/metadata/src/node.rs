//! Node metadata

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::MetadataError;

/// Length of a node id (40 lowercase hex characters)
pub const NODE_ID_LEN: usize = 40;

/// Role of a node within a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Master,
    Replica,
}

impl Role {
    /// Role word used in the topology payload pushed to data nodes
    pub fn wire_name(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Replica => "slave",
        }
    }
}

/// A single data node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Stable node identifier, unique within a cluster
    pub id: String,
    /// Network address as `host:port`
    pub address: String,
    /// Master or replica
    pub role: Role,
    /// Optional AUTH password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Creation timestamp, unix seconds
    #[serde(default)]
    pub created_at: i64,
}

impl NodeInfo {
    /// Create a node with a freshly generated id
    pub fn new(address: impl Into<String>, role: Role) -> Self {
        Self {
            id: generate_node_id(),
            address: address.into(),
            role,
            password: None,
            created_at: 0,
        }
    }

    /// Split the address into host and port
    pub fn host_port(&self) -> Result<(&str, u16), MetadataError> {
        let (host, port) = self
            .address
            .rsplit_once(':')
            .ok_or_else(|| MetadataError::InvalidNodeAddress(self.address.clone()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| MetadataError::InvalidNodeAddress(self.address.clone()))?;
        if host.is_empty() {
            return Err(MetadataError::InvalidNodeAddress(self.address.clone()));
        }
        Ok((host, port))
    }

    /// Validate the id and address
    pub fn validate(&self) -> Result<(), MetadataError> {
        validate_node_id(&self.id)?;
        self.host_port()?;
        Ok(())
    }

    pub fn is_master(&self) -> bool {
        self.role == Role::Master
    }
}

/// Generate a random 40-char lowercase hex node id
pub fn generate_node_id() -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..NODE_ID_LEN)
        .map(|_| HEX[rng.gen_range(0..HEX.len())] as char)
        .collect()
}

/// Check that an id is exactly 40 lowercase hex characters
pub fn validate_node_id(id: &str) -> Result<(), MetadataError> {
    if id.len() != NODE_ID_LEN {
        return Err(MetadataError::InvalidNodeId(id.to_string()));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    {
        return Err(MetadataError::InvalidNodeId(id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_node_id() {
        let id = generate_node_id();
        assert_eq!(id.len(), NODE_ID_LEN);
        assert!(validate_node_id(&id).is_ok());
        assert_ne!(id, generate_node_id());
    }

    #[test]
    fn test_validate_node_id() {
        assert!(validate_node_id(&"a".repeat(40)).is_ok());
        assert!(validate_node_id(&"A".repeat(40)).is_err());
        assert!(validate_node_id("abc").is_err());
        assert!(validate_node_id(&"g".repeat(40)).is_err());
    }

    #[test]
    fn test_host_port() {
        let node = NodeInfo::new("127.0.0.1:6379", Role::Master);
        assert_eq!(node.host_port().unwrap(), ("127.0.0.1", 6379));

        let bad = NodeInfo::new("localhost", Role::Master);
        assert!(bad.host_port().is_err());
    }

    #[test]
    fn test_role_wire_name() {
        assert_eq!(Role::Master.wire_name(), "master");
        assert_eq!(Role::Replica.wire_name(), "slave");
    }
}
