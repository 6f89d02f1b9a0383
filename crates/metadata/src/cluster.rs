//! Cluster metadata
//!
//! The cluster record is the unit of persistence and of propagation: every
//! mutation bumps `version`, and the whole topology is re-encoded with
//! `to_slot_string` and pushed to the data nodes.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::MetadataError;
use crate::node::{NodeInfo, Role};
use crate::shard::Shard;
use crate::slot::{merge_ranges, SlotRange, TOTAL_SLOTS};

/// A named collection of shards under a namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    /// Monotonic version, bumped on every mutation
    pub version: i64,
    /// Ordered shard list
    pub shards: Vec<Shard>,
}

impl Cluster {
    pub fn new(shards: Vec<Shard>) -> Self {
        Self { version: 1, shards }
    }

    /// Build an initial cluster from a flat `host:port` list
    ///
    /// Every `replicas` consecutive addresses form one shard (the first is
    /// the master). Slots are split evenly across shards, with the
    /// remainder going to the last shard.
    pub fn assemble(addresses: &[String], replicas: usize) -> Result<Self, MetadataError> {
        if replicas == 0 {
            return Err(MetadataError::InvalidTopology(
                "replica count must be greater than zero".to_string(),
            ));
        }
        if addresses.is_empty() || addresses.len() % replicas != 0 {
            return Err(MetadataError::InvalidTopology(format!(
                "{} nodes cannot form shards of {} nodes each",
                addresses.len(),
                replicas
            )));
        }
        let shard_count = addresses.len() / replicas;
        let step = TOTAL_SLOTS / shard_count as u32;
        let mut shards = Vec::with_capacity(shard_count);
        for (idx, chunk) in addresses.chunks(replicas).enumerate() {
            let start = idx as u32 * step;
            let end = if idx == shard_count - 1 {
                TOTAL_SLOTS
            } else {
                start + step
            };
            let nodes = chunk
                .iter()
                .enumerate()
                .map(|(i, addr)| {
                    let role = if i == 0 { Role::Master } else { Role::Replica };
                    NodeInfo::new(addr.clone(), role)
                })
                .collect();
            shards.push(Shard::new(nodes, vec![SlotRange::new(start, end)?]));
        }
        Ok(Self::new(shards))
    }

    pub fn shard(&self, idx: usize) -> Option<&Shard> {
        self.shards.get(idx)
    }

    pub fn find_node(&self, node_id: &str) -> Option<(usize, &NodeInfo)> {
        for (idx, shard) in self.shards.iter().enumerate() {
            if let Some(node) = shard.find_node(node_id) {
                return Some((idx, node));
            }
        }
        None
    }

    /// True once the shard ranges exactly partition the slot space
    pub fn is_initialized(&self) -> bool {
        let all: Vec<SlotRange> = self
            .shards
            .iter()
            .flat_map(|s| s.slot_ranges.iter().copied())
            .collect();
        let total: u32 = all.iter().map(|r| r.slot_count()).sum();
        if total != TOTAL_SLOTS {
            return false;
        }
        let merged = merge_ranges(all);
        merged.len() == 1 && merged[0].start == 0 && merged[0].end == TOTAL_SLOTS
    }

    /// Validate the whole topology
    ///
    /// Checks per-shard invariants, node id uniqueness across shards, and
    /// that the slot ranges either exactly cover the slot space or are
    /// entirely absent (a cluster that is not yet initialized).
    pub fn validate(&self) -> Result<(), MetadataError> {
        let mut seen = HashSet::new();
        for (idx, shard) in self.shards.iter().enumerate() {
            shard.validate(idx)?;
            for node in &shard.nodes {
                if !seen.insert(node.id.as_str()) {
                    return Err(MetadataError::DuplicateNodeId(node.id.clone()));
                }
            }
        }

        let mut all: Vec<SlotRange> = self
            .shards
            .iter()
            .flat_map(|s| s.slot_ranges.iter().copied())
            .collect();
        if all.is_empty() {
            return Ok(());
        }
        all.sort();
        for window in all.windows(2) {
            if window[0].overlaps(&window[1]) {
                return Err(MetadataError::SlotRangeOverlap(
                    window[0].to_string(),
                    window[1].to_string(),
                ));
            }
        }
        let merged = merge_ranges(all);
        if !(merged.len() == 1 && merged[0].start == 0 && merged[0].end == TOTAL_SLOTS) {
            return Err(MetadataError::SlotsNotCovered);
        }
        Ok(())
    }

    /// Encode the topology into the payload pushed with `CLUSTERX SETNODES`
    ///
    /// One line per node. Master lines carry the owned ranges as a single
    /// comma-joined column (omitted when the shard owns nothing); replica
    /// lines reference their master's id. The version travels out-of-band.
    pub fn to_slot_string(&self) -> Result<String, MetadataError> {
        let mut lines = Vec::new();
        for (idx, shard) in self.shards.iter().enumerate() {
            let master = shard.master().ok_or(MetadataError::NoMaster(idx))?;
            let (host, port) = master.host_port()?;
            let ranges: Vec<String> = shard.slot_ranges.iter().map(|r| r.to_string()).collect();
            let role = master.role.wire_name();
            if ranges.is_empty() {
                lines.push(format!("{} {} {} {}", master.id, host, port, role));
            } else {
                lines.push(format!(
                    "{} {} {} {} {}",
                    master.id,
                    host,
                    port,
                    role,
                    ranges.join(",")
                ));
            }
            for replica in shard.replicas() {
                let (host, port) = replica.host_port()?;
                lines.push(format!(
                    "{} {} {} {} {}",
                    replica.id,
                    host,
                    port,
                    replica.role.wire_name(),
                    master.id
                ));
            }
        }
        Ok(lines.join("\n"))
    }

    /// Reference parser for the `to_slot_string` payload
    ///
    /// Reconstructs the shard structure; replica lines must follow a line
    /// of their master.
    pub fn parse_slot_string(payload: &str) -> Result<Vec<Shard>, MetadataError> {
        let mut shards: Vec<Shard> = Vec::new();
        for line in payload.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                return Err(MetadataError::InvalidSlotString(line.to_string()));
            }
            let id = fields[0].to_string();
            let port: u16 = fields[2]
                .parse()
                .map_err(|_| MetadataError::InvalidSlotString(line.to_string()))?;
            let address = format!("{}:{}", fields[1], port);
            match fields[3] {
                "master" => {
                    let mut ranges = Vec::new();
                    if let Some(col) = fields.get(4) {
                        for part in col.split(',') {
                            ranges.push(part.parse()?);
                        }
                    }
                    let node = NodeInfo {
                        id,
                        address,
                        role: Role::Master,
                        password: None,
                        created_at: 0,
                    };
                    shards.push(Shard::new(vec![node], ranges));
                }
                "slave" => {
                    let master_id = fields
                        .get(4)
                        .ok_or_else(|| MetadataError::InvalidSlotString(line.to_string()))?;
                    let shard = shards
                        .iter_mut()
                        .find(|s| s.master().map(|m| m.id == *master_id).unwrap_or(false))
                        .ok_or_else(|| MetadataError::InvalidSlotString(line.to_string()))?;
                    shard.nodes.push(NodeInfo {
                        id,
                        address,
                        role: Role::Replica,
                        password: None,
                        created_at: 0,
                    });
                }
                other => {
                    return Err(MetadataError::InvalidSlotString(other.to_string()));
                }
            }
        }
        Ok(shards)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addresses(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("127.0.0.1:{}", 6379 + i)).collect()
    }

    #[test]
    fn test_assemble_even_split() {
        let cluster = Cluster::assemble(&addresses(4), 2).unwrap();
        assert_eq!(cluster.shards.len(), 2);
        assert_eq!(
            cluster.shards[0].slot_ranges,
            vec![SlotRange::new(0, 8192).unwrap()]
        );
        assert_eq!(
            cluster.shards[1].slot_ranges,
            vec![SlotRange::new(8192, TOTAL_SLOTS).unwrap()]
        );
        assert!(cluster.is_initialized());
        cluster.validate().unwrap();
    }

    #[test]
    fn test_assemble_remainder_goes_last() {
        let cluster = Cluster::assemble(&addresses(3), 1).unwrap();
        assert_eq!(cluster.shards.len(), 3);
        assert_eq!(cluster.shards[2].slot_ranges[0].end, TOTAL_SLOTS);
        assert!(cluster.is_initialized());
    }

    #[test]
    fn test_assemble_rejects_bad_arguments() {
        assert!(Cluster::assemble(&addresses(3), 0).is_err());
        assert!(Cluster::assemble(&addresses(3), 2).is_err());
        assert!(Cluster::assemble(&[], 1).is_err());
    }

    #[test]
    fn test_validate_partial_coverage() {
        let mut cluster = Cluster::assemble(&addresses(2), 1).unwrap();
        cluster.shards[1].slot_ranges = vec![SlotRange::new(8192, 16000).unwrap()];
        assert_eq!(cluster.validate(), Err(MetadataError::SlotsNotCovered));
        assert!(!cluster.is_initialized());
    }

    #[test]
    fn test_validate_overlap() {
        let mut cluster = Cluster::assemble(&addresses(2), 1).unwrap();
        cluster.shards[1].slot_ranges = vec![SlotRange::new(8000, TOTAL_SLOTS).unwrap()];
        assert!(matches!(
            cluster.validate(),
            Err(MetadataError::SlotRangeOverlap(_, _))
        ));
    }

    #[test]
    fn test_validate_duplicate_node_id() {
        let mut cluster = Cluster::assemble(&addresses(2), 1).unwrap();
        cluster.shards[1].nodes[0].id = cluster.shards[0].nodes[0].id.clone();
        assert!(matches!(
            cluster.validate(),
            Err(MetadataError::DuplicateNodeId(_))
        ));
    }

    #[test]
    fn test_slot_string_round_trip() {
        let cluster = Cluster::assemble(&addresses(4), 2).unwrap();
        let payload = cluster.to_slot_string().unwrap();
        assert_eq!(payload.lines().count(), 4);

        let parsed = Cluster::parse_slot_string(&payload).unwrap();
        assert_eq!(parsed.len(), 2);
        for (parsed_shard, shard) in parsed.iter().zip(&cluster.shards) {
            assert_eq!(parsed_shard.slot_ranges, shard.slot_ranges);
            let ids: Vec<_> = parsed_shard.nodes.iter().map(|n| &n.id).collect();
            let expect: Vec<_> = shard.nodes.iter().map(|n| &n.id).collect();
            assert_eq!(ids, expect);
            assert_eq!(
                parsed_shard.master().unwrap().address,
                shard.master().unwrap().address
            );
        }
    }

    #[test]
    fn test_slot_string_empty_shard_round_trip() {
        let mut cluster = Cluster::assemble(&addresses(2), 1).unwrap();
        let moved = cluster.shards[1].slot_ranges.clone();
        cluster.shards[1].remove_ranges(&moved);
        cluster.shards[0].add_ranges(&moved);

        let payload = cluster.to_slot_string().unwrap();
        let parsed = Cluster::parse_slot_string(&payload).unwrap();
        assert_eq!(parsed[0].slot_ranges.len(), 1);
        assert!(parsed[1].slot_ranges.is_empty());
    }

    #[test]
    fn test_slot_string_rejects_orphan_replica() {
        let payload = format!("{} 127.0.0.1 6380 slave {}", "a".repeat(40), "b".repeat(40));
        assert!(Cluster::parse_slot_string(&payload).is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let cluster = Cluster::assemble(&addresses(2), 2).unwrap();
        let encoded = serde_json::to_string(&cluster).unwrap();
        let decoded: Cluster = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, cluster);
    }
}
