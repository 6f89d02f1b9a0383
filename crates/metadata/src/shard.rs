//! Shard metadata
//!
//! A shard is an ordered node list (index 0 is the master) plus the slot
//! ranges it owns. During a slot migration the shard also carries the
//! range currently moving in or out.

use serde::{Deserialize, Serialize};

use crate::error::MetadataError;
use crate::node::{NodeInfo, Role};
use crate::slot::{merge_ranges, SlotRange};

/// A master node and its replicas owning a set of slot ranges
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shard {
    /// Node list; index 0 is always the master
    pub nodes: Vec<NodeInfo>,
    /// Owned slot ranges, normalized (sorted, merged, non-overlapping)
    pub slot_ranges: Vec<SlotRange>,
    /// Range currently being imported into this shard
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_slot: Option<SlotRange>,
    /// Range currently being migrated out of this shard
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migrating_slot: Option<SlotRange>,
}

impl Shard {
    pub fn new(nodes: Vec<NodeInfo>, slot_ranges: Vec<SlotRange>) -> Self {
        Self {
            nodes,
            slot_ranges: merge_ranges(slot_ranges),
            import_slot: None,
            migrating_slot: None,
        }
    }

    /// The master node, if the shard has any nodes
    pub fn master(&self) -> Option<&NodeInfo> {
        self.nodes.first()
    }

    /// All replica nodes
    pub fn replicas(&self) -> &[NodeInfo] {
        if self.nodes.is_empty() {
            &[]
        } else {
            &self.nodes[1..]
        }
    }

    pub fn find_node(&self, node_id: &str) -> Option<&NodeInfo> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    pub fn has_slot(&self, slot: u32) -> bool {
        self.slot_ranges.iter().any(|r| r.contains(slot))
    }

    /// Add owned ranges, keeping the set normalized
    pub fn add_ranges(&mut self, ranges: &[SlotRange]) {
        let mut all = self.slot_ranges.clone();
        all.extend_from_slice(ranges);
        self.slot_ranges = merge_ranges(all);
    }

    /// Remove owned ranges, keeping the set normalized
    pub fn remove_ranges(&mut self, ranges: &[SlotRange]) {
        let mut rest = self.slot_ranges.clone();
        for sub in ranges {
            rest = rest.into_iter().flat_map(|r| r.subtract(sub)).collect();
        }
        self.slot_ranges = merge_ranges(rest);
    }

    /// Make the given replica the master
    ///
    /// The promoted node moves to index 0 with the master role; the old
    /// master is demoted to replica and keeps its position at the back.
    pub fn promote(&mut self, node_id: &str) -> Result<(), MetadataError> {
        let pos = self
            .nodes
            .iter()
            .position(|n| n.id == node_id)
            .ok_or_else(|| MetadataError::InvalidNodeId(node_id.to_string()))?;
        if pos == 0 {
            return Ok(());
        }
        let mut promoted = self.nodes.remove(pos);
        promoted.role = Role::Master;
        if let Some(old) = self.nodes.first_mut() {
            old.role = Role::Replica;
        }
        self.nodes.insert(0, promoted);
        Ok(())
    }

    /// Drop a node from the shard
    pub fn remove_node(&mut self, node_id: &str) -> Result<NodeInfo, MetadataError> {
        let pos = self
            .nodes
            .iter()
            .position(|n| n.id == node_id)
            .ok_or_else(|| MetadataError::InvalidNodeId(node_id.to_string()))?;
        Ok(self.nodes.remove(pos))
    }

    /// Check node ordering, roles and range consistency
    pub fn validate(&self, shard_idx: usize) -> Result<(), MetadataError> {
        if self.nodes.is_empty() {
            return Err(MetadataError::EmptyShard(shard_idx));
        }
        if !self.nodes[0].is_master() {
            return Err(MetadataError::NoMaster(shard_idx));
        }
        for node in self.nodes.iter() {
            node.validate()?;
        }
        for replica in self.replicas() {
            if replica.is_master() {
                return Err(MetadataError::InvalidTopology(format!(
                    "shard {} has more than one master",
                    shard_idx
                )));
            }
        }
        for window in self.slot_ranges.windows(2) {
            if window[0].overlaps(&window[1]) {
                return Err(MetadataError::SlotRangeOverlap(
                    window[0].to_string(),
                    window[1].to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::generate_node_id;

    fn test_shard() -> Shard {
        let master = NodeInfo::new("127.0.0.1:6379", Role::Master);
        let replica = NodeInfo::new("127.0.0.1:6380", Role::Replica);
        Shard::new(
            vec![master, replica],
            vec![SlotRange::new(0, 8192).unwrap()],
        )
    }

    #[test]
    fn test_master_and_replicas() {
        let shard = test_shard();
        assert!(shard.master().unwrap().is_master());
        assert_eq!(shard.replicas().len(), 1);
        assert!(!shard.replicas()[0].is_master());
    }

    #[test]
    fn test_promote() {
        let mut shard = test_shard();
        let old_master = shard.master().unwrap().id.clone();
        let replica_id = shard.replicas()[0].id.clone();

        shard.promote(&replica_id).unwrap();
        assert_eq!(shard.master().unwrap().id, replica_id);
        assert!(shard.master().unwrap().is_master());
        let demoted = shard.find_node(&old_master).unwrap();
        assert_eq!(demoted.role, Role::Replica);

        // promoting the current master is a no-op
        shard.promote(&replica_id).unwrap();
        assert_eq!(shard.master().unwrap().id, replica_id);

        assert!(shard.promote(&generate_node_id()).is_err());
    }

    #[test]
    fn test_range_mutation() {
        let mut shard = test_shard();
        shard.remove_ranges(&[SlotRange::new(0, 4096).unwrap()]);
        assert_eq!(shard.slot_ranges, vec![SlotRange::new(4096, 8192).unwrap()]);

        shard.add_ranges(&[SlotRange::new(0, 4096).unwrap()]);
        assert_eq!(shard.slot_ranges, vec![SlotRange::new(0, 8192).unwrap()]);
    }

    #[test]
    fn test_validate() {
        let shard = test_shard();
        assert!(shard.validate(0).is_ok());

        let empty = Shard::new(Vec::new(), Vec::new());
        assert_eq!(empty.validate(0), Err(MetadataError::EmptyShard(0)));

        let mut no_master = test_shard();
        no_master.nodes[0].role = Role::Replica;
        assert_eq!(no_master.validate(1), Err(MetadataError::NoMaster(1)));
    }
}
