//! The authoritative in-memory inventory of discovered nodes
//!
//! Mutations happen only on the engine task, on the frame-receive and
//! operator-edit paths. Everything else sees deep-copied snapshots.

use std::collections::{BTreeMap, HashMap};

use canhub_common::constants::MAX_SUB_MODULES;
use canhub_common::NodeId;
use serde::{Deserialize, Serialize};

/// One logical channel on a node, as reported by its two intro phases
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubModule {
    /// Index of this sub-module on its node (0..7)
    pub sub_mod_idx: u8,
    /// Arbitration ID the sub-module introduced itself on
    pub intro_msg_id: u16,
    /// DLC of the intro message, always 8
    pub intro_msg_dlc: u8,
    /// Unix ms of the most recent intro frame for this sub-module
    pub last_seen: u64,
    /// Opaque configuration bytes carried by phase A
    pub raw_config: [u8; 3],
    /// Arbitration ID the sub-module emits application data on (phase B)
    pub data_msg_id: u16,
    /// DLC of the data message (phase B)
    pub data_msg_dlc: u8,
    /// Whether the sub-module persists its state across power cycles
    pub save_state: bool,
    /// Phase A (raw config) has been received
    pub part_a_complete: bool,
    /// Phase B (data message assignment) has been received
    pub part_b_complete: bool,
}

impl SubModule {
    /// Create an empty sub-module record awaiting its intro phases
    pub fn new(sub_mod_idx: u8) -> Self {
        Self {
            sub_mod_idx,
            intro_msg_id: 0,
            intro_msg_dlc: 0,
            last_seen: 0,
            raw_config: [0, 0, 0],
            data_msg_id: 0,
            data_msg_dlc: 0,
            save_state: false,
            part_a_complete: false,
            part_b_complete: false,
        }
    }

    /// A sub-module counts as interviewed once both phases have landed
    pub fn interviewed(&self) -> bool {
        self.part_a_complete && self.part_b_complete
    }
}

/// A discovered node and its sub-module table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// The node's 4-byte identity
    pub node_id: NodeId,
    /// Arbitration ID of the node-intro frame that announced it
    pub node_type_msg: u16,
    /// DLC of the node-intro message, always 8
    pub node_type_dlc: u8,
    /// Number of sub-modules the node claims to host (0..=8)
    pub sub_mod_cnt: u8,
    /// Configuration checksum from the most recent node intro
    ///
    /// None until the first intro frame carrying CRC bytes has been
    /// processed; a change against a known value is configuration drift.
    pub config_crc: Option<u16>,
    /// Unix ms when the node was first discovered
    pub first_seen: Option<u64>,
    /// Unix ms of the most recent intro frame
    pub last_seen: u64,
    /// Highest sub-module index whose two phases have both completed
    pub last_sub_mod_idx: u8,
    /// True once all expected sub-modules have been interviewed
    pub intro_complete: bool,
    /// Sub-module slots, indexed by sub-module index
    pub sub_modules: [Option<SubModule>; MAX_SUB_MODULES],
}

impl Node {
    /// Create a fresh node record ready for interview
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            node_type_msg: 0,
            node_type_dlc: 0,
            sub_mod_cnt: 0,
            config_crc: None,
            first_seen: None,
            last_seen: 0,
            last_sub_mod_idx: 0,
            intro_complete: false,
            sub_modules: Default::default(),
        }
    }

    /// Get the sub-module at `idx`, if populated
    pub fn sub_module(&self, idx: u8) -> Option<&SubModule> {
        self.sub_modules.get(idx as usize)?.as_ref()
    }

    /// Get or create the sub-module slot at `idx`
    ///
    /// Callers must validate `idx < 8` first; the interview state machine
    /// drops out-of-range indices before reaching here.
    pub fn sub_module_entry(&mut self, idx: u8) -> &mut SubModule {
        self.sub_modules[idx as usize].get_or_insert_with(|| SubModule::new(idx))
    }

    /// Iterate over populated sub-module slots
    pub fn populated_sub_modules(&self) -> impl Iterator<Item = &SubModule> {
        self.sub_modules.iter().filter_map(|s| s.as_ref())
    }

    /// Clear interview progress, emptying the sub-module table
    pub fn reset_interview_state(&mut self) {
        self.sub_modules = Default::default();
        self.last_sub_mod_idx = 0;
        self.intro_complete = false;
    }
}

/// A deep copy of the inventory for broadcast, keyed by node-id hex
pub type InventorySnapshot = BTreeMap<String, Node>;

/// The in-memory inventory of all known nodes, keyed by node-id hex
#[derive(Debug, Default)]
pub struct Inventory {
    nodes: HashMap<String, Node>,
}

impl Inventory {
    /// Create an empty inventory
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of known nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when no nodes have been discovered
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node by its hex key
    pub fn get(&self, node_id: &str) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    /// Look up a node mutably by its hex key
    pub fn get_mut(&mut self, node_id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(node_id)
    }

    /// Get the node for `node_id`, creating a fresh record if unknown
    ///
    /// Returns the node and whether it had to be created.
    pub fn get_or_create(&mut self, node_id: NodeId) -> (&mut Node, bool) {
        let key = node_id.to_hex();
        let created = !self.nodes.contains_key(&key);
        let node = self.nodes.entry(key).or_insert_with(|| Node::new(node_id));
        (node, created)
    }

    /// Insert a node restored from persistence
    pub fn restore(&mut self, node: Node) {
        self.nodes.insert(node.node_id.to_hex(), node);
    }

    /// Remove a node entirely, returning it if present
    pub fn remove(&mut self, node_id: &str) -> Option<Node> {
        self.nodes.remove(node_id)
    }

    /// Clear a node's interview progress so it can be re-interviewed
    ///
    /// Returns false when the node is unknown.
    pub fn reset_interview_state(&mut self, node_id: &str) -> bool {
        match self.nodes.get_mut(node_id) {
            Some(node) => {
                node.reset_interview_state();
                true
            }
            None => false,
        }
    }

    /// Deep-copy the inventory for broadcast or persistence
    pub fn snapshot(&self) -> InventorySnapshot {
        self.nodes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Iterate over all nodes
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Node)> {
        self.nodes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create() {
        let mut inv = Inventory::new();
        let id = NodeId::new([1, 2, 3, 4]);
        let (_, created) = inv.get_or_create(id);
        assert!(created);
        let (_, created) = inv.get_or_create(id);
        assert!(!created);
        assert_eq!(inv.len(), 1);
        assert!(inv.get("01020304").is_some());
    }

    #[test]
    fn test_reset_interview_state() {
        let mut inv = Inventory::new();
        let id = NodeId::new([1, 2, 3, 4]);
        let (node, _) = inv.get_or_create(id);
        let sub = node.sub_module_entry(2);
        sub.part_a_complete = true;
        sub.part_b_complete = true;
        node.last_sub_mod_idx = 2;
        node.intro_complete = true;

        assert!(inv.reset_interview_state("01020304"));
        let node = inv.get("01020304").unwrap();
        assert!(node.populated_sub_modules().next().is_none());
        assert_eq!(node.last_sub_mod_idx, 0);
        assert!(!node.intro_complete);

        assert!(!inv.reset_interview_state("ffffffff"));
    }

    #[test]
    fn test_snapshot_is_deep() {
        let mut inv = Inventory::new();
        let (node, _) = inv.get_or_create(NodeId::new([1, 2, 3, 4]));
        node.sub_mod_cnt = 3;
        let snap = inv.snapshot();
        inv.get_mut("01020304").unwrap().sub_mod_cnt = 7;
        assert_eq!(snap["01020304"].sub_mod_cnt, 3);
    }
}
