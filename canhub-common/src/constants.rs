//! Constants defining the management protocol's arbitration IDs and ranges
//!
//!

use crate::messages::CanId;
use crate::node_id::NodeId;

/// Arbitration IDs for master-originated messages
pub mod msg_ids {
    use super::CanId;

    /// Network-scan introduction request, payload = target NodeId
    pub const REQ_NODE_INTRO: CanId = CanId::std(0x6F0);
    /// Interview continuation acknowledgement, payload = solicited NodeId
    pub const ACK_INTRO: CanId = CanId::std(0x6F1);
    /// Epoch time broadcast, bytes 4..7 = Unix seconds BE32
    pub const DATA_EPOCH_ID: CanId = CanId::std(0x110);
    /// Sub-module data-message assignment write
    pub const CFG_SUB_DATA_MSG_ID: CanId = CanId::std(0x6E0);
    /// Sub-module raw configuration write
    pub const CFG_SUB_RAW_DATA_ID: CanId = CanId::std(0x6E1);
    /// Command a node to persist its running configuration
    pub const CFG_SAVE_STATE_ID: CanId = CanId::std(0x6E2);
}

/// Arbitration ID ranges for node-originated intro traffic
pub mod ranges {
    /// First node-intro ID; the intro ID doubles as the node's type message
    pub const NODE_INTRO_MIN: u16 = 0x780;
    /// Last node-intro ID
    pub const NODE_INTRO_MAX: u16 = 0x7FF;
    /// First sub-module-intro ID
    pub const SUB_INTRO_MIN: u16 = 0x700;
    /// Last sub-module-intro ID
    pub const SUB_INTRO_MAX: u16 = 0x77F;
    /// Lowest arbitration ID the engine dispatches on
    pub const DISPATCH_MIN: u16 = 0x100;
}

/// True when the ID announces a node introduction
pub fn is_node_intro(id: CanId) -> bool {
    (ranges::NODE_INTRO_MIN..=ranges::NODE_INTRO_MAX).contains(&id.raw())
}

/// True when the ID announces a sub-module introduction
pub fn is_sub_intro(id: CanId) -> bool {
    (ranges::SUB_INTRO_MIN..=ranges::SUB_INTRO_MAX).contains(&id.raw())
}

/// The master controller's own NodeId
///
/// Doubles as the broadcast wildcard in `REQ_NODE_INTRO` payloads.
pub const DEFAULT_MASTER_NODE_ID: NodeId = NodeId::new([0x01, 0x00, 0x00, 0x01]);

/// Maximum number of sub-modules a node can host
pub const MAX_SUB_MODULES: usize = 8;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_classifiers() {
        assert!(is_node_intro(CanId::std(0x780)));
        assert!(is_node_intro(CanId::std(0x7FF)));
        assert!(!is_node_intro(CanId::std(0x77F)));
        assert!(is_sub_intro(CanId::std(0x700)));
        assert!(is_sub_intro(CanId::std(0x77F)));
        assert!(!is_sub_intro(CanId::std(0x6FF)));
    }
}
