//! The two-phase interview state machine
//!
//! Nodes announce themselves with a node-intro frame (ID 0x780..0x7FF)
//! carrying their identity, sub-module count, and configuration CRC. The
//! master then solicits each sub-module in turn by ACKing; sub-modules
//! answer with two intro phases (ID 0x700..0x77F) that may arrive in either
//! order. The handlers here mutate the inventory and report what else must
//! happen (history archive, persistence, ACK) for the engine to execute in
//! order.

use canhub_common::codec::{assemble_be16, decode_node_id, unpack_dlc_flags};
use canhub_common::constants::MAX_SUB_MODULES;
use canhub_common::{CanMessage, NodeId};

use crate::inventory::{Inventory, Node};

/// Work the engine must carry out after a node-intro frame
#[derive(Debug, Default)]
pub struct NodeIntroResult {
    /// The node the frame addressed; None when the frame was dropped
    pub node_id: Option<NodeId>,
    /// Prior node state to append to history before this frame's overwrite
    /// becomes durable; present exactly when the reported CRC drifted
    pub archived_prior: Option<Node>,
    /// The inventory row must be persisted (interview just completed)
    pub persist: bool,
    /// Solicit the next sub-module from this node
    pub ack: bool,
}

/// Work the engine must carry out after a sub-module-intro frame
#[derive(Debug, Default)]
pub struct SubIntroResult {
    /// The node the frame addressed; None when the frame was dropped
    pub node_id: Option<NodeId>,
    /// The inventory row must be persisted (a sub-module just completed
    /// both phases)
    pub persist: bool,
    /// Solicit continuation from this node
    pub ack: bool,
}

/// Process a node-intro frame
///
/// Creates the node on first contact, detects CRC drift against the known
/// state, and decides whether the interview is complete or the next
/// sub-module should be solicited.
pub fn handle_node_intro(
    inventory: &mut Inventory,
    msg: &CanMessage,
    now_ms: u64,
) -> NodeIntroResult {
    let data = msg.data();
    let node_id = match decode_node_id(data) {
        Ok(id) => id,
        Err(_) => {
            log::debug!("Dropping node intro on {} with short payload", msg.id());
            return NodeIntroResult::default();
        }
    };
    if data.len() < 8 {
        log::debug!("Dropping node intro on {} with short payload", msg.id());
        return NodeIntroResult::default();
    }

    let incoming_crc = assemble_be16(data[5], data[6]);
    let (node, created) = inventory.get_or_create(node_id);

    // Drift detection: a known CRC that changes means the node's
    // configuration was altered behind the master's back. The state being
    // overwritten is archived before any field is touched.
    let mut archived_prior = None;
    if !created {
        if let Some(old_crc) = node.config_crc {
            if old_crc != incoming_crc {
                log::info!(
                    "Config CRC drift on node {node_id}: {old_crc:#06x} -> {incoming_crc:#06x}"
                );
                archived_prior = Some(node.clone());
            }
        }
    }

    node.node_type_msg = msg.id().raw();
    node.node_type_dlc = 8;
    node.sub_mod_cnt = data[4];
    node.config_crc = Some(incoming_crc);
    node.last_seen = now_ms;
    if node.first_seen.is_none() {
        node.first_seen = Some(now_ms);
    }

    // The highest completed index reaching subModCnt-1 is the signal to
    // stop soliciting; until then every node intro is ACKed to pull the
    // next sub-module out of the node.
    if node.sub_mod_cnt == 0 || node.last_sub_mod_idx >= node.sub_mod_cnt - 1 {
        node.intro_complete = true;
        return NodeIntroResult {
            node_id: Some(node_id),
            archived_prior,
            persist: true,
            ack: false,
        };
    }

    NodeIntroResult {
        node_id: Some(node_id),
        archived_prior,
        persist: false,
        ack: true,
    }
}

/// Process a sub-module-intro frame (either phase)
pub fn handle_sub_intro(
    inventory: &mut Inventory,
    msg: &CanMessage,
    now_ms: u64,
) -> SubIntroResult {
    let data = msg.data();
    let node_id = match decode_node_id(data) {
        Ok(id) => id,
        Err(_) => {
            log::debug!("Dropping sub intro on {} with short payload", msg.id());
            return SubIntroResult::default();
        }
    };
    if data.len() < 8 {
        log::debug!("Dropping sub intro on {} with short payload", msg.id());
        return SubIntroResult::default();
    }

    // A sub-module can only belong to a node that has introduced itself
    let key = node_id.to_hex();
    let Some(node) = inventory.get_mut(&key) else {
        log::debug!("Dropping sub intro for unknown node {node_id}");
        return SubIntroResult::default();
    };

    let tag = data[4];
    let working_idx = tag & 0x7F;
    let is_part_b = tag >= 0x80;

    if (working_idx as usize) >= MAX_SUB_MODULES {
        log::warn!("Dropping sub intro for node {node_id} with index {working_idx}");
        return SubIntroResult::default();
    }

    // Re-receipt of a fully interviewed sub-module changes nothing
    if node
        .sub_module(working_idx)
        .is_some_and(|s| s.interviewed())
    {
        return SubIntroResult::default();
    }

    let intro_msg_id = msg.id().raw();
    let sub = node.sub_module_entry(working_idx);
    sub.sub_mod_idx = working_idx;
    sub.last_seen = now_ms;
    sub.intro_msg_id = intro_msg_id;
    sub.intro_msg_dlc = 8;

    if is_part_b {
        sub.data_msg_id = assemble_be16(data[5], data[6]);
        let flags = unpack_dlc_flags(data[7]);
        sub.data_msg_dlc = flags.dlc;
        sub.save_state = flags.save_state;
        sub.part_b_complete = true;
    } else {
        sub.raw_config = [data[5], data[6], data[7]];
        sub.part_a_complete = true;
    }

    let completed = sub.interviewed();
    if completed {
        node.last_sub_mod_idx = working_idx;
        log::debug!("Node {node_id} sub-module {working_idx} interviewed");
    }

    SubIntroResult {
        node_id: Some(node_id),
        persist: completed,
        ack: true,
    }
}
