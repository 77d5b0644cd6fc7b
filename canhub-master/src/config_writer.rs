//! Translation of operator edits into bus writes, audit, and history
//!
//! An edit is diffed field-by-field against the in-memory node. Only real
//! changes produce outbound frames, audit entries, or persistence work; an
//! edit that matches current state is a complete no-op.

use canhub_common::codec::pack_be8;
use canhub_common::constants::msg_ids;
use canhub_common::{CanMessage, NodeId};
use serde::{Deserialize, Serialize};
use snafu::Snafu;

use crate::db::NewAuditEntry;
use crate::inventory::Inventory;

/// Which level of a node an edit targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigTarget {
    /// The node's own fields
    #[serde(rename = "PARENT")]
    Parent,
    /// One sub-module's fields
    #[serde(rename = "SUBMODULE")]
    SubModule,
}

/// An operator `UPDATE_NODE_CONFIG` payload
///
/// Carries the superset of editable fields; which ones apply is decided by
/// `config_target`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNodeConfig {
    /// Hex key of the node being edited
    pub node_id: String,
    /// Parent or sub-module edit
    pub config_target: ConfigTarget,
    /// New node-type arbitration ID (parent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_type_msg: Option<u16>,
    /// New sub-module count (parent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_mod_cnt: Option<u8>,
    /// New node-type DLC (parent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_type_dlc: Option<u8>,
    /// Index of the sub-module being edited (sub-module)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_mod_idx: Option<u8>,
    /// New intro arbitration ID (sub-module)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intro_msg_id: Option<u16>,
    /// New data-message arbitration ID (sub-module)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_msg_id: Option<u16>,
    /// New data-message DLC (sub-module)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_msg_dlc: Option<u8>,
    /// New raw configuration bytes (sub-module)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_config: Option<[u8; 3]>,
}

/// Errors from applying an operator edit
#[derive(Debug, Snafu)]
pub enum UpdateError {
    /// The target node is not in the inventory
    #[snafu(display("Unknown node {node_id}"))]
    UnknownNode {
        /// The hex key that failed to resolve
        node_id: String,
    },
    /// A sub-module edit named a slot that has not been interviewed
    #[snafu(display("Node {node_id} has no sub-module {sub_mod_idx}"))]
    UnknownSubModule {
        /// The node being edited
        node_id: String,
        /// The missing slot index
        sub_mod_idx: u8,
    },
    /// A sub-module edit arrived without a sub-module index
    #[snafu(display("Sub-module edit for {node_id} is missing subModIdx"))]
    MissingSubModIdx {
        /// The node being edited
        node_id: String,
    },
}

/// The result of a successfully applied (possibly no-op) edit
#[derive(Debug, Default)]
pub struct UpdateOutcome {
    /// Configuration frames to push to the bus, one per changed field group
    pub frames: Vec<CanMessage>,
    /// One audit entry per field that actually changed
    pub audits: Vec<NewAuditEntry>,
    /// Sub-module index the edit touched, for the operator ACK
    pub sub_mod_idx: Option<u8>,
}

impl UpdateOutcome {
    /// True when the edit matched current state exactly
    pub fn is_noop(&self) -> bool {
        self.audits.is_empty()
    }
}

fn audit<T: Serialize>(
    node_id: &str,
    sub_idx: Option<u8>,
    field: &'static str,
    old: &T,
    new: &T,
) -> NewAuditEntry {
    NewAuditEntry {
        node_id: node_id.to_owned(),
        sub_idx,
        field,
        // Serializing primitives and small arrays cannot fail
        old_value: serde_json::to_string(old).expect("serializable audit value"),
        new_value: serde_json::to_string(new).expect("serializable audit value"),
    }
}

/// Diff an operator edit against the inventory and apply it
///
/// On success the in-memory node reflects the edit and the returned outcome
/// lists the frames to send and the audit entries to record. The caller is
/// responsible for persistence and for suppressing all side effects when
/// [`UpdateOutcome::is_noop`] is true.
pub fn apply_update(
    inventory: &mut Inventory,
    update: &UpdateNodeConfig,
) -> Result<UpdateOutcome, UpdateError> {
    let node = inventory
        .get_mut(&update.node_id)
        .ok_or_else(|| UpdateError::UnknownNode {
            node_id: update.node_id.clone(),
        })?;
    let node_id = node.node_id;

    let mut outcome = UpdateOutcome::default();

    match update.config_target {
        ConfigTarget::Parent => {
            if let Some(new) = update.node_type_msg {
                if node.node_type_msg != new {
                    outcome.audits.push(audit(
                        &update.node_id,
                        None,
                        "nodeTypeMsg",
                        &node.node_type_msg,
                        &new,
                    ));
                    node.node_type_msg = new;
                }
            }
            if let Some(new) = update.sub_mod_cnt {
                if node.sub_mod_cnt != new {
                    outcome.audits.push(audit(
                        &update.node_id,
                        None,
                        "subModCnt",
                        &node.sub_mod_cnt,
                        &new,
                    ));
                    node.sub_mod_cnt = new;
                }
            }
            if let Some(new) = update.node_type_dlc {
                if node.node_type_dlc != new {
                    outcome.audits.push(audit(
                        &update.node_id,
                        None,
                        "nodeTypeDlc",
                        &node.node_type_dlc,
                        &new,
                    ));
                    node.node_type_dlc = new;
                }
            }
        }
        ConfigTarget::SubModule => {
            let idx = update
                .sub_mod_idx
                .ok_or_else(|| UpdateError::MissingSubModIdx {
                    node_id: update.node_id.clone(),
                })?;
            let Some(sub) = node
                .sub_modules
                .get_mut(idx as usize)
                .and_then(|s| s.as_mut())
            else {
                return Err(UpdateError::UnknownSubModule {
                    node_id: update.node_id.clone(),
                    sub_mod_idx: idx,
                });
            };
            outcome.sub_mod_idx = Some(idx);

            if let Some(new) = update.intro_msg_id {
                if sub.intro_msg_id != new {
                    outcome.audits.push(audit(
                        &update.node_id,
                        Some(idx),
                        "introMsgId",
                        &sub.intro_msg_id,
                        &new,
                    ));
                    sub.intro_msg_id = new;
                }
            }

            let mut data_msg_changed = false;
            if let Some(new) = update.data_msg_id {
                if sub.data_msg_id != new {
                    outcome.audits.push(audit(
                        &update.node_id,
                        Some(idx),
                        "dataMsgId",
                        &sub.data_msg_id,
                        &new,
                    ));
                    sub.data_msg_id = new;
                    data_msg_changed = true;
                }
            }
            if let Some(new) = update.data_msg_dlc {
                if sub.data_msg_dlc != new {
                    outcome.audits.push(audit(
                        &update.node_id,
                        Some(idx),
                        "dataMsgDlc",
                        &sub.data_msg_dlc,
                        &new,
                    ));
                    sub.data_msg_dlc = new;
                    data_msg_changed = true;
                }
            }
            if data_msg_changed {
                outcome
                    .frames
                    .push(data_msg_frame(node_id, idx, sub.data_msg_id, sub.data_msg_dlc));
            }

            if let Some(new) = update.raw_config {
                if sub.raw_config != new {
                    outcome.audits.push(audit(
                        &update.node_id,
                        Some(idx),
                        "rawConfig",
                        &sub.raw_config,
                        &new,
                    ));
                    sub.raw_config = new;
                    outcome.frames.push(raw_config_frame(node_id, idx, new));
                }
            }
        }
    }

    Ok(outcome)
}

/// Build the frame assigning a sub-module's data message ID and DLC
fn data_msg_frame(node_id: NodeId, idx: u8, data_msg_id: u16, dlc: u8) -> CanMessage {
    let id = node_id.bytes();
    let [hi, lo] = data_msg_id.to_be_bytes();
    CanMessage::new(
        msg_ids::CFG_SUB_DATA_MSG_ID,
        &[id[0], id[1], id[2], id[3], idx, hi, lo, dlc],
    )
}

/// Build the frame rewriting a sub-module's raw configuration bytes
fn raw_config_frame(node_id: NodeId, idx: u8, raw: [u8; 3]) -> CanMessage {
    let id = node_id.bytes();
    CanMessage::new(
        msg_ids::CFG_SUB_RAW_DATA_ID,
        &[id[0], id[1], id[2], id[3], idx, raw[0], raw[1], raw[2]],
    )
}

/// Build the frame commanding a node to persist its running configuration
pub fn save_state_frame(node_id: NodeId) -> CanMessage {
    CanMessage::new(msg_ids::CFG_SAVE_STATE_ID, &pack_be8(&node_id.bytes()))
}

/// Build the interview continuation ACK for a node
pub fn ack_intro_frame(node_id: NodeId) -> CanMessage {
    CanMessage::new(msg_ids::ACK_INTRO, &pack_be8(&node_id.bytes()))
}

/// Build the network-scan / re-interview request frame
pub fn req_node_intro_frame(node_id: NodeId) -> CanMessage {
    CanMessage::new(msg_ids::REQ_NODE_INTRO, &pack_be8(&node_id.bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Node;

    fn seeded_inventory() -> Inventory {
        let mut inv = Inventory::new();
        let mut node = Node::new(NodeId::new([0x19, 0, 0, 0x19]));
        node.node_type_msg = 0x780;
        node.node_type_dlc = 8;
        node.sub_mod_cnt = 2;
        let sub = node.sub_module_entry(0);
        sub.intro_msg_id = 0x700;
        sub.intro_msg_dlc = 8;
        sub.raw_config = [0xAA, 0xBB, 0xCC];
        sub.data_msg_id = 0x0210;
        sub.data_msg_dlc = 8;
        sub.part_a_complete = true;
        sub.part_b_complete = true;
        inv.restore(node);
        inv
    }

    fn sub_update() -> UpdateNodeConfig {
        UpdateNodeConfig {
            node_id: "19000019".into(),
            config_target: ConfigTarget::SubModule,
            node_type_msg: None,
            sub_mod_cnt: None,
            node_type_dlc: None,
            sub_mod_idx: Some(0),
            intro_msg_id: Some(0x700),
            data_msg_id: Some(0x0210),
            data_msg_dlc: Some(8),
            raw_config: Some([0xAA, 0xBB, 0xCC]),
        }
    }

    #[test]
    fn test_matching_update_is_noop() {
        let mut inv = seeded_inventory();
        let outcome = apply_update(&mut inv, &sub_update()).unwrap();
        assert!(outcome.is_noop());
        assert!(outcome.frames.is_empty());
        assert!(outcome.audits.is_empty());
    }

    #[test]
    fn test_data_msg_id_change_builds_one_frame() {
        let mut inv = seeded_inventory();
        let mut update = sub_update();
        update.data_msg_id = Some(0x0211);
        let outcome = apply_update(&mut inv, &update).unwrap();

        assert_eq!(outcome.frames.len(), 1);
        let frame = &outcome.frames[0];
        assert_eq!(frame.id(), msg_ids::CFG_SUB_DATA_MSG_ID);
        assert_eq!(frame.data(), &[0x19, 0, 0, 0x19, 0, 0x02, 0x11, 8]);

        assert_eq!(outcome.audits.len(), 1);
        assert_eq!(outcome.audits[0].field, "dataMsgId");
        assert_eq!(outcome.audits[0].old_value, "528");
        assert_eq!(outcome.audits[0].new_value, "529");

        let sub = inv.get("19000019").unwrap().sub_module(0).unwrap();
        assert_eq!(sub.data_msg_id, 0x0211);
    }

    #[test]
    fn test_raw_config_change_builds_one_frame() {
        let mut inv = seeded_inventory();
        let mut update = sub_update();
        update.raw_config = Some([1, 2, 3]);
        let outcome = apply_update(&mut inv, &update).unwrap();

        assert_eq!(outcome.frames.len(), 1);
        let frame = &outcome.frames[0];
        assert_eq!(frame.id(), msg_ids::CFG_SUB_RAW_DATA_ID);
        assert_eq!(frame.data(), &[0x19, 0, 0, 0x19, 0, 1, 2, 3]);
        assert_eq!(outcome.audits.len(), 1);
        assert_eq!(outcome.audits[0].field, "rawConfig");
    }

    #[test]
    fn test_unknown_node_rejected() {
        let mut inv = Inventory::new();
        let res = apply_update(&mut inv, &sub_update());
        assert!(matches!(res, Err(UpdateError::UnknownNode { .. })));
    }

    #[test]
    fn test_unknown_sub_module_rejected() {
        let mut inv = seeded_inventory();
        let mut update = sub_update();
        update.sub_mod_idx = Some(5);
        let res = apply_update(&mut inv, &update);
        assert!(matches!(res, Err(UpdateError::UnknownSubModule { .. })));
    }

    #[test]
    fn test_parent_update_audits_without_frames() {
        let mut inv = seeded_inventory();
        let update = UpdateNodeConfig {
            node_id: "19000019".into(),
            config_target: ConfigTarget::Parent,
            node_type_msg: Some(0x781),
            sub_mod_cnt: Some(3),
            node_type_dlc: Some(8),
            sub_mod_idx: None,
            intro_msg_id: None,
            data_msg_id: None,
            data_msg_dlc: None,
            raw_config: None,
        };
        let outcome = apply_update(&mut inv, &update).unwrap();
        assert!(outcome.frames.is_empty());
        assert_eq!(outcome.audits.len(), 2);
        let node = inv.get("19000019").unwrap();
        assert_eq!(node.node_type_msg, 0x781);
        assert_eq!(node.sub_mod_cnt, 3);
    }
}
