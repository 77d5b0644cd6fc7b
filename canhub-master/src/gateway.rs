//! Operator gateway: typed duplex message ports for browser operators
//!
//! A port is a pair of channels: requests flow from the operator's
//! transport task onto the engine, tagged with the originating port id;
//! events flow back out through an unbounded per-port channel. The hub
//! tracks connected ports, fans out broadcasts, and enforces liveness with
//! a periodic probe. Transport framing (HTTP, sockets) lives outside this
//! crate; the protocol here is the JSON message schema itself.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::config_writer::UpdateNodeConfig;
use crate::db::AuditRecord;
use crate::inventory::InventorySnapshot;
use crate::registry::Definition;

/// How often connected ports are probed for liveness
pub const KEEPALIVE_PERIOD_MS: u64 = 30_000;

/// Identifies one connected operator port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortId(pub u32);

impl core::fmt::Display for PortId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "port {}", self.0)
    }
}

/// Messages an operator can send to the master
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperatorRequest {
    /// Edit a node's or sub-module's configuration
    UpdateNodeConfig(UpdateNodeConfig),
    /// Discard interview progress and re-interview a node
    #[serde(rename_all = "camelCase")]
    RequestNodeInterview {
        /// Hex key of the node to re-interview
        node_id: String,
    },
    /// Attach or replace a free-text comment on an audit entry
    #[serde(rename_all = "camelCase")]
    SaveAuditComment {
        /// The audit row being annotated
        audit_id: i64,
        /// The comment text
        comment: String,
    },
    /// Ask for the full message definition list
    GetDefinitions,
    /// Command a node to persist its running configuration
    #[serde(rename_all = "camelCase")]
    SaveToBus {
        /// Hex key of the node to command
        node_id: String,
    },
    /// Erase a node from the inventory, leaving its history
    #[serde(rename_all = "camelCase")]
    DeleteNode {
        /// Hex key of the node to erase
        node_id: String,
    },
    /// Answer to a liveness probe
    Pong,
}

/// A received CAN frame decorated for the live operator stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveFrame {
    /// Raw arbitration ID
    pub id: u16,
    /// Definition name, or "UNKNOWN" when the registry has no entry
    pub name: String,
    /// The frame's payload bytes
    pub data: Vec<u8>,
    /// Unix ms the frame was received
    pub timestamp: u64,
}

/// Messages the master pushes to operators
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperatorEvent {
    /// The full message definition list
    DefinitionsList(Vec<Definition>),
    /// A fresh deep copy of the inventory
    DatabaseUpdate(InventorySnapshot),
    /// The most recent audit entries, joined with comments
    AuditLogUpdate(Vec<AuditRecord>),
    /// Confirmation of an applied configuration edit
    #[serde(rename_all = "camelCase")]
    UpdateAck {
        /// The edited node
        node_id: String,
        /// The edited sub-module, when the edit targeted one
        sub_mod_idx: Option<u8>,
        /// Whether the edit was applied
        success: bool,
    },
    /// One decoded frame from the live bus stream
    CanMessage(LiveFrame),
    /// Liveness probe; the operator must answer with a Pong request
    Ping,
}

struct Port {
    id: PortId,
    tx: UnboundedSender<OperatorEvent>,
    awaiting_pong: bool,
}

/// Tracks connected operator ports and fans events out to them
#[derive(Default)]
pub struct GatewayHub {
    ports: Vec<Port>,
    next_id: u32,
    last_probe_ms: u64,
}

impl core::fmt::Debug for GatewayHub {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GatewayHub")
            .field("ports", &self.ports.len())
            .finish()
    }
}

impl GatewayHub {
    /// Create a hub with no connected ports
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently connected ports
    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    /// Register a new operator port
    ///
    /// Returns the port's id and the event receiver its transport task
    /// should drain. The engine sends the on-connect handshake events
    /// immediately after registering.
    pub fn connect(&mut self) -> (PortId, UnboundedReceiver<OperatorEvent>) {
        let id = PortId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        let (tx, rx) = unbounded_channel();
        self.ports.push(Port {
            id,
            tx,
            awaiting_pong: false,
        });
        log::info!("Operator {id} connected");
        (id, rx)
    }

    /// Drop a port, e.g. when its transport disconnects
    pub fn disconnect(&mut self, port: PortId) {
        self.ports.retain(|p| p.id != port);
    }

    /// Record a liveness answer from a port
    pub fn pong(&mut self, port: PortId) {
        if let Some(p) = self.ports.iter_mut().find(|p| p.id == port) {
            p.awaiting_pong = false;
        }
    }

    /// Send an event to one port
    ///
    /// A closed receiver means the transport died; the port is dropped.
    pub fn send_to(&mut self, port: PortId, event: OperatorEvent) {
        let mut dead = false;
        if let Some(p) = self.ports.iter().find(|p| p.id == port) {
            dead = p.tx.send(event).is_err();
        }
        if dead {
            log::debug!("Dropping disconnected operator {port}");
            self.disconnect(port);
        }
    }

    /// Send an event to every connected port
    pub fn broadcast(&mut self, event: OperatorEvent) {
        self.ports.retain(|p| p.tx.send(event.clone()).is_ok());
    }

    /// Probe ports for liveness on the keep-alive cadence
    ///
    /// A port that never answered the previous probe is terminated before
    /// the next one goes out.
    pub fn poll_liveness(&mut self, now_ms: u64) {
        if now_ms.saturating_sub(self.last_probe_ms) < KEEPALIVE_PERIOD_MS {
            return;
        }
        self.last_probe_ms = now_ms;

        self.ports.retain(|p| {
            if p.awaiting_pong {
                log::warn!("Terminating unresponsive operator {}", p.id);
                false
            } else {
                true
            }
        });
        for p in &mut self.ports {
            if p.tx.send(OperatorEvent::Ping).is_ok() {
                p.awaiting_pong = true;
            }
        }
        self.ports.retain(|p| !p.tx.is_closed());
    }
}
