//! The engine task: single owner of all mutable management-plane state
//!
//! One logical task owns the inventory, the interview state machine, the
//! config writer, the housekeeping clock, the persistence handle, and the
//! outbound half of the bus. Frames, operator requests, and timer ticks are
//! multiplexed onto it, giving a total order over state changes without
//! locks. Handlers take the wall clock as an argument so tests can drive
//! them deterministically.

use std::sync::Arc;
use std::time::Duration;

use canhub_common::constants::{is_node_intro, is_sub_intro, ranges};
use canhub_common::traits::{AsyncCanReceiver, AsyncCanSender};
use canhub_common::{CanMessage, NodeId};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;

use crate::config_writer::{self, UpdateNodeConfig};
use crate::db::{Database, DbError};
use crate::gateway::{GatewayHub, LiveFrame, OperatorEvent, OperatorRequest, PortId};
use crate::housekeeping::Housekeeping;
use crate::interview;
use crate::inventory::Inventory;
use crate::registry::DefinitionRegistry;

/// How many audit rows each refresh broadcast carries
const AUDIT_BROADCAST_LIMIT: u32 = 20;

/// Requests serialized onto the engine task from the outside world
#[derive(Debug)]
pub enum EngineCommand {
    /// Register a new operator port and return its event receiver
    Connect {
        /// Answered with the port id and its event stream
        reply: oneshot::Sender<(PortId, UnboundedReceiver<OperatorEvent>)>,
    },
    /// An operator request, tagged with its originating port
    Request {
        /// The port the request arrived on
        port: PortId,
        /// The decoded request
        request: OperatorRequest,
    },
    /// An operator transport went away
    Disconnect {
        /// The port that disconnected
        port: PortId,
    },
    /// Stop the engine loop
    Shutdown,
}

/// Cloneable handle for delivering commands to a running engine
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: UnboundedSender<EngineCommand>,
}

impl EngineHandle {
    /// Register an operator port on the engine
    ///
    /// Returns None when the engine has shut down.
    pub async fn connect(&self) -> Option<(PortId, UnboundedReceiver<OperatorEvent>)> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(EngineCommand::Connect { reply }).ok()?;
        rx.await.ok()
    }

    /// Deliver an operator request to the engine
    pub fn request(&self, port: PortId, request: OperatorRequest) {
        self.tx.send(EngineCommand::Request { port, request }).ok();
    }

    /// Tell the engine an operator transport disconnected
    pub fn disconnect(&self, port: PortId) {
        self.tx.send(EngineCommand::Disconnect { port }).ok();
    }

    /// Ask the engine loop to stop
    pub fn shutdown(&self) {
        self.tx.send(EngineCommand::Shutdown).ok();
    }
}

/// Create the command channel for [`Engine::run`]
pub fn engine_channel() -> (EngineHandle, UnboundedReceiver<EngineCommand>) {
    let (tx, rx) = unbounded_channel();
    (EngineHandle { tx }, rx)
}

/// The management-plane state engine
pub struct Engine<S: AsyncCanSender> {
    master_id: NodeId,
    sender: S,
    inventory: Inventory,
    db: Database,
    registry: Arc<DefinitionRegistry>,
    gateway: GatewayHub,
    housekeeping: Housekeeping,
}

impl<S: AsyncCanSender> core::fmt::Debug for Engine<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Engine")
            .field("master_id", &self.master_id)
            .field("nodes", &self.inventory.len())
            .finish()
    }
}

impl<S: AsyncCanSender> Engine<S> {
    /// Create an engine, restoring the inventory from the durable mirror
    pub fn new(
        master_id: NodeId,
        sender: S,
        mut db: Database,
        registry: Arc<DefinitionRegistry>,
    ) -> Result<Self, DbError> {
        let mut inventory = Inventory::new();
        for node in db.load_inventory()? {
            inventory.restore(node);
        }
        if !inventory.is_empty() {
            log::info!("Restored {} nodes from the inventory mirror", inventory.len());
        }
        Ok(Self {
            master_id,
            sender,
            inventory,
            db,
            registry,
            gateway: GatewayHub::new(),
            housekeeping: Housekeeping::new(master_id),
        })
    }

    /// Read access to the inventory
    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Access to the persistence handle
    pub fn database_mut(&mut self) -> &mut Database {
        &mut self.db
    }

    /// Send a frame, logging and swallowing errors: the bus is best-effort
    async fn send_frame(&mut self, msg: CanMessage) {
        if let Err(e) = self.sender.send(msg).await {
            log::error!("Failed to send frame {}: {e:?}", msg.id());
        }
    }

    fn broadcast_inventory(&mut self) {
        let snapshot = self.inventory.snapshot();
        self.gateway
            .broadcast(OperatorEvent::DatabaseUpdate(snapshot));
    }

    fn broadcast_audit_log(&mut self) {
        match self.db.recent_audit(AUDIT_BROADCAST_LIMIT) {
            Ok(rows) => self.gateway.broadcast(OperatorEvent::AuditLogUpdate(rows)),
            Err(e) => log::error!("Failed to read audit log: {e}"),
        }
    }

    /// Process one inbound CAN frame
    ///
    /// Every frame is forwarded to operators on the live stream; intro-range
    /// frames additionally drive the interview state machine.
    pub async fn handle_frame(&mut self, msg: CanMessage, now_ms: u64) {
        let name = self
            .registry
            .name_of(msg.id().raw())
            .unwrap_or("UNKNOWN")
            .to_owned();
        self.gateway.broadcast(OperatorEvent::CanMessage(LiveFrame {
            id: msg.id().raw(),
            name,
            data: msg.data().to_vec(),
            timestamp: now_ms,
        }));

        // IDs below the dispatch window reach operators but are never
        // interpreted
        if msg.id().raw() < ranges::DISPATCH_MIN {
            return;
        }
        if is_node_intro(msg.id()) {
            self.dispatch_node_intro(&msg, now_ms).await;
        } else if is_sub_intro(msg.id()) {
            self.dispatch_sub_intro(&msg, now_ms).await;
        }
    }

    async fn dispatch_node_intro(&mut self, msg: &CanMessage, now_ms: u64) {
        let result = interview::handle_node_intro(&mut self.inventory, msg, now_ms);
        let Some(node_id) = result.node_id else {
            return;
        };

        // Drift archive first: the history row must land before the
        // overwritten state becomes durable. Its recorded_at is the prior
        // state's last_seen, which precedes this frame's timestamp.
        if let Some(prior) = &result.archived_prior {
            if let Err(e) = self.db.insert_history(prior, prior.last_seen) {
                log::error!("Failed to archive drift snapshot for {node_id}: {e}");
            }
        }

        if result.persist {
            self.persist_node(&node_id.to_hex());
        }

        if result.ack {
            self.send_frame(config_writer::ack_intro_frame(node_id)).await;
        }
    }

    async fn dispatch_sub_intro(&mut self, msg: &CanMessage, now_ms: u64) {
        let result = interview::handle_sub_intro(&mut self.inventory, msg, now_ms);
        let Some(node_id) = result.node_id else {
            return;
        };

        if result.persist {
            self.persist_node(&node_id.to_hex());
        }

        if result.ack {
            self.send_frame(config_writer::ack_intro_frame(node_id)).await;
        }
    }

    /// Upsert a node's mirror row and broadcast the refreshed inventory
    ///
    /// On persistence failure the in-memory state stays authoritative and
    /// operators simply see no refresh.
    fn persist_node(&mut self, key: &str) {
        let Some(node) = self.inventory.get(key) else {
            return;
        };
        match self.db.upsert_node(node) {
            Ok(()) => self.broadcast_inventory(),
            Err(e) => log::error!("Failed to persist node {key}: {e}"),
        }
    }

    /// Process one operator request
    pub async fn handle_request(&mut self, port: PortId, request: OperatorRequest, now_ms: u64) {
        match request {
            OperatorRequest::UpdateNodeConfig(update) => {
                self.handle_config_update(port, update, now_ms).await;
            }
            OperatorRequest::RequestNodeInterview { node_id } => {
                self.handle_interview_request(&node_id).await;
            }
            OperatorRequest::SaveAuditComment { audit_id, comment } => {
                match self.db.upsert_comment(audit_id, &comment) {
                    Ok(()) => self.broadcast_audit_log(),
                    Err(e) => log::error!("Failed to save comment on audit {audit_id}: {e}"),
                }
            }
            OperatorRequest::GetDefinitions => {
                let definitions = self.registry.definitions().to_vec();
                self.gateway
                    .send_to(port, OperatorEvent::DefinitionsList(definitions));
            }
            OperatorRequest::SaveToBus { node_id } => match NodeId::from_hex(&node_id) {
                Ok(id) => self.send_frame(config_writer::save_state_frame(id)).await,
                Err(_) => log::warn!("SAVE_TO_BUS with invalid node id {node_id:?}"),
            },
            OperatorRequest::DeleteNode { node_id } => {
                if self.inventory.remove(&node_id).is_some() {
                    if let Err(e) = self.db.delete_node(&node_id) {
                        log::error!("Failed to delete inventory row for {node_id}: {e}");
                    }
                    self.broadcast_inventory();
                } else {
                    log::warn!("Delete requested for unknown node {node_id}");
                }
            }
            OperatorRequest::Pong => self.gateway.pong(port),
        }
    }

    async fn handle_config_update(&mut self, port: PortId, update: UpdateNodeConfig, now_ms: u64) {
        let outcome = match config_writer::apply_update(&mut self.inventory, &update) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("Rejected config update: {e}");
                return;
            }
        };
        // A no-op edit produces no frames, no audit, no persistence, no ACK
        if outcome.is_noop() {
            return;
        }

        for frame in &outcome.frames {
            self.send_frame(*frame).await;
        }

        let Some(node) = self.inventory.get(&update.node_id).cloned() else {
            return;
        };
        match self.db.record_config_write(&node, &outcome.audits, now_ms) {
            Ok(()) => {
                self.gateway.send_to(
                    port,
                    OperatorEvent::UpdateAck {
                        node_id: update.node_id.clone(),
                        sub_mod_idx: outcome.sub_mod_idx,
                        success: true,
                    },
                );
                self.broadcast_audit_log();
                self.broadcast_inventory();
            }
            // The operator sees no confirmation and may retry
            Err(e) => log::error!("Failed to persist config write for {}: {e}", update.node_id),
        }
    }

    async fn handle_interview_request(&mut self, node_id: &str) {
        if !self.inventory.reset_interview_state(node_id) {
            log::warn!("Re-interview requested for unknown node {node_id}");
            return;
        }
        log::info!("Re-interviewing node {node_id}");
        self.broadcast_inventory();
        match NodeId::from_hex(node_id) {
            Ok(id) => {
                self.send_frame(config_writer::req_node_intro_frame(id))
                    .await;
            }
            Err(_) => log::warn!("Interview request with invalid node id {node_id:?}"),
        }
    }

    /// Register a new operator port and send it the connect handshake
    pub fn connect_operator(&mut self) -> (PortId, UnboundedReceiver<OperatorEvent>) {
        let (port, rx) = self.gateway.connect();
        let definitions = self.registry.definitions().to_vec();
        self.gateway
            .send_to(port, OperatorEvent::DefinitionsList(definitions));
        let snapshot = self.inventory.snapshot();
        self.gateway
            .send_to(port, OperatorEvent::DatabaseUpdate(snapshot));
        (port, rx)
    }

    /// Run the lazily-scheduled periodic work: housekeeping frames and the
    /// operator liveness sweep
    pub async fn poll(&mut self, now_ms: u64) {
        for frame in self.housekeeping.poll(now_ms) {
            self.send_frame(frame).await;
        }
        self.gateway.poll_liveness(now_ms);
    }

    /// Drive the engine until shutdown
    ///
    /// Multiplexes bus frames, operator commands, and a coarse tick onto
    /// this task; every branch runs to completion (including sends and
    /// persistence) before the next event is dequeued.
    pub async fn run<R: AsyncCanReceiver>(
        mut self,
        mut bus_rx: R,
        mut commands: UnboundedReceiver<EngineCommand>,
    ) {
        log::info!("Engine running as master {}", self.master_id);
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                frame = bus_rx.recv() => match frame {
                    Ok(msg) => self.handle_frame(msg, wall_clock_ms()).await,
                    Err(e) => {
                        log::error!("Bus receive error: {e:?}");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                command = commands.recv() => match command {
                    Some(EngineCommand::Connect { reply }) => {
                        let _ = reply.send(self.connect_operator());
                    }
                    Some(EngineCommand::Request { port, request }) => {
                        self.handle_request(port, request, wall_clock_ms()).await;
                    }
                    Some(EngineCommand::Disconnect { port }) => self.gateway.disconnect(port),
                    Some(EngineCommand::Shutdown) | None => break,
                },
                _ = tick.tick() => {}
            }
            self.poll(wall_clock_ms()).await;
        }
        log::info!("Engine stopped");
    }
}

/// Unix wall time in milliseconds
pub fn wall_clock_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}
