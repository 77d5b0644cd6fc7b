//! A master controller and management plane for a small CAN-bus network
//!
//! Canhub-master listens to raw CAN frames on a single bus, discovers nodes
//! and their sub-modules through a two-phase introduction protocol, keeps an
//! authoritative inventory of their configuration, detects configuration
//! drift via the CRC carried in intro frames, archives historical snapshots,
//! accepts operator edits, and pushes edits back to the bus as configuration
//! frames. A live stream of decoded frames and inventory snapshots is served
//! to operator ports.
//!
//! The crate is organized around a single engine task that owns all mutable
//! state (see [`engine::Engine`]); the other modules are the pieces it
//! drives:
//!
//! * [`interview`] - the two-phase discovery state machine
//! * [`inventory`] - the in-memory node/sub-module store
//! * [`config_writer`] - operator edits to bus writes, audit, and history
//! * [`db`] - the SQLite mirror (inventory, history, audit, comments)
//! * [`registry`] - message definitions loaded from CSV
//! * [`gateway`] - operator ports and the JSON message protocol
//! * [`housekeeping`] - epoch broadcasts and periodic network scans
#![warn(missing_docs)]

pub mod config_writer;
pub mod db;
pub mod engine;
pub mod gateway;
pub mod housekeeping;
pub mod interview;
pub mod inventory;
pub mod registry;

pub use canhub_common as common;

pub use db::Database;
pub use engine::{engine_channel, Engine, EngineHandle};
pub use gateway::{OperatorEvent, OperatorRequest};
pub use inventory::{Inventory, Node, SubModule};
pub use registry::DefinitionRegistry;
