//! Common functionality shared among the canhub crates.
//!
//! Holds the wire-level vocabulary of the management protocol: CAN frame
//! types, the 4-byte node identity, the payload codec, protocol constants,
//! and the async bus-port traits, plus a socketcan implementation of those
//! traits behind the `socketcan` feature.
#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs, missing_copy_implementations)]

pub mod codec;
pub mod constants;
pub mod messages;
pub mod node_id;
pub mod traits;

#[cfg(feature = "socketcan")]
mod socketcan;

#[cfg(feature = "socketcan")]
pub use socketcan::{open_bus, SocketCanReceiver, SocketCanSender};

pub use messages::{CanId, CanMessage};
pub use node_id::NodeId;
