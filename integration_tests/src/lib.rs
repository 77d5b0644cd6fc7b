//! Shared helpers for the canhub integration test suite

pub mod sim_bus;
pub mod utils;

pub mod prelude {
    pub use crate::sim_bus::{SimBus, SimBusReceiver, SimBusSender};
    pub use crate::utils::*;
    pub use canhub_common::constants::{msg_ids, DEFAULT_MASTER_NODE_ID};
    pub use canhub_common::traits::{AsyncCanReceiver, AsyncCanSender};
    pub use canhub_common::{CanId, CanMessage, NodeId};
}
