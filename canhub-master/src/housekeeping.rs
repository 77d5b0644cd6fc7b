//! Periodic bus maintenance: epoch broadcasts and network scans
//!
//! The timers are polled lazily from the engine loop rather than running on
//! dedicated tasks, so emission is driven by the same task that owns the
//! send half of the bus.

use canhub_common::codec::pack_epoch;
use canhub_common::constants::msg_ids;
use canhub_common::{CanMessage, NodeId};

use crate::config_writer::req_node_intro_frame;

/// How often the network-scan introduction request goes out
pub const REQ_INTRO_PERIOD_MS: u64 = 30 * 60 * 1000;
/// How often the epoch time broadcast goes out
pub const EPOCH_PERIOD_MS: u64 = 10 * 1000;

/// Lazily-polled periodic emitters
#[derive(Debug)]
pub struct Housekeeping {
    master_id: NodeId,
    last_req_intro_ms: u64,
    last_ts_msg_ms: u64,
}

impl Housekeeping {
    /// Create the scheduler; both timers fire on the first poll
    pub fn new(master_id: NodeId) -> Self {
        Self {
            master_id,
            last_req_intro_ms: 0,
            last_ts_msg_ms: 0,
        }
    }

    /// Check both timers and return any frames now due
    pub fn poll(&mut self, now_ms: u64) -> Vec<CanMessage> {
        let mut due = Vec::new();

        if now_ms.saturating_sub(self.last_req_intro_ms) > REQ_INTRO_PERIOD_MS
            || self.last_req_intro_ms == 0
        {
            due.push(req_node_intro_frame(self.master_id));
            self.last_req_intro_ms = now_ms;
        }

        if now_ms.saturating_sub(self.last_ts_msg_ms) > EPOCH_PERIOD_MS || self.last_ts_msg_ms == 0
        {
            due.push(CanMessage::new(
                msg_ids::DATA_EPOCH_ID,
                &pack_epoch(now_ms),
            ));
            self.last_ts_msg_ms = now_ms;
        }

        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_fire_on_first_poll() {
        let mut hk = Housekeeping::new(NodeId::new([1, 0, 0, 1]));
        let frames = hk.poll(1_000_000);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].id(), msg_ids::REQ_NODE_INTRO);
        assert_eq!(&frames[0].data()[..4], &[1, 0, 0, 1]);
        assert_eq!(frames[1].id(), msg_ids::DATA_EPOCH_ID);
        assert_eq!(&frames[1].data()[4..], &1000u32.to_be_bytes());
    }

    #[test]
    fn test_epoch_fires_on_its_own_period() {
        let mut hk = Housekeeping::new(NodeId::new([1, 0, 0, 1]));
        hk.poll(1_000_000);
        assert!(hk.poll(1_005_000).is_empty());
        let frames = hk.poll(1_011_000);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id(), msg_ids::DATA_EPOCH_ID);
    }

    #[test]
    fn test_intro_request_fires_after_its_period() {
        let mut hk = Housekeeping::new(NodeId::new([1, 0, 0, 1]));
        hk.poll(1_000_000);
        let frames = hk.poll(1_000_000 + REQ_INTRO_PERIOD_MS + 1);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].id(), msg_ids::REQ_NODE_INTRO);
    }
}
