#![allow(dead_code)]
use std::sync::Arc;

use canhub_common::constants::DEFAULT_MASTER_NODE_ID;
use canhub_common::{CanId, CanMessage};
use canhub_master::{Database, DefinitionRegistry, Engine};

use crate::sim_bus::{SimBus, SimBusSender};

/// The node identity used throughout the scenario tests
pub const TEST_NODE: [u8; 4] = [0x19, 0x00, 0x00, 0x19];
/// Hex key of [`TEST_NODE`]
pub const TEST_NODE_HEX: &str = "19000019";

/// Build an engine over an in-memory store and a sim-bus sender
pub fn test_engine(bus: &mut SimBus) -> Engine<SimBusSender> {
    test_engine_with_registry(bus, DefinitionRegistry::empty())
}

pub fn test_engine_with_registry(
    bus: &mut SimBus,
    registry: DefinitionRegistry,
) -> Engine<SimBusSender> {
    let db = Database::open_in_memory().expect("in-memory store");
    Engine::new(
        DEFAULT_MASTER_NODE_ID,
        bus.new_sender(),
        db,
        Arc::new(registry),
    )
    .expect("engine from empty store")
}

/// Build a node-intro frame for [`TEST_NODE`]
pub fn node_intro_frame(sub_mod_cnt: u8, config_crc: u16) -> CanMessage {
    let [hi, lo] = config_crc.to_be_bytes();
    CanMessage::new(
        CanId::std(0x780),
        &[
            TEST_NODE[0],
            TEST_NODE[1],
            TEST_NODE[2],
            TEST_NODE[3],
            sub_mod_cnt,
            hi,
            lo,
            0,
        ],
    )
}

/// Build a sub-module-intro frame for [`TEST_NODE`]
///
/// `tag` carries the phase-B flag in bit 7 and the index in the low bits.
pub fn sub_intro_frame(tag: u8, tail: [u8; 3]) -> CanMessage {
    CanMessage::new(
        CanId::std(0x700),
        &[
            TEST_NODE[0],
            TEST_NODE[1],
            TEST_NODE[2],
            TEST_NODE[3],
            tag,
            tail[0],
            tail[1],
            tail[2],
        ],
    )
}

/// Run the full two-phase interview for `sub_mod_cnt` sub-modules
pub async fn complete_interview(engine: &mut Engine<SimBusSender>, sub_mod_cnt: u8, now_ms: u64) {
    engine
        .handle_frame(node_intro_frame(sub_mod_cnt, 0x0012), now_ms)
        .await;
    for idx in 0..sub_mod_cnt {
        engine
            .handle_frame(sub_intro_frame(idx, [0xAA, 0xBB, 0xCC]), now_ms + 1)
            .await;
        engine
            .handle_frame(sub_intro_frame(0x80 | idx, [0x02, 0x10, 0x88]), now_ms + 2)
            .await;
    }
}
