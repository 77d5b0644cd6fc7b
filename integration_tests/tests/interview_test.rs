use integration_tests::prelude::*;

#[tokio::test]
async fn test_first_contact() {
    let _ = env_logger::try_init();
    let mut bus = SimBus::new();
    let mut master_out = bus.new_receiver();
    let mut engine = test_engine(&mut bus);

    engine.handle_frame(node_intro_frame(2, 0x0012), 1000).await;

    let node = engine.inventory().get(TEST_NODE_HEX).expect("node created");
    assert_eq!(node.sub_mod_cnt, 2);
    assert_eq!(node.config_crc, Some(0x0012));
    assert_eq!(node.first_seen, Some(1000));
    assert_eq!(node.last_seen, 1000);
    assert!(!node.intro_complete);

    let ack = master_out.try_recv().expect("ACK emitted");
    assert_eq!(ack.id(), msg_ids::ACK_INTRO);
    assert_eq!(ack.data(), &[0x19, 0, 0, 0x19, 0, 0, 0, 0]);
    assert!(master_out.try_recv().is_none());
}

#[tokio::test]
async fn test_sub_module_phase_a_then_b() {
    let _ = env_logger::try_init();
    let mut bus = SimBus::new();
    let mut engine = test_engine(&mut bus);

    engine.handle_frame(node_intro_frame(2, 0x0012), 1000).await;
    engine
        .handle_frame(sub_intro_frame(0x00, [0xAA, 0xBB, 0xCC]), 1001)
        .await;
    engine
        .handle_frame(sub_intro_frame(0x80, [0x02, 0x10, 0x88]), 1002)
        .await;

    let node = engine.inventory().get(TEST_NODE_HEX).unwrap();
    let sub = node.sub_module(0).expect("sub-module 0 created");
    assert_eq!(sub.raw_config, [0xAA, 0xBB, 0xCC]);
    assert_eq!(sub.data_msg_id, 0x0210);
    assert_eq!(sub.data_msg_dlc, 8);
    assert!(sub.save_state);
    assert!(sub.part_a_complete && sub.part_b_complete);
    assert_eq!(node.last_sub_mod_idx, 0);
}

#[tokio::test]
async fn test_completion_stops_ack() {
    let _ = env_logger::try_init();
    let mut bus = SimBus::new();
    let mut master_out = bus.new_receiver();
    let mut engine = test_engine(&mut bus);

    complete_interview(&mut engine, 2, 1000).await;
    // Drain the ACKs from the interview itself
    while master_out.try_recv().is_some() {}

    // The node repeats its intro once everything is interviewed
    engine.handle_frame(node_intro_frame(2, 0x0012), 2000).await;

    assert!(engine.inventory().get(TEST_NODE_HEX).unwrap().intro_complete);
    assert!(master_out.try_recv().is_none(), "completed interview must not ACK");
}

#[tokio::test]
async fn test_crc_drift_archives_prior_state() {
    let _ = env_logger::try_init();
    let mut bus = SimBus::new();
    let mut engine = test_engine(&mut bus);

    complete_interview(&mut engine, 2, 1000).await;
    engine.handle_frame(node_intro_frame(2, 0x0012), 2000).await;
    assert_eq!(
        engine.database_mut().history_count(TEST_NODE_HEX).unwrap(),
        0,
        "unchanged CRC must not archive"
    );

    engine.handle_frame(node_intro_frame(2, 0x0099), 3000).await;

    let history = engine.database_mut().history_for(TEST_NODE_HEX).unwrap();
    assert_eq!(history.len(), 1);
    let row = &history[0];
    assert_eq!(row.config_crc, Some(0x0012), "history holds the old CRC");
    assert!(row.recorded_at < 3000, "snapshot precedes the mutation");
    let archived_sub = row.sub_modules[0].as_ref().expect("prior sub-module map");
    assert_eq!(archived_sub.raw_config, [0xAA, 0xBB, 0xCC]);

    let node = engine.inventory().get(TEST_NODE_HEX).unwrap();
    assert_eq!(node.config_crc, Some(0x0099));
}

#[tokio::test]
async fn test_phase_repeat_leaves_inventory_unchanged() {
    let _ = env_logger::try_init();
    let mut bus = SimBus::new();
    let mut engine = test_engine(&mut bus);

    complete_interview(&mut engine, 1, 1000).await;
    let before = engine.inventory().get(TEST_NODE_HEX).unwrap().clone();

    // Phase A and B again for the interviewed sub-module
    engine
        .handle_frame(sub_intro_frame(0x00, [0x01, 0x02, 0x03]), 2000)
        .await;
    engine
        .handle_frame(sub_intro_frame(0x80, [0x03, 0x33, 0x04]), 2001)
        .await;

    assert_eq!(engine.inventory().get(TEST_NODE_HEX).unwrap(), &before);
}

#[tokio::test]
async fn test_sub_intro_for_unknown_node_dropped() {
    let _ = env_logger::try_init();
    let mut bus = SimBus::new();
    let mut master_out = bus.new_receiver();
    let mut engine = test_engine(&mut bus);

    engine
        .handle_frame(sub_intro_frame(0x00, [1, 2, 3]), 1000)
        .await;

    assert!(engine.inventory().is_empty());
    assert!(master_out.try_recv().is_none());
}

#[tokio::test]
async fn test_sub_intro_index_out_of_range_dropped() {
    let _ = env_logger::try_init();
    let mut bus = SimBus::new();
    let mut master_out = bus.new_receiver();
    let mut engine = test_engine(&mut bus);

    engine.handle_frame(node_intro_frame(2, 0x0012), 1000).await;
    while master_out.try_recv().is_some() {}

    engine
        .handle_frame(sub_intro_frame(0x0A, [1, 2, 3]), 1001)
        .await;

    let node = engine.inventory().get(TEST_NODE_HEX).unwrap();
    assert!(node.populated_sub_modules().next().is_none());
    assert!(master_out.try_recv().is_none());
}

#[tokio::test]
async fn test_malformed_node_intro_dropped() {
    let _ = env_logger::try_init();
    let mut bus = SimBus::new();
    let mut master_out = bus.new_receiver();
    let mut engine = test_engine(&mut bus);

    engine
        .handle_frame(CanMessage::new(CanId::std(0x780), &[0x19, 0, 0]), 1000)
        .await;

    assert!(engine.inventory().is_empty());
    assert!(master_out.try_recv().is_none());
}

#[tokio::test]
async fn test_interview_reset_clears_state_and_requests_intro() {
    let _ = env_logger::try_init();
    let mut bus = SimBus::new();
    let mut master_out = bus.new_receiver();
    let mut engine = test_engine(&mut bus);

    complete_interview(&mut engine, 2, 1000).await;
    engine.handle_frame(node_intro_frame(2, 0x0012), 2000).await;
    while master_out.try_recv().is_some() {}

    let (port, _events) = engine.connect_operator();
    engine
        .handle_request(
            port,
            serde_json::from_str(
                r#"{"type":"REQUEST_NODE_INTERVIEW","payload":{"nodeId":"19000019"}}"#,
            )
            .unwrap(),
            3000,
        )
        .await;

    let node = engine.inventory().get(TEST_NODE_HEX).unwrap();
    assert!(node.populated_sub_modules().next().is_none());
    assert_eq!(node.last_sub_mod_idx, 0);
    assert!(!node.intro_complete);

    let req = master_out.try_recv().expect("re-interview request emitted");
    assert_eq!(req.id(), msg_ids::REQ_NODE_INTRO);
    assert_eq!(&req.data()[..4], &[0x19, 0, 0, 0x19]);
}

#[tokio::test]
async fn test_interview_survives_restart() {
    let _ = env_logger::try_init();
    let mut bus = SimBus::new();

    let file = tempfile::NamedTempFile::new().unwrap();
    let db = canhub_master::Database::open(file.path()).unwrap();
    let mut engine = canhub_master::Engine::new(
        DEFAULT_MASTER_NODE_ID,
        bus.new_sender(),
        db,
        std::sync::Arc::new(canhub_master::DefinitionRegistry::empty()),
    )
    .unwrap();

    complete_interview(&mut engine, 2, 1000).await;
    engine.handle_frame(node_intro_frame(2, 0x0012), 2000).await;
    let before = engine.inventory().get(TEST_NODE_HEX).unwrap().clone();
    drop(engine);

    let db = canhub_master::Database::open(file.path()).unwrap();
    let engine = canhub_master::Engine::new(
        DEFAULT_MASTER_NODE_ID,
        bus.new_sender(),
        db,
        std::sync::Arc::new(canhub_master::DefinitionRegistry::empty()),
    )
    .unwrap();

    assert_eq!(engine.inventory().get(TEST_NODE_HEX).unwrap(), &before);
}
