//! Adapter contract tests: registration lifecycle, permission gating,
//! business routing, and error translation over the full
//! decode-validate-dispatch-respond pipeline.

use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use termlink_adapter::{
    AnyAdapter, BusinessDispatcher, EntropyAccessCodec, MemoryConfigStore, ProcessOutcome,
    ProtocolAdapter, ProtocolRegistry, RealandAttendanceCodec, UNKNOWN_ERROR_CODE,
    vendors::{entropy, realand},
};
use termlink_core::{
    AdapterState, BusinessKind, DeviceOperation, DeviceSn, Error, ProtocolType, SessionStatus,
};
use termlink_protocol::{Frame, FrameBuilder, WireProfile};
use termlink_session::{
    RegistrationOutcome, SessionStore, SweeperConfig, TransitionEvent, sweep_protocol_once,
};

const PROFILE: WireProfile = WireProfile::new(entropy::MAGIC, entropy::WIRE_VERSION);
const MSG_REGISTER: u8 = 0x07;
const MSG_HEARTBEAT: u8 = 0x03;
const MSG_PERMISSION_REQUEST: u8 = 0x04;
const MSG_ERROR_REPORT: u8 = 0x06;
const MARKER_ACK: u8 = 0x01;
const MARKER_NAK: u8 = 0x02;
const MARKER_PERMISSION: u8 = 0x03;

struct Setup {
    adapter: Arc<ProtocolAdapter<EntropyAccessCodec>>,
    store: Arc<SessionStore>,
    events: mpsc::Receiver<TransitionEvent>,
}

/// Entropy adapter wired to a session store and an access handler that
/// replies with the given outcome.
async fn entropy_setup(reply: ProcessOutcome) -> Setup {
    let (tx, events) = mpsc::channel(16);
    let store = Arc::new(SessionStore::new(tx));

    let dispatcher = BusinessDispatcher::new(16);
    let mut handler_rx = dispatcher.register_handler(BusinessKind::Access);
    tokio::spawn(async move {
        while let Some(call) = handler_rx.recv().await {
            let _ = call.reply.send(reply.clone());
        }
    });

    let adapter = Arc::new(ProtocolAdapter::new(
        EntropyAccessCodec::new(),
        Arc::clone(&store),
        dispatcher,
        Arc::new(MemoryConfigStore::new()),
    ));
    adapter.initialize().await.unwrap();

    Setup {
        adapter,
        store,
        events,
    }
}

fn sn(s: &str) -> DeviceSn {
    DeviceSn::new(s).unwrap()
}

fn device_frame(device: &str, message_type: u8, payload: &[u8]) -> Frame {
    FrameBuilder::new(PROFILE, sn(device), message_type, 0x00)
        .sequence(1)
        .timestamp(Utc::now().timestamp())
        .payload(payload)
        .build()
        .unwrap()
}

fn registration_frame(device: &str, model: &str) -> Frame {
    device_frame(
        device,
        MSG_REGISTER,
        &entropy::registration_payload(model, "4.8.1"),
    )
}

fn heartbeat_frame(device: &str) -> Frame {
    device_frame(device, MSG_HEARTBEAT, &entropy::heartbeat_payload(30, 600))
}

#[tokio::test]
async fn test_registration_brings_device_online() {
    let setup = entropy_setup(ProcessOutcome::ok_empty()).await;

    let response = setup
        .adapter
        .process_frame(&registration_frame("DEV001", "MA300"))
        .await
        .unwrap();

    assert_eq!(response.payload()[0], MARKER_ACK);
    assert_eq!(response.device_sn().as_str(), "DEV001");
    assert_eq!(
        setup.store.status(&sn("DEV001")),
        Some(SessionStatus::Online)
    );
}

#[tokio::test]
async fn test_unsupported_model_is_rejected() {
    let setup = entropy_setup(ProcessOutcome::ok_empty()).await;

    let response = setup
        .adapter
        .process_frame(&registration_frame("DEV001", "X9000"))
        .await
        .unwrap();

    assert_eq!(response.payload()[0], MARKER_NAK);
    assert_ne!(
        setup.store.status(&sn("DEV001")),
        Some(SessionStatus::Online)
    );
}

#[tokio::test]
async fn test_heartbeat_before_registration_forces_reregistration() {
    let setup = entropy_setup(ProcessOutcome::ok_empty()).await;

    let response = setup
        .adapter
        .process_frame(&heartbeat_frame("DEV001"))
        .await
        .unwrap();

    assert_eq!(response.payload()[0], MARKER_NAK);
}

#[tokio::test]
async fn test_heartbeat_is_idempotent_and_keeps_online() {
    let setup = entropy_setup(ProcessOutcome::ok_empty()).await;
    setup
        .adapter
        .process_frame(&registration_frame("DEV001", "MA300"))
        .await
        .unwrap();

    for _ in 0..3 {
        let response = setup
            .adapter
            .process_frame(&heartbeat_frame("DEV001"))
            .await
            .unwrap();
        assert_eq!(response.payload()[0], MARKER_ACK);
    }
    assert_eq!(
        setup.store.status(&sn("DEV001")),
        Some(SessionStatus::Online)
    );
}

#[tokio::test]
async fn test_stale_message_fails_validation() {
    let setup = entropy_setup(ProcessOutcome::ok_empty()).await;

    // Ten minutes old: past the 300s replay window.
    let stale = FrameBuilder::new(PROFILE, sn("DEV001"), MSG_HEARTBEAT, 0x00)
        .timestamp(Utc::now().timestamp() - 600)
        .payload(&entropy::heartbeat_payload(30, 600))
        .build()
        .unwrap();

    let response = setup.adapter.process_frame(&stale).await.unwrap();
    assert_eq!(response.payload()[0], MARKER_NAK);
    assert_eq!(setup.adapter.statistics().validation_failures, 1);
}

#[tokio::test]
async fn test_adapter_serves_only_when_running() {
    let store = Arc::new(SessionStore::detached());
    let adapter = ProtocolAdapter::new(
        EntropyAccessCodec::new(),
        store,
        BusinessDispatcher::default(),
        Arc::new(MemoryConfigStore::new()),
    );

    assert_eq!(adapter.adapter_state(), AdapterState::Initialized);
    let result = adapter.process_frame(&heartbeat_frame("DEV001")).await;
    assert!(matches!(result, Err(Error::AdapterNotRunning(_))));

    adapter.initialize().await.unwrap();
    assert_eq!(adapter.adapter_state(), AdapterState::Running);

    adapter.destroy().await;
    assert_eq!(adapter.adapter_state(), AdapterState::Stopped);
    adapter.destroy().await; // idempotent
    assert_eq!(adapter.adapter_state(), AdapterState::Stopped);
}

#[tokio::test]
async fn test_initialize_device_creates_session_on_first_contact() {
    let setup = entropy_setup(ProcessOutcome::ok_empty()).await;
    assert_eq!(setup.adapter.device_status(&sn("DEV001")), None);

    let status = setup.adapter.initialize_device(&sn("DEV001")).unwrap();
    assert_eq!(status, SessionStatus::Initialized);

    // Repeated first contact is harmless and keeps the session.
    let status = setup.adapter.initialize_device(&sn("DEV001")).unwrap();
    assert_eq!(status, SessionStatus::Initialized);
    assert_eq!(setup.store.len(), 1);
}

#[tokio::test]
async fn test_updated_config_drives_permission_checks() {
    let setup = entropy_setup(ProcessOutcome::ok_empty()).await;
    setup
        .adapter
        .handle_registration(&sn("DEV001"), "MA300", HashMap::new())
        .unwrap();

    // Default access config authorizes door control.
    let decision = setup
        .adapter
        .check_permission(&sn("DEV001"), DeviceOperation::DoorControl);
    assert!(decision.permitted());

    // Revoking the operation in the per-device config takes effect on
    // the next check.
    let mut config = setup.adapter.protocol_config(&sn("DEV001"));
    config.authorized_operations.remove(&DeviceOperation::DoorControl);
    setup
        .adapter
        .update_protocol_config(&sn("DEV001"), config)
        .unwrap();

    let decision = setup
        .adapter
        .check_permission(&sn("DEV001"), DeviceOperation::DoorControl);
    assert!(!decision.permitted());
    assert!(decision.reason().contains("not authorized"));
}

#[tokio::test]
async fn test_cross_business_kinds_are_refused() {
    let setup = entropy_setup(ProcessOutcome::ok_empty()).await;

    let outcome = setup
        .adapter
        .process_consume("CONSUME_RECORD", json!({}), &sn("DEV001"))
        .outcome()
        .await;
    assert!(!outcome.success);
    assert_eq!(outcome.error_code.as_deref(), Some("NOT_SUPPORTED"));

    let outcome = setup
        .adapter
        .process_attendance("CLOCK_RECORD", json!({}), &sn("DEV001"))
        .outcome()
        .await;
    assert_eq!(outcome.error_code.as_deref(), Some("NOT_SUPPORTED"));
}

#[tokio::test]
async fn test_unknown_business_type_is_refused() {
    let setup = entropy_setup(ProcessOutcome::ok_empty()).await;

    let outcome = setup
        .adapter
        .process_access("NO_SUCH_TYPE", json!({}), &sn("DEV001"))
        .outcome()
        .await;
    assert_eq!(outcome.error_code.as_deref(), Some("UNKNOWN_BUSINESS_TYPE"));
}

#[tokio::test]
async fn test_business_event_requires_online_session() {
    let setup = entropy_setup(ProcessOutcome::ok_empty()).await;

    let mut payload = vec![0x01];
    payload.extend_from_slice(&1u32.to_le_bytes());
    payload.extend_from_slice(&1001u32.to_le_bytes());
    let mut card = b"11912322".to_vec();
    card.resize(20, 0);
    payload.extend_from_slice(&card);
    payload.extend_from_slice(&[0x01, 0x00]);
    payload.extend_from_slice(&98u16.to_le_bytes());
    payload.extend_from_slice(&3u16.to_le_bytes());
    payload.push(0x00);

    // Unregistered device: denied, pushed back to registration.
    let response = setup
        .adapter
        .process_frame(&device_frame("DEV001", 0x01, &payload))
        .await
        .unwrap();
    assert_eq!(response.payload()[0], MARKER_NAK);
    assert_eq!(setup.adapter.statistics().permission_denials, 1);

    // After registration the same event is accepted.
    setup
        .adapter
        .process_frame(&registration_frame("DEV001", "MA300"))
        .await
        .unwrap();
    let response = setup
        .adapter
        .process_frame(&device_frame("DEV001", 0x01, &payload))
        .await
        .unwrap();
    assert_eq!(response.payload()[0], MARKER_ACK);
}

#[tokio::test]
async fn test_permission_query_returns_permission_response() {
    let setup = entropy_setup(ProcessOutcome::ok(json!({"allowed": true, "door": 3}))).await;
    setup
        .adapter
        .process_frame(&registration_frame("DEV001", "MA300"))
        .await
        .unwrap();

    let mut payload = Vec::new();
    let mut card = b"11912322".to_vec();
    card.resize(20, 0);
    payload.extend_from_slice(&card);
    payload.extend_from_slice(&3u16.to_le_bytes());
    payload.push(0x00);

    let response = setup
        .adapter
        .process_frame(&device_frame("DEV001", MSG_PERMISSION_REQUEST, &payload))
        .await
        .unwrap();

    assert_eq!(response.payload()[0], MARKER_PERMISSION);
    assert_eq!(response.payload()[1], 0x01); // allowed
}

#[tokio::test]
async fn test_error_report_is_translated_and_acked() {
    let setup = entropy_setup(ProcessOutcome::ok_empty()).await;
    setup
        .adapter
        .process_frame(&registration_frame("DEV001", "MA300"))
        .await
        .unwrap();

    let mut payload = 0xBEEFu32.to_le_bytes().to_vec();
    payload.extend_from_slice(b"relay stuck");
    let response = setup
        .adapter
        .process_frame(&device_frame("DEV001", MSG_ERROR_REPORT, &payload))
        .await
        .unwrap();

    assert_eq!(response.payload()[0], MARKER_ACK);
    assert_eq!(setup.adapter.statistics().vendor_errors, 1);

    // Unmapped codes translate to UNKNOWN_ERROR, never an error.
    let translated = setup
        .adapter
        .handle_protocol_error(0xBEEF, "relay stuck", Some(&sn("DEV001")));
    assert_eq!(translated.info.internal_code, UNKNOWN_ERROR_CODE);
    assert_eq!(translated.info.recommended_action, "manual-investigate");
}

#[tokio::test]
async fn test_concurrent_registration_single_winner() {
    let setup = entropy_setup(ProcessOutcome::ok_empty()).await;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let adapter = Arc::clone(&setup.adapter);
        handles.push(tokio::spawn(async move {
            adapter.handle_registration(&sn("DEV001"), "MA300", HashMap::new())
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            RegistrationOutcome::Registered => winners += 1,
            RegistrationOutcome::AlreadyOnline => {}
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(setup.store.len(), 1);
    assert_eq!(
        setup.store.status(&sn("DEV001")),
        Some(SessionStatus::Online)
    );
}

#[tokio::test]
async fn test_registration_heartbeat_offline_scenario() {
    let mut setup = entropy_setup(ProcessOutcome::ok_empty()).await;

    // Registration brings the device Online (one transition event).
    setup
        .adapter
        .process_frame(&registration_frame("DEV001", "MA300"))
        .await
        .unwrap();
    assert_eq!(setup.events.recv().await.unwrap().to, SessionStatus::Online);

    // A heartbeat within the interval keeps it Online.
    setup
        .adapter
        .process_frame(&heartbeat_frame("DEV001"))
        .await
        .unwrap();
    assert_eq!(
        setup.store.status(&sn("DEV001")),
        Some(SessionStatus::Online)
    );

    // Three missed intervals flip it to Offline exactly once.
    let config = SweeperConfig {
        interval: Duration::from_millis(20),
        missed_threshold: 3,
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    let protocol = ProtocolType::from(entropy::PROTOCOL_TYPE);
    assert_eq!(sweep_protocol_once(&setup.store, &config, &protocol), 1);
    assert_eq!(sweep_protocol_once(&setup.store, &config, &protocol), 0);

    let event = setup.events.try_recv().unwrap();
    assert_eq!(event.from, SessionStatus::Online);
    assert_eq!(event.to, SessionStatus::Offline);
    assert!(setup.events.try_recv().is_err()); // exactly one alert

    // A resumed heartbeat promotes the device back.
    setup
        .adapter
        .process_frame(&heartbeat_frame("DEV001"))
        .await
        .unwrap();
    assert_eq!(
        setup.store.status(&sn("DEV001")),
        Some(SessionStatus::Online)
    );
}

#[tokio::test]
async fn test_parse_hex_round_trip() {
    let setup = entropy_setup(ProcessOutcome::ok_empty()).await;
    let frame = registration_frame("DEV001", "MA300");
    let hex_text = termlink_protocol::hex::encode(frame.as_bytes());

    let message = setup.adapter.parse_hex(&hex_text).unwrap();
    assert_eq!(message.device_sn().as_str(), "DEV001");
    assert_eq!(message.str_field("model"), Some("MA300"));

    // Responses can travel the hex transport too.
    let ack_hex = setup
        .adapter
        .build_response_hex(
            termlink_adapter::ResponseKind::Ack,
            &termlink_adapter::BusinessFields::new(),
            &sn("DEV001"),
            1,
        )
        .unwrap();
    let ack_bytes = termlink_protocol::hex::decode(&ack_hex).unwrap();
    let ack = Frame::parse(&ack_bytes).unwrap();
    assert_eq!(ack.payload()[0], MARKER_ACK);
}

#[tokio::test]
async fn test_corrupt_frame_is_counted_not_propagated_as_panic() {
    let setup = entropy_setup(ProcessOutcome::ok_empty()).await;
    let frame = heartbeat_frame("DEV001");
    let mut bytes = frame.as_bytes().to_vec();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;

    let result = setup.adapter.parse_message(&bytes);
    assert!(matches!(result, Err(Error::ChecksumMismatch { .. })));
    assert_eq!(setup.adapter.statistics().parse_errors, 1);
}

#[tokio::test]
async fn test_registry_routes_by_magic_and_keeps_serving() {
    let registry = ProtocolRegistry::new();
    let store = Arc::new(SessionStore::detached());
    let adapter = ProtocolAdapter::new(
        EntropyAccessCodec::new(),
        store,
        BusinessDispatcher::default(),
        Arc::new(MemoryConfigStore::new()),
    );
    adapter.initialize().await.unwrap();
    registry.register(AnyAdapter::Entropy(adapter)).unwrap();

    // A realand frame has no adapter here: typed error, nothing panics.
    let foreign = FrameBuilder::new(
        WireProfile::new(realand::MAGIC, realand::WIRE_VERSION),
        sn("ATT001"),
        0x03,
        0x00,
    )
    .timestamp(Utc::now().timestamp())
    .payload(&[0x1E, 0x00, 0x58, 0x02, 0x00, 0x00])
    .build()
    .unwrap();
    assert!(matches!(
        registry.resolve_frame(&foreign),
        Err(Error::UnsupportedProtocol(_))
    ));

    // The entropy path still serves.
    let resolved = registry.resolve_frame(&registration_frame("DEV001", "MA300"));
    assert!(resolved.is_ok());
}

#[tokio::test]
async fn test_zkteco_consume_pipeline() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use termlink_adapter::{ZktecoConsumeCodec, vendors::zkteco};

    let store = Arc::new(SessionStore::detached());
    let dispatcher = BusinessDispatcher::new(16);
    let mut handler_rx = dispatcher.register_handler(BusinessKind::Consume);
    let debit_calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&debit_calls);
    tokio::spawn(async move {
        while let Some(call) = handler_rx.recv().await {
            let reply = match call.business_type.as_str() {
                "ACCOUNT_QUERY" => ProcessOutcome::ok(json!({
                    "credential": call.payload.get("credential").cloned().unwrap_or(json!("")),
                    "balance_cents": 8750,
                })),
                "CONSUME_RECORD" => {
                    counter.fetch_add(1, Ordering::SeqCst);
                    ProcessOutcome::failure("INSUFFICIENT_BALANCE", "balance too low")
                }
                _ => ProcessOutcome::ok_empty(),
            };
            let _ = call.reply.send(reply);
        }
    });

    let adapter = ProtocolAdapter::new(
        ZktecoConsumeCodec::new(),
        Arc::clone(&store),
        dispatcher,
        Arc::new(MemoryConfigStore::new()),
    );
    adapter.initialize().await.unwrap();
    let profile = WireProfile::new(zkteco::MAGIC, zkteco::WIRE_VERSION);

    // Registration (type 0x0B): model + firmware, fixed 16-byte fields.
    let mut reg_payload = Vec::new();
    reg_payload.extend_from_slice(b"IC-600T\0\0\0\0\0\0\0\0\0");
    reg_payload.extend_from_slice(b"1.0.4\0\0\0\0\0\0\0\0\0\0\0");
    let registration = FrameBuilder::new(profile, sn("POS001"), 0x0B, 0x00)
        .timestamp(Utc::now().timestamp())
        .payload(&reg_payload)
        .build()
        .unwrap();
    let response = adapter.process_frame(&registration).await.unwrap();
    assert_eq!(response.payload()[0], MARKER_ACK);

    // Account query answers with the vendor's account response type.
    let query = FrameBuilder::new(profile, sn("POS001"), 0x04, 0x00)
        .sequence(2)
        .timestamp(Utc::now().timestamp())
        .payload(&zkteco::account_query_payload("20231109"))
        .build()
        .unwrap();
    let response = adapter.process_frame(&query).await.unwrap();
    assert_eq!(response.message_type(), 0x05);
    assert_eq!(&response.payload()[..8], b"20231109");
    assert_eq!(response.payload()[20..24], 8750u32.to_le_bytes());

    // A failed debit surfaces immediately: exactly one handler call.
    let mut consume_payload = Vec::new();
    consume_payload.extend_from_slice(&555u32.to_le_bytes());
    let mut card = b"20231109".to_vec();
    card.resize(20, 0);
    consume_payload.extend_from_slice(&card);
    consume_payload.extend_from_slice(&1250u32.to_le_bytes());
    consume_payload.extend_from_slice(&0u32.to_le_bytes());
    consume_payload.extend_from_slice(&[0x01, 0x01, 0x02]);
    let consume = FrameBuilder::new(profile, sn("POS001"), 0x01, 0x00)
        .sequence(3)
        .timestamp(Utc::now().timestamp())
        .payload(&consume_payload)
        .build()
        .unwrap();
    let response = adapter.process_frame(&consume).await.unwrap();
    assert_eq!(response.payload()[0], MARKER_NAK);
    assert_eq!(debit_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_realand_adapter_round_trip() {
    let store = Arc::new(SessionStore::detached());
    let dispatcher = BusinessDispatcher::new(16);
    let mut handler_rx = dispatcher.register_handler(BusinessKind::Attendance);
    tokio::spawn(async move {
        while let Some(call) = handler_rx.recv().await {
            let _ = call.reply.send(ProcessOutcome::ok_empty());
        }
    });

    let adapter = ProtocolAdapter::new(
        RealandAttendanceCodec::new(),
        Arc::clone(&store),
        dispatcher,
        Arc::new(MemoryConfigStore::new()),
    );
    adapter.initialize().await.unwrap();

    // Model + firmware, fixed 16-byte fields.
    let mut payload = Vec::new();
    payload.extend_from_slice(b"A-F261\0\0\0\0\0\0\0\0\0\0");
    payload.extend_from_slice(b"2.1.0\0\0\0\0\0\0\0\0\0\0\0");
    let registration = FrameBuilder::new(
        WireProfile::new(realand::MAGIC, realand::WIRE_VERSION),
        sn("ATT001"),
        0x05,
        0x00,
    )
    .timestamp(Utc::now().timestamp())
    .payload(&payload)
    .build()
    .unwrap();

    let response = adapter.process_frame(&registration).await.unwrap();
    assert_eq!(response.payload()[0], MARKER_ACK);
    assert_eq!(store.status(&sn("ATT001")), Some(SessionStatus::Online));
}
