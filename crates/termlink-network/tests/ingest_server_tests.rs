//! Ingest server integration tests: real TCP connections running the
//! registration/heartbeat pipeline, plus resilience to garbage bytes,
//! corrupt frames, and unsupported protocols.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use termlink_adapter::{
    AnyAdapter, BusinessDispatcher, EntropyAccessCodec, MemoryConfigStore, ProcessOutcome,
    ProtocolAdapter, ProtocolRegistry,
    vendors::{entropy, realand},
};
use termlink_core::{BusinessKind, DeviceSn, SessionStatus};
use termlink_network::{BackpressurePolicy, IngestConfig, IngestServer};
use termlink_protocol::{Frame, FrameBuilder, FrameExtractor, WireProfile};
use termlink_session::SessionStore;

const PROFILE: WireProfile = WireProfile::new(entropy::MAGIC, entropy::WIRE_VERSION);
const MARKER_ACK: u8 = 0x01;
const MARKER_NAK: u8 = 0x02;

async fn start_server() -> (std::net::SocketAddr, Arc<SessionStore>) {
    let store = Arc::new(SessionStore::detached());

    let dispatcher = BusinessDispatcher::new(16);
    let mut handler_rx = dispatcher.register_handler(BusinessKind::Access);
    tokio::spawn(async move {
        while let Some(call) = handler_rx.recv().await {
            let _ = call.reply.send(ProcessOutcome::ok(json!({"accepted": true})));
        }
    });

    let adapter = ProtocolAdapter::new(
        EntropyAccessCodec::new(),
        Arc::clone(&store),
        dispatcher,
        Arc::new(MemoryConfigStore::new()),
    );
    adapter.initialize().await.unwrap();

    let registry = Arc::new(ProtocolRegistry::new());
    registry.register(AnyAdapter::Entropy(adapter)).unwrap();

    let config = IngestConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        max_connections: 16,
        queue_depth: 32,
        backpressure: BackpressurePolicy::RejectNew,
    };
    let server = IngestServer::bind(config, registry).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());

    (addr, store)
}

fn sn(s: &str) -> DeviceSn {
    DeviceSn::new(s).unwrap()
}

fn registration_frame(device: &str, model: &str) -> Frame {
    FrameBuilder::new(PROFILE, sn(device), 0x07, 0x00)
        .sequence(1)
        .timestamp(Utc::now().timestamp())
        .payload(&entropy::registration_payload(model, "4.8.1"))
        .build()
        .unwrap()
}

fn heartbeat_frame(device: &str, seq: u32) -> Frame {
    FrameBuilder::new(PROFILE, sn(device), 0x03, 0x00)
        .sequence(seq)
        .timestamp(Utc::now().timestamp())
        .payload(&entropy::heartbeat_payload(30, 600))
        .build()
        .unwrap()
}

/// Read until one complete frame arrives on the client socket.
async fn read_response(stream: &mut TcpStream) -> Frame {
    let mut extractor = FrameExtractor::new(vec![entropy::MAGIC]);
    let mut buf = [0u8; 1024];
    loop {
        if let Some(raw) = extractor.next_frame() {
            return Frame::parse(&raw).unwrap();
        }
        let n = timeout(Duration::from_secs(2), stream.read(&mut buf))
            .await
            .expect("timed out waiting for response")
            .unwrap();
        assert!(n > 0, "server closed the connection");
        extractor.feed(&buf[..n]);
    }
}

#[tokio::test]
async fn test_registration_and_heartbeat_over_tcp() {
    let (addr, store) = start_server().await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    client
        .write_all(registration_frame("DEV001", "MA300").as_bytes())
        .await
        .unwrap();
    let response = read_response(&mut client).await;
    assert_eq!(response.payload()[0], MARKER_ACK);
    assert_eq!(store.status(&sn("DEV001")), Some(SessionStatus::Online));

    client
        .write_all(heartbeat_frame("DEV001", 2).as_bytes())
        .await
        .unwrap();
    let response = read_response(&mut client).await;
    assert_eq!(response.payload()[0], MARKER_ACK);
    assert_eq!(response.sequence(), 2);
}

#[tokio::test]
async fn test_frames_processed_in_arrival_order() {
    let (addr, _store) = start_server().await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    // Registration plus a burst of heartbeats in one write.
    let mut bytes = registration_frame("DEV002", "F18").as_bytes().to_vec();
    for seq in 2..=5 {
        bytes.extend_from_slice(heartbeat_frame("DEV002", seq).as_bytes());
    }
    client.write_all(&bytes).await.unwrap();

    let registration_ack = read_response(&mut client).await;
    assert_eq!(registration_ack.sequence(), 1);
    for seq in 2..=5 {
        let response = read_response(&mut client).await;
        assert_eq!(response.sequence(), seq);
        assert_eq!(response.payload()[0], MARKER_ACK);
    }
}

#[tokio::test]
async fn test_garbage_between_frames_is_skipped() {
    let (addr, store) = start_server().await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    let mut bytes = b"line-noise-prefix".to_vec();
    bytes.extend_from_slice(registration_frame("DEV003", "SC405").as_bytes());
    client.write_all(&bytes).await.unwrap();

    let response = read_response(&mut client).await;
    assert_eq!(response.payload()[0], MARKER_ACK);
    assert_eq!(store.status(&sn("DEV003")), Some(SessionStatus::Online));
}

#[tokio::test]
async fn test_corrupt_frame_does_not_kill_connection() {
    let (addr, store) = start_server().await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    let mut corrupt = registration_frame("DEV004", "MA300").as_bytes().to_vec();
    let last = corrupt.len() - 1;
    corrupt[last] ^= 0xFF; // break the checksum
    client.write_all(&corrupt).await.unwrap();

    // The corrupt frame is dropped; a valid one on the same connection
    // still goes through.
    client
        .write_all(registration_frame("DEV004", "MA300").as_bytes())
        .await
        .unwrap();
    let response = read_response(&mut client).await;
    assert_eq!(response.payload()[0], MARKER_ACK);
    assert_eq!(store.status(&sn("DEV004")), Some(SessionStatus::Online));
}

#[tokio::test]
async fn test_unsupported_protocol_keeps_pipeline_serving() {
    let (addr, store) = start_server().await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    // A realand frame on a registry that only carries the access
    // adapter: no response, no disconnect. Fixed timestamp so none of
    // its bytes can mimic the access magic mid-stream.
    let foreign = FrameBuilder::new(
        WireProfile::new(realand::MAGIC, realand::WIRE_VERSION),
        sn("ATT001"),
        0x03,
        0x00,
    )
    .timestamp(1_700_000_000)
    .payload(&[0x1E, 0x00, 0x58, 0x02, 0x00, 0x00])
    .build()
    .unwrap();
    client.write_all(foreign.as_bytes()).await.unwrap();

    client
        .write_all(registration_frame("DEV005", "WK2600").as_bytes())
        .await
        .unwrap();
    let response = read_response(&mut client).await;
    assert_eq!(response.payload()[0], MARKER_ACK);
    assert_eq!(store.status(&sn("DEV005")), Some(SessionStatus::Online));
}

#[tokio::test]
async fn test_unsupported_model_gets_nak_over_tcp() {
    let (addr, store) = start_server().await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    client
        .write_all(registration_frame("DEV006", "X9000").as_bytes())
        .await
        .unwrap();
    let response = read_response(&mut client).await;
    assert_eq!(response.payload()[0], MARKER_NAK);
    assert_ne!(store.status(&sn("DEV006")), Some(SessionStatus::Online));
}

#[tokio::test]
async fn test_independent_connections() {
    let (addr, store) = start_server().await;

    let mut first = TcpStream::connect(addr).await.unwrap();
    let mut second = TcpStream::connect(addr).await.unwrap();

    first
        .write_all(registration_frame("DEV007", "MA300").as_bytes())
        .await
        .unwrap();
    second
        .write_all(registration_frame("DEV008", "TA800C").as_bytes())
        .await
        .unwrap();

    assert_eq!(read_response(&mut first).await.payload()[0], MARKER_ACK);
    assert_eq!(read_response(&mut second).await.payload()[0], MARKER_ACK);
    assert_eq!(store.status(&sn("DEV007")), Some(SessionStatus::Online));
    assert_eq!(store.status(&sn("DEV008")), Some(SessionStatus::Online));
}
