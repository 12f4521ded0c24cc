//! Benchmark tests for frame construction and message decoding.
//!
//! These benchmarks establish performance baselines for the critical
//! protocol operations so regressions show up before they reach a
//! gateway deployment: every event a terminal uploads goes through
//! build/parse plus the field lookups measured here.

use criterion::{Criterion, criterion_group, criterion_main};
use serde_json::json;
use std::hint::black_box;
use termlink_core::{DeviceSn, ProtocolType};
use termlink_protocol::{Frame, FrameBuilder, MessageKind, ProtocolMessage, WireProfile};

const PROFILE: WireProfile = WireProfile::new(0x4845, 0x0480);

fn event_payload() -> Vec<u8> {
    let mut payload = vec![0x01];
    payload.extend_from_slice(&42u32.to_le_bytes());
    payload.extend_from_slice(&1001u32.to_le_bytes());
    let mut card = b"11912322".to_vec();
    card.resize(20, 0);
    payload.extend_from_slice(&card);
    payload.extend_from_slice(&[0x01, 0x00]);
    payload.extend_from_slice(&98u16.to_le_bytes());
    payload.extend_from_slice(&3u16.to_le_bytes());
    payload.push(0x00);
    payload
}

/// Benchmark: build an access event frame.
///
/// This is on the critical path for every response the gateway writes
/// back to a terminal.
fn bench_build_event_frame(c: &mut Criterion) {
    let device_sn = DeviceSn::new("DEV001").expect("valid serial");
    let payload = event_payload();

    c.bench_function("build_event_frame", |b| {
        b.iter(|| {
            FrameBuilder::new(PROFILE, device_sn.clone(), 0x01, 0x00)
                .sequence(black_box(42))
                .timestamp(1_700_000_000)
                .payload(black_box(&payload))
                .build()
                .expect("valid frame")
        })
    });
}

/// Benchmark: parse an event frame from wire bytes (includes checksum
/// verification).
fn bench_parse_event_frame(c: &mut Criterion) {
    let device_sn = DeviceSn::new("DEV001").expect("valid serial");
    let frame = FrameBuilder::new(PROFILE, device_sn, 0x01, 0x00)
        .sequence(42)
        .timestamp(1_700_000_000)
        .payload(&event_payload())
        .build()
        .expect("valid frame");
    let bytes = frame.as_bytes().to_vec();

    c.bench_function("parse_event_frame", |b| {
        b.iter(|| Frame::parse(black_box(&bytes)).expect("valid frame"))
    });
}

/// Benchmark: assemble a canonical message and look up its fields.
fn bench_message_field_lookup(c: &mut Criterion) {
    let device_sn = DeviceSn::new("DEV001").expect("valid serial");
    let frame = FrameBuilder::new(PROFILE, device_sn, 0x01, 0x00)
        .sequence(42)
        .timestamp(1_700_000_000)
        .payload(&event_payload())
        .build()
        .expect("valid frame");

    let fields = vec![
        ("event_type".to_string(), json!("CARD")),
        ("event_no".to_string(), json!(42)),
        ("user_id".to_string(), json!(1001)),
        ("credential".to_string(), json!("11912322")),
        ("verify_result".to_string(), json!("SUCCESS")),
        ("door".to_string(), json!(3)),
        ("direction".to_string(), json!("in")),
    ];

    c.bench_function("message_field_lookup", |b| {
        b.iter(|| {
            let message = ProtocolMessage::from_frame(
                ProtocolType::from("access-entropy-v48"),
                black_box(&frame),
                MessageKind::BusinessEvent,
                fields.clone(),
            );
            let credential = message.str_field("credential");
            let door = message.i64_field("door");
            black_box((credential, door));
        })
    });
}

criterion_group!(
    benches,
    bench_build_event_frame,
    bench_parse_event_frame,
    bench_message_field_lookup
);
criterion_main!(benches);
