//! Property-based tests for the wire envelope.
//!
//! Verifies that build -> parse is the identity for arbitrary valid
//! header and payload combinations, and that the streaming extractor
//! recovers every frame regardless of how the byte stream is chunked.

use proptest::prelude::*;
use termlink_core::DeviceSn;
use termlink_protocol::{Frame, FrameBuilder, FrameExtractor, WireProfile};

/// Strategy for valid device serials (1-16 chars).
fn valid_device_sn() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z0-9][A-Z0-9_-]{0,15}")
        .expect("Failed to create device serial strategy")
}

/// Strategy for vendor payloads (bounded, arbitrary bytes).
fn payload() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..512)
}

fn magic_and_version() -> impl Strategy<Value = (u16, u16)> {
    // Real vendor magics plus arbitrary ones; version is free.
    prop_oneof![
        Just((0x4845u16, 0x0480u16)),
        Just((0x5A4Bu16, 0x0100u16)),
        (1u16..u16::MAX, any::<u16>()),
    ]
}

proptest! {
    /// Build -> parse preserves every header field and the payload.
    #[test]
    fn prop_frame_round_trip(
        (magic, version) in magic_and_version(),
        sn in valid_device_sn(),
        message_type in any::<u8>(),
        command in any::<u8>(),
        sequence in any::<u32>(),
        timestamp in 0i64..4_102_444_800, // through year 2100
        payload in payload(),
    ) {
        let profile = WireProfile::new(magic, version);
        let device_sn = DeviceSn::new(&sn).unwrap();

        let frame = FrameBuilder::new(profile, device_sn.clone(), message_type, command)
            .sequence(sequence)
            .timestamp(timestamp)
            .payload(&payload)
            .build()
            .unwrap();

        let parsed = Frame::parse(frame.as_bytes()).unwrap();

        prop_assert_eq!(parsed.magic(), magic);
        prop_assert_eq!(parsed.version(), version);
        prop_assert_eq!(parsed.device_sn(), &device_sn);
        prop_assert_eq!(parsed.message_type(), message_type);
        prop_assert_eq!(parsed.command(), command);
        prop_assert_eq!(parsed.sequence(), sequence);
        prop_assert_eq!(parsed.timestamp(), timestamp);
        prop_assert_eq!(parsed.payload(), &payload[..]);
        prop_assert_eq!(parsed.as_bytes(), frame.as_bytes());
    }

    /// Truncating a frame anywhere always yields a typed error, never
    /// a panic or a bogus frame.
    #[test]
    fn prop_truncated_frame_is_error(
        sn in valid_device_sn(),
        payload in payload(),
        cut in 0usize..100,
    ) {
        let profile = WireProfile::new(0x4845, 0x0480);
        let frame = FrameBuilder::new(profile, DeviceSn::new(&sn).unwrap(), 0x01, 0x00)
            .payload(&payload)
            .build()
            .unwrap();

        let bytes = frame.as_bytes();
        let cut = cut.min(bytes.len().saturating_sub(1));
        prop_assert!(Frame::parse(&bytes[..cut]).is_err());
    }

    /// Flipping any single byte of the body is caught by the checksum
    /// (or by header validation).
    #[test]
    fn prop_corruption_detected(
        sn in valid_device_sn(),
        payload in prop::collection::vec(any::<u8>(), 1..128),
        flip_at in 0usize..64,
        flip_mask in 1u8..=255,
    ) {
        let profile = WireProfile::new(0x4845, 0x0480);
        let frame = FrameBuilder::new(profile, DeviceSn::new(&sn).unwrap(), 0x01, 0x00)
            .payload(&payload)
            .build()
            .unwrap();

        let mut bytes = frame.as_bytes().to_vec();
        let idx = flip_at % bytes.len();
        bytes[idx] ^= flip_mask;

        // A flip in the body shifts the additive sum, a flip in the
        // trailer breaks the stored value, and a flip in the length
        // field breaks the declared/actual match.
        prop_assert!(Frame::parse(&bytes).is_err());
    }

    /// The extractor recovers all frames from a stream regardless of
    /// chunk boundaries.
    #[test]
    fn prop_extractor_chunking_invariant(
        sns in prop::collection::vec(valid_device_sn(), 1..5),
        chunk_size in 1usize..64,
    ) {
        let profile = WireProfile::new(0x4845, 0x0480);
        let mut stream = Vec::new();
        for sn in &sns {
            let frame = FrameBuilder::new(profile, DeviceSn::new(sn).unwrap(), 0x03, 0x00)
                .build()
                .unwrap();
            stream.extend_from_slice(frame.as_bytes());
        }

        let mut extractor = FrameExtractor::new(vec![0x4845]);
        for chunk in stream.chunks(chunk_size) {
            extractor.feed(chunk);
        }

        let mut recovered = Vec::new();
        while let Some(raw) = extractor.next_frame() {
            recovered.push(Frame::parse(&raw).unwrap().device_sn().as_str().to_string());
        }

        let expected: Vec<String> = sns
            .iter()
            .map(|sn| DeviceSn::new(sn).unwrap().as_str().to_string())
            .collect();
        prop_assert_eq!(recovered, expected);
    }
}
