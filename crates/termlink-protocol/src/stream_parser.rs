//! Incremental frame extraction from TCP byte streams.
//!
//! TCP delivers bytes without message boundaries: a single read may
//! hold a partial frame, several frames, or garbage between frames.
//! [`FrameExtractor`] buffers incoming bytes, hunts for a registered
//! protocol magic, reads the declared length from the envelope, and
//! yields complete raw frames for parsing.
//!
//! The extractor is deliberately ignorant of frame contents: checksum
//! and header validation happen in [`Frame::parse`](crate::Frame::parse)
//! so that a corrupt frame surfaces as a typed error instead of
//! silently desynchronizing the stream.

use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use termlink_core::constants::{MAX_FRAME_LEN, MIN_FRAME_LEN};

/// Buffer cap: a stream that accumulates this much without producing a
/// frame is either hostile or corrupt and is reset.
const MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Initial buffer capacity, sized for typical TCP reads.
const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;

/// Streaming frame extractor for the shared wire envelope.
///
/// # Example
/// ```
/// use termlink_protocol::FrameExtractor;
///
/// let mut extractor = FrameExtractor::new(vec![0x4845]);
///
/// // Feed a frame in two chunks (header split mid-way).
/// # use termlink_protocol::{FrameBuilder, WireProfile};
/// # use termlink_core::DeviceSn;
/// # let frame = FrameBuilder::new(
/// #     WireProfile::new(0x4845, 0x0480),
/// #     DeviceSn::new("DEV001").unwrap(),
/// #     0x03, 0x00,
/// # ).build().unwrap();
/// # let bytes = frame.as_bytes();
/// extractor.feed(&bytes[..10]);
/// assert!(extractor.next_frame().is_none());
/// extractor.feed(&bytes[10..]);
/// assert!(extractor.next_frame().is_some());
/// ```
#[derive(Debug)]
pub struct FrameExtractor {
    buffer: BytesMut,
    magics: Vec<u16>,
    frames: VecDeque<Bytes>,
}

impl FrameExtractor {
    /// Create an extractor accepting the given protocol magics.
    #[must_use]
    pub fn new(magics: Vec<u16>) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            magics,
            frames: VecDeque::new(),
        }
    }

    /// Append stream bytes and extract any complete frames.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
        self.extract_frames();

        if self.buffer.len() > MAX_BUFFER_SIZE {
            // No frame boundary within the cap: drop the buffer and
            // resynchronize on the next magic.
            self.buffer.clear();
        }
    }

    /// Pop the next complete raw frame, if any.
    #[must_use]
    pub fn next_frame(&mut self) -> Option<Bytes> {
        self.frames.pop_front()
    }

    /// Number of complete frames ready for extraction.
    #[must_use]
    pub fn frames_available(&self) -> usize {
        self.frames.len()
    }

    /// Discard all buffered bytes and queued frames.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.frames.clear();
    }

    fn extract_frames(&mut self) {
        loop {
            // Find the earliest registered magic in the buffer and
            // discard anything before it.
            let Some(start) = self.find_magic() else {
                // Keep the trailing byte: it may be the first half of a
                // magic split across feeds.
                if self.buffer.len() > 1 {
                    let keep_from = self.buffer.len() - 1;
                    let _ = self.buffer.split_to(keep_from);
                }
                return;
            };
            if start > 0 {
                let _ = self.buffer.split_to(start);
            }

            if self.buffer.len() < 4 {
                return; // need the length field
            }

            let declared = u16::from_le_bytes([self.buffer[2], self.buffer[3]]) as usize;
            if !(MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&declared) {
                // Implausible length: this was not a real frame start.
                // Skip the magic bytes and resynchronize.
                let _ = self.buffer.split_to(2);
                continue;
            }

            if self.buffer.len() < declared {
                return; // frame incomplete
            }

            let frame = self.buffer.split_to(declared).freeze();
            self.frames.push_back(frame);
        }
    }

    fn find_magic(&self) -> Option<usize> {
        if self.buffer.len() < 2 {
            return None;
        }
        (0..self.buffer.len() - 1).find(|&i| {
            let candidate = u16::from_le_bytes([self.buffer[i], self.buffer[i + 1]]);
            self.magics.contains(&candidate)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, FrameBuilder, WireProfile};
    use termlink_core::DeviceSn;

    const PROFILE: WireProfile = WireProfile::new(0x4845, 0x0480);

    fn frame_bytes(sn: &str, seq: u32) -> Bytes {
        FrameBuilder::new(PROFILE, DeviceSn::new(sn).unwrap(), 0x03, 0x00)
            .sequence(seq)
            .timestamp(1_700_000_000)
            .build()
            .unwrap()
            .to_bytes()
    }

    fn extractor() -> FrameExtractor {
        FrameExtractor::new(vec![0x4845])
    }

    #[test]
    fn test_complete_frame_single_feed() {
        let mut ex = extractor();
        ex.feed(&frame_bytes("DEV001", 1));

        assert_eq!(ex.frames_available(), 1);
        let frame = Frame::parse(&ex.next_frame().unwrap()).unwrap();
        assert_eq!(frame.device_sn().as_str(), "DEV001");
    }

    #[test]
    fn test_partial_frame_across_feeds() {
        let mut ex = extractor();
        let bytes = frame_bytes("DEV001", 1);

        ex.feed(&bytes[..7]);
        assert_eq!(ex.frames_available(), 0);

        ex.feed(&bytes[7..20]);
        assert_eq!(ex.frames_available(), 0);

        ex.feed(&bytes[20..]);
        assert_eq!(ex.frames_available(), 1);
    }

    #[test]
    fn test_byte_by_byte_feeding() {
        let mut ex = extractor();
        let bytes = frame_bytes("DEV001", 1);

        for &b in bytes.iter() {
            ex.feed(&[b]);
        }

        assert_eq!(ex.frames_available(), 1);
    }

    #[test]
    fn test_multiple_frames_in_one_feed() {
        let mut ex = extractor();
        let mut data = Vec::new();
        data.extend_from_slice(&frame_bytes("DEV001", 1));
        data.extend_from_slice(&frame_bytes("DEV002", 2));

        ex.feed(&data);

        assert_eq!(ex.frames_available(), 2);
        let first = Frame::parse(&ex.next_frame().unwrap()).unwrap();
        let second = Frame::parse(&ex.next_frame().unwrap()).unwrap();
        assert_eq!(first.device_sn().as_str(), "DEV001");
        assert_eq!(second.device_sn().as_str(), "DEV002");
    }

    #[test]
    fn test_garbage_before_frame_discarded() {
        let mut ex = extractor();
        let mut data = b"noise-bytes".to_vec();
        data.extend_from_slice(&frame_bytes("DEV001", 1));

        ex.feed(&data);

        assert_eq!(ex.frames_available(), 1);
    }

    #[test]
    fn test_unknown_magic_ignored() {
        let mut ex = extractor();
        // A frame from a vendor this extractor was not configured for.
        let foreign = FrameBuilder::new(
            WireProfile::new(0x5A4B, 0x0100),
            DeviceSn::new("DEV001").unwrap(),
            0x03,
            0x00,
        )
        .build()
        .unwrap();

        ex.feed(foreign.as_bytes());
        assert_eq!(ex.frames_available(), 0);
    }

    #[test]
    fn test_magic_split_across_feeds() {
        let mut ex = extractor();
        let bytes = frame_bytes("DEV001", 1);

        // Garbage, then only the first magic byte.
        let mut first = b"xx".to_vec();
        first.push(bytes[0]);
        ex.feed(&first);
        ex.feed(&bytes[1..]);

        assert_eq!(ex.frames_available(), 1);
    }

    #[test]
    fn test_implausible_length_resyncs() {
        let mut ex = extractor();
        // Magic followed by a declared length of 2 (below minimum),
        // then a real frame.
        let mut data = vec![0x45, 0x48, 0x02, 0x00];
        data.extend_from_slice(&frame_bytes("DEV001", 1));

        ex.feed(&data);

        assert_eq!(ex.frames_available(), 1);
    }

    #[test]
    fn test_false_start_yields_corrupt_frame_then_recovers() {
        let mut ex = extractor();
        // Garbage that happens to look like a frame start: magic plus a
        // plausible declared length. The extractor cannot tell, so it
        // yields the bytes as a frame and parsing reports the
        // corruption.
        ex.feed(&[0x45, 0x48, 0x28, 0x00]); // declared 40
        assert_eq!(ex.frames_available(), 0);
        ex.feed(&[0u8; 36]);

        assert_eq!(ex.frames_available(), 1);
        assert!(Frame::parse(&ex.next_frame().unwrap()).is_err());

        // The stream is not desynchronized afterwards.
        ex.feed(&frame_bytes("DEV001", 1));
        assert_eq!(ex.frames_available(), 1);
    }

    #[test]
    fn test_clear_resets_state() {
        let mut ex = extractor();
        ex.feed(&frame_bytes("DEV001", 1));
        ex.feed(&[0x45, 0x48]); // partial start

        ex.clear();

        assert_eq!(ex.frames_available(), 0);
        ex.feed(&frame_bytes("DEV002", 2));
        assert_eq!(ex.frames_available(), 1);
    }
}
