//! Binary frame envelope shared by all vendor protocols.
//!
//! A frame is the unit of transmission between a terminal and the
//! gateway. The fixed 36-byte header identifies the vendor protocol
//! (magic + version), the device, and the message; a trailing u32
//! additive checksum covers everything before it.
//!
//! ```text
//! <magic:u16> <len:u16> <version:u16> <serial:[u8;16]>
//! <type:u8> <command:u8> <sequence:u32> <timestamp:i64>
//! <payload:[u8]> <checksum:u32>
//! ```
//!
//! All integers are little endian, matching the vendor firmware.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use termlink_core::{DeviceSn, Error, Result, constants::*};

/// Per-vendor wire identity: the magic and version carried in every
/// frame of that protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireProfile {
    pub magic: u16,
    pub version: u16,
}

impl WireProfile {
    #[must_use]
    pub const fn new(magic: u16, version: u16) -> Self {
        Self { magic, version }
    }
}

/// Additive checksum over a byte slice (u32 wrapping sum).
///
/// The vendor specifications reserve a 4-byte trailer but leave the
/// algorithm to the integration; the gateway uses a byte-wise wrapping
/// sum so round-trips are verifiable.
#[must_use]
pub fn frame_checksum(data: &[u8]) -> u32 {
    data.iter().fold(0u32, |acc, &b| acc.wrapping_add(b as u32))
}

/// A parsed (or freshly built) wire frame.
///
/// Frames are immutable once constructed. `raw` always holds the exact
/// wire bytes, so a parsed frame can be re-verified or echoed without
/// re-encoding.
#[derive(Debug, Clone)]
pub struct Frame {
    magic: u16,
    version: u16,
    device_sn: DeviceSn,
    message_type: u8,
    command: u8,
    sequence: u32,
    /// Unix seconds, as carried on the wire.
    timestamp: i64,
    payload: Bytes,
    raw: Bytes,
}

impl Frame {
    /// Parse a complete frame from wire bytes.
    ///
    /// The input must contain exactly one frame; the declared length
    /// must match the input length. The checksum is verified here;
    /// corrupt frames never produce a `Frame`.
    ///
    /// # Errors
    /// - `Error::MalformedHeader` if the input is shorter than the
    ///   fixed header or the serial field is invalid
    /// - `Error::TruncatedFrame` if the declared length disagrees with
    ///   the input length
    /// - `Error::FrameTooLarge` if the declared length exceeds
    ///   [`MAX_FRAME_LEN`]
    /// - `Error::ChecksumMismatch` if the trailer does not match
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MIN_FRAME_LEN {
            return Err(Error::MalformedHeader(format!(
                "frame shorter than fixed envelope: {} < {MIN_FRAME_LEN}",
                bytes.len()
            )));
        }

        let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
        let declared = u16::from_le_bytes([bytes[2], bytes[3]]) as usize;

        if declared > MAX_FRAME_LEN {
            return Err(Error::FrameTooLarge {
                size: declared,
                max_size: MAX_FRAME_LEN,
            });
        }
        if declared != bytes.len() {
            return Err(Error::TruncatedFrame {
                declared,
                actual: bytes.len(),
            });
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        let device_sn = DeviceSn::from_wire_bytes(&bytes[6..6 + DEVICE_SN_WIRE_LEN])
            .map_err(|e| Error::MalformedHeader(format!("bad serial field: {e}")))?;

        let message_type = bytes[22];
        let command = bytes[23];
        let sequence = u32::from_le_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]);
        let timestamp = i64::from_le_bytes([
            bytes[28], bytes[29], bytes[30], bytes[31], bytes[32], bytes[33], bytes[34], bytes[35],
        ]);

        let body_end = bytes.len() - FRAME_CHECKSUM_LEN;
        let stored = u32::from_le_bytes([
            bytes[body_end],
            bytes[body_end + 1],
            bytes[body_end + 2],
            bytes[body_end + 3],
        ]);
        let computed = frame_checksum(&bytes[..body_end]);
        if stored != computed {
            return Err(Error::ChecksumMismatch {
                expected: computed,
                actual: stored,
            });
        }

        Ok(Frame {
            magic,
            version,
            device_sn,
            message_type,
            command,
            sequence,
            timestamp,
            payload: Bytes::copy_from_slice(&bytes[FRAME_HEADER_LEN..body_end]),
            raw: Bytes::copy_from_slice(bytes),
        })
    }

    /// Parse and additionally enforce a vendor's magic/version pair.
    ///
    /// # Errors
    /// As [`Frame::parse`], plus `Error::UnknownMagic` and
    /// `Error::VersionMismatch` when the envelope does not belong to
    /// the given profile.
    pub fn parse_with_profile(bytes: &[u8], profile: &WireProfile) -> Result<Self> {
        let frame = Self::parse(bytes)?;
        if frame.magic != profile.magic {
            return Err(Error::UnknownMagic { magic: frame.magic });
        }
        if frame.version != profile.version {
            return Err(Error::VersionMismatch {
                expected: profile.version,
                actual: frame.version,
            });
        }
        Ok(frame)
    }

    /// Peek at the magic of a buffered frame without full parsing.
    ///
    /// Used by the router to select an adapter before the vendor codec
    /// runs. Returns `None` for inputs shorter than the magic field.
    #[must_use]
    pub fn peek_magic(bytes: &[u8]) -> Option<u16> {
        if bytes.len() < 2 {
            return None;
        }
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    #[must_use]
    pub fn magic(&self) -> u16 {
        self.magic
    }

    #[must_use]
    pub fn version(&self) -> u16 {
        self.version
    }

    #[must_use]
    pub fn device_sn(&self) -> &DeviceSn {
        &self.device_sn
    }

    #[must_use]
    pub fn message_type(&self) -> u8 {
        self.message_type
    }

    #[must_use]
    pub fn command(&self) -> u8 {
        self.command
    }

    #[must_use]
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Wire timestamp (unix seconds).
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The exact wire bytes of this frame.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        self.raw.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Re-verify the checksum against the stored wire bytes.
    ///
    /// A parsed frame always starts out valid; this exists so
    /// validation can re-check a message that has been held for a
    /// while, per the adapter contract.
    #[must_use]
    pub fn verify_checksum(&self) -> bool {
        let body_end = self.raw.len() - FRAME_CHECKSUM_LEN;
        let stored = u32::from_le_bytes([
            self.raw[body_end],
            self.raw[body_end + 1],
            self.raw[body_end + 2],
            self.raw[body_end + 3],
        ]);
        stored == frame_checksum(&self.raw[..body_end])
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frame[magic={:#06x}, sn={}, type={:#04x}, cmd={:#04x}, seq={}, len={}]",
            self.magic,
            self.device_sn,
            self.message_type,
            self.command,
            self.sequence,
            self.raw.len()
        )
    }
}

/// Builder for outbound frames.
///
/// Length and checksum are computed in `build()`; a failed build
/// produces no partial output.
///
/// # Example
/// ```
/// use termlink_protocol::{Frame, FrameBuilder, WireProfile};
/// use termlink_core::DeviceSn;
///
/// let profile = WireProfile::new(0x4845, 0x0480);
/// let sn = DeviceSn::new("DEV001").unwrap();
/// let frame = FrameBuilder::new(profile, sn, 0x03, 0x00)
///     .sequence(7)
///     .timestamp(1_700_000_000)
///     .payload(&[0x01, 0x02])
///     .build()
///     .unwrap();
///
/// let parsed = Frame::parse(frame.as_bytes()).unwrap();
/// assert_eq!(parsed.sequence(), 7);
/// assert_eq!(parsed.payload(), &[0x01, 0x02]);
/// ```
#[derive(Debug)]
pub struct FrameBuilder {
    profile: WireProfile,
    device_sn: DeviceSn,
    message_type: u8,
    command: u8,
    sequence: u32,
    timestamp: i64,
    payload: Vec<u8>,
}

impl FrameBuilder {
    #[must_use]
    pub fn new(profile: WireProfile, device_sn: DeviceSn, message_type: u8, command: u8) -> Self {
        Self {
            profile,
            device_sn,
            message_type,
            command,
            sequence: 0,
            timestamp: 0,
            payload: Vec::new(),
        }
    }

    #[must_use]
    pub fn sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    /// Wire timestamp in unix seconds.
    #[must_use]
    pub fn timestamp(mut self, unix_secs: i64) -> Self {
        self.timestamp = unix_secs;
        self
    }

    #[must_use]
    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    /// Assemble the frame, computing length and checksum.
    ///
    /// # Errors
    /// Returns `Error::FrameTooLarge` if the payload would push the
    /// frame beyond [`MAX_FRAME_LEN`].
    pub fn build(self) -> Result<Frame> {
        let total = FRAME_HEADER_LEN + self.payload.len() + FRAME_CHECKSUM_LEN;
        if total > MAX_FRAME_LEN {
            return Err(Error::FrameTooLarge {
                size: total,
                max_size: MAX_FRAME_LEN,
            });
        }

        let mut buf = BytesMut::with_capacity(total);
        buf.put_u16_le(self.profile.magic);
        buf.put_u16_le(total as u16);
        buf.put_u16_le(self.profile.version);
        buf.put_slice(&self.device_sn.to_wire_bytes());
        buf.put_u8(self.message_type);
        buf.put_u8(self.command);
        buf.put_u32_le(self.sequence);
        buf.put_i64_le(self.timestamp);
        buf.put_slice(&self.payload);

        let checksum = frame_checksum(&buf);
        buf.put_u32_le(checksum);

        let raw = buf.freeze();
        Ok(Frame {
            magic: self.profile.magic,
            version: self.profile.version,
            device_sn: self.device_sn,
            message_type: self.message_type,
            command: self.command,
            sequence: self.sequence,
            timestamp: self.timestamp,
            payload: raw.slice(FRAME_HEADER_LEN..raw.len() - FRAME_CHECKSUM_LEN),
            raw,
        })
    }
}
