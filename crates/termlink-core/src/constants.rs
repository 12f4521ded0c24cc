//! Protocol-level constants shared by all termlink crates.
//!
//! The supported vendor protocols share a common little-endian binary
//! envelope; only the payload layout and the magic/version pair differ
//! per vendor. The envelope layout is:
//!
//! ```text
//! offset  size  field
//! 0       2     protocol magic (u16, vendor specific)
//! 2       2     frame length (u16, header + payload + checksum)
//! 4       2     protocol version (u16, vendor specific)
//! 6       16    device serial (ASCII, NUL padded)
//! 22      1     message type code
//! 23      1     command code
//! 24      4     sequence number (u32)
//! 28      8     timestamp (i64, unix seconds)
//! 36      n     payload (vendor specific)
//! 36+n    4     checksum (u32, additive over preceding bytes)
//! ```

// ============================================================================
// Frame envelope layout
// ============================================================================

/// Size of the fixed frame header in bytes.
pub const FRAME_HEADER_LEN: usize = 36;

/// Size of the trailing checksum in bytes.
pub const FRAME_CHECKSUM_LEN: usize = 4;

/// Minimum total frame size (header + checksum, empty payload).
pub const MIN_FRAME_LEN: usize = FRAME_HEADER_LEN + FRAME_CHECKSUM_LEN;

/// Maximum accepted frame size.
///
/// Device terminals emit small event/status records; anything beyond
/// this limit indicates corruption or a hostile peer and is rejected
/// before buffering.
pub const MAX_FRAME_LEN: usize = 8 * 1024;

/// Width of the device-serial field in the frame header.
pub const DEVICE_SN_WIRE_LEN: usize = 16;

/// Width of credential (card/face/fingerprint token) fields in vendor
/// payloads that carry them as fixed-size ASCII.
pub const CREDENTIAL_WIRE_LEN: usize = 20;

// ============================================================================
// Identifier constraints
// ============================================================================

/// Minimum device serial length (characters).
pub const MIN_DEVICE_SN_LEN: usize = 1;

/// Maximum device serial length; bounded by the wire field width.
pub const MAX_DEVICE_SN_LEN: usize = DEVICE_SN_WIRE_LEN;

/// Minimum credential identifier length (characters).
pub const MIN_CREDENTIAL_LEN: usize = 3;

/// Maximum credential identifier length (characters).
pub const MAX_CREDENTIAL_LEN: usize = CREDENTIAL_WIRE_LEN;

// ============================================================================
// Timing defaults
// ============================================================================

/// Accepted clock skew between a message timestamp and the gateway
/// clock (seconds). Messages older than this window are rejected to
/// mitigate replay.
pub const DEFAULT_CLOCK_SKEW_TOLERANCE_SECS: i64 = 300;

/// Expected heartbeat interval for a registered device (seconds).
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Number of consecutive missed heartbeat intervals before a session
/// is demoted to Offline.
pub const DEFAULT_MISSED_HEARTBEAT_THRESHOLD: u32 = 3;

/// Default per-call timeout for business dispatch (milliseconds).
pub const DEFAULT_DISPATCH_TIMEOUT_MS: u64 = 3000;

/// Lower bound for the configurable dispatch timeout.
pub const MIN_DISPATCH_TIMEOUT_MS: u64 = 500;

/// Upper bound for the configurable dispatch timeout.
pub const MAX_DISPATCH_TIMEOUT_MS: u64 = 10_000;

/// Grace period granted to in-flight dispatches when an adapter is
/// destroyed (milliseconds); remaining calls resolve as cancelled.
pub const DEFAULT_DESTROY_GRACE_MS: u64 = 2000;

// ============================================================================
// Resilience limits
// ============================================================================

/// Consecutive checksum failures before a session is moved to the
/// Error state and forced through re-registration.
pub const DEFAULT_CHECKSUM_FAILURE_LIMIT: u32 = 5;

/// Default bound of the per-connection ingest queue.
pub const DEFAULT_INGEST_QUEUE_DEPTH: usize = 64;

/// Default bound of a business handler's call channel.
pub const DEFAULT_HANDLER_QUEUE_DEPTH: usize = 128;

/// Default retry ceiling for idempotent business operations.
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 2;

/// Default delay between retry attempts (milliseconds).
pub const DEFAULT_RETRY_DELAY_MS: u64 = 200;
