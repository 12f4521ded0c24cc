use thiserror::Error;

/// Unified error type for the termlink gateway.
///
/// Variants are grouped by propagation category (see [`ErrorCategory`]):
/// wire parse/build failures are dropped and counted, business failures
/// may be retried when idempotent, and session/permission failures force
/// the device back through the registration flow.
#[derive(Error, Debug)]
pub enum Error {
    // Wire parse errors
    #[error("Malformed frame header: {0}")]
    MalformedHeader(String),

    #[error("Unknown protocol magic: {magic:#06x}")]
    UnknownMagic { magic: u16 },

    #[error("Protocol version mismatch: expected {expected:#06x}, got {actual:#06x}")]
    VersionMismatch { expected: u16, actual: u16 },

    #[error("Checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("Unrecognized message type: {code:#04x}")]
    UnknownMessageType { code: u8 },

    #[error("Truncated frame: declared {declared} bytes, got {actual}")]
    TruncatedFrame { declared: usize, actual: usize },

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Frame too large: {size} bytes exceeds limit of {max_size}")]
    FrameTooLarge { size: usize, max_size: usize },

    #[error("Invalid hex input: {0}")]
    InvalidHex(String),

    // Wire build errors
    #[error("Missing business field: {0}")]
    MissingField(String),

    #[error("Field '{name}' cannot be serialized: {reason}")]
    UnserializableField { name: String, reason: String },

    #[error("Unsupported response kind: {0}")]
    UnsupportedResponse(String),

    // Routing and registry
    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("Protocol already registered: {0}")]
    DuplicateProtocol(String),

    // Session and permission
    #[error("Device not registered: {0}")]
    DeviceNotRegistered(String),

    #[error("Device {device} is not online (status: {status})")]
    DeviceNotOnline { device: String, status: String },

    #[error("Permission denied for device {device}: {reason}")]
    PermissionDenied { device: String, reason: String },

    #[error("Invalid session transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Device {device} is bound to protocol {bound}, got {got}")]
    ProtocolMismatch {
        device: String,
        bound: String,
        got: String,
    },

    #[error("Unsupported device model: {0}")]
    UnsupportedModel(String),

    // Business dispatch
    #[error("Business dispatch timed out after {timeout_ms}ms")]
    DispatchTimeout { timeout_ms: u64 },

    #[error("Business dispatch cancelled")]
    DispatchCancelled,

    #[error("Business handler unavailable: {0}")]
    HandlerUnavailable(String),

    #[error("Business kind {kind} not supported by protocol {protocol}")]
    UnsupportedBusiness { kind: String, protocol: String },

    #[error("Ingest queue full")]
    QueueFull,

    // Identifier validation
    #[error("Invalid device serial: {0}")]
    InvalidDeviceSn(String),

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    // Adapter lifecycle
    #[error("Adapter initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Adapter not running (state: {0})")]
    AdapterNotRunning(String),

    // Configuration
    #[error("Configuration error: {0}")]
    Config(String),

    // IO
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Propagation category of an error (see the error-handling design).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed wire data. Dropped and counted, never retried.
    Wire,
    /// Downstream handler failure or timeout. Retried only when idempotent.
    Business,
    /// Unregistered, offline, or unauthorized device. Forces re-registration.
    Session,
    /// Everything else (configuration, IO, lifecycle).
    Internal,
}

impl Error {
    /// Classify this error for statistics and propagation policy.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::MalformedHeader(_)
            | Error::UnknownMagic { .. }
            | Error::VersionMismatch { .. }
            | Error::ChecksumMismatch { .. }
            | Error::UnknownMessageType { .. }
            | Error::TruncatedFrame { .. }
            | Error::MalformedPayload(_)
            | Error::FrameTooLarge { .. }
            | Error::InvalidHex(_)
            | Error::MissingField(_)
            | Error::UnserializableField { .. }
            | Error::UnsupportedResponse(_) => ErrorCategory::Wire,

            Error::DispatchTimeout { .. }
            | Error::DispatchCancelled
            | Error::HandlerUnavailable(_)
            | Error::UnsupportedBusiness { .. }
            | Error::QueueFull => ErrorCategory::Business,

            Error::DeviceNotRegistered(_)
            | Error::DeviceNotOnline { .. }
            | Error::PermissionDenied { .. }
            | Error::InvalidTransition { .. }
            | Error::ProtocolMismatch { .. }
            | Error::UnsupportedModel(_) => ErrorCategory::Session,

            _ => ErrorCategory::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
