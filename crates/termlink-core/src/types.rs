use crate::{
    Result,
    constants::{
        DEVICE_SN_WIRE_LEN, MAX_CREDENTIAL_LEN, MAX_DEVICE_SN_LEN, MIN_CREDENTIAL_LEN,
        MIN_DEVICE_SN_LEN,
    },
    error::Error,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;

/// Device serial number (1-16 ASCII characters).
///
/// Serials are carried on the wire as a NUL-padded 16-byte field and
/// are normalized to uppercase so lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceSn(String);

impl DeviceSn {
    /// Create a device serial with validation.
    ///
    /// The serial is trimmed and uppercased before validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidDeviceSn` if the serial is empty, longer
    /// than 16 characters, or contains characters outside
    /// `[A-Z0-9_-]`.
    pub fn new(sn: &str) -> Result<Self> {
        let sn = sn.trim().to_uppercase();

        let len = sn.len();
        if !(MIN_DEVICE_SN_LEN..=MAX_DEVICE_SN_LEN).contains(&len) {
            return Err(Error::InvalidDeviceSn(format!(
                "serial must be {MIN_DEVICE_SN_LEN}-{MAX_DEVICE_SN_LEN} chars, got {len}"
            )));
        }

        if !sn
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(Error::InvalidDeviceSn(format!(
                "serial '{sn}' contains invalid characters"
            )));
        }

        Ok(DeviceSn(sn))
    }

    /// Get the serial as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Encode as the fixed-width wire field (NUL padded).
    #[must_use]
    pub fn to_wire_bytes(&self) -> [u8; DEVICE_SN_WIRE_LEN] {
        let mut out = [0u8; DEVICE_SN_WIRE_LEN];
        out[..self.0.len()].copy_from_slice(self.0.as_bytes());
        out
    }

    /// Decode from the fixed-width wire field.
    ///
    /// # Errors
    /// Returns `Error::InvalidDeviceSn` if the field is empty after
    /// stripping padding or contains non-ASCII bytes.
    pub fn from_wire_bytes(bytes: &[u8]) -> Result<Self> {
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        let raw = &bytes[..end];
        let text = std::str::from_utf8(raw)
            .map_err(|_| Error::InvalidDeviceSn("non-ASCII serial field".to_string()))?;
        DeviceSn::new(text)
    }
}

impl fmt::Display for DeviceSn {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DeviceSn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DeviceSn::new(s)
    }
}

/// Protocol type identifier (e.g. `access-entropy-v48`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProtocolType(String);

impl ProtocolType {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        ProtocolType(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProtocolType {
    fn from(s: &str) -> Self {
        ProtocolType(s.to_string())
    }
}

/// Credential identifier presented at a terminal (card number, face or
/// fingerprint token, 3-20 characters).
///
/// # Security
/// Equality is constant time to avoid leaking how much of a credential
/// matched during comparison.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct CredentialId(String);

impl CredentialId {
    /// Create a credential identifier with validation.
    ///
    /// The value is trimmed and uppercased before validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidCredential` if the length is outside
    /// 3-20 characters or the value is not ASCII.
    pub fn new(value: &str) -> Result<Self> {
        let value = value.trim().to_uppercase();

        let len = value.len();
        if !(MIN_CREDENTIAL_LEN..=MAX_CREDENTIAL_LEN).contains(&len) {
            return Err(Error::InvalidCredential(format!(
                "credential must be {MIN_CREDENTIAL_LEN}-{MAX_CREDENTIAL_LEN} chars, got {len}"
            )));
        }

        if !value.is_ascii() {
            return Err(Error::InvalidCredential(
                "credential must be ASCII".to_string(),
            ));
        }

        Ok(CredentialId(value))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for CredentialId {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl std::hash::Hash for CredentialId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Business domain a decoded payload is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusinessKind {
    Access,
    Attendance,
    Consume,
}

impl BusinessKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            BusinessKind::Access => "access",
            BusinessKind::Attendance => "attendance",
            BusinessKind::Consume => "consume",
        }
    }
}

impl fmt::Display for BusinessKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Device-facing operation, used for permission checks and for
/// deciding whether a failed dispatch may be retried.
///
/// Only read-style operations are idempotent; value-mutating
/// operations (a consume debit, a door command) must never be
/// silently replayed by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceOperation {
    StatusQuery,
    AccountQuery,
    EventUpload,
    ClockUpload,
    ConsumeDebit,
    DoorControl,
    ConfigPush,
}

impl DeviceOperation {
    /// Whether a failed dispatch of this operation may be retried.
    #[must_use]
    pub fn is_idempotent(&self) -> bool {
        matches!(
            self,
            DeviceOperation::StatusQuery | DeviceOperation::AccountQuery
        )
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceOperation::StatusQuery => "status_query",
            DeviceOperation::AccountQuery => "account_query",
            DeviceOperation::EventUpload => "event_upload",
            DeviceOperation::ClockUpload => "clock_upload",
            DeviceOperation::ConsumeDebit => "consume_debit",
            DeviceOperation::DoorControl => "door_control",
            DeviceOperation::ConfigPush => "config_push",
        }
    }
}

impl fmt::Display for DeviceOperation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Severity attached to a translated vendor error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            ErrorSeverity::Info => "INFO",
            ErrorSeverity::Warning => "WARNING",
            ErrorSeverity::Error => "ERROR",
            ErrorSeverity::Critical => "CRITICAL",
        };
        write!(f, "{text}")
    }
}

/// Standardized description of a vendor error code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolErrorInfo {
    /// Internal error code (e.g. `ACCESS_DENIED_HW`, `UNKNOWN_ERROR`).
    pub internal_code: String,
    pub severity: ErrorSeverity,
    /// Operator guidance (e.g. `retry`, `manual-investigate`).
    pub recommended_action: String,
}

impl ProtocolErrorInfo {
    #[must_use]
    pub fn new(
        internal_code: impl Into<String>,
        severity: ErrorSeverity,
        recommended_action: impl Into<String>,
    ) -> Self {
        Self {
            internal_code: internal_code.into(),
            severity,
            recommended_action: recommended_action.into(),
        }
    }
}

/// Lifecycle state of a device session.
///
/// A session is created on first contact (`Initialized`), moves through
/// `Registering` to `Online`, is demoted to `Offline` by the heartbeat
/// sweeper, promoted back on a resumed heartbeat, and parked in `Error`
/// on an unrecoverable protocol violation until an explicit
/// re-registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initialized,
    Registering,
    Online,
    Offline,
    Error,
}

impl SessionStatus {
    /// Check whether a transition to `target` is allowed.
    ///
    /// The sweeper only demotes `Online` sessions, heartbeats only
    /// promote `Offline` ones, and `Error` is left exclusively through
    /// a fresh registration.
    #[must_use]
    pub fn can_transition_to(&self, target: SessionStatus) -> bool {
        matches!(
            (self, target),
            (SessionStatus::Initialized, SessionStatus::Registering)
                | (SessionStatus::Initialized, SessionStatus::Error)
                | (SessionStatus::Registering, SessionStatus::Online)
                | (SessionStatus::Registering, SessionStatus::Error)
                | (SessionStatus::Online, SessionStatus::Offline)
                | (SessionStatus::Online, SessionStatus::Error)
                | (SessionStatus::Offline, SessionStatus::Online)
                | (SessionStatus::Offline, SessionStatus::Registering)
                | (SessionStatus::Offline, SessionStatus::Error)
                | (SessionStatus::Error, SessionStatus::Registering)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            SessionStatus::Initialized => "Initialized",
            SessionStatus::Registering => "Registering",
            SessionStatus::Online => "Online",
            SessionStatus::Offline => "Offline",
            SessionStatus::Error => "Error",
        };
        write!(f, "{text}")
    }
}

/// Lifecycle state of a protocol adapter instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterState {
    Initialized,
    Running,
    Stopped,
    Error,
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            AdapterState::Initialized => "Initialized",
            AdapterState::Running => "Running",
            AdapterState::Stopped => "Stopped",
            AdapterState::Error => "Error",
        };
        write!(f, "{text}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("DEV001", "DEV001")]
    #[case("dev001", "DEV001")] // normalized to uppercase
    #[case("  A-1  ", "A-1")] // trimmed
    #[case("ABCDEFGH12345678", "ABCDEFGH12345678")] // 16 chars, max
    fn test_device_sn_valid(#[case] input: &str, #[case] expected: &str) {
        let sn = DeviceSn::new(input).unwrap();
        assert_eq!(sn.as_str(), expected);
    }

    #[rstest]
    #[case("")] // empty
    #[case("ABCDEFGH123456789")] // 17 chars
    #[case("DEV 01")] // embedded space
    #[case("DEV+01")] // invalid symbol
    fn test_device_sn_invalid(#[case] input: &str) {
        assert!(DeviceSn::new(input).is_err());
    }

    #[test]
    fn test_device_sn_wire_round_trip() {
        let sn = DeviceSn::new("DEV001").unwrap();
        let wire = sn.to_wire_bytes();
        assert_eq!(&wire[..6], b"DEV001");
        assert!(wire[6..].iter().all(|&b| b == 0));

        let back = DeviceSn::from_wire_bytes(&wire).unwrap();
        assert_eq!(back, sn);
    }

    #[test]
    fn test_device_sn_from_wire_rejects_empty() {
        let wire = [0u8; 16];
        assert!(DeviceSn::from_wire_bytes(&wire).is_err());
    }

    #[rstest]
    #[case("123")]
    #[case("12345678901234567890")]
    #[case("CARD-0042")]
    fn test_credential_valid(#[case] input: &str) {
        assert!(CredentialId::new(input).is_ok());
    }

    #[rstest]
    #[case("12")] // too short
    #[case("123456789012345678901")] // too long
    fn test_credential_invalid(#[case] input: &str) {
        assert!(CredentialId::new(input).is_err());
    }

    #[test]
    fn test_credential_constant_time_eq() {
        let a = CredentialId::new("11912322").unwrap();
        let b = CredentialId::new("11912322").unwrap();
        let c = CredentialId::new("11912323").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_operation_idempotence() {
        assert!(DeviceOperation::StatusQuery.is_idempotent());
        assert!(DeviceOperation::AccountQuery.is_idempotent());
        assert!(!DeviceOperation::ConsumeDebit.is_idempotent());
        assert!(!DeviceOperation::DoorControl.is_idempotent());
        assert!(!DeviceOperation::EventUpload.is_idempotent());
    }

    #[rstest]
    #[case(SessionStatus::Initialized, SessionStatus::Registering, true)]
    #[case(SessionStatus::Registering, SessionStatus::Online, true)]
    #[case(SessionStatus::Online, SessionStatus::Offline, true)]
    #[case(SessionStatus::Offline, SessionStatus::Online, true)]
    #[case(SessionStatus::Online, SessionStatus::Error, true)]
    #[case(SessionStatus::Error, SessionStatus::Registering, true)]
    #[case(SessionStatus::Offline, SessionStatus::Registering, true)] // reboot re-registers
    #[case(SessionStatus::Initialized, SessionStatus::Error, true)] // violation before registering
    #[case(SessionStatus::Initialized, SessionStatus::Online, false)] // must register first
    #[case(SessionStatus::Error, SessionStatus::Online, false)] // must re-register
    fn test_session_transitions(
        #[case] from: SessionStatus,
        #[case] to: SessionStatus,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(ErrorSeverity::Info < ErrorSeverity::Warning);
        assert!(ErrorSeverity::Warning < ErrorSeverity::Error);
        assert!(ErrorSeverity::Error < ErrorSeverity::Critical);
    }

    #[test]
    fn test_severity_serde_uppercase() {
        let json = serde_json::to_string(&ErrorSeverity::Critical).unwrap();
        assert_eq!(json, "\"CRITICAL\"");
    }
}
