use crate::frame::Frame;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use termlink_core::{DeviceSn, Error, ProtocolType, Result};

/// Semantic class of a decoded message, mapped from the vendor's
/// message-type code by the owning codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Handshake carrying model/firmware metadata; opens a session.
    Registration,
    /// Periodic liveness signal.
    Heartbeat,
    /// Device status report (door state, battery, error counters).
    DeviceStatus,
    /// Business event upload (access pass, clock record, consume record).
    BusinessEvent,
    /// Business query requiring a response (permission, account balance).
    BusinessQuery,
    /// Verification result from the terminal.
    VerifyResult,
    /// Error report from the terminal.
    ErrorReport,
}

impl MessageKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Registration => "registration",
            MessageKind::Heartbeat => "heartbeat",
            MessageKind::DeviceStatus => "device_status",
            MessageKind::BusinessEvent => "business_event",
            MessageKind::BusinessQuery => "business_query",
            MessageKind::VerifyResult => "verify_result",
            MessageKind::ErrorReport => "error_report",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Canonical decoded device message.
///
/// Produced by a vendor codec from a [`Frame`]; immutable once built.
/// Payload fields keep their decode order so responses can mirror the
/// vendor's field sequence.
#[derive(Debug, Clone)]
pub struct ProtocolMessage {
    protocol: ProtocolType,
    device_sn: DeviceSn,
    kind: MessageKind,
    type_code: u8,
    command: u8,
    sequence: u32,
    timestamp: DateTime<Utc>,
    fields: Vec<(String, Value)>,
    raw: Bytes,
    checksum_valid: bool,
}

impl ProtocolMessage {
    /// Build a message from a parsed frame and decoded payload fields.
    ///
    /// The frame has already passed checksum verification during
    /// parsing, so `checksum_valid` starts out true; validation may
    /// re-check the raw bytes later.
    #[must_use]
    pub fn from_frame(
        protocol: ProtocolType,
        frame: &Frame,
        kind: MessageKind,
        fields: Vec<(String, Value)>,
    ) -> Self {
        let timestamp = Utc
            .timestamp_opt(frame.timestamp(), 0)
            .single()
            .unwrap_or_else(Utc::now);

        Self {
            protocol,
            device_sn: frame.device_sn().clone(),
            kind,
            type_code: frame.message_type(),
            command: frame.command(),
            sequence: frame.sequence(),
            timestamp,
            fields,
            raw: frame.to_bytes(),
            checksum_valid: true,
        }
    }

    #[must_use]
    pub fn protocol(&self) -> &ProtocolType {
        &self.protocol
    }

    #[must_use]
    pub fn device_sn(&self) -> &DeviceSn {
        &self.device_sn
    }

    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Vendor message-type code as carried on the wire.
    #[must_use]
    pub fn type_code(&self) -> u8 {
        self.type_code
    }

    #[must_use]
    pub fn command(&self) -> u8 {
        self.command
    }

    #[must_use]
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    #[must_use]
    pub fn checksum_valid(&self) -> bool {
        self.checksum_valid
    }

    /// Raw wire bytes of the originating frame.
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Decoded payload fields in wire order.
    #[must_use]
    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    /// Look up a payload field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Look up a payload field, failing if absent.
    ///
    /// # Errors
    /// Returns `Error::MissingField` when the field is not present.
    pub fn required_field(&self, name: &str) -> Result<&Value> {
        self.field(name)
            .ok_or_else(|| Error::MissingField(name.to_string()))
    }

    /// String view of a payload field, if present and textual.
    #[must_use]
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(Value::as_str)
    }

    /// Integer view of a payload field, if present and numeric.
    #[must_use]
    pub fn i64_field(&self, name: &str) -> Option<i64> {
        self.field(name).and_then(Value::as_i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameBuilder, WireProfile};
    use serde_json::json;

    fn sample_message() -> ProtocolMessage {
        let frame = FrameBuilder::new(
            WireProfile::new(0x4845, 0x0480),
            DeviceSn::new("DEV001").unwrap(),
            0x01,
            0x00,
        )
        .sequence(9)
        .timestamp(1_700_000_000)
        .build()
        .unwrap();

        ProtocolMessage::from_frame(
            ProtocolType::from("access-entropy-v48"),
            &frame,
            MessageKind::BusinessEvent,
            vec![
                ("credential".to_string(), json!("11912322")),
                ("direction".to_string(), json!("in")),
            ],
        )
    }

    #[test]
    fn test_field_access() {
        let msg = sample_message();
        assert_eq!(msg.str_field("credential"), Some("11912322"));
        assert_eq!(msg.str_field("direction"), Some("in"));
        assert!(msg.field("missing").is_none());
    }

    #[test]
    fn test_required_field() {
        let msg = sample_message();
        assert!(msg.required_field("credential").is_ok());
        assert!(matches!(
            msg.required_field("amount"),
            Err(Error::MissingField(name)) if name == "amount"
        ));
    }

    #[test]
    fn test_field_order_preserved() {
        let msg = sample_message();
        let names: Vec<&str> = msg.fields().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["credential", "direction"]);
    }

    #[test]
    fn test_metadata_from_frame() {
        let msg = sample_message();
        assert_eq!(msg.device_sn().as_str(), "DEV001");
        assert_eq!(msg.kind(), MessageKind::BusinessEvent);
        assert_eq!(msg.type_code(), 0x01);
        assert_eq!(msg.sequence(), 9);
        assert_eq!(msg.timestamp().timestamp(), 1_700_000_000);
        assert!(msg.checksum_valid());
    }
}
