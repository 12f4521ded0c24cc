//! Realand attendance-terminal protocol V2.1.
//!
//! Clock-in/out terminals. The smallest of the supported protocols:
//! clock records, status, heartbeat, error reports, and a registration
//! handshake under type `0x05`. Responses are ACK/NAK under type `0x00`
//! plus a config push under type `0x06`.

use serde_json::{Value, json};

use termlink_core::{
    BusinessKind, DeviceOperation, Error, ErrorSeverity, ProtocolErrorInfo, ProtocolType, Result,
};
use termlink_protocol::{Frame, MessageKind, ProtocolMessage, WireProfile};

use crate::adapter::{AdapterDescriptor, BusinessFields, ResponseKind, ResponseParts, VendorCodec};
use crate::vendors::{PayloadReader, put_ascii_fixed};

pub const PROTOCOL_TYPE: &str = "attendance-realand-v21";
pub const MAGIC: u16 = 0x5241;
pub const WIRE_VERSION: u16 = 0x0210;

const SUPPORTED_MODELS: &[&str] = &["A-F261", "A-C071", "A-E260S"];

// Inbound message types
const MSG_CLOCK_RECORD: u8 = 0x01;
const MSG_DEVICE_STATUS: u8 = 0x02;
const MSG_HEARTBEAT: u8 = 0x03;
const MSG_ERROR_REPORT: u8 = 0x04;
const MSG_REGISTER: u8 = 0x05;

// Outbound response types
const MSG_RESPONSE: u8 = 0x00;
const MSG_CONFIG_RESPONSE: u8 = 0x06;
const MARKER_ACK: u8 = 0x01;
const MARKER_NAK: u8 = 0x02;

const MODEL_WIRE_LEN: usize = 16;
const FIRMWARE_WIRE_LEN: usize = 16;

/// Codec for the realand attendance protocol.
pub struct RealandAttendanceCodec {
    descriptor: AdapterDescriptor,
}

impl RealandAttendanceCodec {
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptor: AdapterDescriptor::new(
                ProtocolType::from(PROTOCOL_TYPE),
                "Realand",
                "V2.1",
                SUPPORTED_MODELS,
            ),
        }
    }
}

impl Default for RealandAttendanceCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl VendorCodec for RealandAttendanceCodec {
    fn descriptor(&self) -> &AdapterDescriptor {
        &self.descriptor
    }

    fn profile(&self) -> WireProfile {
        WireProfile::new(MAGIC, WIRE_VERSION)
    }

    fn business_kind(&self) -> BusinessKind {
        BusinessKind::Attendance
    }

    fn classify(&self, type_code: u8) -> Result<MessageKind> {
        match type_code {
            MSG_CLOCK_RECORD => Ok(MessageKind::BusinessEvent),
            MSG_DEVICE_STATUS => Ok(MessageKind::DeviceStatus),
            MSG_HEARTBEAT => Ok(MessageKind::Heartbeat),
            MSG_ERROR_REPORT => Ok(MessageKind::ErrorReport),
            MSG_REGISTER => Ok(MessageKind::Registration),
            code => Err(Error::UnknownMessageType { code }),
        }
    }

    fn decode_payload(&self, _kind: MessageKind, frame: &Frame) -> Result<Vec<(String, Value)>> {
        let mut reader = PayloadReader::new(frame.payload());
        match frame.message_type() {
            MSG_REGISTER => {
                let model = reader.ascii(MODEL_WIRE_LEN)?;
                let firmware = reader.ascii(FIRMWARE_WIRE_LEN)?;
                Ok(vec![
                    ("model".to_string(), json!(model)),
                    ("firmware".to_string(), json!(firmware)),
                ])
            }
            MSG_CLOCK_RECORD => {
                let user_id = reader.u32_le()?;
                let credential = reader.credential()?;
                let clock_type = reader.u8()?;
                let verify_method = reader.u8()?;
                Ok(vec![
                    ("user_id".to_string(), json!(user_id)),
                    ("credential".to_string(), json!(credential)),
                    ("clock_type".to_string(), json!(clock_type_name(clock_type))),
                    (
                        "verify_method".to_string(),
                        json!(verify_method_name(verify_method)),
                    ),
                ])
            }
            MSG_DEVICE_STATUS => {
                let storage_used_pct = reader.u8()?;
                let error_count = reader.u16_le()?;
                Ok(vec![
                    ("storage_used_pct".to_string(), json!(storage_used_pct)),
                    ("error_count".to_string(), json!(error_count)),
                ])
            }
            MSG_HEARTBEAT => {
                let interval = reader.u16_le()?;
                let uptime = reader.u32_le()?;
                Ok(vec![
                    ("heartbeat_interval".to_string(), json!(interval)),
                    ("uptime_secs".to_string(), json!(uptime)),
                ])
            }
            MSG_ERROR_REPORT => {
                let error_code = reader.u32_le()?;
                let detail = reader.remainder_ascii()?;
                Ok(vec![
                    ("error_code".to_string(), json!(error_code)),
                    ("detail".to_string(), json!(detail)),
                ])
            }
            code => Err(Error::UnknownMessageType { code }),
        }
    }

    fn encode_response(&self, kind: ResponseKind, fields: &BusinessFields) -> Result<ResponseParts> {
        match kind {
            ResponseKind::Ack => Ok(ResponseParts {
                message_type: MSG_RESPONSE,
                command: 0x00,
                payload: vec![MARKER_ACK],
            }),
            ResponseKind::Nak => {
                let mut payload = vec![MARKER_NAK];
                if let Some(reason) = fields.get("reason").and_then(Value::as_str) {
                    put_ascii_fixed(&mut payload, reason, 32)?;
                }
                Ok(ResponseParts {
                    message_type: MSG_RESPONSE,
                    command: 0x00,
                    payload,
                })
            }
            ResponseKind::DeviceConfig => {
                let interval = fields
                    .get("heartbeat_interval")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| Error::MissingField("heartbeat_interval".to_string()))?;
                Ok(ResponseParts {
                    message_type: MSG_CONFIG_RESPONSE,
                    command: 0x00,
                    payload: (interval as u16).to_le_bytes().to_vec(),
                })
            }
            ResponseKind::Permission | ResponseKind::Account => Err(Error::UnsupportedResponse(
                format!("{kind} responses are not part of the attendance protocol"),
            )),
        }
    }

    fn business_call(&self, message: &ProtocolMessage) -> Result<(String, DeviceOperation)> {
        match message.type_code() {
            MSG_CLOCK_RECORD => Ok(("CLOCK_RECORD".to_string(), DeviceOperation::ClockUpload)),
            MSG_DEVICE_STATUS => Ok(("DEVICE_STATUS".to_string(), DeviceOperation::StatusQuery)),
            code => Err(Error::UnknownMessageType { code }),
        }
    }

    fn operation_for(&self, business_type: &str) -> Option<DeviceOperation> {
        match business_type {
            "CLOCK_RECORD" => Some(DeviceOperation::ClockUpload),
            "DEVICE_STATUS" => Some(DeviceOperation::StatusQuery),
            _ => None,
        }
    }

    fn query_response(&self) -> ResponseKind {
        ResponseKind::Ack
    }

    fn error_table(&self) -> Vec<(u32, ProtocolErrorInfo)> {
        vec![
            (
                0x0001,
                ProtocolErrorInfo::new(
                    "FINGERPRINT_READER_FAULT",
                    ErrorSeverity::Error,
                    "dispatch-maintenance",
                ),
            ),
            (
                0x0002,
                ProtocolErrorInfo::new(
                    "RECORD_STORAGE_FULL",
                    ErrorSeverity::Warning,
                    "trigger-record-upload",
                ),
            ),
            (
                0x0003,
                ProtocolErrorInfo::new("CLOCK_DRIFT", ErrorSeverity::Info, "resync-clock"),
            ),
        ]
    }
}

fn clock_type_name(code: u8) -> &'static str {
    match code {
        0x00 => "CLOCK_IN",
        0x01 => "CLOCK_OUT",
        0x02 => "OVERTIME_IN",
        0x03 => "OVERTIME_OUT",
        _ => "UNKNOWN",
    }
}

fn verify_method_name(code: u8) -> &'static str {
    match code {
        0x01 => "FINGERPRINT",
        0x02 => "CARD",
        0x03 => "PASSWORD",
        0x04 => "FACE",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use termlink_core::{DeviceSn, constants::CREDENTIAL_WIRE_LEN};
    use termlink_protocol::FrameBuilder;

    fn codec() -> RealandAttendanceCodec {
        RealandAttendanceCodec::new()
    }

    fn frame(message_type: u8, payload: &[u8]) -> Frame {
        FrameBuilder::new(
            codec().profile(),
            DeviceSn::new("ATT001").unwrap(),
            message_type,
            0x00,
        )
        .sequence(1)
        .timestamp(1_700_000_000)
        .payload(payload)
        .build()
        .unwrap()
    }

    #[test]
    fn test_classify_table() {
        let codec = codec();
        assert_eq!(codec.classify(0x01).unwrap(), MessageKind::BusinessEvent);
        assert_eq!(codec.classify(0x04).unwrap(), MessageKind::ErrorReport);
        assert_eq!(codec.classify(0x05).unwrap(), MessageKind::Registration);
        assert!(codec.classify(0x42).is_err());
    }

    #[test]
    fn test_decode_clock_record() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&2077u32.to_le_bytes());
        let mut card = b"77001".to_vec();
        card.resize(CREDENTIAL_WIRE_LEN, 0);
        payload.extend_from_slice(&card);
        payload.push(0x01); // clock out
        payload.push(0x01); // fingerprint

        let codec = codec();
        let frame = frame(MSG_CLOCK_RECORD, &payload);
        let fields = codec
            .decode_payload(MessageKind::BusinessEvent, &frame)
            .unwrap();
        let lookup = |name: &str| {
            fields
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
                .unwrap()
        };

        assert_eq!(lookup("user_id"), json!(2077));
        assert_eq!(lookup("credential"), json!("77001"));
        assert_eq!(lookup("clock_type"), json!("CLOCK_OUT"));
        assert_eq!(lookup("verify_method"), json!("FINGERPRINT"));
    }

    #[test]
    fn test_clock_upload_not_idempotent() {
        let codec = codec();
        assert_eq!(
            codec.operation_for("CLOCK_RECORD"),
            Some(DeviceOperation::ClockUpload)
        );
        assert!(!DeviceOperation::ClockUpload.is_idempotent());
    }

    #[test]
    fn test_encode_unsupported_kinds() {
        let codec = codec();
        assert!(matches!(
            codec.encode_response(ResponseKind::Permission, &BusinessFields::new()),
            Err(Error::UnsupportedResponse(_))
        ));
        assert!(matches!(
            codec.encode_response(ResponseKind::Account, &BusinessFields::new()),
            Err(Error::UnsupportedResponse(_))
        ));
    }

    #[test]
    fn test_config_push_round_trip_fields() {
        let codec = codec();
        let mut fields = BusinessFields::new();
        fields.insert("heartbeat_interval".to_string(), json!(45));
        let parts = codec
            .encode_response(ResponseKind::DeviceConfig, &fields)
            .unwrap();
        assert_eq!(parts.message_type, MSG_CONFIG_RESPONSE);
        assert_eq!(parts.payload, 45u16.to_le_bytes().to_vec());
    }
}
