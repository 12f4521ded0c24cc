//! Entropy door-access protocol V4.8.
//!
//! Access-control terminals (card, face, fingerprint readers on doors).
//! Message-type and event-type tables follow the vendor integration
//! guide; the registration handshake uses type `0x07`, outside the
//! vendor's event range, and responses are carried under type `0x00`
//! with a leading marker byte (ACK `0x01`, NAK `0x02`, permission
//! `0x03`, config `0x04`).

use serde_json::{Value, json};

use termlink_core::{
    BusinessKind, DeviceOperation, Error, ErrorSeverity, ProtocolErrorInfo, ProtocolType, Result,
};
use termlink_protocol::{Frame, MessageKind, ProtocolMessage, WireProfile};

use crate::adapter::{AdapterDescriptor, BusinessFields, ResponseKind, ResponseParts, VendorCodec};
use crate::vendors::{PayloadReader, put_ascii_fixed};

pub const PROTOCOL_TYPE: &str = "access-entropy-v48";
pub const MAGIC: u16 = 0x4845;
pub const WIRE_VERSION: u16 = 0x0480;

const SUPPORTED_MODELS: &[&str] = &[
    "MA300", "MA300T", "SC405", "SC700", "SC705", "F18", "TA800C", "TA800T", "WK2600", "WK2600P",
];

// Inbound message types
const MSG_REAL_TIME_EVENT: u8 = 0x01;
const MSG_DEVICE_STATUS: u8 = 0x02;
const MSG_HEARTBEAT: u8 = 0x03;
const MSG_PERMISSION_REQUEST: u8 = 0x04;
const MSG_VERIFY_RESULT: u8 = 0x05;
const MSG_ERROR_REPORT: u8 = 0x06;
const MSG_REGISTER: u8 = 0x07;

// Outbound response envelope
const MSG_RESPONSE: u8 = 0x00;
const MARKER_ACK: u8 = 0x01;
const MARKER_NAK: u8 = 0x02;
const MARKER_PERMISSION: u8 = 0x03;
const MARKER_DEVICE_CONFIG: u8 = 0x04;

const MODEL_WIRE_LEN: usize = 16;
const FIRMWARE_WIRE_LEN: usize = 16;

/// Codec for the entropy access protocol.
pub struct EntropyAccessCodec {
    descriptor: AdapterDescriptor,
}

impl EntropyAccessCodec {
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptor: AdapterDescriptor::new(
                ProtocolType::from(PROTOCOL_TYPE),
                "Entropy",
                "V4.8",
                SUPPORTED_MODELS,
            ),
        }
    }
}

impl Default for EntropyAccessCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl VendorCodec for EntropyAccessCodec {
    fn descriptor(&self) -> &AdapterDescriptor {
        &self.descriptor
    }

    fn profile(&self) -> WireProfile {
        WireProfile::new(MAGIC, WIRE_VERSION)
    }

    fn business_kind(&self) -> BusinessKind {
        BusinessKind::Access
    }

    fn classify(&self, type_code: u8) -> Result<MessageKind> {
        match type_code {
            MSG_REAL_TIME_EVENT => Ok(MessageKind::BusinessEvent),
            MSG_DEVICE_STATUS => Ok(MessageKind::DeviceStatus),
            MSG_HEARTBEAT => Ok(MessageKind::Heartbeat),
            MSG_PERMISSION_REQUEST => Ok(MessageKind::BusinessQuery),
            MSG_VERIFY_RESULT => Ok(MessageKind::VerifyResult),
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
            MSG_REAL_TIME_EVENT => {
                let event_type = reader.u8()?;
                let event_no = reader.u32_le()?;
                let user_id = reader.u32_le()?;
                let credential = reader.credential()?;
                let verify_method = reader.u8()?;
                let verify_result = reader.u8()?;
                let confidence = reader.u16_le()?;
                let door = reader.u16_le()?;
                let direction = reader.u8()?;
                Ok(vec![
                    ("event_type".to_string(), json!(event_type_name(event_type))),
                    ("event_no".to_string(), json!(event_no)),
                    ("user_id".to_string(), json!(user_id)),
                    ("credential".to_string(), json!(credential)),
                    (
                        "verify_method".to_string(),
                        json!(verify_method_name(verify_method)),
                    ),
                    (
                        "verify_result".to_string(),
                        json!(verify_result_name(verify_result)),
                    ),
                    ("confidence".to_string(), json!(confidence)),
                    ("door".to_string(), json!(door)),
                    (
                        "direction".to_string(),
                        json!(if direction == 0 { "in" } else { "out" }),
                    ),
                ])
            }
            MSG_DEVICE_STATUS => {
                let door_state = reader.u8()?;
                let lock_state = reader.u8()?;
                let tamper = reader.u8()?;
                let error_count = reader.u16_le()?;
                Ok(vec![
                    (
                        "door_state".to_string(),
                        json!(if door_state == 0 { "closed" } else { "open" }),
                    ),
                    (
                        "lock_state".to_string(),
                        json!(if lock_state == 0 { "locked" } else { "released" }),
                    ),
                    ("tamper".to_string(), json!(tamper != 0)),
                    ("error_count".to_string(), json!(error_count)),
                ])
            }
            MSG_HEARTBEAT => {
                let interval = reader.u16_le()?;
                let uptime = reader.u32_le()?;
                let connection_status = reader.u8()?;
                let temperature = reader.i16_le()?;
                Ok(vec![
                    ("heartbeat_interval".to_string(), json!(interval)),
                    ("uptime_secs".to_string(), json!(uptime)),
                    ("connection_status".to_string(), json!(connection_status)),
                    ("temperature".to_string(), json!(temperature)),
                ])
            }
            MSG_PERMISSION_REQUEST => {
                let credential = reader.credential()?;
                let door = reader.u16_le()?;
                let direction = reader.u8()?;
                Ok(vec![
                    ("credential".to_string(), json!(credential)),
                    ("door".to_string(), json!(door)),
                    (
                        "direction".to_string(),
                        json!(if direction == 0 { "in" } else { "out" }),
                    ),
                ])
            }
            MSG_VERIFY_RESULT => {
                let user_id = reader.u32_le()?;
                let verify_method = reader.u8()?;
                let verify_result = reader.u8()?;
                Ok(vec![
                    ("user_id".to_string(), json!(user_id)),
                    (
                        "verify_method".to_string(),
                        json!(verify_method_name(verify_method)),
                    ),
                    (
                        "verify_result".to_string(),
                        json!(verify_result_name(verify_result)),
                    ),
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
        let mut payload = Vec::new();
        match kind {
            ResponseKind::Ack => payload.push(MARKER_ACK),
            ResponseKind::Nak => {
                payload.push(MARKER_NAK);
                if let Some(reason) = fields.get("reason").and_then(Value::as_str) {
                    put_ascii_fixed(&mut payload, reason, 32)?;
                }
            }
            ResponseKind::Permission => {
                let allowed = fields
                    .get("allowed")
                    .and_then(Value::as_bool)
                    .ok_or_else(|| Error::MissingField("allowed".to_string()))?;
                let door = fields.get("door").and_then(Value::as_u64).unwrap_or(0) as u16;
                payload.push(MARKER_PERMISSION);
                payload.push(u8::from(allowed));
                payload.extend_from_slice(&door.to_le_bytes());
            }
            ResponseKind::DeviceConfig => {
                let interval = fields
                    .get("heartbeat_interval")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| Error::MissingField("heartbeat_interval".to_string()))?;
                payload.push(MARKER_DEVICE_CONFIG);
                payload.extend_from_slice(&(interval as u16).to_le_bytes());
            }
            ResponseKind::Account => {
                return Err(Error::UnsupportedResponse(
                    "account responses are not part of the access protocol".to_string(),
                ));
            }
        }
        Ok(ResponseParts {
            message_type: MSG_RESPONSE,
            command: 0x00,
            payload,
        })
    }

    fn business_call(&self, message: &ProtocolMessage) -> Result<(String, DeviceOperation)> {
        match message.type_code() {
            MSG_REAL_TIME_EVENT => Ok(("REAL_TIME_EVENT".to_string(), DeviceOperation::EventUpload)),
            MSG_DEVICE_STATUS => Ok(("DEVICE_STATUS".to_string(), DeviceOperation::StatusQuery)),
            MSG_PERMISSION_REQUEST => {
                Ok(("ACCESS_VERIFY".to_string(), DeviceOperation::StatusQuery))
            }
            MSG_VERIFY_RESULT => Ok(("VERIFY_RESULT".to_string(), DeviceOperation::EventUpload)),
            code => Err(Error::UnknownMessageType { code }),
        }
    }

    fn operation_for(&self, business_type: &str) -> Option<DeviceOperation> {
        match business_type {
            "REAL_TIME_EVENT" | "ALARM_EVENT" | "VERIFY_RESULT" => Some(DeviceOperation::EventUpload),
            "ACCESS_VERIFY" | "DEVICE_STATUS" => Some(DeviceOperation::StatusQuery),
            "DOOR_CONTROL" => Some(DeviceOperation::DoorControl),
            _ => None,
        }
    }

    fn query_response(&self) -> ResponseKind {
        ResponseKind::Permission
    }

    fn error_table(&self) -> Vec<(u32, ProtocolErrorInfo)> {
        vec![
            (
                0x0001,
                ProtocolErrorInfo::new(
                    "ACCESS_CARD_INVALID",
                    ErrorSeverity::Warning,
                    "reject-credential",
                ),
            ),
            (
                0x0002,
                ProtocolErrorInfo::new(
                    "ACCESS_DENIED_HW",
                    ErrorSeverity::Warning,
                    "check-permission-sync",
                ),
            ),
            (
                0x0003,
                ProtocolErrorInfo::new(
                    "DOOR_SENSOR_FAULT",
                    ErrorSeverity::Error,
                    "dispatch-maintenance",
                ),
            ),
            (
                0x0004,
                ProtocolErrorInfo::new("READER_FAULT", ErrorSeverity::Error, "dispatch-maintenance"),
            ),
            (
                0x0005,
                ProtocolErrorInfo::new(
                    "EVENT_STORAGE_FULL",
                    ErrorSeverity::Warning,
                    "trigger-event-upload",
                ),
            ),
            (
                0x0006,
                ProtocolErrorInfo::new("TAMPER_ALARM", ErrorSeverity::Critical, "alert-security"),
            ),
            (
                0x0007,
                ProtocolErrorInfo::new("CLOCK_DRIFT", ErrorSeverity::Info, "resync-clock"),
            ),
        ]
    }
}

fn event_type_name(code: u8) -> &'static str {
    match code {
        0x01 => "CARD",
        0x02 => "FACE",
        0x03 => "FINGERPRINT",
        0x04 => "PASSWORD",
        0x05 => "QR_CODE",
        0x06 => "DURESS",
        0x07 => "TAILGATING",
        0x08 => "ANTI_PASSBACK",
        0x09 => "DOOR_MAGNETIC",
        0x0A => "ALARM",
        _ => "UNKNOWN",
    }
}

fn verify_method_name(code: u8) -> &'static str {
    match code {
        0x01 => "CARD",
        0x02 => "FACE",
        0x03 => "FINGER",
        0x04 => "PASSWORD",
        0x05 => "QR",
        _ => "UNKNOWN",
    }
}

fn verify_result_name(code: u8) -> &'static str {
    match code {
        0x00 => "SUCCESS",
        0x01 => "FAILED",
        0x02 => "TIMEOUT",
        0x03 => "INVALID",
        _ => "UNKNOWN",
    }
}

/// Registration payload: model and firmware, fixed-width ASCII.
/// Oversized or non-ASCII input is sanitized, not refused.
#[must_use]
pub fn registration_payload(model: &str, firmware: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(MODEL_WIRE_LEN + FIRMWARE_WIRE_LEN);
    push_sanitized(&mut payload, model, MODEL_WIRE_LEN);
    push_sanitized(&mut payload, firmware, FIRMWARE_WIRE_LEN);
    payload
}

fn push_sanitized(buf: &mut Vec<u8>, text: &str, width: usize) {
    let clean: String = text.chars().filter(char::is_ascii).take(width).collect();
    // Cannot fail on a filtered, width-bounded value.
    let _ = put_ascii_fixed(buf, &clean, width);
}

/// Heartbeat payload with the given interval and uptime.
#[must_use]
pub fn heartbeat_payload(interval_secs: u16, uptime_secs: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(9);
    payload.extend_from_slice(&interval_secs.to_le_bytes());
    payload.extend_from_slice(&uptime_secs.to_le_bytes());
    payload.push(0x01);
    payload.extend_from_slice(&25i16.to_le_bytes());
    payload
}
