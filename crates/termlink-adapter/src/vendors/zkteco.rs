//! Zkteco consumption-terminal protocol V1.0.
//!
//! Canteen/POS terminals. Amounts travel as fixed-point cents; a
//! consume debit is value-mutating and is never retried by the
//! dispatcher. Registration uses type `0x0B`, outside the vendor's
//! record range; account query replies reuse the vendor's account
//! response type `0x05` and config pushes its config response `0x0A`.

use serde_json::{Value, json};

use termlink_core::{
    BusinessKind, DeviceOperation, Error, ErrorSeverity, ProtocolErrorInfo, ProtocolType, Result,
    constants::CREDENTIAL_WIRE_LEN,
};
use termlink_protocol::{Frame, MessageKind, ProtocolMessage, WireProfile};

use crate::adapter::{AdapterDescriptor, BusinessFields, ResponseKind, ResponseParts, VendorCodec};
use crate::vendors::{PayloadReader, put_ascii_fixed};

pub const PROTOCOL_TYPE: &str = "consume-zkteco-v10";
pub const MAGIC: u16 = 0x5A4B;
pub const WIRE_VERSION: u16 = 0x0100;

const SUPPORTED_MODELS: &[&str] = &[
    "IC-600T", "F2", "SC700", "SC810", "IC-700A", "IC-800A", "IC-260T", "IC-360T", "IC-560T",
    "IC-760T", "SC602", "SC603",
];

// Inbound message types
const MSG_CONSUME_RECORD: u8 = 0x01;
const MSG_DEVICE_STATUS: u8 = 0x02;
const MSG_HEARTBEAT: u8 = 0x03;
const MSG_ACCOUNT_QUERY: u8 = 0x04;
const MSG_RECHARGE_RECORD: u8 = 0x06;
const MSG_SUBSIDY_RECORD: u8 = 0x07;
const MSG_ERROR_REPORT: u8 = 0x08;
const MSG_REGISTER: u8 = 0x0B;

// Outbound response types
const MSG_RESPONSE: u8 = 0x00;
const MSG_ACCOUNT_RESPONSE: u8 = 0x05;
const MSG_CONFIG_RESPONSE: u8 = 0x0A;
const MARKER_ACK: u8 = 0x01;
const MARKER_NAK: u8 = 0x02;

const MODEL_WIRE_LEN: usize = 16;
const FIRMWARE_WIRE_LEN: usize = 16;

/// Codec for the zkteco consume protocol.
pub struct ZktecoConsumeCodec {
    descriptor: AdapterDescriptor,
}

impl ZktecoConsumeCodec {
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptor: AdapterDescriptor::new(
                ProtocolType::from(PROTOCOL_TYPE),
                "Zkteco",
                "V1.0",
                SUPPORTED_MODELS,
            ),
        }
    }
}

impl Default for ZktecoConsumeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl VendorCodec for ZktecoConsumeCodec {
    fn descriptor(&self) -> &AdapterDescriptor {
        &self.descriptor
    }

    fn profile(&self) -> WireProfile {
        WireProfile::new(MAGIC, WIRE_VERSION)
    }

    fn business_kind(&self) -> BusinessKind {
        BusinessKind::Consume
    }

    fn classify(&self, type_code: u8) -> Result<MessageKind> {
        match type_code {
            MSG_CONSUME_RECORD | MSG_RECHARGE_RECORD | MSG_SUBSIDY_RECORD => {
                Ok(MessageKind::BusinessEvent)
            }
            MSG_DEVICE_STATUS => Ok(MessageKind::DeviceStatus),
            MSG_HEARTBEAT => Ok(MessageKind::Heartbeat),
            MSG_ACCOUNT_QUERY => Ok(MessageKind::BusinessQuery),
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
            MSG_CONSUME_RECORD => {
                let transaction_no = reader.u32_le()?;
                let credential = reader.credential()?;
                let amount_cents = reader.u32_le()?;
                let balance_cents = reader.u32_le()?;
                let consume_method = reader.u8()?;
                let transaction_type = reader.u8()?;
                let status = reader.u8()?;
                Ok(vec![
                    ("transaction_no".to_string(), json!(transaction_no)),
                    ("credential".to_string(), json!(credential)),
                    ("amount_cents".to_string(), json!(amount_cents)),
                    ("balance_cents".to_string(), json!(balance_cents)),
                    (
                        "consume_method".to_string(),
                        json!(consume_method_name(consume_method)),
                    ),
                    (
                        "transaction_type".to_string(),
                        json!(transaction_type_name(transaction_type)),
                    ),
                    (
                        "status".to_string(),
                        json!(transaction_status_name(status)),
                    ),
                ])
            }
            MSG_RECHARGE_RECORD | MSG_SUBSIDY_RECORD => {
                let transaction_no = reader.u32_le()?;
                let credential = reader.credential()?;
                let amount_cents = reader.u32_le()?;
                let balance_cents = reader.u32_le()?;
                Ok(vec![
                    ("transaction_no".to_string(), json!(transaction_no)),
                    ("credential".to_string(), json!(credential)),
                    ("amount_cents".to_string(), json!(amount_cents)),
                    ("balance_cents".to_string(), json!(balance_cents)),
                ])
            }
            MSG_DEVICE_STATUS => {
                let power_state = reader.u8()?;
                let network_state = reader.u8()?;
                let error_count = reader.u16_le()?;
                Ok(vec![
                    (
                        "power_state".to_string(),
                        json!(if power_state == 0 { "mains" } else { "battery" }),
                    ),
                    (
                        "network_state".to_string(),
                        json!(if network_state == 0 { "online" } else { "degraded" }),
                    ),
                    ("error_count".to_string(), json!(error_count)),
                ])
            }
            MSG_HEARTBEAT => {
                let interval = reader.u16_le()?;
                let uptime = reader.u32_le()?;
                let status = reader.u8()?;
                Ok(vec![
                    ("heartbeat_interval".to_string(), json!(interval)),
                    ("uptime_secs".to_string(), json!(uptime)),
                    ("connection_status".to_string(), json!(status)),
                ])
            }
            MSG_ACCOUNT_QUERY => {
                let credential = reader.credential()?;
                Ok(vec![("credential".to_string(), json!(credential))])
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
            ResponseKind::Account => {
                let credential = fields
                    .get("credential")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::MissingField("credential".to_string()))?;
                let balance = fields
                    .get("balance_cents")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| Error::MissingField("balance_cents".to_string()))?;

                let mut payload = Vec::with_capacity(CREDENTIAL_WIRE_LEN + 5);
                put_ascii_fixed(&mut payload, credential, CREDENTIAL_WIRE_LEN)?;
                payload.extend_from_slice(&(balance as u32).to_le_bytes());
                payload.push(0x01); // success status
                Ok(ResponseParts {
                    message_type: MSG_ACCOUNT_RESPONSE,
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
            ResponseKind::Permission => Err(Error::UnsupportedResponse(
                "permission responses are not part of the consume protocol".to_string(),
            )),
        }
    }

    fn business_call(&self, message: &ProtocolMessage) -> Result<(String, DeviceOperation)> {
        match message.type_code() {
            MSG_CONSUME_RECORD => Ok(("CONSUME_RECORD".to_string(), DeviceOperation::ConsumeDebit)),
            MSG_RECHARGE_RECORD => {
                Ok(("RECHARGE_RECORD".to_string(), DeviceOperation::EventUpload))
            }
            MSG_SUBSIDY_RECORD => Ok(("SUBSIDY_RECORD".to_string(), DeviceOperation::EventUpload)),
            MSG_DEVICE_STATUS => Ok(("DEVICE_STATUS".to_string(), DeviceOperation::StatusQuery)),
            MSG_ACCOUNT_QUERY => Ok(("ACCOUNT_QUERY".to_string(), DeviceOperation::AccountQuery)),
            code => Err(Error::UnknownMessageType { code }),
        }
    }

    fn operation_for(&self, business_type: &str) -> Option<DeviceOperation> {
        match business_type {
            "CONSUME_RECORD" => Some(DeviceOperation::ConsumeDebit),
            "RECHARGE_RECORD" | "SUBSIDY_RECORD" => Some(DeviceOperation::EventUpload),
            "ACCOUNT_QUERY" => Some(DeviceOperation::AccountQuery),
            "DEVICE_STATUS" => Some(DeviceOperation::StatusQuery),
            _ => None,
        }
    }

    fn query_response(&self) -> ResponseKind {
        ResponseKind::Account
    }

    fn error_table(&self) -> Vec<(u32, ProtocolErrorInfo)> {
        vec![
            (
                0x0001,
                ProtocolErrorInfo::new(
                    "INSUFFICIENT_BALANCE",
                    ErrorSeverity::Warning,
                    "reject-transaction",
                ),
            ),
            (
                0x0002,
                ProtocolErrorInfo::new(
                    "ACCOUNT_FROZEN",
                    ErrorSeverity::Warning,
                    "reject-transaction",
                ),
            ),
            (
                0x0003,
                ProtocolErrorInfo::new(
                    "DUPLICATE_TRANSACTION",
                    ErrorSeverity::Error,
                    "manual-investigate",
                ),
            ),
            (
                0x0004,
                ProtocolErrorInfo::new(
                    "OFFLINE_QUEUE_FULL",
                    ErrorSeverity::Error,
                    "trigger-record-upload",
                ),
            ),
            (
                0x0005,
                ProtocolErrorInfo::new("PRINTER_FAULT", ErrorSeverity::Info, "dispatch-maintenance"),
            ),
            (
                0x0006,
                ProtocolErrorInfo::new("TAMPER_ALARM", ErrorSeverity::Critical, "alert-security"),
            ),
        ]
    }
}

fn consume_method_name(code: u8) -> &'static str {
    match code {
        0x01 => "CARD",
        0x02 => "FACE",
        0x03 => "FINGERPRINT",
        0x04 => "QR_CODE",
        0x05 => "NFC",
        0x06 => "OFFLINE",
        _ => "UNKNOWN",
    }
}

fn transaction_type_name(code: u8) -> &'static str {
    match code {
        0x01 => "CONSUME",
        0x02 => "RECHARGE",
        0x03 => "REFUND",
        0x04 => "CANCEL",
        0x05 => "ADJUST",
        _ => "UNKNOWN",
    }
}

fn transaction_status_name(code: u8) -> &'static str {
    match code {
        0x01 => "SUCCESS",
        0x02 => "FAILED",
        0x03 => "PENDING",
        0x04 => "CANCELLED",
        _ => "UNKNOWN",
    }
}

/// Account query payload for the given credential.
#[must_use]
pub fn account_query_payload(credential: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(CREDENTIAL_WIRE_LEN);
    let clean: String = credential
        .chars()
        .filter(char::is_ascii)
        .take(CREDENTIAL_WIRE_LEN)
        .collect();
    let _ = put_ascii_fixed(&mut payload, &clean, CREDENTIAL_WIRE_LEN);
    payload
}
