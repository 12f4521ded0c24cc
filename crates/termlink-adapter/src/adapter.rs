//! Protocol adapter contract.
//!
//! One adapter serves one vendor protocol. The vendor-independent parts
//! (session lifecycle, validation, permission, dispatch, statistics)
//! live in [`ProtocolAdapter`]; everything byte-layout specific sits
//! behind the [`VendorCodec`] seam. The closed set of vendor codecs is
//! dispatched through the [`AnyAdapter`] enum: native `async fn` in
//! traits are not object-safe, so the registry stores concrete variants
//! instead of `dyn` trait objects.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use termlink_core::{
    AdapterState, BusinessKind, DeviceOperation, DeviceSn, Error, ProtocolErrorInfo, ProtocolType,
    Result, SessionStatus, constants::DEFAULT_DESTROY_GRACE_MS,
};
use termlink_protocol::{
    Frame, FrameBuilder, MessageKind, MessageValidator, ProtocolMessage, ValidationReport,
    WireProfile, hex,
};
use termlink_session::{HeartbeatOutcome, RegistrationOutcome, SessionStore};

use crate::config::{ProtocolConfig, ProtocolConfigStore};
use crate::dispatch::{BusinessDispatcher, DispatchHandle, DispatchRequest, ProcessOutcome};
use crate::error_map::{ErrorMapper, ProtocolErrorResponse};
use crate::stats::{AdapterStats, StatsSnapshot};
use crate::vendors::{EntropyAccessCodec, RealandAttendanceCodec, ZktecoConsumeCodec};

/// Decoded business fields handed to response builders.
pub type BusinessFields = serde_json::Map<String, Value>;

/// Identity of one vendor protocol adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterDescriptor {
    protocol: ProtocolType,
    manufacturer: String,
    version: String,
    /// Supported models, stored uppercase for case-insensitive lookup.
    models: Vec<String>,
}

impl AdapterDescriptor {
    #[must_use]
    pub fn new(
        protocol: ProtocolType,
        manufacturer: impl Into<String>,
        version: impl Into<String>,
        models: &[&str],
    ) -> Self {
        Self {
            protocol,
            manufacturer: manufacturer.into(),
            version: version.into(),
            models: models.iter().map(|m| m.to_uppercase()).collect(),
        }
    }

    #[must_use]
    pub fn protocol(&self) -> &ProtocolType {
        &self.protocol
    }

    #[must_use]
    pub fn manufacturer(&self) -> &str {
        &self.manufacturer
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// Case-insensitive model check; empty input is unsupported, never
    /// an error.
    #[must_use]
    pub fn supports_model(&self, model: &str) -> bool {
        let model = model.trim();
        if model.is_empty() {
            return false;
        }
        let model = model.to_uppercase();
        self.models.iter().any(|m| *m == model)
    }
}

/// Outcome of a device permission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionDecision {
    permitted: bool,
    reason: Option<String>,
}

impl PermissionDecision {
    #[must_use]
    pub fn allow() -> Self {
        Self {
            permitted: true,
            reason: None,
        }
    }

    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            permitted: false,
            reason: Some(reason.into()),
        }
    }

    #[must_use]
    pub fn permitted(&self) -> bool {
        self.permitted
    }

    #[must_use]
    pub fn reason(&self) -> &str {
        self.reason.as_deref().unwrap_or("")
    }
}

/// Semantic class of an outbound response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Ack,
    Nak,
    /// Access-control permission decision.
    Permission,
    /// Consume-terminal account/balance reply.
    Account,
    /// Device configuration push.
    DeviceConfig,
}

impl ResponseKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseKind::Ack => "ack",
            ResponseKind::Nak => "nak",
            ResponseKind::Permission => "permission",
            ResponseKind::Account => "account",
            ResponseKind::DeviceConfig => "device_config",
        }
    }
}

impl std::fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Encoded response pieces handed back by a vendor codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseParts {
    pub message_type: u8,
    pub command: u8,
    pub payload: Vec<u8>,
}

/// Byte-layout seam implemented once per vendor protocol.
///
/// Implementations are pure: no I/O, no shared state. Everything a
/// codec needs arrives in the call.
pub trait VendorCodec: Send + Sync + 'static {
    fn descriptor(&self) -> &AdapterDescriptor;

    /// Magic/version pair carried in every frame of this protocol.
    fn profile(&self) -> WireProfile;

    /// Business domain this protocol's terminals belong to.
    fn business_kind(&self) -> BusinessKind;

    /// Map a wire message-type code to its semantic class.
    ///
    /// # Errors
    /// `Error::UnknownMessageType` for codes outside the vendor table.
    fn classify(&self, type_code: u8) -> Result<MessageKind>;

    /// Decode a frame's payload into named fields, in wire order.
    fn decode_payload(&self, kind: MessageKind, frame: &Frame) -> Result<Vec<(String, Value)>>;

    /// Encode a response payload.
    ///
    /// # Errors
    /// - `Error::MissingField` when a required business field is absent
    /// - `Error::UnsupportedResponse` when this vendor has no wire form
    ///   for `kind`
    fn encode_response(&self, kind: ResponseKind, fields: &BusinessFields) -> Result<ResponseParts>;

    /// Business tag and operation class for an inbound business message.
    fn business_call(&self, message: &ProtocolMessage) -> Result<(String, DeviceOperation)>;

    /// Operation class for an externally supplied business tag.
    fn operation_for(&self, business_type: &str) -> Option<DeviceOperation>;

    /// Response kind used to answer a successful business query.
    fn query_response(&self) -> ResponseKind;

    /// Vendor error-code table for the error mapper.
    fn error_table(&self) -> Vec<(u32, ProtocolErrorInfo)>;
}

/// Vendor-independent adapter logic around a [`VendorCodec`].
pub struct ProtocolAdapter<C: VendorCodec> {
    codec: C,
    store: Arc<SessionStore>,
    dispatcher: BusinessDispatcher,
    config_store: Arc<dyn ProtocolConfigStore>,
    mapper: ErrorMapper,
    default_config: ProtocolConfig,
    stats: AdapterStats,
    state: RwLock<AdapterState>,
}

impl<C: VendorCodec> ProtocolAdapter<C> {
    #[must_use]
    pub fn new(
        codec: C,
        store: Arc<SessionStore>,
        dispatcher: BusinessDispatcher,
        config_store: Arc<dyn ProtocolConfigStore>,
    ) -> Self {
        let mapper = ErrorMapper::new(codec.descriptor().protocol().clone(), codec.error_table());
        let default_config = ProtocolConfig::for_business(codec.business_kind());
        Self {
            codec,
            store,
            dispatcher,
            config_store,
            mapper,
            default_config,
            stats: AdapterStats::default(),
            state: RwLock::new(AdapterState::Initialized),
        }
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    #[must_use]
    pub fn descriptor(&self) -> &AdapterDescriptor {
        self.codec.descriptor()
    }

    #[must_use]
    pub fn protocol_type(&self) -> &ProtocolType {
        self.codec.descriptor().protocol()
    }

    #[must_use]
    pub fn manufacturer(&self) -> &str {
        self.codec.descriptor().manufacturer()
    }

    #[must_use]
    pub fn version(&self) -> &str {
        self.codec.descriptor().version()
    }

    #[must_use]
    pub fn supported_models(&self) -> &[String] {
        self.codec.descriptor().models()
    }

    #[must_use]
    pub fn is_model_supported(&self, model: &str) -> bool {
        self.codec.descriptor().supports_model(model)
    }

    #[must_use]
    pub fn wire_profile(&self) -> WireProfile {
        self.codec.profile()
    }

    // ------------------------------------------------------------------
    // Adapter lifecycle
    // ------------------------------------------------------------------

    /// Complete all setup; the adapter serves traffic only after this
    /// succeeds.
    ///
    /// The warm-up builds and re-parses an ACK probe frame: a codec
    /// that cannot round-trip its own response must never reach
    /// Running.
    ///
    /// # Errors
    /// `Error::InitializationFailed`; the adapter is left in the Error
    /// state and the caller (startup supervisor) decides what to do.
    pub async fn initialize(&self) -> Result<()> {
        let probe = DeviceSn::new("SELFTEST")?;
        let warm_up = self
            .build_response(ResponseKind::Ack, &BusinessFields::new(), &probe, 0)
            .and_then(|frame| Frame::parse_with_profile(frame.as_bytes(), &self.codec.profile()));

        match warm_up {
            Ok(_) => {
                self.set_state(AdapterState::Running);
                info!(protocol = %self.protocol_type(), "protocol adapter initialized");
                Ok(())
            }
            Err(e) => {
                self.set_state(AdapterState::Error);
                Err(Error::InitializationFailed(format!(
                    "codec warm-up failed for {}: {e}",
                    self.protocol_type()
                )))
            }
        }
    }

    /// Drain in-flight dispatches with a bounded grace period, cancel
    /// the remainder, and stop the adapter. Idempotent.
    pub async fn destroy(&self) {
        let cancelled = self
            .dispatcher
            .shutdown(Duration::from_millis(DEFAULT_DESTROY_GRACE_MS))
            .await;
        if cancelled > 0 {
            warn!(
                protocol = %self.protocol_type(),
                cancelled,
                "in-flight dispatches cancelled during destroy"
            );
        }
        self.set_state(AdapterState::Stopped);
        info!(protocol = %self.protocol_type(), "protocol adapter destroyed");
    }

    #[must_use]
    pub fn adapter_state(&self) -> AdapterState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: AdapterState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    // ------------------------------------------------------------------
    // Message parse/build
    // ------------------------------------------------------------------

    /// Parse raw wire bytes into a canonical message.
    ///
    /// # Errors
    /// Wire-category errors only; the failure is counted and the bytes
    /// are dropped, never retried.
    pub fn parse_message(&self, bytes: &[u8]) -> Result<ProtocolMessage> {
        let frame = Frame::parse_with_profile(bytes, &self.codec.profile()).map_err(|e| {
            self.stats.record_parse_error();
            e
        })?;
        self.decode_frame(&frame)
    }

    /// Parse a hex-text transported message.
    pub fn parse_hex(&self, text: &str) -> Result<ProtocolMessage> {
        let bytes = hex::decode(text).map_err(|e| {
            self.stats.record_parse_error();
            e
        })?;
        self.parse_message(&bytes)
    }

    /// Decode an already frame-parsed message with this vendor's codec.
    pub fn decode_frame(&self, frame: &Frame) -> Result<ProtocolMessage> {
        let profile = self.codec.profile();
        if frame.magic() != profile.magic {
            self.stats.record_parse_error();
            return Err(Error::UnknownMagic {
                magic: frame.magic(),
            });
        }
        if frame.version() != profile.version {
            self.stats.record_parse_error();
            return Err(Error::VersionMismatch {
                expected: profile.version,
                actual: frame.version(),
            });
        }

        let decoded = self
            .codec
            .classify(frame.message_type())
            .and_then(|kind| Ok((kind, self.codec.decode_payload(kind, frame)?)));
        match decoded {
            Ok((kind, fields)) => Ok(ProtocolMessage::from_frame(
                self.protocol_type().clone(),
                frame,
                kind,
                fields,
            )),
            Err(e) => {
                self.stats.record_parse_error();
                Err(e)
            }
        }
    }

    /// Build an outbound response frame.
    ///
    /// # Errors
    /// `Error::MissingField` / `Error::UnsupportedResponse` from the
    /// codec; a failed build produces no partial output.
    pub fn build_response(
        &self,
        kind: ResponseKind,
        fields: &BusinessFields,
        device_sn: &DeviceSn,
        sequence: u32,
    ) -> Result<Frame> {
        let parts = match self.codec.encode_response(kind, fields) {
            Ok(parts) => parts,
            Err(e) => {
                self.stats.record_build_error();
                return Err(e);
            }
        };

        FrameBuilder::new(
            self.codec.profile(),
            device_sn.clone(),
            parts.message_type,
            parts.command,
        )
        .sequence(sequence)
        .timestamp(Utc::now().timestamp())
        .payload(&parts.payload)
        .build()
    }

    /// Build a response and return it hex-encoded for text transports.
    pub fn build_response_hex(
        &self,
        kind: ResponseKind,
        fields: &BusinessFields,
        device_sn: &DeviceSn,
        sequence: u32,
    ) -> Result<String> {
        let frame = self.build_response(kind, fields, device_sn, sequence)?;
        Ok(hex::encode(frame.as_bytes()))
    }

    // ------------------------------------------------------------------
    // Validation and permission
    // ------------------------------------------------------------------

    /// Re-verify checksum and timestamp freshness for a held message.
    ///
    /// Repeated checksum failures escalate the session to the Error
    /// state through the store.
    #[must_use]
    pub fn validate_message(&self, message: &ProtocolMessage) -> ValidationReport {
        let config = self.protocol_config(message.device_sn());
        let validator = MessageValidator::new(config.clock_skew_tolerance_secs);
        let report = validator.validate(message);

        if !report.is_valid() {
            self.stats.record_validation_failure();
            if report.failures().iter().any(|f| f.contains("checksum")) {
                self.store
                    .record_checksum_failure(message.device_sn(), config.checksum_failure_limit);
            }
        }
        report
    }

    /// Check whether a device may perform an operation.
    ///
    /// A device without an Online session is denied and must go back
    /// through registration; an Online device is checked against its
    /// configured authorization set.
    #[must_use]
    pub fn check_permission(
        &self,
        device_sn: &DeviceSn,
        operation: DeviceOperation,
    ) -> PermissionDecision {
        let decision = match self.store.status(device_sn) {
            None => PermissionDecision::deny("device has no session, registration required"),
            Some(SessionStatus::Online) => {
                let config = self.protocol_config(device_sn);
                if config.authorizes(operation) {
                    PermissionDecision::allow()
                } else {
                    PermissionDecision::deny(format!("operation {operation} not authorized"))
                }
            }
            Some(status) => {
                PermissionDecision::deny(format!("device is {status}, registration required"))
            }
        };

        if !decision.permitted() {
            self.stats.record_permission_denial();
        }
        decision
    }

    // ------------------------------------------------------------------
    // Device lifecycle
    // ------------------------------------------------------------------

    /// Ensure a session exists for a device (first contact creates it).
    pub fn initialize_device(&self, device_sn: &DeviceSn) -> Result<SessionStatus> {
        self.store.ensure(device_sn, self.protocol_type())?;
        Ok(self
            .store
            .status(device_sn)
            .unwrap_or(SessionStatus::Initialized))
    }

    /// Register a device, producing the authoritative Online session.
    ///
    /// # Errors
    /// - `Error::UnsupportedModel` when the reported model is not in
    ///   this adapter's set
    /// - store errors (protocol mismatch, invalid transition)
    pub fn handle_registration(
        &self,
        device_sn: &DeviceSn,
        model: &str,
        metadata: HashMap<String, String>,
    ) -> Result<RegistrationOutcome> {
        if !self.is_model_supported(model) {
            return Err(Error::UnsupportedModel(model.to_string()));
        }

        let outcome = self
            .store
            .register(device_sn, self.protocol_type(), metadata)?;
        self.stats.record_registration();
        debug!(
            device = %device_sn,
            protocol = %self.protocol_type(),
            model = %model,
            ?outcome,
            "device registration handled"
        );
        Ok(outcome)
    }

    /// Record a heartbeat. Idempotent within an interval; resumes an
    /// Offline session.
    pub fn handle_heartbeat(&self, device_sn: &DeviceSn) -> Result<HeartbeatOutcome> {
        let outcome = self.store.record_heartbeat(device_sn)?;
        self.stats.record_heartbeat();
        Ok(outcome)
    }

    #[must_use]
    pub fn device_status(&self, device_sn: &DeviceSn) -> Option<SessionStatus> {
        self.store.status(device_sn)
    }

    // ------------------------------------------------------------------
    // Business processing
    // ------------------------------------------------------------------

    /// Route an access business payload. Returns immediately.
    #[must_use]
    pub fn process_access(
        &self,
        business_type: &str,
        payload: Value,
        device_sn: &DeviceSn,
    ) -> DispatchHandle {
        self.process_business(BusinessKind::Access, business_type, payload, device_sn)
    }

    /// Route an attendance business payload. Returns immediately.
    #[must_use]
    pub fn process_attendance(
        &self,
        business_type: &str,
        payload: Value,
        device_sn: &DeviceSn,
    ) -> DispatchHandle {
        self.process_business(BusinessKind::Attendance, business_type, payload, device_sn)
    }

    /// Route a consume business payload. Returns immediately.
    #[must_use]
    pub fn process_consume(
        &self,
        business_type: &str,
        payload: Value,
        device_sn: &DeviceSn,
    ) -> DispatchHandle {
        self.process_business(BusinessKind::Consume, business_type, payload, device_sn)
    }

    fn process_business(
        &self,
        kind: BusinessKind,
        business_type: &str,
        payload: Value,
        device_sn: &DeviceSn,
    ) -> DispatchHandle {
        if kind != self.codec.business_kind() {
            return DispatchHandle::resolved(ProcessOutcome::failure(
                "NOT_SUPPORTED",
                format!(
                    "{} protocol does not handle {kind} business",
                    self.protocol_type()
                ),
            ));
        }
        let Some(operation) = self.codec.operation_for(business_type) else {
            return DispatchHandle::resolved(ProcessOutcome::failure(
                "UNKNOWN_BUSINESS_TYPE",
                format!("unknown business type: {business_type}"),
            ));
        };
        self.dispatch(operation, business_type, payload, device_sn)
    }

    fn dispatch(
        &self,
        operation: DeviceOperation,
        business_type: &str,
        payload: Value,
        device_sn: &DeviceSn,
    ) -> DispatchHandle {
        self.stats.record_dispatch();
        let config = self.protocol_config(device_sn);
        self.dispatcher.dispatch(DispatchRequest {
            kind: self.codec.business_kind(),
            business_type: business_type.to_string(),
            operation,
            device_sn: device_sn.clone(),
            payload,
            timeout: config.dispatch_timeout(),
            retry: config.retry.clone(),
        })
    }

    // ------------------------------------------------------------------
    // Configuration and error mapping
    // ------------------------------------------------------------------

    /// Per-device configuration, falling back to the domain default.
    #[must_use]
    pub fn protocol_config(&self, device_sn: &DeviceSn) -> ProtocolConfig {
        self.config_store
            .get(device_sn)
            .unwrap_or_else(|| self.default_config.clone())
    }

    pub fn update_protocol_config(
        &self,
        device_sn: &DeviceSn,
        config: ProtocolConfig,
    ) -> Result<()> {
        self.config_store.put(device_sn, config)
    }

    /// Translate a vendor error code. Never fails.
    #[must_use]
    pub fn handle_protocol_error(
        &self,
        vendor_code: u32,
        detail: &str,
        device_sn: Option<&DeviceSn>,
    ) -> ProtocolErrorResponse {
        self.stats.record_vendor_error();
        self.mapper.translate(vendor_code, detail, device_sn)
    }

    /// The vendor-code mapping table.
    #[must_use]
    pub fn error_code_mapping(&self) -> &std::collections::HashMap<u32, ProtocolErrorInfo> {
        self.mapper.mapping()
    }

    /// Statistics snapshot for the metrics collector.
    #[must_use]
    pub fn statistics(&self) -> StatsSnapshot {
        self.stats
            .snapshot(self.protocol_type(), self.adapter_state())
    }

    // ------------------------------------------------------------------
    // Inbound pipeline
    // ------------------------------------------------------------------

    /// Run one inbound frame through the full pipeline: decode,
    /// validate, lifecycle or permission + dispatch, response build.
    ///
    /// Business handling awaits the dispatch outcome (bounded by the
    /// configured timeout); everything else completes inline.
    ///
    /// # Errors
    /// Wire-category errors for undecodable frames; the caller drops
    /// the frame and keeps the connection alive.
    pub async fn process_frame(&self, frame: &Frame) -> Result<Frame> {
        self.stats.record_request();

        let state = self.adapter_state();
        if state != AdapterState::Running {
            return Err(Error::AdapterNotRunning(state.to_string()));
        }

        let message = self.decode_frame(frame)?;
        let device_sn = message.device_sn().clone();

        let report = self.validate_message(&message);
        if !report.is_valid() {
            warn!(
                device = %device_sn,
                protocol = %self.protocol_type(),
                failures = ?report.failures(),
                "message failed validation"
            );
            return self.nak_response(&device_sn, message.sequence(), "VALIDATION_FAILED");
        }

        match message.kind() {
            MessageKind::Registration => self.handle_registration_message(&message),
            MessageKind::Heartbeat => self.handle_heartbeat_message(&message),
            MessageKind::ErrorReport => self.handle_error_report(&message),
            MessageKind::DeviceStatus
            | MessageKind::BusinessEvent
            | MessageKind::BusinessQuery
            | MessageKind::VerifyResult => self.handle_business_message(&message).await,
        }
    }

    fn handle_registration_message(&self, message: &ProtocolMessage) -> Result<Frame> {
        let device_sn = message.device_sn();
        let model = message.str_field("model").unwrap_or_default().to_string();

        let mut metadata = HashMap::new();
        for (name, value) in message.fields() {
            if let Some(text) = value.as_str() {
                metadata.insert(name.clone(), text.to_string());
            }
        }

        match self.handle_registration(device_sn, &model, metadata) {
            Ok(outcome) => {
                debug!(device = %device_sn, protocol = %self.protocol_type(), ?outcome, "registration accepted");
                self.ack_response(device_sn, message.sequence())
            }
            Err(e) => {
                warn!(
                    device = %device_sn,
                    protocol = %self.protocol_type(),
                    error = %e,
                    "registration rejected"
                );
                let reason = match e {
                    Error::UnsupportedModel(_) => "DEVICE_MODEL_UNSUPPORTED",
                    Error::ProtocolMismatch { .. } => "PROTOCOL_MISMATCH",
                    _ => "REGISTRATION_FAILED",
                };
                self.nak_response(device_sn, message.sequence(), reason)
            }
        }
    }

    fn handle_heartbeat_message(&self, message: &ProtocolMessage) -> Result<Frame> {
        let device_sn = message.device_sn();
        match self.handle_heartbeat(device_sn) {
            Ok(HeartbeatOutcome::Resumed) => {
                info!(device = %device_sn, protocol = %self.protocol_type(), "device resumed on heartbeat");
                self.ack_response(device_sn, message.sequence())
            }
            Ok(HeartbeatOutcome::Alive) => self.ack_response(device_sn, message.sequence()),
            Err(Error::DeviceNotRegistered(_) | Error::DeviceNotOnline { .. }) => {
                // The device is pushed back through the registration
                // flow instead of being silently allowed through.
                self.nak_response(device_sn, message.sequence(), "REGISTER_REQUIRED")
            }
            Err(e) => Err(e),
        }
    }

    fn handle_error_report(&self, message: &ProtocolMessage) -> Result<Frame> {
        let device_sn = message.device_sn();
        let vendor_code = message.i64_field("error_code").unwrap_or(0) as u32;
        let detail = message.str_field("detail").unwrap_or_default();

        let response = self.handle_protocol_error(vendor_code, detail, Some(device_sn));
        warn!(
            device = %device_sn,
            protocol = %self.protocol_type(),
            vendor_code = format_args!("{vendor_code:#06x}"),
            internal_code = %response.info.internal_code,
            severity = %response.info.severity,
            action = %response.info.recommended_action,
            "device error report translated"
        );
        self.ack_response(device_sn, message.sequence())
    }

    async fn handle_business_message(&self, message: &ProtocolMessage) -> Result<Frame> {
        let device_sn = message.device_sn();
        let (business_type, operation) = self.codec.business_call(message)?;

        let decision = self.check_permission(device_sn, operation);
        if !decision.permitted() {
            warn!(
                device = %device_sn,
                protocol = %self.protocol_type(),
                operation = %operation,
                reason = decision.reason(),
                "device operation denied"
            );
            return self.nak_response(device_sn, message.sequence(), "PERMISSION_DENIED");
        }

        let payload = Value::Object(fields_to_map(message.fields()));
        let handle = self.dispatch(operation, &business_type, payload, device_sn);
        let outcome = handle.outcome().await;

        if outcome.success {
            if message.kind() == MessageKind::BusinessQuery {
                let mut fields = BusinessFields::new();
                if let Some(Value::Object(data)) = &outcome.data {
                    fields.extend(data.clone());
                }
                // Queries echo the credential they asked about.
                if !fields.contains_key("credential")
                    && let Some(credential) = message.str_field("credential")
                {
                    fields.insert("credential".to_string(), Value::String(credential.into()));
                }
                self.build_response(self.codec.query_response(), &fields, device_sn, message.sequence())
            } else {
                self.ack_response(device_sn, message.sequence())
            }
        } else {
            self.stats.record_dispatch_failure();
            warn!(
                device = %device_sn,
                protocol = %self.protocol_type(),
                business_type = %business_type,
                error_code = outcome.error_code.as_deref().unwrap_or(""),
                error = outcome.error_message.as_deref().unwrap_or(""),
                "business dispatch failed"
            );
            self.nak_response(
                device_sn,
                message.sequence(),
                outcome.error_code.as_deref().unwrap_or("BUSINESS_FAILED"),
            )
        }
    }

    fn ack_response(&self, device_sn: &DeviceSn, sequence: u32) -> Result<Frame> {
        self.build_response(ResponseKind::Ack, &BusinessFields::new(), device_sn, sequence)
    }

    fn nak_response(&self, device_sn: &DeviceSn, sequence: u32, reason: &str) -> Result<Frame> {
        let mut fields = BusinessFields::new();
        fields.insert("reason".to_string(), Value::String(reason.to_string()));
        self.build_response(ResponseKind::Nak, &fields, device_sn, sequence)
    }
}

fn fields_to_map(fields: &[(String, Value)]) -> BusinessFields {
    fields.iter().cloned().collect()
}

/// Closed set of vendor adapters, dispatched by enum rather than `dyn`.
///
/// Mirrors the registry contract: exactly one variant per supported
/// protocol type.
pub enum AnyAdapter {
    Entropy(ProtocolAdapter<EntropyAccessCodec>),
    Zkteco(ProtocolAdapter<ZktecoConsumeCodec>),
    Realand(ProtocolAdapter<RealandAttendanceCodec>),
}

macro_rules! with_adapter {
    ($self:expr, $adapter:ident => $body:expr) => {
        match $self {
            AnyAdapter::Entropy($adapter) => $body,
            AnyAdapter::Zkteco($adapter) => $body,
            AnyAdapter::Realand($adapter) => $body,
        }
    };
}

impl AnyAdapter {
    #[must_use]
    pub fn descriptor(&self) -> &AdapterDescriptor {
        with_adapter!(self, adapter => adapter.descriptor())
    }

    #[must_use]
    pub fn protocol_type(&self) -> &ProtocolType {
        with_adapter!(self, adapter => adapter.protocol_type())
    }

    #[must_use]
    pub fn wire_profile(&self) -> WireProfile {
        with_adapter!(self, adapter => adapter.wire_profile())
    }

    #[must_use]
    pub fn is_model_supported(&self, model: &str) -> bool {
        with_adapter!(self, adapter => adapter.is_model_supported(model))
    }

    pub async fn initialize(&self) -> Result<()> {
        with_adapter!(self, adapter => adapter.initialize().await)
    }

    pub async fn destroy(&self) {
        with_adapter!(self, adapter => adapter.destroy().await)
    }

    #[must_use]
    pub fn adapter_state(&self) -> AdapterState {
        with_adapter!(self, adapter => adapter.adapter_state())
    }

    pub async fn process_frame(&self, frame: &Frame) -> Result<Frame> {
        with_adapter!(self, adapter => adapter.process_frame(frame).await)
    }

    pub fn parse_message(&self, bytes: &[u8]) -> Result<ProtocolMessage> {
        with_adapter!(self, adapter => adapter.parse_message(bytes))
    }

    #[must_use]
    pub fn device_status(&self, device_sn: &DeviceSn) -> Option<SessionStatus> {
        with_adapter!(self, adapter => adapter.device_status(device_sn))
    }

    #[must_use]
    pub fn handle_protocol_error(
        &self,
        vendor_code: u32,
        detail: &str,
        device_sn: Option<&DeviceSn>,
    ) -> ProtocolErrorResponse {
        with_adapter!(self, adapter => adapter.handle_protocol_error(vendor_code, detail, device_sn))
    }

    #[must_use]
    pub fn statistics(&self) -> StatsSnapshot {
        with_adapter!(self, adapter => adapter.statistics())
    }
}
