//! Vendor error translation.
//!
//! Every vendor reports faults with its own numeric codes. The
//! [`ErrorMapper`] normalizes them into the internal taxonomy; codes
//! missing from the table fall back to `UNKNOWN_ERROR` and are logged
//! so the mapping table can be curated later. Translation never fails.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

use termlink_core::{DeviceSn, ErrorSeverity, ProtocolErrorInfo, ProtocolType};

/// Internal code for vendor errors absent from the mapping table.
pub const UNKNOWN_ERROR_CODE: &str = "UNKNOWN_ERROR";

/// Standardized response produced for a vendor error report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtocolErrorResponse {
    pub protocol: ProtocolType,
    pub device_sn: Option<DeviceSn>,
    pub vendor_code: u32,
    pub info: ProtocolErrorInfo,
    pub detail: String,
    pub occurred_at: DateTime<Utc>,
}

/// Table mapping one vendor's error codes to the internal taxonomy.
#[derive(Debug, Clone)]
pub struct ErrorMapper {
    protocol: ProtocolType,
    table: HashMap<u32, ProtocolErrorInfo>,
}

impl ErrorMapper {
    #[must_use]
    pub fn new(protocol: ProtocolType, entries: Vec<(u32, ProtocolErrorInfo)>) -> Self {
        Self {
            protocol,
            table: entries.into_iter().collect(),
        }
    }

    /// Translate a vendor error code.
    ///
    /// Always returns a well-formed response; an unmapped code maps to
    /// [`UNKNOWN_ERROR_CODE`] with severity Error and a
    /// `manual-investigate` action.
    #[must_use]
    pub fn translate(
        &self,
        vendor_code: u32,
        detail: impl Into<String>,
        device_sn: Option<&DeviceSn>,
    ) -> ProtocolErrorResponse {
        let info = match self.table.get(&vendor_code) {
            Some(info) => info.clone(),
            None => {
                warn!(
                    protocol = %self.protocol,
                    vendor_code = format_args!("{vendor_code:#06x}"),
                    device = device_sn.map(DeviceSn::as_str).unwrap_or("-"),
                    "unmapped vendor error code"
                );
                ProtocolErrorInfo::new(
                    UNKNOWN_ERROR_CODE,
                    ErrorSeverity::Error,
                    "manual-investigate",
                )
            }
        };

        ProtocolErrorResponse {
            protocol: self.protocol.clone(),
            device_sn: device_sn.cloned(),
            vendor_code,
            info,
            detail: detail.into(),
            occurred_at: Utc::now(),
        }
    }

    /// The full vendor-code mapping table.
    #[must_use]
    pub fn mapping(&self) -> &HashMap<u32, ProtocolErrorInfo> {
        &self.table
    }
}
