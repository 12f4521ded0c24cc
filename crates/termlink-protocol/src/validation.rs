//! Message re-validation.
//!
//! Frames are checksum-verified at parse time, but a message may sit in
//! a queue before the adapter acts on it. [`MessageValidator`]
//! re-verifies the checksum against the stored wire bytes and checks
//! timestamp freshness against a configurable clock-skew tolerance so
//! that replayed or stale traffic is rejected.

use chrono::{DateTime, Duration, Utc};
use termlink_core::constants::{DEFAULT_CLOCK_SKEW_TOLERANCE_SECS, FRAME_CHECKSUM_LEN};

use crate::{frame::frame_checksum, message::ProtocolMessage};

/// Outcome of message validation: a flag plus the list of failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    valid: bool,
    failures: Vec<String>,
}

impl ValidationReport {
    /// A passing report.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            valid: true,
            failures: Vec::new(),
        }
    }

    /// Record a failure; the report becomes invalid.
    pub fn add_failure(&mut self, reason: impl Into<String>) {
        self.valid = false;
        self.failures.push(reason.into());
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    #[must_use]
    pub fn failures(&self) -> &[String] {
        &self.failures
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::ok()
    }
}

/// Validator applying the vendor-independent message checks.
#[derive(Debug, Clone)]
pub struct MessageValidator {
    clock_skew_tolerance: Duration,
}

impl MessageValidator {
    /// Create a validator with the given clock-skew tolerance (seconds).
    #[must_use]
    pub fn new(clock_skew_tolerance_secs: i64) -> Self {
        Self {
            clock_skew_tolerance: Duration::seconds(clock_skew_tolerance_secs),
        }
    }

    /// Validate against the current wall clock.
    #[must_use]
    pub fn validate(&self, message: &ProtocolMessage) -> ValidationReport {
        self.validate_at(message, Utc::now())
    }

    /// Validate against an explicit reference clock (for tests and for
    /// batch re-validation with a single clock read).
    #[must_use]
    pub fn validate_at(&self, message: &ProtocolMessage, now: DateTime<Utc>) -> ValidationReport {
        let mut report = ValidationReport::ok();

        if !recheck_checksum(message.raw()) {
            report.add_failure("checksum mismatch on stored frame");
        }

        let age = now.signed_duration_since(message.timestamp());
        if age > self.clock_skew_tolerance {
            report.add_failure(format!(
                "message timestamp {}s old exceeds tolerance of {}s",
                age.num_seconds(),
                self.clock_skew_tolerance.num_seconds()
            ));
        } else if age < -self.clock_skew_tolerance {
            report.add_failure(format!(
                "message timestamp {}s in the future exceeds tolerance of {}s",
                (-age).num_seconds(),
                self.clock_skew_tolerance.num_seconds()
            ));
        }

        report
    }
}

impl Default for MessageValidator {
    fn default() -> Self {
        Self::new(DEFAULT_CLOCK_SKEW_TOLERANCE_SECS)
    }
}

fn recheck_checksum(raw: &[u8]) -> bool {
    if raw.len() < FRAME_CHECKSUM_LEN {
        return false;
    }
    let body_end = raw.len() - FRAME_CHECKSUM_LEN;
    let stored = u32::from_le_bytes([
        raw[body_end],
        raw[body_end + 1],
        raw[body_end + 2],
        raw[body_end + 3],
    ]);
    stored == frame_checksum(&raw[..body_end])
}
