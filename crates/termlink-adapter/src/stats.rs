//! Per-adapter counters for the metrics collector.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use termlink_core::{AdapterState, ProtocolType};

/// Lock-free counters updated on the message path.
#[derive(Debug, Default)]
pub struct AdapterStats {
    requests: AtomicU64,
    parse_errors: AtomicU64,
    build_errors: AtomicU64,
    validation_failures: AtomicU64,
    permission_denials: AtomicU64,
    dispatches: AtomicU64,
    dispatch_failures: AtomicU64,
    registrations: AtomicU64,
    heartbeats: AtomicU64,
    vendor_errors: AtomicU64,
}

impl AdapterStats {
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_build_error(&self) {
        self.build_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_validation_failure(&self) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_permission_denial(&self) {
        self.permission_denials.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch_failure(&self) {
        self.dispatch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_registration(&self) {
        self.registrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_heartbeat(&self) {
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_vendor_error(&self) {
        self.vendor_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time snapshot for the metrics collector.
    #[must_use]
    pub fn snapshot(&self, protocol: &ProtocolType, state: AdapterState) -> StatsSnapshot {
        StatsSnapshot {
            protocol_type: protocol.as_str().to_string(),
            adapter_state: state,
            requests: self.requests.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            build_errors: self.build_errors.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            permission_denials: self.permission_denials.load(Ordering::Relaxed),
            dispatches: self.dispatches.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            registrations: self.registrations.load(Ordering::Relaxed),
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
            vendor_errors: self.vendor_errors.load(Ordering::Relaxed),
        }
    }
}

/// Serializable statistics snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub protocol_type: String,
    pub adapter_state: AdapterState,
    pub requests: u64,
    pub parse_errors: u64,
    pub build_errors: u64,
    pub validation_failures: u64,
    pub permission_denials: u64,
    pub dispatches: u64,
    pub dispatch_failures: u64,
    pub registrations: u64,
    pub heartbeats: u64,
    pub vendor_errors: u64,
}
