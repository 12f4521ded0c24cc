//! Per-device protocol configuration.
//!
//! Configuration lives in an external store; [`ProtocolConfigStore`] is
//! the seam and [`MemoryConfigStore`] the in-process implementation used
//! by the gateway and tests. Adapters hold no durable state of their
//! own.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::Duration;

use crate::dispatch::RetryPolicy;
use termlink_core::{
    BusinessKind, DeviceOperation, DeviceSn, Result,
    constants::{
        DEFAULT_CHECKSUM_FAILURE_LIMIT, DEFAULT_CLOCK_SKEW_TOLERANCE_SECS,
        DEFAULT_DISPATCH_TIMEOUT_MS, DEFAULT_HEARTBEAT_INTERVAL_SECS,
        DEFAULT_MISSED_HEARTBEAT_THRESHOLD, MAX_DISPATCH_TIMEOUT_MS, MIN_DISPATCH_TIMEOUT_MS,
    },
};

/// Tunable per-device protocol settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    pub heartbeat_interval_secs: u64,
    pub missed_heartbeat_threshold: u32,
    pub clock_skew_tolerance_secs: i64,
    pub checksum_failure_limit: u32,
    pub dispatch_timeout_ms: u64,
    pub retry: RetryPolicy,
    /// Operations this device is authorized to perform.
    pub authorized_operations: HashSet<DeviceOperation>,
}

impl ProtocolConfig {
    /// Default configuration for a device of the given business domain.
    #[must_use]
    pub fn for_business(kind: BusinessKind) -> Self {
        let authorized_operations = match kind {
            BusinessKind::Access => HashSet::from([
                DeviceOperation::StatusQuery,
                DeviceOperation::EventUpload,
                DeviceOperation::DoorControl,
                DeviceOperation::ConfigPush,
            ]),
            BusinessKind::Attendance => HashSet::from([
                DeviceOperation::StatusQuery,
                DeviceOperation::ClockUpload,
                DeviceOperation::ConfigPush,
            ]),
            BusinessKind::Consume => HashSet::from([
                DeviceOperation::StatusQuery,
                DeviceOperation::AccountQuery,
                DeviceOperation::ConsumeDebit,
                DeviceOperation::EventUpload,
                DeviceOperation::ConfigPush,
            ]),
        };

        Self {
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            missed_heartbeat_threshold: DEFAULT_MISSED_HEARTBEAT_THRESHOLD,
            clock_skew_tolerance_secs: DEFAULT_CLOCK_SKEW_TOLERANCE_SECS,
            checksum_failure_limit: DEFAULT_CHECKSUM_FAILURE_LIMIT,
            dispatch_timeout_ms: DEFAULT_DISPATCH_TIMEOUT_MS,
            retry: RetryPolicy::default(),
            authorized_operations,
        }
    }

    /// Dispatch timeout, clamped to the supported range.
    #[must_use]
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(
            self.dispatch_timeout_ms
                .clamp(MIN_DISPATCH_TIMEOUT_MS, MAX_DISPATCH_TIMEOUT_MS),
        )
    }

    #[must_use]
    pub fn authorizes(&self, operation: DeviceOperation) -> bool {
        self.authorized_operations.contains(&operation)
    }
}

/// External store for per-device protocol configuration.
pub trait ProtocolConfigStore: Send + Sync {
    fn get(&self, device_sn: &DeviceSn) -> Option<ProtocolConfig>;
    fn put(&self, device_sn: &DeviceSn, config: ProtocolConfig) -> Result<()>;
}

/// In-memory configuration store.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    entries: RwLock<HashMap<DeviceSn, ProtocolConfig>>,
}

impl MemoryConfigStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProtocolConfigStore for MemoryConfigStore {
    fn get(&self, device_sn: &DeviceSn) -> Option<ProtocolConfig> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(device_sn)
            .cloned()
    }

    fn put(&self, device_sn: &DeviceSn, config: ProtocolConfig) -> Result<()> {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(device_sn.clone(), config);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_defaults() {
        let access = ProtocolConfig::for_business(BusinessKind::Access);
        assert!(access.authorizes(DeviceOperation::DoorControl));
        assert!(!access.authorizes(DeviceOperation::ConsumeDebit));

        let consume = ProtocolConfig::for_business(BusinessKind::Consume);
        assert!(consume.authorizes(DeviceOperation::ConsumeDebit));
        assert!(consume.authorizes(DeviceOperation::AccountQuery));
        assert!(!consume.authorizes(DeviceOperation::DoorControl));

        let attendance = ProtocolConfig::for_business(BusinessKind::Attendance);
        assert!(attendance.authorizes(DeviceOperation::ClockUpload));
        assert!(!attendance.authorizes(DeviceOperation::EventUpload));
    }

    #[test]
    fn test_dispatch_timeout_clamped() {
        let mut config = ProtocolConfig::for_business(BusinessKind::Access);
        config.dispatch_timeout_ms = 10;
        assert_eq!(
            config.dispatch_timeout(),
            Duration::from_millis(MIN_DISPATCH_TIMEOUT_MS)
        );

        config.dispatch_timeout_ms = 60_000;
        assert_eq!(
            config.dispatch_timeout(),
            Duration::from_millis(MAX_DISPATCH_TIMEOUT_MS)
        );
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryConfigStore::new();
        let device = DeviceSn::new("DEV001").unwrap();
        assert!(store.get(&device).is_none());

        let mut config = ProtocolConfig::for_business(BusinessKind::Access);
        config.heartbeat_interval_secs = 10;
        store.put(&device, config.clone()).unwrap();

        assert_eq!(store.get(&device), Some(config));
    }
}
