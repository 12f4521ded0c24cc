//! Protocol registry and router.
//!
//! One adapter instance serves one protocol type. Registration is
//! add-only (startup or explicit admin reload); lookups are concurrent
//! reads. Inbound frames are routed by wire magic; subsequent traffic
//! for a known device resolves through the protocol its session is
//! bound to. An unknown protocol yields a typed error and the ingest
//! pipeline keeps serving other devices.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

use termlink_core::{DeviceSn, Error, ProtocolType, Result};
use termlink_protocol::Frame;
use termlink_session::SessionStore;

use crate::adapter::AnyAdapter;
use crate::stats::StatsSnapshot;

/// Registry mapping protocol types (and wire magics) to adapters.
#[derive(Default)]
pub struct ProtocolRegistry {
    by_type: RwLock<HashMap<ProtocolType, Arc<AnyAdapter>>>,
    by_magic: RwLock<HashMap<u16, ProtocolType>>,
}

impl ProtocolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter.
    ///
    /// # Errors
    /// `Error::DuplicateProtocol` when the protocol type or its wire
    /// magic is already registered; exactly one adapter serves a
    /// protocol at a time.
    pub fn register(&self, adapter: AnyAdapter) -> Result<()> {
        let protocol = adapter.protocol_type().clone();
        let magic = adapter.wire_profile().magic;

        let mut by_type = self.by_type.write().unwrap_or_else(|e| e.into_inner());
        let mut by_magic = self.by_magic.write().unwrap_or_else(|e| e.into_inner());

        if by_type.contains_key(&protocol) {
            return Err(Error::DuplicateProtocol(protocol.to_string()));
        }
        if let Some(existing) = by_magic.get(&magic) {
            return Err(Error::DuplicateProtocol(format!(
                "magic {magic:#06x} already serves {existing}"
            )));
        }

        info!(protocol = %protocol, magic = format_args!("{magic:#06x}"), "protocol adapter registered");
        by_magic.insert(magic, protocol.clone());
        by_type.insert(protocol, Arc::new(adapter));
        Ok(())
    }

    /// Resolve an adapter by protocol type.
    ///
    /// # Errors
    /// `Error::UnsupportedProtocol` for unknown types.
    pub fn resolve(&self, protocol: &ProtocolType) -> Result<Arc<AnyAdapter>> {
        self.by_type
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(protocol)
            .cloned()
            .ok_or_else(|| Error::UnsupportedProtocol(protocol.to_string()))
    }

    /// Resolve an adapter by wire magic (handshake/registration path).
    pub fn resolve_magic(&self, magic: u16) -> Result<Arc<AnyAdapter>> {
        let protocol = self
            .by_magic
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&magic)
            .cloned()
            .ok_or_else(|| Error::UnsupportedProtocol(format!("magic {magic:#06x}")))?;
        self.resolve(&protocol)
    }

    /// Resolve the adapter for an inbound frame.
    pub fn resolve_frame(&self, frame: &Frame) -> Result<Arc<AnyAdapter>> {
        self.resolve_magic(frame.magic())
    }

    /// Resolve through the protocol a device's session is bound to.
    ///
    /// # Errors
    /// `Error::DeviceNotRegistered` when the device has no session.
    pub fn resolve_device(&self, device_sn: &DeviceSn, store: &SessionStore) -> Result<Arc<AnyAdapter>> {
        let session = store
            .snapshot(device_sn)
            .ok_or_else(|| Error::DeviceNotRegistered(device_sn.to_string()))?;
        self.resolve(&session.protocol)
    }

    /// Registered protocol types.
    #[must_use]
    pub fn protocols(&self) -> Vec<ProtocolType> {
        self.by_type
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Wire magics of all registered adapters (codec configuration).
    #[must_use]
    pub fn magics(&self) -> Vec<u16> {
        self.by_magic
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect()
    }

    /// All registered adapters.
    #[must_use]
    pub fn adapters(&self) -> Vec<Arc<AnyAdapter>> {
        self.by_type
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_type.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Initialize every adapter; the first failure aborts startup.
    ///
    /// # Errors
    /// The failing adapter's `Error::InitializationFailed`, surfaced to
    /// the startup supervisor.
    pub async fn initialize_all(&self) -> Result<()> {
        for adapter in self.adapters() {
            adapter.initialize().await?;
        }
        Ok(())
    }

    /// Destroy every adapter (drain + cancel dispatches). Idempotent.
    pub async fn destroy_all(&self) {
        for adapter in self.adapters() {
            adapter.destroy().await;
        }
    }

    /// Statistics snapshots for the metrics collector.
    #[must_use]
    pub fn statistics(&self) -> Vec<StatsSnapshot> {
        self.adapters()
            .iter()
            .map(|adapter| adapter.statistics())
            .collect()
    }
}
