//! Session store with per-device locking.
//!
//! Every device that has ever contacted the gateway owns one
//! [`DeviceSession`] here. The outer map is read-mostly (`RwLock`);
//! each session sits behind its own `Mutex`, so status transitions for
//! different devices proceed fully in parallel and a registration race
//! for one device serializes on that device's lock alone.
//!
//! Locks are never held across `.await`: all store methods are
//! synchronous and short.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use termlink_core::{DeviceSn, Error, ProtocolType, Result, SessionStatus};

/// Online/Offline transition delivered to the alerting collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionEvent {
    pub device_sn: DeviceSn,
    pub protocol: ProtocolType,
    pub from: SessionStatus,
    pub to: SessionStatus,
    pub at: DateTime<Utc>,
}

/// Per-device lifecycle state.
///
/// Owned exclusively by the [`SessionStore`]; callers only ever see
/// clones taken under the session lock.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSession {
    pub device_sn: DeviceSn,
    pub protocol: ProtocolType,
    pub status: SessionStatus,
    pub last_heartbeat_at: DateTime<Utc>,
    pub registration_metadata: HashMap<String, String>,
    pub consecutive_missed_heartbeats: u32,
    pub failure_count: u32,
    pub registered_at: Option<DateTime<Utc>>,
}

impl DeviceSession {
    fn new(device_sn: DeviceSn, protocol: ProtocolType) -> Self {
        Self {
            device_sn,
            protocol,
            status: SessionStatus::Initialized,
            last_heartbeat_at: Utc::now(),
            registration_metadata: HashMap::new(),
            consecutive_missed_heartbeats: 0,
            failure_count: 0,
            registered_at: None,
        }
    }
}

/// Result of a registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// This call produced the authoritative Online session.
    Registered,
    /// Another registration already won; the existing Online session
    /// was observed instead of creating a duplicate.
    AlreadyOnline,
}

/// Result of recording a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Session was Online; timestamp refreshed.
    Alive,
    /// Session was Offline and has been promoted back to Online.
    Resumed,
}

/// Store owning all device sessions.
pub struct SessionStore {
    sessions: RwLock<HashMap<DeviceSn, Arc<Mutex<DeviceSession>>>>,
    events: Option<mpsc::Sender<TransitionEvent>>,
}

impl SessionStore {
    /// Create a store that publishes Online/Offline transitions to the
    /// given channel.
    #[must_use]
    pub fn new(events: mpsc::Sender<TransitionEvent>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            events: Some(events),
        }
    }

    /// Create a store without an event consumer (tests, tooling).
    #[must_use]
    pub fn detached() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            events: None,
        }
    }

    /// Get or create the session entry for a device (first contact
    /// creates it in `Initialized`).
    ///
    /// # Errors
    /// Returns `Error::ProtocolMismatch` if the device already has a
    /// session bound to a different protocol; switching vendors
    /// requires an explicit deregistration first.
    pub fn ensure(
        &self,
        device_sn: &DeviceSn,
        protocol: &ProtocolType,
    ) -> Result<Arc<Mutex<DeviceSession>>> {
        if let Some(entry) = self.lookup(device_sn) {
            let session = entry.lock().unwrap_or_else(|e| e.into_inner());
            if session.protocol != *protocol {
                return Err(Error::ProtocolMismatch {
                    device: device_sn.to_string(),
                    bound: session.protocol.to_string(),
                    got: protocol.to_string(),
                });
            }
            drop(session);
            return Ok(entry);
        }

        let mut map = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        // Double-check: another task may have inserted while we waited
        // for the write lock.
        if let Some(entry) = map.get(device_sn) {
            return Ok(Arc::clone(entry));
        }
        let entry = Arc::new(Mutex::new(DeviceSession::new(
            device_sn.clone(),
            protocol.clone(),
        )));
        map.insert(device_sn.clone(), Arc::clone(&entry));
        debug!(device = %device_sn, protocol = %protocol, "session created");
        Ok(entry)
    }

    /// Register a device: compare-and-set to the authoritative Online
    /// session.
    ///
    /// Concurrent attempts for the same device serialize on its lock;
    /// exactly one returns [`RegistrationOutcome::Registered`], the
    /// rest observe the existing session.
    ///
    /// # Errors
    /// - `Error::ProtocolMismatch` if the device is bound to another
    ///   protocol
    /// - `Error::InvalidTransition` if the session is in a state that
    ///   cannot begin registration
    pub fn register(
        &self,
        device_sn: &DeviceSn,
        protocol: &ProtocolType,
        metadata: HashMap<String, String>,
    ) -> Result<RegistrationOutcome> {
        let entry = self.ensure(device_sn, protocol)?;
        let mut session = entry.lock().unwrap_or_else(|e| e.into_inner());

        if session.status == SessionStatus::Online {
            return Ok(RegistrationOutcome::AlreadyOnline);
        }

        let from = session.status;
        if !from.can_transition_to(SessionStatus::Registering) {
            return Err(Error::InvalidTransition {
                from: from.to_string(),
                to: SessionStatus::Registering.to_string(),
            });
        }

        let now = Utc::now();
        session.status = SessionStatus::Online;
        session.registration_metadata = metadata;
        session.last_heartbeat_at = now;
        session.consecutive_missed_heartbeats = 0;
        session.failure_count = 0;
        session.registered_at = Some(now);

        self.emit(TransitionEvent {
            device_sn: device_sn.clone(),
            protocol: protocol.clone(),
            from,
            to: SessionStatus::Online,
            at: now,
        });
        debug!(device = %device_sn, protocol = %protocol, "device registered");
        Ok(RegistrationOutcome::Registered)
    }

    /// Record a heartbeat.
    ///
    /// Idempotent: repeated heartbeats within an interval only refresh
    /// `last_heartbeat_at`. An Offline session is promoted back to
    /// Online (with a transition event).
    ///
    /// # Errors
    /// - `Error::DeviceNotRegistered` for an unknown device
    /// - `Error::DeviceNotOnline` if the session has not completed
    ///   registration (the device must register first)
    pub fn record_heartbeat(&self, device_sn: &DeviceSn) -> Result<HeartbeatOutcome> {
        let entry = self
            .lookup(device_sn)
            .ok_or_else(|| Error::DeviceNotRegistered(device_sn.to_string()))?;
        let mut session = entry.lock().unwrap_or_else(|e| e.into_inner());

        let now = Utc::now();
        match session.status {
            SessionStatus::Online => {
                session.last_heartbeat_at = now;
                session.consecutive_missed_heartbeats = 0;
                Ok(HeartbeatOutcome::Alive)
            }
            SessionStatus::Offline => {
                let protocol = session.protocol.clone();
                session.status = SessionStatus::Online;
                session.last_heartbeat_at = now;
                session.consecutive_missed_heartbeats = 0;
                self.emit(TransitionEvent {
                    device_sn: device_sn.clone(),
                    protocol,
                    from: SessionStatus::Offline,
                    to: SessionStatus::Online,
                    at: now,
                });
                Ok(HeartbeatOutcome::Resumed)
            }
            status => Err(Error::DeviceNotOnline {
                device: device_sn.to_string(),
                status: status.to_string(),
            }),
        }
    }

    /// Demote an Online session whose last heartbeat predates
    /// `stale_before`. Returns `true` only when this call performed the
    /// demotion, so an already-Offline session never produces a second
    /// event.
    pub fn demote_if_stale(&self, device_sn: &DeviceSn, stale_before: DateTime<Utc>) -> bool {
        let Some(entry) = self.lookup(device_sn) else {
            return false;
        };
        let mut session = entry.lock().unwrap_or_else(|e| e.into_inner());

        if session.status != SessionStatus::Online || session.last_heartbeat_at >= stale_before {
            return false;
        }

        let protocol = session.protocol.clone();
        session.status = SessionStatus::Offline;
        session.consecutive_missed_heartbeats += 1;
        let now = Utc::now();
        self.emit(TransitionEvent {
            device_sn: device_sn.clone(),
            protocol,
            from: SessionStatus::Online,
            to: SessionStatus::Offline,
            at: now,
        });
        true
    }

    /// Record a checksum failure; at `limit` consecutive failures the
    /// session is parked in `Error` until explicit re-registration.
    ///
    /// Unknown devices are ignored (returns 0): corrupt frames carry
    /// unreliable serials.
    pub fn record_checksum_failure(&self, device_sn: &DeviceSn, limit: u32) -> u32 {
        let Some(entry) = self.lookup(device_sn) else {
            return 0;
        };
        let mut session = entry.lock().unwrap_or_else(|e| e.into_inner());

        session.failure_count += 1;
        if session.failure_count >= limit && session.status.can_transition_to(SessionStatus::Error)
        {
            warn!(
                device = %device_sn,
                failures = session.failure_count,
                "checksum failure limit reached, session moved to Error"
            );
            session.status = SessionStatus::Error;
        }
        session.failure_count
    }

    /// Snapshot of a session for status queries.
    #[must_use]
    pub fn snapshot(&self, device_sn: &DeviceSn) -> Option<DeviceSession> {
        self.lookup(device_sn)
            .map(|entry| entry.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    /// Current status of a device, if known.
    #[must_use]
    pub fn status(&self, device_sn: &DeviceSn) -> Option<SessionStatus> {
        self.snapshot(device_sn).map(|s| s.status)
    }

    /// Remove a session. Only explicit deregistration or administrative
    /// action calls this; the sweeper never deletes.
    pub fn deregister(&self, device_sn: &DeviceSn) -> bool {
        let mut map = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        map.remove(device_sn).is_some()
    }

    /// Serials of all sessions currently Online (sweeper scan set).
    #[must_use]
    pub fn online_devices(&self) -> Vec<DeviceSn> {
        let map = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        map.iter()
            .filter(|(_, entry)| {
                entry.lock().unwrap_or_else(|e| e.into_inner()).status == SessionStatus::Online
            })
            .map(|(sn, _)| sn.clone())
            .collect()
    }

    /// Online sessions bound to one protocol. Each adapter's sweeper
    /// scans only its own devices so per-protocol heartbeat settings
    /// never demote another vendor's sessions.
    #[must_use]
    pub fn online_devices_of(&self, protocol: &ProtocolType) -> Vec<DeviceSn> {
        let map = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        map.iter()
            .filter(|(_, entry)| {
                let session = entry.lock().unwrap_or_else(|e| e.into_inner());
                session.status == SessionStatus::Online && session.protocol == *protocol
            })
            .map(|(sn, _)| sn.clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, device_sn: &DeviceSn) -> Option<Arc<Mutex<DeviceSession>>> {
        let map = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        map.get(device_sn).cloned()
    }

    fn emit(&self, event: TransitionEvent) {
        if let Some(events) = &self.events
            && let Err(e) = events.try_send(event)
        {
            // Alerting is advisory; a saturated consumer must not
            // stall session transitions.
            warn!("transition event dropped: {e}");
        }
    }
}
