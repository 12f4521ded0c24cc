//! Heartbeat sweeper.
//!
//! One background task per adapter scans the session store on a fixed
//! interval and demotes Online sessions whose last heartbeat is older
//! than `interval × missed_threshold`. Staleness is measured with
//! wall-clock deltas, not counted sweep passes, so scheduler jitter or
//! a delayed tick cannot produce false-positive timeouts.
//!
//! The store guarantees the demotion itself is exactly-once, so a
//! session that stays Offline across many sweeps emits a single event.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::store::SessionStore;
use termlink_core::ProtocolType;
use termlink_core::constants::{DEFAULT_HEARTBEAT_INTERVAL_SECS, DEFAULT_MISSED_HEARTBEAT_THRESHOLD};

/// Sweeper timing configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweeperConfig {
    /// Expected heartbeat interval.
    pub interval: Duration,
    /// Consecutive missed intervals before demotion.
    pub missed_threshold: u32,
}

impl SweeperConfig {
    /// The wall-clock age beyond which an Online session is stale.
    #[must_use]
    pub fn stale_age(&self) -> Duration {
        self.interval * self.missed_threshold
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            missed_threshold: DEFAULT_MISSED_HEARTBEAT_THRESHOLD,
        }
    }
}

/// Periodic background task demoting stale sessions.
///
/// One sweeper runs per adapter; scoping it to that adapter's protocol
/// keeps per-vendor heartbeat settings from demoting another vendor's
/// devices.
pub struct HeartbeatSweeper {
    store: Arc<SessionStore>,
    config: SweeperConfig,
    protocol: Option<ProtocolType>,
}

impl HeartbeatSweeper {
    /// Sweeper over every session in the store.
    #[must_use]
    pub fn new(store: Arc<SessionStore>, config: SweeperConfig) -> Self {
        Self {
            store,
            config,
            protocol: None,
        }
    }

    /// Sweeper scoped to sessions bound to one protocol.
    #[must_use]
    pub fn for_protocol(
        store: Arc<SessionStore>,
        config: SweeperConfig,
        protocol: ProtocolType,
    ) -> Self {
        Self {
            store,
            config,
            protocol: Some(protocol),
        }
    }

    /// Spawn the sweep loop. The returned handle stops it.
    #[must_use]
    pub fn start(self) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let store = self.store;
        let config = self.config;
        let protocol = self.protocol;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let demoted = sweep_scope(&store, &config, protocol.as_ref());
                        if demoted > 0 {
                            debug!(demoted, "sweep demoted stale sessions");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        info!("heartbeat sweeper stopping");
                        break;
                    }
                }
            }
        });

        SweeperHandle {
            task: Some(task),
            shutdown_tx,
        }
    }
}

/// Run a single sweep pass over all sessions. Returns the number of
/// sessions demoted.
///
/// Exposed so callers (and tests) can force a pass without waiting for
/// the ticker.
pub fn sweep_once(store: &SessionStore, config: &SweeperConfig) -> usize {
    sweep_scope(store, config, None)
}

/// Run a single sweep pass over the sessions of one protocol.
pub fn sweep_protocol_once(
    store: &SessionStore,
    config: &SweeperConfig,
    protocol: &ProtocolType,
) -> usize {
    sweep_scope(store, config, Some(protocol))
}

fn sweep_scope(
    store: &SessionStore,
    config: &SweeperConfig,
    protocol: Option<&ProtocolType>,
) -> usize {
    let stale_age = ChronoDuration::from_std(config.stale_age())
        .unwrap_or_else(|_| ChronoDuration::seconds(i64::MAX / 1_000));
    let stale_before = Utc::now() - stale_age;

    let scan = match protocol {
        Some(protocol) => store.online_devices_of(protocol),
        None => store.online_devices(),
    };
    scan.iter()
        .filter(|sn| store.demote_if_stale(sn, stale_before))
        .count()
}

/// Handle controlling a running sweeper.
pub struct SweeperHandle {
    task: Option<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for the task to finish.
    ///
    /// Idempotent: repeated calls are no-ops.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = self.shutdown_tx.send(true);
            let _ = task.await;
        }
    }

    /// Whether the sweeper task is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}
