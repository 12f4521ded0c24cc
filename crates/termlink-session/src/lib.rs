//! Device session tracking for termlink.
//!
//! The [`SessionStore`] owns every [`DeviceSession`] and guards each one
//! with its own lock, so operations on different devices never contend.
//! The [`HeartbeatSweeper`] demotes stale sessions in the background and
//! the store emits exactly-once Online/Offline [`TransitionEvent`]s for
//! the alerting collaborator.

pub mod store;
pub mod sweeper;

pub use store::{
    DeviceSession, HeartbeatOutcome, RegistrationOutcome, SessionStore, TransitionEvent,
};
pub use sweeper::{HeartbeatSweeper, SweeperConfig, SweeperHandle, sweep_once, sweep_protocol_once};
