//! TCP ingest layer for termlink.
//!
//! [`IngestServer`] accepts terminal connections, extracts frames from
//! the byte stream, and drives each connection's traffic through the
//! protocol registry in arrival order with bounded buffering (see
//! [`BackpressurePolicy`]).

pub mod server;

pub use server::{BackpressurePolicy, InboundQueue, IngestConfig, IngestServer, IngestServerError};
