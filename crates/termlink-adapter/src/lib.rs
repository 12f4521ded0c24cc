//! Protocol adapters for termlink.
//!
//! The unit of integration is the [`ProtocolAdapter`]: vendor identity,
//! message parse/build, validation, permission checks, the device
//! lifecycle state machine, asynchronous business dispatch, and vendor
//! error translation, all around a per-vendor [`VendorCodec`]. The
//! closed set of vendors lives in [`vendors`] and is dispatched through
//! [`AnyAdapter`]; the [`ProtocolRegistry`] routes inbound traffic to
//! the right adapter by protocol type or wire magic.

pub mod adapter;
pub mod config;
pub mod dispatch;
pub mod error_map;
pub mod registry;
pub mod stats;
pub mod vendors;

pub use adapter::{
    AdapterDescriptor, AnyAdapter, BusinessFields, PermissionDecision, ProtocolAdapter,
    ResponseKind, ResponseParts, VendorCodec,
};
pub use config::{MemoryConfigStore, ProtocolConfig, ProtocolConfigStore};
pub use dispatch::{
    BusinessDispatcher, DispatchHandle, DispatchRequest, HandlerCall, ProcessOutcome, RetryPolicy,
};
pub use error_map::{ErrorMapper, ProtocolErrorResponse, UNKNOWN_ERROR_CODE};
pub use registry::ProtocolRegistry;
pub use stats::{AdapterStats, StatsSnapshot};
pub use vendors::{EntropyAccessCodec, RealandAttendanceCodec, ZktecoConsumeCodec};
