//! Wire protocol framework for termlink.
//!
//! All supported vendor protocols share a little-endian binary frame
//! envelope (magic, length, version, device serial, type/command codes,
//! sequence, timestamp, payload, additive checksum); only the payload
//! layout and the magic/version pair are vendor specific. This crate
//! owns the vendor-independent parts:
//!
//! - [`Frame`] / [`FrameBuilder`]: envelope parsing and construction
//! - [`FrameExtractor`]: incremental frame extraction from TCP streams
//! - [`WireCodec`]: tokio codec integration
//! - [`ProtocolMessage`]: the canonical decoded message
//! - [`MessageValidator`]: checksum/freshness re-validation
//! - [`hex`]: hex transport helpers

pub mod codec;
pub mod frame;
pub mod hex;
pub mod message;
pub mod stream_parser;
pub mod validation;

pub use codec::WireCodec;
pub use frame::{Frame, FrameBuilder, WireProfile, frame_checksum};
pub use message::{MessageKind, ProtocolMessage};
pub use stream_parser::FrameExtractor;
pub use validation::{MessageValidator, ValidationReport};
