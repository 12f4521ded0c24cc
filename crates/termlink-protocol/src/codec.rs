//! Tokio codec for the shared wire envelope.
//!
//! [`WireCodec`] adapts the [`FrameExtractor`] to tokio's
//! [`Decoder`]/[`Encoder`] traits so connection handlers can work with
//! `Framed` streams of [`Frame`] values:
//!
//! ```text
//! TCP stream -> Decoder -> Frame (checksum verified)
//! Frame      -> Encoder -> TCP stream
//! ```
//!
//! Decoding yields fully parsed frames; the vendor codec that decodes
//! payloads runs later, after the router has selected an adapter by
//! frame magic. Oversized and checksum-corrupt frames surface as typed
//! errors without desynchronizing the stream.
//!
//! # Usage with Tokio Framed
//!
//! ```rust,no_run
//! use tokio::net::TcpStream;
//! use tokio_util::codec::Framed;
//! use termlink_protocol::{FrameBuilder, WireCodec, WireProfile};
//! use termlink_core::DeviceSn;
//! use futures::{SinkExt, StreamExt};
//!
//! # async fn example() -> termlink_core::Result<()> {
//! let stream = TcpStream::connect("192.168.1.50:7700").await?;
//! let mut framed = Framed::new(stream, WireCodec::new(vec![0x4845]));
//!
//! let heartbeat = FrameBuilder::new(
//!     WireProfile::new(0x4845, 0x0480),
//!     DeviceSn::new("DEV001")?,
//!     0x03,
//!     0x00,
//! )
//! .build()?;
//! framed.send(heartbeat).await?;
//!
//! if let Some(Ok(response)) = framed.next().await {
//!     println!("response: {response}");
//! }
//! # Ok(())
//! # }
//! ```

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::{frame::Frame, stream_parser::FrameExtractor};
use termlink_core::{Error, Result, constants::MAX_FRAME_LEN};

/// Tokio codec turning a byte stream into parsed [`Frame`]s.
#[derive(Debug)]
pub struct WireCodec {
    extractor: FrameExtractor,
    max_frame_len: usize,
}

impl WireCodec {
    /// Create a codec accepting the given protocol magics.
    #[must_use]
    pub fn new(magics: Vec<u16>) -> Self {
        Self {
            extractor: FrameExtractor::new(magics),
            max_frame_len: MAX_FRAME_LEN,
        }
    }

    /// Override the maximum accepted frame size.
    #[must_use]
    pub fn with_max_frame_len(magics: Vec<u16>, max_frame_len: usize) -> Self {
        Self {
            extractor: FrameExtractor::new(magics),
            max_frame_len,
        }
    }

    #[must_use]
    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}

impl Decoder for WireCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if !src.is_empty() {
            // The extractor owns buffering; hand everything over.
            self.extractor.feed(src);
            src.clear();
        }

        match self.extractor.next_frame() {
            Some(raw) => {
                if raw.len() > self.max_frame_len {
                    return Err(Error::FrameTooLarge {
                        size: raw.len(),
                        max_size: self.max_frame_len,
                    });
                }
                Frame::parse(&raw).map(Some)
            }
            None => Ok(None),
        }
    }
}

impl Encoder<Frame> for WireCodec {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        if item.len() > self.max_frame_len {
            return Err(Error::FrameTooLarge {
                size: item.len(),
                max_size: self.max_frame_len,
            });
        }
        dst.extend_from_slice(item.as_bytes());
        Ok(())
    }
}
