//! TCP ingest server.
//!
//! Accepts terminal connections and runs each through the protocol
//! pipeline:
//!
//! ```text
//! Terminal 01 ┐
//!             │         reader ──> bounded queue ──> worker
//! Terminal 02 ├──> IngestServer        │                │
//!             │                  (backpressure)    Registry ──> Adapter
//! Terminal NN ┘                                         │
//!                                                  response frames
//! ```
//!
//! Each connection owns one reader and one worker task, so a device's
//! frames are processed strictly in arrival order while connections
//! stay independent of each other. The queue between them is bounded;
//! a full queue applies the configured [`BackpressurePolicy`] instead
//! of buffering without limit.
//!
//! Corrupt frames, unknown protocols, and adapter-level failures are
//! logged and counted; only I/O errors end a connection.

use futures::SinkExt;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_util::codec::FramedWrite;
use tracing::{debug, info, warn};

use termlink_adapter::ProtocolRegistry;
use termlink_core::constants::DEFAULT_INGEST_QUEUE_DEPTH;
use termlink_protocol::{Frame, FrameExtractor, WireCodec};

/// What to do with an inbound frame when a connection's queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressurePolicy {
    /// Drop the newly arrived frame; the device notices the missing
    /// response and retries on its own schedule.
    RejectNew,
    /// Evict the oldest queued frame to make room.
    DropOldest,
}

impl std::str::FromStr for BackpressurePolicy {
    type Err = termlink_core::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "reject-new" => Ok(BackpressurePolicy::RejectNew),
            "drop-oldest" => Ok(BackpressurePolicy::DropOldest),
            other => Err(termlink_core::Error::Config(format!(
                "unknown backpressure policy '{other}'"
            ))),
        }
    }
}

/// Configuration for the ingest server.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Address to bind the listener to.
    pub bind_addr: SocketAddr,
    /// Maximum simultaneous connections.
    pub max_connections: usize,
    /// Bound of each connection's inbound frame queue.
    pub queue_depth: usize,
    /// Policy applied when a connection's queue is full.
    pub backpressure: BackpressurePolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7700".parse().expect("static address"),
            max_connections: 1024,
            queue_depth: DEFAULT_INGEST_QUEUE_DEPTH,
            backpressure: BackpressurePolicy::RejectNew,
        }
    }
}

/// Errors from ingest server operations.
#[derive(Debug, Error)]
pub enum IngestServerError {
    #[error("Failed to bind to {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Bounded per-connection frame queue with a backpressure policy.
///
/// The reader pushes, the worker pops; frames leave in arrival order.
pub struct InboundQueue {
    frames: Mutex<VecDeque<Frame>>,
    depth: usize,
    policy: BackpressurePolicy,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl InboundQueue {
    #[must_use]
    pub fn new(depth: usize, policy: BackpressurePolicy) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(depth)),
            depth,
            policy,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a frame, applying the backpressure policy when full.
    pub fn push(&self, frame: Frame) {
        let mut frames = self.frames.lock().unwrap_or_else(|e| e.into_inner());
        if frames.len() >= self.depth {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            match self.policy {
                BackpressurePolicy::RejectNew => {
                    warn!(device = %frame.device_sn(), "ingest queue full, frame rejected");
                    return;
                }
                BackpressurePolicy::DropOldest => {
                    if let Some(evicted) = frames.pop_front() {
                        warn!(device = %evicted.device_sn(), "ingest queue full, oldest frame evicted");
                    }
                }
            }
        }
        frames.push_back(frame);
        drop(frames);
        self.notify.notify_one();
    }

    /// Mark the queue closed (reader finished); the worker drains what
    /// is left and stops.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Wait for the next frame; `None` once the queue is closed and
    /// drained.
    pub async fn next(&self) -> Option<Frame> {
        loop {
            if let Some(frame) = self.pop() {
                return Some(frame);
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    fn pop(&self) -> Option<Frame> {
        self.frames
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frames discarded by the backpressure policy so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// TCP ingest server routing device traffic through the registry.
pub struct IngestServer {
    listener: TcpListener,
    registry: Arc<ProtocolRegistry>,
    config: IngestConfig,
}

impl IngestServer {
    /// Bind the listener.
    ///
    /// # Errors
    /// `IngestServerError::BindFailed` when the address is unavailable.
    pub async fn bind(
        config: IngestConfig,
        registry: Arc<ProtocolRegistry>,
    ) -> Result<Self, IngestServerError> {
        let listener =
            TcpListener::bind(config.bind_addr)
                .await
                .map_err(|source| IngestServerError::BindFailed {
                    addr: config.bind_addr,
                    source,
                })?;
        info!(
            addr = %config.bind_addr,
            max_connections = config.max_connections,
            queue_depth = config.queue_depth,
            policy = ?config.backpressure,
            "ingest server listening"
        );
        Ok(Self {
            listener,
            registry,
            config,
        })
    }

    /// Actual bound address (useful with port 0 in tests).
    pub fn local_addr(&self) -> Result<SocketAddr, IngestServerError> {
        self.listener.local_addr().map_err(Into::into)
    }

    /// Accept connections until the listener fails. Each connection
    /// runs in its own task; an I/O error on one connection never
    /// affects the others.
    pub async fn run(self) -> Result<(), IngestServerError> {
        let active = Arc::new(AtomicUsize::new(0));

        loop {
            let (stream, addr) = self.listener.accept().await?;

            if active.load(Ordering::SeqCst) >= self.config.max_connections {
                warn!(
                    %addr,
                    max_connections = self.config.max_connections,
                    "connection rejected: limit reached"
                );
                drop(stream);
                continue;
            }

            if let Err(e) = stream.set_nodelay(true) {
                warn!(%addr, "failed to set TCP_NODELAY: {e}");
            }

            debug!(%addr, "terminal connected");
            active.fetch_add(1, Ordering::SeqCst);
            let registry = Arc::clone(&self.registry);
            let config = self.config.clone();
            let active = Arc::clone(&active);
            tokio::spawn(async move {
                handle_connection(stream, addr, registry, &config).await;
                active.fetch_sub(1, Ordering::SeqCst);
                debug!(%addr, "terminal disconnected");
            });
        }
    }
}

/// Per-connection pipeline: a reader feeding the bounded queue and a
/// worker draining it in order.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<ProtocolRegistry>,
    config: &IngestConfig,
) {
    let magics = registry.magics();
    let (read_half, write_half) = stream.into_split();
    let sink = FramedWrite::new(write_half, WireCodec::new(magics.clone()));

    let queue = Arc::new(InboundQueue::new(config.queue_depth, config.backpressure));
    let reader = tokio::spawn(read_loop(read_half, magics, Arc::clone(&queue), addr));

    process_loop(sink, queue, registry, addr).await;
    reader.abort();
}

/// Read raw bytes, extract frames, and enqueue them. Corrupt frames
/// are dropped here with a log line; the connection keeps going.
async fn read_loop(
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    magics: Vec<u16>,
    queue: Arc<InboundQueue>,
    addr: SocketAddr,
) {
    let mut extractor = FrameExtractor::new(magics);
    let mut buf = [0u8; 4096];

    loop {
        match read_half.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                extractor.feed(&buf[..n]);
                while let Some(raw) = extractor.next_frame() {
                    match Frame::parse(&raw) {
                        Ok(frame) => queue.push(frame),
                        Err(e) => {
                            // Corrupt bytes are not transient; drop the
                            // frame, keep the stream.
                            warn!(%addr, error = %e, "dropping undecodable frame");
                        }
                    }
                }
            }
            Err(e) => {
                warn!(%addr, error = %e, "connection read failed");
                break;
            }
        }
    }
    queue.close();
}

/// Drain the queue in order: route each frame to its adapter, run the
/// pipeline, and write the response back.
async fn process_loop(
    mut sink: FramedWrite<OwnedWriteHalf, WireCodec>,
    queue: Arc<InboundQueue>,
    registry: Arc<ProtocolRegistry>,
    addr: SocketAddr,
) {
    while let Some(frame) = queue.next().await {
        let adapter = match registry.resolve_frame(&frame) {
            Ok(adapter) => adapter,
            Err(e) => {
                // Unknown protocol: typed error, pipeline keeps serving.
                warn!(%addr, device = %frame.device_sn(), error = %e, "no adapter for frame");
                continue;
            }
        };

        match adapter.process_frame(&frame).await {
            Ok(response) => {
                if let Err(e) = sink.send(response).await {
                    warn!(%addr, device = %frame.device_sn(), error = %e, "response write failed");
                    break;
                }
            }
            Err(e) => {
                warn!(
                    %addr,
                    device = %frame.device_sn(),
                    protocol = %adapter.protocol_type(),
                    error = %e,
                    "frame processing failed"
                );
            }
        }
    }
}
