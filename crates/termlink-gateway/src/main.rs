//! termlink gateway binary.
//!
//! Wires the full stack together: one shared session store, the three
//! vendor adapters behind the protocol registry, a heartbeat sweeper
//! per adapter, stub business handlers, an alert logger, and the TCP
//! ingest server. Configuration comes from the environment:
//!
//! - `TERMLINK_BIND`: listen address (default `0.0.0.0:7700`)
//! - `TERMLINK_MAX_CONNECTIONS`: connection limit (default 1024)
//! - `TERMLINK_QUEUE_DEPTH`: per-connection queue bound (default 64)
//! - `TERMLINK_BACKPRESSURE`: `reject-new` or `drop-oldest`
//! - `RUST_LOG`: tracing filter (default `info`)
//!
//! The stub handlers acknowledge every business call; production
//! deployments replace them with the real access/attendance/consume
//! collaborators by consuming the dispatcher channels instead.

use anyhow::Context;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use termlink_adapter::{
    AnyAdapter, BusinessDispatcher, EntropyAccessCodec, HandlerCall, MemoryConfigStore,
    ProcessOutcome, ProtocolAdapter, ProtocolConfigStore, ProtocolRegistry,
    RealandAttendanceCodec, VendorCodec, ZktecoConsumeCodec,
};
use termlink_core::BusinessKind;
use termlink_core::constants::DEFAULT_INGEST_QUEUE_DEPTH;
use termlink_network::{BackpressurePolicy, IngestConfig, IngestServer};
use termlink_session::{
    HeartbeatSweeper, SessionStore, SweeperConfig, TransitionEvent,
};

#[derive(Debug)]
struct GatewayConfig {
    bind_addr: SocketAddr,
    max_connections: usize,
    queue_depth: usize,
    backpressure: BackpressurePolicy,
}

impl GatewayConfig {
    fn from_env() -> anyhow::Result<Self> {
        let bind_addr = std::env::var("TERMLINK_BIND")
            .unwrap_or_else(|_| "0.0.0.0:7700".to_string())
            .parse()
            .context("TERMLINK_BIND is not a valid socket address")?;

        let max_connections = env_usize("TERMLINK_MAX_CONNECTIONS", 1024)?;
        let queue_depth = env_usize("TERMLINK_QUEUE_DEPTH", DEFAULT_INGEST_QUEUE_DEPTH)?;

        let backpressure = match std::env::var("TERMLINK_BACKPRESSURE") {
            Ok(value) => value
                .parse()
                .context("TERMLINK_BACKPRESSURE must be reject-new or drop-oldest")?,
            Err(_) => BackpressurePolicy::RejectNew,
        };

        Ok(Self {
            bind_addr,
            max_connections,
            queue_depth,
            backpressure,
        })
    }
}

fn env_usize(name: &str, default: usize) -> anyhow::Result<usize> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("{name} must be a positive integer")),
        Err(_) => Ok(default),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = GatewayConfig::from_env()?;
    info!(?config, "starting termlink gateway");

    // Session store shared by all adapters; transitions feed the
    // alerting channel.
    let (alert_tx, alert_rx) = mpsc::channel(256);
    let store = Arc::new(SessionStore::new(alert_tx));
    tokio::spawn(alert_logger(alert_rx));

    let config_store: Arc<dyn ProtocolConfigStore> = Arc::new(MemoryConfigStore::new());

    let registry = Arc::new(ProtocolRegistry::new());
    registry
        .register(AnyAdapter::Entropy(build_adapter(
            EntropyAccessCodec::new(),
            &store,
            &config_store,
        )))
        .context("registering access adapter")?;
    registry
        .register(AnyAdapter::Zkteco(build_adapter(
            ZktecoConsumeCodec::new(),
            &store,
            &config_store,
        )))
        .context("registering consume adapter")?;
    registry
        .register(AnyAdapter::Realand(build_adapter(
            RealandAttendanceCodec::new(),
            &store,
            &config_store,
        )))
        .context("registering attendance adapter")?;

    // Adapter initialization failure is fatal: the gateway never starts
    // serving with a half-initialized registry.
    registry
        .initialize_all()
        .await
        .context("adapter initialization failed")?;

    // One sweeper per adapter, scoped to its protocol.
    let mut sweepers = Vec::new();
    for adapter in registry.adapters() {
        let sweeper = HeartbeatSweeper::for_protocol(
            Arc::clone(&store),
            SweeperConfig::default(),
            adapter.protocol_type().clone(),
        );
        sweepers.push(sweeper.start());
    }

    let ingest_config = IngestConfig {
        bind_addr: config.bind_addr,
        max_connections: config.max_connections,
        queue_depth: config.queue_depth,
        backpressure: config.backpressure,
    };
    let server = IngestServer::bind(ingest_config, Arc::clone(&registry))
        .await
        .context("binding ingest server")?;

    tokio::select! {
        result = server.run() => {
            result.context("ingest server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    for mut handle in sweepers {
        handle.stop().await;
    }
    registry.destroy_all().await;
    info!("termlink gateway stopped");
    Ok(())
}

/// Build one adapter with its own dispatcher and a stub handler task
/// consuming the dispatcher's channel.
fn build_adapter<C: VendorCodec>(
    codec: C,
    store: &Arc<SessionStore>,
    config_store: &Arc<dyn ProtocolConfigStore>,
) -> ProtocolAdapter<C> {
    let dispatcher = BusinessDispatcher::default();
    let kind = codec.business_kind();
    let handler_rx = dispatcher.register_handler(kind);
    tokio::spawn(handler_stub(kind, handler_rx));

    ProtocolAdapter::new(
        codec,
        Arc::clone(store),
        dispatcher,
        Arc::clone(config_store),
    )
}

/// Placeholder business collaborator: logs every call and acknowledges
/// it. Queries get a permissive canned answer.
async fn handler_stub(kind: BusinessKind, mut calls: mpsc::Receiver<HandlerCall>) {
    while let Some(call) = calls.recv().await {
        info!(
            kind = %kind,
            device = %call.device_sn,
            business_type = %call.business_type,
            dispatch_id = %call.id,
            "business call handled by stub"
        );
        let reply = match call.business_type.as_str() {
            "ACCESS_VERIFY" => ProcessOutcome::ok(json!({"allowed": true})),
            "ACCOUNT_QUERY" => {
                let credential = call
                    .payload
                    .get("credential")
                    .cloned()
                    .unwrap_or(json!(""));
                ProcessOutcome::ok(json!({"credential": credential, "balance_cents": 0}))
            }
            _ => ProcessOutcome::ok(json!({"accepted": true})),
        };
        let _ = call.reply.send(reply);
    }
}

/// Alerting collaborator stand-in: logs Online/Offline transitions.
async fn alert_logger(mut events: mpsc::Receiver<TransitionEvent>) {
    while let Some(event) = events.recv().await {
        if event.to == termlink_core::SessionStatus::Offline {
            warn!(
                device = %event.device_sn,
                protocol = %event.protocol,
                from = %event.from,
                to = %event.to,
                "device went offline"
            );
        } else {
            info!(
                device = %event.device_sn,
                protocol = %event.protocol,
                from = %event.from,
                to = %event.to,
                "device transition"
            );
        }
    }
}
