//! Asynchronous business dispatch.
//!
//! Decoded business payloads are routed to external domain handlers
//! (access, attendance, consume) over bounded mpsc channels. A dispatch
//! returns a [`DispatchHandle`] immediately; the eventual
//! [`ProcessOutcome`] arrives through the handle, never by blocking the
//! caller.
//!
//! Each attempt carries a per-call timeout. Failed attempts are retried
//! per [`RetryPolicy`] only when the operation is idempotent; a consume
//! debit or a door command is never silently replayed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use termlink_core::{
    BusinessKind, DeviceOperation, DeviceSn,
    constants::{DEFAULT_HANDLER_QUEUE_DEPTH, DEFAULT_MAX_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY_MS},
};

/// Outcome code reported when a dispatch is cancelled during shutdown.
pub const CANCELLED_CODE: &str = "CANCELLED";

/// Retry policy for failed dispatch attempts.
///
/// Applied only to idempotent operations; the dispatcher clamps
/// everything else to a single attempt regardless of this policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before a retry attempt.
    pub delay_ms: u64,
    /// Double the delay after every failed attempt.
    pub exponential_backoff: bool,
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            delay_ms: 0,
            exponential_backoff: false,
        }
    }

    fn delay_after(&self, attempt: u32) -> Duration {
        let delay = if self.exponential_backoff {
            self.delay_ms.saturating_mul(1u64 << (attempt - 1).min(16))
        } else {
            self.delay_ms
        };
        Duration::from_millis(delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            delay_ms: DEFAULT_RETRY_DELAY_MS,
            exponential_backoff: false,
        }
    }
}

/// Result of a business dispatch, delivered through a [`DispatchHandle`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessOutcome {
    pub success: bool,
    pub data: Option<Value>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl ProcessOutcome {
    /// Successful outcome carrying handler data.
    #[must_use]
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error_code: None,
            error_message: None,
        }
    }

    /// Successful outcome without data.
    #[must_use]
    pub fn ok_empty() -> Self {
        Self {
            success: true,
            data: None,
            error_code: None,
            error_message: None,
        }
    }

    /// Failed outcome with an error code and message.
    #[must_use]
    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error_code: Some(code.into()),
            error_message: Some(message.into()),
        }
    }

    /// Outcome of a dispatch cancelled during shutdown.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::failure(CANCELLED_CODE, "dispatch cancelled during shutdown")
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.error_code.as_deref() == Some(CANCELLED_CODE)
    }
}

/// A business call to be routed to an external handler.
#[derive(Debug)]
pub struct DispatchRequest {
    pub kind: BusinessKind,
    /// Vendor business tag (e.g. `REAL_TIME_EVENT`, `ACCOUNT_QUERY`).
    pub business_type: String,
    pub operation: DeviceOperation,
    pub device_sn: DeviceSn,
    pub payload: Value,
    /// Per-attempt reply timeout.
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

/// Call delivered to an external business handler.
///
/// The handler replies through `reply`; dropping it counts as a handler
/// failure, not a hang.
#[derive(Debug)]
pub struct HandlerCall {
    pub id: Uuid,
    pub business_type: String,
    pub device_sn: DeviceSn,
    pub payload: Value,
    pub reply: oneshot::Sender<ProcessOutcome>,
}

/// Future-like handle to a dispatch in flight.
#[derive(Debug)]
pub struct DispatchHandle {
    id: Uuid,
    rx: oneshot::Receiver<ProcessOutcome>,
}

impl DispatchHandle {
    fn pending(id: Uuid) -> (Self, oneshot::Sender<ProcessOutcome>) {
        let (tx, rx) = oneshot::channel();
        (Self { id, rx }, tx)
    }

    /// A handle already carrying its outcome (rejected or short-circuited
    /// dispatches).
    #[must_use]
    pub fn resolved(outcome: ProcessOutcome) -> Self {
        let (handle, tx) = Self::pending(Uuid::new_v4());
        let _ = tx.send(outcome);
        handle
    }

    /// Correlation id of this dispatch.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the outcome.
    ///
    /// A dispatch whose driver task disappeared (runtime shutdown)
    /// resolves as cancelled rather than hanging.
    pub async fn outcome(self) -> ProcessOutcome {
        self.rx.await.unwrap_or_else(|_| ProcessOutcome::cancelled())
    }
}

struct DispatcherInner {
    handlers: std::sync::RwLock<HashMap<BusinessKind, mpsc::Sender<HandlerCall>>>,
    queue_depth: usize,
    in_flight: AtomicUsize,
    cancel_tx: watch::Sender<bool>,
}

/// Routes business calls to external handlers with timeout and
/// idempotent-only retry.
///
/// Cloning is cheap; clones share the same handler channels and
/// shutdown state.
#[derive(Clone)]
pub struct BusinessDispatcher {
    inner: Arc<DispatcherInner>,
}

impl BusinessDispatcher {
    /// Create a dispatcher whose handler channels hold `queue_depth`
    /// pending calls each.
    #[must_use]
    pub fn new(queue_depth: usize) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(DispatcherInner {
                handlers: std::sync::RwLock::new(HashMap::new()),
                queue_depth,
                in_flight: AtomicUsize::new(0),
                cancel_tx,
            }),
        }
    }

    /// Register the handler for one business kind and return the
    /// receiving end of its call channel.
    ///
    /// The external collaborator owns the receiver and replies through
    /// each call's oneshot. Re-registering a kind replaces the previous
    /// channel.
    #[must_use]
    pub fn register_handler(&self, kind: BusinessKind) -> mpsc::Receiver<HandlerCall> {
        let (tx, rx) = mpsc::channel(self.inner.queue_depth);
        let mut handlers = self
            .inner
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if handlers.insert(kind, tx).is_some() {
            warn!(kind = %kind, "business handler replaced");
        }
        rx
    }

    #[must_use]
    pub fn has_handler(&self, kind: BusinessKind) -> bool {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&kind)
    }

    /// Number of dispatches currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Whether the dispatcher has been shut down.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.inner.cancel_tx.borrow()
    }

    /// Dispatch a business call. Returns immediately; the outcome
    /// arrives through the handle.
    #[must_use]
    pub fn dispatch(&self, request: DispatchRequest) -> DispatchHandle {
        let id = Uuid::new_v4();

        if self.is_stopped() {
            return DispatchHandle::resolved(ProcessOutcome::cancelled());
        }

        let sender = {
            let handlers = self
                .inner
                .handlers
                .read()
                .unwrap_or_else(|e| e.into_inner());
            handlers.get(&request.kind).cloned()
        };
        let Some(sender) = sender else {
            return DispatchHandle::resolved(ProcessOutcome::failure(
                "HANDLER_UNAVAILABLE",
                format!("no handler registered for {} business", request.kind),
            ));
        };

        let (handle, reply_tx) = DispatchHandle::pending(id);
        let inner = Arc::clone(&self.inner);
        let mut cancel_rx = self.inner.cancel_tx.subscribe();
        inner.in_flight.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            let outcome = tokio::select! {
                outcome = run_attempts(id, &sender, &request) => outcome,
                _ = cancel_rx.changed() => {
                    debug!(
                        dispatch_id = %id,
                        device = %request.device_sn,
                        business_type = %request.business_type,
                        "dispatch cancelled during shutdown"
                    );
                    ProcessOutcome::cancelled()
                }
            };
            let _ = reply_tx.send(outcome);
            inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        });

        handle
    }

    /// Drain in-flight dispatches for up to `grace`, then cancel the
    /// remainder. Returns how many dispatches were cancelled.
    ///
    /// The dispatcher is stopped afterwards: further dispatches resolve
    /// as cancelled. Idempotent.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + grace;
        while self.inner.in_flight.load(Ordering::SeqCst) > 0
            && tokio::time::Instant::now() < deadline
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let cancelled = self.inner.in_flight.load(Ordering::SeqCst);
        let _ = self.inner.cancel_tx.send(true);
        cancelled
    }
}

impl Default for BusinessDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_HANDLER_QUEUE_DEPTH)
    }
}

async fn run_attempts(
    id: Uuid,
    sender: &mpsc::Sender<HandlerCall>,
    request: &DispatchRequest,
) -> ProcessOutcome {
    let attempts = if request.operation.is_idempotent() {
        request.retry.max_attempts.max(1)
    } else {
        1
    };

    let mut outcome = ProcessOutcome::failure("DISPATCH_FAILED", "dispatch produced no outcome");
    for attempt in 1..=attempts {
        outcome = attempt_once(id, sender, request).await;
        if outcome.success || attempt == attempts {
            break;
        }
        warn!(
            dispatch_id = %id,
            device = %request.device_sn,
            business_type = %request.business_type,
            attempt,
            error_code = outcome.error_code.as_deref().unwrap_or(""),
            "dispatch attempt failed, retrying"
        );
        tokio::time::sleep(request.retry.delay_after(attempt)).await;
    }
    outcome
}

async fn attempt_once(
    id: Uuid,
    sender: &mpsc::Sender<HandlerCall>,
    request: &DispatchRequest,
) -> ProcessOutcome {
    let (reply_tx, reply_rx) = oneshot::channel();
    let call = HandlerCall {
        id,
        business_type: request.business_type.clone(),
        device_sn: request.device_sn.clone(),
        payload: request.payload.clone(),
        reply: reply_tx,
    };

    match sender.try_send(call) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            return ProcessOutcome::failure("QUEUE_FULL", "business handler queue is full");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            return ProcessOutcome::failure("HANDLER_UNAVAILABLE", "business handler stopped");
        }
    }

    match tokio::time::timeout(request.timeout, reply_rx).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(_)) => {
            ProcessOutcome::failure("HANDLER_UNAVAILABLE", "business handler dropped the call")
        }
        Err(_) => ProcessOutcome::failure(
            "DISPATCH_TIMEOUT",
            format!("no handler reply within {}ms", request.timeout.as_millis()),
        ),
    }
}
