//! Registry of continuations waiting for a broadcast reply.
//!
//! Each wait is keyed by `(action, correlation_id)`. A continuation runs
//! exactly once: either with the message passed to [`BroadcastWaiter::resolve`]
//! or with a synthesized timeout error when its deadline expires. Whichever
//! removes the entry from the registry first wins; the other is a no-op.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use gsm_telemetry::{TelemetryLabels, record_counter, record_gauge};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::envelope::{CorrelatedMessage, ErrorData};
use crate::error::REQUEST_TIMEOUT;

const RESOLVED_COUNTER: &str = "gsm_broadcast_resolved_total";
const TIMEOUT_COUNTER: &str = "gsm_broadcast_timeouts_total";
const DROPPED_COUNTER: &str = "gsm_broadcast_dropped_total";
const SUPERSEDED_COUNTER: &str = "gsm_broadcast_superseded_total";
const PENDING_GAUGE: &str = "gsm_broadcast_pending";

type Continuation =
    Box<dyn FnOnce(CorrelatedMessage) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BroadcastKey {
    pub action: String,
    pub correlation_id: String,
}

impl BroadcastKey {
    pub fn new(action: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            correlation_id: correlation_id.into(),
        }
    }

    pub fn of(message: &CorrelatedMessage) -> Self {
        Self::new(message.action.clone(), message.correlation_id.clone())
    }
}

impl Display for BroadcastKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.action, self.correlation_id)
    }
}

struct Pending {
    generation: u64,
    continuation: Continuation,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct Registry {
    pending: Mutex<HashMap<BroadcastKey, Pending>>,
    generation: AtomicU64,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<BroadcastKey, Pending>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Cloneable handle onto one shared wait registry.
#[derive(Clone, Default)]
pub struct BroadcastWaiter {
    registry: Arc<Registry>,
}

impl BroadcastWaiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `continuation` for `(action, correlation_id)` and returns
    /// immediately. A wait already pending on the same key is cancelled and
    /// its continuation dropped without being called.
    ///
    /// Must be called from within a Tokio runtime; the deadline runs as a
    /// spawned task.
    pub fn wait_for_broadcast<C, Fut>(
        &self,
        action: impl Into<String>,
        correlation_id: impl Into<String>,
        timeout: Duration,
        continuation: C,
    ) where
        C: FnOnce(CorrelatedMessage) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let key = BroadcastKey::new(action, correlation_id);
        let generation = self.registry.generation.fetch_add(1, Ordering::Relaxed);
        let continuation: Continuation =
            Box::new(move |msg: CorrelatedMessage| continuation(msg).boxed());

        let mut guard = self.registry.lock();
        let timer = tokio::spawn(expire(
            Arc::clone(&self.registry),
            key.clone(),
            generation,
            timeout,
        ));
        let previous = guard.insert(
            key.clone(),
            Pending {
                generation,
                continuation,
                timer,
            },
        );
        let pending = guard.len();
        drop(guard);
        record_pending(pending);

        if let Some(previous) = previous {
            previous.timer.abort();
            debug!(key = %key, "replaced pending broadcast wait");
            record_counter(SUPERSEDED_COUNTER, 1, &labels(&key.action));
        }
    }

    /// Await-style wrapper over [`Self::wait_for_broadcast`]. Returns `None`
    /// when a later registration on the same key supersedes this one.
    pub async fn recv_broadcast(
        &self,
        action: impl Into<String>,
        correlation_id: impl Into<String>,
        timeout: Duration,
    ) -> Option<CorrelatedMessage> {
        let (tx, rx) = oneshot::channel();
        self.wait_for_broadcast(action, correlation_id, timeout, move |msg| async move {
            tx.send(msg)
                .map_err(|_| anyhow::anyhow!("broadcast receiver dropped"))
        });
        rx.await.ok()
    }

    /// Hands `message` to the continuation waiting on its key, if any.
    /// Continuation failures are logged and never reach the caller.
    pub async fn resolve(&self, message: CorrelatedMessage) {
        let key = BroadcastKey::of(&message);
        let pending = {
            let mut guard = self.registry.lock();
            let removed = guard.remove(&key);
            record_pending(guard.len());
            removed
        };

        let Some(pending) = pending else {
            debug!(key = %key, "no waiter for broadcast, dropping");
            record_counter(DROPPED_COUNTER, 1, &labels(&key.action));
            return;
        };

        pending.timer.abort();
        record_counter(RESOLVED_COUNTER, 1, &labels(&key.action));
        run_continuation(&key, pending.continuation, message).await;
    }

    pub fn is_pending(&self, action: &str, correlation_id: &str) -> bool {
        self.registry
            .lock()
            .contains_key(&BroadcastKey::new(action, correlation_id))
    }

    pub fn pending_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Cancels every pending wait without invoking any continuation.
    pub fn clear(&self) {
        let drained: Vec<Pending> = self.registry.lock().drain().map(|(_, p)| p).collect();
        record_pending(0);
        for pending in &drained {
            pending.timer.abort();
        }
        if !drained.is_empty() {
            debug!(count = drained.len(), "cleared pending broadcast waits");
        }
    }
}

async fn expire(registry: Arc<Registry>, key: BroadcastKey, generation: u64, timeout: Duration) {
    tokio::time::sleep(timeout).await;

    let pending = {
        let mut guard = registry.lock();
        let current = guard.get(&key).is_some_and(|p| p.generation == generation);
        let removed = if current { guard.remove(&key) } else { None };
        record_pending(guard.len());
        removed
    };
    let Some(pending) = pending else {
        return;
    };

    warn!(key = %key, ?timeout, "broadcast wait timed out");
    record_counter(TIMEOUT_COUNTER, 1, &labels(&key.action));
    let message = CorrelatedMessage::failure(
        key.correlation_id.clone(),
        key.action.clone(),
        "",
        ErrorData::new(
            REQUEST_TIMEOUT,
            format!(
                "Timeout waiting for broadcast '{}' ({})",
                key.action, key.correlation_id
            ),
        ),
    );
    run_continuation(&key, pending.continuation, message).await;
}

async fn run_continuation(
    key: &BroadcastKey,
    continuation: Continuation,
    message: CorrelatedMessage,
) {
    match AssertUnwindSafe(async move { continuation(message).await })
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(key = %key, error = %err, "broadcast continuation failed"),
        Err(_) => warn!(key = %key, "broadcast continuation panicked"),
    }
}

fn record_pending(count: usize) {
    record_gauge(PENDING_GAUGE, count as f64, &TelemetryLabels::new("broadcast_waiter"));
}

fn labels(action: &str) -> TelemetryLabels {
    TelemetryLabels::new("broadcast_waiter").with_action(action)
}
