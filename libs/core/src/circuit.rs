//! Call-gating circuit breaker.
//!
//! ```text
//! Closed --(failure rate >= threshold)--> Open
//! Open --(retry timeout elapsed, next call)--> HalfOpen
//! HalfOpen --(success)--> Closed    HalfOpen --(failure)--> Open
//! ```
//!
//! The failure rate is `failures / (failures + successes)` accumulated since
//! the last transition into Closed; there is no sliding window.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};

use gsm_telemetry::{TelemetryLabels, record_counter};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CircuitSettings;
use crate::error::{CallTimeout, CircuitError, CircuitOpen};

const TRANSITIONS_COUNTER: &str = "gsm_circuit_transitions_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u64,
    successes: u64,
    last_opened_at: Option<Instant>,
}

impl BreakerState {
    fn failure_rate(&self) -> f64 {
        let total = self.failures + self.successes;
        if total == 0 {
            return 0.0;
        }
        (self.failures as f64 / total as f64) * 100.0
    }
}

/// Wraps one asynchronous action `F: Fn(Req) -> Future<Output = Result<Res, E>>`.
pub struct CircuitBreaker<F> {
    name: String,
    action: F,
    settings: CircuitSettings,
    inner: Mutex<BreakerState>,
}

impl<F> CircuitBreaker<F> {
    pub fn new(name: impl Into<String>, settings: CircuitSettings, action: F) -> Self {
        Self {
            name: name.into(),
            action,
            settings,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                last_opened_at: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &CircuitSettings {
        &self.settings
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// `(failures, successes)` since the last reset.
    pub fn counts(&self) -> (u64, u64) {
        let guard = self.lock();
        (guard.failures, guard.successes)
    }

    pub fn failure_rate(&self) -> f64 {
        self.lock().failure_rate()
    }

    /// Runs the wrapped action if the breaker admits the call.
    ///
    /// A call rejected while open never reaches the action. A call that does
    /// not settle within `timeout` counts as a failure even if the action
    /// later completes. The action's own error is returned untouched in
    /// [`CircuitError::Inner`].
    pub async fn execute<Req, Fut, Res, E>(&self, request: Req) -> Result<Res, CircuitError<E>>
    where
        F: Fn(Req) -> Fut,
        Fut: Future<Output = Result<Res, E>>,
    {
        if !self.admit() {
            debug!(breaker = %self.name, "circuit breaker rejected call while open");
            return Err(CircuitError::Open(CircuitOpen));
        }

        match tokio::time::timeout(self.settings.timeout, (self.action)(request)).await {
            Ok(Ok(response)) => {
                self.on_success();
                Ok(response)
            }
            Ok(Err(err)) => {
                self.on_failure();
                Err(CircuitError::Inner(err))
            }
            Err(_) => {
                self.on_failure();
                Err(CircuitError::Timeout(CallTimeout(self.settings.timeout)))
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn admit(&self) -> bool {
        let mut guard = self.lock();
        if guard.state != CircuitState::Open {
            return true;
        }
        let cooled_down = guard
            .last_opened_at
            .map(|opened| opened.elapsed() > self.settings.retry_timeout)
            .unwrap_or(true);
        if cooled_down {
            self.transition(&mut guard, CircuitState::HalfOpen);
        }
        cooled_down
    }

    fn on_success(&self) {
        let mut guard = self.lock();
        guard.successes += 1;
        if guard.state == CircuitState::HalfOpen {
            self.transition(&mut guard, CircuitState::Closed);
        }
    }

    fn on_failure(&self) {
        let mut guard = self.lock();
        guard.failures += 1;
        if guard.state == CircuitState::HalfOpen
            || guard.failure_rate() >= self.settings.error_threshold_percentage
        {
            self.transition(&mut guard, CircuitState::Open);
        }
    }

    fn transition(&self, guard: &mut BreakerState, next: CircuitState) {
        let previous = guard.state;
        guard.state = next;
        match next {
            CircuitState::Open => {
                guard.last_opened_at = Some(Instant::now());
                if previous == CircuitState::Open {
                    return;
                }
                warn!(
                    breaker = %self.name,
                    failures = guard.failures,
                    successes = guard.successes,
                    reopen_in = ?self.settings.retry_timeout,
                    "circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                info!(breaker = %self.name, "circuit breaker half-open trial");
            }
            CircuitState::Closed => {
                guard.failures = 0;
                guard.successes = 0;
                info!(breaker = %self.name, "circuit breaker closed");
            }
        }
        let labels = TelemetryLabels::new("circuit")
            .with_extra("breaker", self.name.clone())
            .with_extra("state", next.as_str());
        record_counter(TRANSITIONS_COUNTER, 1, &labels);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn settings() -> CircuitSettings {
        CircuitSettings {
            timeout: Duration::from_millis(100),
            error_threshold_percentage: 50.0,
            retry_timeout: Duration::from_secs(1),
        }
    }

    type Outcome = Result<u32, &'static str>;

    fn counting_breaker(
        calls: Arc<AtomicUsize>,
    ) -> CircuitBreaker<impl Fn(bool) -> std::future::Ready<Outcome>> {
        CircuitBreaker::new("test", settings(), move |fail: bool| {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(if fail { Err("boom") } else { Ok(7) })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn opens_once_failure_rate_reaches_threshold() {
        let calls = Arc::new(AtomicUsize::new(0));
        let breaker = counting_breaker(calls.clone());

        assert_eq!(breaker.execute(false).await.unwrap(), 7);
        assert_eq!(breaker.execute(false).await.unwrap(), 7);
        assert!(matches!(breaker.execute(true).await, Err(CircuitError::Inner("boom"))));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(matches!(breaker.execute(true).await, Err(CircuitError::Inner("boom"))));
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.counts(), (2, 2));
        assert_eq!(breaker.failure_rate(), 50.0);
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_fails_fast_without_calling_action() {
        let calls = Arc::new(AtomicUsize::new(0));
        let breaker = counting_breaker(calls.clone());

        let _ = breaker.execute(true).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(matches!(breaker.execute(false).await, Err(CircuitError::Open(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_success_closes_and_resets_counters() {
        let calls = Arc::new(AtomicUsize::new(0));
        let breaker = counting_breaker(calls.clone());

        let _ = breaker.execute(true).await;
        tokio::time::advance(Duration::from_millis(1_001)).await;

        assert_eq!(breaker.execute(false).await.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.counts(), (0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens() {
        let calls = Arc::new(AtomicUsize::new(0));
        let breaker = counting_breaker(calls.clone());

        let _ = breaker.execute(true).await;
        tokio::time::advance(Duration::from_millis(1_001)).await;

        assert!(matches!(breaker.execute(true).await, Err(CircuitError::Inner("boom"))));
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(matches!(breaker.execute(false).await, Err(CircuitError::Open(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_count_as_failures() {
        let breaker = CircuitBreaker::new("slow", settings(), |delay: Duration| async move {
            tokio::time::sleep(delay).await;
            Ok::<_, &'static str>(())
        });

        let result = breaker.execute(Duration::from_secs(5)).await;
        assert!(matches!(
            result,
            Err(CircuitError::Timeout(CallTimeout(t))) if t == Duration::from_millis(100)
        ));
        assert_eq!(breaker.counts(), (1, 0));
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    #[tracing_test::traced_test]
    async fn transitions_are_logged() {
        let calls = Arc::new(AtomicUsize::new(0));
        let breaker = counting_breaker(calls);

        let _ = breaker.execute(true).await;
        tokio::time::advance(Duration::from_millis(1_001)).await;
        let _ = breaker.execute(false).await;

        assert!(logs_contain("circuit breaker opened"));
        assert!(logs_contain("circuit breaker half-open trial"));
        assert!(logs_contain("circuit breaker closed"));
    }

    fn shared_breaker(
        threshold: f64,
        calls: Arc<AtomicUsize>,
    ) -> Arc<CircuitBreaker<impl Fn(bool) -> futures::future::BoxFuture<'static, Outcome>>> {
        let settings = CircuitSettings {
            timeout: Duration::from_secs(5),
            error_threshold_percentage: threshold,
            retry_timeout: Duration::from_secs(60),
        };
        Arc::new(CircuitBreaker::new("shared", settings, move |fail: bool| {
            let calls = calls.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                if fail { Err("boom") } else { Ok(7u32) }
            }) as futures::future::BoxFuture<'static, Outcome>
        }))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_calls_are_each_counted_once() {
        const CALLS: usize = 400;
        let calls = Arc::new(AtomicUsize::new(0));
        let breaker = shared_breaker(101.0, calls.clone());

        let tasks: Vec<_> = (0..CALLS)
            .map(|i| {
                let breaker = breaker.clone();
                tokio::spawn(async move { breaker.execute(i % 2 == 0).await })
            })
            .collect();
        for task in tasks {
            let _ = task.await.unwrap();
        }

        let (failures, successes) = breaker.counts();
        assert_eq!(failures + successes, CALLS as u64);
        assert_eq!((failures, successes), (200, 200));
        assert_eq!(calls.load(Ordering::SeqCst), CALLS);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn tripping_under_contention_counts_every_admitted_call() {
        const CALLS: usize = 400;
        let calls = Arc::new(AtomicUsize::new(0));
        let breaker = shared_breaker(50.0, calls.clone());

        let tasks: Vec<_> = (0..CALLS)
            .map(|_| {
                let breaker = breaker.clone();
                tokio::spawn(async move { breaker.execute(true).await })
            })
            .collect();
        let (mut failed, mut rejected) = (0usize, 0usize);
        for task in tasks {
            match task.await.unwrap() {
                Err(CircuitError::Inner("boom")) => failed += 1,
                Err(CircuitError::Open(_)) => rejected += 1,
                other => panic!("unexpected outcome {other:?}"),
            }
        }

        assert_eq!(failed + rejected, CALLS);
        assert!(failed >= 1);
        assert_eq!(calls.load(Ordering::SeqCst), failed);
        assert_eq!(breaker.counts(), (failed as u64, 0));
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
