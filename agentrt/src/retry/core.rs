//! The retry engine (C6): classify, back off, honor the shared gate.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::error::{ErrorKind, RuntimeError};
use crate::events::{EventBus, SchedulerEvent};
use crate::transport::TransportError;

use super::classify::{classify, honors_shared_gate, is_retryable};
use super::config::RetryConfig;
use super::gate::RateLimitGate;

pub struct RetryOptions<'a> {
    pub rate_limit_key: Option<&'a str>,
    pub max_rate_limit_retries: u32,
    pub max_rate_limit_wait_ms: u64,
    pub config: RetryConfig,
}

impl Default for RetryOptions<'_> {
    fn default() -> Self {
        Self {
            rate_limit_key: None,
            max_rate_limit_retries: 5,
            max_rate_limit_wait_ms: 60_000,
            config: RetryConfig::default(),
        }
    }
}

pub struct RetryEngine {
    gate: RateLimitGate,
    bus: std::sync::Arc<EventBus>,
}

impl RetryEngine {
    pub fn new(gate: RateLimitGate, bus: std::sync::Arc<EventBus>) -> Self {
        Self { gate, bus }
    }

    pub fn gate(&self) -> &RateLimitGate {
        &self.gate
    }

    /// `rand_unit` must yield a fresh uniform sample in `[0, 1)` each call;
    /// callers pass `rand::random` in production and a scripted closure in
    /// tests for determinism.
    pub async fn retry_with_backoff<T, F, Fut>(
        &self,
        clock: &dyn Clock,
        mut rand_unit: impl FnMut() -> f64,
        mut cancel: CancelToken,
        options: &RetryOptions<'_>,
        mut op: F,
    ) -> Result<T, RuntimeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut attempt: u32 = 0;
        let mut rate_limit_attempt: u32 = 0;
        loop {
            if let Some(key) = options.rate_limit_key {
                let wait = self.gate.wait_ms(key, clock.now_ms()).await;
                if wait > 0 {
                    if wait > options.max_rate_limit_wait_ms {
                        return Err(RuntimeError::new(
                            ErrorKind::RateLimitFastFail,
                            format!("shared gate wait {wait}ms exceeds max_rate_limit_wait_ms"),
                        ));
                    }
                    if cancel.is_cancelled() {
                        return Err(RuntimeError::new(ErrorKind::Cancelled, "cancelled before rate-limit wait"));
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(wait)) => {}
                        _ = cancel.cancelled() => return Err(RuntimeError::new(ErrorKind::Cancelled, "cancelled during rate-limit wait")),
                    }
                }
            }

            match op().await {
                Ok(value) => {
                    if let Some(key) = options.rate_limit_key {
                        self.gate.clear_hits(key).await;
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let kind = classify(&err);
                    debug!(kind = %kind, attempt, "RetryEngine::retry_with_backoff: op failed");
                    if !is_retryable(kind) {
                        return Err(RuntimeError::new(kind, err.to_string()));
                    }
                    let gated = honors_shared_gate(kind);
                    let bound = if gated { options.max_rate_limit_retries } else { options.config.max_retries };
                    let current_count = if gated { rate_limit_attempt } else { attempt };
                    if current_count >= bound {
                        return Err(RuntimeError::new(kind, format!("exhausted retries: {err}")));
                    }
                    let delay_ms = err.retry_after().map(|d| d.as_millis() as u64).unwrap_or_else(|| {
                        options.config.delay_ms(attempt.max(rate_limit_attempt), rand_unit())
                    });
                    if gated {
                        if let Some(key) = options.rate_limit_key {
                            self.gate.advance(key, clock.now_ms(), delay_ms).await;
                        }
                        self.bus.emit(SchedulerEvent::RateLimited {
                            subject: options.rate_limit_key.unwrap_or("").to_string(),
                            wait_ms: delay_ms,
                        });
                    }
                    self.bus.emit(SchedulerEvent::RetryScheduled {
                        subject: options.rate_limit_key.unwrap_or("").to_string(),
                        attempt: current_count,
                        delay_ms,
                        kind: kind.to_string(),
                    });
                    let count = if gated { &mut rate_limit_attempt } else { &mut attempt };
                    *count += 1;
                    if cancel.is_cancelled() {
                        return Err(RuntimeError::new(ErrorKind::Cancelled, "cancelled before backoff sleep"));
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                        _ = cancel.cancelled() => return Err(RuntimeError::new(ErrorKind::Cancelled, "cancelled during backoff sleep")),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use std::cell::Cell;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn engine() -> RetryEngine {
        RetryEngine::new(RateLimitGate::new(), Arc::new(EventBus::new(16)))
    }

    fn fast_config() -> RetryOptions<'static> {
        RetryOptions {
            rate_limit_key: Some("p:m"),
            config: RetryConfig { initial_delay_ms: 1, max_delay_ms: 5, ..RetryConfig::default() },
            ..RetryOptions::default()
        }
    }

    #[tokio::test]
    async fn succeeds_on_first_try_without_sleeping() {
        let engine = engine();
        let clock = MockClock::new(0);
        let (_h, cancel) = crate::cancel::cancel_pair();
        let result = engine
            .retry_with_backoff(&clock, || 0.0, cancel, &fast_config(), || async { Ok::<_, TransportError>(42) })
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let engine = engine();
        let clock = MockClock::new(0);
        let (_h, cancel) = crate::cancel::cancel_pair();
        let attempts = Arc::new(AtomicU32::new(0));
        let a = attempts.clone();
        let result = engine
            .retry_with_backoff(&clock, || 0.0, cancel, &fast_config(), move || {
                let a = a.clone();
                async move {
                    if a.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(TransportError::Unavailable("down".into()))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let engine = engine();
        let clock = MockClock::new(0);
        let (_h, cancel) = crate::cancel::cancel_pair();
        let calls = Cell::new(0);
        let result = engine
            .retry_with_backoff(&clock, || 0.0, cancel, &fast_config(), || {
                calls.set(calls.get() + 1);
                async { Err::<i32, _>(TransportError::ApiError { status: 400, message: "bad".into() }) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn rate_limit_exhaustion_returns_error() {
        let engine = engine();
        let clock = MockClock::new(0);
        let (_h, cancel) = crate::cancel::cancel_pair();
        let options = RetryOptions {
            max_rate_limit_retries: 1,
            ..fast_config()
        };
        let result = engine
            .retry_with_backoff(&clock, || 0.0, cancel, &options, || async {
                Err::<i32, _>(TransportError::RateLimited { retry_after: Duration::from_millis(1) })
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn cancellation_aborts_before_first_call() {
        let engine = engine();
        let clock = MockClock::new(0);
        let (handle, cancel) = crate::cancel::cancel_pair();
        handle.cancel();
        engine.gate.advance("p:m", 0, 10_000).await;
        let result = engine
            .retry_with_backoff(&clock, || 0.0, cancel, &fast_config(), || async { Ok::<_, TransportError>(1) })
            .await;
        assert!(matches!(result, Err(e) if e.kind == ErrorKind::Cancelled));
    }

    #[tokio::test]
    async fn success_after_gate_hit_clears_hits() {
        let engine = engine();
        let clock = MockClock::new(0);
        engine.gate.advance("p:m", 0, 1).await;
        let (_h, cancel) = crate::cancel::cancel_pair();
        engine
            .retry_with_backoff(&clock, || 0.0, cancel, &fast_config(), || async { Ok::<_, TransportError>(1) })
            .await
            .unwrap();
        assert_eq!(engine.gate.hits("p:m").await, 0);
    }
}
