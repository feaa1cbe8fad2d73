//! Resilient outbound client: timeout, bounded retry with backoff, circuit
//! breaker and a concurrency bulkhead around a single logical call.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use llmperf_core::metrics::{REJECTIONS_TOTAL, RETRIES_TOTAL};
use llmperf_core::{ResilienceConfig, TransportError};
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, warn};

use crate::circuit_breaker::{
    BreakerPermit, BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState,
};
use crate::error::{ResilienceError, ResilienceResult};

/// Circuit state plus the client configuration, for observability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    #[serde(flatten)]
    pub breaker: BreakerSnapshot,
    pub config: ResilienceConfig,
}

/// Wraps outbound calls to one target.
///
/// Share a single instance (behind `Arc`) between all workers hitting the
/// same target so they share breaker state.
#[derive(Debug)]
pub struct ResilientClient {
    name: String,
    config: ResilienceConfig,
    breaker: CircuitBreaker,
    slots: Semaphore,
    waiting: AtomicUsize,
}

impl ResilientClient {
    /// Create a client for the target identified by `name`.
    pub fn new(name: impl Into<String>, config: ResilienceConfig) -> Self {
        let name = name.into();
        let breaker = CircuitBreaker::new(name.clone(), CircuitBreakerConfig::from(&config));
        let slots = Semaphore::new(config.concurrency.max(1));

        Self {
            name,
            config,
            breaker,
            slots,
            waiting: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn circuit_state(&self) -> CircuitBreakerState {
        self.breaker.state()
    }

    /// Breaker state, counters and configuration.
    pub fn get_circuit_state(&self) -> CircuitSnapshot {
        CircuitSnapshot {
            breaker: self.breaker.snapshot(),
            config: self.config.clone(),
        }
    }

    /// Remaining time the breaker will reject calls for. `None` when the
    /// breaker is disabled or would admit a call now.
    pub fn circuit_retry_after(&self) -> Option<Duration> {
        if !self.config.breaker_enabled {
            return None;
        }
        self.breaker.retry_after()
    }

    /// Force the breaker back to Closed.
    pub fn reset_circuit(&self) {
        self.breaker.reset();
    }

    /// Run `operation` with timeout, retry and circuit breaker protection.
    ///
    /// `operation` is invoked once per attempt. Transient errors are retried
    /// up to `max_retries` times with exponential backoff and jitter;
    /// non-transient errors are returned after the first attempt. A half-open
    /// probe is never retried.
    pub async fn call_with_resilience<F, Fut, T>(
        &self,
        label: &str,
        mut operation: F,
    ) -> ResilienceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let permit = if self.config.breaker_enabled {
            match self.breaker.try_acquire() {
                Ok(permit) => Some(permit),
                Err(e) => {
                    debug!(client = %self.name, label, "Circuit open, failing fast");
                    REJECTIONS_TOTAL
                        .with_label_values(&[&self.name, "circuit_open"])
                        .inc();
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        let _slot = self.acquire_slot().await?;

        let max_attempts = if permit.as_ref().is_some_and(BreakerPermit::is_probe) {
            1
        } else {
            self.config.max_retries.saturating_add(1)
        };

        let mut attempt: u32 = 0;
        loop {
            let outcome = match timeout(self.config.timeout(), operation()).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout),
            };

            match outcome {
                Ok(value) => {
                    if let Some(permit) = permit {
                        permit.success();
                    }
                    return Ok(value);
                }
                Err(e) => {
                    attempt += 1;

                    if e.is_transient() && attempt < max_attempts {
                        let delay = self.backoff_with_jitter(attempt - 1);
                        warn!(
                            client = %self.name,
                            label,
                            "Call failed (attempt {}/{}), retrying after {}ms: {}",
                            attempt,
                            max_attempts,
                            delay.as_millis(),
                            e
                        );
                        RETRIES_TOTAL.with_label_values(&[&self.name]).inc();
                        sleep(delay).await;
                        continue;
                    }

                    if e.is_transient() {
                        error!(client = %self.name, label, "Call failed after {} attempts: {}", attempt, e);
                    } else {
                        warn!(client = %self.name, label, "Call failed with non-retryable error: {}", e);
                    }

                    if let Some(permit) = permit {
                        permit.failure();
                    }
                    return Err(e.into());
                }
            }
        }
    }

    fn backoff_with_jitter(&self, attempt: u32) -> Duration {
        let delay_ms = self.config.backoff_for_attempt(attempt).as_millis() as u64;
        let jitter_range = (delay_ms as f64 * self.config.jitter_percent) as u64;
        let jitter = rand::random::<u64>() % (jitter_range + 1);
        Duration::from_millis(delay_ms + jitter)
    }

    async fn acquire_slot(&self) -> ResilienceResult<SemaphorePermit<'_>> {
        if let Ok(slot) = self.slots.try_acquire() {
            return Ok(slot);
        }

        let queued = self.waiting.fetch_add(1, Ordering::SeqCst);
        if queued >= self.config.queue_depth {
            self.waiting.fetch_sub(1, Ordering::SeqCst);
            REJECTIONS_TOTAL
                .with_label_values(&[&self.name, "saturated"])
                .inc();
            return Err(self.saturated());
        }

        let slot = self.slots.acquire().await;
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        slot.map_err(|_| self.saturated())
    }

    fn saturated(&self) -> ResilienceError {
        ResilienceError::Saturated {
            label: self.name.clone(),
            queue_depth: self.config.queue_depth,
        }
    }
}
