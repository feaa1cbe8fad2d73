//! Consecutive-failure circuit breaker for outbound calls
//!
//! Stops sending load to a target that keeps failing and probes it again
//! after a cooldown.
//!
//! # States
//!
//! - **Closed:** Normal operation, all requests allowed
//! - **Open:** Circuit tripped after `failure_threshold` failures, requests rejected
//! - **HalfOpen:** Cooldown elapsed, exactly one probe request allowed
//!
//! # Example
//!
//! ```rust
//! use llmperf_resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let cb = CircuitBreaker::new(
//!     "target",
//!     CircuitBreakerConfig {
//!         failure_threshold: 5,
//!         cooldown: Duration::from_secs(30),
//!     },
//! );
//!
//! if let Ok(permit) = cb.try_acquire() {
//!     // Perform operation
//!     let success = true;
//!     if success {
//!         permit.success();
//!     } else {
//!         permit.failure();
//!     }
//! };
//! ```

use chrono::{DateTime, Utc};
use llmperf_core::metrics::CIRCUIT_BREAKER_STATE;
use llmperf_core::ResilienceConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::CircuitBreakerError;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitBreakerState {
    /// Normal operation.
    Closed,

    /// Circuit breaker tripped, calls fail fast.
    Open,

    /// Cooldown elapsed, a single probe is allowed.
    HalfOpen,
}

impl CircuitBreakerState {
    /// Convert state to numeric value for metrics.
    ///
    /// 0 = Closed, 1 = Open, 2 = HalfOpen
    #[must_use]
    pub fn to_metric(&self) -> i64 {
        match self {
            Self::Closed => 0,
            Self::Open => 1,
            Self::HalfOpen => 2,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the circuit.
    pub failure_threshold: u32,

    /// Time since the last failure before a half-open probe is allowed.
    pub cooldown: Duration,
}

impl From<&ResilienceConfig> for CircuitBreakerConfig {
    fn from(config: &ResilienceConfig) -> Self {
        Self {
            failure_threshold: config.circuit_fails.max(1),
            cooldown: config.circuit_reset(),
        }
    }
}

/// Point-in-time view of the breaker for observability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub state: CircuitBreakerState,
    pub failure_count: u32,
    pub success_count: u64,
    pub last_failure_time: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitBreakerState,
    failure_count: u32,
    success_count: u64,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    probe_in_flight: bool,
}

/// Circuit breaker implementation.
///
/// All state lives behind one mutex so concurrent workers sharing a breaker
/// observe atomic transitions.
#[derive(Debug)]
pub struct CircuitBreaker {
    label: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker in Closed state.
    #[must_use]
    pub fn new(label: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let label = label.into();
        CIRCUIT_BREAKER_STATE
            .with_label_values(&[&label])
            .set(CircuitBreakerState::Closed.to_metric());

        Self {
            label,
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitBreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
                last_failure_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Get current state.
    #[must_use]
    pub fn state(&self) -> CircuitBreakerState {
        self.inner.lock().state
    }

    /// Get current consecutive failure count.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Ask for permission to attempt a call.
    ///
    /// Open with the cooldown elapsed transitions to HalfOpen and hands out
    /// the single probe permit. While that probe is in flight every other
    /// caller is rejected.
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>, CircuitBreakerError> {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitBreakerState::Closed => Ok(BreakerPermit::new(self, false)),
            CircuitBreakerState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|t| t.elapsed())
                    .unwrap_or(self.config.cooldown);

                if elapsed >= self.config.cooldown {
                    info!(label = %self.label, "Circuit breaker transitioning to HalfOpen for probe");
                    self.set_state(&mut inner, CircuitBreakerState::HalfOpen);
                    inner.probe_in_flight = true;
                    Ok(BreakerPermit::new(self, true))
                } else {
                    Err(CircuitBreakerError {
                        label: self.label.clone(),
                        retry_after: self.config.cooldown - elapsed,
                    })
                }
            }
            CircuitBreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(CircuitBreakerError {
                        label: self.label.clone(),
                        retry_after: Duration::ZERO,
                    })
                } else {
                    inner.probe_in_flight = true;
                    Ok(BreakerPermit::new(self, true))
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.success_count += 1;
        inner.failure_count = 0;

        if inner.state == CircuitBreakerState::HalfOpen {
            info!(label = %self.label, "Circuit breaker probe succeeded, closing");
            inner.probe_in_flight = false;
            self.set_state(&mut inner, CircuitBreakerState::Closed);
        }
    }

    /// Record a failed call (after retries are exhausted).
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        inner.last_failure_at = Some(Utc::now());

        match inner.state {
            CircuitBreakerState::HalfOpen => {
                warn!(label = %self.label, "Circuit breaker probe failed, reopening");
                inner.probe_in_flight = false;
                self.set_state(&mut inner, CircuitBreakerState::Open);
            }
            CircuitBreakerState::Closed
                if inner.failure_count >= self.config.failure_threshold =>
            {
                warn!(
                    label = %self.label,
                    failures = inner.failure_count,
                    threshold = self.config.failure_threshold,
                    "Circuit breaker tripping"
                );
                self.set_state(&mut inner, CircuitBreakerState::Open);
            }
            _ => {}
        }
    }

    /// How long callers will be rejected for, or `None` if a call would be
    /// let through now.
    ///
    /// A HalfOpen breaker whose probe is still in flight reports
    /// `Duration::ZERO`.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        match inner.state {
            CircuitBreakerState::Closed => None,
            CircuitBreakerState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|t| t.elapsed())
                    .unwrap_or(self.config.cooldown);
                let remaining = self.config.cooldown.saturating_sub(elapsed);
                (!remaining.is_zero()).then_some(remaining)
            }
            CircuitBreakerState::HalfOpen => inner.probe_in_flight.then_some(Duration::ZERO),
        }
    }

    /// Force transition to Closed state (manual reset).
    pub fn reset(&self) {
        info!(label = %self.label, "Circuit breaker manually reset to Closed");
        let mut inner = self.inner.lock();
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_failure = None;
        inner.last_failure_at = None;
        inner.probe_in_flight = false;
        self.set_state(&mut inner, CircuitBreakerState::Closed);
    }

    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_time: inner.last_failure_at,
        }
    }

    fn abandon_probe(&self) {
        self.inner.lock().probe_in_flight = false;
    }

    fn set_state(&self, inner: &mut BreakerInner, state: CircuitBreakerState) {
        inner.state = state;
        CIRCUIT_BREAKER_STATE
            .with_label_values(&[&self.label])
            .set(state.to_metric());
    }
}

/// Permission to attempt one call.
///
/// Dropping a probe permit without recording an outcome (for example when
/// the caller is cancelled) frees the probe slot for the next caller.
#[derive(Debug)]
#[must_use = "record the outcome with success() or failure()"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl<'a> BreakerPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    /// This permit is the single half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            self.breaker.abandon_probe();
        }
    }
}
