use llmperf_core::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Call rejected because the circuit is open (or its single probe is taken).
#[derive(Debug, Clone, Error, PartialEq)]
#[error("circuit breaker `{label}` is open, retry after {retry_after:?}")]
pub struct CircuitBreakerError {
    /// Client the breaker belongs to.
    pub label: String,
    /// Remaining cooldown before a probe is allowed.
    pub retry_after: Duration,
}

/// Error surfaced by [`crate::ResilientClient::call_with_resilience`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResilienceError {
    /// Downstream is degraded and no attempt was made.
    #[error(transparent)]
    CircuitOpen(#[from] CircuitBreakerError),

    /// Too many callers already waiting for an in-flight slot.
    #[error("client `{label}` saturated: queue depth {queue_depth} reached")]
    Saturated {
        label: String,
        queue_depth: usize,
    },

    /// The call itself failed; this is the last error observed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ResilienceError {
    /// The call failed because it ran out of time.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_timeout())
    }

    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen(_))
    }
}

/// Result alias for resilient calls.
pub type ResilienceResult<T> = Result<T, ResilienceError>;
