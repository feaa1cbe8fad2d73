//! Resilience wrapper for outbound calls made by load-generation workers.
//!
//! - [`circuit_breaker`] - consecutive-failure breaker with a single half-open probe
//! - [`client`] - [`ResilientClient`] combining timeout, retry/backoff, breaker and bulkhead

pub mod circuit_breaker;
pub mod client;
pub mod error;

pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState};
pub use client::{CircuitSnapshot, ResilientClient};
pub use error::{CircuitBreakerError, ResilienceError, ResilienceResult};
