//! Central metrics registry and metric definitions
//!
//! Prometheus metrics for the load harness and resilience client.
//! Metrics are registered lazily on first access using once_cell::Lazy.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, Encoder,
    HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder,
};

// ===== Request Metrics =====

/// Total number of load requests by phase and outcome (success, error, timeout)
pub static REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "llmperf_requests_total",
        "Total number of load requests issued",
        &["phase", "outcome"]
    )
    .expect("Failed to register request counter")
});

/// Load request latency histogram
pub static REQUEST_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "llmperf_request_latency_seconds",
        "Load request latency in seconds",
        &["phase"],
        // Buckets: 10ms .. 60s
        vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .expect("Failed to register request latency histogram")
});

// ===== Resilience Metrics =====

/// Retries performed by the resilience client
pub static RETRIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "llmperf_retries_total",
        "Total number of retried outbound calls",
        &["label"]
    )
    .expect("Failed to register retry counter")
});

/// Calls rejected without an attempt (circuit open or bulkhead saturated)
pub static REJECTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "llmperf_rejections_total",
        "Total number of outbound calls rejected before an attempt",
        &["label", "reason"]
    )
    .expect("Failed to register rejection counter")
});

/// Circuit breaker state gauge (0=closed, 1=open, 2=half-open)
pub static CIRCUIT_BREAKER_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "llmperf_circuit_breaker_state",
        "Circuit breaker state (0=closed, 1=open, 2=half-open)",
        &["label"]
    )
    .expect("Failed to register circuit breaker state gauge")
});

// ===== Scenario Metrics =====

/// Scenario outcomes by category and verdict
pub static SCENARIOS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "llmperf_scenarios_total",
        "Total number of scenarios executed",
        &["category", "verdict"]
    )
    .expect("Failed to register scenario counter")
});

/// Render all registered metrics in the Prometheus text exposition format.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_and_render() {
        REQUESTS_TOTAL.with_label_values(&["WARM", "success"]).inc();
        CIRCUIT_BREAKER_STATE.with_label_values(&["unit"]).set(1);

        let text = gather_text();
        assert!(text.contains("llmperf_requests_total"));
        assert!(text.contains("llmperf_circuit_breaker_state"));
    }
}
