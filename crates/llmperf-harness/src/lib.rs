//! Load-generation harness.
//!
//! A [`PerformanceSuite`] runs declarative [`llmperf_core::Scenario`]s through
//! one of two drivers:
//!
//! - [`ClosedLoopDriver`] - a fixed pool of workers, each sending its next
//!   request when the previous one finishes
//! - [`OpenLoopDriver`] - requests dispatched on a precomputed arrival
//!   schedule, independent of service time
//!
//! Every request goes through a [`RequestExecutor`], which calls the target
//! via a shared [`llmperf_resilience::ResilientClient`] (or a seeded mock when
//! no transport is injected). Results are aggregated by the [`stats`] engine
//! and judged by the [`ThresholdEvaluator`].

pub mod executor;
pub mod http;
pub mod mock;
pub mod monitor;
pub mod orchestrator;
pub mod scheduler;
pub mod stats;
pub mod thresholds;

pub use executor::{RequestExecutor, PHASE_HEADER};
pub use http::HttpTransport;
pub use mock::MockTarget;
pub use monitor::{MonitorSession, ResourceMonitor, ResourceUsage};
pub use orchestrator::{
    run_performance_suite, PerformanceSuite, ScenarioError, ScenarioResult, SuiteSummary,
};
pub use scheduler::{schedule, ClosedLoopDriver, DriverRun, OpenLoopDriver, RequestSpec};
pub use stats::{
    calculate_percentiles, calculate_scenario_metrics, calculate_segmented_metrics,
    get_p95_for_category, LatencyMetrics, PerfMetrics, SegmentedMetrics,
};
pub use thresholds::{ThresholdEvaluator, Verdict, PASS_REASON};
