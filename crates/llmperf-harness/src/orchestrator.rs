//! Scenario orchestrator: runs each scenario end to end and turns every
//! failure into a failed [`ScenarioResult`] so one bad scenario never aborts
//! the suite.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use llmperf_core::metrics::SCENARIOS_TOTAL;
use llmperf_core::{Category, CoreError, HarnessConfig, LoadMode, PerfConfig, Scenario};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::executor::RequestExecutor;
use crate::monitor::ResourceMonitor;
use crate::scheduler::{ClosedLoopDriver, DriverRun, OpenLoopDriver, RequestSpec};
use crate::stats::{calculate_segmented_metrics, get_p95_for_category, SegmentedMetrics};
use crate::thresholds::ThresholdEvaluator;

/// Why a scenario could not produce metrics.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error(transparent)]
    Invalid(#[from] CoreError),

    #[error("duplicate scenario id `{0}`")]
    DuplicateId(String),

    #[error("driver failed: {0}")]
    Driver(String),
}

/// Outcome of one scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario_id: String,
    pub category: Category,
    pub subtype: String,
    pub required: bool,
    pub passed: bool,
    pub reason: String,
    pub driver: LoadMode,
    pub metrics: SegmentedMetrics,
    /// P95 the verdict was based on (cold, warm or overall by category).
    pub p95_ms: f64,
    pub throughput_rps: f64,
    pub error_rate: f64,
    pub timeout_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub achieved_rps: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub elapsed_sec: f64,
}

impl ScenarioResult {
    /// Failed result with zeroed metrics.
    pub fn failed(scenario: &Scenario, reason: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            scenario_id: scenario.id.clone(),
            category: scenario.category,
            subtype: scenario.subtype.clone(),
            required: scenario.required,
            passed: false,
            reason: reason.into(),
            driver: scenario.load.mode,
            metrics: SegmentedMetrics::default(),
            p95_ms: 0.0,
            throughput_rps: 0.0,
            error_rate: 0.0,
            timeout_rate: 0.0,
            achieved_rps: None,
            started_at,
            elapsed_sec: 0.0,
        }
    }
}

/// Runs scenarios against one executor.
pub struct PerformanceSuite {
    executor: Arc<RequestExecutor>,
    evaluator: ThresholdEvaluator,
    harness: HarnessConfig,
    monitor: ResourceMonitor,
}

impl PerformanceSuite {
    pub fn new(executor: Arc<RequestExecutor>, config: &PerfConfig) -> Self {
        Self {
            executor,
            evaluator: ThresholdEvaluator::new(config.thresholds.clone()),
            harness: config.harness.clone(),
            monitor: ResourceMonitor::from_config(&config.harness),
        }
    }

    /// Replace the resource monitor.
    pub fn with_monitor(mut self, monitor: ResourceMonitor) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn executor(&self) -> &Arc<RequestExecutor> {
        &self.executor
    }

    /// Run `scenarios` sequentially. Repeated ids after the first occurrence fail.
    pub async fn run(&self, scenarios: &[Scenario]) -> Vec<ScenarioResult> {
        let mut seen = HashSet::new();
        let mut results = Vec::with_capacity(scenarios.len());

        for scenario in scenarios {
            let result = if seen.insert(scenario.id.as_str()) {
                self.run_scenario(scenario).await
            } else {
                let e = ScenarioError::DuplicateId(scenario.id.clone());
                error!(scenario = %scenario.id, "Scenario rejected: {}", e);
                record_verdict(scenario.category, false);
                ScenarioResult::failed(scenario, format!("Execution error: {}", e), Utc::now())
            };
            results.push(result);
        }

        results
    }

    /// Run one scenario. Never fails: errors become a failed result.
    pub async fn run_scenario(&self, scenario: &Scenario) -> ScenarioResult {
        let started_at = Utc::now();
        let clock = Instant::now();

        info!(
            scenario = %scenario.id,
            category = %scenario.category,
            driver = %scenario.load.mode,
            "Running scenario"
        );

        let result = match self.try_run(scenario, started_at).await {
            Ok(mut result) => {
                result.elapsed_sec = clock.elapsed().as_secs_f64();
                result
            }
            Err(e) => {
                error!(scenario = %scenario.id, "Scenario failed to execute: {}", e);
                let mut result =
                    ScenarioResult::failed(scenario, format!("Execution error: {}", e), started_at);
                result.elapsed_sec = clock.elapsed().as_secs_f64();
                result
            }
        };

        record_verdict(scenario.category, result.passed);
        if result.passed {
            info!(scenario = %scenario.id, p95_ms = result.p95_ms, "Scenario passed");
        } else {
            warn!(scenario = %scenario.id, reason = %result.reason, "Scenario failed");
        }

        result
    }

    async fn try_run(
        &self,
        scenario: &Scenario,
        started_at: DateTime<Utc>,
    ) -> Result<ScenarioResult, ScenarioError> {
        scenario.validate()?;

        let spec = RequestSpec {
            input: scenario.render_input()?,
            headers: scenario.request.headers.clone(),
            cold_n: scenario.segmentation.cold_n,
            phase_headers: scenario.segmentation.phase_headers,
        };

        let run = self.drive(scenario, spec).await?;

        let metrics = {
            let mut segmented = calculate_segmented_metrics(
                &run.results,
                run.wall_time_sec,
                scenario.segmentation.cold_n,
                scenario.segmentation.warmup_exclude_n,
            );
            segmented.overall = segmented.overall.with_resources(run.resources);
            segmented
        };

        let verdict = self
            .evaluator
            .evaluate(&metrics, scenario.category, scenario.thresholds.as_ref());

        Ok(ScenarioResult {
            scenario_id: scenario.id.clone(),
            category: scenario.category,
            subtype: scenario.subtype.clone(),
            required: scenario.required,
            passed: verdict.passed,
            reason: verdict.reason,
            driver: scenario.load.mode,
            p95_ms: get_p95_for_category(&metrics, scenario.category),
            throughput_rps: metrics.overall.throughput_rps,
            error_rate: metrics.overall.error_rate,
            timeout_rate: metrics.overall.timeout_rate,
            achieved_rps: run.achieved_rps,
            metrics,
            started_at,
            elapsed_sec: 0.0,
        })
    }

    /// Run the driver on its own task so a panic surfaces as an error.
    async fn drive(&self, scenario: &Scenario, spec: RequestSpec) -> Result<DriverRun, ScenarioError> {
        let load = scenario.load.clone();

        let handle = match load.mode {
            LoadMode::ClosedLoop => {
                let driver = ClosedLoopDriver::new(
                    Arc::clone(&self.executor),
                    self.harness.closed_loop_grace(),
                    self.monitor.clone(),
                );
                let concurrency = load.concurrency.unwrap_or(1);
                tokio::spawn(async move {
                    driver
                        .run(concurrency, load.duration(), &spec, load.think_time())
                        .await
                })
            }
            LoadMode::OpenLoop => {
                let request_timeout = self.executor.client().config().timeout();
                let driver = OpenLoopDriver::new(
                    Arc::clone(&self.executor),
                    self.harness.drain_grace(request_timeout),
                    self.harness.rps_tolerance,
                    self.monitor.clone(),
                );
                let rate = load.rate_rps.unwrap_or_default();
                tokio::spawn(async move { driver.run(rate, load.duration(), &spec).await })
            }
        };

        handle.await.map_err(|e| ScenarioError::Driver(e.to_string()))
    }
}

/// Run every scenario in order with partial-failure isolation.
pub async fn run_performance_suite(
    scenarios: &[Scenario],
    suite: &PerformanceSuite,
) -> Vec<ScenarioResult> {
    suite.run(scenarios).await
}

fn record_verdict(category: Category, passed: bool) {
    let verdict = if passed { "passed" } else { "failed" };
    SCENARIOS_TOTAL
        .with_label_values(&[category.as_str(), verdict])
        .inc();
}

/// Pass/fail counts over a suite run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuiteSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// Ids of required scenarios that failed.
    pub required_failed: Vec<String>,
}

impl SuiteSummary {
    pub fn from_results(results: &[ScenarioResult]) -> Self {
        let passed = results.iter().filter(|r| r.passed).count();
        Self {
            total: results.len(),
            passed,
            failed: results.len() - passed,
            required_failed: results
                .iter()
                .filter(|r| r.required && !r.passed)
                .map(|r| r.scenario_id.clone())
                .collect(),
        }
    }

    pub fn all_required_passed(&self) -> bool {
        self.required_failed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmperf_core::{LoadConfig, MockConfig};
    use llmperf_resilience::ResilientClient;

    fn suite() -> PerformanceSuite {
        let config = PerfConfig::default();
        let client = Arc::new(ResilientClient::new("orchestrator-test", config.resilience.clone()));
        let executor = Arc::new(RequestExecutor::mock(client, MockConfig::reliable()));
        PerformanceSuite::new(executor, &config).with_monitor(ResourceMonitor::disabled())
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_scenario_becomes_failed_result() {
        let scenario = Scenario::new("bad", Category::Stress, "x", LoadConfig::closed_loop(0, 1.0));
        let result = suite().run_scenario(&scenario).await;

        assert!(!result.passed);
        assert!(result.reason.starts_with("Execution error"));
        assert!(result.reason.contains("concurrency"));
        assert_eq!(result.metrics.overall.total, 0);
        assert_eq!(result.driver, LoadMode::ClosedLoop);
    }

    #[tokio::test(start_paused = true)]
    async fn test_template_error_becomes_failed_result() {
        let scenario = Scenario::new(
            "tpl",
            Category::Warm,
            "hello {{nope}}",
            LoadConfig::open_loop(1.0, 1.0),
        );
        let result = suite().run_scenario(&scenario).await;

        assert!(!result.passed);
        assert!(result.reason.contains("nope"));
        assert_eq!(result.driver, LoadMode::OpenLoop);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_ids_fail_after_first() {
        let scenario = Scenario::new("dup", Category::Warm, "x", LoadConfig::open_loop(2.0, 1.0));
        let results = suite().run(&[scenario.clone(), scenario]).await;

        assert_eq!(results.len(), 2);
        assert!(results[0].passed);
        assert!(!results[1].passed);
        assert!(results[1].reason.contains("duplicate"));
    }

    #[test]
    fn test_summary_tracks_required_failures() {
        let now = Utc::now();
        let mut required = Scenario::new("a", Category::Warm, "x", LoadConfig::closed_loop(1, 1.0));
        required.required = true;
        let optional = Scenario::new("b", Category::Warm, "x", LoadConfig::closed_loop(1, 1.0));

        let mut ok = ScenarioResult::failed(&optional, "", now);
        ok.passed = true;
        let results = vec![ScenarioResult::failed(&required, "boom", now), ok];

        let summary = SuiteSummary::from_results(&results);
        assert_eq!((summary.total, summary.passed, summary.failed), (2, 1, 1));
        assert_eq!(summary.required_failed, vec!["a".to_string()]);
        assert!(!summary.all_required_passed());
    }
}
