//! Pass/fail evaluation of scenario metrics against thresholds.

use llmperf_core::{Category, ThresholdConfig, Thresholds};
use serde::{Deserialize, Serialize};

use crate::stats::{get_p95_for_category, SegmentedMetrics};

/// Reason reported when no threshold is violated.
pub const PASS_REASON: &str = "All thresholds met";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub passed: bool,
    pub reason: String,
    pub violations: Vec<String>,
}

impl Verdict {
    fn from_violations(violations: Vec<String>) -> Self {
        if violations.is_empty() {
            Self {
                passed: true,
                reason: PASS_REASON.to_string(),
                violations,
            }
        } else {
            Self {
                passed: false,
                reason: violations.join("; "),
                violations,
            }
        }
    }
}

/// Checks every threshold independently; any violation fails the scenario.
#[derive(Debug, Clone, Default)]
pub struct ThresholdEvaluator {
    defaults: ThresholdConfig,
}

impl ThresholdEvaluator {
    pub fn new(defaults: ThresholdConfig) -> Self {
        Self { defaults }
    }

    pub fn defaults(&self) -> &ThresholdConfig {
        &self.defaults
    }

    pub fn evaluate(
        &self,
        metrics: &SegmentedMetrics,
        category: Category,
        overrides: Option<&Thresholds>,
    ) -> Verdict {
        let limits = self.defaults.merged(overrides);
        let overall = &metrics.overall;
        let mut violations = Vec::new();

        let p95 = get_p95_for_category(metrics, category);
        if p95 > limits.p95_ms_max {
            violations.push(format!(
                "P95 latency {:.2}ms exceeds max {:.2}ms",
                p95, limits.p95_ms_max
            ));
        }

        if overall.error_rate > limits.error_rate_max {
            violations.push(format!(
                "Error rate {:.2}% exceeds max {:.2}%",
                overall.error_rate * 100.0,
                limits.error_rate_max * 100.0
            ));
        }

        if overall.timeout_rate > limits.timeout_rate_max {
            violations.push(format!(
                "Timeout rate {:.2}% exceeds max {:.2}%",
                overall.timeout_rate * 100.0,
                limits.timeout_rate_max * 100.0
            ));
        }

        if overall.throughput_rps < limits.throughput_rps_min {
            violations.push(format!(
                "Throughput {:.2} rps below min {:.2} rps",
                overall.throughput_rps, limits.throughput_rps_min
            ));
        }

        if let Some(min) = limits.tokens_per_sec_min.filter(|m| *m > 0.0) {
            if overall.tokens_per_sec < min {
                violations.push(format!(
                    "Tokens/sec {:.2} below min {:.2}",
                    overall.tokens_per_sec, min
                ));
            }
        }

        if category == Category::Memory {
            if let (Some(max), Some(peak)) = (limits.memory_peak_mb_max, overall.memory_peak_mb) {
                if peak > max {
                    violations.push(format!(
                        "Memory peak {:.1}MB exceeds max {:.1}MB",
                        peak, max
                    ));
                }
            }
        }

        Verdict::from_violations(violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{PerfMetrics, LatencyMetrics};

    fn metrics(p95: f64) -> SegmentedMetrics {
        SegmentedMetrics {
            overall: PerfMetrics {
                total: 100,
                completed: 100,
                throughput_rps: 10.0,
                tokens_per_sec: 50.0,
                latency: LatencyMetrics {
                    p95,
                    ..Default::default()
                },
                ..Default::default()
            },
            cold: None,
            warm: None,
        }
    }

    #[test]
    fn test_passing_verdict() {
        let verdict = ThresholdEvaluator::default().evaluate(&metrics(100.0), Category::Warm, None);
        assert!(verdict.passed);
        assert_eq!(verdict.reason, PASS_REASON);
        assert!(verdict.violations.is_empty());
    }

    #[test]
    fn test_p95_violation_reason() {
        let overrides = Thresholds {
            p95_ms_max: Some(50.0),
            ..Default::default()
        };
        let verdict = ThresholdEvaluator::default().evaluate(
            &metrics(100.0),
            Category::Throughput,
            Some(&overrides),
        );

        assert!(!verdict.passed);
        assert!(verdict.reason.starts_with("P95 latency"));
    }

    #[test]
    fn test_all_violations_are_joined() {
        let mut m = metrics(5000.0);
        m.overall.error_rate = 0.5;
        m.overall.timeout_rate = 0.5;

        let overrides = Thresholds {
            throughput_rps_min: Some(100.0),
            tokens_per_sec_min: Some(1000.0),
            ..Default::default()
        };
        let verdict = ThresholdEvaluator::default().evaluate(&m, Category::Stress, Some(&overrides));

        assert_eq!(verdict.violations.len(), 5);
        for prefix in ["P95 latency", "Error rate", "Timeout rate", "Throughput", "Tokens/sec"] {
            assert!(verdict.reason.contains(prefix), "missing {}", prefix);
        }
        assert_eq!(verdict.reason.matches("; ").count(), 4);
    }

    #[test]
    fn test_zero_token_minimum_is_ignored() {
        let overrides = Thresholds {
            tokens_per_sec_min: Some(0.0),
            ..Default::default()
        };
        let mut m = metrics(10.0);
        m.overall.tokens_per_sec = 0.0;
        assert!(ThresholdEvaluator::default()
            .evaluate(&m, Category::Warm, Some(&overrides))
            .passed);
    }

    #[test]
    fn test_memory_peak_only_for_memory_category() {
        let overrides = Thresholds {
            memory_peak_mb_max: Some(100.0),
            ..Default::default()
        };
        let mut m = metrics(10.0);
        let evaluator = ThresholdEvaluator::default();

        // Not measured: skipped
        assert!(evaluator.evaluate(&m, Category::Memory, Some(&overrides)).passed);

        m.overall.memory_peak_mb = Some(250.0);
        let verdict = evaluator.evaluate(&m, Category::Memory, Some(&overrides));
        assert!(verdict.reason.starts_with("Memory peak"));
        assert!(evaluator.evaluate(&m, Category::Warm, Some(&overrides)).passed);
    }

    #[test]
    fn test_cold_start_uses_cold_segment() {
        let mut m = metrics(100.0);
        m.cold = Some(PerfMetrics {
            latency: LatencyMetrics {
                p95: 3000.0,
                ..Default::default()
            },
            ..Default::default()
        });

        let evaluator = ThresholdEvaluator::default();
        assert!(!evaluator.evaluate(&m, Category::ColdStart, None).passed);
        assert!(evaluator.evaluate(&m, Category::Stress, None).passed);
    }
}
