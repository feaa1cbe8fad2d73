//! Metrics engine: latency percentiles, throughput, error rates and
//! cold/warm segmentation over a run's results.

use llmperf_core::{Category, RequestResult};
use serde::{Deserialize, Serialize};

use crate::monitor::ResourceUsage;

/// Latency distribution in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyMetrics {
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
}

/// Aggregate metrics for a set of results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerfMetrics {
    pub total: usize,
    pub completed: usize,
    pub errors: usize,
    pub timeouts: usize,
    pub error_rate: f64,
    pub timeout_rate: f64,
    /// Successful requests only.
    pub latency: LatencyMetrics,
    pub throughput_rps: f64,
    pub total_tokens_out: u64,
    pub avg_tokens_out: f64,
    pub tokens_per_sec: f64,
    pub total_cost: f64,
    pub avg_cost: f64,
    pub memory_peak_mb: Option<f64>,
    pub cpu_peak_pct: Option<f64>,
}

impl PerfMetrics {
    /// Attach resource peaks measured during the run.
    #[must_use]
    pub fn with_resources(mut self, usage: ResourceUsage) -> Self {
        self.memory_peak_mb = usage.memory_peak_mb;
        self.cpu_peak_pct = usage.cpu_peak_pct;
        self
    }
}

/// Overall metrics plus the cold and warm slices, when non-empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentedMetrics {
    pub overall: PerfMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cold: Option<PerfMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warm: Option<PerfMetrics>,
}

/// Linear-interpolation percentiles (`rank = p/100 * (n-1)`), max, mean and
/// sample standard deviation. Empty input yields all zeros.
pub fn calculate_percentiles(values: &[f64]) -> LatencyMetrics {
    if values.is_empty() {
        return LatencyMetrics::default();
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let n = sorted.len();
    let mean = sorted.iter().sum::<f64>() / n as f64;
    let std = if n < 2 {
        0.0
    } else {
        let var = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
        var.sqrt()
    };

    LatencyMetrics {
        p50: percentile(&sorted, 50.0),
        p90: percentile(&sorted, 90.0),
        p95: percentile(&sorted, 95.0),
        p99: percentile(&sorted, 99.0),
        max: sorted[n - 1],
        mean,
        std,
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    (sorted[lower] + (sorted[upper] - sorted[lower]) * weight).min(sorted[upper])
}

/// Aggregate `results` observed over `wall_time_sec`.
pub fn calculate_scenario_metrics(results: &[RequestResult], wall_time_sec: f64) -> PerfMetrics {
    let total = results.len();
    let completed: Vec<&RequestResult> = results.iter().filter(|r| r.success).collect();
    let timeouts = results.iter().filter(|r| !r.success && r.timeout).count();
    let errors = total - completed.len() - timeouts;

    let rate = |count: usize| {
        if total == 0 {
            0.0
        } else {
            count as f64 / total as f64
        }
    };
    let per_sec = |value: f64| {
        if wall_time_sec > 0.0 {
            value / wall_time_sec
        } else {
            0.0
        }
    };
    let average = |value: f64| {
        if completed.is_empty() {
            0.0
        } else {
            value / completed.len() as f64
        }
    };

    let latencies: Vec<f64> = completed.iter().map(|r| r.latency_ms).collect();
    let total_tokens_out: u64 = completed.iter().map(|r| r.tokens_out).sum();
    let total_cost: f64 = completed.iter().map(|r| r.cost).sum();

    PerfMetrics {
        total,
        completed: completed.len(),
        errors,
        timeouts,
        error_rate: rate(errors),
        timeout_rate: rate(timeouts),
        latency: calculate_percentiles(&latencies),
        throughput_rps: per_sec(completed.len() as f64),
        total_tokens_out,
        avg_tokens_out: average(total_tokens_out as f64),
        tokens_per_sec: per_sec(total_tokens_out as f64),
        total_cost,
        avg_cost: average(total_cost),
        memory_peak_mb: None,
        cpu_peak_pct: None,
    }
}

/// Overall metrics plus cold (first `cold_n` results) and warm (everything
/// after `max(cold_n, warmup_exclude_n)`) slices. Each slice gets the share of
/// wall time proportional to its size.
pub fn calculate_segmented_metrics(
    results: &[RequestResult],
    wall_time_sec: f64,
    cold_n: usize,
    warmup_exclude_n: usize,
) -> SegmentedMetrics {
    let total = results.len();
    let segment = |slice: &[RequestResult]| {
        if slice.is_empty() {
            return None;
        }
        let share = wall_time_sec * slice.len() as f64 / total as f64;
        Some(calculate_scenario_metrics(slice, share))
    };

    let cold_end = cold_n.min(total);
    let warm_start = cold_n.max(warmup_exclude_n).min(total);

    SegmentedMetrics {
        overall: calculate_scenario_metrics(results, wall_time_sec),
        cold: segment(&results[..cold_end]),
        warm: segment(&results[warm_start..]),
    }
}

/// P95 that decides a scenario of the given category.
pub fn get_p95_for_category(metrics: &SegmentedMetrics, category: Category) -> f64 {
    let segment = match category {
        Category::ColdStart => metrics.cold.as_ref(),
        Category::Warm => metrics.warm.as_ref(),
        _ => None,
    };
    segment.unwrap_or(&metrics.overall).latency.p95
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmperf_core::Phase;
    use proptest::prelude::*;

    fn ok(ms: f64) -> RequestResult {
        RequestResult::success(ms, None)
    }

    #[test]
    fn test_percentiles_linear_interpolation() {
        let m = calculate_percentiles(&[10.0, 20.0, 30.0, 40.0, 50.0]);
        assert_eq!(m.p50, 30.0);
        assert!((m.p90 - 46.0).abs() < 1e-9);
        assert!((m.p95 - 48.0).abs() < 1e-9);
        assert!((m.p99 - 49.6).abs() < 1e-9);
        assert_eq!(m.max, 50.0);
        assert_eq!(m.mean, 30.0);
        assert!((m.std - 15.811_388_300_841_896).abs() < 1e-9);
    }

    #[test]
    fn test_percentiles_small_inputs() {
        assert_eq!(calculate_percentiles(&[]), LatencyMetrics::default());

        let single = calculate_percentiles(&[7.0]);
        assert_eq!(single.p50, 7.0);
        assert_eq!(single.p99, 7.0);
        assert_eq!(single.std, 0.0);
    }

    #[test]
    fn test_scenario_metrics_counts_and_rates() {
        let results = vec![
            ok(100.0).with_usage(10, 0.1),
            ok(200.0).with_usage(30, 0.3),
            RequestResult::timed_out(30_000.0, None),
            RequestResult::failed(5.0, None, "boom"),
        ];

        let m = calculate_scenario_metrics(&results, 2.0);
        assert_eq!((m.total, m.completed, m.errors, m.timeouts), (4, 2, 1, 1));
        assert_eq!(m.error_rate, 0.25);
        assert_eq!(m.timeout_rate, 0.25);
        assert_eq!(m.throughput_rps, 1.0);
        assert_eq!(m.latency.max, 200.0);
        assert_eq!(m.total_tokens_out, 40);
        assert_eq!(m.avg_tokens_out, 20.0);
        assert_eq!(m.tokens_per_sec, 20.0);
        assert!((m.avg_cost - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_zero_wall_time_and_empty_results() {
        let m = calculate_scenario_metrics(&[ok(1.0)], 0.0);
        assert_eq!(m.throughput_rps, 0.0);

        let empty = calculate_scenario_metrics(&[], 1.0);
        assert_eq!(empty.total, 0);
        assert_eq!(empty.error_rate, 0.0);
    }

    #[test]
    fn test_segmentation_slices() {
        let results: Vec<_> = (0..6)
            .map(|i| RequestResult::success(100.0 * (i + 1) as f64, Some(Phase::for_index(i, 2))))
            .collect();

        let seg = calculate_segmented_metrics(&results, 6.0, 2, 0);
        let cold = seg.cold.as_ref().unwrap();
        let warm = seg.warm.as_ref().unwrap();
        assert_eq!(cold.total, 2);
        assert_eq!(warm.total, 4);
        assert_eq!(cold.throughput_rps, 1.0);
        assert_eq!(seg.overall.total, 6);

        let excluded = calculate_segmented_metrics(&results, 6.0, 2, 3);
        assert_eq!(excluded.warm.unwrap().total, 3);
    }

    #[test]
    fn test_segments_absent_when_empty() {
        let results = vec![ok(1.0), ok(2.0)];

        let seg = calculate_segmented_metrics(&results, 1.0, 0, 0);
        assert!(seg.cold.is_none());
        assert_eq!(seg.warm.as_ref().unwrap().total, 2);

        let seg = calculate_segmented_metrics(&results, 1.0, 5, 0);
        assert_eq!(seg.cold.as_ref().unwrap().total, 2);
        assert!(seg.warm.is_none());

        let json = serde_json::to_value(&seg).unwrap();
        assert!(json.get("warm").is_none());
        assert!(json.get("overall").is_some());
    }

    #[test]
    fn test_p95_per_category() {
        let mut results: Vec<_> = (0..3).map(|_| ok(500.0)).collect();
        results.extend((0..10).map(|_| ok(50.0)));
        let seg = calculate_segmented_metrics(&results, 1.0, 3, 0);

        assert_eq!(get_p95_for_category(&seg, Category::ColdStart), 500.0);
        assert_eq!(get_p95_for_category(&seg, Category::Warm), 50.0);
        assert_eq!(
            get_p95_for_category(&seg, Category::Throughput),
            seg.overall.latency.p95
        );

        let no_cold = calculate_segmented_metrics(&results, 1.0, 0, 0);
        assert_eq!(
            get_p95_for_category(&no_cold, Category::ColdStart),
            no_cold.overall.latency.p95
        );
    }

    fn arb_result() -> impl Strategy<Value = RequestResult> {
        (0.0f64..10_000.0, 0u8..3).prop_map(|(ms, kind)| match kind {
            0 => RequestResult::success(ms, None),
            1 => RequestResult::timed_out(ms, None),
            _ => RequestResult::failed(ms, None, "err"),
        })
    }

    proptest! {
        #[test]
        fn prop_percentiles_are_ordered(values in prop::collection::vec(0.0f64..1e6, 1..200)) {
            let m = calculate_percentiles(&values);
            prop_assert!(m.p50 <= m.p90);
            prop_assert!(m.p90 <= m.p95);
            prop_assert!(m.p95 <= m.p99);
            prop_assert!(m.p99 <= m.max);
        }

        #[test]
        fn prop_counts_partition_total(
            results in prop::collection::vec(arb_result(), 0..100),
            wall in 0.0f64..100.0,
        ) {
            let m = calculate_scenario_metrics(&results, wall);
            prop_assert_eq!(m.completed + m.errors + m.timeouts, m.total);
            prop_assert!((0.0..=1.0).contains(&m.error_rate));
            prop_assert!((0.0..=1.0).contains(&m.timeout_rate));
        }
    }
}
