//! Load drivers: closed-loop worker pool and open-loop arrival schedule.

pub mod closed_loop;
pub mod open_loop;

pub use closed_loop::ClosedLoopDriver;
pub use open_loop::{schedule, OpenLoopDriver};

use std::collections::HashMap;
use std::sync::Arc;

use llmperf_core::{Phase, RequestResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::monitor::ResourceUsage;

/// Everything a driver produced for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverRun {
    /// One entry per attempted request, in dispatch order.
    pub results: Vec<RequestResult>,
    pub wall_time_sec: f64,
    /// Open-loop only.
    pub achieved_rps: Option<f64>,
    pub resources: ResourceUsage,
}

/// What each request of a run sends.
#[derive(Debug, Clone, Default)]
pub struct RequestSpec {
    pub input: String,
    pub headers: HashMap<String, String>,
    pub cold_n: usize,
    pub phase_headers: bool,
}

impl RequestSpec {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            ..Default::default()
        }
    }

    pub fn phase_for(&self, index: usize) -> Phase {
        Phase::for_index(index, self.cold_n)
    }
}

/// Shared result sink, keyed by request index.
pub(crate) type Results = Arc<Mutex<Vec<(usize, RequestResult)>>>;

/// Merge finished and cancelled requests into dispatch order.
pub(crate) fn in_dispatch_order(
    mut finished: Vec<(usize, RequestResult)>,
    cancelled: Vec<(usize, RequestResult)>,
) -> Vec<RequestResult> {
    finished.extend(cancelled);
    finished.sort_by_key(|(index, _)| *index);
    finished.into_iter().map(|(_, result)| result).collect()
}

/// Requests dispatched but not yet finished, keyed by request index.
///
/// Drivers drain this after aborting their tasks so a cancelled request is
/// still recorded, as a timeout.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    entries: Mutex<HashMap<usize, (Instant, Phase)>>,
}

impl InFlight {
    pub(crate) fn begin(&self, index: usize, phase: Phase) {
        self.entries.lock().insert(index, (Instant::now(), phase));
    }

    pub(crate) fn finish(&self, index: usize) {
        self.entries.lock().remove(&index);
    }

    /// Convert everything still in flight into timeout results.
    pub(crate) fn drain_as_timeouts(&self) -> Vec<(usize, RequestResult)> {
        let mut entries: Vec<_> = self.entries.lock().drain().collect();
        entries.sort_by_key(|(index, _)| *index);

        entries
            .into_iter()
            .map(|(index, (started, phase))| {
                let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                (index, RequestResult::timed_out(latency_ms, Some(phase)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_drain() {
        let tracker = InFlight::default();
        tracker.begin(2, Phase::Warm);
        tracker.begin(0, Phase::Cold);
        tracker.begin(1, Phase::Cold);
        tracker.finish(1);

        tokio::time::advance(std::time::Duration::from_millis(250)).await;

        let stragglers = tracker.drain_as_timeouts();
        assert_eq!(stragglers.len(), 2);
        assert_eq!(stragglers[0].0, 0);
        assert_eq!(stragglers[0].1.phase, Some(Phase::Cold));
        assert_eq!(stragglers[1].0, 2);
        assert!(stragglers.iter().all(|(_, r)| r.timeout && r.latency_ms >= 250.0));
        assert!(tracker.drain_as_timeouts().is_empty());
    }

    #[test]
    fn test_dispatch_order_merge() {
        let finished = vec![
            (2, RequestResult::success(30.0, None)),
            (0, RequestResult::success(10.0, None)),
        ];
        let cancelled = vec![(1, RequestResult::timed_out(99.0, None))];

        let merged = in_dispatch_order(finished, cancelled);
        let latencies: Vec<f64> = merged.iter().map(|r| r.latency_ms).collect();
        assert_eq!(latencies, vec![10.0, 99.0, 30.0]);
    }

    #[test]
    fn test_request_spec_phase() {
        let spec = RequestSpec {
            cold_n: 1,
            ..RequestSpec::new("x")
        };
        assert_eq!(spec.phase_for(0), Phase::Cold);
        assert_eq!(spec.phase_for(1), Phase::Warm);
    }
}
