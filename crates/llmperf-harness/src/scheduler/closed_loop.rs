//! Closed-loop driver: a fixed pool of workers, each sending its next request
//! as soon as the previous one finished (plus optional think time).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{yield_now, JoinSet};
use tokio::time::{sleep, sleep_until, timeout_at, Instant};
use tracing::{debug, info, warn};

use super::{in_dispatch_order, DriverRun, InFlight, RequestSpec, Results};
use crate::executor::RequestExecutor;
use crate::monitor::ResourceMonitor;

/// Shortest pause while a half-open probe is in flight.
const CIRCUIT_POLL: Duration = Duration::from_millis(10);

#[derive(Clone)]
pub struct ClosedLoopDriver {
    executor: Arc<RequestExecutor>,
    grace: Duration,
    monitor: ResourceMonitor,
}

impl ClosedLoopDriver {
    /// `grace` is how long past the deadline workers may finish their last
    /// request before they are cancelled.
    pub fn new(executor: Arc<RequestExecutor>, grace: Duration, monitor: ResourceMonitor) -> Self {
        Self {
            executor,
            grace,
            monitor,
        }
    }

    /// Run `concurrency` workers for `duration`.
    pub async fn run(
        &self,
        concurrency: usize,
        duration: Duration,
        spec: &RequestSpec,
        think_time: Option<Duration>,
    ) -> DriverRun {
        let spec = Arc::new(spec.clone());
        let results: Results = Arc::default();
        let in_flight = Arc::new(InFlight::default());
        let next_index = Arc::new(AtomicUsize::new(0));

        let session = self.monitor.start();
        let start = Instant::now();
        let deadline = start + duration;

        info!(
            concurrency,
            duration_sec = duration.as_secs_f64(),
            cold_n = spec.cold_n,
            "Starting closed-loop run"
        );

        let mut workers = JoinSet::new();
        for worker_id in 0..concurrency {
            workers.spawn(worker(
                worker_id,
                Arc::clone(&self.executor),
                Arc::clone(&spec),
                Arc::clone(&next_index),
                Arc::clone(&results),
                Arc::clone(&in_flight),
                deadline,
                think_time,
            ));
        }

        let joined = timeout_at(deadline + self.grace, async {
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    warn!("Closed-loop worker ended abnormally: {}", e);
                }
            }
        })
        .await;

        if joined.is_err() {
            warn!(
                grace_ms = self.grace.as_millis() as u64,
                "Closed-loop workers still busy after grace period, cancelling"
            );
            workers.abort_all();
            while workers.join_next().await.is_some() {}
        }

        let wall_time_sec = start.elapsed().as_secs_f64();
        let resources = session.stop().await;

        let finished = std::mem::take(&mut *results.lock());
        let cancelled = in_flight.drain_as_timeouts();
        if !cancelled.is_empty() {
            debug!(count = cancelled.len(), "Recording cancelled requests as timeouts");
        }
        let results = in_dispatch_order(finished, cancelled);

        info!(
            requests = results.len(),
            wall_time_sec,
            "Closed-loop run finished"
        );

        DriverRun {
            results,
            wall_time_sec,
            achieved_rps: None,
            resources,
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker(
    worker_id: usize,
    executor: Arc<RequestExecutor>,
    spec: Arc<RequestSpec>,
    next_index: Arc<AtomicUsize>,
    results: Results,
    in_flight: Arc<InFlight>,
    deadline: Instant,
    think_time: Option<Duration>,
) {
    let mut sent = 0usize;

    while Instant::now() < deadline {
        let index = next_index.fetch_add(1, Ordering::SeqCst);
        let phase = spec.phase_for(index);

        in_flight.begin(index, phase);
        let result = executor
            .execute(&spec.input, &spec.headers, Some(phase), spec.phase_headers)
            .await;
        in_flight.finish(index);
        let failed = !result.success;
        results.lock().push((index, result));
        sent += 1;

        // An open breaker rejects without awaiting; wait out its cooldown.
        if failed {
            if let Some(wait) = executor.client().circuit_retry_after() {
                let resume = Instant::now()
                    .checked_add(wait.max(CIRCUIT_POLL))
                    .map_or(deadline, |t| t.min(deadline));
                debug!(worker_id, wait_ms = wait.as_millis() as u64, "Circuit open, pausing worker");
                sleep_until(resume).await;
                continue;
            }
        }

        match think_time {
            Some(pause) => sleep(pause).await,
            None => yield_now().await,
        }
    }

    debug!(worker_id, sent, "Closed-loop worker done");
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmperf_core::{MockConfig, Phase, ResilienceConfig};
    use llmperf_resilience::ResilientClient;

    fn driver(mock: MockConfig, grace: Duration) -> ClosedLoopDriver {
        let client = Arc::new(ResilientClient::new("closed-loop-test", ResilienceConfig::default()));
        let executor = Arc::new(RequestExecutor::mock(client, mock));
        ClosedLoopDriver::new(executor, grace, ResourceMonitor::disabled())
    }

    fn fixed_latency(ms: u64) -> MockConfig {
        MockConfig {
            cold_base_ms: ms,
            warm_base_ms: ms,
            jitter_ms: 0,
            ..MockConfig::reliable()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_count_tracks_latency() {
        let run = driver(fixed_latency(100), Duration::from_secs(2))
            .run(2, Duration::from_secs(1), &RequestSpec::new("x"), None)
            .await;

        // Two workers, 100ms each, 1s window
        assert_eq!(run.results.len(), 20);
        assert!(run.results.iter().all(|r| r.success));
        assert!(run.achieved_rps.is_none());
        assert!((run.wall_time_sec - 1.0).abs() < 0.01);
    }

    #[tokio::test(start_paused = true)]
    async fn test_phase_assignment_is_global() {
        let spec = RequestSpec {
            cold_n: 3,
            ..RequestSpec::new("x")
        };
        let run = driver(fixed_latency(50), Duration::from_secs(2))
            .run(3, Duration::from_millis(500), &spec, None)
            .await;

        let cold = run
            .results
            .iter()
            .filter(|r| r.phase == Some(Phase::Cold))
            .count();
        assert_eq!(cold, 3);
        assert!(run.results.len() > 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_think_time_slows_workers() {
        let run = driver(fixed_latency(100), Duration::from_secs(2))
            .run(
                1,
                Duration::from_secs(1),
                &RequestSpec::new("x"),
                Some(Duration::from_millis(100)),
            )
            .await;

        assert_eq!(run.results.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_pauses_workers() {
        use async_trait::async_trait;
        use llmperf_core::{Transport, TransportError, TransportResponse};
        use std::collections::HashMap;
        use std::sync::atomic::AtomicU32;

        struct Unavailable(AtomicU32);

        #[async_trait]
        impl Transport for Unavailable {
            async fn send(
                &self,
                _payload: &str,
                _headers: &HashMap<String, String>,
            ) -> Result<TransportResponse, TransportError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Err(TransportError::status(503, "unavailable"))
            }
        }

        let transport = Arc::new(Unavailable(AtomicU32::new(0)));
        let client = Arc::new(ResilientClient::new(
            "closed-loop-breaker",
            ResilienceConfig {
                max_retries: 0,
                circuit_fails: 2,
                circuit_reset_s: 10.0,
                ..Default::default()
            },
        ));
        let executor = Arc::new(RequestExecutor::with_transport(client, transport.clone()));
        let driver = ClosedLoopDriver::new(executor, Duration::from_secs(1), ResourceMonitor::disabled());

        let run = driver
            .run(1, Duration::from_millis(300), &RequestSpec::new("x"), None)
            .await;

        // The second failure trips the breaker; the worker then sleeps to
        // the deadline instead of collecting rejections.
        assert_eq!(transport.0.load(Ordering::SeqCst), 2);
        assert_eq!(run.results.len(), 2);
        assert!(run.results.iter().all(|r| r.is_error()));
        assert!((run.wall_time_sec - 0.3).abs() < 0.01);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_past_grace_become_timeouts() {
        let run = driver(fixed_latency(5_000), Duration::from_millis(500))
            .run(2, Duration::from_secs(1), &RequestSpec::new("x"), None)
            .await;

        assert_eq!(run.results.len(), 2);
        assert!(run.results.iter().all(|r| r.timeout && !r.success));
        assert!((run.wall_time_sec - 1.5).abs() < 0.01);
    }
}
