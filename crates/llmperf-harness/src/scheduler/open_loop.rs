//! Open-loop driver: requests arrive on a precomputed schedule regardless of
//! how fast earlier requests complete.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use super::{in_dispatch_order, DriverRun, InFlight, RequestSpec, Results};
use crate::executor::RequestExecutor;
use crate::monitor::ResourceMonitor;

/// Dispatch offsets `i / rate_rps` for `i in 0..floor(rate_rps * duration_sec)`.
pub fn schedule(rate_rps: f64, duration_sec: f64) -> Vec<Duration> {
    if !(rate_rps.is_finite() && duration_sec.is_finite()) || rate_rps <= 0.0 || duration_sec <= 0.0 {
        return Vec::new();
    }

    // Small epsilon so 2.5 * 4.0 style products do not floor to 9.
    let count = (rate_rps * duration_sec + 1e-9).floor() as usize;
    (0..count)
        .map(|i| Duration::from_secs_f64(i as f64 / rate_rps))
        .collect()
}

#[derive(Clone)]
pub struct OpenLoopDriver {
    executor: Arc<RequestExecutor>,
    drain_grace: Duration,
    rps_tolerance: f64,
    monitor: ResourceMonitor,
}

impl OpenLoopDriver {
    /// `drain_grace` bounds the wait for in-flight requests once the last
    /// request has been dispatched.
    pub fn new(
        executor: Arc<RequestExecutor>,
        drain_grace: Duration,
        rps_tolerance: f64,
        monitor: ResourceMonitor,
    ) -> Self {
        Self {
            executor,
            drain_grace,
            rps_tolerance,
            monitor,
        }
    }

    /// Dispatch at `rate_rps` for `duration`.
    pub async fn run(&self, rate_rps: f64, duration: Duration, spec: &RequestSpec) -> DriverRun {
        let duration_sec = duration.as_secs_f64();
        let offsets = schedule(rate_rps, duration_sec);
        let spec = Arc::new(spec.clone());
        let results: Results = Arc::default();
        let in_flight = Arc::new(InFlight::default());

        info!(
            rate_rps,
            duration_sec,
            scheduled = offsets.len(),
            cold_n = spec.cold_n,
            "Starting open-loop run"
        );

        let session = self.monitor.start();
        let start = Instant::now();
        let mut tasks = JoinSet::new();

        for (index, offset) in offsets.iter().enumerate() {
            sleep_until(start + *offset).await;

            let phase = spec.phase_for(index);
            in_flight.begin(index, phase);

            let executor = Arc::clone(&self.executor);
            let spec = Arc::clone(&spec);
            let results = Arc::clone(&results);
            let in_flight = Arc::clone(&in_flight);
            tasks.spawn(async move {
                let result = executor
                    .execute(&spec.input, &spec.headers, Some(phase), spec.phase_headers)
                    .await;
                in_flight.finish(index);
                results.lock().push((index, result));
            });

            // Reap finished tasks so the set does not grow with the schedule.
            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    warn!("Open-loop request task ended abnormally: {}", e);
                }
            }
        }

        let dispatch_window = start.elapsed().as_secs_f64();
        debug!(
            dispatched = offsets.len(),
            pending = tasks.len(),
            dispatch_window,
            "Open-loop dispatch finished, draining"
        );

        let drained = timeout(self.drain_grace, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    warn!("Open-loop request task ended abnormally: {}", e);
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                pending = tasks.len(),
                drain_grace_ms = self.drain_grace.as_millis() as u64,
                "Open-loop drain timed out, cancelling stragglers"
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }

        let wall_time_sec = start.elapsed().as_secs_f64();
        let resources = session.stop().await;

        let finished = std::mem::take(&mut *results.lock());
        let completed = finished.len();
        let results = in_dispatch_order(finished, in_flight.drain_as_timeouts());

        let achieved_rps = completed as f64 / duration_sec.max(dispatch_window).max(f64::EPSILON);
        self.check_rate(rate_rps, achieved_rps);

        info!(
            requests = results.len(),
            completed,
            achieved_rps,
            wall_time_sec,
            "Open-loop run finished"
        );

        DriverRun {
            results,
            wall_time_sec,
            achieved_rps: Some(achieved_rps),
            resources,
        }
    }

    fn check_rate(&self, target: f64, achieved: f64) -> bool {
        let deviation = (achieved - target).abs() / target;
        if deviation > self.rps_tolerance {
            warn!(
                target_rps = target,
                achieved_rps = achieved,
                deviation,
                tolerance = self.rps_tolerance,
                "Achieved open-loop rate outside tolerance"
            );
            return false;
        }
        true
    }
}
