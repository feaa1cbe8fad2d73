//! Simulated target used when no transport is injected.

use llmperf_core::{MockConfig, Phase, RequestResult};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Seeded latency/failure simulator.
///
/// COLD requests pay `cold_base_ms`, everything else `warm_base_ms`, plus
/// uniform jitter. Simulated timeouts report the client timeout as their
/// latency but sleep for at most the drawn latency.
#[derive(Debug)]
pub struct MockTarget {
    config: MockConfig,
    rng: Mutex<StdRng>,
}

struct Draw {
    latency: Duration,
    fails: bool,
    times_out: bool,
}

impl MockTarget {
    pub fn new(config: MockConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng: Mutex::new(rng),
        }
    }

    pub fn config(&self) -> &MockConfig {
        &self.config
    }

    fn draw(&self, phase: Option<Phase>) -> Draw {
        let base_ms = match phase {
            Some(Phase::Cold) => self.config.cold_base_ms,
            _ => self.config.warm_base_ms,
        };

        let mut rng = self.rng.lock();
        let jitter_ms = if self.config.jitter_ms > 0 {
            rng.gen_range(0..=self.config.jitter_ms)
        } else {
            0
        };
        let fails = rng.gen::<f64>() < self.config.failure_rate;
        let times_out = fails && rng.gen::<f64>() < self.config.timeout_fraction;

        Draw {
            latency: Duration::from_millis(base_ms + jitter_ms),
            fails,
            times_out,
        }
    }

    /// Simulate one request. Draws longer than `timeout` are cut off there
    /// and reported as timeouts.
    pub async fn simulate(&self, phase: Option<Phase>, timeout: Duration) -> RequestResult {
        let draw = self.draw(phase);
        let start = Instant::now();
        sleep(draw.latency.min(timeout)).await;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        if draw.times_out || draw.latency > timeout {
            RequestResult::timed_out(timeout.as_secs_f64() * 1000.0, phase)
        } else if draw.fails {
            RequestResult::failed(latency_ms, phase, "simulated server error")
        } else {
            RequestResult::success(latency_ms, phase).with_usage(self.config.tokens_out, 0.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_cold_requests_pay_penalty() {
        let mock = MockTarget::new(MockConfig {
            jitter_ms: 0,
            ..MockConfig::reliable()
        });

        let cold = mock.simulate(Some(Phase::Cold), Duration::from_secs(30)).await;
        let warm = mock.simulate(Some(Phase::Warm), Duration::from_secs(30)).await;

        assert!(cold.success && warm.success);
        assert_eq!(cold.latency_ms, 120.0);
        assert_eq!(warm.latency_ms, 40.0);
        assert_eq!(warm.tokens_out, 32);
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_is_bounded() {
        let mock = MockTarget::new(MockConfig::reliable());

        for _ in 0..50 {
            let r = mock.simulate(None, Duration::from_secs(30)).await;
            assert!(r.latency_ms >= 40.0 && r.latency_ms <= 60.0, "{}", r.latency_ms);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_seed_same_sequence() {
        let a = MockTarget::new(MockConfig::default());
        let b = MockTarget::new(MockConfig::default());

        for _ in 0..20 {
            let ra = a.simulate(Some(Phase::Warm), Duration::from_secs(1)).await;
            let rb = b.simulate(Some(Phase::Warm), Duration::from_secs(1)).await;
            assert_eq!(ra, rb);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_mock_splits_timeouts() {
        let mock = MockTarget::new(MockConfig {
            failure_rate: 1.0,
            timeout_fraction: 1.0,
            ..MockConfig::default()
        });

        let r = mock.simulate(Some(Phase::Warm), Duration::from_secs(2)).await;
        assert!(!r.success && r.timeout);
        assert_eq!(r.latency_ms, 2000.0);

        let mock = MockTarget::new(MockConfig {
            failure_rate: 1.0,
            timeout_fraction: 0.0,
            ..MockConfig::default()
        });
        let r = mock.simulate(Some(Phase::Warm), Duration::from_secs(2)).await;
        assert!(r.is_error());
    }

    #[tokio::test(start_paused = true)]
    async fn test_draw_past_timeout_is_cut_off() {
        let mock = MockTarget::new(MockConfig {
            jitter_ms: 0,
            ..MockConfig::reliable()
        });

        let start = Instant::now();
        let r = mock.simulate(Some(Phase::Cold), Duration::from_millis(50)).await;
        assert!(!r.success && r.timeout);
        assert!((r.latency_ms - 50.0).abs() < 1e-6, "{}", r.latency_ms);
        assert_eq!(start.elapsed(), Duration::from_millis(50));

        let r = mock.simulate(Some(Phase::Warm), Duration::from_millis(50)).await;
        assert!(r.success);
        assert_eq!(r.latency_ms, 40.0);
    }
}
