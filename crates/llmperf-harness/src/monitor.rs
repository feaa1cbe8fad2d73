//! Process memory/CPU sampling during a driver run.

use std::time::Duration;

use llmperf_core::HarnessConfig;
use serde::{Deserialize, Serialize};
use sysinfo::{get_current_pid, Pid, ProcessExt, System, SystemExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

/// Peak resource figures observed during a run. `None` when not measured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub memory_peak_mb: Option<f64>,
    pub cpu_peak_pct: Option<f64>,
}

impl ResourceUsage {
    fn observe(&mut self, memory_mb: f64, cpu_pct: f64) {
        self.memory_peak_mb = Some(self.memory_peak_mb.map_or(memory_mb, |m| m.max(memory_mb)));
        self.cpu_peak_pct = Some(self.cpu_peak_pct.map_or(cpu_pct, |c| c.max(cpu_pct)));
    }
}

/// Samples the current process at a fixed interval.
#[derive(Debug, Clone)]
pub struct ResourceMonitor {
    interval: Duration,
    enabled: bool,
}

impl ResourceMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            enabled: true,
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            interval: config.sample_interval(),
            enabled: config.resource_sampling,
        }
    }

    /// Monitor that never samples; its sessions report `None` peaks.
    pub fn disabled() -> Self {
        Self {
            interval: Duration::from_millis(100),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && System::IS_SUPPORTED
    }

    /// Start sampling in the background.
    pub fn start(&self) -> MonitorSession {
        if !self.is_enabled() {
            return MonitorSession { inner: None };
        }
        let Ok(pid) = get_current_pid() else {
            debug!("Current pid unavailable, resource sampling disabled");
            return MonitorSession { inner: None };
        };

        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(sample_loop(pid, self.interval, stop_rx));

        MonitorSession {
            inner: Some((stop_tx, handle)),
        }
    }
}

/// A running sampler. Call [`MonitorSession::stop`] to collect peaks.
#[derive(Debug)]
pub struct MonitorSession {
    inner: Option<(oneshot::Sender<()>, JoinHandle<ResourceUsage>)>,
}

impl MonitorSession {
    pub async fn stop(self) -> ResourceUsage {
        let Some((stop_tx, handle)) = self.inner else {
            return ResourceUsage::default();
        };

        let _ = stop_tx.send(());
        handle.await.unwrap_or_default()
    }
}

async fn sample_loop(pid: Pid, period: Duration, mut stop: oneshot::Receiver<()>) -> ResourceUsage {
    let mut system = System::new();
    let mut usage = ResourceUsage::default();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = ticker.tick() => {
                if !system.refresh_process(pid) {
                    continue;
                }
                if let Some(process) = system.process(pid) {
                    let memory_mb = process.memory() as f64 / (1024.0 * 1024.0);
                    usage.observe(memory_mb, process.cpu_usage() as f64);
                }
            }
        }
    }

    // One final sample so very short runs still report a peak.
    if system.refresh_process(pid) {
        if let Some(process) = system.process(pid) {
            usage.observe(process.memory() as f64 / (1024.0 * 1024.0), process.cpu_usage() as f64);
        }
    }

    usage
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_monitor_reports_nothing() {
        let usage = ResourceMonitor::disabled().start().stop().await;
        assert_eq!(usage, ResourceUsage::default());
    }

    #[tokio::test]
    async fn test_enabled_monitor_samples_memory() {
        let monitor = ResourceMonitor::new(Duration::from_millis(10));
        let session = monitor.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let usage = session.stop().await;

        if monitor.is_enabled() {
            assert!(usage.memory_peak_mb.unwrap_or(0.0) > 0.0);
        }
    }

    #[test]
    fn test_observe_keeps_peaks() {
        let mut usage = ResourceUsage::default();
        usage.observe(10.0, 50.0);
        usage.observe(5.0, 80.0);
        assert_eq!(usage.memory_peak_mb, Some(10.0));
        assert_eq!(usage.cpu_peak_pct, Some(80.0));
    }
}
