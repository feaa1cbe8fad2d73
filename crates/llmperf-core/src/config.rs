//! Configuration management for LLMPerf
//!
//! This module provides a centralized configuration system that supports:
//! - YAML/TOML/JSON configuration files
//! - Environment variable overrides
//! - Reasonable defaults
//! - Configuration validation

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::scenario::Thresholds;

/// Root configuration structure for LLMPerf
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PerfConfig {
    #[serde(default)]
    pub resilience: ResilienceConfig,

    #[serde(default)]
    pub thresholds: ThresholdConfig,

    #[serde(default)]
    pub harness: HarnessConfig,

    #[serde(default)]
    pub mock: MockConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl PerfConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest priority)
    /// 2. Config file specified by LLMPERF_CONFIG env var
    /// 3. ./config/llmperf.{yaml,toml,json}
    /// 4. Hardcoded defaults (lowest priority)
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Self::set_defaults(Config::builder())?;

        if let Ok(config_path) = std::env::var("LLMPERF_CONFIG") {
            builder = builder.add_source(File::with_name(&config_path).required(false));
        }

        builder = builder.add_source(File::with_name("./config/llmperf").required(false));

        // Example: LLMPERF_RESILIENCE__MAX_RETRIES=5
        builder = builder.add_source(
            Environment::with_prefix("LLMPERF")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: PerfConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file path, layered over defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: PerfConfig = Self::set_defaults(Config::builder())?
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    fn set_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            // Resilience: timeout + retry
            .set_default("resilience.timeout_s", 30.0)?
            .set_default("resilience.max_retries", 2)?
            .set_default("resilience.backoff_base_ms", 200)?
            .set_default("resilience.max_backoff_ms", 10_000)?
            .set_default("resilience.jitter_percent", 0.2)?
            // Resilience: circuit breaker
            .set_default("resilience.circuit_fails", 5)?
            .set_default("resilience.circuit_reset_s", 30.0)?
            .set_default("resilience.breaker_enabled", true)?
            // Resilience: bulkhead
            .set_default("resilience.concurrency", 64)?
            .set_default("resilience.queue_depth", 1024)?
            // Thresholds
            .set_default("thresholds.p95_ms_max", 2000.0)?
            .set_default("thresholds.error_rate_max", 0.05)?
            .set_default("thresholds.timeout_rate_max", 0.05)?
            .set_default("thresholds.throughput_rps_min", 0.0)?
            // Harness
            .set_default("harness.closed_loop_grace_ms", 2000)?
            .set_default("harness.drain_grace_max_ms", 5000)?
            .set_default("harness.rps_tolerance", 0.05)?
            .set_default("harness.sample_interval_ms", 100)?
            .set_default("harness.resource_sampling", true)?
            // Logging
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.resilience.validate()?;

        if !(0.0..=1.0).contains(&self.thresholds.error_rate_max)
            || !(0.0..=1.0).contains(&self.thresholds.timeout_rate_max)
        {
            return Err(ConfigError::Message(
                "thresholds.error_rate_max and thresholds.timeout_rate_max must be within [0, 1]"
                    .to_string(),
            ));
        }

        if !self.harness.rps_tolerance.is_finite() || self.harness.rps_tolerance < 0.0 {
            return Err(ConfigError::Message(
                "harness.rps_tolerance must be a finite value >= 0".to_string(),
            ));
        }

        if self.harness.sample_interval_ms == 0 {
            return Err(ConfigError::Message(
                "harness.sample_interval_ms must be > 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.mock.failure_rate)
            || !(0.0..=1.0).contains(&self.mock.timeout_fraction)
        {
            return Err(ConfigError::Message(
                "mock.failure_rate and mock.timeout_fraction must be within [0, 1]".to_string(),
            ));
        }

        Ok(())
    }
}

/// Timeout, retry, circuit breaker and bulkhead settings for one client
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Per-attempt timeout in seconds
    pub timeout_s: f64,

    /// Retries after the first attempt (transient errors only)
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds
    pub backoff_base_ms: u64,

    /// Upper bound for a single backoff delay in milliseconds
    pub max_backoff_ms: u64,

    /// Jitter added on top of each delay, as a fraction of the delay (0.0-1.0)
    pub jitter_percent: f64,

    /// Consecutive failures that open the circuit
    pub circuit_fails: u32,

    /// Cooldown in seconds before a half-open probe is allowed
    pub circuit_reset_s: f64,

    /// Maximum in-flight calls through the client
    pub concurrency: usize,

    /// Maximum callers waiting for an in-flight slot
    pub queue_depth: usize,

    /// Disable to bypass all circuit breaker gating
    pub breaker_enabled: bool,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            timeout_s: 30.0,
            max_retries: 2,
            backoff_base_ms: 200,
            max_backoff_ms: 10_000,
            jitter_percent: 0.2,
            circuit_fails: 5,
            circuit_reset_s: 30.0,
            concurrency: 64,
            queue_depth: 1024,
            breaker_enabled: true,
        }
    }
}

impl ResilienceConfig {
    /// Per-attempt timeout
    pub fn timeout(&self) -> Duration {
        secs_to_duration(self.timeout_s)
    }

    /// Circuit breaker cooldown
    pub fn circuit_reset(&self) -> Duration {
        secs_to_duration(self.circuit_reset_s)
    }

    /// Backoff delay (without jitter) after the given zero-based attempt
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = (self.backoff_base_ms as f64 * 2f64.powi(attempt as i32))
            .min(self.max_backoff_ms as f64);
        Duration::from_millis(delay_ms as u64)
    }

    /// Validate resilience values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.timeout_s.is_finite() || self.timeout_s <= 0.0 {
            return Err(ConfigError::Message(
                "resilience.timeout_s must be > 0".to_string(),
            ));
        }

        if !self.circuit_reset_s.is_finite() || self.circuit_reset_s < 0.0 {
            return Err(ConfigError::Message(
                "resilience.circuit_reset_s must be a finite value >= 0".to_string(),
            ));
        }

        if self.circuit_fails == 0 {
            return Err(ConfigError::Message(
                "resilience.circuit_fails must be > 0".to_string(),
            ));
        }

        if self.concurrency == 0 {
            return Err(ConfigError::Message(
                "resilience.concurrency must be > 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.jitter_percent) {
            return Err(ConfigError::Message(
                "resilience.jitter_percent must be within [0, 1]".to_string(),
            ));
        }

        Ok(())
    }
}

/// Unvalidated values saturate instead of panicking.
fn secs_to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

/// Global default thresholds, applied where a scenario sets no override
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ThresholdConfig {
    pub p95_ms_max: f64,
    pub error_rate_max: f64,
    pub timeout_rate_max: f64,
    pub throughput_rps_min: f64,
    pub tokens_per_sec_min: Option<f64>,
    pub memory_peak_mb_max: Option<f64>,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            p95_ms_max: 2000.0,
            error_rate_max: 0.05,
            timeout_rate_max: 0.05,
            throughput_rps_min: 0.0,
            tokens_per_sec_min: None,
            memory_peak_mb_max: None,
        }
    }
}

impl ThresholdConfig {
    /// Overlay scenario overrides onto these defaults
    pub fn merged(&self, overrides: Option<&Thresholds>) -> ThresholdConfig {
        let Some(o) = overrides else {
            return self.clone();
        };

        ThresholdConfig {
            p95_ms_max: o.p95_ms_max.unwrap_or(self.p95_ms_max),
            error_rate_max: o.error_rate_max.unwrap_or(self.error_rate_max),
            timeout_rate_max: o.timeout_rate_max.unwrap_or(self.timeout_rate_max),
            throughput_rps_min: o.throughput_rps_min.unwrap_or(self.throughput_rps_min),
            tokens_per_sec_min: o.tokens_per_sec_min.or(self.tokens_per_sec_min),
            memory_peak_mb_max: o.memory_peak_mb_max.or(self.memory_peak_mb_max),
        }
    }
}

/// Load driver tuning
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HarnessConfig {
    /// Extra time after the closed-loop deadline before workers are cancelled
    pub closed_loop_grace_ms: u64,

    /// Cap on the open-loop drain wait (the wait is min(cap, resilience.timeout_s))
    pub drain_grace_max_ms: u64,

    /// Allowed relative deviation of achieved open-loop RPS from target
    pub rps_tolerance: f64,

    /// Resource sampling period
    pub sample_interval_ms: u64,

    /// Sample process memory/CPU during runs
    pub resource_sampling: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            closed_loop_grace_ms: 2000,
            drain_grace_max_ms: 5000,
            rps_tolerance: 0.05,
            sample_interval_ms: 100,
            resource_sampling: true,
        }
    }
}

impl HarnessConfig {
    pub fn closed_loop_grace(&self) -> Duration {
        Duration::from_millis(self.closed_loop_grace_ms)
    }

    /// Open-loop drain wait for the given per-request timeout
    pub fn drain_grace(&self, request_timeout: Duration) -> Duration {
        Duration::from_millis(self.drain_grace_max_ms).min(request_timeout)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

/// Simulated target used when no transport is injected
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MockConfig {
    /// Base latency for COLD requests (cold-start penalty)
    pub cold_base_ms: u64,

    /// Base latency for WARM (and untagged) requests
    pub warm_base_ms: u64,

    /// Upper bound of uniform jitter added to the base
    pub jitter_ms: u64,

    /// Probability that a request fails
    pub failure_rate: f64,

    /// Fraction of failures reported as timeouts
    pub timeout_fraction: f64,

    /// Output tokens reported for successful requests
    pub tokens_out: u64,

    /// RNG seed
    pub seed: u64,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            cold_base_ms: 120,
            warm_base_ms: 40,
            jitter_ms: 20,
            failure_rate: 0.01,
            timeout_fraction: 0.3,
            tokens_out: 32,
            seed: 42,
        }
    }
}

impl MockConfig {
    /// Mock that never fails
    pub fn reliable() -> Self {
        Self {
            failure_rate: 0.0,
            ..Self::default()
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error (default: "info")
    pub level: String,

    /// Log format: json or pretty (default: "pretty")
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
