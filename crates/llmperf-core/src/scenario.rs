//! Declarative scenario definitions.
//!
//! A [`Scenario`] arrives already deserialized by an external loader; the
//! harness only validates it and renders its request template.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::error::{CoreError, CoreResult};

/// Scenario category. Drives which latency segment is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// First requests against a freshly started target.
    ColdStart,
    /// Steady-state latency after warm-up.
    Warm,
    /// Sustained request rate.
    Throughput,
    /// Load beyond the expected operating point.
    Stress,
    /// Resource consumption under load.
    Memory,
}

impl Category {
    /// Snake-case name as used in scenario files.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ColdStart => "cold_start",
            Self::Warm => "warm",
            Self::Throughput => "throughput",
            Self::Stress => "stress",
            Self::Memory => "memory",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Traffic model used to drive load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Fixed worker pool, each worker waits for its previous request.
    ClosedLoop,
    /// Fixed arrival rate, independent of service time.
    OpenLoop,
}

impl LoadMode {
    /// Driver name reported in results.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClosedLoop => "closed_loop",
            Self::OpenLoop => "open_loop",
        }
    }
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request payload template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestTemplate {
    /// Input text. May reference `{{scenario_id}}`, `{{category}}` and `{{subtype}}`.
    pub input: String,

    /// Extra headers sent with every request.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Number of times the rendered input is repeated (default: 1).
    #[serde(default = "default_repeats")]
    pub repeats: usize,
}

fn default_repeats() -> usize {
    1
}

/// Load shape for a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadConfig {
    pub mode: LoadMode,

    /// Worker count (closed-loop only).
    #[serde(default)]
    pub concurrency: Option<usize>,

    /// Target arrival rate (open-loop only).
    #[serde(default)]
    pub rate_rps: Option<f64>,

    pub duration_sec: f64,

    /// Pause between iterations of a closed-loop worker.
    #[serde(default)]
    pub think_time_ms: Option<u64>,
}

impl LoadConfig {
    /// Closed-loop load with the given worker count.
    #[must_use]
    pub fn closed_loop(concurrency: usize, duration_sec: f64) -> Self {
        Self {
            mode: LoadMode::ClosedLoop,
            concurrency: Some(concurrency),
            rate_rps: None,
            duration_sec,
            think_time_ms: None,
        }
    }

    /// Open-loop load at the given arrival rate.
    #[must_use]
    pub fn open_loop(rate_rps: f64, duration_sec: f64) -> Self {
        Self {
            mode: LoadMode::OpenLoop,
            concurrency: None,
            rate_rps: Some(rate_rps),
            duration_sec,
            think_time_ms: None,
        }
    }

    /// Run duration.
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_sec.max(0.0))
    }

    /// Think time between closed-loop iterations, if any.
    #[must_use]
    pub fn think_time(&self) -> Option<Duration> {
        self.think_time_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

/// Cold/warm segmentation settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Segmentation {
    /// Number of leading requests tagged COLD.
    #[serde(default)]
    pub cold_n: usize,

    /// Leading requests excluded from the warm slice.
    #[serde(default)]
    pub warmup_exclude_n: usize,

    /// Send `X-Perf-Phase` with each request.
    #[serde(default)]
    pub phase_headers: bool,
}

/// Per-scenario threshold overrides. Unset fields fall back to global defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default)]
    pub p95_ms_max: Option<f64>,
    #[serde(default)]
    pub error_rate_max: Option<f64>,
    #[serde(default)]
    pub timeout_rate_max: Option<f64>,
    #[serde(default)]
    pub throughput_rps_min: Option<f64>,
    #[serde(default)]
    pub tokens_per_sec_min: Option<f64>,
    #[serde(default)]
    pub memory_peak_mb_max: Option<f64>,
}

/// Declarative performance test unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub category: Category,
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub required: bool,
    pub request: RequestTemplate,
    pub load: LoadConfig,
    #[serde(default)]
    pub segmentation: Segmentation,
    #[serde(default)]
    pub thresholds: Option<Thresholds>,
}

impl Scenario {
    /// Build a scenario with default segmentation and no overrides.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        category: Category,
        input: impl Into<String>,
        load: LoadConfig,
    ) -> Self {
        Self {
            id: id.into(),
            category,
            subtype: String::new(),
            required: false,
            request: RequestTemplate {
                input: input.into(),
                headers: HashMap::new(),
                repeats: 1,
            },
            load,
            segmentation: Segmentation::default(),
            thresholds: None,
        }
    }

    /// Check the structural invariants of the scenario.
    pub fn validate(&self) -> CoreResult<()> {
        if self.id.trim().is_empty() {
            return Err(CoreError::validation("scenario id must not be empty"));
        }

        if !self.load.duration_sec.is_finite() || self.load.duration_sec <= 0.0 {
            return Err(CoreError::validation(format!(
                "scenario `{}`: load.duration_sec must be > 0 (got {})",
                self.id, self.load.duration_sec
            )));
        }

        match self.load.mode {
            LoadMode::ClosedLoop => match self.load.concurrency {
                Some(c) if c > 0 => {}
                other => {
                    return Err(CoreError::validation(format!(
                        "scenario `{}`: closed_loop requires concurrency > 0 (got {:?})",
                        self.id, other
                    )))
                }
            },
            LoadMode::OpenLoop => match self.load.rate_rps {
                Some(r) if r > 0.0 && r.is_finite() => {}
                other => {
                    return Err(CoreError::validation(format!(
                        "scenario `{}`: open_loop requires rate_rps > 0 (got {:?})",
                        self.id, other
                    )))
                }
            },
        }

        Ok(())
    }

    /// Render the request template into the payload sent to the target.
    ///
    /// Placeholders are `{{scenario_id}}`, `{{category}}` and `{{subtype}}`.
    /// The rendered text is repeated `repeats` times, joined by newlines.
    pub fn render_input(&self) -> CoreResult<String> {
        if self.request.repeats == 0 {
            return Err(CoreError::template(format!(
                "scenario `{}`: request.repeats must be >= 1",
                self.id
            )));
        }

        let template = &self.request.input;
        let mut rendered = String::with_capacity(template.len());
        let mut rest = template.as_str();

        while let Some(open) = rest.find("{{") {
            rendered.push_str(&rest[..open]);
            let after = &rest[open + 2..];
            let close = after.find("}}").ok_or_else(|| {
                CoreError::template(format!(
                    "scenario `{}`: unterminated placeholder in request input",
                    self.id
                ))
            })?;

            let name = after[..close].trim();
            match name {
                "scenario_id" => rendered.push_str(&self.id),
                "category" => rendered.push_str(self.category.as_str()),
                "subtype" => rendered.push_str(&self.subtype),
                unknown => {
                    return Err(CoreError::template(format!(
                        "scenario `{}`: unknown placeholder `{{{{{}}}}}`",
                        self.id, unknown
                    )))
                }
            }

            rest = &after[close + 2..];
        }
        rendered.push_str(rest);

        if self.request.repeats == 1 {
            return Ok(rendered);
        }

        Ok(vec![rendered; self.request.repeats].join("\n"))
    }
}
