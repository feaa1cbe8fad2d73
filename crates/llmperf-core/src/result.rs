//! Per-request outcome records produced by the request executor.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Warm-up phase a request was dispatched in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    /// Request issued while the target is still cold.
    Cold,
    /// Request issued after the cold window.
    Warm,
}

impl Phase {
    /// Phase for the request at `index` given the size of the cold window.
    #[must_use]
    pub fn for_index(index: usize, cold_n: usize) -> Self {
        if index < cold_n {
            Self::Cold
        } else {
            Self::Warm
        }
    }

    /// Header value sent to the target when phase headers are enabled.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cold => "COLD",
            Self::Warm => "WARM",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one logical request against the target.
///
/// A non-success that is not a timeout is a generic error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestResult {
    /// Wall-clock time for the call, retries included.
    pub latency_ms: f64,

    /// Request completed successfully.
    pub success: bool,

    /// Request failed because it ran out of time.
    pub timeout: bool,

    /// Output tokens reported by the target (0 if unknown).
    #[serde(default)]
    pub tokens_out: u64,

    /// Cost reported by the target (0.0 if unknown).
    #[serde(default)]
    pub cost: f64,

    /// Phase the request was dispatched in.
    #[serde(default)]
    pub phase: Option<Phase>,

    /// Short error text for failed requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RequestResult {
    /// Successful request.
    #[must_use]
    pub fn success(latency_ms: f64, phase: Option<Phase>) -> Self {
        Self {
            latency_ms,
            success: true,
            timeout: false,
            tokens_out: 0,
            cost: 0.0,
            phase,
            error: None,
        }
    }

    /// Request that timed out.
    #[must_use]
    pub fn timed_out(latency_ms: f64, phase: Option<Phase>) -> Self {
        Self {
            latency_ms,
            success: false,
            timeout: true,
            tokens_out: 0,
            cost: 0.0,
            phase,
            error: Some("timeout".to_string()),
        }
    }

    /// Request that failed with a non-timeout error.
    #[must_use]
    pub fn failed(latency_ms: f64, phase: Option<Phase>, error: impl Into<String>) -> Self {
        Self {
            latency_ms,
            success: false,
            timeout: false,
            tokens_out: 0,
            cost: 0.0,
            phase,
            error: Some(error.into()),
        }
    }

    /// Attach token and cost figures.
    #[must_use]
    pub fn with_usage(mut self, tokens_out: u64, cost: f64) -> Self {
        self.tokens_out = tokens_out;
        self.cost = cost;
        self
    }

    /// Generic error: neither a success nor a timeout.
    #[must_use]
    pub fn is_error(&self) -> bool {
        !self.success && !self.timeout
    }
}
