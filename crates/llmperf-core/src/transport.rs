//! Narrow transport interface the harness drives load through.
//!
//! Provider adapters live outside the core and implement [`Transport`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Raw response returned by a transport.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportResponse {
    /// Target reported success.
    pub success: bool,

    /// Raw response text.
    pub text: String,

    /// Output tokens, if the target reports them.
    pub tokens_out: Option<u64>,

    /// Request cost, if the target reports it.
    pub cost: Option<f64>,
}

impl TransportResponse {
    /// Successful response with the given body.
    #[must_use]
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            success: true,
            text: text.into(),
            tokens_out: None,
            cost: None,
        }
    }

    /// Attach token and cost figures.
    #[must_use]
    pub fn with_usage(mut self, tokens_out: Option<u64>, cost: Option<f64>) -> Self {
        self.tokens_out = tokens_out;
        self.cost = cost;
        self
    }
}

/// Error raised by a transport for a single outbound call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    /// Call did not finish before its deadline.
    #[error("request timed out")]
    Timeout,

    /// Connection could not be established or was dropped.
    #[error("connection error: {0}")]
    Connect(String),

    /// Target answered with a non-success HTTP-style status.
    #[error("HTTP {code}: {body}")]
    Status {
        /// Status code.
        code: u16,
        /// Response body (possibly truncated).
        body: String,
    },

    /// Anything the transport could not classify.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Creates a `Status` variant.
    #[must_use]
    pub fn status(code: u16, body: impl Into<String>) -> Self {
        Self::Status {
            code,
            body: body.into(),
        }
    }

    /// Whether retrying the call may succeed.
    ///
    /// Timeouts, connection errors and 5xx are transient. Every 4xx
    /// (including 429) is not. Unrecognized errors count as transient.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Connect(_) => true,
            Self::Status { code, .. } => !(400..500).contains(code),
            Self::Other(_) => true,
        }
    }

    /// Whether this error represents a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// Outbound call capability: one payload in, one raw response out.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `payload` with `headers` to the target.
    async fn send(
        &self,
        payload: &str,
        headers: &HashMap<String, String>,
    ) -> Result<TransportResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(TransportError::Timeout.is_transient());
        assert!(TransportError::Connect("reset".into()).is_transient());
        assert!(TransportError::status(500, "").is_transient());
        assert!(TransportError::status(503, "").is_transient());
        assert!(TransportError::Other("weird".into()).is_transient());

        for code in [400, 401, 403, 404, 429] {
            assert!(!TransportError::status(code, "").is_transient(), "{code}");
        }
    }

    #[test]
    fn test_timeout_flag() {
        assert!(TransportError::Timeout.is_timeout());
        assert!(!TransportError::status(504, "gateway").is_timeout());
    }
}
