//! Issues one logical request and turns the outcome into a [`RequestResult`].

use std::collections::HashMap;
use std::sync::Arc;

use llmperf_core::metrics::{REQUESTS_TOTAL, REQUEST_LATENCY};
use llmperf_core::{
    MockConfig, Phase, RequestResult, Transport, TransportError, TransportResponse,
};
use llmperf_resilience::{ResilienceError, ResilientClient};
use tokio::time::Instant;
use tracing::trace;

use crate::mock::MockTarget;

/// Header carrying the phase tag when phase headers are enabled.
pub const PHASE_HEADER: &str = "X-Perf-Phase";

/// Error text for a response the target itself marked unsuccessful.
const SOFT_FAILURE: &str = "target reported failure";

enum Target {
    Transport(Arc<dyn Transport>),
    Mock(MockTarget),
}

/// Sends requests through a shared [`ResilientClient`].
///
/// Without an injected transport the executor answers from a seeded
/// [`MockTarget`] instead.
pub struct RequestExecutor {
    client: Arc<ResilientClient>,
    target: Target,
}

impl RequestExecutor {
    pub fn with_transport(client: Arc<ResilientClient>, transport: Arc<dyn Transport>) -> Self {
        Self {
            client,
            target: Target::Transport(transport),
        }
    }

    pub fn mock(client: Arc<ResilientClient>, config: MockConfig) -> Self {
        Self {
            client,
            target: Target::Mock(MockTarget::new(config)),
        }
    }

    pub fn client(&self) -> &Arc<ResilientClient> {
        &self.client
    }

    pub fn is_mock(&self) -> bool {
        matches!(self.target, Target::Mock(_))
    }

    /// Execute one request. Never fails: every outcome becomes a result.
    pub async fn execute(
        &self,
        input: &str,
        headers: &HashMap<String, String>,
        phase: Option<Phase>,
        send_phase_headers: bool,
    ) -> RequestResult {
        let result = match &self.target {
            Target::Mock(mock) => mock.simulate(phase, self.client.config().timeout()).await,
            Target::Transport(transport) => {
                let mut headers = headers.clone();
                if send_phase_headers {
                    if let Some(phase) = phase {
                        headers.insert(PHASE_HEADER.to_string(), phase.as_str().to_string());
                    }
                }
                self.send(transport.as_ref(), input, &headers, phase).await
            }
        };

        record(&result);
        result
    }

    async fn send(
        &self,
        transport: &dyn Transport,
        input: &str,
        headers: &HashMap<String, String>,
        phase: Option<Phase>,
    ) -> RequestResult {
        let start = Instant::now();
        let outcome = self
            .client
            .call_with_resilience("request", || async move {
                let response = transport.send(input, headers).await?;
                if response.success {
                    Ok(response)
                } else {
                    Err(TransportError::Other(SOFT_FAILURE.to_string()))
                }
            })
            .await;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(response) => from_response(response, latency_ms, phase),
            Err(e) if e.is_timeout() => RequestResult::timed_out(latency_ms, phase),
            Err(e) => RequestResult::failed(latency_ms, phase, short_error(&e)),
        }
    }
}

fn from_response(response: TransportResponse, latency_ms: f64, phase: Option<Phase>) -> RequestResult {
    RequestResult::success(latency_ms, phase).with_usage(
        response.tokens_out.unwrap_or(0),
        response.cost.unwrap_or(0.0),
    )
}

fn short_error(e: &ResilienceError) -> String {
    let mut text = e.to_string();
    if text.len() > 200 {
        let mut end = 200;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}

fn record(result: &RequestResult) {
    let phase = result.phase.map_or("NONE", |p| p.as_str());
    let outcome = if result.success {
        "success"
    } else if result.timeout {
        "timeout"
    } else {
        "error"
    };

    trace!(phase, outcome, latency_ms = result.latency_ms, "Request finished");
    REQUESTS_TOTAL.with_label_values(&[phase, outcome]).inc();
    REQUEST_LATENCY
        .with_label_values(&[phase])
        .observe(result.latency_ms / 1000.0);
}
