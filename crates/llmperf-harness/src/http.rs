//! HTTP transport backed by reqwest.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use llmperf_core::{CoreError, CoreResult, Transport, TransportError, TransportResponse};
use serde_json::Value;

const MAX_ERROR_BODY: usize = 512;

/// POSTs each payload to a fixed URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    /// Build a transport; `timeout` is a hard ceiling enforced by reqwest.
    pub fn new(url: impl Into<String>, timeout: Duration) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        payload: &str,
        headers: &HashMap<String, String>,
    ) -> Result<TransportResponse, TransportError> {
        let mut request = self.client.post(&self.url).body(payload.to_string());
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let text = response.text().await.map_err(map_reqwest_error)?;

        if !status.is_success() {
            return Err(TransportError::status(status.as_u16(), truncate(&text)));
        }

        let (tokens_out, cost) = extract_usage(&text);
        Ok(TransportResponse::ok(text).with_usage(tokens_out, cost))
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else if let Some(status) = e.status() {
        TransportError::status(status.as_u16(), e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

/// Best-effort token/cost extraction from a JSON response body.
pub fn extract_usage(body: &str) -> (Option<u64>, Option<f64>) {
    let Ok(json) = serde_json::from_str::<Value>(body) else {
        return (None, None);
    };

    let tokens = ["/usage/completion_tokens", "/usage/output_tokens", "/tokens_out"]
        .iter()
        .find_map(|p| json.pointer(p).and_then(Value::as_u64));
    let cost = ["/cost", "/usage/cost"]
        .iter()
        .find_map(|p| json.pointer(p).and_then(Value::as_f64));

    (tokens, cost)
}
