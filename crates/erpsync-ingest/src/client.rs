//! Remote API client
//!
//! Every ERP call is an HTTP POST of a JSON envelope
//! `{"call": method, "app_key": .., "app_secret": .., "param": [params]}` to
//! `base_url/endpoint`. The client paces requests with a fixed delay, retries rate-limit
//! and gateway statuses with exponential backoff, and honors the "blocked, retry in N
//! seconds" response exactly once.

use crate::config::ApiConfig;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Request parameters for one call.
pub type Payload = Map<String, Value>;

/// Decoded top-level response object.
pub type Response = Map<String, Value>;

/// Statuses retried with backoff. 500 is deliberately absent: the ERP answers
/// semantic faults with 500 and retrying them only burns quota.
pub const RETRYABLE_STATUSES: [u16; 4] = [429, 502, 503, 504];

/// Marker text of the temporary-block response.
const BLOCKED_MARKER: &str = "API bloqueada por consumo indevido";

const ERROR_BODY_PREVIEW: usize = 500;

const USER_AGENT: &str = concat!("erpsync/", env!("CARGO_PKG_VERSION"));

#[allow(clippy::expect_used)]
static RETRY_AFTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Tente novamente em (\d+) segundos").expect("retry-after pattern compiles")
});

/// Errors raised by the remote API client
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("API temporarily blocked, server asked to wait {wait_secs}s")]
    Blocked { wait_secs: u64 },

    #[error("Unexpected response body: {0}")]
    Decode(String),

    #[error("Client already closed")]
    Closed,
}

impl From<ApiError> for erpsync_common::SyncError {
    fn from(err: ApiError) -> Self {
        erpsync_common::SyncError::Network(err.to_string())
    }
}

/// Transport used by collectors. Implemented by [`OmieClient`] and by test fakes.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// POST one call and return the decoded response object.
    async fn request(
        &self,
        endpoint: &str,
        method: &str,
        params: &Payload,
    ) -> Result<Response, ApiError>;

    /// Release the transport. Safe to call more than once.
    async fn close(&self) {}
}

/// HTTP client for the ERP API
pub struct OmieClient {
    http: reqwest::Client,
    config: ApiConfig,
    closed: AtomicBool,
}

impl OmieClient {
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            http,
            config,
            closed: AtomicBool::new(false),
        })
    }

    pub fn url_for(&self, endpoint: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        let endpoint = endpoint.trim_start_matches('/');
        format!("{base}/{endpoint}")
    }

    fn envelope(&self, method: &str, params: &Payload) -> Value {
        json!({
            "call": method,
            "app_key": self.config.app_key,
            "app_secret": self.config.app_secret,
            "param": [params],
        })
    }

    fn pre_request_delay(&self, endpoint: &str) -> Duration {
        if endpoint.contains("extrato") {
            self.config.slow_request_delay
        } else {
            self.config.request_delay
        }
    }

    fn timeout_for(&self, endpoint: &str) -> Duration {
        if endpoint.contains("pedidocompra") {
            self.config.slow_timeout
        } else {
            self.config.timeout
        }
    }

    /// Delay before retry `attempt` (1-based).
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.config.retry_delay.saturating_mul(factor)
    }
}

#[async_trait]
impl ApiClient for OmieClient {
    async fn request(
        &self,
        endpoint: &str,
        method: &str,
        params: &Payload,
    ) -> Result<Response, ApiError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ApiError::Closed);
        }

        tokio::time::sleep(self.pre_request_delay(endpoint)).await;

        let url = self.url_for(endpoint);
        let body = self.envelope(method, params);
        let timeout = self.timeout_for(endpoint);
        let started = Instant::now();

        let mut retries = 0u32;
        let mut block_honored = false;

        loop {
            let sent = self
                .http
                .post(&url)
                .timeout(timeout)
                .json(&body)
                .send()
                .await;

            let response = match sent {
                Ok(response) => response,
                Err(e) if retries < self.config.max_retries => {
                    retries += 1;
                    let delay = self.backoff(retries);
                    warn!(
                        endpoint,
                        method,
                        attempt = retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                },
                Err(e) => {
                    error!(endpoint, method, error = %e, "Request failed");
                    return Err(ApiError::Http(e));
                },
            };

            let status = response.status();
            let text = response.text().await?;

            if status.is_success() {
                debug!(
                    endpoint,
                    method,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Request completed"
                );
                return decode_response(&text);
            }

            if let Some(wait_secs) = blocked_wait_secs(&text) {
                if block_honored {
                    error!(endpoint, method, wait_secs, "API still blocked after waiting");
                    return Err(ApiError::Blocked { wait_secs });
                }
                block_honored = true;
                let wait = Duration::from_secs(wait_secs) + self.config.block_margin;
                warn!(
                    endpoint,
                    method,
                    wait_secs = wait.as_secs(),
                    "API blocked for excessive use, waiting before a single retry"
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            let code = status.as_u16();
            if RETRYABLE_STATUSES.contains(&code) && retries < self.config.max_retries {
                retries += 1;
                let delay = self.backoff(retries);
                warn!(
                    endpoint,
                    method,
                    status = code,
                    attempt = retries,
                    delay_ms = delay.as_millis() as u64,
                    "Retryable status, backing off"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            let message = error_message(&text);
            error!(endpoint, method, status = code, message = %message, "API error");
            return Err(ApiError::Status {
                status: code,
                message,
            });
        }
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("API client closed");
        }
    }
}

fn decode_response(text: &str) -> Result<Response, ApiError> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ApiError::Decode(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(ApiError::Decode(e.to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Server-specified wait of a temporary-block response body.
pub fn blocked_wait_secs(body: &str) -> Option<u64> {
    if !body.contains(BLOCKED_MARKER) {
        return None;
    }
    RETRY_AFTER
        .captures(body)
        .and_then(|caps| caps[1].parse().ok())
}

/// Best available message of an error body: `faultstring`, then `message`, then a
/// truncated preview of the raw text.
pub fn error_message(body: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        for field in ["faultstring", "message"] {
            if let Some(text) = map.get(field).and_then(Value::as_str) {
                return text.to_string();
            }
        }
    }
    body.chars().take(ERROR_BODY_PREVIEW).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn client() -> OmieClient {
        OmieClient::new(ApiConfig {
            app_key: "k".to_string(),
            app_secret: "s".to_string(),
            base_url: "https://erp.example/api/v1/".to_string(),
            retry_delay: Duration::from_secs(5),
            ..ApiConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_url_and_envelope() {
        let client = client();
        assert_eq!(
            client.url_for("geral/clientes/"),
            "https://erp.example/api/v1/geral/clientes/"
        );

        let mut params = Payload::new();
        params.insert("pagina".to_string(), json!(2));
        let body = client.envelope("ListarClientes", &params);
        assert_eq!(body["call"], "ListarClientes");
        assert_eq!(body["app_key"], "k");
        assert_eq!(body["param"], json!([{"pagina": 2}]));
    }

    #[test]
    fn test_endpoint_specific_pacing() {
        let client = client();
        assert_eq!(
            client.timeout_for("produtos/pedidocompra/"),
            Duration::from_secs(120)
        );
        assert_eq!(client.timeout_for("geral/clientes/"), Duration::from_secs(30));
        assert_eq!(
            client.pre_request_delay("financas/extrato/"),
            Duration::from_millis(1000)
        );
        assert_eq!(
            client.pre_request_delay("geral/clientes/"),
            Duration::from_millis(300)
        );
    }

    #[test]
    fn test_backoff_doubles() {
        let client = client();
        assert_eq!(client.backoff(1), Duration::from_secs(5));
        assert_eq!(client.backoff(2), Duration::from_secs(10));
        assert_eq!(client.backoff(4), Duration::from_secs(40));
    }

    #[test]
    fn test_blocked_wait_parsing() {
        let body = r#"{"faultstring":"API bloqueada por consumo indevido. Tente novamente em 42 segundos."}"#;
        assert_eq!(blocked_wait_secs(body), Some(42));
        assert_eq!(blocked_wait_secs("Tente novamente em 42 segundos"), None);
        assert_eq!(blocked_wait_secs("API bloqueada por consumo indevido"), None);
    }

    #[test]
    fn test_error_message_preference() {
        assert_eq!(
            error_message(r#"{"faultstring":"Tag inválida","message":"x"}"#),
            "Tag inválida"
        );
        assert_eq!(error_message(r#"{"message":"Not found"}"#), "Not found");
        let long = "x".repeat(800);
        assert_eq!(error_message(&long).len(), 500);
    }

    #[test]
    fn test_decode_rejects_non_objects() {
        assert!(decode_response("[1,2]").is_err());
        assert!(decode_response("not json").is_err());
        assert_eq!(decode_response(r#"{"a":1}"#).unwrap()["a"], json!(1));
    }
}
