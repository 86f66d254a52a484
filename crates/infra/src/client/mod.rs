//! Retrying, token-injecting HTTP client for the ITSM service.
//!
//! One [`ItsmClient`] talks to one endpoint. Every call:
//! - carries `authorization: Bearer <token>` from a [`TokenSource`]
//! - optionally carries the tenant header `grpc-metadata-space`
//! - is retried on transport errors and non-200 replies with bounded
//!   exponential backoff ([`RetryPolicy`])
//! - stops at once when the caller's [`CancellationToken`] fires

pub mod retry;
pub mod token;

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, Response, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use retry::RetryPolicy;
pub use token::{StaticTokenSource, TokenError, TokenSource};

/// Header scoping a request to one channel.
pub const TENANT_HEADER: &str = "grpc-metadata-space";

/// Bytes read from a failed reply before retrying.
const RESPONSE_READ_LIMIT: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("could not obtain auth token: {0}")]
    Token(#[from] TokenError),

    #[error("could not build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    #[error("request cancelled")]
    Cancelled,

    #[error("{method} {url} giving up after {attempts} attempt(s): {reason}")]
    GaveUp {
        method: Method,
        url: String,
        attempts: u32,
        reason: String,
    },
}

#[derive(Clone)]
pub struct ItsmClient {
    http: reqwest::Client,
    url: String,
    policy: RetryPolicy,
    token: Arc<dyn TokenSource>,
}

impl std::fmt::Debug for ItsmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItsmClient")
            .field("url", &self.url)
            .field("policy", &self.policy)
            .finish()
    }
}

impl ItsmClient {
    pub fn new(
        url: impl Into<String>,
        policy: RetryPolicy,
        request_timeout: Duration,
        token: Arc<dyn TokenSource>,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(ClientError::Build)?;
        Ok(Self {
            http,
            url: url.into(),
            policy,
            token,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Plain GET of the endpoint. An empty `channel_id` sends no tenant header.
    pub async fn get(
        &self,
        cancel: &CancellationToken,
        channel_id: &str,
    ) -> Result<Response, ClientError> {
        self.execute(cancel, Method::GET, channel_id, None).await
    }

    /// Query the endpoint: the ITSM asset API takes selectors as an OPTIONS
    /// request with a JSON body.
    pub async fn query(
        &self,
        cancel: &CancellationToken,
        channel_id: &str,
        body: &serde_json::Value,
    ) -> Result<Response, ClientError> {
        self.execute(cancel, Method::OPTIONS, channel_id, Some(body))
            .await
    }

    /// Connections are pooled inside `reqwest` and released when the last
    /// clone is dropped; kept so downloaders can expose a uniform close.
    pub fn close(&self) {
        debug!(url = %self.url, "itsm client closed");
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        method: Method,
        channel_id: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response, ClientError> {
        let mut attempts: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(ClientError::Cancelled);
            }

            let token = self.token.token().await?;
            let mut request = self
                .http
                .request(method.clone(), &self.url)
                .bearer_auth(token);
            if !channel_id.is_empty() {
                request = request.header(TENANT_HEADER, channel_id);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                outcome = request.send() => outcome,
            };
            attempts += 1;

            let reason = match outcome {
                Ok(response) if response.status() == StatusCode::OK => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let body = drain(response).await;
                    format!("unexpected status {status}: {body}")
                }
                Err(e) => e.to_string(),
            };

            if !self.policy.should_retry(attempts) {
                return Err(ClientError::GaveUp {
                    method,
                    url: self.url.clone(),
                    attempts,
                    reason,
                });
            }

            let wait = self.policy.backoff(attempts - 1);
            warn!(
                method = %method,
                url = %self.url,
                channel_id,
                attempt = attempts,
                wait_ms = wait.as_millis() as u64,
                reason = %reason,
                "itsm request failed, retrying"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

/// Read (and discard) a failed reply up to [`RESPONSE_READ_LIMIT`] so the
/// connection can go back to the pool.
async fn drain(mut response: Response) -> String {
    let mut buf = Vec::new();
    while buf.len() < RESPONSE_READ_LIMIT {
        match response.chunk().await {
            Ok(Some(chunk)) => buf.extend_from_slice(&chunk),
            _ => break,
        }
    }
    buf.truncate(RESPONSE_READ_LIMIT);
    String::from_utf8_lossy(&buf).into_owned()
}
