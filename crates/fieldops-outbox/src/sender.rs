//! Network submitter: one delivery attempt per event against the sync endpoint.

use crate::{OutboxError, OutboxResult};
use async_trait::async_trait;
use base64::Engine;
use chrono::SecondsFormat;
use fieldops_database::OutboxEvent;
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// Base64 encoding engine for the opaque payload.
const BASE64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// Path of the worker event sync endpoint, relative to the base URL.
pub const WORKER_EVENTS_PATH: &str = "/api/v1/worker-events";

/// Longest response body excerpt kept in error messages.
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Classified failure of a single delivery attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// 401/403 or no token. Halts the pass without consuming retry budget.
    #[error("Authentication rejected: {message}")]
    Auth { message: String },

    /// Timeout, connectivity, 5xx or 429. Retried per the retry policy.
    #[error("Transient delivery failure: {message}")]
    Transient {
        message: String,
        rate_limited: bool,
        retry_after: Option<Duration>,
    },

    /// 404 or payload rejected. Dead-lettered immediately.
    #[error("Permanent rejection (HTTP {status}): {message}")]
    Permanent { status: u16, message: String },
}

impl SubmitError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            rate_limited: false,
            retry_after: None,
        }
    }

    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self::Transient {
            message: "HTTP 429 Too Many Requests".to_string(),
            rate_limited: true,
            retry_after,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

/// One delivery attempt per call. Implementations must bound the call's
/// duration; the queue holds its single-flight claim while awaiting it.
#[async_trait]
pub trait EventSubmitter: Send + Sync {
    async fn submit(&self, event: &OutboxEvent) -> Result<(), SubmitError>;
}

/// Sender configuration.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Base URL of the backend API.
    pub base_url: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.fieldops.example".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Request body for the sync endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkerEventRequest<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    event_type: &'static str,
    worker_id: &'a str,
    building_id: &'a str,
    timestamp: String,
    payload: String,
    retry_count: u32,
}

impl<'a> WorkerEventRequest<'a> {
    fn from_event(event: &'a OutboxEvent) -> Self {
        Self {
            id: &event.id,
            event_type: event.kind.as_str(),
            worker_id: &event.worker_id,
            building_id: &event.building_id,
            timestamp: event.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            payload: BASE64.encode(&event.payload),
            retry_count: event.retry_count,
        }
    }
}

/// HTTP submitter for the worker event sync endpoint.
pub struct HttpSubmitter {
    client: Client,
    endpoint: String,
    auth_token: RwLock<Option<String>>,
}

impl HttpSubmitter {
    /// Create a new submitter. No requests are made until a token is set.
    pub fn new(config: SenderConfig) -> OutboxResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(OutboxError::Http)?;

        let endpoint = format!(
            "{}{}",
            config.base_url.trim_end_matches('/'),
            WORKER_EVENTS_PATH
        );

        Ok(Self {
            client,
            endpoint,
            auth_token: RwLock::new(None),
        })
    }

    /// Full URL events are posted to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Set the bearer token used for every request.
    pub async fn set_auth_token(&self, token: &str) {
        *self.auth_token.write().await = Some(token.to_string());
    }

    /// Forget the bearer token (logout). Flushes halt with an auth error.
    pub async fn clear_auth_token(&self) {
        *self.auth_token.write().await = None;
    }
}

#[async_trait]
impl EventSubmitter for HttpSubmitter {
    async fn submit(&self, event: &OutboxEvent) -> Result<(), SubmitError> {
        let Some(token) = self.auth_token.read().await.clone() else {
            return Err(SubmitError::Auth {
                message: "no auth token configured".to_string(),
            });
        };

        let body = WorkerEventRequest::from_event(event);

        debug!(
            url = %self.endpoint,
            event_id = %event.id,
            kind = event.kind.as_str(),
            retry_count = event.retry_count,
            "Submitting worker event"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        classify_response(status, retry_after, &body)
    }
}

/// Map an HTTP status to a delivery outcome.
pub fn classify_response(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> Result<(), SubmitError> {
    let message = format!("HTTP {}: {}", status.as_u16(), truncate(body));

    match status {
        s if s.is_success() => Ok(()),
        // The backend already holds this event id.
        StatusCode::CONFLICT => Ok(()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SubmitError::Auth { message }),
        StatusCode::TOO_MANY_REQUESTS => Err(SubmitError::rate_limited(retry_after)),
        StatusCode::REQUEST_TIMEOUT => Err(SubmitError::transient(message)),
        s if s.is_server_error() => Err(SubmitError::transient(message)),
        s if s.is_client_error() => Err(SubmitError::Permanent {
            status: s.as_u16(),
            message,
        }),
        // 1xx/3xx should never reach us after redirects are followed.
        _ => Err(SubmitError::transient(message)),
    }
}

fn classify_transport_error(err: &reqwest::Error) -> SubmitError {
    if err.is_timeout() {
        SubmitError::transient(format!("request timed out: {}", err))
    } else if err.is_connect() {
        SubmitError::transient(format!("connection failed: {}", err))
    } else {
        SubmitError::transient(err.to_string())
    }
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn truncate(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY_CHARS).collect()
}
