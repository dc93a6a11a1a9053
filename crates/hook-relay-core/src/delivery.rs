//! # Delivery Execution
//!
//! A single HTTP delivery attempt against one webhook for one event. The
//! executor measures duration, classifies the outcome and reports a
//! structured [`DeliveryResult`]; it holds no retry knowledge: retry
//! decisions belong entirely to the manager and scheduler.
//!
//! The trait seam exists so tests can substitute scripted executors for the
//! real HTTP client.

use crate::event::WebhookEvent;
use crate::registry::Webhook;
use crate::signature::{compute_signature, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::{EventId, RelayError, RelayResult, Timestamp, WebhookId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Header carrying the event type of the delivered payload.
pub const EVENT_TYPE_HEADER: &str = "X-Relay-Event";

/// Header carrying the event id, for receiver-side idempotency.
pub const DELIVERY_ID_HEADER: &str = "X-Relay-Delivery";

/// Metadata key the HTTP executor recognizes as a signing secret.
const SECRET_METADATA_KEY: &str = "secret";

// ============================================================================
// Result Type
// ============================================================================

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub webhook_id: WebhookId,
    pub event_id: EventId,
    pub success: bool,

    /// 1-based attempt number, stamped by the caller via the executor.
    pub attempt: u32,

    /// Wall time the attempt took.
    pub duration: Duration,

    pub completed_at: Timestamp,

    /// HTTP status of the response, when one was received.
    pub status: Option<u16>,

    /// Failure detail, when the attempt failed.
    pub error: Option<String>,
}

impl DeliveryResult {
    /// Build a successful result.
    pub fn succeeded(
        webhook_id: WebhookId,
        event_id: EventId,
        attempt: u32,
        duration: Duration,
        status: Option<u16>,
    ) -> Self {
        Self {
            webhook_id,
            event_id,
            success: true,
            attempt,
            duration,
            completed_at: Timestamp::now(),
            status,
            error: None,
        }
    }

    /// Build a failed result.
    pub fn failed(
        webhook_id: WebhookId,
        event_id: EventId,
        attempt: u32,
        duration: Duration,
        status: Option<u16>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            webhook_id,
            event_id,
            success: false,
            attempt,
            duration,
            completed_at: Timestamp::now(),
            status,
            error: Some(error.into()),
        }
    }
}

// ============================================================================
// Executor Trait
// ============================================================================

/// Performs one delivery attempt and reports a structured result.
///
/// Implementations never retry and never panic on endpoint misbehavior -
/// every outcome is folded into the returned [`DeliveryResult`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryExecutor: Send + Sync {
    async fn deliver(&self, webhook: &Webhook, event: &WebhookEvent, attempt: u32)
        -> DeliveryResult;
}

// ============================================================================
// HTTP Executor
// ============================================================================

/// Delivers events as JSON POST requests via a shared HTTP client.
///
/// When the webhook's metadata carries a string `"secret"`, the payload is
/// signed (see [`crate::signature`]) and signature headers accompany the
/// request.
#[derive(Debug, Clone)]
pub struct HttpDeliveryExecutor {
    client: reqwest::Client,
}

impl HttpDeliveryExecutor {
    /// Build an executor with the given per-request timeout.
    pub fn new(timeout: Duration) -> RelayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("hook-relay/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| RelayError::Internal {
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DeliveryExecutor for HttpDeliveryExecutor {
    async fn deliver(
        &self,
        webhook: &Webhook,
        event: &WebhookEvent,
        attempt: u32,
    ) -> DeliveryResult {
        let started = Instant::now();

        let body = match serde_json::to_vec(event) {
            Ok(body) => body,
            Err(e) => {
                return DeliveryResult::failed(
                    webhook.id,
                    event.id,
                    attempt,
                    started.elapsed(),
                    None,
                    format!("failed to serialize event: {}", e),
                );
            }
        };

        let mut request = self
            .client
            .post(&webhook.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(EVENT_TYPE_HEADER, event.event_type.as_str())
            .header(DELIVERY_ID_HEADER, event.id.as_str());

        if let Some(secret) = webhook_secret(webhook) {
            let timestamp = Timestamp::now().unix_seconds().to_string();
            let signature = compute_signature(secret.as_bytes(), &timestamp, &body);
            request = request
                .header(SIGNATURE_HEADER, signature)
                .header(TIMESTAMP_HEADER, timestamp);
        }

        let response = request.body(body).send().await;
        let duration = started.elapsed();

        match response {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    tracing::debug!(
                        webhook_id = %webhook.id,
                        event_id = %event.id,
                        status = status.as_u16(),
                        attempt,
                        duration_ms = duration.as_millis() as u64,
                        "Delivery succeeded"
                    );
                    DeliveryResult::succeeded(
                        webhook.id,
                        event.id,
                        attempt,
                        duration,
                        Some(status.as_u16()),
                    )
                } else {
                    tracing::warn!(
                        webhook_id = %webhook.id,
                        event_id = %event.id,
                        status = status.as_u16(),
                        attempt,
                        "Endpoint rejected delivery"
                    );
                    DeliveryResult::failed(
                        webhook.id,
                        event.id,
                        attempt,
                        duration,
                        Some(status.as_u16()),
                        format!("endpoint returned HTTP {}", status.as_u16()),
                    )
                }
            }
            Err(err) => {
                let error = if err.is_timeout() {
                    format!("delivery timed out after {} ms", duration.as_millis())
                } else if err.is_connect() {
                    format!("connection failed: {}", err)
                } else {
                    format!("transport error: {}", err)
                };
                tracing::warn!(
                    webhook_id = %webhook.id,
                    event_id = %event.id,
                    attempt,
                    error = %error,
                    "Delivery failed"
                );
                DeliveryResult::failed(webhook.id, event.id, attempt, duration, None, error)
            }
        }
    }
}

/// Executor-side interpretation of the opaque webhook metadata.
fn webhook_secret(webhook: &Webhook) -> Option<&str> {
    webhook
        .metadata
        .get(SECRET_METADATA_KEY)
        .and_then(serde_json::Value::as_str)
}

#[cfg(test)]
#[path = "delivery_tests.rs"]
mod tests;
