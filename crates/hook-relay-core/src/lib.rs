//! # Hook-Relay Core
//!
//! In-process webhook fan-out engine: accepts internally generated events,
//! resolves the webhooks subscribed to each event type, delivers the event to
//! every matching endpoint over HTTP, and retries failed deliveries with
//! capped exponential backoff.
//!
//! ## Guarantees
//!
//! - At-least-once delivery up to the configured retry budget
//! - Bounded concurrency (deliveries are drained in fixed-size batches)
//! - Per-(webhook, event) failure isolation: one failing endpoint never
//!   affects delivery to another
//! - Strictly sequential retries for a given (webhook, event) pair
//!
//! ## Non-Guarantees
//!
//! - Exactly-once delivery
//! - Ordering across different webhooks or event types
//! - Durability of queued work across process restarts
//!
//! ## Usage
//!
//! ```rust,no_run
//! use hook_relay_core::{RelayConfig, WebhookEvent, WebhookManager, WebhookSpec};
//!
//! # async fn run() -> Result<(), hook_relay_core::RelayError> {
//! let manager = WebhookManager::new(RelayConfig::default())?;
//!
//! let id = manager
//!     .register_webhook(WebhookSpec::new("https://example.com/hooks", ["order.created"]))
//!     .await?;
//!
//! manager
//!     .emit_event(WebhookEvent::new(
//!         "order.created",
//!         serde_json::json!({ "amount": 42 }),
//!     ))
//!     .await;
//! # let _ = id;
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// Re-export commonly used types
pub use ulid::Ulid;
pub use uuid::Uuid;

/// Standard result type for hook-relay operations
pub type RelayResult<T> = Result<T, RelayError>;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// Unique identifier for a registered webhook
///
/// Generated on registration and immutable for the lifetime of the webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WebhookId(Uuid);

impl WebhookId {
    /// Generate a new unique webhook ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get string representation of the webhook ID
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for WebhookId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WebhookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WebhookId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = s.parse::<Uuid>().map_err(|_| ParseError::InvalidFormat {
            expected: "UUID format".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(uuid))
    }
}

/// Unique identifier for an emitted event
///
/// Uses ULID for lexicographic sorting and global uniqueness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Ulid);

impl EventId {
    /// Generate a new unique event ID
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Get string representation of the event ID
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid = s.parse::<Ulid>().map_err(|_| ParseError::InvalidFormat {
            expected: "ULID format".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(ulid))
    }
}

// ============================================================================
// Time Types
// ============================================================================

/// UTC timestamp with microsecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for the current moment
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Parse timestamp from an RFC3339 string
    pub fn from_rfc3339(s: &str) -> Result<Self, ParseError> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|_| ParseError::InvalidFormat {
                expected: "RFC3339 datetime".to_string(),
                actual: s.to_string(),
            })?
            .with_timezone(&Utc);
        Ok(Self(dt))
    }

    /// Convert to an RFC3339 string
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// Get the underlying DateTime
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Add a duration to the timestamp
    pub fn add_duration(&self, duration: Duration) -> Self {
        let chrono_duration = chrono::Duration::from_std(duration).unwrap_or_default();
        Self(self.0 + chrono_duration)
    }

    /// Get the duration elapsed since another timestamp
    ///
    /// Returns zero if `other` is in the future relative to `self`.
    pub fn duration_since(&self, other: Self) -> Duration {
        let chrono_duration = self.0.signed_duration_since(other.0);
        chrono_duration.to_std().unwrap_or_default()
    }

    /// Unix timestamp in whole seconds
    pub fn unix_seconds(&self) -> i64 {
        self.0.timestamp()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Error type for string parsing failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid format: expected {expected}, got '{actual}'")]
    InvalidFormat { expected: String, actual: String },
}

/// Top-level error type for hook-relay operations
///
/// Only synchronously detectable problems surface here. Delivery-time
/// failures are reported through the signal bus and metrics, never as an
/// `Err` to the caller of `emit_event` (which has already returned by the
/// time the delivery runs).
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Webhook registration or update input failed validation.
    ///
    /// Never retried; `reasons` lists every problem found.
    #[error("Invalid webhook spec: {reasons:?}")]
    InvalidWebhookSpec { reasons: Vec<String> },

    /// The referenced webhook does not exist.
    #[error("Webhook not found: {webhook_id}")]
    NotFound { webhook_id: WebhookId },

    /// The subsystem is disabled or shut down.
    #[error("Webhook delivery is disabled")]
    Disabled,

    /// Unexpected internal failure (e.g. HTTP client construction).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl RelayError {
    /// Check whether this error denotes a missing webhook
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check whether this error denotes rejected input
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidWebhookSpec { .. })
    }
}

// ============================================================================
// Module declarations
// ============================================================================

/// Event envelope accepted by the manager
pub mod event;

/// Pure filter predicate evaluation
pub mod filter;

/// Webhook store and derived subscription index
pub mod registry;

/// Backoff policy and time-ordered retry queue
pub mod retry;

/// Single-attempt HTTP delivery
pub mod delivery;

/// Outbound payload signing
pub mod signature;

/// Observability signal bus
pub mod signal;

/// Delivery metrics accumulation
pub mod metrics;

/// Orchestrating facade
pub mod manager;

// Re-export key types for convenience
pub use delivery::{DeliveryExecutor, DeliveryResult, HttpDeliveryExecutor};
pub use event::WebhookEvent;
pub use filter::{matches_all, EventFilter, FilterOp};
pub use manager::{DeadLetter, RelayConfig, WebhookManager};
pub use metrics::{RelayMetrics, WebhookStats};
pub use registry::{Subscription, Webhook, WebhookRegistry, WebhookSpec, WebhookUpdate};
pub use retry::{RetryPolicy, RetryScheduler, ScheduleOutcome, RETRY_DELAY_CAP};
pub use signal::{RelaySignal, SignalBus};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
