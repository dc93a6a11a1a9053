//! # Event Envelope
//!
//! The immutable fact handed to the manager for fan-out. Events are
//! constructed by the caller (or internally for synthetic test deliveries)
//! and never mutated after creation; the serialized envelope is the HTTP
//! body sent to each webhook target.

use crate::{EventId, Timestamp};
use serde::{Deserialize, Serialize};

/// Event type used for operator-triggered synthetic deliveries.
pub const TEST_EVENT_TYPE: &str = "webhook.test";

/// Default schema version stamped on new events.
const DEFAULT_VERSION: &str = "1.0";

/// An event to be delivered to subscribed webhooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Unique per emission.
    pub id: EventId,

    /// Event type name used for subscription matching.
    #[serde(rename = "type")]
    pub event_type: String,

    /// Arbitrary structured payload.
    pub data: serde_json::Value,

    /// When the event occurred.
    pub timestamp: Timestamp,

    /// Identifier of the producing component.
    pub source: String,

    /// Schema version of the payload.
    pub version: String,
}

impl WebhookEvent {
    /// Create a new event with a fresh ID and the current timestamp.
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: EventId::new(),
            event_type: event_type.into(),
            data,
            timestamp: Timestamp::now(),
            source: "hook-relay".to_string(),
            version: DEFAULT_VERSION.to_string(),
        }
    }

    /// Override the source identifier.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Override the schema version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Synthetic event used by the manual webhook test path.
    ///
    /// Bypasses subscription matching entirely, so its type never needs to
    /// appear in any webhook's `events` list.
    pub fn test_event() -> Self {
        Self::new(
            TEST_EVENT_TYPE,
            serde_json::json!({ "message": "Test delivery" }),
        )
        .with_source("hook-relay.test")
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
