//! # Observability Signals
//!
//! Explicit message passing for delivery, scheduling and lifecycle
//! notifications: a bounded broadcast channel instead of a global listener
//! bus, so delivery, scheduling and metrics stay decoupled. Signals are
//! fire-and-forget: a lagging or absent subscriber never blocks or fails
//! the component emitting.

use crate::delivery::DeliveryResult;
use crate::{EventId, Timestamp, WebhookId};
use std::time::Duration;
use tokio::sync::broadcast;

/// Notifications emitted by the manager and the retry scheduler.
#[derive(Debug, Clone)]
pub enum RelaySignal {
    /// A webhook was registered.
    WebhookRegistered { webhook_id: WebhookId },

    /// A webhook's definition was updated.
    WebhookUpdated { webhook_id: WebhookId },

    /// A webhook was deleted.
    WebhookDeleted { webhook_id: WebhookId },

    /// An event was accepted and fanned out to matching webhooks.
    EventDispatched {
        event_id: EventId,
        event_type: String,
        matched: usize,
    },

    /// A single delivery attempt completed (success or failure).
    Delivery(DeliveryResult),

    /// A failed delivery was queued for retry.
    RetryScheduled {
        webhook_id: WebhookId,
        event_id: EventId,
        /// Attempt number that failed.
        attempt: u32,
        delay: Duration,
        next_retry_at: Timestamp,
    },

    /// A scheduled retry became eligible to run.
    RetryDue {
        webhook_id: WebhookId,
        event_id: EventId,
        /// Attempt number that previously failed; the re-delivery runs as
        /// `attempt + 1`.
        attempt: u32,
    },

    /// Retries for a (webhook, event) pair are exhausted: the dead-letter
    /// boundary. No further automatic action is taken.
    DeliveryFailed {
        webhook_id: WebhookId,
        event_id: EventId,
        attempts: u32,
        last_error: Option<String>,
    },
}

impl RelaySignal {
    /// Stable name of the signal kind, for logging and test assertions.
    pub fn name(&self) -> &'static str {
        match self {
            Self::WebhookRegistered { .. } => "webhook_registered",
            Self::WebhookUpdated { .. } => "webhook_updated",
            Self::WebhookDeleted { .. } => "webhook_deleted",
            Self::EventDispatched { .. } => "event_dispatched",
            Self::Delivery(_) => "delivery",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::RetryDue { .. } => "retry_due",
            Self::DeliveryFailed { .. } => "delivery_failed",
        }
    }
}

/// Bounded broadcast bus signals are published on.
#[derive(Debug, Clone)]
pub struct SignalBus {
    sender: broadcast::Sender<RelaySignal>,
}

impl SignalBus {
    /// Create a bus retaining up to `capacity` undelivered signals per
    /// subscriber before the slowest subscriber starts losing the oldest.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Get a receiver for all signals emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<RelaySignal> {
        self.sender.subscribe()
    }

    /// Publish a signal to all subscribers. Fire-and-forget.
    pub fn emit(&self, signal: RelaySignal) {
        tracing::trace!(signal = signal.name(), "emitting relay signal");
        // Err means no subscriber is listening, which is fine.
        let _ = self.sender.send(signal);
    }
}

#[cfg(test)]
#[path = "signal_tests.rs"]
mod tests;
