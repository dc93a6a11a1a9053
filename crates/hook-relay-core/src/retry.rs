//! # Retry Scheduling
//!
//! Capped exponential backoff for failed deliveries. Split in two layers:
//! [`RetryPolicy`] is the pure delay calculation (unit testable without any
//! clock), and [`RetryScheduler`] owns the time-ordered queue of pending
//! retries plus the background tick that promotes due entries.
//!
//! The scheduler knows nothing about delivery. A due entry is announced on a
//! bounded channel and the manager performs the actual re-delivery; on a
//! further failure the manager calls [`RetryScheduler::schedule_retry`]
//! again, which is why retries for one (webhook, event) pair are strictly
//! sequential.

use crate::event::WebhookEvent;
use crate::registry::WebhookRegistry;
use crate::signal::{RelaySignal, SignalBus};
use crate::{EventId, Timestamp, WebhookId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Hard ceiling on the delay between two attempts, regardless of policy.
pub const RETRY_DELAY_CAP: Duration = Duration::from_secs(300);

/// Capacity of the channel carrying due-retry announcements to the manager.
const DUE_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// Backoff Policy
// ============================================================================

/// Deterministic capped exponential backoff.
///
/// # Examples
///
/// ```rust
/// use hook_relay_core::retry::{RetryPolicy, RETRY_DELAY_CAP};
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(Duration::from_millis(1000), 3);
///
/// assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
/// assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(16000));
/// assert_eq!(policy.delay_for_attempt(20), RETRY_DELAY_CAP);
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Total delivery attempts allowed per (webhook, event) pair.
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_retries,
        }
    }

    /// Delay before the attempt following `attempt` (1-based):
    /// `min(base_delay * 2^(attempt-1), RETRY_DELAY_CAP)`.
    ///
    /// Pure function of `attempt`; overflow-safe for arbitrarily large
    /// attempt numbers.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let factor = 1u64
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u64::MAX);
        let delay_ms = base_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms).min(RETRY_DELAY_CAP)
    }

    /// Whether another attempt fits the retry budget after `attempt` failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_retries: 3,
        }
    }
}

// ============================================================================
// Scheduler Types
// ============================================================================

/// Key of a pending retry: at most one record exists per pair at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RetryKey {
    pub webhook_id: WebhookId,
    pub event_id: EventId,
}

/// A pending retry, holding the event so the promoted attempt can be
/// re-delivered without a separate event store.
#[derive(Debug, Clone)]
struct RetryEntry {
    webhook_id: WebhookId,
    event: WebhookEvent,
    /// Attempt number that failed.
    attempt: u32,
    #[allow(dead_code)]
    scheduled_at: Timestamp,
    due_at: Instant,
}

/// Announcement that a retry became eligible to run.
#[derive(Debug, Clone)]
pub struct RetryDue {
    pub webhook_id: WebhookId,
    pub event: WebhookEvent,
    /// Attempt number that previously failed.
    pub attempt: u32,
}

/// Result of a [`RetryScheduler::schedule_retry`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// A retry record was stored (replacing any prior record for the pair).
    Scheduled {
        delay: Duration,
        next_retry_at: Timestamp,
    },
    /// The retry budget is spent; nothing was scheduled. Terminal.
    Exhausted,
    /// The webhook no longer exists; nothing was scheduled.
    Skipped,
}

// ============================================================================
// Scheduler
// ============================================================================

/// Owner of the pending-retry queue and its promotion tick.
#[derive(Debug)]
pub struct RetryScheduler {
    policy: RetryPolicy,
    pending: Arc<Mutex<HashMap<RetryKey, RetryEntry>>>,
    due_tx: mpsc::Sender<RetryDue>,
    signals: SignalBus,
    registry: Arc<RwLock<WebhookRegistry>>,
    tick_handle: JoinHandle<()>,
}

impl RetryScheduler {
    /// Spawn the scheduler and its tick task.
    ///
    /// The returned receiver carries due-retry announcements; the manager
    /// consumes it and performs the re-deliveries. Must be called from
    /// within a tokio runtime.
    pub fn new(
        policy: RetryPolicy,
        tick_interval: Duration,
        registry: Arc<RwLock<WebhookRegistry>>,
        signals: SignalBus,
    ) -> (Self, mpsc::Receiver<RetryDue>) {
        let (due_tx, due_rx) = mpsc::channel(DUE_CHANNEL_CAPACITY);
        let pending: Arc<Mutex<HashMap<RetryKey, RetryEntry>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let tick_handle = tokio::spawn(tick_loop(
            pending.clone(),
            due_tx.clone(),
            signals.clone(),
            tick_interval,
        ));

        (
            Self {
                policy,
                pending,
                due_tx,
                signals,
                registry,
                tick_handle,
            },
            due_rx,
        )
    }

    /// The policy this scheduler applies.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Queue a retry for a failed attempt.
    ///
    /// Returns [`ScheduleOutcome::Exhausted`] without storing anything when
    /// the budget is spent, and [`ScheduleOutcome::Skipped`] when the
    /// webhook was deleted since the attempt started (checked against the
    /// registry before committing). Scheduling for a pair that already has a
    /// record replaces it.
    pub async fn schedule_retry(
        &self,
        webhook_id: WebhookId,
        event: WebhookEvent,
        attempt: u32,
    ) -> ScheduleOutcome {
        if !self.policy.should_retry(attempt) {
            tracing::warn!(
                webhook_id = %webhook_id,
                event_id = %event.id,
                attempt,
                max_retries = self.policy.max_retries,
                "Retry budget exhausted"
            );
            return ScheduleOutcome::Exhausted;
        }

        if !self.registry.read().await.contains(webhook_id) {
            tracing::debug!(
                webhook_id = %webhook_id,
                event_id = %event.id,
                "Skipping retry for deleted webhook"
            );
            return ScheduleOutcome::Skipped;
        }

        let delay = self.policy.delay_for_attempt(attempt);
        let next_retry_at = Timestamp::now().add_duration(delay);
        let event_id = event.id;
        let key = RetryKey {
            webhook_id,
            event_id,
        };
        let entry = RetryEntry {
            webhook_id,
            event,
            attempt,
            scheduled_at: Timestamp::now(),
            due_at: Instant::now() + delay,
        };

        self.pending.lock().await.insert(key, entry);

        tracing::info!(
            webhook_id = %webhook_id,
            event_id = %event_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Retry scheduled"
        );

        self.signals.emit(RelaySignal::RetryScheduled {
            webhook_id,
            event_id,
            attempt,
            delay,
            next_retry_at,
        });

        ScheduleOutcome::Scheduled {
            delay,
            next_retry_at,
        }
    }

    /// Remove a pending retry, if any. Idempotent.
    pub async fn cancel(&self, webhook_id: WebhookId, event_id: EventId) -> bool {
        let key = RetryKey {
            webhook_id,
            event_id,
        };
        self.pending.lock().await.remove(&key).is_some()
    }

    /// Remove every pending retry for a webhook. Idempotent; returns the
    /// number of records removed.
    pub async fn clear_for_webhook(&self, webhook_id: WebhookId) -> usize {
        let mut guard = self.pending.lock().await;
        let before = guard.len();
        guard.retain(|key, _| key.webhook_id != webhook_id);
        before - guard.len()
    }

    /// Number of retries currently waiting for their due time.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Whether the due channel is still consumed.
    pub fn is_connected(&self) -> bool {
        !self.due_tx.is_closed()
    }

    /// Stop the tick task. Pending records are dropped.
    pub fn shutdown(&self) {
        self.tick_handle.abort();
    }
}

impl Drop for RetryScheduler {
    fn drop(&mut self) {
        self.tick_handle.abort();
    }
}

/// Background tick: promote every due entry and announce it.
///
/// Promotion only removes records and sends announcements; it never performs
/// delivery, so the tick can never be blocked by a slow endpoint.
async fn tick_loop(
    pending: Arc<Mutex<HashMap<RetryKey, RetryEntry>>>,
    due_tx: mpsc::Sender<RetryDue>,
    signals: SignalBus,
    tick_interval: Duration,
) {
    let mut ticker = tokio::time::interval(tick_interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let due: Vec<RetryEntry> = {
            let mut guard = pending.lock().await;
            let now = Instant::now();
            let keys: Vec<RetryKey> = guard
                .iter()
                .filter(|(_, entry)| entry.due_at <= now)
                .map(|(key, _)| *key)
                .collect();
            keys.into_iter().filter_map(|key| guard.remove(&key)).collect()
        };

        for entry in due {
            tracing::debug!(
                webhook_id = %entry.webhook_id,
                event_id = %entry.event.id,
                attempt = entry.attempt,
                "Retry due"
            );

            signals.emit(RelaySignal::RetryDue {
                webhook_id: entry.webhook_id,
                event_id: entry.event.id,
                attempt: entry.attempt,
            });

            let announcement = RetryDue {
                webhook_id: entry.webhook_id,
                event: entry.event,
                attempt: entry.attempt,
            };
            if due_tx.send(announcement).await.is_err() {
                // Manager is gone; nothing left to announce to.
                return;
            }
        }
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
