//! # Webhook Manager
//!
//! The public facade of the relay: accepts events, resolves matching
//! webhooks through the subscription index, drains the delivery queue in
//! bounded batches, routes failures to the retry scheduler, and aggregates
//! metrics.
//!
//! Callers of [`WebhookManager::emit_event`] never block on delivery: the
//! call returns once the matching tasks are enqueued, and everything that
//! happens afterwards is observable only through the signal bus and the
//! metrics surface.

use crate::delivery::{DeliveryExecutor, DeliveryResult, HttpDeliveryExecutor};
use crate::event::WebhookEvent;
use crate::filter::matches_all;
use crate::metrics::{MetricsStore, RelayMetrics, WebhookStats};
use crate::registry::{Webhook, WebhookRegistry, WebhookSpec, WebhookUpdate};
use crate::retry::{RetryDue, RetryPolicy, RetryScheduler, ScheduleOutcome};
use crate::signal::{RelaySignal, SignalBus};
use crate::{EventId, RelayError, RelayResult, Timestamp, WebhookId};
use futures::future::join_all;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;

// ============================================================================
// Configuration
// ============================================================================

/// Construction-time configuration of the relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// When false, `emit_event` is a no-op and the manual delivery paths
    /// refuse to run. Registration still works.
    pub enabled: bool,

    /// Number of deliveries drained (and in flight) per batch.
    pub batch_size: usize,

    /// Total delivery attempts allowed per (webhook, event) pair.
    pub max_retries: u32,

    /// Delay before the first retry; doubles per attempt up to the cap.
    pub base_retry_delay: Duration,

    /// How often the retry scheduler promotes due entries.
    pub tick_interval: Duration,

    /// Per-request timeout of the HTTP delivery executor.
    pub request_timeout: Duration,

    /// Bound on retained dead letters; the oldest are evicted first.
    pub dead_letter_capacity: usize,

    /// Per-subscriber buffer of the observability signal bus.
    pub signal_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 10,
            max_retries: 3,
            base_retry_delay: Duration::from_secs(1),
            tick_interval: Duration::from_millis(250),
            request_timeout: Duration::from_secs(10),
            dead_letter_capacity: 1_000,
            signal_capacity: 256,
        }
    }
}

impl RelayConfig {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_retry_delay(mut self, delay: Duration) -> Self {
        self.base_retry_delay = delay;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

// ============================================================================
// Internal Types
// ============================================================================

/// One queued delivery: a (webhook, event, attempt) triple.
#[derive(Debug, Clone)]
struct DeliveryTask {
    webhook_id: WebhookId,
    event: WebhookEvent,
    attempt: u32,
}

/// A delivery whose retries are exhausted, retained for manual recovery.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub webhook_id: WebhookId,
    pub event: WebhookEvent,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub failed_at: Timestamp,
}

struct ManagerInner {
    config: RelayConfig,
    registry: Arc<RwLock<WebhookRegistry>>,
    executor: Arc<dyn DeliveryExecutor>,
    scheduler: RetryScheduler,
    pending: Mutex<VecDeque<DeliveryTask>>,
    /// Drain guard: set while the single drain loop is running.
    draining: AtomicBool,
    /// Cleared by `shutdown`.
    running: AtomicBool,
    metrics: Mutex<MetricsStore>,
    dead_letters: Mutex<VecDeque<DeadLetter>>,
    signals: SignalBus,
    listener_handle: OnceLock<JoinHandle<()>>,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        if let Some(handle) = self.listener_handle.get() {
            handle.abort();
        }
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Orchestrating facade over registry, executor, scheduler and metrics.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct WebhookManager {
    inner: Arc<ManagerInner>,
}

impl WebhookManager {
    /// Create a manager delivering over HTTP.
    ///
    /// Must be called from within a tokio runtime (the retry tick and the
    /// retry listener are spawned here).
    pub fn new(config: RelayConfig) -> RelayResult<Self> {
        let executor = Arc::new(HttpDeliveryExecutor::new(config.request_timeout)?);
        Ok(Self::with_executor(config, executor))
    }

    /// Create a manager with a custom delivery executor.
    pub fn with_executor(config: RelayConfig, executor: Arc<dyn DeliveryExecutor>) -> Self {
        let signals = SignalBus::new(config.signal_capacity);
        let registry = Arc::new(RwLock::new(WebhookRegistry::new()));
        let policy = RetryPolicy::new(config.base_retry_delay, config.max_retries);
        let (scheduler, due_rx) = RetryScheduler::new(
            policy,
            config.tick_interval,
            registry.clone(),
            signals.clone(),
        );

        let manager = Self {
            inner: Arc::new(ManagerInner {
                config,
                registry,
                executor,
                scheduler,
                pending: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
                running: AtomicBool::new(true),
                metrics: Mutex::new(MetricsStore::new()),
                dead_letters: Mutex::new(VecDeque::new()),
                signals,
                listener_handle: OnceLock::new(),
            }),
        };

        manager.spawn_retry_listener(due_rx);
        manager
    }

    // ------------------------------------------------------------------
    // Event intake
    // ------------------------------------------------------------------

    /// Accept an event for fan-out. Fire-and-forget.
    ///
    /// Resolves the subscriptions for the event's type, keeps those whose
    /// webhook is active and whose filters all pass, enqueues one delivery
    /// per match and returns. Duplicate emissions of the same event id are
    /// independent units of work: no deduplication is applied.
    pub async fn emit_event(&self, event: WebhookEvent) {
        if !self.is_running() {
            tracing::debug!(event_id = %event.id, "Relay disabled; dropping event");
            return;
        }

        let tasks: Vec<DeliveryTask> = {
            let registry = self.inner.registry.read().await;
            registry
                .subscriptions_for(&event.event_type)
                .iter()
                .filter(|subscription| subscription.active)
                .filter(|subscription| matches_all(&event, &subscription.filters))
                .map(|subscription| DeliveryTask {
                    webhook_id: subscription.webhook_id,
                    event: event.clone(),
                    attempt: 1,
                })
                .collect()
        };

        let matched = tasks.len();
        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            matched,
            "Event dispatched"
        );
        self.inner.signals.emit(RelaySignal::EventDispatched {
            event_id: event.id,
            event_type: event.event_type.clone(),
            matched,
        });

        self.enqueue(tasks).await;
    }

    // ------------------------------------------------------------------
    // Webhook CRUD
    // ------------------------------------------------------------------

    /// Register a new webhook and build its subscriptions.
    pub async fn register_webhook(&self, spec: WebhookSpec) -> RelayResult<WebhookId> {
        let id = self.inner.registry.write().await.register(spec)?;
        tracing::info!(webhook_id = %id, "Webhook registered");
        self.inner
            .signals
            .emit(RelaySignal::WebhookRegistered { webhook_id: id });
        Ok(id)
    }

    /// Apply a partial update; subscriptions are rebuilt atomically.
    pub async fn update_webhook(&self, id: WebhookId, update: WebhookUpdate) -> RelayResult<()> {
        self.inner.registry.write().await.update(id, update)?;
        tracing::info!(webhook_id = %id, "Webhook updated");
        self.inner
            .signals
            .emit(RelaySignal::WebhookUpdated { webhook_id: id });
        Ok(())
    }

    /// Delete a webhook: removes its subscriptions, cancels its pending
    /// retries, and drops its metrics counters and dead letters.
    pub async fn delete_webhook(&self, id: WebhookId) -> RelayResult<()> {
        self.inner.registry.write().await.delete(id)?;

        let cancelled = self.inner.scheduler.clear_for_webhook(id).await;
        self.inner.metrics.lock().await.remove_webhook(id);
        self.inner
            .dead_letters
            .lock()
            .await
            .retain(|letter| letter.webhook_id != id);

        tracing::info!(
            webhook_id = %id,
            cancelled_retries = cancelled,
            "Webhook deleted"
        );
        self.inner
            .signals
            .emit(RelaySignal::WebhookDeleted { webhook_id: id });
        Ok(())
    }

    pub async fn get_webhook(&self, id: WebhookId) -> Option<Webhook> {
        self.inner.registry.read().await.get(id).cloned()
    }

    pub async fn list_webhooks(&self, active_only: bool) -> Vec<Webhook> {
        self.inner.registry.read().await.list(active_only)
    }

    // ------------------------------------------------------------------
    // Diagnostics and recovery
    // ------------------------------------------------------------------

    /// Deliver a synthetic `webhook.test` event to one webhook, bypassing
    /// subscription matching. Synchronous; never retried.
    pub async fn test_webhook(&self, id: WebhookId) -> RelayResult<DeliveryResult> {
        if !self.is_running() {
            return Err(RelayError::Disabled);
        }

        let webhook = self
            .inner
            .registry
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(RelayError::NotFound { webhook_id: id })?;

        let event = WebhookEvent::test_event();
        let result = self.inner.executor.deliver(&webhook, &event, 1).await;

        self.inner.metrics.lock().await.record(&result);
        self.inner
            .signals
            .emit(RelaySignal::Delivery(result.clone()));
        Ok(result)
    }

    /// Requeue a dead-lettered delivery as a fresh attempt.
    ///
    /// Fails with `NotFound` when the webhook is unknown or no dead letter
    /// exists for the pair.
    pub async fn retry_delivery(&self, webhook_id: WebhookId, event_id: EventId) -> RelayResult<()> {
        if !self.is_running() {
            return Err(RelayError::Disabled);
        }
        if !self.inner.registry.read().await.contains(webhook_id) {
            return Err(RelayError::NotFound { webhook_id });
        }

        let letter = {
            let mut letters = self.inner.dead_letters.lock().await;
            let position = letters
                .iter()
                .position(|l| l.webhook_id == webhook_id && l.event.id == event_id);
            position.and_then(|index| letters.remove(index))
        };

        let Some(letter) = letter else {
            return Err(RelayError::NotFound { webhook_id });
        };

        tracing::info!(
            webhook_id = %webhook_id,
            event_id = %event_id,
            "Requeueing dead-lettered delivery"
        );
        self.enqueue(vec![DeliveryTask {
            webhook_id,
            event: letter.event,
            attempt: 1,
        }])
        .await;
        Ok(())
    }

    /// Snapshot of the retained dead letters, oldest first.
    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.dead_letters.lock().await.iter().cloned().collect()
    }

    // ------------------------------------------------------------------
    // Metrics and observability
    // ------------------------------------------------------------------

    pub async fn get_metrics(&self) -> RelayMetrics {
        let (total, active) = {
            let registry = self.inner.registry.read().await;
            (registry.total_count(), registry.active_count())
        };
        self.inner.metrics.lock().await.snapshot(total, active)
    }

    /// Per-webhook counters; `NotFound` for unknown ids, zeroed stats for a
    /// webhook that exists but has not been delivered to yet.
    pub async fn get_webhook_stats(&self, id: WebhookId) -> RelayResult<WebhookStats> {
        if !self.inner.registry.read().await.contains(id) {
            return Err(RelayError::NotFound { webhook_id: id });
        }
        Ok(self
            .inner
            .metrics
            .lock()
            .await
            .stats_for(id)
            .cloned()
            .unwrap_or_default())
    }

    /// Subscribe to the observability signal stream.
    pub fn subscribe(&self) -> broadcast::Receiver<RelaySignal> {
        self.inner.signals.subscribe()
    }

    /// Number of retries currently waiting for their due time.
    pub async fn pending_retries(&self) -> usize {
        self.inner.scheduler.pending_count().await
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Whether the relay accepts and delivers events.
    pub fn is_running(&self) -> bool {
        self.inner.config.enabled && self.inner.running.load(Ordering::SeqCst)
    }

    /// Stop delivering: aborts the retry tick and listener and discards the
    /// pending queue. Registered webhooks remain readable. Idempotent.
    pub async fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.scheduler.shutdown();
        if let Some(handle) = self.inner.listener_handle.get() {
            handle.abort();
        }
        self.inner.pending.lock().await.clear();
        tracing::info!("Webhook relay shut down");
    }

    // ------------------------------------------------------------------
    // Queue draining
    // ------------------------------------------------------------------

    async fn enqueue(&self, tasks: Vec<DeliveryTask>) {
        if tasks.is_empty() {
            return;
        }
        {
            let mut queue = self.inner.pending.lock().await;
            queue.extend(tasks);
        }
        self.kick_drain();
    }

    /// Start the drain loop unless one is already running.
    ///
    /// The compare-exchange is the "single drain in flight" guard: callers
    /// never block, and at most one loop owns the queue at a time.
    fn kick_drain(&self) {
        if !self.inner.running.load(Ordering::SeqCst) {
            return;
        }
        if self
            .inner
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let manager = self.clone();
            tokio::spawn(async move {
                manager.drain_loop().await;
            });
        }
    }

    /// Drain the pending queue in batches until it is empty.
    ///
    /// Each batch runs concurrently and completes as a whole: successes and
    /// failures alike: before the next batch starts, bounding in-flight
    /// deliveries to `batch_size`. Batches are processed strictly in enqueue
    /// order.
    async fn drain_loop(&self) {
        loop {
            if !self.inner.running.load(Ordering::SeqCst) {
                self.inner.draining.store(false, Ordering::SeqCst);
                return;
            }

            let batch: Vec<DeliveryTask> = {
                let mut queue = self.inner.pending.lock().await;
                let take = queue.len().min(self.inner.config.batch_size.max(1));
                queue.drain(..take).collect()
            };

            if batch.is_empty() {
                self.inner.draining.store(false, Ordering::SeqCst);
                // A task enqueued between the empty pop and the guard release
                // would be stranded without this re-check.
                let refilled = !self.inner.pending.lock().await.is_empty();
                if refilled
                    && self
                        .inner
                        .draining
                        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                {
                    continue;
                }
                return;
            }

            let attempts = batch.into_iter().map(|task| self.execute_task(task));
            let outcomes = join_all(attempts).await;
            for (task, result) in outcomes.into_iter().flatten() {
                self.handle_result(task, result).await;
            }
        }
    }

    /// Run one delivery attempt; skips webhooks deleted or deactivated
    /// after the task was enqueued.
    async fn execute_task(&self, task: DeliveryTask) -> Option<(DeliveryTask, DeliveryResult)> {
        let webhook = self.inner.registry.read().await.get(task.webhook_id).cloned();
        let Some(webhook) = webhook else {
            tracing::debug!(
                webhook_id = %task.webhook_id,
                event_id = %task.event.id,
                "Skipping delivery for deleted webhook"
            );
            return None;
        };
        if !webhook.active {
            tracing::debug!(
                webhook_id = %task.webhook_id,
                event_id = %task.event.id,
                "Skipping delivery for deactivated webhook"
            );
            return None;
        }

        let result = self
            .inner
            .executor
            .deliver(&webhook, &task.event, task.attempt)
            .await;
        Some((task, result))
    }

    /// Sole writer of the metrics store; routes failures to the scheduler.
    async fn handle_result(&self, task: DeliveryTask, result: DeliveryResult) {
        let registered = self.inner.registry.read().await.contains(task.webhook_id);
        {
            let mut metrics = self.inner.metrics.lock().await;
            if registered {
                metrics.record(&result);
            } else {
                // Deleted while the attempt was in flight: the result still
                // counts, but the per-webhook counters stay removed.
                metrics.record_untracked(&result);
            }
        }
        self.inner
            .signals
            .emit(RelaySignal::Delivery(result.clone()));

        if result.success {
            return;
        }
        if !registered {
            return;
        }

        match self
            .inner
            .scheduler
            .schedule_retry(task.webhook_id, task.event.clone(), result.attempt)
            .await
        {
            ScheduleOutcome::Scheduled { .. } | ScheduleOutcome::Skipped => {}
            ScheduleOutcome::Exhausted => {
                tracing::error!(
                    webhook_id = %result.webhook_id,
                    event_id = %result.event_id,
                    attempts = result.attempt,
                    "Delivery abandoned after exhausting retries"
                );
                self.push_dead_letter(task, &result).await;
                self.inner.signals.emit(RelaySignal::DeliveryFailed {
                    webhook_id: result.webhook_id,
                    event_id: result.event_id,
                    attempts: result.attempt,
                    last_error: result.error.clone(),
                });
            }
        }
    }

    async fn push_dead_letter(&self, task: DeliveryTask, result: &DeliveryResult) {
        let mut letters = self.inner.dead_letters.lock().await;
        letters.push_back(DeadLetter {
            webhook_id: task.webhook_id,
            event: task.event,
            attempts: result.attempt,
            last_error: result.error.clone(),
            failed_at: result.completed_at,
        });
        while letters.len() > self.inner.config.dead_letter_capacity.max(1) {
            letters.pop_front();
        }
    }

    /// Consume due-retry announcements and requeue each as the next attempt.
    fn spawn_retry_listener(&self, mut due_rx: mpsc::Receiver<RetryDue>) {
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            while let Some(due) = due_rx.recv().await {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let manager = WebhookManager { inner };
                manager
                    .enqueue(vec![DeliveryTask {
                        webhook_id: due.webhook_id,
                        event: due.event,
                        attempt: due.attempt + 1,
                    }])
                    .await;
            }
        });
        let _ = self.inner.listener_handle.set(handle);
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
