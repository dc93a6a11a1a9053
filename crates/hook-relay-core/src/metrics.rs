//! # Delivery Metrics
//!
//! Monotonically accumulating counters keyed by webhook id plus process-wide
//! aggregates. The store is owned by the manager and updated exclusively in
//! its delivery-result handler; nothing is ever recomputed from scratch.

use crate::delivery::DeliveryResult;
use crate::{Timestamp, WebhookId};
use serde::Serialize;
use std::collections::HashMap;

/// Per-webhook delivery counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WebhookStats {
    pub deliveries: u64,
    pub successes: u64,
    pub failures: u64,

    /// Running average attempt latency in milliseconds.
    pub avg_latency_ms: f64,

    pub last_delivery_at: Option<Timestamp>,
}

impl WebhookStats {
    /// Fraction of attempts that succeeded, 0.0 when nothing was delivered.
    pub fn success_rate(&self) -> f64 {
        if self.deliveries == 0 {
            0.0
        } else {
            self.successes as f64 / self.deliveries as f64
        }
    }

    fn record(&mut self, result: &DeliveryResult) {
        self.deliveries += 1;
        if result.success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }

        // Incremental mean keeps the average exact without storing samples.
        let latency_ms = result.duration.as_secs_f64() * 1000.0;
        self.avg_latency_ms += (latency_ms - self.avg_latency_ms) / self.deliveries as f64;
        self.last_delivery_at = Some(result.completed_at);
    }
}

/// Process-wide metrics snapshot returned by the manager.
#[derive(Debug, Clone, Serialize)]
pub struct RelayMetrics {
    pub total_webhooks: usize,
    pub active_webhooks: usize,
    pub total_deliveries: u64,
    pub successful_deliveries: u64,
    pub failed_deliveries: u64,
    pub delivery_success_rate: f64,
    pub per_webhook: HashMap<WebhookId, WebhookStats>,
}

/// Accumulating store behind the manager's metrics lock.
#[derive(Debug, Default)]
pub struct MetricsStore {
    per_webhook: HashMap<WebhookId, WebhookStats>,
    total_deliveries: u64,
    successful_deliveries: u64,
    failed_deliveries: u64,
}

impl MetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one delivery result into the counters.
    pub fn record(&mut self, result: &DeliveryResult) {
        self.bump_aggregates(result);
        self.per_webhook
            .entry(result.webhook_id)
            .or_default()
            .record(result);
    }

    /// Fold a result for a webhook that was deleted while the attempt was in
    /// flight: aggregates only, so deletion keeps per-webhook counters gone.
    pub fn record_untracked(&mut self, result: &DeliveryResult) {
        self.bump_aggregates(result);
    }

    fn bump_aggregates(&mut self, result: &DeliveryResult) {
        self.total_deliveries += 1;
        if result.success {
            self.successful_deliveries += 1;
        } else {
            self.failed_deliveries += 1;
        }
    }

    /// Drop the per-webhook counters for a deleted webhook.
    ///
    /// Aggregate totals are monotonic and keep the deleted webhook's history.
    pub fn remove_webhook(&mut self, webhook_id: WebhookId) {
        self.per_webhook.remove(&webhook_id);
    }

    pub fn stats_for(&self, webhook_id: WebhookId) -> Option<&WebhookStats> {
        self.per_webhook.get(&webhook_id)
    }

    /// Snapshot the counters; webhook counts come from the registry.
    pub fn snapshot(&self, total_webhooks: usize, active_webhooks: usize) -> RelayMetrics {
        let delivery_success_rate = if self.total_deliveries == 0 {
            0.0
        } else {
            self.successful_deliveries as f64 / self.total_deliveries as f64
        };

        RelayMetrics {
            total_webhooks,
            active_webhooks,
            total_deliveries: self.total_deliveries,
            successful_deliveries: self.successful_deliveries,
            failed_deliveries: self.failed_deliveries,
            delivery_success_rate,
            per_webhook: self.per_webhook.clone(),
        }
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
