//! End-to-end fan-out and retry behavior against scripted executors.
//!
//! These tests verify:
//! - Exactly one attempt per matching webhook, zero for non-matching ones
//! - The full fail/retry/recover cycle with increasing backoff
//! - The retry budget and the dead-letter boundary
//! - Cancellation semantics when webhooks are deleted mid-retry
//! - Subscription rebuilds on update

mod common;

use async_trait::async_trait;
use tokio_test::assert_ok;
use hook_relay_core::{
    DeliveryExecutor, DeliveryResult, EventFilter, FilterOp, RelaySignal, Webhook, WebhookEvent,
    WebhookManager, WebhookSpec, WebhookUpdate,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_flaky_endpoint_recovers_on_third_attempt() {
    // Arrange: an endpoint that fails attempts 1-2 and succeeds on 3.
    let executor = common::ScriptedExecutor::new(2);
    let manager = WebhookManager::with_executor(common::fast_config(), executor.clone());
    let id = tokio_test::assert_ok!(
        manager
            .register_webhook(WebhookSpec::new("https://x/y", ["order.created"]))
            .await
    );

    let mut rx = manager.subscribe();

    // Act
    manager
        .emit_event(WebhookEvent::new(
            "order.created",
            serde_json::json!({ "amount": 42 }),
        ))
        .await;
    let signals = common::collect_signals_until(&mut rx, |s| {
        matches!(s, RelaySignal::Delivery(result) if result.success)
    })
    .await;

    // Assert: exactly 3 delivery signals and 2 scheduled retries with
    // increasing delay.
    assert_eq!(common::count_signals(&signals, "delivery"), 3);
    assert_eq!(common::count_signals(&signals, "retry_scheduled"), 2);

    let delays: Vec<Duration> = signals
        .iter()
        .filter_map(|signal| match signal {
            RelaySignal::RetryScheduled { delay, .. } => Some(*delay),
            _ => None,
        })
        .collect();
    assert_eq!(delays.len(), 2);
    assert!(delays[1] > delays[0], "backoff must grow between retries");

    let stats = manager.get_webhook_stats(id).await.unwrap();
    assert_eq!(stats.deliveries, 3);
    assert_eq!(stats.successes, 1);
    assert_eq!(stats.failures, 2);

    let metrics = manager.get_metrics().await;
    assert_eq!(metrics.total_deliveries, 3);
    assert_eq!(metrics.successful_deliveries, 1);
    assert_eq!(metrics.failed_deliveries, 2);
}

#[tokio::test]
async fn test_fanout_hits_each_matching_webhook_exactly_once() {
    let executor = common::ScriptedExecutor::new(0);
    let manager = WebhookManager::with_executor(common::fast_config(), executor.clone());

    let plain_a = manager
        .register_webhook(WebhookSpec::new("https://a.example/hook", ["order.created"]))
        .await
        .unwrap();
    let plain_b = manager
        .register_webhook(WebhookSpec::new("https://b.example/hook", ["order.created"]))
        .await
        .unwrap();
    let filtered_out = manager
        .register_webhook(
            WebhookSpec::new("https://c.example/hook", ["order.created"]).with_filters([
                EventFilter::new("data.amount", FilterOp::Gt, serde_json::json!(100)),
            ]),
        )
        .await
        .unwrap();
    let other_type = manager
        .register_webhook(WebhookSpec::new("https://d.example/hook", ["user.created"]))
        .await
        .unwrap();

    let mut rx = manager.subscribe();
    manager
        .emit_event(WebhookEvent::new(
            "order.created",
            serde_json::json!({ "amount": 42 }),
        ))
        .await;

    let signals = common::collect_signals_until(&mut rx, |s| {
        matches!(s, RelaySignal::EventDispatched { .. })
    })
    .await;
    match signals.last().unwrap() {
        RelaySignal::EventDispatched { matched, .. } => assert_eq!(*matched, 2),
        _ => unreachable!(),
    }

    common::wait_for_deliveries(&manager, 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(manager.get_webhook_stats(plain_a).await.unwrap().deliveries, 1);
    assert_eq!(manager.get_webhook_stats(plain_b).await.unwrap().deliveries, 1);
    assert_eq!(manager.get_webhook_stats(filtered_out).await.unwrap().deliveries, 0);
    assert_eq!(manager.get_webhook_stats(other_type).await.unwrap().deliveries, 0);
    assert_eq!(executor.calls(), 2);
}

#[tokio::test]
async fn test_always_failing_webhook_stops_at_retry_budget() {
    let executor = common::ScriptedExecutor::always_failing();
    let config = common::fast_config().with_max_retries(3);
    let manager = WebhookManager::with_executor(config, executor.clone());
    manager
        .register_webhook(WebhookSpec::new("https://x/y", ["order.created"]))
        .await
        .unwrap();

    let mut rx = manager.subscribe();
    manager
        .emit_event(WebhookEvent::new("order.created", serde_json::json!({})))
        .await;

    let signals = common::collect_signals_until(&mut rx, |s| {
        matches!(s, RelaySignal::DeliveryFailed { .. })
    })
    .await;

    assert_eq!(common::count_signals(&signals, "delivery"), 3);
    assert_eq!(common::count_signals(&signals, "delivery_failed"), 1);

    // Never a fourth attempt.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(executor.calls(), 3);
    assert_eq!(manager.dead_letters().await.len(), 1);
}

#[tokio::test]
async fn test_deleting_webhook_cancels_its_scheduled_retry() {
    let executor = common::ScriptedExecutor::always_failing();
    let config = common::fast_config().with_base_retry_delay(Duration::from_millis(300));
    let manager = WebhookManager::with_executor(config, executor.clone());
    let id = manager
        .register_webhook(WebhookSpec::new("https://x/y", ["order.created"]))
        .await
        .unwrap();

    manager
        .emit_event(WebhookEvent::new("order.created", serde_json::json!({})))
        .await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while manager.pending_retries().await < 1 {
        assert!(tokio::time::Instant::now() < deadline, "retry never scheduled");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    manager.delete_webhook(id).await.unwrap();
    assert_eq!(manager.pending_retries().await, 0);

    // Well past the retry due time: the pair sees zero further attempts.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(executor.calls(), 1);
}

#[tokio::test]
async fn test_update_events_reroutes_subsequent_emissions() -> anyhow::Result<()> {
    let executor = common::ScriptedExecutor::new(0);
    let manager = WebhookManager::with_executor(common::fast_config(), executor.clone());
    let id = manager
        .register_webhook(WebhookSpec::new("https://x/y", ["a"]))
        .await?;

    manager.update_webhook(id, WebhookUpdate::new().events(["b"])).await?;

    manager.emit_event(WebhookEvent::new("a", serde_json::json!({}))).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(executor.calls(), 0, "old event type must no longer match");

    manager.emit_event(WebhookEvent::new("b", serde_json::json!({}))).await;
    common::wait_for_deliveries(&manager, 1).await;
    assert_eq!(executor.calls(), 1, "new event type must match exactly once");

    Ok(())
}

#[tokio::test]
async fn test_duplicate_event_ids_are_independent_units_of_work() {
    let executor = common::ScriptedExecutor::new(0);
    let manager = WebhookManager::with_executor(common::fast_config(), executor.clone());
    manager
        .register_webhook(WebhookSpec::new("https://x/y", ["order.created"]))
        .await
        .unwrap();

    let event = WebhookEvent::new("order.created", serde_json::json!({}));
    manager.emit_event(event.clone()).await;
    manager.emit_event(event).await;

    // No deduplication by event id: both emissions deliver.
    common::wait_for_deliveries(&manager, 2).await;
    assert_eq!(executor.calls(), 2);
}

// ============================================================================
// Failure Isolation
// ============================================================================

/// Fails every delivery whose target URL contains "flaky".
struct UrlKeyedExecutor {
    calls: AtomicU32,
}

#[async_trait]
impl DeliveryExecutor for UrlKeyedExecutor {
    async fn deliver(
        &self,
        webhook: &Webhook,
        event: &WebhookEvent,
        attempt: u32,
    ) -> DeliveryResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if webhook.url.contains("flaky") {
            DeliveryResult::failed(
                webhook.id,
                event.id,
                attempt,
                Duration::from_millis(1),
                None,
                "connection failed",
            )
        } else {
            DeliveryResult::succeeded(
                webhook.id,
                event.id,
                attempt,
                Duration::from_millis(1),
                Some(200),
            )
        }
    }
}

#[tokio::test]
async fn test_one_failing_webhook_never_affects_its_batch_siblings() {
    let executor = Arc::new(UrlKeyedExecutor {
        calls: AtomicU32::new(0),
    });
    let config = common::fast_config().with_max_retries(1);
    let manager = WebhookManager::with_executor(config, executor);

    let healthy = manager
        .register_webhook(WebhookSpec::new("https://healthy.example/hook", ["tick"]))
        .await
        .unwrap();
    let flaky = manager
        .register_webhook(WebhookSpec::new("https://flaky.example/hook", ["tick"]))
        .await
        .unwrap();

    let mut rx = manager.subscribe();
    manager.emit_event(WebhookEvent::new("tick", serde_json::json!({}))).await;

    // Both attempts complete within the same batch; the flaky one
    // dead-letters (budget of one) while the healthy one succeeds.
    common::collect_signals_until(&mut rx, |s| {
        matches!(s, RelaySignal::DeliveryFailed { .. })
    })
    .await;

    let healthy_stats = manager.get_webhook_stats(healthy).await.unwrap();
    assert_eq!(healthy_stats.successes, 1);
    assert_eq!(healthy_stats.failures, 0);

    let flaky_stats = manager.get_webhook_stats(flaky).await.unwrap();
    assert_eq!(flaky_stats.failures, 1);

    let letters = manager.dead_letters().await;
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].webhook_id, flaky);
}
