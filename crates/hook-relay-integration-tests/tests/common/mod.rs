//! Shared fixtures for the integration tests: scripted executors, fast
//! retry configuration, and signal-collection helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use hook_relay_core::{
    DeliveryExecutor, DeliveryResult, RelayConfig, RelaySignal, Webhook, WebhookEvent,
    WebhookManager,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Executor failing the first `fail_first` calls and succeeding afterwards.
pub struct ScriptedExecutor {
    fail_first: u32,
    calls: AtomicU32,
}

impl ScriptedExecutor {
    pub fn new(fail_first: u32) -> Arc<Self> {
        Arc::new(Self {
            fail_first,
            calls: AtomicU32::new(0),
        })
    }

    pub fn always_failing() -> Arc<Self> {
        Self::new(u32::MAX)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliveryExecutor for ScriptedExecutor {
    async fn deliver(
        &self,
        webhook: &Webhook,
        event: &WebhookEvent,
        attempt: u32,
    ) -> DeliveryResult {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_first {
            DeliveryResult::failed(
                webhook.id,
                event.id,
                attempt,
                Duration::from_millis(1),
                Some(500),
                "endpoint returned HTTP 500",
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

/// Config with delays short enough for tests to observe full retry cycles.
pub fn fast_config() -> RelayConfig {
    RelayConfig::default()
        .with_base_retry_delay(Duration::from_millis(20))
        .with_tick_interval(Duration::from_millis(5))
}

/// Poll the metrics surface until `count` deliveries were recorded.
pub async fn wait_for_deliveries(manager: &WebhookManager, count: u64) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while manager.get_metrics().await.total_deliveries < count {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {} deliveries",
            count
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Collect signals until one matches the terminal predicate (inclusive).
pub async fn collect_signals_until<F>(
    rx: &mut broadcast::Receiver<RelaySignal>,
    mut is_terminal: F,
) -> Vec<RelaySignal>
where
    F: FnMut(&RelaySignal) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let mut collected = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let signal = tokio::time::timeout(remaining, rx.recv())
            .await
            .expect("timed out waiting for terminal signal")
            .expect("signal bus closed");
        let terminal = is_terminal(&signal);
        collected.push(signal);
        if terminal {
            return collected;
        }
    }
}

/// Count the collected signals of one kind by name.
pub fn count_signals(signals: &[RelaySignal], name: &str) -> usize {
    signals.iter().filter(|s| s.name() == name).count()
}
