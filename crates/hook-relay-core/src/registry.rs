//! # Webhook Registry
//!
//! CRUD store of webhook definitions and single writer of the derived
//! subscription index. The index always equals the cross-product of each
//! registration's `events` list as of the last mutation: every mutating
//! operation tears down and rebuilds the affected webhook's subscriptions in
//! one synchronous step, so no caller can observe a partial subscription set.
//!
//! The registry is a plain data structure; the manager owns it behind an
//! async lock and is its only mutator at runtime.

use crate::filter::EventFilter;
use crate::{RelayError, RelayResult, Timestamp, WebhookId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use url::Url;

// ============================================================================
// Core Types
// ============================================================================

/// A registered delivery target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Webhook {
    /// Opaque identity, generated on creation and immutable.
    pub id: WebhookId,

    /// Target URL deliveries are POSTed to.
    pub url: String,

    /// Event type names this webhook subscribes to.
    pub events: Vec<String>,

    /// Filters applied in conjunction to every candidate event.
    pub filters: Vec<EventFilter>,

    /// Inactive webhooks keep their subscriptions but never match dispatch.
    pub active: bool,

    /// Opaque metadata passed through to the delivery executor
    /// (e.g. a signing secret). Never interpreted by the registry.
    pub metadata: HashMap<String, serde_json::Value>,

    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Registration input for a new webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSpec {
    pub url: String,
    pub events: Vec<String>,
    pub filters: Vec<EventFilter>,
    pub active: bool,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl WebhookSpec {
    /// Create a spec for an active webhook with no filters.
    pub fn new(url: impl Into<String>, events: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            url: url.into(),
            events: events.into_iter().map(Into::into).collect(),
            filters: Vec::new(),
            active: true,
            metadata: HashMap::new(),
        }
    }

    /// Attach event filters.
    pub fn with_filters(mut self, filters: impl IntoIterator<Item = EventFilter>) -> Self {
        self.filters = filters.into_iter().collect();
        self
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Attach a signing secret under the `"secret"` metadata key.
    pub fn with_secret(self, secret: impl Into<String>) -> Self {
        self.with_metadata("secret", serde_json::Value::String(secret.into()))
    }

    /// Register the webhook in the disabled state.
    pub fn disabled(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Partial update applied to an existing webhook.
///
/// `None` fields are left unchanged; `Some` fields replace the current value
/// wholesale (an empty `events` list is rejected, an empty `filters` list
/// clears all filters).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookUpdate {
    pub url: Option<String>,
    pub events: Option<Vec<String>>,
    pub filters: Option<Vec<EventFilter>>,
    pub active: Option<bool>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl WebhookUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn events(mut self, events: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.events = Some(events.into_iter().map(Into::into).collect());
        self
    }

    pub fn filters(mut self, filters: impl IntoIterator<Item = EventFilter>) -> Self {
        self.filters = Some(filters.into_iter().collect());
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }
}

/// Derived binding of a webhook to a single event type.
///
/// Never independently persisted; always rebuilt from registry state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub webhook_id: WebhookId,
    pub event_type: String,
    pub filters: Vec<EventFilter>,
    pub active: bool,
    pub created_at: Timestamp,
}

// ============================================================================
// Registry
// ============================================================================

/// Webhook store plus the event-type → subscription index derived from it.
#[derive(Debug, Default)]
pub struct WebhookRegistry {
    webhooks: HashMap<WebhookId, Webhook>,
    index: HashMap<String, Vec<Subscription>>,
}

impl WebhookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store a new webhook, rebuilding its subscriptions.
    pub fn register(&mut self, spec: WebhookSpec) -> RelayResult<WebhookId> {
        validate_spec(&spec.url, &spec.events, &spec.filters)?;

        let now = Timestamp::now();
        let webhook = Webhook {
            id: WebhookId::new(),
            url: spec.url,
            events: spec.events,
            filters: spec.filters,
            active: spec.active,
            metadata: spec.metadata,
            created_at: now,
            updated_at: now,
        };

        let id = webhook.id;
        self.index_subscriptions(&webhook);
        self.webhooks.insert(id, webhook);
        Ok(id)
    }

    /// Apply a partial update, atomically replacing the webhook's
    /// subscription set when `events`, `filters` or `active` change.
    ///
    /// Validation runs against the merged result before anything is
    /// committed, so a rejected update leaves both the webhook and the index
    /// untouched.
    pub fn update(&mut self, id: WebhookId, update: WebhookUpdate) -> RelayResult<()> {
        let Some(existing) = self.webhooks.get(&id) else {
            return Err(RelayError::NotFound { webhook_id: id });
        };

        let mut draft = existing.clone();
        if let Some(url) = update.url {
            draft.url = url;
        }
        if let Some(events) = update.events {
            draft.events = events;
        }
        if let Some(filters) = update.filters {
            draft.filters = filters;
        }
        if let Some(active) = update.active {
            draft.active = active;
        }
        if let Some(metadata) = update.metadata {
            draft.metadata = metadata;
        }

        validate_spec(&draft.url, &draft.events, &draft.filters)?;
        draft.updated_at = Timestamp::now();

        self.remove_subscriptions(id);
        self.index_subscriptions(&draft);
        self.webhooks.insert(id, draft);
        Ok(())
    }

    /// Remove a webhook and all of its subscriptions.
    ///
    /// Returns the removed record so the caller can cancel outstanding
    /// retries and drop metrics for it.
    pub fn delete(&mut self, id: WebhookId) -> RelayResult<Webhook> {
        let Some(webhook) = self.webhooks.remove(&id) else {
            return Err(RelayError::NotFound { webhook_id: id });
        };
        self.remove_subscriptions(id);
        Ok(webhook)
    }

    pub fn get(&self, id: WebhookId) -> Option<&Webhook> {
        self.webhooks.get(&id)
    }

    pub fn contains(&self, id: WebhookId) -> bool {
        self.webhooks.contains_key(&id)
    }

    /// List registered webhooks, oldest first.
    pub fn list(&self, active_only: bool) -> Vec<Webhook> {
        let mut webhooks: Vec<Webhook> = self
            .webhooks
            .values()
            .filter(|w| !active_only || w.active)
            .cloned()
            .collect();
        webhooks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        webhooks
    }

    /// Subscriptions registered for an event type, in registration order.
    pub fn subscriptions_for(&self, event_type: &str) -> &[Subscription] {
        self.index
            .get(event_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn total_count(&self) -> usize {
        self.webhooks.len()
    }

    pub fn active_count(&self) -> usize {
        self.webhooks.values().filter(|w| w.active).count()
    }

    fn index_subscriptions(&mut self, webhook: &Webhook) {
        let mut seen = HashSet::new();
        for event_type in &webhook.events {
            // Duplicate names in the events list collapse to one subscription.
            if !seen.insert(event_type.as_str()) {
                continue;
            }
            self.index
                .entry(event_type.clone())
                .or_default()
                .push(Subscription {
                    webhook_id: webhook.id,
                    event_type: event_type.clone(),
                    filters: webhook.filters.clone(),
                    active: webhook.active,
                    created_at: webhook.created_at,
                });
        }
    }

    fn remove_subscriptions(&mut self, id: WebhookId) {
        self.index.retain(|_, subscriptions| {
            subscriptions.retain(|s| s.webhook_id != id);
            !subscriptions.is_empty()
        });
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Validate registration input, collecting every problem found.
fn validate_spec(url: &str, events: &[String], filters: &[EventFilter]) -> RelayResult<()> {
    let mut reasons = Vec::new();

    match Url::parse(url) {
        Ok(parsed) => {
            if !matches!(parsed.scheme(), "http" | "https") {
                reasons.push(format!("url scheme must be http or https, got '{}'", parsed.scheme()));
            }
            if !parsed.has_host() {
                reasons.push("url must have a host".to_string());
            }
        }
        Err(e) => reasons.push(format!("url is not a valid absolute URL: {}", e)),
    }

    if events.is_empty() {
        reasons.push("events must contain at least one event type".to_string());
    }
    for event_type in events {
        if event_type.trim().is_empty() {
            reasons.push("event type names must not be empty".to_string());
            break;
        }
    }

    for filter in filters {
        if let Err(reason) = filter.validate() {
            reasons.push(reason);
        }
    }

    if reasons.is_empty() {
        Ok(())
    } else {
        Err(RelayError::InvalidWebhookSpec { reasons })
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
