//! # Event Filter Matcher
//!
//! Pure predicate evaluation over event envelopes. A filter is a
//! (field path, operator, operand) triple; a subscription carries a list of
//! filters applied in conjunction. No state, no side effects: unit testable
//! with literal fixtures.
//!
//! Field paths are dot-separated and resolve over the serialized envelope,
//! so `type`, `source`, `version` and `data.order.amount` all work. An
//! absent field fails every operator except `ne` against a truthy operand
//! and `nin`.

use crate::event::WebhookEvent;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operator of an event filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    /// Strict JSON equality.
    Eq,
    /// Strict JSON inequality.
    Ne,
    /// Numeric greater-than; non-numeric operands never satisfy.
    Gt,
    /// Numeric less-than; non-numeric operands never satisfy.
    Lt,
    /// Membership in an array-valued operand.
    In,
    /// Absence from an array-valued operand.
    Nin,
    /// Substring test, string fields only.
    Contains,
    /// Pattern test, string fields only.
    Regex,
}

/// A single predicate an event must satisfy for a subscription to match.
///
/// # Examples
///
/// ```rust
/// use hook_relay_core::event::WebhookEvent;
/// use hook_relay_core::filter::{matches_all, EventFilter, FilterOp};
///
/// let event = WebhookEvent::new("order.created", serde_json::json!({ "amount": 5 }));
/// let filter = EventFilter::new("data.amount", FilterOp::Gt, serde_json::json!(3));
///
/// assert!(matches_all(&event, std::slice::from_ref(&filter)));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Dot-separated path into the event envelope.
    pub field: String,

    /// Comparison operator.
    pub op: FilterOp,

    /// Operand the field value is compared against.
    pub value: Value,
}

impl EventFilter {
    /// Create a new filter.
    pub fn new(field: impl Into<String>, op: FilterOp, value: Value) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    /// Check this filter against an event.
    pub fn matches(&self, event: &WebhookEvent) -> bool {
        let Ok(root) = serde_json::to_value(event) else {
            return false;
        };
        evaluate(&root, self)
    }

    /// Validate the filter shape at registration time.
    ///
    /// Catches problems that would otherwise silently never match: `regex`
    /// operands that are not valid patterns, and `in`/`nin` operands that
    /// are not arrays.
    pub fn validate(&self) -> Result<(), String> {
        if self.field.is_empty() {
            return Err("filter field path must not be empty".to_string());
        }

        match self.op {
            FilterOp::Regex => {
                let pattern = self
                    .value
                    .as_str()
                    .ok_or_else(|| format!("regex filter on '{}' requires a string operand", self.field))?;
                Regex::new(pattern)
                    .map_err(|e| format!("invalid regex for '{}': {}", self.field, e))?;
                Ok(())
            }
            FilterOp::In | FilterOp::Nin => {
                if self.value.is_array() {
                    Ok(())
                } else {
                    Err(format!(
                        "in/nin filter on '{}' requires an array operand",
                        self.field
                    ))
                }
            }
            _ => Ok(()),
        }
    }
}

/// Check an event against a filter list in conjunction.
///
/// An empty list matches every event.
pub fn matches_all(event: &WebhookEvent, filters: &[EventFilter]) -> bool {
    if filters.is_empty() {
        return true;
    }

    let Ok(root) = serde_json::to_value(event) else {
        return false;
    };

    filters.iter().all(|filter| evaluate(&root, filter))
}

/// Evaluate one filter against the serialized envelope.
fn evaluate(root: &Value, filter: &EventFilter) -> bool {
    let field = lookup_path(root, &filter.field);
    apply_op(filter.op, field, &filter.value)
}

/// Resolve a dot-separated path, descending through objects only.
fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn apply_op(op: FilterOp, field: Option<&Value>, operand: &Value) -> bool {
    let Some(field) = field else {
        // Absent fields: only `ne` against a truthy operand and `nin` pass.
        return match op {
            FilterOp::Ne => is_truthy(operand),
            FilterOp::Nin => true,
            _ => false,
        };
    };

    match op {
        FilterOp::Eq => field == operand,
        FilterOp::Ne => field != operand,
        FilterOp::Gt => match (field.as_f64(), operand.as_f64()) {
            (Some(a), Some(b)) => a > b,
            _ => false,
        },
        FilterOp::Lt => match (field.as_f64(), operand.as_f64()) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        },
        FilterOp::In => operand
            .as_array()
            .map(|arr| arr.iter().any(|v| v == field))
            .unwrap_or(false),
        FilterOp::Nin => operand
            .as_array()
            .map(|arr| !arr.iter().any(|v| v == field))
            .unwrap_or(false),
        FilterOp::Contains => match (field.as_str(), operand.as_str()) {
            (Some(haystack), Some(needle)) => haystack.contains(needle),
            _ => false,
        },
        FilterOp::Regex => match (field.as_str(), operand.as_str()) {
            (Some(text), Some(pattern)) => Regex::new(pattern)
                .map(|re| re.is_match(text))
                .unwrap_or(false),
            _ => false,
        },
    }
}

/// Truthiness in the sense relevant to `ne` on absent fields: null, `false`,
/// zero and the empty string are falsy, everything else is truthy.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
#[path = "filter_tests.rs"]
mod tests;
