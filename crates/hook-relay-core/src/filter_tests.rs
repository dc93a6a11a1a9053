//! Tests for the filter matcher.
//!
//! Everything here uses literal event/filter fixtures: the matcher is a
//! pure function.

use super::*;
use crate::event::WebhookEvent;

fn order_event() -> WebhookEvent {
    WebhookEvent::new(
        "order.created",
        serde_json::json!({
            "amount": 5,
            "currency": "EUR",
            "customer": { "country": "DE", "vip": false },
            "note": ""
        }),
    )
}

fn filter(field: &str, op: FilterOp, value: serde_json::Value) -> EventFilter {
    EventFilter::new(field, op, value)
}

// ============================================================================
// Operator Semantics
// ============================================================================

#[test]
fn test_eq_and_ne() {
    let event = order_event();

    assert!(filter("data.currency", FilterOp::Eq, serde_json::json!("EUR")).matches(&event));
    assert!(!filter("data.currency", FilterOp::Eq, serde_json::json!("USD")).matches(&event));
    assert!(filter("data.currency", FilterOp::Ne, serde_json::json!("USD")).matches(&event));
    assert!(!filter("data.currency", FilterOp::Ne, serde_json::json!("EUR")).matches(&event));
}

#[test]
fn test_eq_is_strict_about_types() {
    let event = order_event();

    // Number 5 is not the string "5".
    assert!(!filter("data.amount", FilterOp::Eq, serde_json::json!("5")).matches(&event));
    assert!(filter("data.amount", FilterOp::Eq, serde_json::json!(5)).matches(&event));
}

#[test]
fn test_gt_and_lt_numeric_ordering() {
    let event = order_event();

    // Field value 5: gt 3 matches, gt 10 does not.
    assert!(filter("data.amount", FilterOp::Gt, serde_json::json!(3)).matches(&event));
    assert!(!filter("data.amount", FilterOp::Gt, serde_json::json!(10)).matches(&event));
    assert!(!filter("data.amount", FilterOp::Gt, serde_json::json!(5)).matches(&event));

    assert!(filter("data.amount", FilterOp::Lt, serde_json::json!(10)).matches(&event));
    assert!(!filter("data.amount", FilterOp::Lt, serde_json::json!(5)).matches(&event));
}

#[test]
fn test_gt_never_matches_non_numeric_operands() {
    let event = order_event();

    // Non-numeric field value.
    assert!(!filter("data.currency", FilterOp::Gt, serde_json::json!(3)).matches(&event));
    // Non-numeric filter operand.
    assert!(!filter("data.amount", FilterOp::Gt, serde_json::json!("3")).matches(&event));
}

#[test]
fn test_in_and_nin_membership() {
    let event = order_event();

    assert!(
        filter("data.currency", FilterOp::In, serde_json::json!(["EUR", "USD"])).matches(&event)
    );
    assert!(!filter("data.currency", FilterOp::In, serde_json::json!(["GBP"])).matches(&event));
    assert!(filter("data.currency", FilterOp::Nin, serde_json::json!(["GBP"])).matches(&event));
    assert!(
        !filter("data.currency", FilterOp::Nin, serde_json::json!(["EUR", "USD"])).matches(&event)
    );
}

#[test]
fn test_in_with_non_array_operand_never_matches() {
    let event = order_event();
    assert!(!filter("data.currency", FilterOp::In, serde_json::json!("EUR")).matches(&event));
    assert!(!filter("data.currency", FilterOp::Nin, serde_json::json!("GBP")).matches(&event));
}

#[test]
fn test_contains_substring_on_strings_only() {
    let event = order_event();

    assert!(filter("data.currency", FilterOp::Contains, serde_json::json!("EU")).matches(&event));
    assert!(!filter("data.currency", FilterOp::Contains, serde_json::json!("US")).matches(&event));
    // Numeric field never satisfies contains.
    assert!(!filter("data.amount", FilterOp::Contains, serde_json::json!("5")).matches(&event));
}

#[test]
fn test_regex_on_strings_only() {
    let event = order_event();

    assert!(filter("type", FilterOp::Regex, serde_json::json!("^order\\.")).matches(&event));
    assert!(!filter("type", FilterOp::Regex, serde_json::json!("^user\\.")).matches(&event));
    assert!(!filter("data.amount", FilterOp::Regex, serde_json::json!("^5$")).matches(&event));
}

#[test]
fn test_invalid_regex_never_matches() {
    let event = order_event();
    assert!(!filter("type", FilterOp::Regex, serde_json::json!("(unclosed")).matches(&event));
}

// ============================================================================
// Field Resolution
// ============================================================================

#[test]
fn test_dot_path_reaches_nested_data() {
    let event = order_event();
    assert!(
        filter("data.customer.country", FilterOp::Eq, serde_json::json!("DE")).matches(&event)
    );
}

#[test]
fn test_top_level_envelope_fields_are_addressable() {
    let event = order_event();
    assert!(filter("type", FilterOp::Eq, serde_json::json!("order.created")).matches(&event));
    assert!(filter("source", FilterOp::Eq, serde_json::json!("hook-relay")).matches(&event));
    assert!(filter("version", FilterOp::Eq, serde_json::json!("1.0")).matches(&event));
}

#[test]
fn test_absent_field_fails_most_operators() {
    let event = order_event();

    assert!(!filter("data.missing", FilterOp::Eq, serde_json::json!(1)).matches(&event));
    assert!(!filter("data.missing", FilterOp::Gt, serde_json::json!(1)).matches(&event));
    assert!(!filter("data.missing", FilterOp::Lt, serde_json::json!(1)).matches(&event));
    assert!(!filter("data.missing", FilterOp::In, serde_json::json!([1])).matches(&event));
    assert!(!filter("data.missing", FilterOp::Contains, serde_json::json!("x")).matches(&event));
    assert!(!filter("data.missing", FilterOp::Regex, serde_json::json!(".*")).matches(&event));
}

#[test]
fn test_absent_field_passes_ne_against_truthy_and_nin() {
    let event = order_event();

    assert!(filter("data.missing", FilterOp::Ne, serde_json::json!("set")).matches(&event));
    assert!(filter("data.missing", FilterOp::Nin, serde_json::json!(["a", "b"])).matches(&event));

    // ne against falsy operands does not pass for an absent field.
    assert!(!filter("data.missing", FilterOp::Ne, serde_json::json!(null)).matches(&event));
    assert!(!filter("data.missing", FilterOp::Ne, serde_json::json!(false)).matches(&event));
    assert!(!filter("data.missing", FilterOp::Ne, serde_json::json!(0)).matches(&event));
    assert!(!filter("data.missing", FilterOp::Ne, serde_json::json!("")).matches(&event));
}

#[test]
fn test_path_through_non_object_is_absent() {
    let event = order_event();
    // data.amount is a number; descending further treats the field as absent.
    assert!(!filter("data.amount.cents", FilterOp::Eq, serde_json::json!(1)).matches(&event));
    assert!(filter("data.amount.cents", FilterOp::Nin, serde_json::json!([1])).matches(&event));
}

// ============================================================================
// Conjunction
// ============================================================================

#[test]
fn test_empty_filter_list_matches_everything() {
    let event = order_event();
    assert!(matches_all(&event, &[]));
}

#[test]
fn test_all_filters_must_pass() {
    let event = order_event();
    let passing = filter("data.amount", FilterOp::Gt, serde_json::json!(3));
    let failing = filter("data.currency", FilterOp::Eq, serde_json::json!("USD"));

    assert!(matches_all(&event, &[passing.clone()]));
    assert!(!matches_all(&event, &[passing, failing]));
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_validate_accepts_well_formed_filters() {
    assert!(filter("data.amount", FilterOp::Gt, serde_json::json!(3)).validate().is_ok());
    assert!(filter("type", FilterOp::Regex, serde_json::json!("^order\\.")).validate().is_ok());
    assert!(filter("data.currency", FilterOp::In, serde_json::json!(["EUR"])).validate().is_ok());
}

#[test]
fn test_validate_rejects_bad_shapes() {
    assert!(filter("", FilterOp::Eq, serde_json::json!(1)).validate().is_err());
    assert!(filter("type", FilterOp::Regex, serde_json::json!("(unclosed")).validate().is_err());
    assert!(filter("type", FilterOp::Regex, serde_json::json!(42)).validate().is_err());
    assert!(filter("type", FilterOp::In, serde_json::json!("not-an-array")).validate().is_err());
    assert!(filter("type", FilterOp::Nin, serde_json::json!(7)).validate().is_err());
}

#[test]
fn test_filter_op_serde_names() {
    let json = serde_json::to_string(&FilterOp::Nin).unwrap();
    assert_eq!(json, "\"nin\"");

    let op: FilterOp = serde_json::from_str("\"contains\"").unwrap();
    assert_eq!(op, FilterOp::Contains);
}
