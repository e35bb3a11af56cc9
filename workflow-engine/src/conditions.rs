//! Step conditions evaluated against a request payload.
//!
//! Conditions are ANDed. Each one looks up a dotted path in the payload and
//! compares it to a literal. Evaluation is total: a missing field, a type
//! mismatch or an unknown operator simply makes the predicate false.

use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
    /// Kept verbatim so it can be reported; always evaluates to false
    Unknown(String),
}

impl From<String> for ConditionOperator {
    fn from(value: String) -> Self {
        match value.as_str() {
            "equals" | "eq" | "==" => ConditionOperator::Equals,
            "notEquals" | "not_equals" | "ne" | "!=" => ConditionOperator::NotEquals,
            "greaterThan" | "greater_than" | "gt" | ">" => ConditionOperator::GreaterThan,
            "lessThan" | "less_than" | "lt" | "<" => ConditionOperator::LessThan,
            "contains" => ConditionOperator::Contains,
            _ => ConditionOperator::Unknown(value),
        }
    }
}

impl From<ConditionOperator> for String {
    fn from(value: ConditionOperator) -> Self {
        match value {
            ConditionOperator::Equals => "equals".to_string(),
            ConditionOperator::NotEquals => "notEquals".to_string(),
            ConditionOperator::GreaterThan => "greaterThan".to_string(),
            ConditionOperator::LessThan => "lessThan".to_string(),
            ConditionOperator::Contains => "contains".to_string(),
            ConditionOperator::Unknown(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Dotted path into the payload, e.g. `trip.estimated_cost`
    pub field: String,
    pub operator: ConditionOperator,
    pub value: Value,
}

impl Condition {
    pub fn new(field: &str, operator: ConditionOperator, value: impl Into<Value>) -> Self {
        Self { field: field.to_string(), operator, value: value.into() }
    }

    pub fn equals(field: &str, value: impl Into<Value>) -> Self {
        Self::new(field, ConditionOperator::Equals, value)
    }

    pub fn not_equals(field: &str, value: impl Into<Value>) -> Self {
        Self::new(field, ConditionOperator::NotEquals, value)
    }

    pub fn greater_than(field: &str, value: impl Into<Value>) -> Self {
        Self::new(field, ConditionOperator::GreaterThan, value)
    }

    pub fn less_than(field: &str, value: impl Into<Value>) -> Self {
        Self::new(field, ConditionOperator::LessThan, value)
    }

    pub fn contains(field: &str, value: impl Into<Value>) -> Self {
        Self::new(field, ConditionOperator::Contains, value)
    }
}

/// Reported once per distinct unknown operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionDiagnostic {
    pub operator: String,
    pub field: String,
}

#[derive(Debug, Default)]
pub struct ConditionEvaluator {
    reported: DashSet<String>,
    diagnostics: Option<mpsc::UnboundedSender<ConditionDiagnostic>>,
}

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also forward unknown-operator reports to `sender`
    pub fn with_diagnostics(sender: mpsc::UnboundedSender<ConditionDiagnostic>) -> Self {
        Self { reported: DashSet::new(), diagnostics: Some(sender) }
    }

    /// AND over `conditions`. Every condition is visited so unknown operators
    /// are reported even after an earlier one failed.
    pub fn evaluate(&self, conditions: &[Condition], payload: &Value) -> bool {
        conditions
            .iter()
            .fold(true, |all, condition| self.evaluate_one(condition, payload) && all)
    }

    pub fn evaluate_one(&self, condition: &Condition, payload: &Value) -> bool {
        if let ConditionOperator::Unknown(operator) = &condition.operator {
            self.report_unknown(operator, &condition.field);
            return false;
        }
        let Some(actual) = lookup(payload, &condition.field) else {
            return false;
        };
        let expected = &condition.value;

        match &condition.operator {
            ConditionOperator::Equals => loosely_equal(actual, expected),
            ConditionOperator::NotEquals => !loosely_equal(actual, expected),
            ConditionOperator::GreaterThan => compare(actual, expected) == Some(Ordering::Greater),
            ConditionOperator::LessThan => compare(actual, expected) == Some(Ordering::Less),
            ConditionOperator::Contains => contains(actual, expected),
            ConditionOperator::Unknown(_) => false,
        }
    }

    fn report_unknown(&self, operator: &str, field: &str) {
        if !self.reported.insert(operator.to_string()) {
            return;
        }
        warn!(operator, field, "Unknown condition operator, predicate evaluates to false");
        if let Some(sender) = &self.diagnostics {
            // A dropped receiver only means nobody is listening any more.
            let _ = sender.send(ConditionDiagnostic {
                operator: operator.to_string(),
                field: field.to_string(),
            });
        }
    }
}

/// Resolve a dotted path; numeric segments index into arrays. `null` counts
/// as missing.
pub fn lookup<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    let found = path.split('.').try_fold(payload, |value, segment| match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })?;
    (!found.is_null()).then_some(found)
}

/// Exact integer view; `i128` covers both `i64` and `u64`
fn as_integer(value: &Value) -> Option<i128> {
    match value {
        Value::Number(n) => n.as_i64().map(i128::from).or_else(|| n.as_u64().map(i128::from)),
        Value::String(s) => s.trim().parse::<i128>().ok(),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_timestamp(value: &Value) -> Option<chrono::DateTime<chrono::FixedOffset>> {
    value.as_str().and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
}

fn loosely_equal(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    if let (Some(a), Some(b)) = (as_integer(actual), as_integer(expected)) {
        return a == b;
    }
    if let (Some(a), Some(b)) = (as_number(actual), as_number(expected)) {
        return a == b;
    }
    if let (Some(a), Some(b)) = (as_bool(actual), as_bool(expected)) {
        return a == b;
    }
    false
}

fn compare(actual: &Value, expected: &Value) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (as_integer(actual), as_integer(expected)) {
        return Some(a.cmp(&b));
    }
    if let (Some(a), Some(b)) = (as_number(actual), as_number(expected)) {
        return a.partial_cmp(&b);
    }
    if let (Some(a), Some(b)) = (as_timestamp(actual), as_timestamp(expected)) {
        return Some(a.cmp(&b));
    }
    None
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::String(haystack) => match expected {
            Value::String(needle) => haystack.contains(needle.as_str()),
            Value::Number(n) => haystack.contains(&n.to_string()),
            _ => false,
        },
        Value::Array(items) => items.iter().any(|item| loosely_equal(item, expected)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn payload() -> Value {
        json!({
            "leave": { "days": 5, "type": "annual", "start": "2026-03-02T00:00:00Z" },
            "amount": "1250.50",
            "urgent": "true",
            "tags": ["international", "client"],
            "approvers": [{ "id": "u1" }],
            "note": null
        })
    }

    #[test]
    fn test_dotted_lookup() {
        let payload = payload();
        assert_eq!(lookup(&payload, "leave.days"), Some(&json!(5)));
        assert_eq!(lookup(&payload, "approvers.0.id"), Some(&json!("u1")));
        assert_eq!(lookup(&payload, "leave.missing"), None);
        assert_eq!(lookup(&payload, "note"), None);
        assert_eq!(lookup(&payload, ""), None);
    }

    #[test]
    fn test_operators() {
        let evaluator = ConditionEvaluator::new();
        let payload = payload();

        assert!(evaluator.evaluate_one(&Condition::equals("leave.type", "annual"), &payload));
        assert!(evaluator.evaluate_one(&Condition::equals("leave.days", "5"), &payload));
        assert!(evaluator.evaluate_one(&Condition::equals("urgent", true), &payload));
        assert!(evaluator.evaluate_one(&Condition::not_equals("leave.type", "sick"), &payload));
        assert!(evaluator.evaluate_one(&Condition::greater_than("amount", 1000), &payload));
        assert!(!evaluator.evaluate_one(&Condition::greater_than("amount", "5000"), &payload));
        assert!(evaluator.evaluate_one(&Condition::less_than("leave.days", 10), &payload));
        assert!(evaluator.evaluate_one(
            &Condition::less_than("leave.start", "2026-04-01T00:00:00Z"),
            &payload
        ));
        assert!(evaluator.evaluate_one(&Condition::contains("tags", "client"), &payload));
        assert!(evaluator.evaluate_one(&Condition::contains("leave.type", "ann"), &payload));
        assert!(!evaluator.evaluate_one(&Condition::greater_than("leave.type", 3), &payload));
    }

    #[test]
    fn test_missing_field_is_false_for_every_operator() {
        let evaluator = ConditionEvaluator::new();
        let payload = payload();
        for condition in [
            Condition::equals("nope", 1),
            Condition::not_equals("nope", 1),
            Condition::greater_than("nope", 1),
            Condition::less_than("nope", 1),
            Condition::contains("nope", 1),
        ] {
            assert!(!evaluator.evaluate_one(&condition, &payload), "{:?}", condition.operator);
        }
    }

    #[test]
    fn test_conditions_are_anded() {
        let evaluator = ConditionEvaluator::new();
        let payload = payload();
        assert!(evaluator.evaluate(&[], &payload));
        assert!(evaluator.evaluate(
            &[Condition::equals("leave.type", "annual"), Condition::greater_than("leave.days", 3)],
            &payload
        ));
        assert!(!evaluator.evaluate(
            &[Condition::equals("leave.type", "annual"), Condition::greater_than("leave.days", 7)],
            &payload
        ));
    }

    #[test]
    fn test_unknown_operator_reported_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let evaluator = ConditionEvaluator::with_diagnostics(tx);
        let payload = payload();
        let condition = Condition::new("leave.days", ConditionOperator::from("between".to_string()), 3);

        assert!(!evaluator.evaluate_one(&condition, &payload));
        assert!(!evaluator.evaluate_one(&condition, &payload));

        let diagnostic = rx.try_recv().unwrap();
        assert_eq!(diagnostic.operator, "between");
        assert_eq!(diagnostic.field, "leave.days");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unknown_operator_reported_on_absent_field_and_after_failure() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let evaluator = ConditionEvaluator::with_diagnostics(tx);

        let absent = Condition::new("absent", ConditionOperator::from("between".to_string()), 3);
        assert!(!evaluator.evaluate_one(&absent, &json!({})));
        assert_eq!(rx.try_recv().unwrap().operator, "between");

        let conditions = [
            Condition::equals("leave.type", "sick"),
            Condition::new("leave.days", ConditionOperator::from("in".to_string()), json!([5])),
        ];
        assert!(!evaluator.evaluate(&conditions, &payload()));
        assert_eq!(rx.try_recv().unwrap().operator, "in");
    }

    #[test]
    fn test_large_integers_compare_exactly() {
        let evaluator = ConditionEvaluator::new();
        let payload = json!({ "account": 9007199254740993u64, "limit": "9007199254740993" });

        assert!(!evaluator.evaluate_one(&Condition::equals("account", 9007199254740992u64), &payload));
        assert!(evaluator.evaluate_one(&Condition::equals("account", "9007199254740993"), &payload));
        assert!(evaluator.evaluate_one(&Condition::greater_than("account", 9007199254740992u64), &payload));
        assert!(evaluator.evaluate_one(&Condition::less_than("limit", u64::MAX), &payload));
    }

    #[test]
    fn test_operator_serde_round_trips_unknown_names() {
        let condition: Condition = serde_json::from_value(json!({
            "field": "amount", "operator": "matches", "value": "x"
        }))
        .unwrap();
        assert_eq!(condition.operator, ConditionOperator::Unknown("matches".into()));
        assert_eq!(serde_json::to_value(&condition).unwrap()["operator"], "matches");

        let known: ConditionOperator = serde_json::from_value(json!("greaterThan")).unwrap();
        assert_eq!(known, ConditionOperator::GreaterThan);
    }

    fn arb_operator() -> impl Strategy<Value = ConditionOperator> {
        prop_oneof![
            Just(ConditionOperator::Equals),
            Just(ConditionOperator::NotEquals),
            Just(ConditionOperator::GreaterThan),
            Just(ConditionOperator::LessThan),
            Just(ConditionOperator::Contains),
            "[a-z]{1,8}".prop_map(|name| ConditionOperator::from(name)),
        ]
    }

    fn arb_literal() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i64>().prop_map(|n| json!(n)),
            any::<bool>().prop_map(|b| json!(b)),
            "[a-z0-9.]{0,8}".prop_map(|s| json!(s)),
            Just(Value::Null),
        ]
    }

    proptest! {
        #[test]
        fn property_evaluation_is_total(
            path in "[a-z0-9.]{0,16}",
            operator in arb_operator(),
            literal in arb_literal(),
        ) {
            let evaluator = ConditionEvaluator::new();
            let condition = Condition { field: path, operator, value: literal };
            let _ = evaluator.evaluate_one(&condition, &payload());
        }

        #[test]
        fn property_missing_fields_never_match(
            field in "zz[a-z]{1,8}",
            operator in arb_operator(),
            literal in arb_literal(),
        ) {
            let evaluator = ConditionEvaluator::new();
            let condition = Condition { field, operator, value: literal };
            prop_assert!(!evaluator.evaluate_one(&condition, &payload()));
        }

        #[test]
        fn property_equals_and_not_equals_are_complementary(n in any::<i32>(), m in any::<i32>()) {
            let evaluator = ConditionEvaluator::new();
            let payload = json!({ "value": n });
            let eq = evaluator.evaluate_one(&Condition::equals("value", m), &payload);
            let ne = evaluator.evaluate_one(&Condition::not_equals("value", m), &payload);
            prop_assert_ne!(eq, ne);
        }
    }
}
