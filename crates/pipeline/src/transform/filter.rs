//! Record filters. A record that fails any filter is dropped.

use std::cmp::Ordering;

use ledgerflow_core::{FilterOp, FilterRule};
use serde_json::{Map, Value};

use crate::fields::{get_path, values_equal};

/// Whether `record` passes `rule`.
pub fn matches(rule: &FilterRule, record: &Map<String, Value>) -> bool {
    let field = get_path(record, &rule.field).filter(|v| !v.is_null());
    match rule.op {
        FilterOp::Exists => field.is_some(),
        FilterOp::Eq => field.is_some_and(|v| values_equal(v, &rule.value)),
        FilterOp::Ne => !field.is_some_and(|v| values_equal(v, &rule.value)),
        FilterOp::Gt => compare(field, &rule.value) == Some(Ordering::Greater),
        FilterOp::Gte => matches!(compare(field, &rule.value), Some(Ordering::Greater | Ordering::Equal)),
        FilterOp::Lt => compare(field, &rule.value) == Some(Ordering::Less),
        FilterOp::Lte => matches!(compare(field, &rule.value), Some(Ordering::Less | Ordering::Equal)),
        FilterOp::Contains => field.is_some_and(|v| contains(v, &rule.value)),
        FilterOp::NotContains => !field.is_some_and(|v| contains(v, &rule.value)),
    }
}

/// Numbers compare numerically, strings lexicographically; anything else is
/// incomparable and fails ordering filters.
fn compare(field: Option<&Value>, expected: &Value) -> Option<Ordering> {
    match (field?, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::String(h), Value::String(n)) => h.contains(n.as_str()),
        (Value::Array(items), n) => items.iter().any(|item| values_equal(item, n)),
        (Value::Object(map), Value::String(key)) => map.contains_key(key),
        _ => false,
    }
}
