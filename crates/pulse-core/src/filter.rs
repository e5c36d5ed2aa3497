//! Subscription filter predicates.
//!
//! A filter references a field of the message payload by dot path and
//! compares it against a constant with one of six operators. Filters are
//! carried on the wire in subscribe control frames and also evaluated
//! client-side on dispatch, so a registration only sees payloads that
//! match all of its filters.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operator of a filter predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterOp {
    /// Field equals the constant exactly.
    Equals,
    /// String field contains the constant substring, or array field
    /// contains the constant element.
    Contains,
    /// String field starts with the constant.
    StartsWith,
    /// String field ends with the constant.
    EndsWith,
    /// Field is one of the constants (constant must be an array).
    In,
    /// Field is none of the constants (constant must be an array).
    NotIn,
}

/// One filter predicate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSpec {
    /// Dot path into the payload (e.g. `"labels.region"`).
    pub field: String,
    /// Comparison operator.
    pub op: FilterOp,
    /// Constant to compare against.
    pub value: Value,
}

impl FilterSpec {
    /// Build a filter predicate.
    #[must_use]
    pub fn new(field: impl Into<String>, op: FilterOp, value: Value) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    /// Evaluate this predicate against a payload.
    ///
    /// A missing field never matches (for `NotIn` a missing field matches,
    /// since the field is trivially not in the set).
    #[must_use]
    pub fn matches(&self, payload: &Value) -> bool {
        let field = lookup(payload, &self.field);
        match self.op {
            FilterOp::Equals => field.is_some_and(|f| f == &self.value),
            FilterOp::Contains => field.is_some_and(|f| contains(f, &self.value)),
            FilterOp::StartsWith => {
                matches_str(field, &self.value, |f, v| f.starts_with(v))
            }
            FilterOp::EndsWith => matches_str(field, &self.value, |f, v| f.ends_with(v)),
            FilterOp::In => field.is_some_and(|f| in_set(f, &self.value)),
            FilterOp::NotIn => !field.is_some_and(|f| in_set(f, &self.value)),
        }
    }
}

/// Resolve a dot path against a JSON value.
fn lookup<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = payload;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn matches_str(
    field: Option<&Value>,
    value: &Value,
    pred: impl Fn(&str, &str) -> bool,
) -> bool {
    match (field.and_then(Value::as_str), value.as_str()) {
        (Some(f), Some(v)) => pred(f, v),
        _ => false,
    }
}

fn contains(field: &Value, value: &Value) -> bool {
    match field {
        Value::String(s) => value.as_str().is_some_and(|v| s.contains(v)),
        Value::Array(items) => items.contains(value),
        _ => false,
    }
}

fn in_set(field: &Value, value: &Value) -> bool {
    value
        .as_array()
        .is_some_and(|candidates| candidates.contains(field))
}

/// Whether a payload passes every filter in a list.
#[must_use]
pub fn matches_all(filters: &[FilterSpec], payload: &Value) -> bool {
    filters.iter().all(|f| f.matches(payload))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
