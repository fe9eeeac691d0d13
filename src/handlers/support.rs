//! Helpers shared by the node handlers: config access with template
//! resolution, condition evaluation, and lenient timestamp parsing.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

use crate::error::NodeError;
use crate::model::{ExecutionContext, Node};
use crate::template;

/// Read a string config value with `{{path}}` templates resolved against
/// the execution variables.
pub(super) fn resolved(node: &Node, ctx: &ExecutionContext, key: &str) -> Option<String> {
    node.config_str(key)
        .map(|raw| template::resolve(raw, &ctx.variables))
}

pub(super) fn require_resolved(
    node: &Node,
    ctx: &ExecutionContext,
    key: &str,
) -> Result<String, NodeError> {
    resolved(node, ctx, key)
        .ok_or_else(|| NodeError::ConfigError(format!("missing required field: {key}")))
}

/// Resolve a nested config map, leaving non-string leaves untouched.
pub(super) fn resolved_map(node: &Node, ctx: &ExecutionContext, key: &str) -> Option<Value> {
    node.config
        .get(key)
        .map(|v| template::resolve_map(v, &ctx.variables))
}

pub(super) fn string_items(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().map(template::stringify).collect(),
        Value::String(s) => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Operator table used by condition and filter nodes. A null actual value
/// satisfies only the null/empty checks.
pub(super) fn evaluate_condition(
    actual: Option<&Value>,
    operator: &str,
    expected: Option<&Value>,
) -> bool {
    let actual = match actual {
        Some(v) if !v.is_null() => v,
        _ => return matches!(operator, "is_null" | "is_empty"),
    };
    let actual_str = template::stringify(actual);
    let expected_str = expected.map(template::stringify).unwrap_or_default();

    match operator {
        "equals" | "==" => values_equal(actual, &actual_str, expected, &expected_str),
        "not_equals" | "!=" => !values_equal(actual, &actual_str, expected, &expected_str),
        "contains" => actual_str.contains(&expected_str),
        "not_contains" => !actual_str.contains(&expected_str),
        "starts_with" => actual_str.starts_with(&expected_str),
        "ends_with" => actual_str.ends_with(&expected_str),
        "greater_than" | ">" => compare_numeric(&actual_str, &expected_str) == Some(Ordering::Greater),
        "less_than" | "<" => compare_numeric(&actual_str, &expected_str) == Some(Ordering::Less),
        "greater_than_or_equal" | ">=" => {
            matches!(
                compare_numeric(&actual_str, &expected_str),
                Some(Ordering::Greater | Ordering::Equal)
            )
        }
        "less_than_or_equal" | "<=" => {
            matches!(
                compare_numeric(&actual_str, &expected_str),
                Some(Ordering::Less | Ordering::Equal)
            )
        }
        "is_null" => false,
        "is_not_null" => true,
        "is_empty" => actual_str.is_empty(),
        "is_not_empty" => !actual_str.is_empty(),
        "in" => expected
            .and_then(Value::as_array)
            .map(|list| list.iter().any(|v| template::stringify(v) == actual_str))
            .unwrap_or(false),
        "not_in" => expected
            .and_then(Value::as_array)
            .map(|list| list.iter().all(|v| template::stringify(v) != actual_str))
            .unwrap_or(true),
        _ => false,
    }
}

fn values_equal(actual: &Value, actual_str: &str, expected: Option<&Value>, expected_str: &str) -> bool {
    if let Some(expected) = expected {
        if actual == expected {
            return true;
        }
    }
    // Numbers and their string renderings compare equal.
    actual_str == expected_str || compare_numeric(actual_str, expected_str) == Some(Ordering::Equal)
}

fn compare_numeric(a: &str, b: &str) -> Option<Ordering> {
    let a: f64 = a.parse().ok()?;
    let b: f64 = b.parse().ok()?;
    a.partial_cmp(&b)
}

/// Ordering used by sort_collection: numeric when both sides parse,
/// otherwise lexicographic. Nulls sort first.
pub(super) fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => {
            let a = template::stringify(a);
            let b = template::stringify(b);
            compare_numeric(&a, &b).unwrap_or_else(|| a.cmp(&b))
        }
    }
}

pub(super) fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Null => false,
        _ => true,
    }
}

/// Accept RFC 3339 plus the date formats workflow authors commonly paste.
pub(super) fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }
    None
}
