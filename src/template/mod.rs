//! Variable resolution: `{{path.to.value}}` templates over the execution
//! scope.
//!
//! Resolution is intentionally side-effect-free and total: a malformed or
//! missing path yields an empty string, never an error, because templates
//! over optional data are common.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

fn variable_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{([^}]+)\}\}").unwrap())
}

/// Replace every `{{path}}` occurrence with the stringified value found by
/// walking `path` as dot-separated keys into `variables`.
pub fn resolve(template: &str, variables: &BTreeMap<String, Value>) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }

    variable_pattern()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let path = caps[1].trim();
            resolve_path(path, variables)
                .map(stringify)
                .unwrap_or_default()
        })
        .into_owned()
}

/// Walk a dotted path into the variable scope, returning the raw value.
pub fn resolve_path<'a>(path: &str, variables: &'a BTreeMap<String, Value>) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = variables.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Recursively resolve every string-valued entry of a nested mapping.
pub fn resolve_map(map: &Value, variables: &BTreeMap<String, Value>) -> Value {
    match map {
        Value::String(s) => Value::String(resolve(s, variables)),
        Value::Object(obj) => Value::Object(
            obj.iter()
                .map(|(k, v)| (k.clone(), resolve_map(v, variables)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| resolve_map(v, variables)).collect())
        }
        other => other.clone(),
    }
}

/// Stringify a value the way it should appear inside a template: bare
/// strings without quotes, everything else as compact JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
