//! Formula expression interpreter.
//!
//! Three-stage pipeline: substitute `{{path}}` variables, expand built-in
//! `FUNC(args)` calls, then evaluate the remaining scalar or single-operator
//! expression. This is deliberately not a full-precedence parser: nodes carry
//! one condition each, so a single-operator-per-expression evaluator covers
//! the real usage while staying trivially auditable.

mod functions;

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::NodeError;
use crate::runtime::RuntimeContext;
use crate::template;

pub use functions::evaluate_function;

fn function_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"([A-Z_]+)\(([^)]*)\)").unwrap())
}

/// Operators in fixed scan order; the first one found in the expression wins
/// and is applied left-to-right.
const OPERATORS: [&str; 10] = ["+", "-", "*", "/", ">=", "<=", ">", "<", "==", "!="];

pub struct FormulaEngine {
    runtime: RuntimeContext,
}

impl FormulaEngine {
    pub fn new(runtime: RuntimeContext) -> Self {
        Self { runtime }
    }

    /// Evaluate a formula against the variable scope.
    pub fn evaluate(
        &self,
        formula: &str,
        variables: &BTreeMap<String, Value>,
    ) -> Result<Value, NodeError> {
        debug!(formula, "Evaluating formula");

        let substituted = substitute_variables(formula, variables);
        let expanded = self.expand_functions(&substituted)?;
        let result = evaluate_expression(expanded.trim())?;

        debug!(?result, "Formula result");
        Ok(result)
    }

    /// Cheap pre-check: non-empty and balanced parentheses. Deeper syntax
    /// errors surface at evaluation time as a failed result.
    pub fn validate_formula(formula: &str) -> bool {
        if formula.trim().is_empty() {
            return false;
        }
        let mut open = 0i32;
        for c in formula.chars() {
            match c {
                '(' => open += 1,
                ')' => {
                    open -= 1;
                    if open < 0 {
                        return false;
                    }
                }
                _ => {}
            }
        }
        open == 0
    }

    /// Single expansion pass over `FUNC(args)` calls. Arguments arrive
    /// already substituted, comma-split and unquoted.
    fn expand_functions(&self, formula: &str) -> Result<String, NodeError> {
        let mut out = String::with_capacity(formula.len());
        let mut last = 0;
        for caps in function_pattern().captures_iter(formula) {
            let m = caps.get(0).unwrap();
            out.push_str(&formula[last..m.start()]);
            let args = split_args(&caps[2]);
            out.push_str(&functions::evaluate_function(&caps[1], &args, &self.runtime)?);
            last = m.end();
        }
        out.push_str(&formula[last..]);
        Ok(out)
    }
}

/// Replace `{{path}}` occurrences with literal values. Strings are quoted so
/// the expression stage can distinguish them from identifiers; missing paths
/// become `null`.
fn substitute_variables(formula: &str, variables: &BTreeMap<String, Value>) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r"\{\{([^}]+)\}\}").unwrap());

    pattern
        .replace_all(formula, |caps: &regex::Captures<'_>| {
            match template::resolve_path(caps[1].trim(), variables) {
                Some(Value::String(s)) => format!("\"{}\"", s),
                Some(Value::Null) | None => "null".to_string(),
                Some(other) => other.to_string(),
            }
        })
        .into_owned()
}

fn split_args(raw: &str) -> Vec<String> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    raw.split(',').map(|a| unquote(a.trim())).collect()
}

fn unquote(s: &str) -> String {
    let stripped = s
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| s.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')));
    stripped.unwrap_or(s).to_string()
}

fn evaluate_expression(expression: &str) -> Result<Value, NodeError> {
    // An unknown zero-arg function expands to nothing; verbatim like any
    // other non-expression.
    if expression.is_empty() {
        return Ok(Value::String(String::new()));
    }
    // Literals short-circuit.
    match expression {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        "null" => return Ok(Value::Null),
        _ => {}
    }
    if is_string_literal(expression, '"') || is_string_literal(expression, '\'') {
        return Ok(Value::String(expression[1..expression.len() - 1].to_string()));
    }
    if let Some(n) = parse_number(expression) {
        return Ok(n);
    }

    for op in OPERATORS {
        // A leading minus is a sign, not the subtraction operator.
        let found = if op == "-" {
            expression.chars().skip(1).any(|c| c == '-')
        } else {
            expression.contains(op)
        };
        if !found {
            continue;
        }
        return apply_operator(expression, op);
    }

    // Neither literal nor operator expression: return verbatim.
    Ok(Value::String(expression.to_string()))
}

/// A whole-expression string literal: quoted at both ends with no interior
/// quote, so `"a" == "b"` still reaches the operator scan.
fn is_string_literal(expression: &str, quote: char) -> bool {
    expression.len() >= 2
        && expression.starts_with(quote)
        && expression.ends_with(quote)
        && !expression[1..expression.len() - 1].contains(quote)
}

fn apply_operator(expression: &str, op: &str) -> Result<Value, NodeError> {
    let parts: Vec<&str> = expression.split(op).map(str::trim).collect();
    match op {
        "+" | "-" | "*" | "/" => {
            let mut acc = parse_operand(parts[0])?;
            for part in &parts[1..] {
                let rhs = parse_operand(part)?;
                acc = match op {
                    "+" => acc + rhs,
                    "-" => acc - rhs,
                    "*" => acc * rhs,
                    _ => acc / rhs,
                };
            }
            Ok(number_value(acc))
        }
        ">=" | "<=" | ">" | "<" => {
            if parts.len() != 2 {
                return Err(NodeError::FormulaError(format!(
                    "Comparison needs exactly two operands: {}",
                    expression
                )));
            }
            let (a, b) = (parse_operand(parts[0])?, parse_operand(parts[1])?);
            let result = match op {
                ">=" => a >= b,
                "<=" => a <= b,
                ">" => a > b,
                _ => a < b,
            };
            Ok(Value::Bool(result))
        }
        "==" => Ok(Value::Bool(parts.len() == 2 && parts[0] == parts[1])),
        "!=" => Ok(Value::Bool(parts.len() == 2 && parts[0] != parts[1])),
        _ => unreachable!("operator table is fixed"),
    }
}

fn parse_operand(raw: &str) -> Result<f64, NodeError> {
    raw.parse::<f64>()
        .map_err(|_| NodeError::FormulaError(format!("Not a number: {}", raw)))
}

fn parse_number(expression: &str) -> Option<Value> {
    if expression.contains('.') {
        expression.parse::<f64>().ok().map(number_value)
    } else {
        expression.parse::<i64>().ok().map(|n| json!(n))
    }
}

/// Collapse whole-number float results to integers so `2 + 3` reads as `5`.
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < i64::MAX as f64 {
        json!(n as i64)
    } else {
        json!(n)
    }
}
