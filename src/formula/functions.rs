//! Built-in formula functions: math, string, date, logical, utility.

use chrono::{Datelike, NaiveDate};
use tracing::warn;

use crate::error::NodeError;
use crate::runtime::RuntimeContext;

const DATE_FMT: &str = "%Y-%m-%d";
const DATETIME_FMT: &str = "%Y-%m-%dT%H:%M:%S";

/// Evaluate one built-in call on already-substituted, comma-split arguments.
/// Unknown function names log a warning and fall through to the raw argument
/// string, matching the engine's lenient evaluation policy.
pub fn evaluate_function(
    name: &str,
    args: &[String],
    runtime: &RuntimeContext,
) -> Result<String, NodeError> {
    let result = match name {
        // Math
        "ABS" => num(args, 0)?.abs().to_string(),
        "ROUND" => {
            let decimals = if args.len() > 1 { int(args, 1)? } else { 0 };
            round_half_up(num(args, 0)?, decimals).to_string()
        }
        "CEIL" => num(args, 0)?.ceil().to_string(),
        "FLOOR" => num(args, 0)?.floor().to_string(),
        "MAX" => fold_nums(args, f64::NEG_INFINITY, f64::max)?.to_string(),
        "MIN" => fold_nums(args, f64::INFINITY, f64::min)?.to_string(),
        "SUM" => fold_nums(args, 0.0, |a, b| a + b)?.to_string(),
        "AVG" => {
            let sum = fold_nums(args, 0.0, |a, b| a + b)?;
            (sum / args.len().max(1) as f64).to_string()
        }

        // String
        "UPPER" => arg(args, 0)?.to_uppercase(),
        "LOWER" => arg(args, 0)?.to_lowercase(),
        "TRIM" => arg(args, 0)?.trim().to_string(),
        "LEN" => arg(args, 0)?.chars().count().to_string(),
        "CONCAT" => args.concat(),
        "SUBSTRING" => {
            let s = arg(args, 0)?;
            let start = int(args, 1)?.max(0) as usize;
            let end = if args.len() > 2 {
                int(args, 2)?.max(0) as usize
            } else {
                s.chars().count()
            };
            s.chars()
                .skip(start)
                .take(end.saturating_sub(start))
                .collect()
        }
        "REPLACE" => arg(args, 0)?.replace(arg(args, 1)?, arg(args, 2)?),

        // Date
        "NOW" => runtime.now().naive_utc().format(DATETIME_FMT).to_string(),
        "TODAY" => runtime.now().date_naive().format(DATE_FMT).to_string(),
        "DATE_ADD" => {
            let days = int(args, 1)?;
            (date(args, 0)? + chrono::Duration::days(days))
                .format(DATE_FMT)
                .to_string()
        }
        "DATE_DIFF" => (date(args, 1)? - date(args, 0)?).num_days().to_string(),
        "YEAR" => date(args, 0)?.year().to_string(),
        "MONTH" => date(args, 0)?.month().to_string(),
        "DAY" => date(args, 0)?.day().to_string(),

        // Logical
        "IF" => {
            if boolean(args, 0) {
                arg(args, 1)?.clone()
            } else {
                arg(args, 2)?.clone()
            }
        }
        "AND" => args.iter().all(|a| a == "true").to_string(),
        "OR" => args.iter().any(|a| a == "true").to_string(),
        "NOT" => (!boolean(args, 0)).to_string(),

        // Utility
        "ISBLANK" => {
            let blank = args.is_empty() || args[0].trim().is_empty() || args[0] == "null";
            blank.to_string()
        }
        "ISNUMBER" => arg(args, 0)?.parse::<f64>().is_ok().to_string(),

        other => {
            warn!(function = other, "Unknown formula function");
            args.join(", ")
        }
    };
    Ok(result)
}

/// Half-up rounding to a fixed number of decimal places.
fn round_half_up(value: f64, decimals: i64) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

fn arg<'a>(args: &'a [String], idx: usize) -> Result<&'a String, NodeError> {
    args.get(idx)
        .ok_or_else(|| NodeError::FormulaError(format!("Missing argument {}", idx)))
}

fn num(args: &[String], idx: usize) -> Result<f64, NodeError> {
    let raw = arg(args, idx)?;
    raw.parse::<f64>()
        .map_err(|_| NodeError::FormulaError(format!("Not a number: {}", raw)))
}

fn int(args: &[String], idx: usize) -> Result<i64, NodeError> {
    let raw = arg(args, idx)?;
    raw.parse::<i64>()
        .map_err(|_| NodeError::FormulaError(format!("Not an integer: {}", raw)))
}

fn boolean(args: &[String], idx: usize) -> bool {
    args.get(idx).map(|a| a == "true").unwrap_or(false)
}

fn date(args: &[String], idx: usize) -> Result<NaiveDate, NodeError> {
    let raw = arg(args, idx)?;
    NaiveDate::parse_from_str(raw, DATE_FMT)
        .map_err(|_| NodeError::FormulaError(format!("Invalid date: {}", raw)))
}

fn fold_nums(args: &[String], init: f64, op: fn(f64, f64) -> f64) -> Result<f64, NodeError> {
    let mut acc = init;
    for idx in 0..args.len() {
        acc = op(acc, num(args, idx)?);
    }
    Ok(acc)
}
