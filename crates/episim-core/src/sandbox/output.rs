//! Parsing of the artifact's stdout document.
//!
//! Two shapes are accepted:
//!
//! ```text
//! {"t": [0, 1, ...], "S": [...], "I": [...], "R": [...]}   // named
//! {"t": [0, 1, ...], "y": [[...], [...], [...]]}           // positional, spec order
//! ```
//!
//! A document that is not JSON at all is a crash; a JSON document with the
//! wrong shape is a contract violation and is never coerced.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use super::error::ExecutionFailure;
use crate::domain::Trajectory;

const TIME_KEY: &str = "t";
const POSITIONAL_KEY: &str = "y";

/// Parse `stdout` into a trajectory whose series follow `compartments` order.
pub fn parse_trajectory(
    stdout: &[u8],
    compartments: &[String],
) -> Result<Trajectory, ExecutionFailure> {
    let doc: Value = serde_json::from_slice(stdout).map_err(|e| {
        ExecutionFailure::crash(format!("output is not a JSON document: {e}"), None, Some(0))
    })?;
    let obj = doc.as_object().ok_or_else(|| {
        ExecutionFailure::contract_violation("output must be a JSON object keyed by `t` and compartment names")
    })?;

    let times = numeric_array(obj.get(TIME_KEY), TIME_KEY)?;
    if times.is_empty() {
        return Err(ExecutionFailure::contract_violation(
            "output contains no time points",
        ));
    }

    let positional = obj.contains_key(POSITIONAL_KEY)
        && !compartments.iter().any(|c| c == POSITIONAL_KEY);
    let series = if positional {
        positional_series(obj, compartments)?
    } else {
        named_series(obj, compartments)?
    };

    for (name, values) in compartments.iter().zip(&series) {
        if values.len() != times.len() {
            return Err(ExecutionFailure::contract_violation(format!(
                "series `{name}` has {} values but `t` has {}",
                values.len(),
                times.len()
            )));
        }
    }

    Ok(Trajectory::clamped(times, compartments.to_vec(), series))
}

fn named_series(
    obj: &Map<String, Value>,
    compartments: &[String],
) -> Result<Vec<Vec<f64>>, ExecutionFailure> {
    let expected: BTreeSet<&str> = compartments.iter().map(String::as_str).collect();
    let declared: BTreeSet<&str> = obj
        .keys()
        .map(String::as_str)
        .filter(|k| *k != TIME_KEY)
        .collect();

    if declared != expected {
        let missing: Vec<&str> = expected.difference(&declared).copied().collect();
        let unexpected: Vec<&str> = declared.difference(&expected).copied().collect();
        return Err(ExecutionFailure::contract_violation(format!(
            "output compartments {:?} do not match specification {:?} (missing: {:?}, unexpected: {:?})",
            declared, compartments, missing, unexpected
        )));
    }

    compartments
        .iter()
        .map(|name| numeric_array(obj.get(name), name))
        .collect()
}

fn positional_series(
    obj: &Map<String, Value>,
    compartments: &[String],
) -> Result<Vec<Vec<f64>>, ExecutionFailure> {
    let extra: Vec<&str> = obj
        .keys()
        .map(String::as_str)
        .filter(|k| *k != TIME_KEY && *k != POSITIONAL_KEY)
        .collect();
    if !extra.is_empty() {
        return Err(ExecutionFailure::contract_violation(format!(
            "positional output must only contain `t` and `y`, found {extra:?}"
        )));
    }

    let rows = obj
        .get(POSITIONAL_KEY)
        .and_then(Value::as_array)
        .ok_or_else(|| ExecutionFailure::contract_violation("`y` must be an array of series"))?;
    if rows.len() != compartments.len() {
        return Err(ExecutionFailure::contract_violation(format!(
            "`y` has {} series but the specification declares {} compartments",
            rows.len(),
            compartments.len()
        )));
    }

    rows.iter()
        .zip(compartments)
        .map(|(row, name)| numeric_array(Some(row), name))
        .collect()
}

fn numeric_array(value: Option<&Value>, key: &str) -> Result<Vec<f64>, ExecutionFailure> {
    let items = value.and_then(Value::as_array).ok_or_else(|| {
        ExecutionFailure::contract_violation(format!("`{key}` must be an array of numbers"))
    })?;
    items
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_f64().filter(|f| f.is_finite()).ok_or_else(|| {
                ExecutionFailure::contract_violation(format!(
                    "`{key}`[{i}] is not a finite number: {v}"
                ))
            })
        })
        .collect()
}
