//! Relaxed parsing of LLM emissions into numbers and booleans.
//!
//! Models asked for "a number" routinely answer "score: 7" or wrap the value
//! in quotes. Direct parsing is tried first; a regex then extracts the first
//! signed decimal out of non-numeric strings. Both the numeric transition
//! operators and the `prompt_to_int`/`float`/`bool` handlers share these
//! rules.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::EngineError;

static FIRST_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("static regex compiles"));

fn trimmed(s: &str) -> &str {
    s.trim().trim_matches(|c| c == '"' || c == '\'').trim()
}

/// Parses a float, falling back to the first signed decimal in the string.
pub fn parse_float_relaxed(s: &str) -> Result<f64, EngineError> {
    let t = trimmed(s);
    if let Ok(f) = t.parse::<f64>() {
        return Ok(f);
    }
    FIRST_NUMBER
        .find(t)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .ok_or_else(|| EngineError::Execution(format!("no number found in {s:?}")))
}

/// Parses an integer with the same relaxed rules.
///
/// A fractional extraction ("3.7") is rejected rather than silently
/// truncated.
pub fn parse_int_relaxed(s: &str) -> Result<i64, EngineError> {
    let t = trimmed(s);
    if let Ok(i) = t.parse::<i64>() {
        return Ok(i);
    }
    let f = parse_float_relaxed(t)?;
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Ok(f as i64)
    } else {
        Err(EngineError::Execution(format!(
            "no integer found in {s:?}"
        )))
    }
}

/// Parses a boolean from common LLM phrasings.
pub fn parse_bool_relaxed(s: &str) -> Result<bool, EngineError> {
    match trimmed(s).to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Ok(true),
        "false" | "no" | "n" | "0" => Ok(false),
        _ => Err(EngineError::Execution(format!(
            "no boolean found in {s:?}"
        ))),
    }
}
