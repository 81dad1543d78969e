//! Extraction of `report_score` results from structured and textual tool calls.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Name of the scoring function declared in the session setup.
pub const SCORE_TOOL_NAME: &str = "report_score";

/// Upper bound of the score scale.
pub const SCORE_MAX: i64 = 10;

/// Parses `score` from structured tool-call arguments.
///
/// Accepts a JSON number or a numeric string (the upstream schema has sent
/// both) and clamps the result into `0..=10`. Anything else yields `None`,
/// in which case the call is still acknowledged but no score is reported.
pub fn score_from_args(args: &Value) -> Option<u8> {
    let raw = args.get("score")?;
    let value = match raw {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    Some(value.clamp(0, SCORE_MAX) as u8)
}

/// Fallback for models that emit code instead of a structured call: matches
/// a `report_score(score=N)` or `report_score(N)` shaped invocation anywhere
/// in the payload, e.g. `default_api.report_score(score=7)`.
pub fn score_from_code(code: &str) -> Option<u8> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"report_score\s*\(\s*(?:score\s*=\s*)?(\d+)\s*\)").expect("valid score pattern")
    });
    let value = pattern.captures(code)?.get(1)?.as_str().parse::<i64>().ok()?;
    Some(value.clamp(0, SCORE_MAX) as u8)
}
