//! Result extraction from noisy process output.
//!
//! Strategies, most to least trusted:
//! 1. Payload captured by the streaming marker scanner
//! 2. Marker search over the whole stdout
//! 3. Last line that parses as a result-shaped JSON object
//! 4. Last balanced `{...}` block that parses as one
//!
//! If none matches, the caller gets an excerpt of the raw output.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use super::markers::{MarkerScanner, Markers};
use super::ExecutionResult;

/// Longest raw-output excerpt attached to a parse failure.
const EXCERPT_CHARS: usize = 500;

#[derive(Debug, Error, PartialEq)]
pub enum ExtractError {
    #[error("no result found in screener output")]
    NoResult { excerpt: String },
}

/// Recover an [`ExecutionResult`] from a run's stdout.
///
/// `execution_time` is left at zero for the caller to fill in.
pub fn extract(
    stdout: &str,
    markers: &Markers,
    captured: Option<&str>,
) -> Result<ExecutionResult, ExtractError> {
    if let Some(result) = captured.and_then(parse_marker_payload) {
        debug!(strategy = "stream_capture", "Extracted screener result");
        return Ok(result);
    }

    if let Some(result) = MarkerScanner::scan(markers, stdout)
        .as_deref()
        .and_then(parse_marker_payload)
    {
        debug!(strategy = "marker_search", "Extracted screener result");
        return Ok(result);
    }

    if let Some(result) = scan_lines(stdout) {
        debug!(strategy = "line_scan", "Extracted screener result");
        return Ok(result);
    }

    if let Some(result) = scan_braces(stdout) {
        debug!(strategy = "brace_scan", "Extracted screener result");
        return Ok(result);
    }

    Err(ExtractError::NoResult {
        excerpt: zero_common::util::tail_with_ellipsis(stdout.trim(), EXCERPT_CHARS),
    })
}

/// A marker payload is authoritative: any JSON object is accepted.
fn parse_marker_payload(payload: &str) -> Option<ExecutionResult> {
    match serde_json::from_str::<Value>(payload.trim()) {
        Ok(Value::Object(obj)) => Some(coerce(obj)),
        _ => None,
    }
}

/// Outside markers, only objects that look like a result count.
fn parse_result_shaped(candidate: &str) -> Option<ExecutionResult> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(obj)) if looks_like_result(&obj) => Some(coerce(obj)),
        _ => None,
    }
}

fn looks_like_result(obj: &Map<String, Value>) -> bool {
    obj.contains_key("matches") || obj.get("success") == Some(&Value::Bool(false))
}

fn scan_lines(stdout: &str) -> Option<ExecutionResult> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{') && line.ends_with('}'))
        .find_map(parse_result_shaped)
}

/// Every balanced `{...}` span, ignoring braces inside JSON strings.
fn balanced_blocks(text: &str) -> Vec<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut stack: Vec<usize> = Vec::new();
    let mut blocks = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match b {
            // Quotes only open strings inside a candidate object
            b'"' if !stack.is_empty() => in_string = true,
            b'{' => stack.push(i),
            b'}' => {
                if let Some(start) = stack.pop() {
                    blocks.push((start, i + 1));
                }
            }
            _ => {}
        }
    }

    blocks
}

fn scan_braces(stdout: &str) -> Option<ExecutionResult> {
    let mut blocks = balanced_blocks(stdout);
    // Latest-ending first; for a shared end, the outermost first
    blocks.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    blocks
        .into_iter()
        .find_map(|(start, end)| parse_result_shaped(&stdout[start..end]))
}

fn as_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Force an arbitrary object into the result shape.
fn coerce(mut obj: Map<String, Value>) -> ExecutionResult {
    let matches = match obj.remove("matches") {
        Some(Value::Array(items)) => items.into_iter().map(as_text).collect(),
        _ => Vec::new(),
    };

    let details = match obj.remove("details") {
        Some(Value::Object(details)) => details,
        _ => Map::new(),
    };

    let error = match obj.remove("error") {
        None | Some(Value::Null) => None,
        Some(other) => Some(as_text(other)),
    };

    let error = match (error, obj.get("success")) {
        (Some(e), _) => Some(e),
        (None, Some(Value::Bool(false))) => Some("Screener reported failure".to_string()),
        (None, _) => None,
    };

    ExecutionResult {
        matches,
        details,
        execution_time: 0.0,
        error,
    }
}
