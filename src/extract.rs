//! Locating and repairing structured payloads inside oracle text.
//!
//! Oracle completions mix prose with JSON. Extraction runs in two steps:
//! locate a candidate substring, then parse it, applying a light repair pass
//! before giving up with `MalformedPayload`.

use crate::error::{Error, Result};
use crate::mlog_debug;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static JSON_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)```json\s*(.*?)\s*```").unwrap());

static CODE_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)```").unwrap());

static CONTROL_CHARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x00-\x1F\x7F]").unwrap());

/// Find the most likely payload substring in `text`.
///
/// Precedence: the body of the first ```` ```json ```` fence (case
/// insensitive), then the span from the first `{` to the last `}`, then the
/// whole text trimmed.
pub fn locate_payload(text: &str) -> &str {
    if let Some(body) = JSON_FENCE_RE.captures(text).and_then(|c| c.get(1)) {
        return body.as_str();
    }
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            return &text[start..=end];
        }
    }
    text.trim()
}

/// Parse `candidate` as JSON, repairing common oracle mistakes on failure.
///
/// The repair replaces single quotes with double quotes and strips ASCII
/// control characters. The repaired text must itself be valid JSON.
pub fn parse_payload(candidate: &str) -> Result<Value> {
    let strict_error = match serde_json::from_str::<Value>(candidate) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    let repaired = repair(candidate);
    match serde_json::from_str::<Value>(&repaired) {
        Ok(value) => {
            mlog_debug!("[extract] payload parsed after repair ({})", strict_error);
            Ok(value)
        }
        Err(e) => Err(Error::MalformedPayload(format!(
            "{} (after repair: {})",
            strict_error, e
        ))),
    }
}

/// Locate and parse a payload in one step.
///
/// # Errors
///
/// Returns `MalformedPayload` if no valid JSON can be recovered.
pub fn extract_payload(text: &str) -> Result<Value> {
    if text.trim().is_empty() {
        return Err(Error::MalformedPayload("empty response".to_string()));
    }
    parse_payload(locate_payload(text))
}

fn repair(candidate: &str) -> String {
    let quoted = candidate.replace('\'', "\"");
    CONTROL_CHARS_RE.replace_all(&quoted, "").into_owned()
}

/// Body of the first fenced code block, any language tag.
pub fn extract_code_block(text: &str) -> Option<&str> {
    CODE_FENCE_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}
