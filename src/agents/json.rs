//! Tolerant JSON extraction from model responses.
//!
//! Models wrap JSON in ```json fences or add a sentence before it despite
//! being told not to. We strip the fence if present, otherwise take the span
//! from the first `{` to the last `}`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;

use crate::error::{AgentError, AgentRole};

static FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*\n(.*?)\n?```").unwrap());

/// Locate the JSON object inside `text`.
pub fn extract_json(text: &str) -> Option<&str> {
    if let Some(caps) = FENCED.captures(text) {
        if let Some(body) = caps.get(1) {
            let body = body.as_str().trim();
            if body.starts_with('{') || body.starts_with('[') {
                return Some(body);
            }
        }
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse a typed value out of a model response.
pub fn parse_response<T: DeserializeOwned>(role: AgentRole, text: &str) -> Result<T, AgentError> {
    let body = extract_json(text)
        .ok_or_else(|| AgentError::malformed(role, "response contains no JSON object"))?;
    serde_json::from_str(body)
        .map_err(|e| AgentError::malformed(role, format!("invalid JSON: {e}")))
}

/// Strip a surrounding code fence from a non-JSON payload (e.g. LaTeX).
pub fn strip_fence(text: &str) -> &str {
    let t = text.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or("");
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}
