//! Lenient decoding of structured data stored in case variables.
//!
//! Connectors stash API responses as strings, sometimes encoded twice. Absent or
//! malformed data is treated as empty, never as a failure.

use serde_json::Value;

/// Parse `raw` as JSON, unwrapping one extra level of string encoding.
pub fn parse_optional_json(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return None;
    }

    match serde_json::from_str::<Value>(trimmed).ok()? {
        Value::Null => None,
        Value::String(inner) => {
            let inner_trimmed = inner.trim();
            if inner_trimmed.starts_with('{') || inner_trimmed.starts_with('[') {
                serde_json::from_str(inner_trimmed).ok()
            } else {
                Some(Value::String(inner))
            }
        }
        other => Some(other),
    }
}

/// Same as [`parse_optional_json`] but for a value that may already be decoded.
pub fn decode_json_value(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(raw) => parse_optional_json(raw),
        other => Some(other.clone()),
    }
}

/// Decode into a list; anything that is not an array becomes empty.
pub fn decode_list(value: &Value) -> Vec<Value> {
    match decode_json_value(value) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

/// Render a scalar as text: strings as-is, numbers and booleans via `to_string`.
pub fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() || s == "null" {
                None
            } else {
                Some(s.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
