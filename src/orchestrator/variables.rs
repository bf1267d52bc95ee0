// Reading values the engine's connectors leave behind in case variables.
// Absent, empty or malformed variables read as "nothing yet", never as failures.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::debug;

use crate::engine::{decode_list, parse_optional_json, poll_until, value_as_text, EngineGateway, EngineResult, PollSpec};

static EMBEDDED_ID: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#""id"\s*:\s*"?(\d+)"#).ok());

pub async fn read_text(gateway: &EngineGateway, case_id: &str, name: &str) -> EngineResult<Option<String>> {
    Ok(gateway
        .get_case_variable(case_id, name)
        .await?
        .and_then(|var| var.text()))
}

pub async fn read_json(gateway: &EngineGateway, case_id: &str, name: &str) -> EngineResult<Option<Value>> {
    Ok(gateway
        .get_case_variable(case_id, name)
        .await?
        .and_then(|var| var.json()))
}

/// List stored in a variable; absent or non-list data yields an empty list.
pub async fn read_list(gateway: &EngineGateway, case_id: &str, name: &str) -> EngineResult<Vec<Value>> {
    Ok(gateway
        .get_case_variable(case_id, name)
        .await?
        .map(|var| decode_list(&var.value))
        .unwrap_or_default())
}

/// Identifier variable, with unset numeric variables (`0`) treated as absent.
pub async fn read_identifier(gateway: &EngineGateway, case_id: &str, name: &str) -> EngineResult<Option<String>> {
    Ok(read_text(gateway, case_id, name)
        .await?
        .filter(|id| id != "0"))
}

/// Wait for a connector to publish an id in `variable`.
///
/// When the wait runs out, the raw response the connector stored in
/// `body_variable` is searched for an `id` instead.
pub async fn await_identifier(
    gateway: &EngineGateway,
    case_id: &str,
    variable: &str,
    body_variable: &str,
    wait: PollSpec,
) -> EngineResult<Option<String>> {
    let found = poll_until(wait, || read_identifier(gateway, case_id, variable)).await?;
    if found.is_some() {
        return Ok(found);
    }

    debug!(case_id, variable, body_variable, "identifier not published; reading raw body");
    Ok(gateway
        .get_case_variable(case_id, body_variable)
        .await?
        .and_then(|var| identifier_from_body(&var.value)))
}

/// Extract an id from a connector response body stored as JSON text.
pub fn identifier_from_body(raw: &Value) -> Option<String> {
    let parsed = match raw {
        Value::String(text) => parse_optional_json(text),
        Value::Null => None,
        other => Some(other.clone()),
    };

    if let Some(id) = parsed.as_ref().and_then(find_id) {
        return Some(id);
    }

    let text = match raw {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    EMBEDDED_ID
        .as_ref()?
        .captures(&text)
        .map(|captures| captures[1].to_string())
}

fn find_id(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => map
            .get("id")
            .and_then(value_as_text)
            .or_else(|| {
                ["data", "proyecto", "pedido", "compromiso", "result"]
                    .iter()
                    .find_map(|key| map.get(*key).and_then(find_id))
            }),
        Value::Array(items) => items.first().and_then(find_id),
        _ => None,
    }
}
