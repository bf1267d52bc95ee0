use serde_json::Value;
use tracing::debug;

use super::{ActionResult, TaskOrchestrator};
use crate::downstream::{DownstreamClient, DownstreamError};
use crate::engine::{value_as_text, EngineGateway};

/// Case variable where the engine's login connector stores the downstream JWT.
pub const ACCESS_VARIABLE: &str = "access";

/// Token from the `access` variable: either the bare JWT or the login response
/// object carrying it.
pub fn token_from_access(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => ["access", "token", "access_token"]
            .iter()
            .find_map(|key| map.get(*key).and_then(value_as_text)),
        other => value_as_text(other),
    }
}

impl TaskOrchestrator {
    /// Downstream client authenticated with the token stored in `case_id`.
    pub(crate) async fn downstream_for_case(
        &self,
        gateway: &EngineGateway,
        case_id: &str,
    ) -> ActionResult<DownstreamClient> {
        let token = gateway
            .get_case_variable(case_id, ACCESS_VARIABLE)
            .await?
            .and_then(|var| {
                var.json()
                    .as_ref()
                    .and_then(token_from_access)
                    .or_else(|| var.text())
            })
            .ok_or_else(|| DownstreamError::MissingToken {
                case_id: case_id.to_string(),
            })?;

        debug!(case_id, "relaying downstream token from case");
        Ok(DownstreamClient::new(&self.config().downstream, &token)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_token_shapes() {
        assert_eq!(token_from_access(&json!("eyJ.a.b")).as_deref(), Some("eyJ.a.b"));
        assert_eq!(
            token_from_access(&json!({"access": "eyJ.c.d", "refresh": "r"})).as_deref(),
            Some("eyJ.c.d")
        );
        assert!(token_from_access(&json!({"refresh": "r"})).is_none());
        assert!(token_from_access(&json!("")).is_none());
    }
}
