use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, Request},
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::convert::Infallible;

use crate::orchestrator::ActionError;

/// JSON body that never rejects: empty, malformed or non-object bodies read as `{}`.
#[derive(Debug, Clone, PartialEq)]
pub struct LenientJson(pub Value);

pub fn parse_body(bytes: &[u8]) -> Value {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => Value::Object(map),
        _ => Value::Object(Map::new()),
    }
}

#[async_trait]
impl<S> FromRequest<S> for LenientJson
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let body = match Bytes::from_request(req, state).await {
            Ok(bytes) => parse_body(&bytes),
            Err(_) => Value::Object(Map::new()),
        };
        Ok(Self(body))
    }
}

/// Map a lenient body onto an action's request type.
pub fn decode<T: DeserializeOwned>(body: Value) -> Result<T, ActionError> {
    serde_json::from_value(body)
        .map_err(|err| ActionError::BadRequest(format!("Cuerpo inválido: {err}")))
}
