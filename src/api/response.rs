use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use tracing::{error, info};

use crate::orchestrator::{ActionError, ActionReply, ActionResult};

impl IntoResponse for ActionReply {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::OK);
        (status, Json(self.into_json())).into_response()
    }
}

impl IntoResponse for ActionError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.envelope())).into_response()
    }
}

/// Log the outcome of an action and turn it into the HTTP response.
pub fn respond(action: &str, result: ActionResult) -> Response {
    match result {
        Ok(reply) => {
            info!(action, status = reply.status_code(), "action succeeded");
            reply.into_response()
        }
        Err(err) if err.status_code() >= 500 => {
            let body = err.envelope();
            error!(action, error = %err, detail = ?body.get("detail"), "action failed");
            err.into_response()
        }
        Err(err) => {
            info!(action, status = err.status_code(), error = %err, "action rejected");
            err.into_response()
        }
    }
}
