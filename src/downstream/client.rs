use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::types::{MonthlyUsage, Observation};
use crate::config::DownstreamConfig;

#[derive(Debug, Error)]
pub enum DownstreamError {
    #[error("downstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("downstream API returned HTTP {status} for {operation}")]
    Status { operation: String, status: u16 },

    /// The engine has not stored an API token in the case yet.
    #[error("no downstream API token available in case {case_id}")]
    MissingToken { case_id: String },

    #[error("unexpected downstream response for {0}")]
    UnexpectedShape(String),
}

/// Read-only client for the JWT-secured business API.
///
/// The bearer token is the one the engine's own connector obtained and stored
/// in the case; this client only relays it.
#[derive(Debug, Clone)]
pub struct DownstreamClient {
    http: Client,
    base: String,
    token: String,
}

impl DownstreamClient {
    pub fn new(config: &DownstreamConfig, token: &str) -> Result<Self, DownstreamError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base: config.base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    async fn get(&self, path: &str, query: &[(&str, &str)], operation: &str) -> Result<Value, DownstreamError> {
        let url = format!("{}/{}", self.base, path.trim_start_matches('/'));
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownstreamError::Status {
                operation: operation.to_string(),
                status: status.as_u16(),
            });
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        response
            .json()
            .await
            .map_err(|_| DownstreamError::UnexpectedShape(operation.to_string()))
    }

    /// Observations of a project, oldest first as the API returns them.
    pub async fn list_observations(&self, proyecto_id: &str) -> Result<Vec<Observation>, DownstreamError> {
        let body = self
            .get(
                &format!("proyectos/{proyecto_id}/observaciones/"),
                &[],
                "observation list",
            )
            .await?;

        let items = unwrap_collection(body);
        let total = items.len();
        let observations: Vec<Observation> = items.iter().filter_map(Observation::from_value).collect();
        if observations.len() < total {
            warn!(
                proyecto_id,
                skipped = total - observations.len(),
                "observation list contained items that are not objects"
            );
        }
        Ok(observations)
    }

    /// Monthly usage from the authoritative endpoint; `None` when it cannot answer.
    pub async fn monthly_usage(&self, proyecto_id: &str) -> Option<MonthlyUsage> {
        let result = self
            .get(
                &format!("proyectos/{proyecto_id}/observaciones/limite/"),
                &[],
                "monthly observation limit",
            )
            .await;

        match result {
            Ok(body) => match serde_json::from_value::<MonthlyUsage>(body) {
                Ok(usage) => Some(usage),
                Err(err) => {
                    warn!(proyecto_id, error = %err, "monthly limit payload not understood");
                    None
                }
            },
            Err(err) => {
                warn!(proyecto_id, error = %err, "monthly limit endpoint unavailable");
                None
            }
        }
    }

    pub async fn list_projects_in_execution(&self) -> Result<Vec<Value>, DownstreamError> {
        let body = self
            .get("proyectos/", &[("estado", "en_ejecucion")], "projects in execution")
            .await?;
        let projects = unwrap_collection(body);
        debug!(count = projects.len(), "projects in execution fetched");
        Ok(projects)
    }
}

/// Accept either a bare list or a paginated envelope.
fn unwrap_collection(body: Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Object(mut map) => ["results", "observaciones", "proyectos", "data"]
            .iter()
            .find_map(|key| match map.remove(*key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}
