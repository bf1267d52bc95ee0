use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::errors::{EngineError, EngineResult};
use crate::config::EngineConfig;

/// Cookie and header carrying the engine's anti-CSRF token.
pub const CSRF_HEADER: &str = "X-Bonita-API-Token";

const USER_AGENT: &str = "pp-front/bonita-client";

/// An authenticated HTTP session with the process engine.
///
/// Built once per orchestrated action by [`EngineSession::login`]; the session
/// cookie lives in the client's cookie store and the CSRF token is replayed as a
/// header on every call.
#[derive(Debug, Clone)]
pub struct EngineSession {
    http: Client,
    base: String,
    csrf: Option<String>,
}

impl EngineSession {
    /// Log in with the service account from `config`.
    pub async fn login(config: &EngineConfig) -> EngineResult<Self> {
        let http = build_client(Duration::from_secs(config.timeout_secs))?;
        let base = config.base_url.trim_end_matches('/').to_string();

        let response = http
            .post(format!("{base}/loginservice"))
            .form(&[
                ("username", config.username.as_str()),
                ("password", config.password.as_str()),
                ("redirect", "false"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "engine login rejected");
            return Err(EngineError::LoginRejected {
                status: status.as_u16(),
            });
        }

        let csrf = response
            .cookies()
            .find(|cookie| cookie.name() == CSRF_HEADER)
            .map(|cookie| cookie.value().to_string());

        if csrf.is_none() {
            warn!("engine login succeeded without a CSRF cookie");
        }
        debug!(base = %base, "engine session established");

        Ok(Self { http, base, csrf })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    pub fn csrf_token(&self) -> Option<&str> {
        self.csrf.as_deref()
    }

    /// `{base}/API/{path}`
    pub fn api_url(&self, path: &str) -> String {
        format!("{}/API/{}", self.base, path.trim_start_matches('/'))
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.with_csrf(self.http.get(url))
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.with_csrf(self.http.post(url))
    }

    pub fn put(&self, url: &str) -> RequestBuilder {
        self.with_csrf(self.http.put(url))
    }

    fn with_csrf(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.csrf {
            Some(token) => request.header(CSRF_HEADER, token),
            None => request,
        }
    }
}

fn build_client(timeout: Duration) -> EngineResult<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    Ok(Client::builder()
        .cookie_store(true)
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .build()?)
}

/// Decode a response body the way the engine's API expects to be read:
/// 204 has no body, JSON is parsed, anything else (or malformed JSON) is `None`.
pub async fn decode_body(response: Response) -> Option<Value> {
    if response.status() == StatusCode::NO_CONTENT {
        return None;
    }

    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|ct| ct.to_str().ok())
        .map(|ct| ct.starts_with("application/json"))
        .unwrap_or(false);
    if !is_json {
        return None;
    }

    let text = response.text().await.ok()?;
    if text.trim().is_empty() {
        return None;
    }
    serde_json::from_str(&text).ok()
}

/// Turn a non-2xx response into [`EngineError::Status`].
pub async fn ensure_success(response: Response, operation: &str) -> EngineResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    crate::observability::engine_metrics().record_error();
    Err(EngineError::Status {
        operation: operation.to_string(),
        status: status.as_u16(),
        body: truncate(&body, 300),
    })
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}…")
    }
}
