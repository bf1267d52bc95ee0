//! Shared stand-ins for the process engine and the downstream API.
//!
//! Each suite pulls this in with `mod fixtures;`, so not every helper is used
//! by every binary.
#![allow(dead_code)]

use serde_json::{json, Value};
use std::sync::Arc;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pp_front::config::{OrchestrationConfig, PpFrontConfig};
use pp_front::mirror::InMemoryMirror;
use pp_front::orchestrator::TaskOrchestrator;

pub const CSRF_TOKEN: &str = "tok-123";
pub const ACCESS_TOKEN: &str = "jwt-token";
pub const PLANNING_DEFINITION: &str = "777";
pub const COUNCIL_DEFINITION: &str = "888";
pub const ASSIGNEE_ID: &str = "4";

/// Mock of the engine REST API, mounted under `/bonita`.
pub struct EngineMock {
    pub server: MockServer,
    pub base_url: String,
}

impl EngineMock {
    /// Start a server that already accepts logins and knows the assignee and both processes.
    pub async fn new() -> Self {
        let server = MockServer::start().await;
        let base_url = format!("{}/bonita", server.uri());
        let mock = Self { server, base_url };

        mock.mock_login().await;
        mock.mock_process("ProjectPlanning", PLANNING_DEFINITION).await;
        mock.mock_process("Consejo Directivo", COUNCIL_DEFINITION).await;
        mock.mock_assignee("walter.bates", ASSIGNEE_ID).await;
        mock.mock_no_ready_tasks().await;
        mock
    }

    pub async fn mock_login(&self) {
        Mock::given(method("POST"))
            .and(path("/bonita/loginservice"))
            .respond_with(
                ResponseTemplate::new(204)
                    .append_header("Set-Cookie", "JSESSIONID=abc; Path=/bonita")
                    .append_header("Set-Cookie", format!("X-Bonita-API-Token={CSRF_TOKEN}; Path=/bonita").as_str()),
            )
            .mount(&self.server)
            .await;
    }

    pub async fn mock_process(&self, name: &str, definition_id: &str) {
        Mock::given(method("GET"))
            .and(path("/bonita/API/bpm/process"))
            .and(query_param("f", format!("name={name}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": definition_id, "name": name, "version": "1.0"}
            ])))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_instantiation(&self, definition_id: &str, case_id: u64) {
        Mock::given(method("POST"))
            .and(path(format!("/bonita/API/bpm/process/{definition_id}/instantiation")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"caseId": case_id})))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_case(&self, case_id: &str, state: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/bonita/API/bpm/case/{case_id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": case_id,
                "state": state,
                "processDefinitionId": PLANNING_DEFINITION,
            })))
            .mount(&self.server)
            .await;
    }

    /// A ready task for the case, served to every task query (named or not).
    pub async fn mock_ready_task(&self, case_id: &str, task_name: &str, task_id: &str) {
        self.ready_task(case_id, task_name, task_id, None).await;
    }

    /// Same as [`Self::mock_ready_task`], but consumed after `times` queries.
    pub async fn mock_ready_task_times(&self, case_id: &str, task_name: &str, task_id: &str, times: u64) {
        self.ready_task(case_id, task_name, task_id, Some(times)).await;
    }

    async fn ready_task(&self, case_id: &str, task_name: &str, task_id: &str, times: Option<u64>) {
        let mut mock = Mock::given(method("GET"))
            .and(path("/bonita/API/bpm/humanTask"))
            .and(query_param("f", format!("caseId={case_id}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "id": task_id,
                "name": task_name,
                "state": "ready",
                "caseId": case_id,
                "assigned_id": "",
            }])))
            .with_priority(1);
        if let Some(times) = times {
            mock = mock.up_to_n_times(times);
        }
        mock.mount(&self.server).await;

        Mock::given(method("PUT"))
            .and(path(format!("/bonita/API/bpm/humanTask/{task_id}")))
            .respond_with(ResponseTemplate::new(200))
            .mount(&self.server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("/bonita/API/bpm/userTask/{task_id}/execution")))
            .respond_with(ResponseTemplate::new(204))
            .mount(&self.server)
            .await;
    }

    /// Fallback: no case has ready tasks unless a more specific mock says so.
    async fn mock_no_ready_tasks(&self) {
        Mock::given(method("GET"))
            .and(path("/bonita/API/bpm/humanTask"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .with_priority(10)
            .mount(&self.server)
            .await;
    }

    pub async fn mock_assignee(&self, username: &str, user_id: &str) {
        Mock::given(method("GET"))
            .and(path("/bonita/API/identity/user"))
            .and(query_param("f", format!("userName={username}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": user_id, "userName": username}
            ])))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_variable(&self, case_id: &str, name: &str, var_type: &str, value: Value) {
        Mock::given(method("GET"))
            .and(path(format!("/bonita/API/bpm/caseVariable/{case_id}/{name}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": name,
                "case_id": case_id,
                "type": var_type,
                "value": value,
            })))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_text_variable(&self, case_id: &str, name: &str, value: &str) {
        self.mock_variable(case_id, name, "java.lang.String", json!(value))
            .await;
    }

    pub async fn mock_variable_update(&self, case_id: &str, name: &str) {
        Mock::given(method("PUT"))
            .and(path(format!("/bonita/API/bpm/caseVariable/{case_id}/{name}")))
            .respond_with(ResponseTemplate::new(200))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_flow_nodes(&self, case_id: &str, nodes: Value) {
        Mock::given(method("GET"))
            .and(path("/bonita/API/bpm/flowNode"))
            .and(query_param("f", format!("caseId={case_id}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(nodes))
            .mount(&self.server)
            .await;
    }

    /// Requests received with `verb` on `url_path`.
    pub async fn requests(&self, verb: &str, url_path: &str) -> Vec<wiremock::Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.method.as_str() == verb && r.url.path() == url_path)
            .collect()
    }

    pub async fn count(&self, verb: &str, url_path: &str) -> usize {
        self.requests(verb, url_path).await.len()
    }

    /// JSON bodies sent with `verb` to `url_path`, in arrival order.
    pub async fn bodies(&self, verb: &str, url_path: &str) -> Vec<Value> {
        self.requests(verb, url_path)
            .await
            .iter()
            .filter_map(|r| serde_json::from_slice(&r.body).ok())
            .collect()
    }

    pub async fn total_requests(&self) -> usize {
        self.server.received_requests().await.unwrap_or_default().len()
    }
}

/// Mock of the JWT-secured business API, mounted under `/api`.
pub struct DownstreamMock {
    pub server: MockServer,
    pub base_url: String,
}

impl DownstreamMock {
    pub async fn new() -> Self {
        let server = MockServer::start().await;
        let base_url = format!("{}/api", server.uri());
        Self { server, base_url }
    }

    pub async fn mock_observations(&self, proyecto_id: &str, observations: Value) {
        Mock::given(method("GET"))
            .and(path(format!("/api/proyectos/{proyecto_id}/observaciones/")))
            .and(header("authorization", format!("Bearer {ACCESS_TOKEN}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(observations))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_monthly_usage(&self, proyecto_id: &str, usage: Value) {
        Mock::given(method("GET"))
            .and(path(format!("/api/proyectos/{proyecto_id}/observaciones/limite/")))
            .respond_with(ResponseTemplate::new(200).set_body_json(usage))
            .mount(&self.server)
            .await;
    }

    pub async fn total_requests(&self) -> usize {
        self.server.received_requests().await.unwrap_or_default().len()
    }
}

/// Configuration pointing at the mocks, with waits short enough for tests.
pub fn test_config(engine_base: &str, downstream_base: &str) -> PpFrontConfig {
    let mut config = PpFrontConfig::default();
    config.engine.base_url = engine_base.to_string();
    config.engine.timeout_secs = 5;
    config.downstream.base_url = downstream_base.to_string();
    config.downstream.timeout_secs = 5;
    config.orchestration = OrchestrationConfig {
        poll_interval_ms: 20,
        login_wait_ms: 200,
        plan_task_wait_ms: 200,
        step_wait_ms: 200,
        quick_wait_ms: 100,
        variable_wait_ms: 100,
        outcome_wait_ms: 150,
        mirror_write_timeout_ms: 500,
        monthly_observation_limit: 2,
        page_base_path: "/bonita".to_string(),
    };
    config.database = None;
    config
}

/// Orchestrator over the mocks plus a handle on its in-memory mirror.
pub fn orchestrator(engine: &EngineMock, downstream: Option<&DownstreamMock>) -> (TaskOrchestrator, Arc<InMemoryMirror>) {
    let downstream_base = downstream
        .map(|d| d.base_url.clone())
        .unwrap_or_else(|| "http://127.0.0.1:9/api".to_string());
    let mirror = Arc::new(InMemoryMirror::new());
    let orchestrator = TaskOrchestrator::new(test_config(&engine.base_url, &downstream_base), mirror.clone());
    (orchestrator, mirror)
}

/// A date `days` from today, as `YYYY-MM-DD`.
pub fn days_from_today(days: i64) -> String {
    (chrono::Local::now().date_naive() + chrono::Duration::days(days))
        .format("%Y-%m-%d")
        .to_string()
}

/// A plan payload that passes validation.
pub fn valid_iniciar_payload() -> Value {
    json!({
        "nombre": "Huerta comunitaria",
        "descripcion": "Huerta en el barrio",
        "planTrabajo": {
            "etapas": [
                {"nombre": "Preparar terreno", "fechaInicioPrevista": days_from_today(10), "fechaFinPrevista": days_from_today(20)},
                {"nombre": "Siembra", "fechaInicioPrevista": days_from_today(21), "fechaFinPrevista": days_from_today(40)},
            ]
        },
        "planEconomico": {
            "monedaBase": "ARS",
            "presupuestoPorRubro": [
                {"rubro": "materiales", "monto": 1500.0},
                {"rubro": "transporte", "monto": 300}
            ]
        }
    })
}
