use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::errors::{EngineError, EngineResult};
use super::poll::{poll_until, PollSpec};
use super::session::{decode_body, ensure_success, EngineSession};
use super::types::{CaseInfo, CaseVariable, Contract, FlowNode, HumanTask, TaskOutcome};
use crate::config::EngineConfig;
use crate::observability::{engine_metrics, OperationTimer};

const TASK_PAGE_SIZE: &str = "10";
const NODE_PAGE_SIZE: &str = "50";

/// Stateless operations against the engine's REST API, layered on one
/// authenticated [`EngineSession`].
#[derive(Debug, Clone)]
pub struct EngineGateway {
    session: EngineSession,
}

impl EngineGateway {
    pub fn new(session: EngineSession) -> Self {
        Self { session }
    }

    /// Log in and wrap the fresh session.
    pub async fn connect(config: &EngineConfig) -> EngineResult<Self> {
        Ok(Self::new(EngineSession::login(config).await?))
    }

    pub fn session(&self) -> &EngineSession {
        &self.session
    }

    /// GET returning the decoded body, or `None` on 404.
    async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
        operation: &str,
    ) -> EngineResult<Option<Value>> {
        let _timer = OperationTimer::new(operation);
        engine_metrics().record_request();

        let response = self
            .session
            .get(&self.session.api_url(path))
            .query(query)
            .send()
            .await
            .inspect_err(|_| engine_metrics().record_error())?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(operation, "engine resource not found");
            return Ok(None);
        }
        let response = ensure_success(response, operation).await?;
        Ok(decode_body(response).await)
    }

    async fn get_list<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        operation: &str,
    ) -> EngineResult<Vec<T>> {
        match self.get_json(path, query, operation).await? {
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| {
                    serde_json::from_value(item)
                        .map_err(|_| EngineError::UnexpectedShape(operation.to_string()))
                })
                .collect(),
            _ => Ok(Vec::new()),
        }
    }

    /// Id of the first deployed process matching `name` and `version`.
    pub async fn find_process_definition_id(
        &self,
        name: &str,
        version: &str,
    ) -> EngineResult<Option<String>> {
        let query = [
            ("p", "0".to_string()),
            ("c", "5".to_string()),
            ("f", format!("name={name}")),
            ("f", format!("version={version}")),
        ];
        let definitions: Vec<super::types::ProcessDefinition> =
            self.get_list("bpm/process", &query, "process lookup").await?;
        Ok(definitions.into_iter().next().map(|d| d.id))
    }

    /// Start a case with an initiation contract; returns the new case id.
    pub async fn instantiate_process(
        &self,
        definition_id: &str,
        contract: &Contract,
    ) -> EngineResult<Option<String>> {
        let _timer = OperationTimer::new("process instantiation");
        engine_metrics().record_request();

        let response = self
            .session
            .post(
                &self
                    .session
                    .api_url(&format!("bpm/process/{definition_id}/instantiation")),
            )
            .json(contract)
            .send()
            .await?;
        let response = ensure_success(response, "process instantiation").await?;

        let case_id = decode_body(response).await.and_then(|body| {
            ["caseId", "id"]
                .iter()
                .find_map(|key| body.get(*key).and_then(super::json::value_as_text))
        });

        if let Some(id) = &case_id {
            info!(case_id = %id, definition_id, "case instantiated");
        }
        Ok(case_id)
    }

    /// Case metadata, or `None` when the case no longer exists.
    pub async fn get_case(&self, case_id: &str) -> EngineResult<Option<CaseInfo>> {
        match self
            .get_json(&format!("bpm/case/{case_id}"), &[], "case lookup")
            .await?
        {
            Some(body) => serde_json::from_value(body)
                .map(Some)
                .map_err(|_| EngineError::UnexpectedShape("case lookup".to_string())),
            None => Ok(None),
        }
    }

    /// Ready human tasks of a case, optionally filtered by name.
    pub async fn find_ready_tasks(
        &self,
        case_id: &str,
        task_name: Option<&str>,
    ) -> EngineResult<Vec<HumanTask>> {
        let mut query = vec![
            ("f", format!("caseId={case_id}")),
            ("f", "state=ready".to_string()),
            ("p", "0".to_string()),
            ("c", TASK_PAGE_SIZE.to_string()),
        ];
        if let Some(name) = task_name {
            query.push(("f", format!("name={name}")));
        }
        self.get_list("bpm/humanTask", &query, "ready task query").await
    }

    /// Block until a matching ready task shows up or `spec` runs out.
    pub async fn poll_ready_task(
        &self,
        case_id: &str,
        task_name: Option<&str>,
        spec: PollSpec,
    ) -> EngineResult<Option<HumanTask>> {
        let found = poll_until(spec, || async move {
            let tasks = self.find_ready_tasks(case_id, task_name).await?;
            Ok::<_, EngineError>(tasks.into_iter().next())
        })
        .await?;

        match &found {
            Some(task) => debug!(case_id, task = %task.name, task_id = %task.id, "ready task found"),
            None => debug!(case_id, task = ?task_name, "no ready task before deadline"),
        }
        Ok(found)
    }

    pub async fn find_user_id_by_username(&self, username: &str) -> EngineResult<Option<String>> {
        let query = [("f", format!("userName={username}"))];
        let users: Vec<Value> = self.get_list("identity/user", &query, "user lookup").await?;
        Ok(users
            .first()
            .and_then(|user| user.get("id"))
            .and_then(super::json::value_as_text))
    }

    /// Set the task assignee; required before execution.
    pub async fn assign_task(&self, task_id: &str, user_id: &str) -> EngineResult<()> {
        let _timer = OperationTimer::new("task assignment");
        engine_metrics().record_request();

        let response = self
            .session
            .put(&self.session.api_url(&format!("bpm/humanTask/{task_id}")))
            .json(&json!({ "assigned_id": user_id }))
            .send()
            .await?;
        ensure_success(response, "task assignment").await?;
        Ok(())
    }

    /// Submit the task's form contract.
    pub async fn execute_task(&self, task_id: &str, contract: &Contract) -> EngineResult<Option<Value>> {
        let _timer = OperationTimer::new("task execution");
        engine_metrics().record_request();

        let response = self
            .session
            .post(&self.session.api_url(&format!("bpm/userTask/{task_id}/execution")))
            .json(contract)
            .send()
            .await?;
        let response = ensure_success(response, "task execution").await?;
        info!(task_id, fields = contract.len(), "task executed");
        Ok(decode_body(response).await)
    }

    pub async fn get_case_variable(
        &self,
        case_id: &str,
        name: &str,
    ) -> EngineResult<Option<CaseVariable>> {
        match self
            .get_json(
                &format!("bpm/caseVariable/{case_id}/{name}"),
                &[],
                "case variable read",
            )
            .await?
        {
            Some(body) => serde_json::from_value(body)
                .map(Some)
                .map_err(|_| EngineError::UnexpectedShape("case variable read".to_string())),
            None => Ok(None),
        }
    }

    /// Assign an already-declared case variable, echoing its declared type.
    pub async fn update_case_variable(
        &self,
        case_id: &str,
        name: &str,
        value: Value,
    ) -> EngineResult<()> {
        let current = self
            .get_case_variable(case_id, name)
            .await?
            .ok_or_else(|| EngineError::VariableNotFound {
                case_id: case_id.to_string(),
                name: name.to_string(),
            })?;

        let value = match value {
            Value::String(text) => text,
            Value::Null => String::new(),
            other => other.to_string(),
        };

        let _timer = OperationTimer::new("case variable update");
        engine_metrics().record_request();

        let response = self
            .session
            .put(&self.session.api_url(&format!("bpm/caseVariable/{case_id}/{name}")))
            .json(&json!({ "type": current.var_type, "value": value }))
            .send()
            .await?;
        ensure_success(response, "case variable update").await?;
        debug!(case_id, variable = name, var_type = %current.var_type, "case variable updated");
        Ok(())
    }

    /// Flow nodes of a case with extra `field=value` filters.
    pub async fn list_flow_nodes(
        &self,
        case_id: &str,
        filters: &[(&str, &str)],
    ) -> EngineResult<Vec<FlowNode>> {
        let mut query = vec![
            ("p", "0".to_string()),
            ("c", NODE_PAGE_SIZE.to_string()),
            ("f", format!("caseId={case_id}")),
        ];
        query.extend(filters.iter().map(|(k, v)| ("f", format!("{k}={v}"))));
        self.get_list("bpm/flowNode", &query, "flow node query").await
    }

    /// Track a task after execution: failed, gone (completed) or still pending.
    ///
    /// A node that is still listed in any other state keeps the poll going,
    /// since its connectors may yet fail.
    pub async fn poll_task_outcome(
        &self,
        case_id: &str,
        task_name: &str,
        spec: PollSpec,
    ) -> EngineResult<TaskOutcome> {
        let settled = poll_until(spec, || async move {
            let nodes = self.list_flow_nodes(case_id, &[("name", task_name)]).await?;
            Ok::<_, EngineError>(classify_nodes(&nodes))
        })
        .await?;
        if let Some(outcome) = settled {
            return Ok(outcome);
        }

        let nodes = self.list_flow_nodes(case_id, &[("name", task_name)]).await?;
        let outcome = if nodes.iter().any(|n| n.state.eq_ignore_ascii_case("ready")) {
            TaskOutcome::StillReady
        } else if let Some(node) = nodes.first() {
            TaskOutcome::InProgress {
                state: node.state.clone(),
            }
        } else {
            TaskOutcome::Completed
        };
        debug!(case_id, task_name, ?outcome, "task outcome not settled before the wait ran out");
        Ok(outcome)
    }
}

/// Settled outcome of the nodes carrying a task's name, if any.
fn classify_nodes(nodes: &[FlowNode]) -> Option<TaskOutcome> {
    if let Some(failed) = nodes.iter().find(|n| n.state.eq_ignore_ascii_case("failed")) {
        return Some(TaskOutcome::Failed {
            node_id: failed.id.clone(),
        });
    }
    if nodes.iter().all(|n| n.state.eq_ignore_ascii_case("completed")) {
        return Some(TaskOutcome::Completed);
    }
    None
}
