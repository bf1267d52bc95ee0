//! Business actions driven against the process engine.
//!
//! Each action logs in, locates the case and the task it expects, executes it
//! with a flat contract and optionally waits for variables the engine's own
//! connectors write back. Nothing here holds business state; the engine does.

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{OrchestrationConfig, PpFrontConfig, ProcessRef};
use crate::downstream::DownstreamError;
use crate::engine::types::opt_id_string;
use crate::engine::{EngineError, EngineGateway};
use crate::mirror::{best_effort, MirrorStore};

pub mod access;
pub mod council;
pub mod navigation;
pub mod planning;
pub mod policy;
pub mod validation;
pub mod variables;

pub use navigation::{route_for_task, NextStep, Role};
pub use policy::{execute_if_ready, MissPolicy, Outcome, TaskStep, ALREADY_DONE_NOTE};
pub use validation::{derive_project_window, validate_iniciar_payload, FieldError, ProjectWindow};

/// Task names declared by the ProjectPlanning and Consejo Directivo templates.
pub mod tasks {
    pub const DEFINE_PLAN: &str = "Definir plan de trabajo y economico";
    pub const REGISTER_REQUEST: &str = "Registrar pedido";
    pub const SELECT_PROJECT: &str = "Seleccionar proyecto";
    pub const REVIEW_REQUESTS: &str = "Revisar pedidos";
    pub const REGISTER_COMMITMENT: &str = "Registrar compromiso";
    pub const EVALUATE_PROPOSALS: &str = "Evaluar propuestas";
    pub const ANSWER_OBSERVATIONS: &str = "Responder observaciones";
    pub const FINALIZE_PROJECT: &str = "Finalizar proyecto";
    pub const KEEP_COLLABORATING: &str = "Continuar colaborando";
    pub const REVIEW_RUNNING_PROJECTS: &str = "Revisar proyectos en ejecucion";
    pub const LOAD_OBSERVATIONS: &str = "Cargar observaciones";
    pub const EVALUATE_PROJECT: &str = "Evaluar proyecto";
}

/// Failure of a business action, already classified for the HTTP boundary.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("payload failed validation")]
    Validation(Vec<FieldError>),

    #[error("{0}")]
    BadRequest(String),

    #[error("project has {count} open observations")]
    PendingObservations { count: usize, ids: Vec<String> },

    #[error("{error}")]
    Unauthorized { error: String, detail: String },

    #[error("{error}")]
    Forbidden { error: String, detail: String },

    #[error("task '{task}' is not ready")]
    TaskMissing { task: String, detail: String },

    #[error("{error}")]
    LimitReached { error: String, detail: Value },

    #[error("{error}")]
    Integration { error: String, detail: String },
}

impl ActionError {
    pub fn integration(error: &str, detail: impl ToString) -> Self {
        Self::Integration {
            error: error.to_string(),
            detail: detail.to_string(),
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::BadRequest(_) | Self::PendingObservations { .. } => 400,
            Self::Unauthorized { .. } => 401,
            Self::Forbidden { .. } => 403,
            Self::TaskMissing { .. } => 409,
            Self::LimitReached { .. } => 429,
            Self::Integration { .. } => 500,
        }
    }

    /// The `{"ok": false, ...}` body sent to the browser.
    pub fn envelope(&self) -> Value {
        let mut body = Map::new();
        body.insert("ok".into(), Value::Bool(false));
        match self {
            Self::Validation(errors) => {
                body.insert("error".into(), Value::String("Datos inválidos".into()));
                body.insert(
                    "errors".into(),
                    serde_json::to_value(errors).unwrap_or_default(),
                );
            }
            Self::BadRequest(message) => {
                body.insert("error".into(), Value::String(message.clone()));
            }
            Self::PendingObservations { count, ids } => {
                body.insert(
                    "error".into(),
                    Value::String("El proyecto tiene observaciones sin resolver".into()),
                );
                body.insert("observacionesPendientes".into(), Value::from(*count));
                body.insert("observaciones".into(), Value::from(ids.clone()));
            }
            Self::Unauthorized { error, detail }
            | Self::Forbidden { error, detail }
            | Self::Integration { error, detail } => {
                body.insert("error".into(), Value::String(error.clone()));
                body.insert("detail".into(), Value::String(detail.clone()));
            }
            Self::TaskMissing { task, detail } => {
                body.insert(
                    "error".into(),
                    Value::String(format!("No apareció la tarea '{task}'.")),
                );
                body.insert("detail".into(), Value::String(detail.clone()));
            }
            Self::LimitReached { error, detail } => {
                body.insert("error".into(), Value::String(error.clone()));
                body.insert("detail".into(), detail.clone());
            }
        }
        Value::Object(body)
    }
}

impl From<EngineError> for ActionError {
    fn from(err: EngineError) -> Self {
        let error = if err.is_timeout() {
            "Tiempo de espera agotado con Bonita"
        } else {
            "Fallo integración Bonita"
        };
        warn!(status = ?err.status(), error = %err, "engine call failed");
        Self::integration(error, err)
    }
}

impl From<DownstreamError> for ActionError {
    fn from(err: DownstreamError) -> Self {
        Self::integration("Fallo integración API de proyectos", err)
    }
}

pub type ActionResult<T = ActionReply> = Result<T, ActionError>;

/// Body that only names the case being acted on.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaseRequest {
    #[serde(default, rename = "caseId", alias = "case", deserialize_with = "opt_id_string")]
    pub case_id: Option<String>,
}

pub(crate) fn require_case(case_id: Option<String>) -> ActionResult<String> {
    case_id.ok_or_else(|| ActionError::BadRequest("Falta caseId".into()))
}

/// Trimmed non-empty text, or a field error at `path`.
pub(crate) fn required_text(
    value: Option<&str>,
    path: &str,
    errors: &mut Vec<FieldError>,
) -> String {
    match value.map(str::trim).filter(|s| !s.is_empty()) {
        Some(text) => text.to_string(),
        None => {
            errors.push(FieldError::new(path, "Requerido."));
            String::new()
        }
    }
}

pub(crate) fn reject_invalid(errors: Vec<FieldError>) -> ActionResult<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ActionError::Validation(errors))
    }
}

/// Successful action payload; serialized as `{"ok": true, ...}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionReply {
    created: bool,
    body: Map<String, Value>,
}

impl ActionReply {
    pub fn ok() -> Self {
        Self {
            created: false,
            body: Map::new(),
        }
    }

    pub fn created() -> Self {
        Self {
            created: true,
            ..Self::ok()
        }
    }

    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        self.body
            .insert(key.to_string(), serde_json::to_value(value).unwrap_or_default());
        self
    }

    /// Attach the note explaining a tolerated miss, if there was one.
    pub fn note_for(self, outcome: &Outcome) -> Self {
        match outcome.note() {
            Some(note) => self.with("note", note),
            None => self,
        }
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    pub fn status_code(&self) -> u16 {
        if self.created {
            201
        } else {
            200
        }
    }

    pub fn into_json(self) -> Value {
        let mut body = Map::new();
        body.insert("ok".into(), Value::Bool(true));
        body.extend(self.body);
        Value::Object(body)
    }
}

/// Entry point for every business action.
///
/// Cheap to clone; clones share the definition cache and the mirror.
#[derive(Clone)]
pub struct TaskOrchestrator {
    config: Arc<PpFrontConfig>,
    mirror: Arc<dyn MirrorStore>,
    definitions: Cache<String, String>,
}

impl TaskOrchestrator {
    pub fn new(config: PpFrontConfig, mirror: Arc<dyn MirrorStore>) -> Self {
        let definitions = Cache::builder()
            .max_capacity(64)
            .time_to_live(Duration::from_secs(600))
            .build();

        Self {
            config: Arc::new(config),
            mirror,
            definitions,
        }
    }

    pub fn config(&self) -> &PpFrontConfig {
        &self.config
    }

    pub fn mirror(&self) -> &Arc<dyn MirrorStore> {
        &self.mirror
    }

    pub(crate) fn waits(&self) -> &OrchestrationConfig {
        &self.config.orchestration
    }

    pub(crate) fn assignee(&self) -> &str {
        &self.config.engine.assignee
    }

    /// Fresh authenticated gateway; every action logs in on its own.
    pub(crate) async fn connect(&self) -> ActionResult<EngineGateway> {
        Ok(EngineGateway::connect(&self.config.engine).await?)
    }

    /// Process definition id, cached per `name@version`.
    pub(crate) async fn definition_id(
        &self,
        gateway: &EngineGateway,
        process: &ProcessRef,
    ) -> ActionResult<String> {
        let key = process.key();
        if let Some(id) = self.definitions.get(&key).await {
            debug!(process = %key, "process definition cache hit");
            return Ok(id);
        }

        let id = gateway
            .find_process_definition_id(&process.name, &process.version)
            .await?
            .ok_or_else(|| {
                ActionError::integration(
                    &format!("Proceso {} {} no encontrado", process.name, process.version),
                    &key,
                )
            })?;
        self.definitions.insert(key, id.clone()).await;
        Ok(id)
    }

    /// Best-effort mirror write bounded by the configured timeout.
    pub(crate) async fn mirror_write<T, F>(&self, operation: &str, fut: F) -> Option<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        best_effort(operation, self.config.orchestration.mirror_write_timeout(), fut).await
    }
}
