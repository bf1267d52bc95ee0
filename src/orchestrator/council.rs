//! Actions of the Consejo Directivo process: the board reviews projects in
//! execution, raises observations within a monthly quota and evaluates them.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::policy::{execute_if_ready, TaskStep};
use super::variables::{read_identifier, read_json, read_list};
use super::{
    reject_invalid, require_case, tasks, ActionError, ActionReply, ActionResult, CaseRequest,
    FieldError, TaskOrchestrator,
};
use crate::downstream::{DownstreamClient, DownstreamError, UsageSource};
use crate::engine::types::opt_id_string;
use crate::engine::{value_as_text, Contract, TaskOutcome};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservacionesRequest {
    #[serde(default, alias = "case", deserialize_with = "opt_id_string")]
    pub case_id: Option<String>,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub proyecto_id: Option<String>,
    /// Plain strings or objects carrying `detalle`.
    #[serde(default)]
    pub observaciones: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluacionRequest {
    #[serde(default, alias = "case", deserialize_with = "opt_id_string")]
    pub case_id: Option<String>,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub proyecto_id: Option<String>,
    #[serde(default)]
    pub aprobado: Option<bool>,
    #[serde(default)]
    pub comentario: Option<String>,
}

/// Observations used this period against the allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageReport {
    pub usadas: u32,
    pub limite: u32,
    pub fuente: UsageSource,
}

impl UsageReport {
    pub fn remaining(&self) -> u32 {
        self.limite.saturating_sub(self.usadas)
    }

    pub fn allows(&self, additional: u32) -> bool {
        self.usadas.saturating_add(additional) <= self.limite
    }
}

fn observation_text(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => ["detalle", "descripcion", "texto"]
            .iter()
            .find_map(|key| map.get(*key).and_then(value_as_text)),
        other => value_as_text(other),
    }
}

impl TaskOrchestrator {
    /// Usage from the downstream endpoint, or a manual count when it is unavailable.
    ///
    /// The manual count covers every observation the project has, not only
    /// those of the current period. When neither source answers the error is
    /// returned so the limit is never assumed unused.
    pub(crate) async fn monthly_usage(
        &self,
        downstream: &DownstreamClient,
        proyecto_id: &str,
    ) -> Result<UsageReport, DownstreamError> {
        let configured = self.waits().monthly_observation_limit;
        if let Some(usage) = downstream.monthly_usage(proyecto_id).await {
            return Ok(UsageReport {
                usadas: usage.used,
                limite: usage.limit.unwrap_or(configured),
                fuente: UsageSource::Endpoint,
            });
        }

        let observations = downstream.list_observations(proyecto_id).await.inspect_err(|err| {
            warn!(proyecto_id, error = %err, "manual observation count failed");
        })?;
        Ok(UsageReport {
            usadas: observations.len() as u32,
            limite: configured,
            fuente: UsageSource::ManualCount,
        })
    }

    /// Projects in execution awaiting the board's review.
    pub async fn proyectos_en_ejecucion(&self, request: CaseRequest) -> ActionResult {
        let case_id = require_case(request.case_id)?;
        let gateway = self.connect().await?;

        let mut proyectos = read_list(&gateway, &case_id, "proyectosEnEjecucion").await?;
        let mut fuente = "motor";
        if proyectos.is_empty() {
            let downstream = self.downstream_for_case(&gateway, &case_id).await?;
            proyectos = downstream.list_projects_in_execution().await?;
            fuente = "api";
        }

        Ok(ActionReply::ok()
            .with("caseId", &case_id)
            .with("fuente", fuente)
            .with("total", proyectos.len())
            .with("proyectos", proyectos))
    }

    /// Observations of one project, with the remaining monthly allowance.
    pub async fn ver_observaciones(&self, proyecto_id: &str, request: CaseRequest) -> ActionResult {
        let case_id = require_case(request.case_id)?;
        let gateway = self.connect().await?;
        let downstream = self.downstream_for_case(&gateway, &case_id).await?;

        let observaciones = downstream.list_observations(proyecto_id).await?;
        let usage = self.monthly_usage(&downstream, proyecto_id).await?;

        Ok(ActionReply::ok()
            .with("caseId", &case_id)
            .with("proyectoId", proyecto_id)
            .with("observaciones", observaciones)
            .with("usadas", usage.usadas)
            .with("limite", usage.limite)
            .with("restantes", usage.remaining())
            .with("fuente", usage.fuente))
    }

    /// Submit a batch of board observations within the monthly limit.
    pub async fn enviar_observaciones(&self, request: ObservacionesRequest) -> ActionResult {
        let case_id = require_case(request.case_id)?;
        let mut errors = Vec::new();
        if request.proyecto_id.is_none() {
            errors.push(FieldError::new("proyectoId", "Requerido."));
        }
        if request.observaciones.is_empty() {
            errors.push(FieldError::new("observaciones", "Debe incluir al menos una observación."));
        }
        let mut texts = Vec::with_capacity(request.observaciones.len());
        for (i, item) in request.observaciones.iter().enumerate() {
            match observation_text(item) {
                Some(text) => texts.push(text),
                None => errors.push(FieldError::new(&format!("observaciones[{i}]"), "Requerido (texto).")),
            }
        }
        reject_invalid(errors)?;
        let proyecto_id = request.proyecto_id.unwrap_or_default();

        let gateway = self.connect().await?;
        let downstream = self.downstream_for_case(&gateway, &case_id).await?;
        let requested = texts.len() as u32;
        let usage = self.monthly_usage(&downstream, &proyecto_id).await?;
        if !usage.allows(requested) {
            info!(proyecto_id = %proyecto_id, usadas = usage.usadas, limite = usage.limite, "monthly observation limit reached");
            return Err(ActionError::LimitReached {
                error: "Límite mensual de observaciones alcanzado".into(),
                detail: json!({
                    "usadas": usage.usadas,
                    "limite": usage.limite,
                    "solicitadas": requested,
                    "fuente": usage.fuente,
                }),
            });
        }

        let contract = Contract::new()
            .field("proyectoId", proyecto_id.as_str())
            .field("observaciones", Value::from(texts))
            .field("cantidad", requested);
        let step = TaskStep::tolerant(&case_id, tasks::LOAD_OBSERVATIONS, self.waits().step_wait());
        let outcome = execute_if_ready(&gateway, self.assignee(), step, &contract).await?;

        if outcome.executed() {
            let settled = gateway
                .poll_task_outcome(&case_id, tasks::LOAD_OBSERVATIONS, self.waits().outcome_wait())
                .await?;
            match settled {
                TaskOutcome::Failed { node_id } => {
                    warn!(case_id = %case_id, node_id = %node_id, "observation connector failed");
                    return Err(ActionError::LimitReached {
                        error: "La API rechazó las observaciones".into(),
                        detail: json!({ "nodo": node_id, "proyectoId": proyecto_id }),
                    });
                }
                TaskOutcome::Completed => {}
                unsettled => {
                    warn!(case_id = %case_id, outcome = ?unsettled, "observation load not confirmed before the wait ran out");
                }
            }
        }

        let reply = if outcome.executed() {
            ActionReply::created()
        } else {
            ActionReply::ok()
        };
        Ok(reply
            .with("caseId", &case_id)
            .with("proyectoId", &proyecto_id)
            .with("enviadas", if outcome.executed() { requested } else { 0 })
            .with("limite", usage.limite)
            .with("fuente", usage.fuente)
            .note_for(&outcome))
    }

    /// Record the board's verdict on a project.
    pub async fn evaluar_proyecto(&self, request: EvaluacionRequest) -> ActionResult {
        let case_id = require_case(request.case_id)?;
        let mut errors = Vec::new();
        if request.proyecto_id.is_none() {
            errors.push(FieldError::new("proyectoId", "Requerido."));
        }
        if request.aprobado.is_none() {
            errors.push(FieldError::new("aprobado", "Requerido (booleano)."));
        }
        reject_invalid(errors)?;
        let proyecto_id = request.proyecto_id.unwrap_or_default();
        let aprobado = request.aprobado.unwrap_or_default();

        let gateway = self.connect().await?;
        let contract = Contract::new()
            .field("proyectoId", proyecto_id.as_str())
            .field("aprobado", aprobado)
            .field("comentario", request.comentario.unwrap_or_default());
        let step = TaskStep::tolerant(&case_id, tasks::EVALUATE_PROJECT, self.waits().step_wait());
        let outcome = execute_if_ready(&gateway, self.assignee(), step, &contract).await?;

        Ok(ActionReply::ok()
            .with("caseId", &case_id)
            .with("proyectoId", proyecto_id)
            .with("aprobado", aprobado)
            .note_for(&outcome))
    }

    /// Data shown on the evaluation page.
    pub async fn datos_evaluacion(&self, request: CaseRequest) -> ActionResult {
        let case_id = require_case(request.case_id)?;
        let gateway = self.connect().await?;

        let proyecto = read_json(&gateway, &case_id, "proyectoEvaluado")
            .await?
            .filter(Value::is_object)
            .unwrap_or_else(|| json!({}));
        let proyecto_id = read_identifier(&gateway, &case_id, "proyectoId").await?;

        Ok(ActionReply::ok()
            .with("caseId", &case_id)
            .with("proyectoId", proyecto_id)
            .with("proyecto", proyecto))
    }
}
