use serde_json::Value;
use tracing::{info, warn};

use super::{ActionError, ActionResult};
use crate::engine::{Contract, EngineGateway, PollSpec};
use crate::observability::engine_metrics;

pub const ALREADY_DONE_NOTE: &str = "La tarea ya no estaba disponible; se asume ejecutada.";

/// Result of [`execute_if_ready`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Executed {
        task_id: String,
        response: Option<Value>,
    },
    /// No ready task before the deadline: another request already advanced the case.
    AssumedAlreadyDone,
}

impl Outcome {
    pub fn executed(&self) -> bool {
        matches!(self, Self::Executed { .. })
    }

    pub fn note(&self) -> Option<&'static str> {
        match self {
            Self::Executed { .. } => None,
            Self::AssumedAlreadyDone => Some(ALREADY_DONE_NOTE),
        }
    }
}

/// What to do when the expected task never shows up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissPolicy {
    /// Treat as already executed by a parallel or earlier request.
    Tolerate,
    /// No earlier execution is possible, so the miss is a conflict.
    Fatal,
}

/// One expected task of a case.
#[derive(Debug, Clone, Copy)]
pub struct TaskStep<'a> {
    pub case_id: &'a str,
    pub task_name: &'a str,
    pub wait: PollSpec,
    pub on_miss: MissPolicy,
}

impl<'a> TaskStep<'a> {
    pub fn tolerant(case_id: &'a str, task_name: &'a str, wait: PollSpec) -> Self {
        Self {
            case_id,
            task_name,
            wait,
            on_miss: MissPolicy::Tolerate,
        }
    }

    pub fn strict(case_id: &'a str, task_name: &'a str, wait: PollSpec) -> Self {
        Self {
            on_miss: MissPolicy::Fatal,
            ..Self::tolerant(case_id, task_name, wait)
        }
    }
}

/// Poll for the step's task, then assign and execute it with `contract`.
///
/// The assignee is only resolved once a task exists, so a tolerated miss costs
/// no identity lookup.
pub async fn execute_if_ready(
    gateway: &EngineGateway,
    assignee: &str,
    step: TaskStep<'_>,
    contract: &Contract,
) -> ActionResult<Outcome> {
    let Some(task) = gateway
        .poll_ready_task(step.case_id, Some(step.task_name), step.wait)
        .await?
    else {
        return match step.on_miss {
            MissPolicy::Tolerate => {
                engine_metrics().record_tolerated_miss();
                info!(
                    case_id = step.case_id,
                    task = step.task_name,
                    "task not ready; assuming it was already executed"
                );
                Ok(Outcome::AssumedAlreadyDone)
            }
            MissPolicy::Fatal => {
                warn!(case_id = step.case_id, task = step.task_name, "expected task never appeared");
                Err(ActionError::TaskMissing {
                    task: step.task_name.to_string(),
                    detail: format!(
                        "El caso {} no llegó a la tarea dentro del tiempo de espera.",
                        step.case_id
                    ),
                })
            }
        };
    };

    let user_id = gateway
        .find_user_id_by_username(assignee)
        .await?
        .ok_or_else(|| ActionError::integration("Usuario Bonita no encontrado", assignee))?;

    gateway.assign_task(&task.id, &user_id).await?;
    let response = gateway.execute_task(&task.id, contract).await?;

    info!(
        case_id = step.case_id,
        task = step.task_name,
        task_id = %task.id,
        "task executed"
    );
    Ok(Outcome::Executed {
        task_id: task.id,
        response,
    })
}
