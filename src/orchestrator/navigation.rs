//! Deciding where the browser goes next.
//!
//! The ready task of a case names the page that handles it. When nothing is
//! ready yet, the `rol` variable written at login picks a landing page. A role
//! that cannot be determined is refused, never routed to a default page.

use serde::Serialize;
use tracing::{info, warn};

use super::variables::read_text;
use super::{tasks, ActionError, ActionReply, ActionResult, TaskOrchestrator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    OngOriginante,
    RedOng,
    ConsejoDirectivo,
}

impl Role {
    /// Parse the role names the process templates write, tolerating case and spacing.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "ong_originante" | "originante" => Some(Self::OngOriginante),
            "red_ong" | "red" | "ong_colaboradora" | "colaboradora" => Some(Self::RedOng),
            "consejo_directivo" | "consejo" => Some(Self::ConsejoDirectivo),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OngOriginante => "ong_originante",
            Self::RedOng => "red_ong",
            Self::ConsejoDirectivo => "consejo_directivo",
        }
    }

    /// Page shown while the role waits for its next task.
    fn landing_page(&self) -> &'static str {
        match self {
            Self::OngOriginante => "proyectos/",
            Self::RedOng => "revisar/",
            Self::ConsejoDirectivo => "consejo/",
        }
    }
}

/// Page and role owning each task.
const TASK_ROUTES: &[(&str, Role, &str)] = &[
    (tasks::DEFINE_PLAN, Role::OngOriginante, "nuevo/"),
    (tasks::REGISTER_REQUEST, Role::OngOriginante, "pedido/"),
    (tasks::EVALUATE_PROPOSALS, Role::OngOriginante, "evaluar-propuestas/"),
    (tasks::ANSWER_OBSERVATIONS, Role::OngOriginante, "responder-observacion/"),
    (tasks::FINALIZE_PROJECT, Role::OngOriginante, "finalizar/"),
    (tasks::SELECT_PROJECT, Role::RedOng, "revisar/"),
    (tasks::REVIEW_REQUESTS, Role::RedOng, "revisar-pedidos/"),
    (tasks::REGISTER_COMMITMENT, Role::RedOng, "compromiso/"),
    (tasks::KEEP_COLLABORATING, Role::RedOng, "continuar/"),
    (tasks::REVIEW_RUNNING_PROJECTS, Role::ConsejoDirectivo, "consejo/"),
    (tasks::LOAD_OBSERVATIONS, Role::ConsejoDirectivo, "consejo/observaciones/"),
    (tasks::EVALUATE_PROJECT, Role::ConsejoDirectivo, "consejo/evaluar/"),
];

pub fn route_for_task(task_name: &str) -> Option<(Role, &'static str)> {
    TASK_ROUTES
        .iter()
        .find(|(name, _, _)| name.eq_ignore_ascii_case(task_name.trim()))
        .map(|(_, role, page)| (*role, *page))
}

/// Where next-step sends the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NextStep {
    pub rol: Option<Role>,
    pub url: String,
    pub tarea: Option<String>,
    pub finalizado: bool,
}

fn page_url(base: &str, page: &str, case_id: &str) -> String {
    format!("{}/{}?case={}", base.trim_end_matches('/'), page, case_id)
}

impl TaskOrchestrator {
    /// Decide the next page for a case.
    pub async fn next_step(&self, case_id: Option<String>) -> ActionResult {
        let case_id = case_id.ok_or_else(|| ActionError::BadRequest("Falta caseId".into()))?;
        let base = &self.config().orchestration.page_base_path;
        let gateway = self.connect().await?;

        let live = gateway
            .get_case(&case_id)
            .await?
            .is_some_and(|case| case.is_active());
        if !live {
            info!(case_id = %case_id, "case finished or gone; clearing remembered sessions");
            self.mirror_write("forget finished case", self.mirror().forget_case(&case_id))
                .await;
            let step = NextStep {
                rol: None,
                url: format!("{}/login/", base.trim_end_matches('/')),
                tarea: None,
                finalizado: true,
            };
            return Ok(reply_for(&case_id, step));
        }

        let ready = gateway
            .poll_ready_task(&case_id, None, self.config().orchestration.quick_wait())
            .await?;
        if let Some(task) = &ready {
            if let Some((role, page)) = route_for_task(&task.name) {
                let step = NextStep {
                    rol: Some(role),
                    url: page_url(base, page, &case_id),
                    tarea: Some(task.name.clone()),
                    finalizado: false,
                };
                return Ok(reply_for(&case_id, step));
            }
            warn!(case_id = %case_id, task = %task.name, "ready task has no page; falling back to role");
        }

        let raw_role = read_text(&gateway, &case_id, "rol").await?;
        let role = raw_role.as_deref().and_then(Role::parse).ok_or_else(|| {
            warn!(case_id = %case_id, rol = ?raw_role, "role undetermined; refusing navigation");
            ActionError::Forbidden {
                error: "No se pudo determinar el rol del usuario".into(),
                detail: format!("rol={}", raw_role.as_deref().unwrap_or("<vacío>")),
            }
        })?;

        let step = NextStep {
            rol: Some(role),
            url: page_url(base, role.landing_page(), &case_id),
            tarea: ready.map(|task| task.name),
            finalizado: false,
        };
        Ok(reply_for(&case_id, step))
    }
}

fn reply_for(case_id: &str, step: NextStep) -> ActionReply {
    ActionReply::ok()
        .with("caseId", case_id)
        .with("rol", step.rol.map(|r| r.as_str()))
        .with("url", &step.url)
        .with("tarea", &step.tarea)
        .with("finalizado", step.finalizado)
}
