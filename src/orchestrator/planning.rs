//! Actions of the ProjectPlanning process: the originating NGO defines its
//! project and requests, the network commits to them, and the project is
//! eventually finalized.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::policy::{execute_if_ready, TaskStep};
use super::validation::{derive_project_window, validate_iniciar_payload};
use super::variables::{await_identifier, read_identifier, read_json, read_list, read_text};
use super::{
    reject_invalid, require_case, required_text, tasks, ActionError, ActionReply, ActionResult,
    CaseRequest, FieldError, TaskOrchestrator,
};
use crate::engine::types::opt_id_string;
use crate::engine::{value_as_text, Contract, EngineGateway, EngineResult, PollSpec};
use crate::mirror::{AcceptedCommitment, ProjectUpdate};

const ACCEPTED_COMMITMENTS: &str = "compromisosAceptados";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginRequest {
    #[serde(default, alias = "username")]
    pub user: Option<String>,
    #[serde(default, alias = "password")]
    pub pass: Option<String>,
    /// Log into the board process instead of ProjectPlanning.
    #[serde(default)]
    pub consejo: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PedidoRequest {
    #[serde(default, alias = "case", deserialize_with = "opt_id_string")]
    pub case_id: Option<String>,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub proyecto_id: Option<String>,
    #[serde(default)]
    pub tipo: Option<String>,
    #[serde(default)]
    pub descripcion: Option<String>,
    #[serde(default)]
    pub cantidad: Option<Value>,
    #[serde(default)]
    pub unidad: Option<String>,
    #[serde(default)]
    pub etapa: Option<String>,
    /// Ask the process to loop back for another request.
    #[serde(default)]
    pub otro_pedido: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRequest {
    #[serde(default, alias = "case", deserialize_with = "opt_id_string")]
    pub case_id: Option<String>,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub proyecto_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompromisoRequest {
    #[serde(default, alias = "case", deserialize_with = "opt_id_string")]
    pub case_id: Option<String>,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub pedido_id: Option<String>,
    #[serde(default, alias = "detalle")]
    pub descripcion: Option<String>,
    #[serde(default, alias = "fechaCompromiso")]
    pub fecha: Option<String>,
    #[serde(default)]
    pub cantidad: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluarPropuestasRequest {
    #[serde(default, alias = "case", deserialize_with = "opt_id_string")]
    pub case_id: Option<String>,
    /// Selected commitment; absent means none was good enough.
    #[serde(default, deserialize_with = "opt_id_string")]
    pub compromiso_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcumularRequest {
    #[serde(default, alias = "case", deserialize_with = "opt_id_string")]
    pub case_id: Option<String>,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub proyecto_id: Option<String>,
    #[serde(default)]
    pub compromiso: Option<AcceptedCommitment>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponderRequest {
    #[serde(default, alias = "case", deserialize_with = "opt_id_string")]
    pub case_id: Option<String>,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub observacion_id: Option<String>,
    #[serde(default)]
    pub respuesta: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalirRequest {
    #[serde(default, alias = "case", deserialize_with = "opt_id_string")]
    pub case_id: Option<String>,
}

fn payload_text(data: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| data.get(*key).and_then(value_as_text))
}

/// Commitment details as listed in the `compromisos` variable.
fn commitment_from_listing(listing: &[Value], id: &str) -> AcceptedCommitment {
    let item = listing
        .iter()
        .find(|c| c.get("id").and_then(value_as_text).as_deref() == Some(id));
    let field = |keys: &[&str]| {
        item.and_then(|c| keys.iter().find_map(|k| c.get(*k).and_then(value_as_text)))
            .unwrap_or_default()
    };

    AcceptedCommitment {
        id: id.to_string(),
        detalle: field(&["detalle", "descripcion"]),
        fecha: field(&["fecha", "fechaCompromiso"]),
        estado: "aceptado".to_string(),
    }
}

/// Case a plan is submitted to: one the caller names, or one created for them.
enum PlanCase {
    Existing(String),
    New { user: String, pass: String },
}

fn parse_project_id(id: &str) -> Option<i64> {
    id.trim().parse().ok()
}

impl TaskOrchestrator {
    /// Authenticate an API user and create or resume their case.
    pub async fn login(&self, request: LoginRequest) -> ActionResult {
        let user = request.user.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let pass = request.pass.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let (Some(user), Some(pass)) = (user, pass) else {
            return Err(ActionError::BadRequest("Faltan credenciales".into()));
        };

        let engine = &self.config().engine;
        let (process, first_task) = if request.consejo {
            (&engine.council_process, tasks::REVIEW_RUNNING_PROJECTS)
        } else {
            (&engine.planning_process, tasks::DEFINE_PLAN)
        };

        let gateway = self.connect().await?;
        // Resume trusts the username; the password is only checked by the entry
        // connector when a new case is instantiated.
        if let Some(case_id) = self.resumable_case(&gateway, user, &process.name).await? {
            return Ok(ActionReply::ok()
                .with("caseId", case_id)
                .with("reanudado", true)
                .with("proceso", &process.name));
        }

        let definition_id = self.definition_id(&gateway, process).await?;
        let contract = Contract::new().field("apiUser", user).field("apiPass", pass);
        let case_id = gateway
            .instantiate_process(&definition_id, &contract)
            .await?
            .ok_or_else(|| ActionError::integration("No se obtuvo caseId", &definition_id))?;

        // The entry connector authenticates against the downstream API during
        // instantiation; a rejected login routes the case to an error end.
        let first = gateway
            .poll_ready_task(&case_id, Some(first_task), self.waits().login_wait())
            .await?;
        if first.is_none() {
            warn!(case_id = %case_id, user, "entry connector did not reach the first task");
            return Err(ActionError::Unauthorized {
                error: "Login fallido. Verifique credenciales.".into(),
                detail: "El conector de entrada del proceso no pudo autenticarse contra la API externa."
                    .into(),
            });
        }

        self.mirror_write(
            "remember session",
            self.mirror().remember_session(user, &case_id, &process.name),
        )
        .await;
        info!(case_id = %case_id, user, process = %process.name, "case created for login");

        Ok(ActionReply::ok()
            .with("caseId", case_id)
            .with("reanudado", false)
            .with("proceso", &process.name))
    }

    /// Case remembered for `user` in `proceso`, if the engine still runs it.
    async fn resumable_case(
        &self,
        gateway: &EngineGateway,
        user: &str,
        proceso: &str,
    ) -> ActionResult<Option<String>> {
        let remembered = self
            .mirror_write("read remembered session", self.mirror().remembered_session(user))
            .await
            .flatten();
        let Some(session) = remembered.filter(|s| s.proceso == proceso) else {
            return Ok(None);
        };

        match gateway.get_case(&session.case_id).await? {
            Some(case) if case.is_active() => {
                info!(case_id = %session.case_id, user, "resuming remembered case");
                Ok(Some(session.case_id))
            }
            _ => {
                info!(case_id = %session.case_id, user, "remembered case is over; starting a new one");
                self.mirror_write("forget finished session", self.mirror().forget_session(user))
                    .await;
                Ok(None)
            }
        }
    }

    /// Submit the work and budget plan of a project.
    pub async fn iniciar_proyecto(&self, data: Value) -> ActionResult {
        reject_invalid(validate_iniciar_payload(&data))?;

        let window = data.get("planTrabajo").and_then(derive_project_window);
        let target = match payload_text(&data, &["caseId"]) {
            Some(case_id) => PlanCase::Existing(case_id),
            None => {
                let user = payload_text(&data, &["apiUser", "username", "user"]);
                let pass = payload_text(&data, &["apiPass", "password", "pass"]);
                let (Some(user), Some(pass)) = (user, pass) else {
                    return Err(ActionError::BadRequest("Faltan caseId o credenciales".into()));
                };
                PlanCase::New { user, pass }
            }
        };
        let gateway = self.connect().await?;

        let (case_id, api_user) = match target {
            PlanCase::Existing(case_id) => (case_id, None),
            PlanCase::New { user, pass } => {
                let process = &self.config().engine.planning_process;
                let definition_id = self.definition_id(&gateway, process).await?;
                let contract = Contract::new().field("apiUser", user.as_str()).field("apiPass", pass);
                let case_id = gateway
                    .instantiate_process(&definition_id, &contract)
                    .await?
                    .ok_or_else(|| ActionError::integration("No se obtuvo caseId", &definition_id))?;
                (case_id, Some(user))
            }
        };

        // A case created just now cannot have run the task already.
        let wait = self.waits().plan_task_wait();
        let step = if api_user.is_some() {
            TaskStep::strict(&case_id, tasks::DEFINE_PLAN, wait)
        } else {
            TaskStep::tolerant(&case_id, tasks::DEFINE_PLAN, wait)
        };

        let nombre = payload_text(&data, &["nombre"]).unwrap_or_default();
        let descripcion = data
            .get("descripcion")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut contract = Contract::new()
            .field("nombre", nombre.as_str())
            .field("descripcion", descripcion.as_str())
            .document("planTrabajo", &data["planTrabajo"])
            .document("planEconomico", &data["planEconomico"]);
        if let Some(window) = &window {
            contract = contract
                .field("fechaInicio", window.inicio_iso())
                .field("fechaFin", window.fin_iso());
        }

        let outcome = execute_if_ready(&gateway, self.assignee(), step, &contract).await?;

        if let Some(user) = &api_user {
            let process = &self.config().engine.planning_process.name;
            self.mirror_write(
                "remember session",
                self.mirror().remember_session(user, &case_id, process),
            )
            .await;
        }

        let mut reply = if outcome.executed() {
            ActionReply::created()
        } else {
            ActionReply::ok()
        }
        .with("caseId", &case_id)
        .with("avanzado", outcome.executed());
        if let Some(window) = &window {
            reply = reply
                .with("fechaInicio", window.inicio_iso())
                .with("fechaFin", window.fin_iso());
        }

        if outcome.executed() {
            let proyecto_id = self
                .published_id(&gateway, &case_id, "proyectoId", "body_proyecto")
                .await;
            if let Some(id) = proyecto_id.as_deref().and_then(parse_project_id) {
                let update = ProjectUpdate {
                    nombre: Some(nombre),
                    descripcion: Some(descripcion),
                    plan_trabajo: Some(data["planTrabajo"].clone()),
                    ..ProjectUpdate::new(id)
                };
                self.mirror_write("mirror new project", self.mirror().upsert_project(&update))
                    .await;
            }
            reply = reply.with("proyectoId", proyecto_id);
        }

        Ok(reply.note_for(&outcome))
    }

    /// Wait for an id the engine's connector publishes; failures only lose the id.
    async fn published_id(
        &self,
        gateway: &EngineGateway,
        case_id: &str,
        variable: &str,
        body_variable: &str,
    ) -> Option<String> {
        let wait: PollSpec = self.waits().variable_wait();
        match await_identifier(gateway, case_id, variable, body_variable, wait).await {
            Ok(Some(id)) => Some(id),
            Ok(None) => {
                warn!(case_id, variable, "connector never published an identifier");
                None
            }
            Err(err) => {
                warn!(case_id, variable, error = %err, "could not read published identifier");
                None
            }
        }
    }

    /// Projects offered to the network for collaboration.
    pub async fn revisar_proyectos(&self, request: CaseRequest) -> ActionResult {
        let case_id = require_case(request.case_id)?;
        let gateway = self.connect().await?;
        let proyectos = read_list(&gateway, &case_id, "proyectos").await?;

        Ok(ActionReply::ok()
            .with("caseId", &case_id)
            .with("total", proyectos.len())
            .with("proyectos", proyectos))
    }

    /// Register one resource request of the project.
    pub async fn registrar_pedido(&self, request: PedidoRequest) -> ActionResult {
        let case_id = require_case(request.case_id)?;
        let mut errors = Vec::new();
        let tipo = required_text(request.tipo.as_deref(), "tipo", &mut errors);
        let descripcion = required_text(request.descripcion.as_deref(), "descripcion", &mut errors);
        if let Some(cantidad) = &request.cantidad {
            if !cantidad.is_null() && !cantidad.as_f64().is_some_and(|c| c >= 0.0) {
                errors.push(FieldError::new("cantidad", "Debe ser un número ≥ 0."));
            }
        }
        reject_invalid(errors)?;

        let mut contract = Contract::new()
            .field("tipo", tipo)
            .field("descripcion", descripcion)
            .field("otroPedido", request.otro_pedido);
        if let Some(cantidad) = request.cantidad.filter(|c| !c.is_null()) {
            contract = contract.field("cantidad", cantidad);
        }
        if let Some(unidad) = request.unidad {
            contract = contract.field("unidad", unidad);
        }
        if let Some(etapa) = request.etapa {
            contract = contract.field("etapa", etapa);
        }
        if let Some(proyecto_id) = request.proyecto_id {
            contract = contract.field("proyectoId", proyecto_id);
        }

        let gateway = self.connect().await?;
        let step = TaskStep::tolerant(&case_id, tasks::REGISTER_REQUEST, self.waits().step_wait());
        let outcome = execute_if_ready(&gateway, self.assignee(), step, &contract).await?;

        let mut reply = ActionReply::ok().with("caseId", &case_id);
        if outcome.executed() {
            let pedido_id = self
                .published_id(&gateway, &case_id, "pedidoId", "body_pedido")
                .await;
            reply = ActionReply::created()
                .with("caseId", &case_id)
                .with("pedidoId", pedido_id);
        }
        Ok(reply.note_for(&outcome))
    }

    /// The network picks the project it wants to collaborate with.
    pub async fn elegir_proyecto(&self, request: ProjectRequest) -> ActionResult {
        let case_id = require_case(request.case_id)?;
        let proyecto_id = request
            .proyecto_id
            .ok_or_else(|| ActionError::Validation(vec![FieldError::new("proyectoId", "Requerido.")]))?;

        let gateway = self.connect().await?;
        let contract = Contract::new().field("proyectoId", proyecto_id.as_str());
        let step = TaskStep::tolerant(&case_id, tasks::SELECT_PROJECT, self.waits().step_wait());
        let outcome = execute_if_ready(&gateway, self.assignee(), step, &contract).await?;

        Ok(ActionReply::ok()
            .with("caseId", &case_id)
            .with("proyectoId", proyecto_id)
            .note_for(&outcome))
    }

    /// Requests of the selected project.
    pub async fn revisar_pedidos(&self, request: CaseRequest) -> ActionResult {
        let case_id = require_case(request.case_id)?;
        let gateway = self.connect().await?;

        let pedidos = read_list(&gateway, &case_id, "pedidos").await?;
        let proyecto_id = read_identifier(&gateway, &case_id, "proyectoId").await?;
        let nombre = read_text(&gateway, &case_id, "nombreProyecto").await?;

        Ok(ActionReply::ok()
            .with("caseId", &case_id)
            .with("proyecto", json!({"id": proyecto_id, "nombre": nombre}))
            .with("pedidos", pedidos))
    }

    /// Close the request review and move the network on.
    pub async fn finalizar_revision_pedidos(&self, request: CaseRequest) -> ActionResult {
        let case_id = require_case(request.case_id)?;
        let gateway = self.connect().await?;

        let contract = Contract::new().field("revisionFinalizada", true);
        let step = TaskStep::tolerant(&case_id, tasks::REVIEW_REQUESTS, self.waits().step_wait());
        let outcome = execute_if_ready(&gateway, self.assignee(), step, &contract).await?;

        Ok(ActionReply::ok()
            .with("caseId", &case_id)
            .with("finalizado", true)
            .note_for(&outcome))
    }

    /// Register a commitment of the network against one request.
    pub async fn registrar_compromiso(&self, request: CompromisoRequest) -> ActionResult {
        let case_id = require_case(request.case_id)?;
        let mut errors = Vec::new();
        let pedido_id = required_text(request.pedido_id.as_deref(), "pedidoId", &mut errors);
        let descripcion = required_text(request.descripcion.as_deref(), "descripcion", &mut errors);
        let fecha = request.fecha.as_deref().map(str::trim).filter(|f| !f.is_empty());
        if fecha.is_some_and(|f| super::validation::parse_date(f).is_none()) {
            errors.push(FieldError::new("fecha", "Formato de fecha inválido (use YYYY-MM-DD)."));
        }
        reject_invalid(errors)?;

        let mut contract = Contract::new()
            .field("pedidoId", pedido_id.as_str())
            .field("descripcion", descripcion);
        if let Some(fecha) = fecha.and_then(super::validation::parse_date) {
            contract = contract.field("fechaCompromiso", fecha.format("%Y-%m-%d").to_string());
        }
        if let Some(cantidad) = request.cantidad.filter(|c| !c.is_null()) {
            contract = contract.field("cantidad", cantidad);
        }

        let gateway = self.connect().await?;
        let step = TaskStep::tolerant(&case_id, tasks::REGISTER_COMMITMENT, self.waits().step_wait());
        let outcome = execute_if_ready(&gateway, self.assignee(), step, &contract).await?;

        let mut reply = ActionReply::ok();
        if outcome.executed() {
            let compromiso_id = self
                .published_id(&gateway, &case_id, "compromisoId", "body_compromiso")
                .await;
            reply = ActionReply::created().with("compromisoId", compromiso_id);
        }
        Ok(reply
            .with("caseId", &case_id)
            .with("pedidoId", pedido_id)
            .note_for(&outcome))
    }

    /// Commitments proposed for the project, for the originating NGO to evaluate.
    pub async fn revisar_compromisos(&self, request: CaseRequest) -> ActionResult {
        let case_id = require_case(request.case_id)?;
        let gateway = self.connect().await?;

        let compromisos = read_list(&gateway, &case_id, "compromisos").await?;
        let aceptados = read_list(&gateway, &case_id, ACCEPTED_COMMITMENTS).await?;
        let proyecto_id = read_identifier(&gateway, &case_id, "proyectoId").await?;

        Ok(ActionReply::ok()
            .with("caseId", &case_id)
            .with("proyectoId", proyecto_id)
            .with("compromisos", compromisos)
            .with("compromisosAceptados", aceptados))
    }

    /// Accept one proposed commitment, or loop back when none is selected.
    pub async fn evaluar_propuestas(&self, request: EvaluarPropuestasRequest) -> ActionResult {
        let case_id = require_case(request.case_id)?;
        let gateway = self.connect().await?;

        let contract = match &request.compromiso_id {
            Some(id) => Contract::new()
                .field("aceptado", true)
                .field("compromisoId", id.as_str()),
            None => Contract::new().field("aceptado", false),
        };
        let step = TaskStep::tolerant(&case_id, tasks::EVALUATE_PROPOSALS, self.waits().step_wait());
        let outcome = execute_if_ready(&gateway, self.assignee(), step, &contract).await?;

        if let (Some(id), true) = (&request.compromiso_id, outcome.executed()) {
            let accumulated: EngineResult<Vec<Value>> = async {
                let listing = read_list(&gateway, &case_id, "compromisos").await?;
                let commitment = commitment_from_listing(&listing, id);
                self.accumulate_commitment(&gateway, &case_id, None, &commitment)
                    .await
            }
            .await;
            if let Err(err) = accumulated {
                warn!(case_id = %case_id, compromiso_id = %id, error = %err, "could not accumulate accepted commitment");
            }
        }

        Ok(ActionReply::ok()
            .with("caseId", &case_id)
            .with("aceptado", request.compromiso_id.is_some())
            .with("compromisoId", &request.compromiso_id)
            .note_for(&outcome))
    }

    /// Add an accepted commitment to the project plan.
    pub async fn acumular_compromiso(&self, request: AcumularRequest) -> ActionResult {
        let case_id = require_case(request.case_id)?;
        let commitment = request.compromiso.ok_or_else(|| {
            ActionError::Validation(vec![FieldError::new("compromiso", "Requerido (objeto con id).")])
        })?;

        let gateway = self.connect().await?;
        let proyecto_id = request.proyecto_id.as_deref().and_then(parse_project_id);
        let accepted = self
            .accumulate_commitment(&gateway, &case_id, proyecto_id, &commitment)
            .await?;

        Ok(ActionReply::ok()
            .with("caseId", &case_id)
            .with("total", accepted.len())
            .with("compromisosAceptados", accepted))
    }

    /// Append `commitment` to the case's accepted list and the mirror; ids already present are skipped.
    async fn accumulate_commitment(
        &self,
        gateway: &EngineGateway,
        case_id: &str,
        proyecto_id: Option<i64>,
        commitment: &AcceptedCommitment,
    ) -> EngineResult<Vec<Value>> {
        let mut accepted = read_list(gateway, case_id, ACCEPTED_COMMITMENTS).await?;
        let known = accepted
            .iter()
            .any(|c| c.get("id").and_then(value_as_text).as_deref() == Some(commitment.id.as_str()));

        if !known {
            accepted.push(json!({
                "id": commitment.id,
                "detalle": commitment.detalle,
                "fecha": commitment.fecha,
                "estado": commitment.estado,
            }));
            gateway
                .update_case_variable(case_id, ACCEPTED_COMMITMENTS, Value::Array(accepted.clone()))
                .await?;
        }

        let proyecto_id = match proyecto_id {
            Some(id) => Some(id),
            None => read_identifier(gateway, case_id, "proyectoId")
                .await?
                .as_deref()
                .and_then(parse_project_id),
        };
        if let Some(proyecto_id) = proyecto_id {
            self.mirror_write(
                "mirror accepted commitment",
                self.mirror().append_commitment(proyecto_id, commitment),
            )
            .await;
        }
        Ok(accepted)
    }

    /// Monitoring summary: the mirror first, the case variables otherwise.
    pub async fn resumen_proyecto(&self, request: ProjectRequest) -> ActionResult {
        let mut proyecto_id = request.proyecto_id.as_deref().and_then(parse_project_id);

        let gateway = match &request.case_id {
            Some(_) => Some(self.connect().await?),
            None => None,
        };
        if let (None, Some(gateway), Some(case_id)) = (proyecto_id, &gateway, &request.case_id) {
            proyecto_id = read_identifier(gateway, case_id, "proyectoId")
                .await?
                .as_deref()
                .and_then(parse_project_id);
        }

        if let Some(id) = proyecto_id {
            let cached = self
                .mirror_write("read project snapshot", self.mirror().project(id))
                .await
                .flatten();
            if let Some(snapshot) = cached.filter(|s| !s.nombre.is_empty()) {
                return Ok(ActionReply::ok()
                    .with("caseId", &request.case_id)
                    .with("fuente", "espejo")
                    .with("proyecto", snapshot));
            }
        }

        let (Some(gateway), Some(case_id)) = (&gateway, &request.case_id) else {
            return Err(ActionError::BadRequest(
                "Proyecto sin datos de monitoreo; indique caseId".into(),
            ));
        };

        let nombre = read_text(gateway, case_id, "nombreProyecto").await?.unwrap_or_default();
        let descripcion = read_text(gateway, case_id, "descripcionProyecto")
            .await?
            .unwrap_or_default();
        let plan = read_json(gateway, case_id, "planTrabajo")
            .await?
            .unwrap_or_else(|| json!({}));
        let compromisos: Vec<AcceptedCommitment> = read_list(gateway, case_id, ACCEPTED_COMMITMENTS)
            .await?
            .into_iter()
            .filter_map(|c| serde_json::from_value(c).ok())
            .collect();

        if let Some(id) = proyecto_id {
            let update = ProjectUpdate {
                nombre: Some(nombre.clone()).filter(|n| !n.is_empty()),
                descripcion: Some(descripcion.clone()).filter(|d| !d.is_empty()),
                plan_trabajo: Some(plan.clone()),
                compromisos_aceptados: Some(compromisos.clone()),
                ..ProjectUpdate::new(id)
            };
            self.mirror_write("refresh project snapshot", self.mirror().upsert_project(&update))
                .await;
        }

        Ok(ActionReply::ok()
            .with("caseId", case_id)
            .with("fuente", "motor")
            .with(
                "proyecto",
                json!({
                    "proyecto_id": proyecto_id,
                    "nombre": nombre,
                    "descripcion": descripcion,
                    "plan_trabajo": plan,
                    "compromisos_aceptados": compromisos,
                }),
            ))
    }

    /// Answer one board observation.
    pub async fn responder_observacion(&self, request: ResponderRequest) -> ActionResult {
        let case_id = require_case(request.case_id)?;
        let mut errors = Vec::new();
        let observacion_id =
            required_text(request.observacion_id.as_deref(), "observacionId", &mut errors);
        let respuesta = required_text(request.respuesta.as_deref(), "respuesta", &mut errors);
        reject_invalid(errors)?;

        let gateway = self.connect().await?;
        let contract = Contract::new()
            .field("observacionId", observacion_id.as_str())
            .field("respuesta", respuesta);
        let step = TaskStep::tolerant(&case_id, tasks::ANSWER_OBSERVATIONS, self.waits().step_wait());
        let outcome = execute_if_ready(&gateway, self.assignee(), step, &contract).await?;

        Ok(ActionReply::ok()
            .with("caseId", &case_id)
            .with("observacionId", observacion_id)
            .note_for(&outcome))
    }

    /// Finalize a project unless the board still has open observations on it.
    pub async fn finalizar_proyecto(&self, request: ProjectRequest) -> ActionResult {
        let case_id = require_case(request.case_id)?;
        let gateway = self.connect().await?;

        let proyecto_id = match request.proyecto_id {
            Some(id) => id,
            None => read_identifier(&gateway, &case_id, "proyectoId")
                .await?
                .ok_or_else(|| ActionError::BadRequest("Falta proyectoId".into()))?,
        };

        let downstream = self.downstream_for_case(&gateway, &case_id).await?;
        let observations = downstream.list_observations(&proyecto_id).await?;
        let open: Vec<String> = observations
            .iter()
            .filter(|o| o.blocks_finalization())
            .map(|o| o.id_text().unwrap_or_default())
            .collect();
        if !open.is_empty() {
            info!(case_id = %case_id, proyecto_id = %proyecto_id, open = open.len(), "finalization blocked by observations");
            return Err(ActionError::PendingObservations {
                count: open.len(),
                ids: open,
            });
        }

        let contract = Contract::new()
            .field("proyectoId", proyecto_id.as_str())
            .field("finalizar", true);
        let step = TaskStep::tolerant(&case_id, tasks::FINALIZE_PROJECT, self.waits().step_wait());
        let outcome = execute_if_ready(&gateway, self.assignee(), step, &contract).await?;

        Ok(ActionReply::ok()
            .with("caseId", &case_id)
            .with("proyectoId", proyecto_id)
            .with("finalizado", outcome.executed())
            .note_for(&outcome))
    }

    /// Withdraw the network from the collaboration cycle.
    pub async fn salir_colaboracion(&self, request: SalirRequest) -> ActionResult {
        let case_id = require_case(request.case_id)?;
        let gateway = self.connect().await?;

        let contract = Contract::new().field("continuar", false);
        let step = TaskStep::tolerant(&case_id, tasks::KEEP_COLLABORATING, self.waits().step_wait());
        let outcome = execute_if_ready(&gateway, self.assignee(), step, &contract).await?;

        let finished = !gateway
            .get_case(&case_id)
            .await?
            .is_some_and(|case| case.is_active());
        if finished {
            self.mirror_write("forget finished case", self.mirror().forget_case(&case_id))
                .await;
        }

        Ok(ActionReply::ok()
            .with("caseId", &case_id)
            .with("continuar", false)
            .with("casoFinalizado", finished)
            .note_for(&outcome))
    }
}
