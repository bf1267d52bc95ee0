//! Inbound HTTP surface under `/api/bonita/`.

use axum::{
    extract::{Path, State},
    response::{Json, Response},
    routing::{get, post},
    Router,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::future::Future;
use tower_http::trace::TraceLayer;
use tracing::{info, Instrument};

use super::requests::{decode, LenientJson};
use super::response::respond;
use crate::engine::value_as_text;
use crate::observability::engine_metrics;
use crate::orchestrator::{ActionResult, TaskOrchestrator};
use crate::telemetry::{create_action_span, generate_correlation_id};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: TaskOrchestrator,
}

pub fn router(orchestrator: TaskOrchestrator) -> Router {
    Router::new()
        .route("/api/bonita/login/", post(login))
        .route("/api/bonita/iniciar/", post(iniciar))
        .route("/api/bonita/revisar/", post(revisar))
        .route("/api/bonita/pedido/", post(pedido))
        .route("/api/bonita/elegir-proyecto/", post(elegir_proyecto))
        .route("/api/bonita/revisar-pedidos/", post(revisar_pedidos))
        .route(
            "/api/bonita/revisar-pedidos/finalizar/",
            post(finalizar_revision_pedidos),
        )
        .route("/api/bonita/compromiso/", post(compromiso))
        .route("/api/bonita/next-step/", post(next_step))
        .route("/api/bonita/revisar-compromisos/", post(revisar_compromisos))
        .route("/api/bonita/evaluar-propuestas/", post(evaluar_propuestas))
        .route("/api/bonita/acumular-compromiso/", post(acumular_compromiso))
        .route("/api/bonita/resumen-proyecto/", post(resumen_proyecto))
        .route("/api/bonita/responder-observacion/", post(responder_observacion))
        .route("/api/bonita/finalizar-proyecto/", post(finalizar_proyecto))
        .route("/api/bonita/salir-colaboracion/", post(salir_colaboracion))
        // Consejo Directivo
        .route("/api/bonita/consejo/proyectos/", post(consejo_proyectos))
        .route(
            "/api/bonita/consejo/proyectos/:proyecto_id/observaciones/",
            post(ver_observaciones),
        )
        .route("/api/bonita/consejo/observaciones/", post(enviar_observaciones))
        .route("/api/bonita/consejo/evaluar/", post(consejo_evaluar))
        .route("/api/bonita/consejo/datos-evaluacion/", post(datos_evaluacion))
        .route("/api/bonita/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { orchestrator })
}

/// Decode the body and run one action inside its correlation span.
async fn dispatch<T, F, Fut>(action: &'static str, body: Value, handler: F) -> Response
where
    T: DeserializeOwned,
    F: FnOnce(T) -> Fut,
    Fut: Future<Output = ActionResult>,
{
    let case_id = body.get("caseId").and_then(value_as_text);
    let correlation_id = generate_correlation_id();
    let span = create_action_span(action, case_id.as_deref(), &correlation_id);

    let result = async {
        info!("action started");
        let request = decode::<T>(body)?;
        handler(request).await
    }
    .instrument(span.clone())
    .await;

    span.in_scope(|| respond(action, result))
}

async fn login(State(state): State<AppState>, LenientJson(body): LenientJson) -> Response {
    dispatch("login", body, |r| state.orchestrator.login(r)).await
}

async fn iniciar(State(state): State<AppState>, LenientJson(body): LenientJson) -> Response {
    dispatch("iniciar_proyecto", body, |data: Value| state.orchestrator.iniciar_proyecto(data)).await
}

async fn revisar(State(state): State<AppState>, LenientJson(body): LenientJson) -> Response {
    dispatch("revisar_proyectos", body, |r| state.orchestrator.revisar_proyectos(r)).await
}

async fn pedido(State(state): State<AppState>, LenientJson(body): LenientJson) -> Response {
    dispatch("registrar_pedido", body, |r| state.orchestrator.registrar_pedido(r)).await
}

async fn elegir_proyecto(State(state): State<AppState>, LenientJson(body): LenientJson) -> Response {
    dispatch("elegir_proyecto", body, |r| state.orchestrator.elegir_proyecto(r)).await
}

async fn revisar_pedidos(State(state): State<AppState>, LenientJson(body): LenientJson) -> Response {
    dispatch("revisar_pedidos", body, |r| state.orchestrator.revisar_pedidos(r)).await
}

async fn finalizar_revision_pedidos(
    State(state): State<AppState>,
    LenientJson(body): LenientJson,
) -> Response {
    dispatch("finalizar_revision_pedidos", body, |r| {
        state.orchestrator.finalizar_revision_pedidos(r)
    })
    .await
}

async fn compromiso(State(state): State<AppState>, LenientJson(body): LenientJson) -> Response {
    dispatch("registrar_compromiso", body, |r| state.orchestrator.registrar_compromiso(r)).await
}

async fn next_step(State(state): State<AppState>, LenientJson(body): LenientJson) -> Response {
    dispatch("next_step", body, |r: crate::orchestrator::CaseRequest| {
        state.orchestrator.next_step(r.case_id)
    })
    .await
}

async fn revisar_compromisos(State(state): State<AppState>, LenientJson(body): LenientJson) -> Response {
    dispatch("revisar_compromisos", body, |r| state.orchestrator.revisar_compromisos(r)).await
}

async fn evaluar_propuestas(State(state): State<AppState>, LenientJson(body): LenientJson) -> Response {
    dispatch("evaluar_propuestas", body, |r| state.orchestrator.evaluar_propuestas(r)).await
}

async fn acumular_compromiso(State(state): State<AppState>, LenientJson(body): LenientJson) -> Response {
    dispatch("acumular_compromiso", body, |r| state.orchestrator.acumular_compromiso(r)).await
}

async fn resumen_proyecto(State(state): State<AppState>, LenientJson(body): LenientJson) -> Response {
    dispatch("resumen_proyecto", body, |r| state.orchestrator.resumen_proyecto(r)).await
}

async fn responder_observacion(
    State(state): State<AppState>,
    LenientJson(body): LenientJson,
) -> Response {
    dispatch("responder_observacion", body, |r| {
        state.orchestrator.responder_observacion(r)
    })
    .await
}

async fn finalizar_proyecto(State(state): State<AppState>, LenientJson(body): LenientJson) -> Response {
    dispatch("finalizar_proyecto", body, |r| state.orchestrator.finalizar_proyecto(r)).await
}

async fn salir_colaboracion(State(state): State<AppState>, LenientJson(body): LenientJson) -> Response {
    dispatch("salir_colaboracion", body, |r| state.orchestrator.salir_colaboracion(r)).await
}

async fn consejo_proyectos(State(state): State<AppState>, LenientJson(body): LenientJson) -> Response {
    dispatch("consejo_proyectos", body, |r| state.orchestrator.proyectos_en_ejecucion(r)).await
}

async fn ver_observaciones(
    State(state): State<AppState>,
    Path(proyecto_id): Path<i64>,
    LenientJson(body): LenientJson,
) -> Response {
    let proyecto_id = proyecto_id.to_string();
    dispatch("ver_observaciones", body, |r| {
        state.orchestrator.ver_observaciones(&proyecto_id, r)
    })
    .await
}

async fn enviar_observaciones(State(state): State<AppState>, LenientJson(body): LenientJson) -> Response {
    dispatch("enviar_observaciones", body, |r| state.orchestrator.enviar_observaciones(r)).await
}

async fn consejo_evaluar(State(state): State<AppState>, LenientJson(body): LenientJson) -> Response {
    dispatch("evaluar_proyecto", body, |r| state.orchestrator.evaluar_proyecto(r)).await
}

async fn datos_evaluacion(State(state): State<AppState>, LenientJson(body): LenientJson) -> Response {
    dispatch("datos_evaluacion", body, |r| state.orchestrator.datos_evaluacion(r)).await
}

/// GET /api/bonita/health
async fn health() -> Json<Value> {
    Json(json!({
        "ok": true,
        "metrics": engine_metrics().get_stats(),
    }))
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve<F>(orchestrator: TaskOrchestrator, bind_addr: &str, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("pp-front listening on {}", listener.local_addr()?);
    axum::serve(listener, router(orchestrator))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
