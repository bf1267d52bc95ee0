//! End-to-end action flows against mocked engine and downstream APIs.

mod fixtures;

use fixtures::{days_from_today, orchestrator, valid_iniciar_payload, DownstreamMock, EngineMock, ACCESS_TOKEN};
use pp_front::mirror::{MirrorStore, ProjectUpdate};
use pp_front::orchestrator::council::ObservacionesRequest;
use pp_front::orchestrator::planning::{
    EvaluarPropuestasRequest, LoginRequest, PedidoRequest, ProjectRequest, SalirRequest,
};
use pp_front::orchestrator::{tasks, ActionError, ALREADY_DONE_NOTE};
use serde_json::json;

const INSTANTIATE_PLANNING: &str = "/bonita/API/bpm/process/777/instantiation";

fn login_as(user: &str) -> LoginRequest {
    LoginRequest {
        user: Some(user.to_string()),
        pass: Some("secreto".to_string()),
        consejo: false,
    }
}

fn execution_path(task_id: &str) -> String {
    format!("/bonita/API/bpm/userTask/{task_id}/execution")
}

#[tokio::test]
async fn test_login_then_next_step_routes_to_plan_page() {
    let engine = EngineMock::new().await;
    engine.mock_instantiation("777", 1001).await;
    engine.mock_ready_task("1001", tasks::DEFINE_PLAN, "20001").await;
    engine.mock_case("1001", "started").await;
    let (orch, mirror) = orchestrator(&engine, None);

    let reply = orch.login(login_as("ana")).await.unwrap();
    assert_eq!(reply.get("caseId"), Some(&json!("1001")));
    assert_eq!(reply.get("reanudado"), Some(&json!(false)));

    let sent = engine.bodies("POST", INSTANTIATE_PLANNING).await;
    assert_eq!(sent, vec![json!({"apiUser": "ana", "apiPass": "secreto"})]);

    let session = mirror.remembered_session("ana").await.unwrap().unwrap();
    assert_eq!(session.case_id, "1001");
    assert_eq!(session.proceso, "ProjectPlanning");

    let next = orch.next_step(Some("1001".into())).await.unwrap().into_json();
    assert_eq!(next["rol"], "ong_originante");
    assert_eq!(next["url"], "/bonita/nuevo/?case=1001");
    assert_eq!(next["tarea"], tasks::DEFINE_PLAN);
    assert_eq!(next["finalizado"], false);
}

#[tokio::test]
async fn test_login_resumes_live_case() {
    let engine = EngineMock::new().await;
    engine.mock_case("900", "started").await;
    let (orch, mirror) = orchestrator(&engine, None);
    mirror.remember_session("ana", "900", "ProjectPlanning").await.unwrap();

    let reply = orch.login(login_as("ana")).await.unwrap();
    assert_eq!(reply.get("caseId"), Some(&json!("900")));
    assert_eq!(reply.get("reanudado"), Some(&json!(true)));
    assert_eq!(engine.count("POST", INSTANTIATE_PLANNING).await, 0);
}

#[tokio::test]
async fn test_login_replaces_finished_case_in_single_row() {
    let engine = EngineMock::new().await;
    engine.mock_case("900", "completed").await;
    engine.mock_instantiation("777", 1001).await;
    engine.mock_ready_task("1001", tasks::DEFINE_PLAN, "20001").await;
    let (orch, mirror) = orchestrator(&engine, None);
    mirror.remember_session("ana", "900", "ProjectPlanning").await.unwrap();

    let reply = orch.login(login_as("ana")).await.unwrap();
    assert_eq!(reply.get("caseId"), Some(&json!("1001")));
    assert_eq!(reply.get("reanudado"), Some(&json!(false)));

    assert_eq!(mirror.session_count().await, 1);
    let session = mirror.remembered_session("ana").await.unwrap().unwrap();
    assert_eq!(session.case_id, "1001");
}

#[tokio::test]
async fn test_login_without_first_task_is_unauthorized() {
    let engine = EngineMock::new().await;
    engine.mock_case("900", "completed").await;
    engine.mock_instantiation("777", 1001).await;
    let (orch, mirror) = orchestrator(&engine, None);
    mirror.remember_session("ana", "900", "ProjectPlanning").await.unwrap();

    let err = orch.login(login_as("ana")).await.unwrap_err();
    assert!(matches!(err, ActionError::Unauthorized { .. }));
    assert_eq!(err.status_code(), 401);
    assert_eq!(mirror.session_count().await, 0);
    assert!(mirror.remembered_session("ana").await.unwrap().is_none());
}

#[tokio::test]
async fn test_login_requires_credentials_before_touching_engine() {
    let engine = EngineMock::new().await;
    let (orch, _mirror) = orchestrator(&engine, None);

    let err = orch
        .login(LoginRequest {
            user: Some("ana".into()),
            ..LoginRequest::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
    assert_eq!(engine.total_requests().await, 0);
}

#[tokio::test]
async fn test_second_pedido_submission_is_tolerated() {
    let engine = EngineMock::new().await;
    engine
        .mock_ready_task_times("1001", tasks::REGISTER_REQUEST, "30001", 1)
        .await;
    engine.mock_text_variable("1001", "pedidoId", "31").await;
    let (orch, _mirror) = orchestrator(&engine, None);

    let pedido = || PedidoRequest {
        case_id: Some("1001".into()),
        tipo: Some("dinero".into()),
        descripcion: Some("Fondos para semillas".into()),
        cantidad: Some(json!(1500)),
        ..PedidoRequest::default()
    };

    let first = orch.registrar_pedido(pedido()).await.unwrap();
    assert!(first.is_created());
    assert_eq!(first.get("pedidoId"), Some(&json!("31")));
    assert!(first.get("note").is_none());

    let second = orch.registrar_pedido(pedido()).await.unwrap();
    assert_eq!(second.status_code(), 200);
    assert_eq!(second.get("note"), Some(&json!(ALREADY_DONE_NOTE)));

    let executions = engine.bodies("POST", &execution_path("30001")).await;
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0]["tipo"], "dinero");
    assert_eq!(executions[0]["cantidad"], 1500);
    assert_eq!(executions[0]["otroPedido"], false);
}

#[tokio::test]
async fn test_pedido_validation_fails_without_engine_calls() {
    let engine = EngineMock::new().await;
    let (orch, _mirror) = orchestrator(&engine, None);

    let err = orch
        .registrar_pedido(PedidoRequest {
            case_id: Some("1001".into()),
            cantidad: Some(json!(-3)),
            ..PedidoRequest::default()
        })
        .await
        .unwrap_err();

    let ActionError::Validation(errors) = &err else {
        panic!("expected validation error, got {err:?}");
    };
    let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, vec!["tipo", "descripcion", "cantidad"]);
    assert_eq!(engine.total_requests().await, 0);
}

#[tokio::test]
async fn test_invalid_plan_never_reaches_engine() {
    let engine = EngineMock::new().await;
    let (orch, _mirror) = orchestrator(&engine, None);

    let mut payload = valid_iniciar_payload();
    payload["nombre"] = json!("  ");
    payload["caseId"] = json!("1001");

    let err = orch.iniciar_proyecto(payload).await.unwrap_err();
    assert_eq!(err.status_code(), 400);
    let body = err.envelope();
    assert!(body["errors"]
        .as_array()
        .unwrap()
        .iter()
        .any(|e| e["path"] == "nombre"));
    assert_eq!(engine.total_requests().await, 0);
}

#[tokio::test]
async fn test_iniciar_without_case_or_credentials_skips_engine() {
    let engine = EngineMock::new().await;
    let (orch, _mirror) = orchestrator(&engine, None);

    let err = orch.iniciar_proyecto(valid_iniciar_payload()).await.unwrap_err();
    assert_eq!(err.status_code(), 400);
    assert_eq!(err.envelope()["error"], "Faltan caseId o credenciales");
    assert_eq!(engine.total_requests().await, 0);
}

#[tokio::test]
async fn test_iniciar_on_existing_case_executes_plan_and_mirrors_project() {
    let engine = EngineMock::new().await;
    engine.mock_ready_task("1001", tasks::DEFINE_PLAN, "20001").await;
    engine
        .mock_text_variable("1001", "body_proyecto", r#"{"data": {"id": 55, "nombre": "Huerta"}}"#)
        .await;
    let (orch, mirror) = orchestrator(&engine, None);

    let mut payload = valid_iniciar_payload();
    payload["caseId"] = json!(1001);

    let reply = orch.iniciar_proyecto(payload).await.unwrap();
    assert!(reply.is_created());
    assert_eq!(reply.get("proyectoId"), Some(&json!("55")));
    assert_eq!(reply.get("fechaInicio"), Some(&json!(days_from_today(10))));
    assert_eq!(reply.get("fechaFin"), Some(&json!(days_from_today(40))));

    let executions = engine.bodies("POST", &execution_path("20001")).await;
    assert_eq!(executions.len(), 1);
    let contract = &executions[0];
    assert_eq!(contract["nombre"], "Huerta comunitaria");
    assert!(contract["planTrabajo"].is_string());
    assert!(contract["planEconomico"].is_string());
    assert_eq!(contract["fechaInicio"], days_from_today(10));

    let snapshot = mirror.project(55).await.unwrap().unwrap();
    assert_eq!(snapshot.nombre, "Huerta comunitaria");
    assert_eq!(snapshot.plan_trabajo["etapas"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_iniciar_new_case_without_plan_task_is_conflict() {
    let engine = EngineMock::new().await;
    engine.mock_instantiation("777", 1001).await;
    let (orch, _mirror) = orchestrator(&engine, None);

    let mut payload = valid_iniciar_payload();
    payload["apiUser"] = json!("ana");
    payload["apiPass"] = json!("secreto");

    let err = orch.iniciar_proyecto(payload).await.unwrap_err();
    assert!(matches!(err, ActionError::TaskMissing { .. }));
    assert_eq!(err.status_code(), 409);
}

#[tokio::test]
async fn test_finalization_blocked_by_pending_observation() {
    let engine = EngineMock::new().await;
    let downstream = DownstreamMock::new().await;
    engine.mock_text_variable("1001", "access", ACCESS_TOKEN).await;
    engine.mock_ready_task("1001", tasks::FINALIZE_PROJECT, "40001").await;
    downstream
        .mock_observations(
            "55",
            json!([
                {"id": 1, "descripcion": "Falta presupuesto", "estado": "pendiente"},
                {"id": 2, "descripcion": "Fechas", "estado": "resuelta"}
            ]),
        )
        .await;
    let (orch, _mirror) = orchestrator(&engine, Some(&downstream));

    let err = orch
        .finalizar_proyecto(ProjectRequest {
            case_id: Some("1001".into()),
            proyecto_id: Some("55".into()),
        })
        .await
        .unwrap_err();

    match &err {
        ActionError::PendingObservations { count, ids } => {
            assert_eq!(*count, 1);
            assert_eq!(ids, &vec!["1".to_string()]);
        }
        other => panic!("expected pending observations, got {other:?}"),
    }
    assert_eq!(err.status_code(), 400);
    assert_eq!(engine.count("POST", &execution_path("40001")).await, 0);
}

#[tokio::test]
async fn test_finalization_proceeds_when_observations_are_resolved() {
    let engine = EngineMock::new().await;
    let downstream = DownstreamMock::new().await;
    engine
        .mock_variable("1001", "access", "java.lang.String", json!(r#"{"access": "jwt-token"}"#))
        .await;
    engine.mock_ready_task("1001", tasks::FINALIZE_PROJECT, "40001").await;
    downstream
        .mock_observations("55", json!({"results": [{"id": 2, "estado": "resuelta"}]}))
        .await;
    let (orch, _mirror) = orchestrator(&engine, Some(&downstream));

    let reply = orch
        .finalizar_proyecto(ProjectRequest {
            case_id: Some("1001".into()),
            proyecto_id: Some("55".into()),
        })
        .await
        .unwrap();
    assert_eq!(reply.get("finalizado"), Some(&json!(true)));
    assert_eq!(engine.count("POST", &execution_path("40001")).await, 1);
}

#[tokio::test]
async fn test_observations_over_monthly_limit_are_refused() {
    let engine = EngineMock::new().await;
    let downstream = DownstreamMock::new().await;
    engine.mock_text_variable("2002", "access", ACCESS_TOKEN).await;
    engine.mock_ready_task("2002", tasks::LOAD_OBSERVATIONS, "50001").await;
    downstream
        .mock_monthly_usage("55", json!({"cantidad": 2, "limite": 2}))
        .await;
    let (orch, _mirror) = orchestrator(&engine, Some(&downstream));

    let err = orch
        .enviar_observaciones(ObservacionesRequest {
            case_id: Some("2002".into()),
            proyecto_id: Some("55".into()),
            observaciones: vec![json!("Revisar el presupuesto")],
        })
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 429);
    let body = err.envelope();
    assert_eq!(body["detail"]["usadas"], 2);
    assert_eq!(body["detail"]["fuente"], "endpoint");
    assert_eq!(engine.count("POST", &execution_path("50001")).await, 0);
}

#[tokio::test]
async fn test_observations_fall_back_to_manual_count() {
    let engine = EngineMock::new().await;
    let downstream = DownstreamMock::new().await;
    engine.mock_text_variable("2002", "access", ACCESS_TOKEN).await;
    engine.mock_ready_task("2002", tasks::LOAD_OBSERVATIONS, "50001").await;
    engine.mock_flow_nodes("2002", json!([])).await;
    downstream
        .mock_observations("55", json!([{"id": 1, "descripcion": "Anterior", "estado": "resuelta"}]))
        .await;
    let (orch, _mirror) = orchestrator(&engine, Some(&downstream));

    let reply = orch
        .enviar_observaciones(ObservacionesRequest {
            case_id: Some("2002".into()),
            proyecto_id: Some("55".into()),
            observaciones: vec![json!({"detalle": "Revisar el presupuesto"})],
        })
        .await
        .unwrap();

    assert!(reply.is_created());
    assert_eq!(reply.get("enviadas"), Some(&json!(1)));
    assert_eq!(reply.get("fuente"), Some(&json!("manual_count")));

    let executions = engine.bodies("POST", &execution_path("50001")).await;
    assert_eq!(executions[0]["observaciones"], r#"["Revisar el presupuesto"]"#);
    assert_eq!(executions[0]["cantidad"], 1);
}

#[tokio::test]
async fn test_irregular_observation_rows_still_block_finalization() {
    let engine = EngineMock::new().await;
    let downstream = DownstreamMock::new().await;
    engine.mock_text_variable("1001", "access", ACCESS_TOKEN).await;
    engine.mock_ready_task("1001", tasks::FINALIZE_PROJECT, "40001").await;
    downstream
        .mock_observations(
            "55",
            json!([
                {"id": 1, "descripcion": null, "estado": "pendiente"},
                {"id": 2, "detalle": "a", "descripcion": "a", "estado": "pendiente"}
            ]),
        )
        .await;
    let (orch, _mirror) = orchestrator(&engine, Some(&downstream));

    let err = orch
        .finalizar_proyecto(ProjectRequest {
            case_id: Some("1001".into()),
            proyecto_id: Some("55".into()),
        })
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 400);
    assert!(matches!(err, ActionError::PendingObservations { count: 2, .. }));
    assert_eq!(engine.count("POST", &execution_path("40001")).await, 0);
}

#[tokio::test]
async fn test_manual_count_includes_irregular_rows() {
    let engine = EngineMock::new().await;
    let downstream = DownstreamMock::new().await;
    engine.mock_text_variable("2002", "access", ACCESS_TOKEN).await;
    engine.mock_ready_task("2002", tasks::LOAD_OBSERVATIONS, "50001").await;
    downstream
        .mock_observations(
            "55",
            json!([
                {"id": 1, "descripcion": null, "estado": "resuelta"},
                {"id": 2, "detalle": "a", "descripcion": "a", "estado": "pendiente"}
            ]),
        )
        .await;
    let (orch, _mirror) = orchestrator(&engine, Some(&downstream));

    let err = orch
        .enviar_observaciones(ObservacionesRequest {
            case_id: Some("2002".into()),
            proyecto_id: Some("55".into()),
            observaciones: vec![json!("Otra")],
        })
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 429);
    let body = err.envelope();
    assert_eq!(body["detail"]["usadas"], 2);
    assert_eq!(body["detail"]["fuente"], "manual_count");
    assert_eq!(engine.count("POST", &execution_path("50001")).await, 0);
}

#[tokio::test]
async fn test_observations_refused_when_usage_is_unknown() {
    let engine = EngineMock::new().await;
    let downstream = DownstreamMock::new().await;
    engine.mock_text_variable("2002", "access", ACCESS_TOKEN).await;
    engine.mock_ready_task("2002", tasks::LOAD_OBSERVATIONS, "50001").await;
    let (orch, _mirror) = orchestrator(&engine, Some(&downstream));

    let err = orch
        .enviar_observaciones(ObservacionesRequest {
            case_id: Some("2002".into()),
            proyecto_id: Some("55".into()),
            observaciones: vec![json!("Uno")],
        })
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 500);
    assert_eq!(engine.count("POST", &execution_path("50001")).await, 0);
}

#[tokio::test]
async fn test_failed_observation_connector_is_rate_limited() {
    let engine = EngineMock::new().await;
    let downstream = DownstreamMock::new().await;
    engine.mock_text_variable("2002", "access", ACCESS_TOKEN).await;
    engine.mock_ready_task("2002", tasks::LOAD_OBSERVATIONS, "50001").await;
    engine
        .mock_flow_nodes(
            "2002",
            json!([{"id": "91", "name": tasks::LOAD_OBSERVATIONS, "state": "failed", "type": "USER_TASK"}]),
        )
        .await;
    downstream
        .mock_monthly_usage("55", json!({"cantidad": 0, "limite": 2}))
        .await;
    let (orch, _mirror) = orchestrator(&engine, Some(&downstream));

    let err = orch
        .enviar_observaciones(ObservacionesRequest {
            case_id: Some("2002".into()),
            proyecto_id: Some("55".into()),
            observaciones: vec![json!("Uno")],
        })
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 429);
    assert_eq!(err.envelope()["detail"]["nodo"], "91");
}

#[tokio::test]
async fn test_next_step_falls_back_to_role_landing_page() {
    let engine = EngineMock::new().await;
    engine.mock_case("1001", "started").await;
    engine.mock_text_variable("1001", "rol", "Red ONG").await;
    let (orch, _mirror) = orchestrator(&engine, None);

    let next = orch.next_step(Some("1001".into())).await.unwrap().into_json();
    assert_eq!(next["rol"], "red_ong");
    assert_eq!(next["url"], "/bonita/revisar/?case=1001");
    assert!(next["tarea"].is_null());
}

#[tokio::test]
async fn test_next_step_refuses_unknown_role() {
    let engine = EngineMock::new().await;
    engine.mock_case("1001", "started").await;
    engine.mock_text_variable("1001", "rol", "visitante").await;
    let (orch, _mirror) = orchestrator(&engine, None);

    let err = orch.next_step(Some("1001".into())).await.unwrap_err();
    assert!(matches!(err, ActionError::Forbidden { .. }));
    assert_eq!(err.status_code(), 403);
}

#[tokio::test]
async fn test_next_step_on_finished_case_sends_to_login() {
    let engine = EngineMock::new().await;
    engine.mock_case("1001", "completed").await;
    let (orch, mirror) = orchestrator(&engine, None);
    mirror.remember_session("ana", "1001", "ProjectPlanning").await.unwrap();

    let next = orch.next_step(Some("1001".into())).await.unwrap().into_json();
    assert_eq!(next["finalizado"], true);
    assert_eq!(next["url"], "/bonita/login/");
    assert_eq!(mirror.session_count().await, 0);
}

#[tokio::test]
async fn test_leaving_collaboration_forgets_finished_case() {
    let engine = EngineMock::new().await;
    engine.mock_ready_task("3003", tasks::KEEP_COLLABORATING, "70001").await;
    engine.mock_case("3003", "completed").await;
    let (orch, mirror) = orchestrator(&engine, None);
    mirror.remember_session("red", "3003", "ProjectPlanning").await.unwrap();

    let reply = orch
        .salir_colaboracion(SalirRequest {
            case_id: Some("3003".into()),
        })
        .await
        .unwrap();
    assert_eq!(reply.get("continuar"), Some(&json!(false)));
    assert_eq!(reply.get("casoFinalizado"), Some(&json!(true)));
    assert_eq!(mirror.session_count().await, 0);

    let executions = engine.bodies("POST", &execution_path("70001")).await;
    assert_eq!(executions, vec![json!({"continuar": false})]);
}

#[tokio::test]
async fn test_accepted_proposal_is_accumulated_once() {
    let engine = EngineMock::new().await;
    engine.mock_ready_task("1001", tasks::EVALUATE_PROPOSALS, "60001").await;
    engine
        .mock_text_variable(
            "1001",
            "compromisos",
            r#"[{"id": 3, "descripcion": "Transporte", "fechaCompromiso": "2026-12-01"}]"#,
        )
        .await;
    engine.mock_text_variable("1001", "compromisosAceptados", "[]").await;
    engine.mock_variable_update("1001", "compromisosAceptados").await;
    engine
        .mock_variable("1001", "proyectoId", "java.lang.Long", json!(55))
        .await;
    let (orch, mirror) = orchestrator(&engine, None);

    let reply = orch
        .evaluar_propuestas(EvaluarPropuestasRequest {
            case_id: Some("1001".into()),
            compromiso_id: Some("3".into()),
        })
        .await
        .unwrap();
    assert_eq!(reply.get("aceptado"), Some(&json!(true)));

    let updates = engine
        .bodies("PUT", "/bonita/API/bpm/caseVariable/1001/compromisosAceptados")
        .await;
    assert_eq!(updates.len(), 1);
    let stored: serde_json::Value = serde_json::from_str(updates[0]["value"].as_str().unwrap()).unwrap();
    assert_eq!(stored[0]["id"], "3");
    assert_eq!(stored[0]["detalle"], "Transporte");

    let snapshot = mirror.project(55).await.unwrap().unwrap();
    assert_eq!(snapshot.compromisos_aceptados.len(), 1);
    assert_eq!(snapshot.compromisos_aceptados[0].fecha, "2026-12-01");
}

#[tokio::test]
async fn test_summary_served_from_mirror_without_engine() {
    let engine = EngineMock::new().await;
    let (orch, mirror) = orchestrator(&engine, None);
    mirror
        .upsert_project(&ProjectUpdate {
            nombre: Some("Huerta comunitaria".into()),
            ..ProjectUpdate::new(55)
        })
        .await
        .unwrap();

    let reply = orch
        .resumen_proyecto(ProjectRequest {
            case_id: None,
            proyecto_id: Some("55".into()),
        })
        .await
        .unwrap()
        .into_json();
    assert_eq!(reply["fuente"], "espejo");
    assert_eq!(reply["proyecto"]["nombre"], "Huerta comunitaria");
    assert_eq!(engine.total_requests().await, 0);
}

#[tokio::test]
async fn test_summary_reads_engine_and_refreshes_mirror() {
    let engine = EngineMock::new().await;
    engine.mock_text_variable("1001", "proyectoId", "55").await;
    engine.mock_text_variable("1001", "nombreProyecto", "Huerta").await;
    engine
        .mock_text_variable("1001", "planTrabajo", r#"{"etapas": []}"#)
        .await;
    let (orch, mirror) = orchestrator(&engine, None);

    let reply = orch
        .resumen_proyecto(ProjectRequest {
            case_id: Some("1001".into()),
            proyecto_id: None,
        })
        .await
        .unwrap()
        .into_json();
    assert_eq!(reply["fuente"], "motor");
    assert_eq!(reply["proyecto"]["nombre"], "Huerta");
    assert_eq!(reply["proyecto"]["proyecto_id"], 55);

    let snapshot = mirror.project(55).await.unwrap().unwrap();
    assert_eq!(snapshot.nombre, "Huerta");
}
