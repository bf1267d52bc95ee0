use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{
    now_timestamp, AcceptedCommitment, MirrorStore, ProjectSnapshot, ProjectUpdate, UserSession,
};

/// Mirror kept in process memory; used when no database is configured.
#[derive(Debug, Default)]
pub struct InMemoryMirror {
    sessions: RwLock<HashMap<String, UserSession>>,
    projects: RwLock<HashMap<i64, ProjectSnapshot>>,
}

impl InMemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

fn blank_snapshot(proyecto_id: i64) -> ProjectSnapshot {
    let now = now_timestamp();
    ProjectSnapshot {
        proyecto_id,
        nombre: String::new(),
        descripcion: String::new(),
        plan_trabajo: json!({}),
        compromisos_aceptados: Vec::new(),
        creado_en: now.clone(),
        actualizado_en: now,
    }
}

#[async_trait]
impl MirrorStore for InMemoryMirror {
    async fn remembered_session(&self, api_username: &str) -> Result<Option<UserSession>> {
        Ok(self.sessions.read().await.get(api_username).cloned())
    }

    async fn remember_session(&self, api_username: &str, case_id: &str, proceso: &str) -> Result<()> {
        let now = now_timestamp();
        let mut sessions = self.sessions.write().await;
        let creado_en = sessions
            .get(api_username)
            .map(|s| s.creado_en.clone())
            .unwrap_or_else(|| now.clone());
        sessions.insert(
            api_username.to_string(),
            UserSession {
                api_username: api_username.to_string(),
                case_id: case_id.to_string(),
                proceso: proceso.to_string(),
                creado_en,
                actualizado_en: now,
            },
        );
        Ok(())
    }

    async fn forget_session(&self, api_username: &str) -> Result<()> {
        self.sessions.write().await.remove(api_username);
        Ok(())
    }

    async fn forget_case(&self, case_id: &str) -> Result<u64> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.case_id != case_id);
        Ok((before - sessions.len()) as u64)
    }

    async fn project(&self, proyecto_id: i64) -> Result<Option<ProjectSnapshot>> {
        Ok(self.projects.read().await.get(&proyecto_id).cloned())
    }

    async fn upsert_project(&self, update: &ProjectUpdate) -> Result<()> {
        let mut projects = self.projects.write().await;
        let snapshot = projects
            .entry(update.proyecto_id)
            .or_insert_with(|| blank_snapshot(update.proyecto_id));

        if let Some(nombre) = &update.nombre {
            snapshot.nombre = nombre.clone();
        }
        if let Some(descripcion) = &update.descripcion {
            snapshot.descripcion = descripcion.clone();
        }
        if let Some(plan) = &update.plan_trabajo {
            snapshot.plan_trabajo = plan.clone();
        }
        if let Some(compromisos) = &update.compromisos_aceptados {
            snapshot.compromisos_aceptados = compromisos.clone();
        }
        snapshot.actualizado_en = now_timestamp();
        Ok(())
    }

    async fn append_commitment(&self, proyecto_id: i64, commitment: &AcceptedCommitment) -> Result<()> {
        let mut projects = self.projects.write().await;
        let snapshot = projects
            .entry(proyecto_id)
            .or_insert_with(|| blank_snapshot(proyecto_id));
        if !snapshot.compromisos_aceptados.iter().any(|c| c.id == commitment.id) {
            snapshot.compromisos_aceptados.push(commitment.clone());
            snapshot.actualizado_en = now_timestamp();
        }
        Ok(())
    }

    async fn close(&self) {}
}
