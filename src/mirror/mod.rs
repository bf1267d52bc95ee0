//! Local mirror of engine-held data.
//!
//! Two small tables: the active case remembered for each API user, and a
//! denormalized snapshot of each tracked project. The engine stays the
//! authority; everything here is a cache written opportunistically.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::DatabaseConfig;
use crate::engine::value_as_text;
use crate::observability::engine_metrics;

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryMirror;
pub use sqlite::SqliteMirror;

/// One API user's active case (`SesionBonita`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSession {
    pub api_username: String,
    pub case_id: String,
    pub proceso: String,
    pub creado_en: String,
    pub actualizado_en: String,
}

/// A commitment accepted into a project's plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedCommitment {
    #[serde(deserialize_with = "loose_string")]
    pub id: String,
    #[serde(default)]
    pub detalle: String,
    #[serde(default)]
    pub fecha: String,
    #[serde(default = "default_estado")]
    pub estado: String,
}

fn default_estado() -> String {
    "aceptado".to_string()
}

fn loose_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    value_as_text(&value).ok_or_else(|| serde::de::Error::custom("missing commitment id"))
}

/// Cached view of a downstream project (`ProyectoMonitoreo`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub proyecto_id: i64,
    pub nombre: String,
    pub descripcion: String,
    pub plan_trabajo: Value,
    pub compromisos_aceptados: Vec<AcceptedCommitment>,
    pub creado_en: String,
    pub actualizado_en: String,
}

/// Partial update; `None` keeps whatever the mirror already holds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectUpdate {
    pub proyecto_id: i64,
    pub nombre: Option<String>,
    pub descripcion: Option<String>,
    pub plan_trabajo: Option<Value>,
    pub compromisos_aceptados: Option<Vec<AcceptedCommitment>>,
}

impl ProjectUpdate {
    pub fn new(proyecto_id: i64) -> Self {
        Self {
            proyecto_id,
            ..Self::default()
        }
    }
}

/// Storage seam for the mirror, so orchestration can run against SQLite or memory.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MirrorStore: Send + Sync {
    async fn remembered_session(&self, api_username: &str) -> Result<Option<UserSession>>;

    /// Insert or overwrite the single row kept per username.
    async fn remember_session(&self, api_username: &str, case_id: &str, proceso: &str) -> Result<()>;

    async fn forget_session(&self, api_username: &str) -> Result<()>;

    /// Drop every session pointing at `case_id`; returns how many were removed.
    async fn forget_case(&self, case_id: &str) -> Result<u64>;

    async fn project(&self, proyecto_id: i64) -> Result<Option<ProjectSnapshot>>;

    async fn upsert_project(&self, update: &ProjectUpdate) -> Result<()>;

    /// Append to the accepted commitments, ignoring ids already present.
    async fn append_commitment(&self, proyecto_id: i64, commitment: &AcceptedCommitment) -> Result<()>;

    async fn close(&self);
}

/// Open the configured mirror: SQLite when a database is configured, memory otherwise.
pub async fn open_mirror(database: Option<&DatabaseConfig>) -> Result<Arc<dyn MirrorStore>> {
    match database {
        Some(db) => {
            info!("Opening mirror database at {}", db.url);
            let store = SqliteMirror::new(&db.url, db.max_connections, db.auto_migrate).await?;
            Ok(Arc::new(store))
        }
        None => {
            info!("Database not configured, mirror kept in memory");
            Ok(Arc::new(InMemoryMirror::new()))
        }
    }
}

/// Run a mirror operation without letting it decide the outcome of the caller.
///
/// Failures and timeouts are logged and counted; the caller gets `None`.
pub async fn best_effort<T, F>(operation: &str, limit: Duration, fut: F) -> Option<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(err)) => {
            engine_metrics().record_mirror_failure();
            warn!(operation, error = %err, "mirror operation failed; continuing");
            None
        }
        Err(_) => {
            engine_metrics().record_mirror_failure();
            warn!(
                operation,
                timeout_ms = limit.as_millis() as u64,
                "mirror operation timed out; continuing"
            );
            None
        }
    }
}

pub(crate) fn now_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
