use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{migrate::MigrateDatabase, Row, SqlitePool};
use tracing::info;

use super::{AcceptedCommitment, MirrorStore, ProjectSnapshot, ProjectUpdate, UserSession};

/// Database-backed mirror
pub struct SqliteMirror {
    pool: SqlitePool,
}

impl SqliteMirror {
    /// Initialize database with automatic migrations
    pub async fn new(database_url: &str, max_connections: u32, auto_migrate: bool) -> Result<Self> {
        // Create database if it doesn't exist
        if !sqlx::Sqlite::database_exists(database_url).await? {
            info!("Creating database at {}", database_url);
            sqlx::Sqlite::create_database(database_url).await?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await?;

        if auto_migrate {
            info!("Running database migrations...");
            sqlx::migrate!("./migrations").run(&pool).await?;
            info!("Database migrations completed");
        }

        Ok(Self { pool })
    }

    /// Get database pool for queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn session_from_row(row: &SqliteRow) -> UserSession {
    UserSession {
        api_username: row.get("api_username"),
        case_id: row.get("case_id"),
        proceso: row.get("proceso"),
        creado_en: row.get("creado_en"),
        actualizado_en: row.get("actualizado_en"),
    }
}

fn snapshot_from_row(row: &SqliteRow) -> ProjectSnapshot {
    let plan: String = row.get("plan_trabajo");
    let compromisos: String = row.get("compromisos_aceptados");

    ProjectSnapshot {
        proyecto_id: row.get("proyecto_id"),
        nombre: row.get("nombre"),
        descripcion: row.get("descripcion"),
        plan_trabajo: serde_json::from_str(&plan).unwrap_or_else(|_| Value::Object(Default::default())),
        compromisos_aceptados: serde_json::from_str(&compromisos).unwrap_or_default(),
        creado_en: row.get("creado_en"),
        actualizado_en: row.get("actualizado_en"),
    }
}

#[async_trait]
impl MirrorStore for SqliteMirror {
    async fn remembered_session(&self, api_username: &str) -> Result<Option<UserSession>> {
        let row = sqlx::query(
            r#"
            SELECT api_username, case_id, proceso, creado_en, actualizado_en
            FROM sesion_bonita
            WHERE api_username = ?1
            "#,
        )
        .bind(api_username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(session_from_row))
    }

    async fn remember_session(&self, api_username: &str, case_id: &str, proceso: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sesion_bonita (api_username, case_id, proceso, creado_en, actualizado_en)
            VALUES (?1, ?2, ?3, datetime('now'), datetime('now'))
            ON CONFLICT(api_username) DO UPDATE SET
                case_id = excluded.case_id,
                proceso = excluded.proceso,
                actualizado_en = datetime('now')
            "#,
        )
        .bind(api_username)
        .bind(case_id)
        .bind(proceso)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn forget_session(&self, api_username: &str) -> Result<()> {
        sqlx::query("DELETE FROM sesion_bonita WHERE api_username = ?1")
            .bind(api_username)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn forget_case(&self, case_id: &str) -> Result<u64> {
        let deleted = sqlx::query("DELETE FROM sesion_bonita WHERE case_id = ?1")
            .bind(case_id)
            .execute(&self.pool)
            .await?;
        Ok(deleted.rows_affected())
    }

    async fn project(&self, proyecto_id: i64) -> Result<Option<ProjectSnapshot>> {
        let row = sqlx::query(
            r#"
            SELECT proyecto_id, nombre, descripcion, plan_trabajo, compromisos_aceptados,
                   creado_en, actualizado_en
            FROM proyecto_monitoreo
            WHERE proyecto_id = ?1
            "#,
        )
        .bind(proyecto_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(snapshot_from_row))
    }

    async fn upsert_project(&self, update: &ProjectUpdate) -> Result<()> {
        let plan = update.plan_trabajo.as_ref().map(|p| p.to_string());
        let compromisos = update
            .compromisos_aceptados
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO proyecto_monitoreo
                (proyecto_id, nombre, descripcion, plan_trabajo, compromisos_aceptados,
                 creado_en, actualizado_en)
            VALUES (?1, COALESCE(?2, ''), COALESCE(?3, ''), COALESCE(?4, '{}'), COALESCE(?5, '[]'),
                    datetime('now'), datetime('now'))
            ON CONFLICT(proyecto_id) DO UPDATE SET
                nombre = COALESCE(?2, nombre),
                descripcion = COALESCE(?3, descripcion),
                plan_trabajo = COALESCE(?4, plan_trabajo),
                compromisos_aceptados = COALESCE(?5, compromisos_aceptados),
                actualizado_en = datetime('now')
            "#,
        )
        .bind(update.proyecto_id)
        .bind(update.nombre.as_deref())
        .bind(update.descripcion.as_deref())
        .bind(plan)
        .bind(compromisos)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_commitment(&self, proyecto_id: i64, commitment: &AcceptedCommitment) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let current: Option<String> = sqlx::query_scalar(
            "SELECT compromisos_aceptados FROM proyecto_monitoreo WHERE proyecto_id = ?1",
        )
        .bind(proyecto_id)
        .fetch_optional(&mut *tx)
        .await?;

        let mut compromisos: Vec<AcceptedCommitment> = current
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();
        if compromisos.iter().any(|c| c.id == commitment.id) {
            tx.commit().await?;
            return Ok(());
        }
        compromisos.push(commitment.clone());

        sqlx::query(
            r#"
            INSERT INTO proyecto_monitoreo (proyecto_id, compromisos_aceptados, creado_en, actualizado_en)
            VALUES (?1, ?2, datetime('now'), datetime('now'))
            ON CONFLICT(proyecto_id) DO UPDATE SET
                compromisos_aceptados = excluded.compromisos_aceptados,
                actualizado_en = datetime('now')
            "#,
        )
        .bind(proyecto_id)
        .bind(serde_json::to_string(&compromisos)?)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Close database connections gracefully
    async fn close(&self) {
        info!("Shutting down database connections...");
        self.pool.close().await;
        info!("Database connections closed");
    }
}
