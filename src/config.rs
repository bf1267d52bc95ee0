use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::engine::PollSpec;

/// Main configuration structure for pp-front
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PpFrontConfig {
    /// Process engine connection
    pub engine: EngineConfig,
    /// Downstream business API
    pub downstream: DownstreamConfig,
    /// Poll deadlines and orchestration knobs
    pub orchestration: OrchestrationConfig,
    /// Inbound HTTP server
    pub server: ServerConfig,
    /// Observability settings
    pub observability: ObservabilityConfig,
    /// Database settings (optional; the mirror stays in memory without it)
    pub database: Option<DatabaseConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Engine root, e.g. http://localhost:8080/bonita
    pub base_url: String,
    /// Service account used for every session
    pub username: String,
    pub password: String,
    /// Engine user that human tasks get assigned to before execution
    pub assignee: String,
    /// Per-call HTTP timeout
    pub timeout_secs: u64,
    pub planning_process: ProcessRef,
    pub council_process: ProcessRef,
}

/// A process template identity, `name@version`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProcessRef {
    pub name: String,
    pub version: String,
}

impl ProcessRef {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
        }
    }

    pub fn key(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownstreamConfig {
    /// Root of the JWT-secured business API
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestrationConfig {
    /// Sleep between poll attempts
    pub poll_interval_ms: u64,
    /// Wait for the first task after a login instantiates a case
    pub login_wait_ms: u64,
    /// Wait for the plan definition task
    pub plan_task_wait_ms: u64,
    /// Wait for ordinary step tasks
    pub step_wait_ms: u64,
    /// Wait used by next-step navigation
    pub quick_wait_ms: u64,
    /// Wait for variables written by the engine's connectors
    pub variable_wait_ms: u64,
    /// Wait for a task outcome after execution
    pub outcome_wait_ms: u64,
    /// Upper bound for a best-effort mirror write
    pub mirror_write_timeout_ms: u64,
    /// Board observations allowed per project and month
    pub monthly_observation_limit: u32,
    /// Prefix of the browser pages returned by next-step
    pub page_base_path: String,
}

impl OrchestrationConfig {
    fn spec(&self, timeout_ms: u64) -> PollSpec {
        PollSpec::from_millis(timeout_ms, self.poll_interval_ms)
    }

    pub fn login_wait(&self) -> PollSpec {
        self.spec(self.login_wait_ms)
    }

    pub fn plan_task_wait(&self) -> PollSpec {
        self.spec(self.plan_task_wait_ms)
    }

    pub fn step_wait(&self) -> PollSpec {
        self.spec(self.step_wait_ms)
    }

    pub fn quick_wait(&self) -> PollSpec {
        self.spec(self.quick_wait_ms)
    }

    pub fn variable_wait(&self) -> PollSpec {
        self.spec(self.variable_wait_ms)
    }

    pub fn outcome_wait(&self) -> PollSpec {
        self.spec(self.outcome_wait_ms)
    }

    pub fn mirror_write_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.mirror_write_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Address the HTTP API binds to
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level
    pub log_level: String,
    /// Emit JSON lines instead of human-readable logs
    pub json_logs: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL (SQLite file path or connection string)
    pub url: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Enable automatic migrations
    pub auto_migrate: bool,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 400,
            login_wait_ms: 30_000,
            plan_task_wait_ms: 30_000,
            step_wait_ms: 12_000,
            quick_wait_ms: 5_000,
            variable_wait_ms: 10_000,
            outcome_wait_ms: 6_000,
            mirror_write_timeout_ms: 2_000,
            monthly_observation_limit: 2,
            page_base_path: "/bonita".to_string(),
        }
    }
}

impl Default for PpFrontConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig {
                base_url: "http://localhost:8080/bonita".to_string(),
                username: "install".to_string(),
                password: "install".to_string(),
                assignee: "walter.bates".to_string(),
                timeout_secs: 15,
                planning_process: ProcessRef::new("ProjectPlanning", "1.0"),
                council_process: ProcessRef::new("Consejo Directivo", "1.0"),
            },
            downstream: DownstreamConfig {
                base_url: "http://localhost:8000/api".to_string(),
                timeout_secs: 15,
            },
            orchestration: OrchestrationConfig::default(),
            server: ServerConfig {
                bind_addr: "127.0.0.1:8000".to_string(),
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json_logs: true,
            },
            database: Some(DatabaseConfig {
                url: "sqlite://pp-front.db".to_string(),
                max_connections: 5,
                auto_migrate: true,
            }),
        }
    }
}

impl PpFrontConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (pp-front.toml, .pp-front-rc)
    /// 3. Environment variables (prefixed with PP_FRONT, `__` between sections)
    /// 4. Legacy BONITA_* / API_BASE_URL variables
    pub fn load() -> Result<Self> {
        let defaults = Config::try_from(&PpFrontConfig::default())?;
        let mut builder = Config::builder().add_source(defaults);

        if Path::new("pp-front.toml").exists() {
            builder = builder.add_source(File::with_name("pp-front"));
        }

        if Path::new(".pp-front-rc").exists() {
            builder = builder.add_source(File::with_name(".pp-front-rc").format(config::FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("PP_FRONT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut pp_config: PpFrontConfig = builder.build()?.try_deserialize()?;
        pp_config.apply_legacy_env(|key| std::env::var(key).ok());
        Ok(pp_config)
    }

    /// Deployments predating the TOML file configure the engine through these names.
    fn apply_legacy_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("BONITA_BASE_URL") {
            self.engine.base_url = v;
        }
        if let Some(v) = lookup("BONITA_USER") {
            self.engine.username = v;
        }
        if let Some(v) = lookup("BONITA_PASSWORD") {
            self.engine.password = v;
        }
        if let Some(v) = lookup("BONITA_ASSIGNEE") {
            self.engine.assignee = v;
        }
        if let Some(v) = lookup("API_BASE_URL") {
            self.downstream.base_url = v;
        }
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<PpFrontConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        // Load .env file first
        let _ = PpFrontConfig::load_env_file();
        PpFrontConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static PpFrontConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

/// Initialize configuration (called at startup)
pub fn init_config() -> Result<()> {
    let _config = config()?;
    tracing::info!("Configuration loaded successfully");
    Ok(())
}
