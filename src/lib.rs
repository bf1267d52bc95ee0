// pp-front library - HTTP front for the ProjectPlanning process engine
// This exposes the core components for testing and integration

pub mod api;
pub mod config;
pub mod downstream;
pub mod engine;
pub mod mirror;
pub mod observability;
pub mod orchestrator;
pub mod shutdown;
pub mod telemetry;

// Re-export key types for easy access
pub use api::{router, serve};
pub use config::{config, init_config, PpFrontConfig};
pub use downstream::{DownstreamClient, DownstreamError};
pub use engine::{EngineError, EngineGateway, EngineSession, PollSpec};
pub use mirror::{open_mirror, InMemoryMirror, MirrorStore, SqliteMirror};
pub use observability::{engine_metrics, EngineApiMetrics, OperationTimer};
pub use orchestrator::{ActionError, ActionReply, Outcome, TaskOrchestrator};
pub use shutdown::ShutdownCoordinator;
pub use telemetry::{create_action_span, generate_correlation_id, init_telemetry, shutdown_telemetry};
