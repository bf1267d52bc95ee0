use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::mirror::MirrorStore;

/// Graceful shutdown coordinator for the HTTP front
pub struct ShutdownCoordinator {
    mirror: Arc<dyn MirrorStore>,
}

impl ShutdownCoordinator {
    pub fn new(mirror: Arc<dyn MirrorStore>) -> Self {
        Self { mirror }
    }

    /// Resolve on SIGINT, or SIGTERM on unix.
    pub async fn wait_for_signal() {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("SIGINT received, shutting down"),
            _ = terminate => info!("SIGTERM received, shutting down"),
        }
    }

    /// Close the mirror and log final engine statistics.
    ///
    /// In-flight engine calls are not aborted; the server stops accepting
    /// requests before this runs.
    pub async fn shutdown_all_services(self) -> Result<()> {
        info!("Initiating graceful shutdown...");

        if timeout(Duration::from_secs(5), self.mirror.close()).await.is_err() {
            warn!("Timeout waiting for the mirror to close");
        }

        crate::observability::engine_metrics().log_stats();

        info!("Graceful shutdown completed successfully");
        Ok(())
    }
}
