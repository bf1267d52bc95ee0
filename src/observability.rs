use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Process engine usage metrics
#[derive(Debug, Default)]
pub struct EngineApiMetrics {
    pub total_requests: AtomicU64,
    pub errors: AtomicU64,
    pub poll_attempts: AtomicU64,
    pub tolerated_misses: AtomicU64,
    pub mirror_failures: AtomicU64,
}

impl EngineApiMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poll_attempt(&self) {
        self.poll_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tolerated_miss(&self) {
        self.tolerated_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_mirror_failure(&self) {
        self.mirror_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> EngineApiStats {
        EngineApiStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            poll_attempts: self.poll_attempts.load(Ordering::Relaxed),
            tolerated_misses: self.tolerated_misses.load(Ordering::Relaxed),
            mirror_failures: self.mirror_failures.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Engine API metrics: requests={}, errors={}, polls={}, tolerated_misses={}, mirror_failures={}",
            stats.total_requests,
            stats.errors,
            stats.poll_attempts,
            stats.tolerated_misses,
            stats.mirror_failures
        );
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineApiStats {
    pub total_requests: u64,
    pub errors: u64,
    pub poll_attempts: u64,
    pub tolerated_misses: u64,
    pub mirror_failures: u64,
}

/// Global metrics instance
static ENGINE_METRICS: std::sync::LazyLock<EngineApiMetrics> =
    std::sync::LazyLock::new(EngineApiMetrics::new);

pub fn engine_metrics() -> &'static EngineApiMetrics {
    &ENGINE_METRICS
}

/// Time an operation and log its duration when dropped
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        debug!(
            operation = %self.operation,
            duration_ms = self.start.elapsed().as_millis() as u64,
            "Engine call completed"
        );
    }
}
