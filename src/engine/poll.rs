// Bounded retry with a fixed interval, shared by every wait on the engine.
// The engine has no push channel, so asynchronous transitions are observed by probing.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Deadline and interval for a probe loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSpec {
    pub timeout: Duration,
    pub interval: Duration,
}

impl PollSpec {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    pub fn from_millis(timeout_ms: u64, interval_ms: u64) -> Self {
        Self::new(
            Duration::from_millis(timeout_ms),
            Duration::from_millis(interval_ms),
        )
    }
}

/// Run `probe` until it yields `Some`, an error, or the deadline passes.
///
/// The probe always runs at least once. Errors abort the loop immediately.
pub async fn poll_until<T, E, F, Fut>(spec: PollSpec, mut probe: F) -> Result<Option<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let deadline = Instant::now() + spec.timeout;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        crate::observability::engine_metrics().record_poll_attempt();

        if let Some(found) = probe().await? {
            trace!(attempt, "poll satisfied");
            return Ok(Some(found));
        }

        let now = Instant::now();
        if now >= deadline {
            trace!(attempt, "poll deadline reached");
            return Ok(None);
        }

        let remaining = deadline - now;
        tokio::time::sleep(spec.interval.min(remaining)).await;
    }
}
