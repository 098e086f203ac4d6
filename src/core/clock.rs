//! Time source for polling and the elapsed timer

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// Delay and monotonic time source.
///
/// Schedulers only wait through this trait, so tests can drive them on
/// tokio's paused clock (`#[tokio::test(start_paused = true)]`) or swap in
/// another implementation.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current monotonic instant
    fn now(&self) -> Instant;

    /// Wait for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
