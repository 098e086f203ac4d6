//! One-second elapsed-time counter for a running test

use super::clock::Clock;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Counts seconds since it was started.
///
/// Purely for display; it never drives the run. Ticks are scheduled against
/// the start instant so they do not drift.
#[derive(Debug)]
pub struct ElapsedTimer {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ElapsedTimer {
    /// Default tick period
    pub const TICK: Duration = Duration::from_secs(1);

    /// Start counting from 0; `on_tick` receives 1, 2, 3, ...
    pub fn start<F>(clock: Arc<dyn Clock>, tick: Duration, on_tick: F) -> Self
    where
        F: Fn(u64) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let started = clock.now();
            let mut elapsed: u64 = 0;

            loop {
                let next = started + tick * (elapsed as u32 + 1);
                let wait = next.saturating_duration_since(clock.now());

                tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    _ = clock.sleep(wait) => {}
                }

                if token.is_cancelled() {
                    return;
                }

                elapsed += 1;
                on_tick(elapsed);
            }
        });

        Self { cancel, task }
    }

    /// Stop ticking
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether the timer is still ticking
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.task.is_finished()
    }
}

impl Drop for ElapsedTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::TokioClock;
    use parking_lot::Mutex;

    fn recording_timer() -> (ElapsedTimer, Arc<Mutex<Vec<u64>>>) {
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let sink = ticks.clone();
        let timer = ElapsedTimer::start(Arc::new(TokioClock), ElapsedTimer::TICK, move |n| {
            sink.lock().push(n);
        });
        (timer, ticks)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_once_per_second() {
        let (timer, ticks) = recording_timer();

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(*ticks.lock(), vec![1, 2, 3]);
        assert!(timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ticks_after_stop() {
        let (timer, ticks) = recording_timer();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        timer.stop();
        assert!(!timer.is_running());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(*ticks.lock(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_timer() {
        let (timer, ticks) = recording_timer();
        drop(timer);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(ticks.lock().is_empty());
    }
}
