//! Fixed-delay status polling
//!
//! After each response the scheduler waits the full interval before the next
//! request, so requests never overlap and a slow service slows polling down
//! instead of piling requests up.

use super::clock::Clock;
use super::service::{ExecutionService, RunStatus, TestResult, TransportError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How polling of a run ended
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The run reached Pass or Fail
    Finished {
        /// Terminal status
        status: RunStatus,
        /// Measurement summary, if the service sent one
        result: Option<TestResult>,
    },
    /// A status query failed; polling was abandoned
    Failed(TransportError),
}

/// Live polling of one run. Dropping the handle cancels it.
#[derive(Debug)]
pub struct PollHandle {
    test_id: String,
    interval: Duration,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Run being polled
    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    /// Delay between a response and the next request
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stop polling. A response already in flight is discarded when it
    /// arrives.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether `cancel` was called
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the polling task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Starts polling loops against the execution service
#[derive(Clone)]
pub struct PollScheduler {
    service: Arc<dyn ExecutionService>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl PollScheduler {
    /// Default delay between polls
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3);

    /// Create a scheduler
    pub fn new(service: Arc<dyn ExecutionService>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            service,
            clock,
            interval,
        }
    }

    /// Configured interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll `test_id` until it finishes or a query fails, then hand the
    /// outcome to `on_outcome` exactly once. Nothing is delivered if the
    /// handle is cancelled first.
    ///
    /// Cancellation is checked before each delay, after each delay and after
    /// each response.
    pub fn start<F, Fut>(&self, test_id: &str, on_outcome: F) -> PollHandle
    where
        F: FnOnce(PollOutcome) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_loop(
            self.service.clone(),
            self.clock.clone(),
            self.interval,
            test_id.to_string(),
            cancel.clone(),
            on_outcome,
        ));

        PollHandle {
            test_id: test_id.to_string(),
            interval: self.interval,
            cancel,
            task,
        }
    }
}

async fn poll_loop<F, Fut>(
    service: Arc<dyn ExecutionService>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    test_id: String,
    cancel: CancellationToken,
    on_outcome: F,
) where
    F: FnOnce(PollOutcome) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut attempt: u64 = 0;

    let outcome = loop {
        if cancel.is_cancelled() {
            debug!("Polling of {} cancelled", test_id);
            return;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Polling of {} cancelled during delay", test_id);
                return;
            }
            _ = clock.sleep(interval) => {}
        }

        if cancel.is_cancelled() {
            return;
        }

        attempt += 1;
        debug!("Status query #{} for {}", attempt, test_id);
        let response = service.get_status(&test_id).await;

        if cancel.is_cancelled() {
            debug!("Discarding status response for cancelled run {}", test_id);
            return;
        }

        match response {
            Ok(report) if report.status.is_terminal() => {
                break PollOutcome::Finished {
                    status: report.status,
                    result: report.result,
                };
            }
            Ok(_) => continue,
            Err(e) => {
                warn!("Status query for {} failed: {}", test_id, e);
                break PollOutcome::Failed(e);
            }
        }
    };

    on_outcome(outcome).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::TokioClock;
    use crate::core::service::{StartedTest, TestStatusReport};
    use crate::core::simulator::{SimulatedService, SimulationProfile};
    use tokio::sync::oneshot;
    use tokio::time::Instant;

    fn scheduler(sim: &Arc<SimulatedService>) -> PollScheduler {
        PollScheduler::new(sim.clone(), Arc::new(TokioClock), PollScheduler::DEFAULT_INTERVAL)
    }

    fn deliver_to(tx: oneshot::Sender<PollOutcome>) -> impl FnOnce(PollOutcome) -> futures::future::Ready<()> {
        move |outcome| {
            let _ = tx.send(outcome);
            futures::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_terminal() {
        let sim = Arc::new(SimulatedService::default());
        let test_id = sim.start_test("ESP32-001", 124).await.unwrap().test_id;
        let begin = Instant::now();

        let (tx, rx) = oneshot::channel();
        let handle = scheduler(&sim).start(&test_id, deliver_to(tx));

        let outcome = rx.await.unwrap();
        assert!(matches!(
            outcome,
            PollOutcome::Finished {
                status: RunStatus::Pass,
                result: Some(_)
            }
        ));

        let times = sim.status_times(&test_id);
        assert_eq!(times.len(), 3);
        assert_eq!(times[0] - begin, Duration::from_secs(3));
        assert_eq!(times[2] - begin, Duration::from_secs(9));

        tokio::task::yield_now().await;
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_delay_with_slow_responses() {
        let sim = Arc::new(SimulatedService::new(SimulationProfile {
            polls_to_finish: 3,
            response_delay: Duration::from_secs(5),
            ..SimulationProfile::default()
        }));
        sim.script_start(Ok(StartedTest {
            test_id: "T1".to_string(),
        }));
        sim.start_test("ESP32-001", 1).await.unwrap();

        let (tx, rx) = oneshot::channel();
        let _handle = scheduler(&sim).start("T1", deliver_to(tx));
        rx.await.unwrap();

        // request, 5s response, 3s delay: spacing is interval + response time
        let times = sim.status_times("T1");
        assert_eq!(times.len(), 4);
        for pair in times.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_secs(8));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_ends_polling() {
        let sim = Arc::new(SimulatedService::default());
        let test_id = sim.start_test("ESP32-001", 124).await.unwrap().test_id;
        sim.script_status(Ok(TestStatusReport::in_progress()));
        sim.script_status(Err(TransportError::Request("timeout".to_string())));

        let (tx, rx) = oneshot::channel();
        let _handle = scheduler(&sim).start(&test_id, deliver_to(tx));

        assert_eq!(
            rx.await.unwrap(),
            PollOutcome::Failed(TransportError::Request("timeout".to_string()))
        );

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(sim.status_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_delay_stops_requests() {
        let sim = Arc::new(SimulatedService::default());
        let test_id = sim.start_test("ESP32-001", 124).await.unwrap().test_id;

        let (tx, mut rx) = oneshot::channel();
        let handle = scheduler(&sim).start(&test_id, deliver_to(tx));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(sim.status_count(), 1);

        handle.cancel();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(sim.status_count(), 1);
        assert!(handle.is_finished());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_discards_in_flight_response() {
        let sim = Arc::new(SimulatedService::new(SimulationProfile {
            polls_to_finish: 0,
            response_delay: Duration::from_secs(2),
            ..SimulationProfile::default()
        }));
        let test_id = sim.start_test("ESP32-001", 124).await.unwrap().test_id;

        let (tx, mut rx) = oneshot::channel();
        let handle = scheduler(&sim).start(&test_id, deliver_to(tx));

        // Request goes out at 3s, the terminal answer arrives at 5s
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(sim.status_count(), 1);
        handle.cancel();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(handle.is_finished());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_cancels() {
        let sim = Arc::new(SimulatedService::default());
        let test_id = sim.start_test("ESP32-001", 124).await.unwrap().test_id;

        let (tx, _rx) = oneshot::channel();
        drop(scheduler(&sim).start(&test_id, deliver_to(tx)));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(sim.status_count(), 0);
    }
}
