//! Test run coordinator
//!
//! Drives one device through `Idle -> Starting -> Running -> Pass | Fail`.
//! It owns the poll loop and the elapsed timer of the active run, advances
//! the serial sequence when a run finishes and publishes a [`DeviceSession`]
//! snapshot after every change.
//!
//! Every run gets a generation number. Poll outcomes and timer ticks carry
//! the generation they were started for and are dropped under the session
//! lock unless it is still current and the session is still `Running`.

use super::clock::Clock;
use super::poll::{PollHandle, PollOutcome, PollScheduler};
use super::serial::{parse_serial, Increment, SerialSequencer, ValidationError};
use super::service::{ExecutionService, TransportError};
use super::session::{DeviceSession, SessionEvent};
use super::state_machine::{SessionStateMachine, SessionStatus, StateTransition};
use super::store::StoreError;
use super::timer::ElapsedTimer;
use chrono::Local;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Errors returned by coordinator operations
#[derive(Error, Debug)]
pub enum RunError {
    /// Serial input rejected
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Execution service call failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Serial store failed
    #[error("Could not save serial number: {0}")]
    Store(#[from] StoreError),

    /// Operation not allowed while a run is active or unacknowledged
    #[error("Device is busy ({status})")]
    Busy {
        /// Status at the time of the call
        status: SessionStatus,
    },

    /// The session was shut down while the operation was in flight
    #[error("Run was cancelled")]
    Cancelled,
}

/// Timing of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunTiming {
    /// Delay between a status response and the next request
    pub poll_interval: Duration,
    /// Elapsed timer period
    pub tick: Duration,
}

impl Default for RunTiming {
    fn default() -> Self {
        Self {
            poll_interval: PollScheduler::DEFAULT_INTERVAL,
            tick: ElapsedTimer::TICK,
        }
    }
}

struct RunState {
    machine: SessionStateMachine,
    session: DeviceSession,
    generation: u64,
    poll: Option<PollHandle>,
    timer: Option<ElapsedTimer>,
}

impl RunState {
    fn enter(&mut self, status: SessionStatus, reason: &str) {
        match self.machine.transition(status, Some(reason)) {
            Ok(()) => {
                info!("{}: {} ({})", self.session.device_id, status, reason);
                self.session.status = status;
            }
            Err(e) => error!("{}: {}", self.session.device_id, e),
        }
    }

    fn stop_run(&mut self) {
        if let Some(poll) = self.poll.take() {
            poll.cancel();
        }
        if let Some(timer) = self.timer.take() {
            timer.stop();
        }
    }

    fn is_current(&self, generation: u64, status: SessionStatus) -> bool {
        self.generation == generation && self.session.status == status
    }
}

struct Shared {
    device_id: String,
    service: Arc<dyn ExecutionService>,
    sequencer: SerialSequencer,
    scheduler: PollScheduler,
    clock: Arc<dyn Clock>,
    tick: Duration,
    state: Mutex<RunState>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl Shared {
    fn publish(&self, state: &RunState) {
        let _ = self.event_tx.send(SessionEvent::Updated(state.session.clone()));
    }

    fn on_tick(&self, generation: u64, secs: u64) {
        let mut state = self.state.lock();
        if !state.is_current(generation, SessionStatus::Running) {
            return;
        }
        state.session.elapsed_secs = secs;
        self.publish(&state);
    }

    async fn on_outcome(&self, generation: u64, outcome: PollOutcome) {
        let (test_id, status) = {
            let mut state = self.state.lock();
            if !state.is_current(generation, SessionStatus::Running) {
                debug!("{}: discarding stale poll outcome", self.device_id);
                return;
            }
            state.stop_run();

            match outcome {
                PollOutcome::Failed(e) => {
                    state.enter(SessionStatus::Idle, "status query failed");
                    state.session.test_id = None;
                    state.session.error = Some(e.to_string());
                    self.publish(&state);
                    return;
                }
                PollOutcome::Finished { status, result } => {
                    let next = match SessionStatus::from_terminal(status) {
                        Some(next) => next,
                        None => return,
                    };
                    state.enter(next, "run finished");
                    state.session.result = result;
                    state.session.finished_at = Some(Local::now());
                    self.publish(&state);
                    (state.session.test_id.clone().unwrap_or_default(), status)
                }
            }
        };

        // The transition above happened once for this generation, so this
        // runs at most once per terminal response.
        let increment = self.sequencer.increment(&self.device_id).await;

        // A reset or shutdown in the meantime owns the snapshot; the store is
        // still advanced and Finished is still sent.
        let mut state = self.state.lock();
        let current = state.generation == generation;
        match increment {
            Ok(Increment::Advanced(next)) => {
                info!("{}: next serial {}", self.device_id, next);
                if current {
                    state.session.next_serial = Some(next);
                }
            }
            Ok(Increment::Unchanged(_)) => {}
            Err(e) => {
                warn!("{}: could not advance serial: {}", self.device_id, e);
                if current {
                    state.session.error = Some(RunError::Store(e).to_string());
                }
            }
        }
        if current {
            self.publish(&state);
        }
        drop(state);

        let _ = self.event_tx.send(SessionEvent::Finished {
            device_id: self.device_id.clone(),
            test_id,
            status,
        });
    }
}

/// Lifecycle coordinator for one device. Cheap to clone; clones share the
/// same session.
#[derive(Clone)]
pub struct TestRunCoordinator {
    shared: Arc<Shared>,
}

impl TestRunCoordinator {
    /// Create an idle coordinator
    pub fn new(
        device_id: impl Into<String>,
        service: Arc<dyn ExecutionService>,
        sequencer: SerialSequencer,
        clock: Arc<dyn Clock>,
        timing: RunTiming,
    ) -> Self {
        let device_id = device_id.into();
        let (event_tx, _) = broadcast::channel(64);
        let scheduler = PollScheduler::new(service.clone(), clock.clone(), timing.poll_interval);

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(RunState {
                    machine: SessionStateMachine::new(),
                    session: DeviceSession::new(device_id.clone()),
                    generation: 0,
                    poll: None,
                    timer: None,
                }),
                device_id,
                service,
                sequencer,
                scheduler,
                clock,
                tick: timing.tick,
                event_tx,
            }),
        }
    }

    /// Device this coordinator drives
    pub fn device_id(&self) -> &str {
        &self.shared.device_id
    }

    /// Current session
    pub fn snapshot(&self) -> DeviceSession {
        self.shared.state.lock().session.clone()
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Status transitions so far
    pub fn history(&self) -> Vec<StateTransition> {
        self.shared.state.lock().machine.history().to_vec()
    }

    /// Load the stored next serial into the session
    pub async fn prefill(&self) -> Result<Option<u64>, RunError> {
        let next = self.shared.sequencer.read_serial(&self.shared.device_id).await?;

        let mut state = self.shared.state.lock();
        state.session.next_serial = next;
        self.shared.publish(&state);
        Ok(next)
    }

    /// Start a run for the operator-entered serial and return its test id.
    ///
    /// The serial is validated before anything else happens, persisted
    /// before the service is called, and held in `tested_serial` for the
    /// whole run.
    pub async fn start(&self, serial_input: &str) -> Result<String, RunError> {
        let shared = &self.shared;

        let (generation, serial_no) = {
            let mut state = shared.state.lock();
            if state.session.status != SessionStatus::Idle {
                return Err(RunError::Busy {
                    status: state.session.status,
                });
            }
            let serial_no = parse_serial(serial_input)?;

            state.generation += 1;
            state.enter(SessionStatus::Starting, "start requested");
            state.session.tested_serial = Some(serial_no);
            state.session.test_id = None;
            state.session.result = None;
            state.session.error = None;
            state.session.elapsed_secs = 0;
            state.session.started_at = None;
            state.session.finished_at = None;
            shared.publish(&state);
            (state.generation, serial_no)
        };

        if let Err(e) = shared.sequencer.write(&shared.device_id, &serial_no.to_string()).await {
            let err = RunError::Store(e);
            warn!("{}: {}", shared.device_id, err);
            let mut state = shared.state.lock();
            if state.is_current(generation, SessionStatus::Starting) {
                state.enter(SessionStatus::Idle, "serial not saved");
                state.session.error = Some(err.to_string());
                shared.publish(&state);
            }
            return Err(err);
        }

        let response = shared.service.start_test(&shared.device_id, serial_no).await;

        let mut state = shared.state.lock();
        if !state.is_current(generation, SessionStatus::Starting) {
            debug!("{}: discarding start response for cancelled run", shared.device_id);
            return Err(RunError::Cancelled);
        }

        let started = match response {
            Ok(started) => started,
            Err(e) => {
                warn!("{}: start failed: {}", shared.device_id, e);
                state.enter(SessionStatus::Idle, "start failed");
                state.session.error = Some(e.to_string());
                shared.publish(&state);
                return Err(e.into());
            }
        };

        let test_id = started.test_id;
        state.enter(SessionStatus::Running, "service accepted run");
        state.session.test_id = Some(test_id.clone());
        state.session.started_at = Some(Local::now());
        state.timer = Some(self.start_timer(generation));
        state.poll = Some(self.start_polling(generation, &test_id));
        shared.publish(&state);

        Ok(test_id)
    }

    /// Acknowledge a finished run and return to `Idle`.
    ///
    /// Keeps `next_serial`. From `Idle` it only clears a lingering error.
    pub fn reset(&self) -> Result<(), RunError> {
        let mut state = self.shared.state.lock();
        let status = state.session.status;

        if status.is_busy() {
            return Err(RunError::Busy { status });
        }
        if status.is_terminal() {
            state.enter(SessionStatus::Idle, "reset");
        }

        let session = &mut state.session;
        session.test_id = None;
        session.tested_serial = None;
        session.result = None;
        session.error = None;
        session.elapsed_secs = 0;
        session.started_at = None;
        session.finished_at = None;
        self.shared.publish(&state);
        Ok(())
    }

    /// Stop the poll loop and the timer and invalidate the current run.
    ///
    /// Nothing that was in flight when this returns can change the session.
    /// A run that was starting or running is abandoned and the session goes
    /// back to `Idle`.
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        state.generation += 1;
        state.stop_run();

        if state.session.status.is_busy() {
            state.enter(SessionStatus::Idle, "shut down");
            state.session.test_id = None;
            self.shared.publish(&state);
        }
    }

    fn start_timer(&self, generation: u64) -> ElapsedTimer {
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        ElapsedTimer::start(self.shared.clock.clone(), self.shared.tick, move |secs| {
            if let Some(shared) = weak.upgrade() {
                shared.on_tick(generation, secs);
            }
        })
    }

    fn start_polling(&self, generation: u64, test_id: &str) -> PollHandle {
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        self.shared.scheduler.start(test_id, move |outcome| async move {
            if let Some(shared) = weak.upgrade() {
                shared.on_outcome(generation, outcome).await;
            }
        })
    }
}
