//! Shared helpers for the teststation integration tests

use std::path::Path;
use std::sync::Arc;
use teststation_core::{
    FileStore, RunStatus, RunTiming, SerialSequencer, SessionEvent, SimulatedService, TestRunCoordinator,
    TestStation, TokioClock,
};
use tokio::sync::broadcast;

/// Sequencer over a JSON store file
pub async fn file_sequencer(path: &Path) -> SerialSequencer {
    let store = FileStore::open(path).await.expect("open store");
    SerialSequencer::new(Arc::new(store))
}

/// Station over the simulator and a store file
pub async fn station(sim: &Arc<SimulatedService>, store_path: &Path) -> TestStation {
    TestStation::new(
        sim.clone(),
        file_sequencer(store_path).await,
        Arc::new(TokioClock),
        RunTiming::default(),
    )
}

/// Wait for the terminal notification of the next run
pub async fn wait_finished(rx: &mut broadcast::Receiver<SessionEvent>) -> (String, RunStatus) {
    loop {
        match rx.recv().await.expect("session events") {
            SessionEvent::Finished { test_id, status, .. } => return (test_id, status),
            SessionEvent::Updated(_) => {}
        }
    }
}

/// Start a run and wait for its outcome
pub async fn run_to_completion(coordinator: &TestRunCoordinator, serial: &str) -> (String, RunStatus) {
    let mut rx = coordinator.subscribe();
    coordinator.start(serial).await.expect("start");
    wait_finished(&mut rx).await
}
