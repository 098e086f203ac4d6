//! Test station: independent coordinators for every opened device

use super::clock::Clock;
use super::coordinator::{RunError, RunTiming, TestRunCoordinator};
use super::serial::SerialSequencer;
use super::service::ExecutionService;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Per-device coordinators sharing one execution service and one serial
/// store. Runs on different devices never affect each other.
pub struct TestStation {
    service: Arc<dyn ExecutionService>,
    sequencer: SerialSequencer,
    clock: Arc<dyn Clock>,
    timing: RunTiming,
    coordinators: RwLock<HashMap<String, TestRunCoordinator>>,
}

impl TestStation {
    /// Create an empty station
    pub fn new(
        service: Arc<dyn ExecutionService>,
        sequencer: SerialSequencer,
        clock: Arc<dyn Clock>,
        timing: RunTiming,
    ) -> Self {
        Self {
            service,
            sequencer,
            clock,
            timing,
            coordinators: RwLock::new(HashMap::new()),
        }
    }

    /// Shared execution service
    pub fn service(&self) -> &Arc<dyn ExecutionService> {
        &self.service
    }

    /// Open a device, reusing its coordinator if it is already open.
    ///
    /// A new coordinator has its next serial pre-filled from the store; a
    /// store failure there is logged and leaves the field empty.
    pub async fn open(&self, device_id: &str) -> TestRunCoordinator {
        if let Some(existing) = self.get(device_id) {
            return existing;
        }

        let coordinator = TestRunCoordinator::new(
            device_id,
            self.service.clone(),
            self.sequencer.clone(),
            self.clock.clone(),
            self.timing,
        );
        if let Err(e) = coordinator.prefill().await {
            warn!("{}: could not load next serial: {}", device_id, e);
        }

        let mut coordinators = self.coordinators.write();
        let coordinator = coordinators
            .entry(device_id.to_string())
            .or_insert(coordinator)
            .clone();
        info!("Opened device {}", device_id);
        coordinator
    }

    /// Coordinator of an open device
    pub fn get(&self, device_id: &str) -> Option<TestRunCoordinator> {
        self.coordinators.read().get(device_id).cloned()
    }

    /// Ids of open devices, sorted
    pub fn open_devices(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.coordinators.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Close a device, tearing down its run. Returns false if it was not
    /// open.
    pub fn close(&self, device_id: &str) -> bool {
        match self.coordinators.write().remove(device_id) {
            Some(coordinator) => {
                coordinator.shutdown();
                info!("Closed device {}", device_id);
                true
            }
            None => false,
        }
    }

    /// Tear down every open device
    pub fn shutdown_all(&self) {
        let drained: Vec<TestRunCoordinator> = self.coordinators.write().drain().map(|(_, c)| c).collect();
        for coordinator in drained {
            coordinator.shutdown();
        }
    }

    /// Start a run on an open device
    pub async fn start(&self, device_id: &str, serial_input: &str) -> Result<String, RunError> {
        let coordinator = self.open(device_id).await;
        coordinator.start(serial_input).await
    }
}

impl Drop for TestStation {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::TokioClock;
    use crate::core::session::SessionEvent;
    use crate::core::simulator::SimulatedService;
    use crate::core::state_machine::SessionStatus;
    use crate::core::store::MemoryStore;

    fn station(sim: Arc<SimulatedService>, store: Arc<MemoryStore>) -> TestStation {
        TestStation::new(
            sim,
            SerialSequencer::new(store),
            Arc::new(TokioClock),
            RunTiming::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_devices_run_independently() {
        let sim = Arc::new(SimulatedService::default());
        let store = Arc::new(MemoryStore::with_entries([("serial:ESP32-002", "900")]));
        let station = station(sim.clone(), store);

        let first = station.open("ESP32-001").await;
        let second = station.open("ESP32-002").await;
        assert_eq!(second.snapshot().next_serial, Some(900));
        assert_eq!(station.open_devices(), vec!["ESP32-001", "ESP32-002"]);

        let mut events = first.subscribe();
        station.start("ESP32-001", "10").await.unwrap();
        station.start("ESP32-002", "900").await.unwrap();

        // Closing one device must not disturb the other
        assert!(station.close("ESP32-002"));
        assert_eq!(second.snapshot().status, SessionStatus::Idle);

        loop {
            if let SessionEvent::Finished { device_id, .. } = events.recv().await.unwrap() {
                assert_eq!(device_id, "ESP32-001");
                break;
            }
        }
        assert_eq!(first.snapshot().status, SessionStatus::Pass);
        assert_eq!(first.snapshot().next_serial, Some(11));
        assert!(!station.close("ESP32-002"));
    }

    #[tokio::test]
    async fn test_open_reuses_coordinator() {
        let station = station(Arc::new(SimulatedService::default()), Arc::new(MemoryStore::new()));

        let a = station.open("ESP32-001").await;
        a.start("5").await.unwrap();
        let b = station.open("ESP32-001").await;
        assert_eq!(b.snapshot().tested_serial, Some(5));

        station.shutdown_all();
        assert!(station.open_devices().is_empty());
        assert_eq!(a.snapshot().status, SessionStatus::Idle);
    }
}
