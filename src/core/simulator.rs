//! Simulated execution service
//!
//! Stands in for the real execution service when no hardware is attached.
//! Runs finish after a fixed number of status queries with deterministic
//! measurements, individual responses can be scripted, and every call is
//! recorded with the instant it arrived.

use super::clock::{Clock, TokioClock};
use super::service::{
    DeviceInfo, DeviceState, ExecutionService, Measurement, RunStatus, StartedTest, TestRecord,
    TestResult, TestStatusReport, TestSummary, TransportError,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// How simulated runs behave
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationProfile {
    /// Status queries answered with IN_PROGRESS before the run finishes
    pub polls_to_finish: u32,
    /// Outcome of every run
    pub outcome: RunStatus,
    /// Charge cycles per run
    pub cycles: u32,
    /// Delay before each response
    pub response_delay: Duration,
}

impl Default for SimulationProfile {
    fn default() -> Self {
        Self {
            polls_to_finish: 2,
            outcome: RunStatus::Pass,
            cycles: 20,
            response_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ServiceCall {
    StartTest,
    GetStatus { test_id: String },
    ListRecent,
    ListDevices,
    GetTest,
}

#[derive(Debug, Clone)]
struct RecordedCall {
    call: ServiceCall,
    // Arrival, before any simulated delay
    at: Instant,
}

struct SimRun {
    device_id: String,
    serial_no: u64,
    polls: u32,
    finished: Option<(RunStatus, TestResult)>,
    created_at: String,
}

#[derive(Default)]
struct SimState {
    next_id: u64,
    runs: HashMap<String, SimRun>,
    order: Vec<String>,
    start_script: VecDeque<Result<StartedTest, TransportError>>,
    status_script: VecDeque<Result<TestStatusReport, TransportError>>,
    calls: Vec<RecordedCall>,
}

/// In-process execution service
pub struct SimulatedService {
    profile: SimulationProfile,
    devices: Vec<DeviceInfo>,
    clock: Arc<dyn Clock>,
    state: Mutex<SimState>,
}

impl Default for SimulatedService {
    fn default() -> Self {
        Self::new(SimulationProfile::default())
    }
}

impl SimulatedService {
    /// Create a simulator with the given profile and three idle devices
    pub fn new(profile: SimulationProfile) -> Self {
        let devices = (1..=3)
            .map(|n| DeviceInfo {
                device_id: format!("ESP32-{n:03}"),
                name: Some(format!("Device {n:02} (Line {})", char::from(b'A' + n as u8 - 1))),
                status: DeviceState::Idle,
            })
            .collect();

        Self {
            profile,
            devices,
            clock: Arc::new(TokioClock),
            state: Mutex::new(SimState {
                next_id: 1,
                ..SimState::default()
            }),
        }
    }

    /// Answer the next start request with `response` instead of simulating
    pub fn script_start(&self, response: Result<StartedTest, TransportError>) {
        self.state.lock().start_script.push_back(response);
    }

    /// Answer the next status query with `response` instead of simulating
    pub fn script_status(&self, response: Result<TestStatusReport, TransportError>) {
        self.state.lock().status_script.push_back(response);
    }

    /// Arrival times of the status queries for a run
    pub fn status_times(&self, test_id: &str) -> Vec<Instant> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(&c.call, ServiceCall::GetStatus { test_id: id } if id == test_id))
            .map(|c| c.at)
            .collect()
    }

    /// Number of start requests so far
    pub fn start_count(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c.call, ServiceCall::StartTest))
            .count()
    }

    /// Number of status queries so far
    pub fn status_count(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c.call, ServiceCall::GetStatus { .. }))
            .count()
    }

    fn record(&self, call: ServiceCall) {
        let at = self.clock.now();
        self.state.lock().calls.push(RecordedCall { call, at });
    }

    async fn respond(&self) {
        if !self.profile.response_delay.is_zero() {
            self.clock.sleep(self.profile.response_delay).await;
        }
    }

    fn measurements(&self) -> Vec<Measurement> {
        (1..=self.profile.cycles)
            .map(|cycle| {
                let voltage = 4.0 + f64::from(cycle % 5) * 0.01;
                Measurement {
                    cycle_no: cycle,
                    voltage: Some(voltage),
                    current: Some(0.5),
                    charge_time: Some(800.0 + f64::from(cycle) * 2.0),
                    peak_voltage: Some(voltage + 0.1),
                }
            })
            .collect()
    }

    fn summarize(&self, measurements: &[Measurement]) -> TestResult {
        let avg = |f: fn(&Measurement) -> Option<f64>| {
            let values: Vec<f64> = measurements.iter().filter_map(f).collect();
            (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
        };

        TestResult {
            total_cycles: Some(self.profile.cycles),
            avg_voltage: avg(|m| m.voltage),
            avg_current: avg(|m| m.current),
            avg_charge_time: avg(|m| m.charge_time),
        }
    }

    fn register_run(state: &mut SimState, test_id: String, device_id: &str, serial_no: u64) {
        state.runs.insert(
            test_id.clone(),
            SimRun {
                device_id: device_id.to_string(),
                serial_no,
                polls: 0,
                finished: None,
                created_at: chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
            },
        );
        state.order.push(test_id);
    }
}

#[async_trait]
impl ExecutionService for SimulatedService {
    async fn start_test(&self, device_id: &str, serial_no: u64) -> Result<StartedTest, TransportError> {
        self.record(ServiceCall::StartTest);
        self.respond().await;

        let mut state = self.state.lock();

        if let Some(scripted) = state.start_script.pop_front() {
            if let Ok(started) = &scripted {
                Self::register_run(&mut state, started.test_id.clone(), device_id, serial_no);
            }
            return scripted;
        }

        if !self.devices.iter().any(|d| d.device_id == device_id) {
            return Err(TransportError::Status {
                code: 404,
                message: format!("Unknown device: {device_id}"),
            });
        }

        let test_id = format!("T{}", state.next_id);
        state.next_id += 1;
        Self::register_run(&mut state, test_id.clone(), device_id, serial_no);

        Ok(StartedTest { test_id })
    }

    async fn get_status(&self, test_id: &str) -> Result<TestStatusReport, TransportError> {
        self.record(ServiceCall::GetStatus {
            test_id: test_id.to_string(),
        });
        self.respond().await;

        if let Some(scripted) = self.state.lock().status_script.pop_front() {
            return scripted;
        }

        let finished = {
            let mut state = self.state.lock();
            let run = state.runs.get_mut(test_id).ok_or_else(|| TransportError::Status {
                code: 404,
                message: format!("Unknown test: {test_id}"),
            })?;

            if let Some((status, result)) = &run.finished {
                return Ok(TestStatusReport::finished(*status, result.clone()));
            }

            run.polls += 1;
            run.polls > self.profile.polls_to_finish
        };

        if !finished {
            return Ok(TestStatusReport::in_progress());
        }

        let result = self.summarize(&self.measurements());
        let mut state = self.state.lock();
        if let Some(run) = state.runs.get_mut(test_id) {
            run.finished = Some((self.profile.outcome, result.clone()));
        }
        Ok(TestStatusReport::finished(self.profile.outcome, result))
    }

    async fn list_recent(&self, device_id: &str, limit: usize) -> Result<Vec<TestSummary>, TransportError> {
        self.record(ServiceCall::ListRecent);
        self.respond().await;

        let state = self.state.lock();
        Ok(state
            .order
            .iter()
            .rev()
            .filter_map(|id| state.runs.get(id).map(|run| (id, run)))
            .filter(|(_, run)| run.device_id == device_id)
            .filter_map(|(id, run)| {
                run.finished.as_ref().map(|(status, _)| TestSummary {
                    id: id.clone(),
                    serial_no: run.serial_no.to_string(),
                    status: *status,
                    created_at: Some(run.created_at.clone()),
                })
            })
            .take(limit)
            .collect())
    }

    async fn list_devices(&self) -> Result<Vec<DeviceInfo>, TransportError> {
        self.record(ServiceCall::ListDevices);
        self.respond().await;

        Ok(self.devices.clone())
    }

    async fn get_test(&self, test_id: &str) -> Result<TestRecord, TransportError> {
        self.record(ServiceCall::GetTest);
        self.respond().await;

        let state = self.state.lock();
        let run = state.runs.get(test_id).ok_or_else(|| TransportError::Status {
            code: 404,
            message: format!("Unknown test: {test_id}"),
        })?;

        let status = run
            .finished
            .as_ref()
            .map_or(RunStatus::InProgress, |(status, _)| *status);
        let measurements = if run.finished.is_some() {
            self.measurements()
        } else {
            Vec::new()
        };

        Ok(TestRecord {
            serial_no: run.serial_no.to_string(),
            status,
            total_cycles: run.finished.as_ref().and_then(|(_, r)| r.total_cycles),
            measurements,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_finishes_after_configured_polls() {
        let sim = SimulatedService::default();
        let started = sim.start_test("ESP32-001", 124).await.unwrap();
        assert_eq!(started.test_id, "T1");

        assert_eq!(sim.get_status("T1").await.unwrap().status, RunStatus::InProgress);
        assert_eq!(sim.get_status("T1").await.unwrap().status, RunStatus::InProgress);

        let done = sim.get_status("T1").await.unwrap();
        assert_eq!(done.status, RunStatus::Pass);
        let result = done.result.unwrap();
        assert_eq!(result.total_cycles, Some(20));
        assert_eq!(result.avg_current, Some(0.5));

        // Further queries repeat the outcome
        assert_eq!(sim.get_status("T1").await.unwrap().status, RunStatus::Pass);
        assert_eq!(sim.status_count(), 4);
    }

    #[tokio::test]
    async fn test_unknown_device_and_test() {
        let sim = SimulatedService::default();
        assert!(matches!(
            sim.start_test("NOPE", 1).await,
            Err(TransportError::Status { code: 404, .. })
        ));
        assert!(sim.get_status("T99").await.is_err());
    }

    #[tokio::test]
    async fn test_scripted_responses_take_precedence() {
        let sim = SimulatedService::default();
        sim.script_start(Ok(StartedTest {
            test_id: "X1".to_string(),
        }));
        sim.script_status(Err(TransportError::Request("connection reset".to_string())));

        assert_eq!(sim.start_test("ANY", 5).await.unwrap().test_id, "X1");
        assert!(sim.get_status("X1").await.is_err());
        assert_eq!(sim.get_status("X1").await.unwrap().status, RunStatus::InProgress);
    }

    #[tokio::test]
    async fn test_recent_and_detail() {
        let sim = SimulatedService::new(SimulationProfile {
            polls_to_finish: 0,
            outcome: RunStatus::Fail,
            cycles: 3,
            ..SimulationProfile::default()
        });

        for serial in [10, 11, 12] {
            let id = sim.start_test("ESP32-002", serial).await.unwrap().test_id;
            sim.get_status(&id).await.unwrap();
        }
        sim.start_test("ESP32-002", 13).await.unwrap();

        let recent = sim.list_recent("ESP32-002", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].serial_no, "12");
        assert_eq!(recent[1].serial_no, "11");
        assert!(recent.iter().all(|r| r.status == RunStatus::Fail));
        assert!(sim.list_recent("ESP32-001", 5).await.unwrap().is_empty());

        let record = sim.get_test("T1").await.unwrap();
        assert_eq!(record.measurements.len(), 3);
        assert_eq!(record.total_cycles, Some(3));

        let pending = sim.get_test("T4").await.unwrap();
        assert_eq!(pending.status, RunStatus::InProgress);
        assert!(pending.measurements.is_empty());
    }
}
