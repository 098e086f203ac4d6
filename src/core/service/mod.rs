//! Execution service boundary
//!
//! The execution service runs the physical test procedure on a device and
//! stores its outcome. This crate only drives it:
//! - start a run for a device and board serial
//! - query the status of a run
//! - list recent runs, devices and full run records for display

mod http;

pub use http::HttpExecutionService;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use thiserror::Error;

/// Execution service error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Request could not be sent or no response arrived
    #[error("{0}")]
    Request(String),

    /// Service answered with a non-success status
    #[error("{message}")]
    Status {
        /// HTTP status code
        code: u16,
        /// Message reported by the service
        message: String,
    },

    /// Response body did not match the expected shape
    #[error("Invalid response: {0}")]
    Decode(String),

    /// Service URL could not be used
    #[error("Invalid service URL: {0}")]
    InvalidUrl(String),
}

/// Status of a test run as reported by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Still running on the device
    InProgress,
    /// Finished, board passed
    Pass,
    /// Finished, board failed
    Fail,
}

impl RunStatus {
    /// Pass and Fail end a run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Pass | Self::Fail)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Pass => write!(f, "PASS"),
            Self::Fail => write!(f, "FAIL"),
        }
    }
}

/// Measurement summary of a finished run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    /// Charge cycles completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cycles: Option<u32>,
    /// Average voltage (V)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_voltage: Option<f64>,
    /// Average current (A)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_current: Option<f64>,
    /// Average charge time (ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_charge_time: Option<f64>,
}

/// Response to a start request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedTest {
    /// Identifier of the new run
    #[serde(deserialize_with = "string_or_number")]
    pub test_id: String,
}

/// Response to a status query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestStatusReport {
    /// Current status
    pub status: RunStatus,
    /// Present once the status is terminal
    #[serde(default)]
    pub result: Option<TestResult>,
}

impl TestStatusReport {
    /// Still running
    pub fn in_progress() -> Self {
        Self {
            status: RunStatus::InProgress,
            result: None,
        }
    }

    /// Finished with a result
    pub fn finished(status: RunStatus, result: TestResult) -> Self {
        Self {
            status,
            result: Some(result),
        }
    }
}

/// One row of a device's recent runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSummary {
    /// Run identifier
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    /// Board serial
    #[serde(deserialize_with = "string_or_number")]
    pub serial_no: String,
    /// Outcome
    pub status: RunStatus,
    /// Creation time as reported by the service
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Device availability as reported by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceState {
    /// Ready for a run
    Idle,
    /// Running a test
    Running,
    /// Not reachable
    Offline,
    /// Anything else
    #[serde(other)]
    Unknown,
}

/// Test device known to the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Device identifier
    pub device_id: String,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Availability
    pub status: DeviceState,
}

impl DeviceInfo {
    /// Name for display, falling back to the id
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.device_id)
    }
}

/// Per-cycle measurement of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    /// Cycle number, 1-based
    pub cycle_no: u32,
    /// Voltage (V)
    #[serde(default)]
    pub voltage: Option<f64>,
    /// Current (A)
    #[serde(default)]
    pub current: Option<f64>,
    /// Charge time (ms)
    #[serde(default)]
    pub charge_time: Option<f64>,
    /// Peak voltage (V)
    #[serde(default)]
    pub peak_voltage: Option<f64>,
}

/// Full record of a run, for the detail view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRecord {
    /// Board serial
    #[serde(deserialize_with = "string_or_number")]
    pub serial_no: String,
    /// Outcome
    pub status: RunStatus,
    /// Charge cycles completed
    #[serde(default)]
    pub total_cycles: Option<u32>,
    /// Per-cycle measurements
    #[serde(default)]
    pub measurements: Vec<Measurement>,
}

impl TestRecord {
    /// Measurements ordered by cycle number
    pub fn sorted_measurements(&self) -> Vec<Measurement> {
        let mut measurements = self.measurements.clone();
        measurements.sort_by_key(|m| m.cycle_no);
        measurements
    }
}

/// Execution service operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecutionService: Send + Sync {
    /// Start a run of `device_id` on the board with `serial_no`
    async fn start_test(&self, device_id: &str, serial_no: u64) -> Result<StartedTest, TransportError>;

    /// Query the status of a run
    async fn get_status(&self, test_id: &str) -> Result<TestStatusReport, TransportError>;

    /// Most recent runs of a device, newest first
    async fn list_recent(&self, device_id: &str, limit: usize) -> Result<Vec<TestSummary>, TransportError>;

    /// Devices known to the service
    async fn list_devices(&self) -> Result<Vec<DeviceInfo>, TransportError>;

    /// Full record of a run
    async fn get_test(&self, test_id: &str) -> Result<TestRecord, TransportError>;
}

/// Accept identifiers sent either as JSON strings or numbers
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(serde_json::Number),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s,
        Raw::Num(n) => n.to_string(),
    })
}
