//! Published view of a device's test session
//!
//! A [`DeviceSession`] is the read-only snapshot the display layer renders.
//! The coordinator republishes it as a [`SessionEvent`] after every change.

use super::service::{RunStatus, TestResult};
use super::state_machine::SessionStatus;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Snapshot of one device's active or most recent run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSession {
    /// Device identifier
    pub device_id: String,
    /// Lifecycle status
    pub status: SessionStatus,
    /// Run identifier, once the service accepted the start
    pub test_id: Option<String>,
    /// Board serial of the in-flight or most recent run
    pub tested_serial: Option<u64>,
    /// Measurement summary, only in Pass or Fail
    pub result: Option<TestResult>,
    /// Message of the last failure
    pub error: Option<String>,
    /// Seconds since the run started, meaningful while Running
    pub elapsed_secs: u64,
    /// Serial that pre-fills the next run
    pub next_serial: Option<u64>,
    /// When the run entered Running
    pub started_at: Option<DateTime<Local>>,
    /// When the run reached Pass or Fail
    pub finished_at: Option<DateTime<Local>>,
}

impl DeviceSession {
    /// Fresh idle session
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            status: SessionStatus::Idle,
            test_id: None,
            tested_serial: None,
            result: None,
            error: None,
            elapsed_secs: 0,
            next_serial: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Whether a new run may be started
    pub fn can_start(&self) -> bool {
        self.status == SessionStatus::Idle
    }

    /// Whether the detail view for the finished run is available
    pub fn can_view_detail(&self) -> bool {
        self.status.is_terminal() && self.test_id.is_some()
    }

    /// Elapsed time for display
    pub fn elapsed_display(&self) -> String {
        format_elapsed(self.elapsed_secs)
    }
}

/// Session events
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Snapshot after a transition or timer tick
    Updated(DeviceSession),
    /// A run reached a terminal status; recent tests should be refreshed
    Finished {
        /// Device
        device_id: String,
        /// Finished run, key of the detail view
        test_id: String,
        /// Outcome
        status: RunStatus,
    },
}

/// `42s`, `1m 5s`
pub fn format_elapsed(secs: u64) -> String {
    if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}
