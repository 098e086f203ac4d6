//! Test run state machine
//!
//! Formal lifecycle of one device's test run:
//! `Idle -> Starting -> Running -> Pass | Fail -> Idle`, with failure edges
//! from `Starting` and `Running` back to `Idle`.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::service::RunStatus;

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SessionStatus {
    /// Ready for a new run
    #[default]
    Idle,
    /// Start request sent, waiting for a test id
    Starting,
    /// Run in progress, polling for its outcome
    Running,
    /// Last run passed
    Pass,
    /// Last run failed
    Fail,
}

impl SessionStatus {
    /// A run is being started or is in progress
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    /// Last run reached an outcome
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Pass | Self::Fail)
    }

    /// Session status for a terminal run status
    pub fn from_terminal(status: RunStatus) -> Option<Self> {
        match status {
            RunStatus::Pass => Some(Self::Pass),
            RunStatus::Fail => Some(Self::Fail),
            RunStatus::InProgress => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Starting => write!(f, "Starting"),
            Self::Running => write!(f, "Running"),
            Self::Pass => write!(f, "Pass"),
            Self::Fail => write!(f, "Fail"),
        }
    }
}

/// Rejected transition
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Invalid transition from {from} to {to}")]
pub struct InvalidTransition {
    /// Current status
    pub from: SessionStatus,
    /// Requested status
    pub to: SessionStatus,
}

/// State transition event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    /// Previous status
    pub from: SessionStatus,
    /// New status
    pub to: SessionStatus,
    /// Timestamp
    pub timestamp: DateTime<Local>,
    /// Reason for transition
    pub reason: Option<String>,
}

/// Validating state machine with a bounded transition history
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    state: SessionStatus,
    history: Vec<StateTransition>,
    max_history: usize,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    /// Create a machine in `Idle`
    pub fn new() -> Self {
        Self {
            state: SessionStatus::Idle,
            history: Vec::new(),
            max_history: 100,
        }
    }

    /// Current status
    pub fn state(&self) -> SessionStatus {
        self.state
    }

    /// Past transitions, oldest first
    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// Move to `new_state` if the lifecycle allows it
    pub fn transition(&mut self, new_state: SessionStatus, reason: Option<&str>) -> Result<(), InvalidTransition> {
        if !self.is_valid_transition(new_state) {
            return Err(InvalidTransition {
                from: self.state,
                to: new_state,
            });
        }

        self.history.push(StateTransition {
            from: self.state,
            to: new_state,
            timestamp: Local::now(),
            reason: reason.map(String::from),
        });
        if self.history.len() > self.max_history {
            self.history.remove(0);
        }

        self.state = new_state;
        Ok(())
    }

    fn is_valid_transition(&self, new_state: SessionStatus) -> bool {
        use SessionStatus::*;

        matches!(
            (self.state, new_state),
            (Idle, Starting)
                | (Starting, Running)
                | (Starting, Idle)
                | (Running, Pass)
                | (Running, Fail)
                | (Running, Idle)
                | (Pass, Idle)
                | (Fail, Idle)
        )
    }
}
