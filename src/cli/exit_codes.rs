//! CLI Exit Codes
//!
//! Exit codes for CLI operations and line automation.

use crate::config::ConfigError;
use crate::core::coordinator::RunError;
use crate::core::service::TransportError;
use crate::core::store::StoreError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success, or the test passed
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Execution service unreachable
    pub const CONNECTION_FAILED: u8 = 3;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// User cancelled
    pub const CANCELLED: u8 = 11;

    /// Device not found
    pub const DEVICE_NOT_FOUND: u8 = 12;

    /// Device busy
    pub const DEVICE_BUSY: u8 = 13;

    /// Serial number validation failed
    pub const VALIDATION_FAILED: u8 = 17;

    /// The test ran and failed
    pub const TEST_FAILED: u8 = 18;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    pub fn success() -> Self {
        Self::Success(None)
    }

    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success(Some(msg.into()))
    }

    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::Error(ExitCodes::CONNECTION_FAILED, msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Error(ExitCodes::CANCELLED, msg.into())
    }

    pub fn test_failed(msg: impl Into<String>) -> Self {
        Self::Error(ExitCodes::TEST_FAILED, msg.into())
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) | Self::Error(_, msg) => Some(msg),
            Self::Success(None) => None,
        }
    }

    /// Convert to ExitCode
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Classify an error from any layer
    pub fn from_error(err: &anyhow::Error) -> Self {
        if let Some(e) = err.downcast_ref::<RunError>() {
            return e.into();
        }
        if let Some(e) = err.downcast_ref::<TransportError>() {
            return e.into();
        }
        if let Some(e) = err.downcast_ref::<ConfigError>() {
            return Self::Error(ExitCodes::CONFIG_ERROR, e.to_string());
        }
        if let Some(e) = err.downcast_ref::<StoreError>() {
            return Self::Error(ExitCodes::ERROR, e.to_string());
        }
        Self::Error(ExitCodes::ERROR, format!("{err:#}"))
    }
}

impl From<&TransportError> for CliResult {
    fn from(err: &TransportError) -> Self {
        let code = match err {
            TransportError::Request(_) => ExitCodes::CONNECTION_FAILED,
            TransportError::InvalidUrl(_) => ExitCodes::CONFIG_ERROR,
            TransportError::Status { code: 404, .. } => ExitCodes::DEVICE_NOT_FOUND,
            TransportError::Status { code: 409, .. } => ExitCodes::DEVICE_BUSY,
            TransportError::Status { .. } | TransportError::Decode(_) => ExitCodes::ERROR,
        };
        Self::Error(code, err.to_string())
    }
}

impl From<&RunError> for CliResult {
    fn from(err: &RunError) -> Self {
        match err {
            RunError::Validation(_) => Self::Error(ExitCodes::VALIDATION_FAILED, err.to_string()),
            RunError::Transport(e) => e.into(),
            RunError::Store(_) => Self::Error(ExitCodes::ERROR, err.to_string()),
            RunError::Busy { .. } => Self::Error(ExitCodes::DEVICE_BUSY, err.to_string()),
            RunError::Cancelled => Self::Error(ExitCodes::CANCELLED, err.to_string()),
        }
    }
}

const TABLE: [u8; 11] = [0, 1, 2, 3, 8, 11, 12, 13, 17, 18, 127];

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success / test passed",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Connection to execution service failed",
        8 => "Configuration error",
        11 => "Operation cancelled",
        12 => "Device not found",
        13 => "Device busy",
        17 => "Serial number validation failed",
        18 => "Test failed",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in TABLE {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}

/// Exit code table as (code, description) pairs
pub fn exit_code_table() -> Vec<(u8, &'static str)> {
    TABLE.iter().map(|&c| (c, exit_code_description(c))).collect()
}
