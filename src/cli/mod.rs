//! CLI Module
//!
//! Provides command-line interface functionality including:
//! - Exit codes for automation
//! - Text rendering of sessions, results and records

pub mod exit_codes;
pub mod render;

pub use exit_codes::{exit_code_description, print_exit_codes, CliResult, ExitCodes};

use clap::ValueEnum;

/// CLI output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON format for scripting
    Json,
}
