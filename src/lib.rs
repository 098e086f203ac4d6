//! # Teststation Core Library
//!
//! Lifecycle coordination for a hardware-in-the-loop PCB test station:
//! - Start a charge-cycle test run for a device through the execution service
//! - Poll the run until it passes or fails
//! - Advance the per-device board serial after every finished run
//! - Publish session snapshots for a display layer
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use teststation_core::{
//!     FileStore, HttpExecutionService, RunTiming, SerialSequencer, SessionEvent, TestStation,
//!     TokioClock,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let service = HttpExecutionService::new("http://localhost:8080/api", Duration::from_secs(15))?;
//!     let store = FileStore::open("serials.json").await?;
//!     let station = TestStation::new(
//!         Arc::new(service),
//!         SerialSequencer::new(Arc::new(store)),
//!         Arc::new(TokioClock),
//!         RunTiming::default(),
//!     );
//!
//!     let device = station.open("ESP32-001").await;
//!     let mut rx = device.subscribe();
//!     device.start("124").await?;
//!
//!     while let Ok(event) = rx.recv().await {
//!         if let SessionEvent::Finished { status, .. } = event {
//!             println!("Finished: {status}");
//!             break;
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes, OutputFormat};
pub use crate::config::{AppConfig, ConfigError};
pub use crate::core::clock::{Clock, TokioClock};
pub use crate::core::coordinator::{RunError, RunTiming, TestRunCoordinator};
pub use crate::core::poll::{PollHandle, PollOutcome, PollScheduler};
pub use crate::core::serial::{parse_serial, Increment, SerialSequencer, ValidationError};
pub use crate::core::service::{
    DeviceInfo, ExecutionService, HttpExecutionService, RunStatus, TestRecord, TestResult, TestSummary,
    TransportError,
};
pub use crate::core::session::{DeviceSession, SessionEvent};
pub use crate::core::simulator::{SimulatedService, SimulationProfile};
pub use crate::core::state_machine::SessionStatus;
pub use crate::core::station::TestStation;
pub use crate::core::store::{FileStore, KeyValueStore, MemoryStore, StoreError};
pub use crate::core::timer::ElapsedTimer;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
