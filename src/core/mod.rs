//! Core module containing the test station lifecycle
//!
//! This module provides:
//! - Execution service contract and its HTTP client
//! - Per-device serial number sequencing on a durable key-value store
//! - Run coordination with a validated state machine
//! - Fixed-delay status polling and the elapsed-time counter
//! - Published session snapshots and events
//! - A simulated execution service for offline use and tests

pub mod clock;
pub mod coordinator;
pub mod poll;
pub mod serial;
pub mod service;
pub mod session;
pub mod simulator;
pub mod state_machine;
pub mod station;
pub mod store;
pub mod timer;
