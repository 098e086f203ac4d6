//! Per-device serial number sequencing
//!
//! Each device keeps a "next serial to use" under `serial:<device id>` in a
//! [`KeyValueStore`]. The value is the operator's board serial and advances
//! by one after every completed test run.

use super::store::{KeyValueStore, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Serial number validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// No serial entered
    #[error("Serial number is required")]
    Empty,

    /// Serial contains something other than ASCII digits
    #[error("Serial number must contain digits only: {0:?}")]
    NotDigits(String),

    /// Serial does not fit the sequencer's integer range
    #[error("Serial number out of range: {0}")]
    OutOfRange(String),
}

/// Parse an operator-entered serial number.
///
/// Accepts a non-empty string of ASCII digits that fits a `u64`; leading
/// zeros are dropped.
pub fn parse_serial(input: &str) -> Result<u64, ValidationError> {
    if input.is_empty() {
        return Err(ValidationError::Empty);
    }
    if !input.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::NotDigits(input.to_string()));
    }
    input
        .parse::<u64>()
        .map_err(|_| ValidationError::OutOfRange(input.to_string()))
}

/// Outcome of [`SerialSequencer::increment`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Increment {
    /// The stored serial was advanced to this value
    Advanced(u64),
    /// The stored value was absent or not a valid serial and was left as is
    Unchanged(Option<String>),
}

impl Increment {
    /// The advanced serial, if any
    pub fn next(&self) -> Option<u64> {
        match self {
            Self::Advanced(n) => Some(*n),
            Self::Unchanged(_) => None,
        }
    }
}

/// Persisted next-serial sequence, addressed by device id
#[derive(Clone)]
pub struct SerialSequencer {
    store: Arc<dyn KeyValueStore>,
}

impl SerialSequencer {
    /// Create a sequencer on top of a store
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Store key for a device
    pub fn key(device_id: &str) -> String {
        format!("serial:{device_id}")
    }

    /// Last persisted value, verbatim
    pub async fn read(&self, device_id: &str) -> Result<Option<String>, StoreError> {
        self.store.get(&Self::key(device_id)).await
    }

    /// Last persisted value as a serial number; `None` when absent or invalid
    pub async fn read_serial(&self, device_id: &str) -> Result<Option<u64>, StoreError> {
        Ok(self
            .read(device_id)
            .await?
            .and_then(|raw| parse_serial(&raw).ok()))
    }

    /// Persist a value verbatim
    pub async fn write(&self, device_id: &str, value: &str) -> Result<(), StoreError> {
        self.store.set(&Self::key(device_id), value).await?;
        debug!("Serial for {} set to {}", device_id, value);
        Ok(())
    }

    /// Advance the stored serial by one.
    ///
    /// A missing or non-numeric stored value is left untouched and reported
    /// as [`Increment::Unchanged`]; that is not an error.
    pub async fn increment(&self, device_id: &str) -> Result<Increment, StoreError> {
        let current = self.read(device_id).await?;

        let next = current
            .as_deref()
            .and_then(|raw| parse_serial(raw).ok())
            .and_then(|n| n.checked_add(1));

        match next {
            Some(next) => {
                self.write(device_id, &next.to_string()).await?;
                Ok(Increment::Advanced(next))
            }
            None => {
                warn!(
                    "Serial for {} not advanced, stored value is {:?}",
                    device_id, current
                );
                Ok(Increment::Unchanged(current))
            }
        }
    }
}
