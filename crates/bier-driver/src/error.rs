//! Driver error types.
//!
//! A switch refuses a table write or delete when the entry's key state does
//! not match the request, or when it is not reachable.

use std::fmt;
use thiserror::Error;

/// Error type for driver operations.
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    /// No connection to the switch is known to the driver.
    #[error("Switch {switch} is not connected")]
    NotConnected { switch: String },

    /// The entry to delete is not present on the switch.
    #[error("Entry not found on {switch}: {entry}")]
    NotFound { switch: String, entry: String },

    /// The entry to create already exists on the switch.
    #[error("Entry already exists on {switch}: {entry}")]
    AlreadyExists { switch: String, entry: String },

    /// Internal error.
    #[error("Internal driver error: {message}")]
    Internal { message: String },
}

impl DriverError {
    /// Creates a not connected error.
    pub fn not_connected(switch: impl Into<String>) -> Self {
        DriverError::NotConnected {
            switch: switch.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(switch: impl Into<String>, entry: impl fmt::Display) -> Self {
        DriverError::NotFound {
            switch: switch.into(),
            entry: entry.to_string(),
        }
    }

    /// Creates an already exists error.
    pub fn already_exists(switch: impl Into<String>, entry: impl fmt::Display) -> Self {
        DriverError::AlreadyExists {
            switch: switch.into(),
            entry: entry.to_string(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        DriverError::Internal {
            message: message.into(),
        }
    }

    /// Returns the switch this error refers to, if any.
    pub fn switch(&self) -> Option<&str> {
        match self {
            DriverError::NotConnected { switch }
            | DriverError::NotFound { switch, .. }
            | DriverError::AlreadyExists { switch, .. } => Some(switch),
            DriverError::Internal { .. } => None,
        }
    }
}

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;
