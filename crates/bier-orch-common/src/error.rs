//! Error types for reconciliation and event dispatch.

use bier_driver::DriverError;
use thiserror::Error;

/// Errors raised by a [`TableEntryManager`](crate::TableEntryManager).
#[derive(Debug, Clone, Error)]
pub enum ReconcileError {
    #[error("Entry not found in {table}: {entry}")]
    EntryNotFound { table: String, entry: String },

    #[error("Table {table} not initialised in manager {manager}")]
    TableNotFound { manager: String, table: String },

    #[error("Table manager {name} not found")]
    TableManagerNotFound { name: String },

    /// The switch rejected the change. Memory was left as it was before the call.
    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl ReconcileError {
    pub fn entry_not_found(table: impl Into<String>, entry: impl ToString) -> Self {
        ReconcileError::EntryNotFound {
            table: table.into(),
            entry: entry.to_string(),
        }
    }

    pub fn table_not_found(manager: impl Into<String>, table: impl Into<String>) -> Self {
        ReconcileError::TableNotFound {
            manager: manager.into(),
            table: table.into(),
        }
    }

    pub fn manager_not_found(name: impl Into<String>) -> Self {
        ReconcileError::TableManagerNotFound { name: name.into() }
    }

    /// Returns true for lookups against state that does not exist yet.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ReconcileError::EntryNotFound { .. }
                | ReconcileError::TableNotFound { .. }
                | ReconcileError::TableManagerNotFound { .. }
        )
    }
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Errors raised when unsubscribing from the [`EventBus`](crate::EventBus).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("No handlers registered for event {event}")]
    EventNotFound { event: String },

    #[error("Handler {id} not registered for event {event}")]
    HandlerNotFound { event: String, id: u64 },
}

impl EventError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            EventError::EventNotFound { .. } | EventError::HandlerNotFound { .. }
        )
    }
}
