//! Device driver capability.
//!
//! [`DeviceDriver`] is the only way the control plane reaches a switch.
//! Implementations must be safe to call from any thread; the control plane
//! never retries a failed call itself.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::error::{DriverError, DriverResult};
use crate::types::TableEntry;

/// Writes and deletes table entries on switches.
pub trait DeviceDriver: Send + Sync {
    /// Installs `entry` into `table` on `switch`.
    fn write(&self, switch: &str, table: &str, entry: &TableEntry) -> DriverResult<()>;

    /// Removes `entry` from `table` on `switch`.
    fn delete(&self, switch: &str, table: &str, entry: &TableEntry) -> DriverResult<()>;
}

impl<D: DeviceDriver + ?Sized> DeviceDriver for Arc<D> {
    fn write(&self, switch: &str, table: &str, entry: &TableEntry) -> DriverResult<()> {
        (**self).write(switch, table, entry)
    }

    fn delete(&self, switch: &str, table: &str, entry: &TableEntry) -> DriverResult<()> {
        (**self).delete(switch, table, entry)
    }
}

/// A recorded driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverOp {
    Write { table: String, entry: TableEntry },
    Delete { table: String, entry: TableEntry },
}

impl DriverOp {
    pub fn table(&self) -> &str {
        match self {
            DriverOp::Write { table, .. } | DriverOp::Delete { table, .. } => table,
        }
    }

    pub fn entry(&self) -> &TableEntry {
        match self {
            DriverOp::Write { entry, .. } | DriverOp::Delete { entry, .. } => entry,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, DriverOp::Write { .. })
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<(String, String), Vec<TableEntry>>,
    ops: Vec<DriverOp>,
    failures: VecDeque<DriverError>,
    disconnected: BTreeSet<String>,
}

/// In-memory driver that behaves like a switch table and records every call.
///
/// Clones share the same state, so a test can keep a handle while the
/// control plane owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryDriver {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries currently present in `table` on `switch`, in install order.
    pub fn installed(&self, switch: &str, table: &str) -> Vec<TableEntry> {
        self.state
            .lock()
            .tables
            .get(&(switch.to_string(), table.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Every successful call since creation or the last [`clear_ops`](Self::clear_ops).
    pub fn ops(&self) -> Vec<DriverOp> {
        self.state.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state.lock().ops.clear();
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().ops.iter().filter(|op| op.is_write()).count()
    }

    pub fn delete_count(&self) -> usize {
        self.state.lock().ops.iter().filter(|op| !op.is_write()).count()
    }

    /// Makes the next call fail with `error`, regardless of switch or table.
    pub fn fail_next(&self, error: DriverError) {
        self.state.lock().failures.push_back(error);
    }

    /// Rejects every call for `switch` until [`reconnect`](Self::reconnect).
    pub fn disconnect(&self, switch: &str) {
        self.state.lock().disconnected.insert(switch.to_string());
    }

    pub fn reconnect(&self, switch: &str) {
        self.state.lock().disconnected.remove(switch);
    }

    fn check(state: &mut MemoryState, switch: &str) -> DriverResult<()> {
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        if state.disconnected.contains(switch) {
            return Err(DriverError::not_connected(switch));
        }
        Ok(())
    }
}

impl DeviceDriver for MemoryDriver {
    fn write(&self, switch: &str, table: &str, entry: &TableEntry) -> DriverResult<()> {
        let mut state = self.state.lock();
        Self::check(&mut state, switch)?;

        let rows = state
            .tables
            .entry((switch.to_string(), table.to_string()))
            .or_default();
        if rows.iter().any(|e| e.same_key(entry)) {
            return Err(DriverError::already_exists(switch, entry));
        }
        rows.push(entry.clone());

        debug!("write {} {}", table, entry);
        state.ops.push(DriverOp::Write {
            table: table.to_string(),
            entry: entry.clone(),
        });
        Ok(())
    }

    fn delete(&self, switch: &str, table: &str, entry: &TableEntry) -> DriverResult<()> {
        let mut state = self.state.lock();
        Self::check(&mut state, switch)?;

        let rows = state
            .tables
            .entry((switch.to_string(), table.to_string()))
            .or_default();
        let pos = rows
            .iter()
            .position(|e| e.same_key(entry))
            .ok_or_else(|| DriverError::not_found(switch, entry))?;
        rows.remove(pos);

        debug!("delete {} {}", table, entry);
        state.ops.push(DriverOp::Delete {
            table: table.to_string(),
            entry: entry.clone(),
        });
        Ok(())
    }
}
