//! Installed-rule mirror and reconciliation.
//!
//! A [`TableEntryManager`] remembers every entry it has pushed to a switch,
//! per table. Controllers hand it freshly computed entries; the manager
//! compares them against what is installed and issues only the writes and
//! deletes needed to converge. Memory changes only after the driver call for
//! that change has succeeded, so the mirror never claims an entry the switch
//! does not hold.

use std::collections::BTreeMap;
use std::sync::Arc;

use bier_driver::{DeviceDriver, MatchFields, TableEntry};
use log::{debug, info};
use parking_lot::{Mutex, RwLock};

use crate::error::{ReconcileError, ReconcileResult};

/// Outcome of [`TableEntryManager::handle_table_entry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryChange {
    /// An identical entry was already installed.
    Unchanged,
    /// No entry with these match fields existed; one was written.
    Created,
    /// An entry with the same match fields was replaced.
    Updated,
}

impl EntryChange {
    pub fn is_changed(&self) -> bool {
        !matches!(self, EntryChange::Unchanged)
    }
}

/// Rules installed by one controller, grouped by table.
pub struct TableEntryManager {
    name: String,
    driver: Arc<dyn DeviceDriver>,
    tables: BTreeMap<String, Vec<TableEntry>>,
}

impl TableEntryManager {
    pub fn new(name: impl Into<String>, driver: Arc<dyn DeviceDriver>) -> Self {
        Self {
            name: name.into(),
            driver,
            tables: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Starts tracking `table`. Existing entries are kept if it is already tracked.
    pub fn init_table(&mut self, table: &str) {
        self.tables.entry(table.to_string()).or_default();
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn table_entries(&self, table: &str) -> ReconcileResult<&[TableEntry]> {
        self.tables
            .get(table)
            .map(Vec::as_slice)
            .ok_or_else(|| ReconcileError::table_not_found(&self.name, table))
    }

    pub fn entries_for_switch(&self, table: &str, switch: &str) -> ReconcileResult<Vec<&TableEntry>> {
        Ok(self
            .table_entries(table)?
            .iter()
            .filter(|e| e.switch == switch)
            .collect())
    }

    /// True if an identical entry is installed.
    pub fn entry_exists(&self, table: &str, entry: &TableEntry) -> ReconcileResult<bool> {
        Ok(self.table_entries(table)?.contains(entry))
    }

    /// True if an entry with the same switch and match fields is installed.
    pub fn match_fields_exists(&self, table: &str, entry: &TableEntry) -> ReconcileResult<bool> {
        Ok(self.table_entries(table)?.iter().any(|e| e.same_key(entry)))
    }

    /// Converges one desired entry.
    ///
    /// Identical entry installed: nothing happens. Same match fields with a
    /// different action, parameters or priority: the old entry is deleted and
    /// the new one written. Otherwise the entry is written.
    pub fn handle_table_entry(&mut self, table: &str, entry: &TableEntry) -> ReconcileResult<EntryChange> {
        let installed = self.table_entries(table)?;
        if installed.contains(entry) {
            return Ok(EntryChange::Unchanged);
        }

        if installed.iter().any(|e| e.same_key(entry)) {
            self.remove_table_entry(table, entry)?;
            self.add_table_entry(table, entry)?;
            debug!("[{}] updated {} {}", self.name, table, entry);
            return Ok(EntryChange::Updated);
        }

        self.add_table_entry(table, entry)?;
        debug!("[{}] created {} {}", self.name, table, entry);
        Ok(EntryChange::Created)
    }

    /// Writes `entry` and records it.
    pub fn add_table_entry(&mut self, table: &str, entry: &TableEntry) -> ReconcileResult<()> {
        // Fail on unknown tables before touching the switch.
        self.table_entries(table)?;
        self.driver.write(&entry.switch, table, entry)?;
        self.rows_mut(table)?.push(entry.clone());
        Ok(())
    }

    /// Deletes the installed entry that has the same switch and match fields as `entry`.
    pub fn remove_table_entry(&mut self, table: &str, entry: &TableEntry) -> ReconcileResult<()> {
        let pos = self
            .table_entries(table)?
            .iter()
            .position(|e| e.same_key(entry))
            .ok_or_else(|| ReconcileError::entry_not_found(table, entry))?;

        let old = self.table_entries(table)?[pos].clone();
        self.driver.delete(&old.switch, table, &old)?;
        self.rows_mut(table)?.remove(pos);
        Ok(())
    }

    /// Deletes every entry of `switch` in `table` whose match fields are not in `valid`.
    ///
    /// Returns the number of deleted entries. Stops at the first driver error.
    pub fn reconcile_switch(&mut self, table: &str, switch: &str, valid: &[MatchFields]) -> ReconcileResult<usize> {
        let stale: Vec<TableEntry> = self
            .entries_for_switch(table, switch)?
            .into_iter()
            .filter(|e| !valid.contains(&e.match_fields))
            .cloned()
            .collect();

        for entry in &stale {
            self.remove_table_entry(table, entry)?;
            debug!("[{}] removed stale {} {}", self.name, table, entry);
        }
        if !stale.is_empty() {
            info!("[{}] removed {} stale entries from {} on {}", self.name, stale.len(), table, switch);
        }
        Ok(stale.len())
    }

    /// Per-table entry counts.
    pub fn describe(&self) -> Vec<TableDescription> {
        self.tables
            .iter()
            .map(|(table, entries)| TableDescription {
                table: table.clone(),
                entries: entries.len(),
            })
            .collect()
    }

    fn rows_mut(&mut self, table: &str) -> ReconcileResult<&mut Vec<TableEntry>> {
        let manager = &self.name;
        self.tables
            .get_mut(table)
            .ok_or_else(|| ReconcileError::table_not_found(manager, table))
    }
}

/// Entry count of one table, as reported by [`TableEntryManager::describe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescription {
    pub table: String,
    pub entries: usize,
}

/// Looks up table managers by name.
#[derive(Default)]
pub struct ManagerRegistry {
    managers: RwLock<BTreeMap<String, Arc<Mutex<TableEntryManager>>>>,
}

impl ManagerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps `manager` for sharing and registers it under its name.
    ///
    /// A manager registered under an existing name replaces the old one.
    pub fn register(&self, manager: TableEntryManager) -> Arc<Mutex<TableEntryManager>> {
        let name = manager.name().to_string();
        let shared = Arc::new(Mutex::new(manager));
        self.managers.write().insert(name, Arc::clone(&shared));
        shared
    }

    pub fn get(&self, name: &str) -> ReconcileResult<Arc<Mutex<TableEntryManager>>> {
        self.managers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ReconcileError::manager_not_found(name))
    }

    pub fn names(&self) -> Vec<String> {
        self.managers.read().keys().cloned().collect()
    }

    pub fn describe(&self, name: &str) -> ReconcileResult<Vec<TableDescription>> {
        Ok(self.get(name)?.lock().describe())
    }

    /// Every installed entry of the named manager, grouped by table.
    pub fn show_tables(&self, name: &str) -> ReconcileResult<Vec<(String, Vec<TableEntry>)>> {
        let manager = self.get(name)?;
        let manager = manager.lock();
        Ok(manager
            .tables
            .iter()
            .map(|(table, entries)| (table.clone(), entries.clone()))
            .collect())
    }
}
