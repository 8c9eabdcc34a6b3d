//! Shared state handed to every controller.
//!
//! The daemon builds one [`ControllerContext`] and clones it into each
//! controller. All stores sit behind `parking_lot` locks; a controller must
//! drop its guards before triggering a nested event, because nested handlers
//! run on the same thread and take the same locks.

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use std::thread;

use bier_driver::{DeviceDriver, MatchFields, TableEntry};
use bier_orch_common::{EntryChange, EventBus, ManagerRegistry, ReconcileResult, TableEntryManager};
use log::{debug, error, info};
use parking_lot::{Mutex, RwLock};

use crate::config::{ControllerConfig, UpdateTarget};
use crate::events::{ControlEvent, TopologyChange};
use crate::group::GroupStore;
use crate::topology::TopologyStore;

#[derive(Clone)]
pub struct ControllerContext {
    pub config: Arc<ControllerConfig>,
    pub topology: Arc<RwLock<TopologyStore>>,
    pub groups: Arc<RwLock<GroupStore>>,
    pub connections: Arc<RwLock<BTreeSet<String>>>,
    pub driver: Arc<dyn DeviceDriver>,
    pub registry: Arc<ManagerRegistry>,
    bus: Weak<EventBus<ControlEvent>>,
}

impl ControllerContext {
    pub fn new(config: ControllerConfig, driver: Arc<dyn DeviceDriver>, bus: &Arc<EventBus<ControlEvent>>) -> Self {
        Self {
            config: Arc::new(config),
            topology: Arc::new(RwLock::new(TopologyStore::new())),
            groups: Arc::new(RwLock::new(GroupStore::new())),
            connections: Arc::new(RwLock::new(BTreeSet::new())),
            driver,
            registry: Arc::new(ManagerRegistry::new()),
            bus: Arc::downgrade(bus),
        }
    }

    /// Publishes `event` on the bus. Returns false if nothing handled it.
    pub fn trigger(&self, event: ControlEvent) -> bool {
        match self.bus.upgrade() {
            Some(bus) => bus.trigger(&event),
            None => false,
        }
    }

    /// Creates a table manager owning `tables` and registers it.
    pub fn table_manager(&self, name: &str, tables: &[&str]) -> Arc<Mutex<TableEntryManager>> {
        let mut manager = TableEntryManager::new(name, Arc::clone(&self.driver));
        for table in tables {
            manager.init_table(table);
        }
        self.registry.register(manager)
    }

    pub fn mark_connected(&self, switch: &str) -> bool {
        self.connections.write().insert(switch.to_string())
    }

    pub fn is_connected(&self, switch: &str) -> bool {
        self.connections.read().contains(switch)
    }

    /// Connected switches in name order.
    pub fn connected_switches(&self) -> Vec<String> {
        self.connections.read().iter().cloned().collect()
    }

    /// Decides whether `target` should recompute for `change`.
    ///
    /// Port updates are skipped for controllers not listed under `update`;
    /// the others wait for the settle delay before returning true.
    pub fn should_recompute(&self, target: UpdateTarget, change: &TopologyChange) -> bool {
        if !change.port_update {
            return true;
        }
        if !self.config.updates(target) {
            debug!("Ignoring port update for {:?}", target);
            return false;
        }
        let delay = self.config.settle_delay();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        true
    }
}

/// Outcome of [`sync_switch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
}

impl SyncStats {
    pub fn is_empty(&self) -> bool {
        self.created == 0 && self.updated == 0 && self.removed == 0
    }
}

/// Installs `desired` for `switch` in `table`, then deletes every entry of
/// that switch whose match fields are not part of `desired`.
pub fn sync_switch(
    manager: &mut TableEntryManager,
    table: &str,
    switch: &str,
    desired: &[TableEntry],
) -> ReconcileResult<SyncStats> {
    let mut stats = SyncStats::default();
    for entry in desired {
        match manager.handle_table_entry(table, entry)? {
            EntryChange::Created => stats.created += 1,
            EntryChange::Updated => stats.updated += 1,
            EntryChange::Unchanged => {}
        }
    }

    let valid: Vec<MatchFields> = desired.iter().map(|e| e.match_fields.clone()).collect();
    stats.removed = manager.reconcile_switch(table, switch, &valid)?;

    if !stats.is_empty() {
        info!(
            "[{}] {} on {}: {} created, {} updated, {} removed",
            manager.name(),
            table,
            switch,
            stats.created,
            stats.updated,
            stats.removed
        );
    }
    Ok(stats)
}

/// Collects per-switch failures of one recompute cycle.
#[derive(Debug, Default)]
pub struct Failures {
    errors: Vec<(String, anyhow::Error)>,
}

impl Failures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, switch: &str, error: impl Into<anyhow::Error>) {
        let error = error.into();
        error!("{}: {:#}", switch, error);
        self.errors.push((switch.to_string(), error));
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Ok if nothing failed, otherwise one error naming every failed switch.
    pub fn into_result(self, what: &str) -> anyhow::Result<()> {
        if self.errors.is_empty() {
            return Ok(());
        }
        let switches: Vec<&str> = self.errors.iter().map(|(s, _)| s.as_str()).collect();
        Err(anyhow::anyhow!("{} failed on {}", what, switches.join(", ")))
    }
}
