//! BierController - installs `ingress.bier_c.bift` on connected switches.

use std::sync::Arc;

use bier_orch_common::{Controller, TableEntryManager};
use log::{info, warn};
use parking_lot::Mutex;

use super::rules::{bift_entries, BIFT_TABLE};
use crate::config::UpdateTarget;
use crate::context::{sync_switch, ControllerContext, Failures, SyncStats};
use crate::error::ControllerResult;
use crate::events::{ControlEvent, TopologyChange, TOPOLOGY_CHANGE};

pub struct BierController {
    ctx: ControllerContext,
    manager: Arc<Mutex<TableEntryManager>>,
}

impl BierController {
    pub const NAME: &'static str = "BierController";

    pub fn new(ctx: ControllerContext) -> Self {
        let manager = ctx.table_manager(Self::NAME, &[BIFT_TABLE]);
        Self { ctx, manager }
    }

    /// Recomputes and converges the BIFT table of `switch`.
    pub fn update_switch(&self, switch: &str) -> ControllerResult<SyncStats> {
        let entries = {
            let topology = self.ctx.topology.read();
            bift_entries(&topology, switch, self.ctx.config.protection)?
        };
        let mut manager = self.manager.lock();
        Ok(sync_switch(&mut manager, BIFT_TABLE, switch, &entries)?)
    }

    /// Recomputes every connected switch.
    pub fn update_all(&self) -> anyhow::Result<()> {
        let mut failures = Failures::new();
        for switch in self.ctx.connected_switches() {
            if let Err(e) = self.update_switch(&switch) {
                failures.record(&switch, e);
            }
        }
        if failures.is_empty() {
            info!("Updated BIER entries");
        }
        failures.into_result("BIER update")
    }

    fn on_topology_change(&self, change: &TopologyChange) -> anyhow::Result<()> {
        if !self.ctx.should_recompute(UpdateTarget::Bier, change) {
            return Ok(());
        }
        self.update_all()
    }
}

impl Controller<ControlEvent> for BierController {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn subscriptions(&self) -> &'static [&'static str] {
        &[TOPOLOGY_CHANGE]
    }

    fn handle(&self, event: &ControlEvent) -> anyhow::Result<()> {
        match event {
            ControlEvent::TopologyChange(change) => self.on_topology_change(change),
            other => {
                warn!("{} got unexpected {:?}", Self::NAME, other);
                Ok(())
            }
        }
    }
}
