//! MacController - rewrites L2 addresses towards the neighbour on each port.

use std::sync::Arc;

use bier_driver::{MatchValue, TableEntry, Value};
use bier_orch_common::{Controller, TableEntryManager};
use log::{debug, warn};
use parking_lot::Mutex;

use crate::context::{sync_switch, ControllerContext, Failures};
use crate::error::{ControllerResult, TopologyResult};
use crate::events::{ControlEvent, TOPOLOGY_CHANGE};
use crate::topology::TopologyStore;

pub const ADJUST_MAC_TABLE: &str = "egress.mac_c.adjust_mac";

/// One rewrite rule per known neighbour of `switch`, keyed by egress port.
pub fn mac_entries(topology: &TopologyStore, switch: &str) -> TopologyResult<Vec<TableEntry>> {
    let device = topology.device(switch)?;
    let mut entries = Vec::new();
    for (neighbor, &port) in device.ports() {
        let Ok(neighbor) = topology.device(neighbor) else {
            debug!("{}: neighbour {} on port {} not registered", switch, neighbor, port);
            continue;
        };
        entries.push(
            TableEntry::new(switch, "egress.mac_c.set_mac")
                .with_match("standard_metadata.egress_port", MatchValue::exact(port))
                .with_param("srcAddr", Value::Mac(device.mac.clone()))
                .with_param("dstAddr", Value::Mac(neighbor.mac.clone())),
        );
    }
    Ok(entries)
}

pub struct MacController {
    ctx: ControllerContext,
    manager: Arc<Mutex<TableEntryManager>>,
}

impl MacController {
    pub const NAME: &'static str = "MacController";

    pub fn new(ctx: ControllerContext) -> Self {
        let manager = ctx.table_manager(Self::NAME, &[ADJUST_MAC_TABLE]);
        Self { ctx, manager }
    }

    fn update_switch(&self, switch: &str) -> ControllerResult<()> {
        let desired = {
            let topology = self.ctx.topology.read();
            mac_entries(&topology, switch)?
        };
        sync_switch(&mut self.manager.lock(), ADJUST_MAC_TABLE, switch, &desired)?;
        Ok(())
    }

    pub fn update_all(&self) -> anyhow::Result<()> {
        let mut failures = Failures::new();
        for switch in self.ctx.connected_switches() {
            if let Err(e) = self.update_switch(&switch) {
                failures.record(&switch, e);
            }
        }
        failures.into_result("MAC update")
    }
}

impl Controller<ControlEvent> for MacController {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn subscriptions(&self) -> &'static [&'static str] {
        &[TOPOLOGY_CHANGE]
    }

    fn handle(&self, event: &ControlEvent) -> anyhow::Result<()> {
        match event {
            ControlEvent::TopologyChange(_) => self.update_all(),
            other => {
                warn!("{} got unexpected {:?}", Self::NAME, other);
                Ok(())
            }
        }
    }
}
