//! PortController - keeps the live-port bitmask of each switch current.
//!
//! The bitmask is the OR of the bits of every port in the switch's adjacency
//! whose last reported status is up. Ports never reported are up.

use std::collections::HashMap;
use std::sync::Arc;

use bier_driver::{BitString, TableEntry};
use bier_orch_common::{Controller, TableEntryManager};
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};

use crate::bier::id_to_bit;
use crate::context::{sync_switch, ControllerContext, Failures};
use crate::error::{ControllerResult, TopologyResult};
use crate::events::{ControlEvent, PortMessage, PORT_MESSAGE, TOPOLOGY_CHANGE};
use crate::topology::TopologyStore;

pub const PORT_STATUS_TABLE: &str = "ingress.port_c.port_status";

/// Live-port bitmask of `switch`. `is_up` reports the status of one port.
pub fn live_ports(topology: &TopologyStore, switch: &str, is_up: impl Fn(u32) -> bool) -> TopologyResult<BitString> {
    Ok(topology
        .device(switch)?
        .ports()
        .values()
        .copied()
        .filter(|&port| is_up(port))
        .map(id_to_bit)
        .collect())
}

pub struct PortController {
    ctx: ControllerContext,
    manager: Arc<Mutex<TableEntryManager>>,
    status: RwLock<HashMap<(String, u32), bool>>,
}

impl PortController {
    pub const NAME: &'static str = "PortController";

    pub fn new(ctx: ControllerContext) -> Self {
        let manager = ctx.table_manager(Self::NAME, &[PORT_STATUS_TABLE]);
        Self {
            ctx,
            manager,
            status: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_up(&self, switch: &str, port: u32) -> bool {
        self.status
            .read()
            .get(&(switch.to_string(), port))
            .copied()
            .unwrap_or(true)
    }

    fn record(&self, message: &PortMessage) {
        debug!(
            "Port {} on {} reported {}",
            message.port,
            message.switch,
            if message.up { "up" } else { "down" }
        );
        self.status
            .write()
            .insert((message.switch.clone(), message.port), message.up);
    }

    fn update_switch(&self, switch: &str) -> ControllerResult<()> {
        let mask = {
            let topology = self.ctx.topology.read();
            live_ports(&topology, switch, |port| self.is_up(switch, port))?
        };
        let entry = TableEntry::new(switch, "ingress.port_c.set_port_status").with_param("livePorts", mask);
        sync_switch(&mut self.manager.lock(), PORT_STATUS_TABLE, switch, &[entry])?;
        Ok(())
    }

    pub fn update_all(&self) -> anyhow::Result<()> {
        let mut failures = Failures::new();
        for switch in self.ctx.connected_switches() {
            if let Err(e) = self.update_switch(&switch) {
                failures.record(&switch, e);
            }
        }
        failures.into_result("port status update")
    }
}

impl Controller<ControlEvent> for PortController {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn subscriptions(&self) -> &'static [&'static str] {
        &[PORT_MESSAGE, TOPOLOGY_CHANGE]
    }

    fn handle(&self, event: &ControlEvent) -> anyhow::Result<()> {
        match event {
            ControlEvent::PortMessage(message) => {
                self.record(message);
                Ok(())
            }
            ControlEvent::TopologyChange(_) => self.update_all(),
            other => {
                warn!("{} got unexpected {:?}", Self::NAME, other);
                Ok(())
            }
        }
    }
}
