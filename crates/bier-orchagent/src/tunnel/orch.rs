//! TunnelController - BIER and IPv4 encapsulation boundaries.
//!
//! Installs the per-domain BIER decap rules, the IPv4 decap rule for a
//! switch's own address once it connects, and the egress BIER encap rules of
//! ingress switches.

use std::sync::Arc;

use bier_driver::{MatchValue, TableEntry};
use bier_orch_common::{Controller, TableEntryManager};
use log::{debug, warn};
use parking_lot::Mutex;

use crate::bier::{compute_bier_header, id_to_bit};
use crate::context::{sync_switch, ControllerContext, Failures};
use crate::error::{ControllerResult, TopologyResult};
use crate::events::{ControlEvent, GROUP_UPDATE, SWITCH_CONNECTED, TOPOLOGY_CHANGE};
use crate::group::GroupStore;
use crate::topology::{Device, TopologyStore, DEFAULT_DOMAIN};

pub const DECAP_BIER_TABLE: &str = "ingress.tunnel_c.decap_bier";
pub const DECAP_IPV4_TABLE: &str = "ingress.tunnel_c.decap_ipv4";
pub const ENCAP_TABLE: &str = "egress.tunnel_c.encap_ipv4";

pub const ETHER_TYPE_BIER: u64 = 0xBB00;

/// One decap rule per domain `switch` has a bfr-id in.
pub fn bier_decap_entries(topology: &TopologyStore, switch: &str) -> TopologyResult<Vec<TableEntry>> {
    let device = topology.device(switch)?;
    Ok(device
        .domains()
        .iter()
        .filter_map(|&domain| {
            let bit = id_to_bit(device.bfr_id(domain)?);
            Some(
                TableEntry::new(switch, "ingress.tunnel_c.bier_decap")
                    .with_match("hdr.bier[0].BitString", MatchValue::ternary(bit.clone(), bit.clone()))
                    .with_match("hdr.bier[0].Domain", MatchValue::exact(u64::from(domain)))
                    .with_param("decapBit", bit)
                    .with_priority(1),
            )
        })
        .collect())
}

pub fn ipv4_decap_entry(device: &Device) -> TableEntry {
    TableEntry::new(&device.name, "ingress.tunnel_c.ipv4_decap")
        .with_match("hdr.ipv4.dstAddr", MatchValue::exact(device.ip))
}

/// Egress BIER encap entries of an ingress switch, one per active group.
pub fn encap_entries(topology: &TopologyStore, groups: &GroupStore, switch: &str) -> Vec<TableEntry> {
    groups
        .active_addresses()
        .into_iter()
        .map(|group| {
            TableEntry::new(switch, "egress.tunnel_c.add_bier")
                .with_match("hdr.ipv4.dstAddr", MatchValue::exact(group))
                .with_param("bs", compute_bier_header(topology, groups, group, DEFAULT_DOMAIN))
                .with_param("etherType", ETHER_TYPE_BIER)
                .with_param("domain", u64::from(DEFAULT_DOMAIN))
        })
        .collect()
}

pub struct TunnelController {
    ctx: ControllerContext,
    manager: Arc<Mutex<TableEntryManager>>,
}

impl TunnelController {
    pub const NAME: &'static str = "TunnelController";

    pub fn new(ctx: ControllerContext) -> Self {
        let manager = ctx.table_manager(Self::NAME, &[DECAP_BIER_TABLE, DECAP_IPV4_TABLE, ENCAP_TABLE]);
        Self { ctx, manager }
    }

    fn add_ipv4_decap_rule(&self, switch: &str) -> anyhow::Result<()> {
        let entry = {
            let topology = self.ctx.topology.read();
            ipv4_decap_entry(topology.device(switch)?)
        };
        if self.manager.lock().handle_table_entry(DECAP_IPV4_TABLE, &entry)?.is_changed() {
            debug!("IPv4 decap rule installed for {}", switch);
        }
        Ok(())
    }

    fn update_bier_decap(&self, switch: &str) -> ControllerResult<()> {
        let desired = {
            let topology = self.ctx.topology.read();
            bier_decap_entries(&topology, switch)?
        };
        sync_switch(&mut self.manager.lock(), DECAP_BIER_TABLE, switch, &desired)?;
        Ok(())
    }

    /// Converges the BIER decap rules of every connected switch.
    pub fn update_bier_decap_rules(&self) -> anyhow::Result<()> {
        let mut failures = Failures::new();
        for switch in self.ctx.connected_switches() {
            if !self.ctx.config.is_switch(&switch) {
                continue;
            }
            if let Err(e) = self.update_bier_decap(&switch) {
                failures.record(&switch, e);
            }
        }
        failures.into_result("BIER decap update")
    }

    /// Converges the encap table of every connected ingress switch.
    pub fn update_encap_rules(&self) -> anyhow::Result<()> {
        let mut failures = Failures::new();
        for switch in self.ctx.config.ingress_switches() {
            if !self.ctx.is_connected(&switch.name) {
                continue;
            }
            let desired = {
                let topology = self.ctx.topology.read();
                let groups = self.ctx.groups.read();
                encap_entries(&topology, &groups, &switch.name)
            };
            if let Err(e) = sync_switch(&mut self.manager.lock(), ENCAP_TABLE, &switch.name, &desired) {
                failures.record(&switch.name, e);
            }
        }
        failures.into_result("tunnel encap update")
    }
}

impl Controller<ControlEvent> for TunnelController {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn subscriptions(&self) -> &'static [&'static str] {
        &[SWITCH_CONNECTED, TOPOLOGY_CHANGE, GROUP_UPDATE]
    }

    fn handle(&self, event: &ControlEvent) -> anyhow::Result<()> {
        match event {
            ControlEvent::SwitchConnected { name } => self.add_ipv4_decap_rule(name),
            ControlEvent::TopologyChange(_) => self.update_bier_decap_rules(),
            ControlEvent::GroupUpdate => self.update_encap_rules(),
            other => {
                warn!("{} got unexpected {:?}", Self::NAME, other);
                Ok(())
            }
        }
    }
}
