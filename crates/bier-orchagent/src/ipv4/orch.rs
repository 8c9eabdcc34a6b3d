//! Ipv4Controller - shortest-path unicast rules and BIER encap rules.
//!
//! - `ingress.ipv4_c.ipv4`: one /32 rule per destination reachable in domain
//!   0, guarded by the egress port status, plus a decap rule for the switch's
//!   own address. Static rules from the switch's rule file are merged in and
//!   take precedence over computed rules with the same key.
//! - `ingress.ipv4_c.encap_ipv4`: on ingress switches, one rule per active
//!   multicast group that pushes the group's BIER header.

use std::collections::BTreeMap;
use std::sync::Arc;

use bier_driver::{MatchValue, TableEntry};
use bier_orch_common::{Controller, TableEntryManager};
use log::{debug, info, warn};
use parking_lot::Mutex;

use super::static_rules::StaticRuleFile;
use crate::bier::{compute_bier_header, id_to_bit};
use crate::config::UpdateTarget;
use crate::context::{sync_switch, ControllerContext, Failures};
use crate::error::{ControllerResult, TopologyResult};
use crate::events::{ControlEvent, TopologyChange, GROUP_UPDATE, TOPOLOGY_CHANGE};
use crate::group::GroupStore;
use crate::topology::{TopologyStore, DEFAULT_DOMAIN};

pub const IPV4_TABLE: &str = "ingress.ipv4_c.ipv4";
pub const ENCAP_TABLE: &str = "ingress.ipv4_c.encap_ipv4";

const DST_ADDR: &str = "hdr.ipv4.dstAddr";
const PORT_STATUS: &str = "meta.ports.status";

/// Forwarding and decap entries of `switch` along the domain 0 shortest paths.
pub fn forward_entries(topology: &TopologyStore, switch: &str) -> TopologyResult<Vec<TableEntry>> {
    let device = topology.device(switch)?;
    let graph = topology.graph(DEFAULT_DOMAIN)?;
    let mut entries = Vec::new();

    if let Some(paths) = graph.shortest_paths_from(switch) {
        for (dest, path) in paths {
            let Some(next_hop) = path.get(1) else {
                continue;
            };
            let dest = topology.device(dest)?;
            let port = device.port_to(next_hop)?;
            let port_bit = id_to_bit(port);
            entries.push(
                TableEntry::new(switch, "ingress.ipv4_c.forward")
                    .with_match(DST_ADDR, MatchValue::lpm(dest.ip, 32))
                    .with_match(PORT_STATUS, MatchValue::ternary(port_bit.clone(), port_bit))
                    .with_param("port", port)
                    .with_priority(1),
            );
        }
    }

    entries.push(
        TableEntry::new(switch, "ingress.ipv4_c.decap")
            .with_match(DST_ADDR, MatchValue::lpm(device.ip, 32))
            .with_priority(1),
    );
    Ok(entries)
}

/// BIER encap entries of an ingress switch, one per active group.
///
/// The header is computed in domain 0.
pub fn encap_entries(topology: &TopologyStore, groups: &GroupStore, switch: &str) -> Vec<TableEntry> {
    groups
        .active_addresses()
        .into_iter()
        .map(|group| {
            TableEntry::new(switch, "ingress.ipv4_c.add_bier")
                .with_match(DST_ADDR, MatchValue::exact(group))
                .with_param("bs", compute_bier_header(topology, groups, group, DEFAULT_DOMAIN))
        })
        .collect()
}

/// Replaces entries of `base` that share a key with one of `overrides`, and
/// appends the rest.
fn merge(mut base: Vec<TableEntry>, overrides: Vec<TableEntry>) -> Vec<TableEntry> {
    for entry in overrides {
        match base.iter_mut().find(|e| e.same_key(&entry)) {
            Some(slot) => *slot = entry,
            None => base.push(entry),
        }
    }
    base
}

pub struct Ipv4Controller {
    ctx: ControllerContext,
    manager: Arc<Mutex<TableEntryManager>>,
}

impl Ipv4Controller {
    pub const NAME: &'static str = "IPv4Controller";

    pub fn new(ctx: ControllerContext) -> Self {
        let manager = ctx.table_manager(Self::NAME, &[IPV4_TABLE, ENCAP_TABLE]);
        Self { ctx, manager }
    }

    /// Static rules of every configured switch, keyed by the switch they target.
    ///
    /// A file that fails to load is logged and skipped.
    fn static_entries(&self) -> BTreeMap<String, Vec<TableEntry>> {
        let mut by_switch: BTreeMap<String, Vec<TableEntry>> = BTreeMap::new();
        if !self.ctx.config.static_rules {
            return by_switch;
        }

        for switch in &self.ctx.config.switches {
            let Some(path) = &switch.static_rules else {
                continue;
            };
            let loaded = StaticRuleFile::load(path)
                .and_then(|file| file.validate(self.ctx.config.bitstring_length).map(|_| file));
            match loaded {
                Ok(file) => {
                    for entry in file.entries_for_table(IPV4_TABLE) {
                        by_switch.entry(entry.switch.clone()).or_default().push(entry);
                    }
                    debug!("Loaded static rules of {} from {}", switch.name, path.display());
                }
                Err(e) => warn!("Static rules of {} not loaded: {}", switch.name, e),
            }
        }
        by_switch
    }

    /// Recomputes and converges the unicast table of every connected switch.
    pub fn update_ipv4_rules(&self) -> anyhow::Result<()> {
        let mut static_entries = self.static_entries();
        let mut failures = Failures::new();

        for switch in self.ctx.connected_switches() {
            let extra = static_entries.remove(&switch).unwrap_or_default();
            if let Err(e) = self.update_switch(&switch, extra) {
                failures.record(&switch, e);
            }
        }
        for switch in static_entries.keys() {
            debug!("Static rules for {} held back until it connects", switch);
        }

        if failures.is_empty() {
            info!("IPv4 rules updated");
        }
        failures.into_result("IPv4 update")
    }

    fn update_switch(&self, switch: &str, static_entries: Vec<TableEntry>) -> ControllerResult<()> {
        let computed = {
            let topology = self.ctx.topology.read();
            forward_entries(&topology, switch)?
        };
        let desired = merge(computed, static_entries);
        sync_switch(&mut self.manager.lock(), IPV4_TABLE, switch, &desired)?;
        Ok(())
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
        failures.into_result("IPv4 encap update")
    }

    fn on_topology_change(&self, change: &TopologyChange) -> anyhow::Result<()> {
        if !self.ctx.should_recompute(UpdateTarget::Ipv4, change) {
            return Ok(());
        }
        self.update_ipv4_rules()
    }
}

impl Controller<ControlEvent> for Ipv4Controller {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn subscriptions(&self) -> &'static [&'static str] {
        &[TOPOLOGY_CHANGE, GROUP_UPDATE]
    }

    fn handle(&self, event: &ControlEvent) -> anyhow::Result<()> {
        match event {
            ControlEvent::TopologyChange(change) => self.on_topology_change(change),
            ControlEvent::GroupUpdate => self.update_encap_rules(),
            other => {
                warn!("{} got unexpected {:?}", Self::NAME, other);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::Device;
    use bier_driver::{BitString, Value};
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;

    fn ip(n: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, n, 0)
    }

    /// h1 -(1) s1 (2)-(1) s2
    fn topology() -> TopologyStore {
        let mut t = TopologyStore::new();
        t.add_device(Device::switch("s1", ip(1), "00:01", 1)).unwrap();
        t.add_device(Device::switch("s2", ip(2), "00:02", 2)).unwrap();
        t.add_device(Device::host("h1", Ipv4Addr::new(10, 0, 1, 1), "01:01")).unwrap();
        for (a, b, port) in [("s1", "h1", 1), ("h1", "s1", 1), ("s1", "s2", 2), ("s2", "s1", 1)] {
            t.device_mut(a).unwrap().add_device_to_port(b, port);
        }
        t.build_all_domains();
        t
    }

    fn dst(entry: &TableEntry) -> &MatchValue {
        &entry.match_fields[DST_ADDR]
    }

    #[test]
    fn test_forward_entries() {
        let t = topology();
        let entries = forward_entries(&t, "s2").unwrap();

        let dsts: Vec<&MatchValue> = entries.iter().map(dst).collect();
        assert_eq!(
            dsts,
            vec![
                &MatchValue::lpm(ip(1), 32),
                &MatchValue::lpm(Ipv4Addr::new(10, 0, 1, 1), 32),
                &MatchValue::lpm(ip(2), 32),
            ]
        );
        assert!(entries[..2].iter().all(|e| e.action_params["port"] == Value::Int(1)));
        assert_eq!(
            entries[0].match_fields[PORT_STATUS],
            MatchValue::ternary(BitString::from_u64(1), BitString::from_u64(1))
        );
        assert_eq!(entries[2].action_name, "ingress.ipv4_c.decap");
        assert!(entries[2].action_params.is_empty());
    }

    #[test]
    fn test_forward_entries_unknown_switch() {
        let t = topology();
        assert!(forward_entries(&t, "s9").is_err());
    }

    #[test]
    fn test_encap_entries() {
        let t = topology();
        let mut groups = GroupStore::new();
        let g1 = Ipv4Addr::new(224, 1, 1, 1);
        let g2 = Ipv4Addr::new(224, 2, 2, 2);
        groups.join("s2", g1, Ipv4Addr::new(10, 0, 2, 1));
        groups.join("s1", g2, Ipv4Addr::new(10, 0, 1, 1));
        groups.join("s2", g2, Ipv4Addr::new(10, 0, 2, 1));

        let entries = encap_entries(&t, &groups, "s1");
        assert_eq!(entries.len(), 2);
        assert_eq!(*dst(&entries[0]), MatchValue::exact(g1));
        assert_eq!(entries[0].action_params["bs"], Value::Bits(BitString::from_u64(2)));
        assert_eq!(entries[1].action_params["bs"], Value::Bits(BitString::from_u64(3)));
        assert_eq!(entries[0].priority, None);
    }

    #[test]
    fn test_static_rules_override_computed() {
        let t = topology();
        let computed = forward_entries(&t, "s2").unwrap();
        let overriding = computed[0].clone().with_param("port", 7u32);
        let extra = TableEntry::new("s2", "ingress.ipv4_c.forward")
            .with_match(DST_ADDR, MatchValue::lpm(Ipv4Addr::new(10, 0, 9, 0), 24))
            .with_param("port", 3u32);

        let merged = merge(computed.clone(), vec![overriding.clone(), extra.clone()]);
        assert_eq!(merged.len(), computed.len() + 1);
        assert_eq!(merged[0], overriding);
        assert_eq!(merged.last(), Some(&extra));
    }
}
