//! Multicast group membership.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use indexmap::IndexSet;

use crate::topology::{TopologyStore, DEFAULT_DOMAIN};

/// switch -> multicast address -> subscribed sources.
///
/// Addresses stay in the map after their last member leaves, which is what
/// [`all_addresses`](Self::all_addresses) reports on.
#[derive(Debug, Default)]
pub struct GroupStore {
    groups: BTreeMap<String, BTreeMap<Ipv4Addr, IndexSet<Ipv4Addr>>>,
}

impl GroupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `member` to `group` on `switch`. Returns false if it was already a member.
    pub fn join(&mut self, switch: &str, group: Ipv4Addr, member: Ipv4Addr) -> bool {
        self.groups
            .entry(switch.to_string())
            .or_default()
            .entry(group)
            .or_default()
            .insert(member)
    }

    /// Removes `member` from `group` on `switch`. Returns false if it was not a member.
    pub fn leave(&mut self, switch: &str, group: Ipv4Addr, member: Ipv4Addr) -> bool {
        self.groups
            .get_mut(switch)
            .and_then(|groups| groups.get_mut(&group))
            .map(|members| members.shift_remove(&member))
            .unwrap_or(false)
    }

    pub fn members(&self, switch: &str, group: Ipv4Addr) -> Vec<Ipv4Addr> {
        self.groups
            .get(switch)
            .and_then(|groups| groups.get(&group))
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Switches with at least one member in `group`.
    pub fn switches_for_address(&self, group: Ipv4Addr) -> Vec<String> {
        self.groups
            .iter()
            .filter(|(_, groups)| groups.get(&group).is_some_and(|m| !m.is_empty()))
            .map(|(switch, _)| switch.clone())
            .collect()
    }

    /// Addresses with at least one member anywhere.
    pub fn active_addresses(&self) -> BTreeSet<Ipv4Addr> {
        self.groups
            .values()
            .flat_map(|groups| groups.iter())
            .filter(|(_, members)| !members.is_empty())
            .map(|(group, _)| *group)
            .collect()
    }

    /// Every address ever joined, including those without members now.
    pub fn all_addresses(&self) -> BTreeSet<Ipv4Addr> {
        self.groups.values().flat_map(|groups| groups.keys().copied()).collect()
    }

    /// Addresses with members on `switch`.
    pub fn addresses_for_switch(&self, switch: &str) -> Vec<Ipv4Addr> {
        self.groups
            .get(switch)
            .map(|groups| {
                groups
                    .iter()
                    .filter(|(_, members)| !members.is_empty())
                    .map(|(group, _)| *group)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Domains of the switches subscribed to `group`. Always contains domain 0.
    pub fn domains_for_address(&self, group: Ipv4Addr, topology: &TopologyStore) -> BTreeSet<u32> {
        let mut domains = BTreeSet::from([DEFAULT_DOMAIN]);
        for switch in self.switches_for_address(group) {
            if let Ok(ids) = topology.domains_for_device(&switch) {
                domains.extend(ids.iter().copied());
            }
        }
        domains
    }

    /// One line per active address, for logging.
    pub fn summary(&self, topology: &TopologyStore) -> Vec<String> {
        self.active_addresses()
            .into_iter()
            .map(|group| {
                format!(
                    "{}: switches {:?}, domains {:?}",
                    group,
                    self.switches_for_address(group),
                    self.domains_for_address(group, topology)
                )
            })
            .collect()
    }
}
