//! Device registry and per-domain graphs.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::Ipv4Addr;

use indexmap::IndexMap;
use log::debug;

use super::graph::DomainGraph;
use crate::error::{TopologyError, TopologyResult};

/// The default domain every device belongs to.
pub const DEFAULT_DOMAIN: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Host,
    Switch,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Host => write!(f, "Host"),
            DeviceKind::Switch => write!(f, "Switch"),
        }
    }
}

/// A host or switch and its neighbour -> port adjacency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub name: String,
    pub ip: Ipv4Addr,
    pub mac: String,
    pub kind: DeviceKind,
    ports: IndexMap<String, u32>,
    bfr_ids: BTreeMap<u32, u32>,
    domains: BTreeSet<u32>,
}

impl Device {
    /// A switch with `bfr_id` in domain 0.
    pub fn switch(name: impl Into<String>, ip: Ipv4Addr, mac: impl Into<String>, bfr_id: u32) -> Self {
        Self {
            name: name.into(),
            ip,
            mac: mac.into(),
            kind: DeviceKind::Switch,
            ports: IndexMap::new(),
            bfr_ids: BTreeMap::from([(DEFAULT_DOMAIN, bfr_id)]),
            domains: BTreeSet::from([DEFAULT_DOMAIN]),
        }
    }

    pub fn host(name: impl Into<String>, ip: Ipv4Addr, mac: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ip,
            mac: mac.into(),
            kind: DeviceKind::Host,
            ports: IndexMap::new(),
            bfr_ids: BTreeMap::new(),
            domains: BTreeSet::from([DEFAULT_DOMAIN]),
        }
    }

    /// Adds membership of `domain` with the given bfr-id.
    pub fn with_domain(mut self, domain: u32, bfr_id: u32) -> Self {
        self.bfr_ids.insert(domain, bfr_id);
        self.domains.insert(domain);
        self
    }

    pub fn is_host(&self) -> bool {
        self.kind == DeviceKind::Host
    }

    pub fn is_switch(&self) -> bool {
        self.kind == DeviceKind::Switch
    }

    pub fn bfr_id(&self, domain: u32) -> Option<u32> {
        self.bfr_ids.get(&domain).copied()
    }

    pub fn bfr_ids(&self) -> &BTreeMap<u32, u32> {
        &self.bfr_ids
    }

    pub fn domains(&self) -> &BTreeSet<u32> {
        &self.domains
    }

    pub fn in_domain(&self, domain: u32) -> bool {
        self.domains.contains(&domain)
    }

    /// Neighbour -> port, in learning order.
    pub fn ports(&self) -> &IndexMap<String, u32> {
        &self.ports
    }

    pub fn port_to(&self, neighbor: &str) -> TopologyResult<u32> {
        self.ports
            .get(neighbor)
            .copied()
            .ok_or_else(|| TopologyError::port_not_found(&self.name, neighbor))
    }

    pub fn neighbor_on_port(&self, port: u32) -> Option<&str> {
        self.ports
            .iter()
            .find(|(_, p)| **p == port)
            .map(|(n, _)| n.as_str())
    }

    /// Records that `neighbor` is reachable through `port`. Returns true if
    /// this changed the adjacency.
    pub fn add_device_to_port(&mut self, neighbor: &str, port: u32) -> bool {
        if self.ports.get(neighbor) == Some(&port) {
            return false;
        }
        self.ports.insert(neighbor.to_string(), port);
        true
    }

    /// Forgets the neighbour on `port` and returns it.
    pub fn remove_port(&mut self, port: u32) -> Option<String> {
        let neighbor = self.neighbor_on_port(port)?.to_string();
        self.ports.shift_remove(&neighbor);
        Some(neighbor)
    }
}

/// A routing domain and its graph.
#[derive(Debug)]
pub struct Domain {
    pub id: u32,
    pub graph: DomainGraph,
    pub tunnel_node: Option<String>,
}

/// A link taken down by a port event, kept so it can be restored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedLink {
    pub switch: String,
    pub port: u32,
    pub neighbor: String,
    pub neighbor_port: Option<u32>,
}

/// Authoritative registry of devices and domains.
#[derive(Debug, Default)]
pub struct TopologyStore {
    devices: IndexMap<String, Device>,
    domains: BTreeMap<u32, Domain>,
    removed_links: BTreeMap<(String, u32), RemovedLink>,
}

impl TopologyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exists_device(&self, name: &str) -> bool {
        self.devices.contains_key(name)
    }

    /// Registers `device`. Returns false if a device with that name exists.
    ///
    /// Fails if one of its bfr-ids is already taken in that domain.
    pub fn add_device(&mut self, device: Device) -> TopologyResult<bool> {
        if self.exists_device(&device.name) {
            return Ok(false);
        }
        for (domain, bfr_id) in device.bfr_ids() {
            self.check_bfr_id(*domain, *bfr_id, &device.name)?;
        }
        debug!("Add {} {} ({})", device.kind, device.name, device.ip);
        self.devices.insert(device.name.clone(), device);
        Ok(true)
    }

    pub fn device(&self, name: &str) -> TopologyResult<&Device> {
        self.devices
            .get(name)
            .ok_or_else(|| TopologyError::DeviceNotFound(name.to_string()))
    }

    pub fn device_mut(&mut self, name: &str) -> TopologyResult<&mut Device> {
        self.devices
            .get_mut(name)
            .ok_or_else(|| TopologyError::DeviceNotFound(name.to_string()))
    }

    pub fn device_by_ip(&self, ip: Ipv4Addr) -> TopologyResult<&Device> {
        self.devices
            .values()
            .find(|d| d.ip == ip)
            .ok_or_else(|| TopologyError::DeviceNotFound(ip.to_string()))
    }

    pub fn device_by_bfr_id(&self, domain: u32, bfr_id: u32) -> TopologyResult<&Device> {
        self.devices
            .values()
            .find(|d| d.bfr_id(domain) == Some(bfr_id))
            .ok_or(TopologyError::BfrIdNotFound { domain, bfr_id })
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn domains_for_device(&self, name: &str) -> TopologyResult<&BTreeSet<u32>> {
        Ok(self.device(name)?.domains())
    }

    /// Adds `name` to `domain`, optionally assigning its bfr-id there.
    pub fn add_device_to_domain(&mut self, name: &str, domain: u32, bfr_id: Option<u32>) -> TopologyResult<()> {
        if let Some(id) = bfr_id {
            self.check_bfr_id(domain, id, name)?;
        }
        let device = self.device_mut(name)?;
        device.domains.insert(domain);
        if let Some(id) = bfr_id {
            device.bfr_ids.insert(domain, id);
        }
        Ok(())
    }

    pub fn domain(&self, id: u32) -> TopologyResult<&Domain> {
        self.domains.get(&id).ok_or(TopologyError::DomainNotFound(id))
    }

    pub fn domains(&self) -> impl Iterator<Item = &Domain> {
        self.domains.values()
    }

    pub fn graph(&self, domain: u32) -> TopologyResult<&DomainGraph> {
        Ok(&self.domain(domain)?.graph)
    }

    pub fn tunnel_node(&self, domain: u32) -> TopologyResult<Option<&str>> {
        Ok(self.domain(domain)?.tunnel_node.as_deref())
    }

    pub fn set_tunnel_node(&mut self, domain: u32, node: Option<String>) -> TopologyResult<()> {
        self.domains
            .get_mut(&domain)
            .ok_or(TopologyError::DomainNotFound(domain))?
            .tunnel_node = node;
        Ok(())
    }

    /// Next device on the shortest path from `start` to `dest` inside `domain`.
    pub fn next_hop(&self, start: &str, dest: &str, domain: u32) -> TopologyResult<&Device> {
        let name = self.graph(domain)?.next_hop(start, dest)?;
        self.device(name)
    }

    pub fn link_to_number(&self, link: &str, domain: u32) -> TopologyResult<u32> {
        self.graph(domain)?.link_to_number(link)
    }

    /// Rebuilds the graph of `domain` from the device registry.
    ///
    /// Nodes are the devices of the domain; edges come from each device's
    /// adjacency towards neighbours in the same domain. The tunnel node of an
    /// existing domain is kept.
    pub fn build_domain(&mut self, domain: u32) {
        let mut graph = DomainGraph::new(domain);
        let members: Vec<&Device> = self.devices.values().filter(|d| d.in_domain(domain)).collect();

        for device in &members {
            graph.add_node(&device.name, device.is_switch());
        }
        for device in &members {
            for neighbor in device.ports.keys() {
                match self.devices.get(neighbor) {
                    Some(n) if n.in_domain(domain) => graph.add_edge(&device.name, neighbor),
                    Some(_) => {}
                    None => debug!("{} lists unknown neighbour {}", device.name, neighbor),
                }
            }
        }

        let tunnel_node = self.domains.remove(&domain).and_then(|d| d.tunnel_node);
        self.domains.insert(
            domain,
            Domain {
                id: domain,
                graph,
                tunnel_node,
            },
        );
    }

    /// Rebuilds every domain any device belongs to, domain 0 included.
    pub fn build_all_domains(&mut self) {
        let mut ids: BTreeSet<u32> = self.devices.values().flat_map(|d| d.domains.iter().copied()).collect();
        ids.insert(DEFAULT_DOMAIN);
        for id in ids {
            self.build_domain(id);
        }
    }

    /// Takes down the link on `switch`/`port` on both sides.
    ///
    /// Returns None if nothing is attached to that port.
    pub fn port_down(&mut self, switch: &str, port: u32) -> TopologyResult<Option<RemovedLink>> {
        let neighbor = match self.device_mut(switch)?.remove_port(port) {
            Some(n) => n,
            None => return Ok(None),
        };

        let neighbor_port = match self.devices.get_mut(&neighbor) {
            Some(n) => n.port_to(switch).ok().and_then(|p| n.remove_port(p).map(|_| p)),
            None => None,
        };

        let link = RemovedLink {
            switch: switch.to_string(),
            port,
            neighbor,
            neighbor_port,
        };
        self.removed_links.insert((switch.to_string(), port), link.clone());
        Ok(Some(link))
    }

    /// Restores a link previously taken down on `switch`/`port`.
    ///
    /// Returns None if no link was remembered for that port.
    pub fn port_up(&mut self, switch: &str, port: u32) -> TopologyResult<Option<RemovedLink>> {
        self.device(switch)?;
        let link = match self.removed_links.remove(&(switch.to_string(), port)) {
            Some(link) => link,
            None => return Ok(None),
        };

        self.device_mut(switch)?.add_device_to_port(&link.neighbor, port);
        if let (Some(neighbor), Some(p)) = (self.devices.get_mut(&link.neighbor), link.neighbor_port) {
            neighbor.add_device_to_port(switch, p);
        }
        Ok(Some(link))
    }

    /// One line per domain and device, for logging.
    pub fn summary(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for domain in self.domains.values() {
            lines.push(format!(
                "domain {}: nodes {:?}, tunnel node {}",
                domain.id,
                domain.graph.nodes(),
                domain.tunnel_node.as_deref().unwrap_or("-")
            ));
        }
        for device in self.devices.values() {
            match device.kind {
                DeviceKind::Switch => lines.push(format!(
                    "switch {} {} {} domains {:?} bfr-ids {:?} ports {:?}",
                    device.name, device.ip, device.mac, device.domains, device.bfr_ids, device.ports
                )),
                DeviceKind::Host => lines.push(format!(
                    "host {} {} {} connected to {:?}",
                    device.name,
                    device.ip,
                    device.mac,
                    device.ports.keys().collect::<Vec<_>>()
                )),
            }
        }
        lines
    }

    fn check_bfr_id(&self, domain: u32, bfr_id: u32, device: &str) -> TopologyResult<()> {
        match self.devices.values().find(|d| d.name != device && d.bfr_id(domain) == Some(bfr_id)) {
            Some(existing) => Err(TopologyError::DuplicateBfrId {
                domain,
                bfr_id,
                existing: existing.name.clone(),
                device: device.to_string(),
            }),
            None => Ok(()),
        }
    }
}
