//! BIER table computation.
//!
//! Pure functions over a [`TopologyStore`] and [`GroupStore`] snapshot:
//!
//! - the BIRT maps every reachable switch's bfr-id to its address and the
//!   address of the next hop towards it
//! - the FBM of a next hop is the OR of the bits of every bfr-id routed
//!   through it
//! - the BIFT maps every bfr-id to the FBM of its next hop and that next hop's
//!   name
//! - the BIER header for a group is the OR of the bits of its subscribed
//!   switches within a domain

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use bier_driver::BitString;
use log::trace;

use crate::error::{TopologyError, TopologyResult};
use crate::group::GroupStore;
use crate::topology::TopologyStore;

/// Bit of a 1-indexed bfr-id: `2^(id-1)`.
pub fn id_to_bit(id: u32) -> BitString {
    BitString::from_id(id)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BirtEntry {
    pub dest_ip: Ipv4Addr,
    pub next_hop_ip: Ipv4Addr,
}

/// Bit index routing table: bfr-id -> route.
pub type Birt = BTreeMap<u32, BirtEntry>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BiftEntry {
    pub fbm: BitString,
    pub next_hop: String,
}

impl BiftEntry {
    pub fn new(fbm: impl Into<BitString>, next_hop: impl Into<String>) -> Self {
        Self {
            fbm: fbm.into(),
            next_hop: next_hop.into(),
        }
    }
}

/// Bit index forwarding table: bfr-id -> forwarding entry.
pub type Bift = BTreeMap<u32, BiftEntry>;

/// Builds the BIRT of `switch` in `domain`.
///
/// Hosts are skipped, as are switches without a bfr-id in the domain.
/// Destinations without a known path are left out.
pub fn build_birt(topology: &TopologyStore, switch: &str, domain: u32) -> TopologyResult<Birt> {
    let mut birt = Birt::new();
    for dest in topology.graph(domain)?.nodes() {
        if dest == switch {
            continue;
        }
        let device = topology.device(dest)?;
        if device.is_host() {
            continue;
        }
        let Some(bfr_id) = device.bfr_id(domain) else {
            trace!("{} has no bfr-id in domain {}", dest, domain);
            continue;
        };

        match topology.next_hop(switch, dest, domain) {
            Ok(next_hop) => {
                birt.insert(
                    bfr_id,
                    BirtEntry {
                        dest_ip: device.ip,
                        next_hop_ip: next_hop.ip,
                    },
                );
            }
            Err(TopologyError::NextHopNotFound { .. }) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(birt)
}

/// OR of the bits of every BIRT entry routed via `next_hop_ip`.
pub fn compute_fbm(birt: &Birt, next_hop_ip: Ipv4Addr) -> BitString {
    birt.iter()
        .filter(|(_, entry)| entry.next_hop_ip == next_hop_ip)
        .map(|(id, _)| id_to_bit(*id))
        .collect()
}

/// Builds the BIFT of `switch` in `domain`.
pub fn build_bift(topology: &TopologyStore, switch: &str, domain: u32) -> TopologyResult<Bift> {
    let birt = build_birt(topology, switch, domain)?;
    let mut bift = Bift::new();
    for (id, entry) in &birt {
        let fbm = compute_fbm(&birt, entry.next_hop_ip);
        let dest = topology.device_by_bfr_id(domain, *id)?;
        let next_hop = topology.next_hop(switch, &dest.name, domain)?;
        bift.insert(*id, BiftEntry::new(fbm, next_hop.name.clone()));
    }
    Ok(bift)
}

/// BIER header for `group` in `domain`.
pub fn compute_bier_header(
    topology: &TopologyStore,
    groups: &GroupStore,
    group: Ipv4Addr,
    domain: u32,
) -> BitString {
    groups
        .switches_for_address(group)
        .iter()
        .filter_map(|switch| topology.device(switch).ok())
        .filter(|device| device.in_domain(domain))
        .filter_map(|device| device.bfr_id(domain))
        .map(id_to_bit)
        .collect()
}
