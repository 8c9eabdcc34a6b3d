//! Entries of the `ingress.bier_c.bift` table.
//!
//! Every BIFT entry yields a forward rule that only matches while its egress
//! port is up. With fast reroute enabled a second rule matches the same bit
//! with the port down and tunnels the packet around the failure.

use bier_driver::{BitString, MatchValue, TableEntry};
use indexmap::IndexSet;
use log::debug;

use super::computation::{build_bift, id_to_bit, BiftEntry};
use crate::config::Protection;
use crate::error::TopologyResult;
use crate::topology::{Device, TopologyStore, DEFAULT_DOMAIN};

pub const BIFT_TABLE: &str = "ingress.bier_c.bift";

pub const REMAINING_BITS: &str = "meta.bier_md.remainingBits";
pub const PORT_STATUS: &str = "meta.ports.status";

pub const FORWARD: &str = "ingress.bier_c.forward";
pub const FORWARD_ENCAP: &str = "ingress.bier_c.forward_encap";
pub const DECAP: &str = "ingress.bier_c.decap";

const PRIORITY: i32 = 1;

/// Forward rule: bit `to_id` set and `port` up -> replicate with `fbm` out of `port`.
pub fn forward_entry(switch: &str, to_id: u32, port: u32, fbm: &BitString) -> TableEntry {
    let bit = id_to_bit(to_id);
    let port_bit = id_to_bit(port);
    TableEntry::new(switch, FORWARD)
        .with_match(REMAINING_BITS, MatchValue::ternary(bit.clone(), bit))
        .with_match(PORT_STATUS, MatchValue::ternary(port_bit.clone(), port_bit))
        .with_param("fbm", fbm.clone())
        .with_param("port", port)
        .with_priority(PRIORITY)
}

/// Backup rule: bit `to_id` set and `port` down -> tunnel `fbm` to `tunnel_end`.
fn backup_entry(switch: &Device, to_id: u32, port: u32, fbm: BitString, tunnel_end: &Device) -> TableEntry {
    let bit = id_to_bit(to_id);
    TableEntry::new(&switch.name, FORWARD_ENCAP)
        .with_match(REMAINING_BITS, MatchValue::ternary(bit.clone(), bit))
        .with_match(PORT_STATUS, MatchValue::ternary(BitString::zero(), id_to_bit(port)))
        .with_param("fbm", fbm)
        .with_param("srcAddr", switch.ip)
        .with_param("dstAddr", tunnel_end.ip)
        .with_priority(PRIORITY)
}

/// Link protection: tunnel the unchanged replication set to the next hop
/// behind the failed link.
pub fn link_protection_entry(
    topology: &TopologyStore,
    switch: &str,
    to_id: u32,
    port: u32,
    entry: &BiftEntry,
) -> TopologyResult<TableEntry> {
    let switch = topology.device(switch)?;
    let next_hop = topology.device(&entry.next_hop)?;
    Ok(backup_entry(switch, to_id, port, entry.fbm.clone(), next_hop))
}

/// Node protection: route around the next hop using the next hop's own BIFT.
///
/// The bits kept are those the next hop would send on towards `to_id`, and the
/// tunnel ends at the next hop's next hop for `to_id`. If the next hop is
/// itself `to_id`, a single-bit copy goes to it directly in case only the
/// link failed. Returns None when the next hop has no route to `to_id`.
pub fn node_protection_entry(
    topology: &TopologyStore,
    switch: &str,
    domain: u32,
    to_id: u32,
    port: u32,
    entry: &BiftEntry,
) -> TopologyResult<Option<TableEntry>> {
    let switch = topology.device(switch)?;
    let next_hop = topology.device(&entry.next_hop)?;
    let mut next_hop_bift = build_bift(topology, &next_hop.name, domain)?;

    if next_hop.bfr_id(domain) == Some(to_id) {
        next_hop_bift.insert(to_id, BiftEntry::new(id_to_bit(to_id), next_hop.name.clone()));
    }

    let Some(backup) = next_hop_bift.get(&to_id) else {
        debug!("No node protection for {} towards bfr-id {} via {}", switch.name, to_id, next_hop.name);
        return Ok(None);
    };

    let fbm = &entry.fbm & &backup.fbm;
    let tunnel_end = topology.device(&backup.next_hop)?;
    Ok(Some(backup_entry(switch, to_id, port, fbm, tunnel_end)))
}

/// Decap rule for the switch's own bit in domain 0.
pub fn decap_entry(switch: &Device) -> Option<TableEntry> {
    let bit = id_to_bit(switch.bfr_id(DEFAULT_DOMAIN)?);
    Some(
        TableEntry::new(&switch.name, DECAP)
            .with_match(REMAINING_BITS, MatchValue::ternary(bit.clone(), bit.clone()))
            .with_param("decapBit", bit)
            .with_priority(PRIORITY),
    )
}

/// Every entry `switch` should hold in the BIFT table, across all its domains.
pub fn bift_entries(topology: &TopologyStore, switch: &str, protection: Protection) -> TopologyResult<Vec<TableEntry>> {
    let device = topology.device(switch)?;
    let mut entries = Vec::new();

    for &domain in device.domains() {
        let bift = match build_bift(topology, switch, domain) {
            Ok(bift) => bift,
            Err(e) if e.is_not_found() => {
                debug!("Skipping domain {} for {}: {}", domain, switch, e);
                continue;
            }
            Err(e) => return Err(e),
        };

        for (&to_id, entry) in &bift {
            let port = device.port_to(&entry.next_hop)?;
            entries.push(forward_entry(switch, to_id, port, &entry.fbm));

            match protection {
                Protection::None => {}
                Protection::Link => entries.push(link_protection_entry(topology, switch, to_id, port, entry)?),
                Protection::Node => {
                    if let Some(e) = node_protection_entry(topology, switch, domain, to_id, port, entry)? {
                        entries.push(e);
                    }
                }
            }
        }
    }

    entries.extend(decap_entry(device));

    // a bit and port pair seen in several domains keeps its first rule
    let mut seen = IndexSet::with_capacity(entries.len());
    entries.retain(|e| seen.insert(e.match_fields.clone()));
    Ok(entries)
}
