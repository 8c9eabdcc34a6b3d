//! End-to-end tests for the controller daemon.
//!
//! Every test drives a [`ControllerDaemon`] through the same path the binary
//! uses: switches connect from configuration, then feed messages arrive. An
//! in-memory driver stands in for the switches and records every write and
//! delete.
//!
//! The reference network is a line with one host at each end:
//!
//! ```text
//! h1 -(1)- s1 -(2)---(1)- s2 -(2)---(1)- s3 -(2)- h3
//! ```
//!
//! bfr-ids are 1, 2 and 3, so the switches own bits 1, 2 and 4.

use std::collections::HashSet;
use std::io::Write;
use std::net::Ipv4Addr;
use std::sync::Arc;

use bier_driver::{BitString, DriverOp, MatchValue, MemoryDriver, TableEntry, Value};
use bier_orchagent::bier::rules::{BIFT_TABLE, DECAP, FORWARD, FORWARD_ENCAP, PORT_STATUS, REMAINING_BITS};
use bier_orchagent::events::{PortMessage, TopologyChange, TopologyPacket};
use bier_orchagent::ipv4::{ENCAP_TABLE as IPV4_ENCAP_TABLE, IPV4_TABLE};
use bier_orchagent::mac::ADJUST_MAC_TABLE;
use bier_orchagent::port::PORT_STATUS_TABLE;
use bier_orchagent::tunnel::{DECAP_BIER_TABLE, DECAP_IPV4_TABLE, ENCAP_TABLE as TUNNEL_ENCAP_TABLE, ETHER_TYPE_BIER};
use bier_orchagent::{ControlEvent, ControllerConfig, ControllerDaemon, ControllerError, FeedMessage};
use pretty_assertions::assert_eq;
use tempfile::NamedTempFile;

const GROUP: Ipv4Addr = Ipv4Addr::new(224, 1, 1, 1);

// ============================================================================
// Fixture
// ============================================================================

struct Lab {
    daemon: ControllerDaemon,
    driver: MemoryDriver,
}

fn config(protection: &str, update: &str, extra: &str) -> ControllerConfig {
    let doc = format!(
        r#"{{
            "protection": "{protection}",
            "update": {update},
            {extra}
            "switches": [
                {{"name": "s1", "ip": "10.0.1.0", "mac": "00:00:00:01:00:00", "bfr_id": 1, "ingress": true {s1}}},
                {{"name": "s2", "ip": "10.0.2.0", "mac": "00:00:00:02:00:00", "bfr_id": 2}},
                {{"name": "s3", "ip": "10.0.3.0", "mac": "00:00:00:03:00:00", "bfr_id": 3}}
            ]
        }}"#,
        protection = protection,
        update = update,
        extra = if extra.is_empty() { "" } else { "\"static_rules\": true," },
        s1 = extra,
    );
    ControllerConfig::from_json_str(&doc, "lab").unwrap()
}

fn lab_with(config: ControllerConfig) -> Lab {
    let driver = MemoryDriver::new();
    let daemon = ControllerDaemon::new(config, Arc::new(driver.clone()));
    daemon.connect_switches().unwrap();
    Lab { daemon, driver }
}

/// Connected and fully discovered line topology.
fn lab(protection: &str, update: &str) -> Lab {
    let lab = lab_with(config(protection, update, ""));
    lab.discover();
    lab
}

fn neighbor(switch: &str, name: &str, port: u32, ip: [u8; 4], mac: &str) -> FeedMessage {
    FeedMessage::Topology(TopologyPacket {
        switch: switch.into(),
        name: name.into(),
        port,
        ip: Ipv4Addr::from(ip),
        mac: mac.into(),
    })
}

fn igmp(switch: &str, igmp_type: u8, src: [u8; 4]) -> FeedMessage {
    FeedMessage::Igmp {
        switch: switch.into(),
        igmp_type,
        mc_address: GROUP,
        src_ip: Ipv4Addr::from(src),
    }
}

fn port(switch: &str, port: u32, up: bool) -> FeedMessage {
    FeedMessage::Port(PortMessage {
        switch: switch.into(),
        port,
        up,
    })
}

impl Lab {
    fn feed(&self, message: FeedMessage) {
        assert!(self.daemon.ingest(message).unwrap());
    }

    fn discover(&self) {
        self.feed(neighbor("s1", "s2", 2, [10, 0, 2, 0], "00:00:00:02:00:00"));
        self.feed(neighbor("s2", "s1", 1, [10, 0, 1, 0], "00:00:00:01:00:00"));
        self.feed(neighbor("s2", "s3", 2, [10, 0, 3, 0], "00:00:00:03:00:00"));
        self.feed(neighbor("s3", "s2", 1, [10, 0, 2, 0], "00:00:00:02:00:00"));
        self.feed(neighbor("s1", "h1", 1, [10, 0, 1, 1], "00:00:00:00:01:01"));
        self.feed(neighbor("s3", "h3", 2, [10, 0, 3, 1], "00:00:00:00:03:01"));
    }

    fn bift(&self, switch: &str) -> Vec<TableEntry> {
        self.driver.installed(switch, BIFT_TABLE)
    }

    /// Driver calls against `table` on `switch` since the last `clear_ops`.
    fn ops(&self, switch: &str, table: &str) -> Vec<DriverOp> {
        self.driver
            .ops()
            .into_iter()
            .filter(|op| op.table() == table && op.entry().switch == switch)
            .collect()
    }
}

fn bits(v: u64) -> BitString {
    BitString::from_u64(v)
}

fn ternary(v: u64, m: u64) -> MatchValue {
    MatchValue::ternary(bits(v), bits(m))
}

/// The entry of `action` in `entries` that matches `bit` in the remaining bits.
fn rule<'a>(entries: &'a [TableEntry], action: &str, bit: u64) -> &'a TableEntry {
    entries
        .iter()
        .find(|e| e.action_name == action && e.match_fields.get(REMAINING_BITS) == Some(&ternary(bit, bit)))
        .unwrap_or_else(|| panic!("no {} rule for bit {} in {:#?}", action, bit, entries))
}

fn as_set(entries: Vec<TableEntry>) -> HashSet<TableEntry> {
    entries.into_iter().collect()
}

// ============================================================================
// 1. Switch connection and topology discovery
// ============================================================================

#[test]
fn test_connect_installs_ipv4_decap() {
    let lab = lab_with(config("None", "null", ""));
    for (switch, ip) in [("s1", [10u8, 0, 1, 0]), ("s2", [10, 0, 2, 0]), ("s3", [10, 0, 3, 0])] {
        let decap = lab.driver.installed(switch, DECAP_IPV4_TABLE);
        assert_eq!(decap.len(), 1);
        assert_eq!(decap[0].match_fields["hdr.ipv4.dstAddr"], MatchValue::exact(Ipv4Addr::from(ip)));
    }
    // nothing is computed before any adjacency is known
    assert!(lab.bift("s1").is_empty());
}

#[test]
fn test_discovery_builds_domain_graph() {
    let lab = lab("None", "null");
    let topology = lab.daemon.context().topology.read();

    let h1 = topology.device("h1").unwrap();
    assert!(h1.is_host());
    assert_eq!(h1.port_to("s1").unwrap(), 1);
    assert_eq!(topology.device("s2").unwrap().port_to("s3").unwrap(), 2);

    assert_eq!(topology.next_hop("s1", "s3", 0).unwrap().name, "s2");
    assert_eq!(topology.next_hop("h3", "h1", 0).unwrap().name, "s3");
}

#[test]
fn test_repeated_announcement_is_ignored() {
    let lab = lab("None", "null");
    lab.driver.clear_ops();

    lab.feed(neighbor("s1", "s2", 2, [10, 0, 2, 0], "00:00:00:02:00:00"));
    assert!(lab.driver.ops().is_empty());
}

#[test]
fn test_packet_from_unknown_switch_is_dropped() {
    let lab = lab("None", "null");
    lab.feed(neighbor("s9", "x1", 1, [10, 0, 9, 1], "00:00:00:00:09:01"));
    assert!(lab.daemon.context().topology.read().device("x1").is_err());
}

// ============================================================================
// 2. BIER forwarding table
// ============================================================================

#[test]
fn test_bift_on_line() {
    let lab = lab("None", "null");

    // s1 reaches both s2 and s3 through port 2
    let s1 = lab.bift("s1");
    assert_eq!(s1.len(), 3);
    for bit in [2, 4] {
        let forward = rule(&s1, FORWARD, bit);
        assert_eq!(forward.action_params["fbm"], Value::Bits(bits(6)));
        assert_eq!(forward.action_params["port"], Value::Int(2));
        assert_eq!(forward.match_fields[PORT_STATUS], ternary(2, 2));
        assert_eq!(forward.priority, Some(1));
    }
    let decap = rule(&s1, DECAP, 1);
    assert_eq!(decap.action_params["decapBit"], Value::Bits(bits(1)));

    // s2 splits towards both ends
    let s2 = lab.bift("s2");
    assert_eq!(s2.len(), 3);
    assert_eq!(rule(&s2, FORWARD, 1).action_params["fbm"], Value::Bits(bits(1)));
    assert_eq!(rule(&s2, FORWARD, 1).action_params["port"], Value::Int(1));
    assert_eq!(rule(&s2, FORWARD, 4).action_params["fbm"], Value::Bits(bits(4)));
    assert_eq!(rule(&s2, FORWARD, 4).action_params["port"], Value::Int(2));
}

#[test]
fn test_bier_decap_per_switch() {
    let lab = lab("None", "null");
    for switch in ["s1", "s2", "s3"] {
        let decap = lab.driver.installed(switch, DECAP_BIER_TABLE);
        assert_eq!(decap.len(), 1);
    }
}

// ============================================================================
// 3. Multicast groups and encapsulation
// ============================================================================

#[test]
fn test_join_installs_bier_header_on_ingress() {
    let lab = lab("None", "null");
    lab.feed(igmp("s3", 0x16, [10, 0, 3, 1]));

    let encap = lab.driver.installed("s1", IPV4_ENCAP_TABLE);
    assert_eq!(encap.len(), 1);
    assert_eq!(encap[0].match_fields["hdr.ipv4.dstAddr"], MatchValue::exact(GROUP));
    assert_eq!(encap[0].action_params["bs"], Value::Bits(bits(4)));

    let tunnel = lab.driver.installed("s1", TUNNEL_ENCAP_TABLE);
    assert_eq!(tunnel.len(), 1);
    assert_eq!(tunnel[0].action_params["bs"], Value::Bits(bits(4)));
    assert_eq!(tunnel[0].action_params["etherType"], Value::Int(ETHER_TYPE_BIER));
    assert_eq!(tunnel[0].action_params["domain"], Value::Int(0));

    // only ingress switches carry encap rules
    assert!(lab.driver.installed("s2", IPV4_ENCAP_TABLE).is_empty());
    assert!(lab.driver.installed("s3", TUNNEL_ENCAP_TABLE).is_empty());
}

#[test]
fn test_header_follows_membership() {
    let lab = lab("None", "null");
    let header = |lab: &Lab| {
        lab.driver
            .installed("s1", IPV4_ENCAP_TABLE)
            .first()
            .map(|e| e.action_params["bs"].clone())
    };

    lab.feed(igmp("s3", 0x16, [10, 0, 3, 1]));
    lab.feed(igmp("s2", 0x16, [10, 0, 2, 1]));
    assert_eq!(header(&lab), Some(Value::Bits(bits(6))));

    lab.feed(igmp("s3", 0x17, [10, 0, 3, 1]));
    assert_eq!(header(&lab), Some(Value::Bits(bits(2))));

    lab.feed(igmp("s2", 0x17, [10, 0, 2, 1]));
    assert_eq!(header(&lab), None);
    assert!(lab.driver.installed("s1", TUNNEL_ENCAP_TABLE).is_empty());
}

#[test]
fn test_leave_without_join_keeps_state() {
    let lab = lab("None", "null");
    lab.feed(igmp("s3", 0x16, [10, 0, 3, 1]));
    lab.driver.clear_ops();

    lab.feed(igmp("s3", 0x17, [10, 0, 3, 9]));
    assert!(lab.driver.ops().is_empty());
    assert_eq!(lab.daemon.context().groups.read().members("s3", GROUP).len(), 1);
}

#[test]
fn test_invalid_igmp_type_is_rejected() {
    let lab = lab("None", "null");
    let err = lab.daemon.ingest(igmp("s3", 0x11, [10, 0, 3, 1])).unwrap_err();
    assert!(matches!(err, ControllerError::InvalidPacket(_)));
}

// ============================================================================
// 4. Fast reroute
// ============================================================================

#[test]
fn test_link_protection_rules() {
    let lab = lab("Link", "null");
    let s1 = lab.bift("s1");
    assert_eq!(s1.len(), 5);

    for bit in [2, 4] {
        let backup = rule(&s1, FORWARD_ENCAP, bit);
        assert_eq!(backup.match_fields[PORT_STATUS], ternary(0, 2));
        assert_eq!(backup.action_params["fbm"], Value::Bits(bits(6)));
        assert_eq!(backup.action_params["srcAddr"], Value::Ip(Ipv4Addr::new(10, 0, 1, 0)));
        assert_eq!(backup.action_params["dstAddr"], Value::Ip(Ipv4Addr::new(10, 0, 2, 0)));
    }
}

#[test]
fn test_node_protection_rules() {
    let lab = lab("Node", "null");
    let s1 = lab.bift("s1");
    assert_eq!(s1.len(), 5);

    // s2 is the target itself: single-bit copy straight to it
    let to_s2 = rule(&s1, FORWARD_ENCAP, 2);
    assert_eq!(to_s2.action_params["fbm"], Value::Bits(bits(2)));
    assert_eq!(to_s2.action_params["dstAddr"], Value::Ip(Ipv4Addr::new(10, 0, 2, 0)));

    // around s2: tunnel to s3 with only s3's bit
    let to_s3 = rule(&s1, FORWARD_ENCAP, 4);
    assert_eq!(to_s3.action_params["fbm"], Value::Bits(bits(4)));
    assert_eq!(to_s3.action_params["dstAddr"], Value::Ip(Ipv4Addr::new(10, 0, 3, 0)));
}

#[test]
fn test_port_down_keeps_bier_rules_when_not_gated() {
    // only IPv4 recomputes on port updates; BIER relies on its backup rules
    let lab = lab("Link", r#"["ipv4"]"#);
    let before = as_set(lab.bift("s1"));
    lab.driver.clear_ops();

    lab.feed(port("s2", 2, false));

    assert!(lab.ops("s1", BIFT_TABLE).is_empty());
    let s1 = lab.bift("s1");
    assert_eq!(as_set(s1.clone()), before);

    let forward = rule(&s1, FORWARD, 4);
    let backup = rule(&s1, FORWARD_ENCAP, 4);
    assert_eq!(forward.match_fields[PORT_STATUS], ternary(2, 2));
    assert_eq!(backup.match_fields[PORT_STATUS], ternary(0, 2));

    // unicast lost the route to s3
    let ipv4 = lab.driver.installed("s1", IPV4_TABLE);
    assert!(!ipv4
        .iter()
        .any(|e| e.match_fields["hdr.ipv4.dstAddr"] == MatchValue::lpm(Ipv4Addr::new(10, 0, 3, 0), 32)));

    // the live-port mask of s2 dropped port 2
    let status = lab.driver.installed("s2", PORT_STATUS_TABLE);
    assert_eq!(status[0].action_params["livePorts"], Value::Bits(bits(1)));
}

// ============================================================================
// 5. Reconciliation
// ============================================================================

#[test]
fn test_recompute_without_change_writes_nothing() {
    let lab = lab("Link", "null");
    lab.feed(igmp("s3", 0x16, [10, 0, 3, 1]));
    lab.driver.clear_ops();

    lab.daemon
        .trigger(ControlEvent::TopologyChange(TopologyChange::adjacency("s1", "s2", 2)));
    lab.daemon.trigger(ControlEvent::GroupUpdate);

    assert!(lab.driver.ops().is_empty());
}

#[test]
fn test_port_down_diff() {
    let lab = lab("None", "null");
    lab.driver.clear_ops();

    lab.feed(port("s2", 2, false));

    // bit 2 shrinks its fbm in place, bit 4 becomes unreachable
    let ops = lab.ops("s1", BIFT_TABLE);
    assert_eq!(ops.len(), 3);
    assert!(matches!(&ops[0], DriverOp::Delete { entry, .. } if entry.action_params["fbm"] == Value::Bits(bits(6))));
    assert!(matches!(&ops[1], DriverOp::Write { entry, .. } if entry.action_params["fbm"] == Value::Bits(bits(2))));
    assert!(!ops[2].is_write());
    assert_eq!(ops[2].entry().match_fields[REMAINING_BITS], ternary(4, 4));

    let s1 = lab.bift("s1");
    assert_eq!(s1.len(), 2);
    assert_eq!(rule(&s1, FORWARD, 2).action_params["fbm"], Value::Bits(bits(2)));
}

#[test]
fn test_port_up_restores_rules() {
    let lab = lab("Link", "null");
    let bift = as_set(lab.bift("s2"));
    let mac = as_set(lab.driver.installed("s2", ADJUST_MAC_TABLE));

    lab.feed(port("s2", 2, false));
    assert_ne!(as_set(lab.bift("s2")), bift);

    lab.feed(port("s2", 2, true));
    assert_eq!(as_set(lab.bift("s2")), bift);
    assert_eq!(as_set(lab.driver.installed("s2", ADJUST_MAC_TABLE)), mac);

    let status = lab.driver.installed("s2", PORT_STATUS_TABLE);
    assert_eq!(status[0].action_params["livePorts"], Value::Bits(bits(3)));
}

#[test]
fn test_port_message_without_link() {
    let lab = lab("None", "null");
    lab.driver.clear_ops();

    lab.feed(port("s2", 7, false));
    assert!(lab.driver.ops().is_empty());
}

#[test]
fn test_driver_failure_is_retried_on_next_change() {
    let lab = lab_with(config("None", "null", ""));
    lab.driver.disconnect("s3");
    lab.discover();
    assert!(lab.bift("s3").is_empty());
    assert_eq!(lab.bift("s1").len(), 3);

    lab.driver.reconnect("s3");
    lab.daemon
        .trigger(ControlEvent::TopologyChange(TopologyChange::adjacency("s3", "s2", 1)));
    assert_eq!(lab.bift("s3").len(), 3);
}

// ============================================================================
// 6. Unicast, MAC and port tables
// ============================================================================

#[test]
fn test_unicast_rules() {
    let lab = lab("None", "null");
    let s1 = lab.driver.installed("s1", IPV4_TABLE);
    // s2, s3, h1, h3 and the local decap
    assert_eq!(s1.len(), 5);

    let to_h3 = s1
        .iter()
        .find(|e| e.match_fields["hdr.ipv4.dstAddr"] == MatchValue::lpm(Ipv4Addr::new(10, 0, 3, 1), 32))
        .unwrap();
    assert_eq!(to_h3.action_params["port"], Value::Int(2));
    assert_eq!(to_h3.match_fields["meta.ports.status"], ternary(2, 2));

    let decap = s1.iter().find(|e| e.action_name == "ingress.ipv4_c.decap").unwrap();
    assert_eq!(
        decap.match_fields["hdr.ipv4.dstAddr"],
        MatchValue::lpm(Ipv4Addr::new(10, 0, 1, 0), 32)
    );
}

#[test]
fn test_mac_rewrite_per_port() {
    let lab = lab("None", "null");
    let s1 = lab.driver.installed("s1", ADJUST_MAC_TABLE);
    assert_eq!(s1.len(), 2);

    let towards_s2 = s1
        .iter()
        .find(|e| e.match_fields["standard_metadata.egress_port"] == MatchValue::exact(2u32))
        .unwrap();
    assert_eq!(towards_s2.action_params["srcAddr"], Value::Mac("00:00:00:01:00:00".into()));
    assert_eq!(towards_s2.action_params["dstAddr"], Value::Mac("00:00:00:02:00:00".into()));
}

#[test]
fn test_live_ports() {
    let lab = lab("None", "null");
    for switch in ["s1", "s2", "s3"] {
        let status = lab.driver.installed(switch, PORT_STATUS_TABLE);
        assert_eq!(status.len(), 1);
        assert!(status[0].match_fields.is_empty());
        assert_eq!(status[0].action_params["livePorts"], Value::Bits(bits(3)));
    }
}

// ============================================================================
// 7. Static rules
// ============================================================================

#[test]
fn test_static_rules_override_and_extend() {
    let mut rules = NamedTempFile::new().unwrap();
    rules
        .write_all(
            br#"{"entries": [
                {"table": "ingress.ipv4_c.ipv4", "switch": "s1", "match_fields": ["10.0.3.0", 32, 2, 2],
                 "action_name": "ingress.ipv4_c.forward", "action_params": 3},
                {"table": "ingress.ipv4_c.ipv4", "switch": "s1", "match_fields": ["10.0.9.0", 24, 1, 1],
                 "action_name": "ingress.ipv4_c.forward", "action_params": 1}
            ]}"#,
        )
        .unwrap();
    let path = serde_json::to_string(rules.path()).unwrap();

    let lab = lab_with(config("None", "null", &format!(r#", "static_rules": {}"#, path)));
    lab.discover();

    let s1 = lab.driver.installed("s1", IPV4_TABLE);
    assert_eq!(s1.len(), 6);

    let to_s3 = s1
        .iter()
        .find(|e| e.match_fields["hdr.ipv4.dstAddr"] == MatchValue::lpm(Ipv4Addr::new(10, 0, 3, 0), 32))
        .unwrap();
    assert_eq!(to_s3.action_params["port"], Value::Int(3));

    assert!(s1
        .iter()
        .any(|e| e.match_fields["hdr.ipv4.dstAddr"] == MatchValue::lpm(Ipv4Addr::new(10, 0, 9, 0), 24)));
}

#[test]
fn test_missing_static_rules_file_is_skipped() {
    let lab = lab_with(config("None", "null", r#", "static_rules": "/nonexistent/rules.json""#));
    lab.discover();
    assert_eq!(lab.driver.installed("s1", IPV4_TABLE).len(), 5);
}

// ============================================================================
// 8. Feed format and dump
// ============================================================================

#[test]
fn test_feed_lines() {
    let lab = lab_with(config("None", "null", ""));
    let lines = [
        r#"{"type":"topology","switch":"s1","name":"s2","port":2,"ip":"10.0.2.0","mac":"00:00:00:02:00:00"}"#,
        r#"{"type":"topology","switch":"s2","name":"s1","port":1,"ip":"10.0.1.0","mac":"00:00:00:01:00:00"}"#,
        r#"{"type":"igmp","switch":"s2","igmp_type":22,"mc_address":"224.1.1.1","src_ip":"10.0.2.1"}"#,
    ];
    for line in lines {
        let message: FeedMessage = serde_json::from_str(line).unwrap();
        lab.feed(message);
    }

    assert_eq!(rule(&lab.bift("s1"), FORWARD, 2).action_params["port"], Value::Int(2));
    let encap = lab.driver.installed("s1", IPV4_ENCAP_TABLE);
    assert_eq!(encap[0].action_params["bs"], Value::Bits(bits(2)));
}

#[test]
fn test_dump_lists_tables() {
    let lab = lab("Link", "null");
    lab.feed(igmp("s3", 0x16, [10, 0, 3, 1]));

    let dump = lab.daemon.dump();
    assert!(dump.iter().any(|l| l.starts_with("[BierController] ingress.bier_c.bift (")));
    assert!(dump.iter().any(|l| l.starts_with("[IPv4Controller] ingress.ipv4_c.encap_ipv4 (1 entries)")));
    assert!(dump.iter().any(|l| l.contains("224.1.1.1")));
}
