//! Unicast IPv4 forwarding and BIER encapsulation at ingress switches.

mod orch;
mod static_rules;

pub use orch::{encap_entries, forward_entries, Ipv4Controller, ENCAP_TABLE, IPV4_TABLE};
pub use static_rules::{StaticRule, StaticRuleFile};
