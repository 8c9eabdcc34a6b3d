mod orch;

pub use orch::{bier_decap_entries, encap_entries, ipv4_decap_entry, TunnelController};
pub use orch::{DECAP_BIER_TABLE, DECAP_IPV4_TABLE, ENCAP_TABLE, ETHER_TYPE_BIER};
