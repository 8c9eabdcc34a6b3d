mod orch;

pub use orch::{mac_entries, MacController, ADJUST_MAC_TABLE};
