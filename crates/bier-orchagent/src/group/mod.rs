//! Multicast group membership learned from IGMP.

mod orch;
mod store;

pub use orch::GroupController;
pub use store::GroupStore;
