//! Topology discovery and per-domain graphs.

mod graph;
mod orch;
mod store;

pub use graph::{link_name, DomainGraph, PathMap};
pub use orch::TopologyController;
pub use store::{Device, DeviceKind, Domain, RemovedLink, TopologyStore, DEFAULT_DOMAIN};
