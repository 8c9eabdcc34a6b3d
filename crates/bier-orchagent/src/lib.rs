//! BIER Orchagent - multicast control plane daemon
//!
//! Learns the network from topology, IGMP and port-status feeds, computes
//! BIER forwarding state for every switch and converges the switches' rule
//! tables through a [`DeviceDriver`](bier_driver::DeviceDriver).
//!
//! # Architecture
//!
//! ```text
//! [feed] ──> [ControllerDaemon] ──> [EventBus] ──> controllers ──> [TableEntryManager] ──> [DeviceDriver]
//!                                       │
//!                                       ↓
//!                          [TopologyStore] [GroupStore]
//! ```
//!
//! # Key Components
//!
//! - [`daemon::ControllerDaemon`]: Composition root and feed ingestion
//! - [`topology`]: Device registry, per-domain graphs, topology controller
//! - [`group`]: Multicast membership and the IGMP controller
//! - [`bier`]: BIRT/BIFT computation, fast-reroute rules, BIER controller
//! - [`ipv4`], [`tunnel`], [`mac`], [`port`]: The remaining rule producers

pub mod bier;
pub mod config;
pub mod context;
pub mod daemon;
pub mod error;
pub mod events;
pub mod group;
pub mod ipv4;
pub mod mac;
pub mod port;
pub mod topology;
pub mod tunnel;

pub use config::{ControllerConfig, Protection, SwitchConfig, UpdateTarget};
pub use context::ControllerContext;
pub use daemon::ControllerDaemon;
pub use error::{ConfigError, ControllerError, ControllerResult, TopologyError, TopologyResult};
pub use events::{ControlEvent, FeedMessage};
