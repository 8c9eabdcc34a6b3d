//! Common orchestration abstractions for the BIER controller.
//!
//! This crate provides the pieces shared by every controller:
//!
//! - [`EventBus`]: Synchronous publish/subscribe dispatcher
//! - [`Controller`]: Trait for components that react to bus events
//! - [`TableEntryManager`]: Mirror of installed rules that diffs desired state
//!   against installed state and applies only the delta
//! - [`ManagerRegistry`]: Named lookup of table managers
//!
//! # Architecture
//!
//! 1. Feeds (topology, group membership, port status) trigger events
//! 2. The bus dispatches them to controllers in subscription order
//! 3. Controllers recompute the full desired rule set for each switch
//! 4. Table managers reconcile that set against what is installed
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use bier_driver::{MemoryDriver, TableEntry};
//! use bier_orch_common::{EntryChange, TableEntryManager};
//!
//! let driver = MemoryDriver::new();
//! let mut manager = TableEntryManager::new("MacController", Arc::new(driver.clone()));
//! manager.init_table("egress.mac_c.adjust_mac");
//!
//! let entry = TableEntry::new("s1", "egress.mac_c.set_mac");
//! let change = manager.handle_table_entry("egress.mac_c.adjust_mac", &entry).unwrap();
//! assert_eq!(change, EntryChange::Created);
//! assert_eq!(driver.write_count(), 1);
//! ```

mod error;
mod event;
mod orch;
mod table_manager;

pub use error::{EventError, ReconcileError, ReconcileResult};
pub use event::{BusEvent, EventBus, Handler, HandlerId};
pub use orch::Controller;
pub use table_manager::{EntryChange, ManagerRegistry, TableDescription, TableEntryManager};
