//! Table entry model and device driver capability for P4 BIER switches.
//!
//! This crate describes forwarding rules independently of any wire
//! encoding and defines the narrow capability the control plane needs to
//! push them to a switch.
//!
//! # Architecture
//!
//! The crate is organized into three modules:
//!
//! - [`types`]: Rule model ([`BitString`], [`Value`], [`MatchValue`], [`TableEntry`])
//! - [`error`]: Driver error types
//! - [`driver`]: The [`DeviceDriver`] trait and an in-memory [`MemoryDriver`]
//!
//! # Example
//!
//! ```
//! use bier_driver::{BitString, DeviceDriver, MatchValue, MemoryDriver, TableEntry, Value};
//!
//! let driver = MemoryDriver::new();
//! let bit = BitString::from_id(3);
//! let entry = TableEntry::new("s1", "ingress.bier_c.decap")
//!     .with_match("meta.bier_md.remainingBits", MatchValue::ternary(bit.clone(), bit.clone()))
//!     .with_param("decapBit", Value::Bits(bit))
//!     .with_priority(1);
//!
//! driver.write("s1", "ingress.bier_c.bift", &entry).unwrap();
//! assert_eq!(driver.installed("s1", "ingress.bier_c.bift").len(), 1);
//! ```

pub mod driver;
pub mod error;
pub mod types;

pub use driver::{DeviceDriver, DriverOp, MemoryDriver};
pub use error::{DriverError, DriverResult};
pub use types::{ActionParams, BitString, MatchFields, MatchValue, TableEntry, Value};
