//! BIER forwarding: table computation, rule construction and the controller
//! that installs the BIFT on every connected switch.

mod computation;
mod orch;
pub mod rules;

pub use computation::{
    build_bift, build_birt, compute_bier_header, compute_fbm, id_to_bit, Bift, BiftEntry, Birt, BirtEntry,
};
pub use orch::BierController;
