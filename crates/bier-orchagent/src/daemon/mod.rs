//! Composition root.

mod controller_daemon;

pub use controller_daemon::ControllerDaemon;
