mod orch;

pub use orch::{live_ports, PortController, PORT_STATUS_TABLE};
