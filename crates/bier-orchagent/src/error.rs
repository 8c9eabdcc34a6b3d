//! Error types for the orchestration daemon.

use std::path::PathBuf;

use bier_orch_common::ReconcileError;
use thiserror::Error;

/// Lookups against topology state.
///
/// Every variant except [`DuplicateBfrId`](TopologyError::DuplicateBfrId)
/// means "not learned yet" and is expected while the topology converges.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("Device {0} not found")]
    DeviceNotFound(String),

    #[error("Domain {0} not found")]
    DomainNotFound(u32),

    #[error("No device with bfr-id {bfr_id} in domain {domain}")]
    BfrIdNotFound { domain: u32, bfr_id: u32 },

    #[error("Next hop from {start} to {dest} not found in domain {domain}")]
    NextHopNotFound {
        start: String,
        dest: String,
        domain: u32,
    },

    #[error("Link {link} in domain {domain} not found")]
    LinkNotFound { link: String, domain: u32 },

    #[error("{device} has no port towards {neighbor}")]
    PortNotFound { device: String, neighbor: String },

    #[error("bfr-id {bfr_id} in domain {domain} is used by {existing}, cannot assign it to {device}")]
    DuplicateBfrId {
        domain: u32,
        bfr_id: u32,
        existing: String,
        device: String,
    },
}

impl TopologyError {
    pub fn next_hop_not_found(start: &str, dest: &str, domain: u32) -> Self {
        TopologyError::NextHopNotFound {
            start: start.to_string(),
            dest: dest.to_string(),
            domain,
        }
    }

    pub fn port_not_found(device: &str, neighbor: &str) -> Self {
        TopologyError::PortNotFound {
            device: device.to_string(),
            neighbor: neighbor.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        !matches!(self, TopologyError::DuplicateBfrId { .. })
    }
}

pub type TopologyResult<T> = Result<T, TopologyError>;

/// Loading or validating the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ConfigError::Invalid(message.into())
    }
}

/// Errors surfaced by controllers.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    #[error("Switch {0} is not configured")]
    UnknownSwitch(String),
}

impl ControllerError {
    /// True for the recoverable "not learned yet" family.
    pub fn is_not_found(&self) -> bool {
        match self {
            ControllerError::Topology(e) => e.is_not_found(),
            ControllerError::Reconcile(e) => e.is_not_found(),
            _ => false,
        }
    }
}

pub type ControllerResult<T> = Result<T, ControllerError>;
