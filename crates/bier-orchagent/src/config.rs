//! Controller configuration.
//!
//! Loaded once at startup from a JSON document and shared read-only by every
//! controller.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Fast-reroute mode for BIER forwarding entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Protection {
    #[default]
    None,
    Link,
    Node,
}

/// Controllers that may be gated on port updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateTarget {
    Bier,
    Ipv4,
}

/// One switch of the roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchConfig {
    pub name: String,
    pub ip: Ipv4Addr,
    pub mac: String,

    /// bfr-id in the default domain 0.
    pub bfr_id: u32,

    /// Marks BFIR switches that add the BIER header.
    #[serde(default)]
    pub ingress: bool,

    /// Additional domain memberships: domain id -> bfr-id.
    #[serde(default)]
    pub domains: BTreeMap<u32, u32>,

    /// Path of a static IPv4 rule file.
    #[serde(default)]
    pub static_rules: Option<PathBuf>,
}

impl SwitchConfig {
    /// bfr-ids per domain, domain 0 included.
    pub fn bfr_ids(&self) -> BTreeMap<u32, u32> {
        let mut ids = self.domains.clone();
        ids.insert(0, self.bfr_id);
        ids
    }
}

/// Largest `bitstring_length` a configuration may ask for.
pub const MAX_BITSTRING_LENGTH: u32 = 4096;

/// Complete controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub protection: Protection,

    /// Controllers that recompute on port updates. Absent means all.
    #[serde(default)]
    pub update: Option<Vec<UpdateTarget>>,

    /// Settle delay before recomputing after a port update.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    /// Enables per-switch static IPv4 rules.
    #[serde(default)]
    pub static_rules: bool,

    /// Width of every bit string. bfr-ids and port numbers map to bit
    /// positions and must not exceed it.
    #[serde(default = "default_bitstring_length")]
    pub bitstring_length: u32,

    pub switches: Vec<SwitchConfig>,
}

fn default_delay_ms() -> u64 {
    0
}

fn default_bitstring_length() -> u32 {
    256
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            protection: Protection::default(),
            update: None,
            delay_ms: default_delay_ms(),
            static_rules: false,
            bitstring_length: default_bitstring_length(),
            switches: Vec::new(),
        }
    }
}

impl ControllerConfig {
    /// Loads and validates a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents, &path.display().to_string())
    }

    /// Parses and validates a configuration document. `origin` names it in errors.
    pub fn from_json_str(contents: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: ControllerConfig =
            serde_json::from_str(contents).map_err(|source| ConfigError::Parse {
                path: origin.to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks name uniqueness and bfr-id assignment.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bitstring_length == 0 || self.bitstring_length > MAX_BITSTRING_LENGTH {
            return Err(ConfigError::invalid(format!(
                "bitstring_length {} outside 1..={}",
                self.bitstring_length, MAX_BITSTRING_LENGTH
            )));
        }

        let mut names = HashSet::new();
        let mut used: BTreeMap<u32, BTreeMap<u32, &str>> = BTreeMap::new();

        for switch in &self.switches {
            if switch.name.is_empty() {
                return Err(ConfigError::invalid("switch with empty name"));
            }
            if !names.insert(switch.name.as_str()) {
                return Err(ConfigError::invalid(format!(
                    "duplicate switch name {}",
                    switch.name
                )));
            }
            if switch.domains.contains_key(&0) {
                return Err(ConfigError::invalid(format!(
                    "{} lists domain 0 under domains; set bfr_id instead",
                    switch.name
                )));
            }
            for (domain, bfr_id) in switch.bfr_ids() {
                if bfr_id == 0 {
                    return Err(ConfigError::invalid(format!(
                        "{} has bfr-id 0 in domain {}; ids start at 1",
                        switch.name, domain
                    )));
                }
                if !self.fits_bitstring(bfr_id) {
                    return Err(ConfigError::invalid(format!(
                        "{} has bfr-id {} in domain {}, beyond bitstring length {}",
                        switch.name, bfr_id, domain, self.bitstring_length
                    )));
                }
                if let Some(existing) = used.entry(domain).or_default().insert(bfr_id, switch.name.as_str()) {
                    return Err(ConfigError::invalid(format!(
                        "bfr-id {} in domain {} assigned to both {} and {}",
                        bfr_id, domain, existing, switch.name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn switch(&self, name: &str) -> Option<&SwitchConfig> {
        self.switches.iter().find(|s| s.name == name)
    }

    pub fn is_switch(&self, name: &str) -> bool {
        self.switch(name).is_some()
    }

    /// Names of every configured switch.
    pub fn switch_names(&self) -> BTreeSet<String> {
        self.switches.iter().map(|s| s.name.clone()).collect()
    }

    pub fn ingress_switches(&self) -> impl Iterator<Item = &SwitchConfig> {
        self.switches.iter().filter(|s| s.ingress)
    }

    /// True if `target` recomputes on port updates.
    pub fn updates(&self, target: UpdateTarget) -> bool {
        self.update
            .as_ref()
            .map(|targets| targets.contains(&target))
            .unwrap_or(true)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// True if `position` (a bfr-id or port number) has a bit in the bit string.
    pub fn fits_bitstring(&self, position: u32) -> bool {
        position <= self.bitstring_length
    }
}
