//! Per-switch static IPv4 rules loaded from JSON.
//!
//! ```json
//! {"entries": [
//!     {"table": "ingress.ipv4_c.ipv4", "switch": "s1",
//!      "match_fields": ["10.0.9.0", 24, 2, 2],
//!      "action_name": "ingress.ipv4_c.forward", "action_params": 2}
//! ]}
//! ```
//!
//! `match_fields` is `[address, prefix length, port, port-status mask]`.

use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

use bier_driver::{BitString, MatchValue, TableEntry};
use serde::{Deserialize, Serialize};

use crate::bier::id_to_bit;
use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRule {
    pub table: String,
    pub switch: String,
    pub match_fields: (Ipv4Addr, u8, u32, u64),
    pub action_name: String,
    pub action_params: u32,
}

impl StaticRule {
    pub fn to_entry(&self) -> TableEntry {
        let (addr, prefix_len, port, mask) = self.match_fields;
        TableEntry::new(&self.switch, &self.action_name)
            .with_match("hdr.ipv4.dstAddr", MatchValue::lpm(addr, prefix_len))
            .with_match(
                "meta.ports.status",
                MatchValue::ternary(id_to_bit(port), BitString::from_u64(mask)),
            )
            .with_param("port", self.action_params)
            .with_priority(1)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRuleFile {
    pub entries: Vec<StaticRule>,
}

impl StaticRuleFile {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Rejects rules whose port has no bit in a bit string `bitstring_length` wide.
    pub fn validate(&self, bitstring_length: u32) -> Result<(), ConfigError> {
        for rule in &self.entries {
            let port = rule.match_fields.2;
            if port > bitstring_length {
                return Err(ConfigError::invalid(format!(
                    "static rule for {} on {} uses port {} beyond bitstring length {}",
                    rule.match_fields.0, rule.switch, port, bitstring_length
                )));
            }
        }
        Ok(())
    }

    /// Entries of `table`.
    pub fn entries_for_table<'a>(&'a self, table: &'a str) -> impl Iterator<Item = TableEntry> + 'a {
        self.entries
            .iter()
            .filter(move |rule| rule.table == table)
            .map(StaticRule::to_entry)
    }
}
