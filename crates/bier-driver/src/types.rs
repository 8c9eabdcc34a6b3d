//! Rule model for P4 table entries.
//!
//! A [`TableEntry`] is a pure value: the switch it belongs to, the match
//! fields that identify it inside a table, the action to run and the action
//! parameters. Bit masks of arbitrary width are carried as [`BitString`].

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::ops::{BitAnd, BitOr, BitOrAssign};

const WORD_BITS: u32 = u64::BITS;

/// Arbitrary-width unsigned bit string.
///
/// Stored as little-endian 64-bit words with trailing zero words trimmed, so
/// two bit strings with the same set bits always compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BitString {
    words: Vec<u64>,
}

impl BitString {
    /// The empty bit string.
    pub fn zero() -> Self {
        Self { words: Vec::new() }
    }

    /// Converts a 1-indexed bit position into its mask (`2^(id-1)`).
    ///
    /// Position 0 is unused and yields the empty bit string.
    pub fn from_id(id: u32) -> Self {
        let mut bits = Self::zero();
        if id > 0 {
            bits.set_bit(id);
        }
        bits
    }

    /// Creates a bit string from a 64-bit value.
    pub fn from_u64(value: u64) -> Self {
        let mut bits = Self { words: vec![value] };
        bits.trim();
        bits
    }

    /// Sets the 1-indexed bit `id`. Position 0 is ignored.
    pub fn set_bit(&mut self, id: u32) {
        if id == 0 {
            return;
        }
        let pos = id - 1;
        let word = (pos / WORD_BITS) as usize;
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << (pos % WORD_BITS);
    }

    /// Returns true if the 1-indexed bit `id` is set.
    pub fn is_set(&self, id: u32) -> bool {
        if id == 0 {
            return false;
        }
        let pos = id - 1;
        self.words
            .get((pos / WORD_BITS) as usize)
            .map(|w| w & (1u64 << (pos % WORD_BITS)) != 0)
            .unwrap_or(false)
    }

    pub fn is_zero(&self) -> bool {
        self.words.is_empty()
    }

    pub fn count_ones(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    /// Returns the 1-indexed positions of all set bits, ascending.
    pub fn ids(&self) -> Vec<u32> {
        let mut ids = Vec::new();
        for (index, word) in self.words.iter().enumerate() {
            for bit in 0..WORD_BITS {
                if word & (1u64 << bit) != 0 {
                    ids.push(index as u32 * WORD_BITS + bit + 1);
                }
            }
        }
        ids
    }

    /// Returns the value if it fits into 64 bits.
    pub fn to_u64(&self) -> Option<u64> {
        match self.words.len() {
            0 => Some(0),
            1 => Some(self.words[0]),
            _ => None,
        }
    }

    fn trim(&mut self) {
        while self.words.last() == Some(&0) {
            self.words.pop();
        }
    }
}

impl From<u64> for BitString {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}

impl BitOr for BitString {
    type Output = BitString;

    fn bitor(mut self, rhs: BitString) -> BitString {
        self |= rhs;
        self
    }
}

impl BitOr for &BitString {
    type Output = BitString;

    fn bitor(self, rhs: &BitString) -> BitString {
        let mut out = self.clone();
        out |= rhs.clone();
        out
    }
}

impl BitOrAssign for BitString {
    fn bitor_assign(&mut self, rhs: BitString) {
        if self.words.len() < rhs.words.len() {
            self.words.resize(rhs.words.len(), 0);
        }
        for (dst, src) in self.words.iter_mut().zip(rhs.words) {
            *dst |= src;
        }
    }
}

impl BitAnd for &BitString {
    type Output = BitString;

    fn bitand(self, rhs: &BitString) -> BitString {
        let mut out = BitString {
            words: self
                .words
                .iter()
                .zip(rhs.words.iter())
                .map(|(a, b)| a & b)
                .collect(),
        };
        out.trim();
        out
    }
}

impl FromIterator<BitString> for BitString {
    fn from_iter<I: IntoIterator<Item = BitString>>(iter: I) -> Self {
        iter.into_iter().fold(BitString::zero(), |acc, b| acc | b)
    }
}

impl fmt::Display for BitString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.words.split_last() {
            None => write!(f, "0x0"),
            Some((high, rest)) => {
                write!(f, "{:#x}", high)?;
                for word in rest.iter().rev() {
                    write!(f, "{:016x}", word)?;
                }
                Ok(())
            }
        }
    }
}

/// A single field or parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    Bits(BitString),
    Ip(Ipv4Addr),
    Mac(String),
    Int(u64),
}

impl From<BitString> for Value {
    fn from(bits: BitString) -> Self {
        Value::Bits(bits)
    }
}

impl From<Ipv4Addr> for Value {
    fn from(ip: Ipv4Addr) -> Self {
        Value::Ip(ip)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Int(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(u64::from(value))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bits(bits) => write!(f, "{}", bits),
            Value::Ip(ip) => write!(f, "{}", ip),
            Value::Mac(mac) => write!(f, "{}", mac),
            Value::Int(v) => write!(f, "{}", v),
        }
    }
}

/// How a match field is compared against packet data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MatchValue {
    Exact(Value),
    Ternary { value: Value, mask: Value },
    Lpm { addr: Ipv4Addr, prefix_len: u8 },
}

impl MatchValue {
    pub fn exact(value: impl Into<Value>) -> Self {
        MatchValue::Exact(value.into())
    }

    pub fn ternary(value: impl Into<Value>, mask: impl Into<Value>) -> Self {
        MatchValue::Ternary {
            value: value.into(),
            mask: mask.into(),
        }
    }

    pub fn lpm(addr: Ipv4Addr, prefix_len: u8) -> Self {
        MatchValue::Lpm { addr, prefix_len }
    }
}

impl fmt::Display for MatchValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchValue::Exact(v) => write!(f, "{}", v),
            MatchValue::Ternary { value, mask } => write!(f, "{}&&&{}", value, mask),
            MatchValue::Lpm { addr, prefix_len } => write!(f, "{}/{}", addr, prefix_len),
        }
    }
}

/// Match fields keyed by field name; the identity of an entry in its table.
pub type MatchFields = BTreeMap<String, MatchValue>;

/// Action parameters keyed by parameter name.
pub type ActionParams = BTreeMap<String, Value>;

/// One rule in a switch table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableEntry {
    pub switch: String,
    pub match_fields: MatchFields,
    pub action_name: String,
    pub action_params: ActionParams,
    pub priority: Option<i32>,
}

impl TableEntry {
    /// Creates an entry with no match fields and no parameters.
    pub fn new(switch: impl Into<String>, action_name: impl Into<String>) -> Self {
        Self {
            switch: switch.into(),
            match_fields: MatchFields::new(),
            action_name: action_name.into(),
            action_params: ActionParams::new(),
            priority: None,
        }
    }

    /// Adds a match field.
    pub fn with_match(mut self, field: impl Into<String>, value: MatchValue) -> Self {
        self.match_fields.insert(field.into(), value);
        self
    }

    /// Adds an action parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.action_params.insert(name.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Returns true if both entries occupy the same slot of a table.
    pub fn same_key(&self, other: &TableEntry) -> bool {
        self.switch == other.switch && self.match_fields == other.match_fields
    }
}

impl fmt::Display for TableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: [", self.switch)?;
        for (i, (field, value)) in self.match_fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", field, value)?;
        }
        write!(f, "] -> {}(", self.action_name)?;
        for (i, (name, value)) in self.action_params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        write!(f, ")")?;
        if let Some(priority) = self.priority {
            write!(f, " prio {}", priority)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_from_id() {
        assert_eq!(BitString::from_id(0), BitString::zero());
        assert_eq!(BitString::from_id(1).to_u64(), Some(1));
        assert_eq!(BitString::from_id(3).to_u64(), Some(4));
        assert_eq!(BitString::from_id(5).to_u64(), Some(16));
    }

    #[test]
    fn test_wide_bits() {
        let bits = BitString::from_id(130);
        assert!(bits.is_set(130));
        assert!(!bits.is_set(129));
        assert_eq!(bits.to_u64(), None);
        assert_eq!(bits.ids(), vec![130]);
    }

    #[test]
    fn test_or_and() {
        let a = BitString::from_id(2) | BitString::from_id(3);
        assert_eq!(a.to_u64(), Some(6));
        assert_eq!(a.count_ones(), 2);

        let wide = BitString::from_id(70) | BitString::from_id(2);
        let both = &wide & &a;
        assert_eq!(both, BitString::from_id(2));

        // high word vanishes after masking, equality must still hold
        let low = &wide & &BitString::from_u64(u64::MAX);
        assert_eq!(low, BitString::from_id(2));
    }

    #[test]
    fn test_collect() {
        let bits: BitString = [1, 3, 4].iter().map(|id| BitString::from_id(*id)).collect();
        assert_eq!(bits.to_u64(), Some(0b1101));
        assert_eq!(bits.ids(), vec![1, 3, 4]);
    }

    #[test]
    fn test_display() {
        assert_eq!(BitString::zero().to_string(), "0x0");
        assert_eq!(BitString::from_u64(6).to_string(), "0x6");
        assert_eq!(BitString::from_id(65).to_string(), "0x10000000000000000");
    }

    #[test]
    fn test_entry_equality() {
        let bit = BitString::from_id(2);
        let a = TableEntry::new("s1", "ingress.bier_c.forward")
            .with_match(
                "meta.bier_md.remainingBits",
                MatchValue::ternary(bit.clone(), bit.clone()),
            )
            .with_param("port", 2u32)
            .with_priority(1);
        let b = a.clone().with_param("port", 3u32);

        assert_ne!(a, b);
        assert!(a.same_key(&b));
        assert_eq!(
            a.to_string(),
            "s1: [meta.bier_md.remainingBits=0x2&&&0x2] -> ingress.bier_c.forward(port=2) prio 1"
        );
    }
}
