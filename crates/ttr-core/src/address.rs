//! Ledger addresses.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of a `0x`-prefixed hex address.
const ADDRESS_LEN: usize = 42;

/// A ledger account address, normalised to lower case.
///
/// Providers report the same account with mixed checksum casing, so every
/// address is lower-cased on construction. Ordering is lexical and is used
/// as the last tie-break wherever the ranking needs to be deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Creates an address without validating its shape.
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_lowercase())
    }

    /// Creates an address, returning `None` unless it is `0x` followed by
    /// 40 hex digits.
    pub fn parse(raw: &str) -> Option<Self> {
        let address = Self::new(raw);
        address.is_well_formed().then_some(address)
    }

    /// Whether this looks like a `0x`-prefixed 20-byte hex address.
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == ADDRESS_LEN
            && self.0.starts_with("0x")
            && self.0[2..].chars().all(|c| c.is_ascii_hexdigit())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercases_input() {
        let address = Address::new(" 0xABCDEF0000000000000000000000000000000001 ");
        assert_eq!(
            address.as_str(),
            "0xabcdef0000000000000000000000000000000001"
        );
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        assert!(Address::parse("0xabcdef0000000000000000000000000000000001").is_some());
        assert!(Address::parse("abcdef0000000000000000000000000000000001").is_none());
        assert!(Address::parse("0xabc").is_none());
        assert!(Address::parse("0xzzcdef0000000000000000000000000000000001").is_none());
    }
}
