//! Token valuation for the price-weighted strategy.
//!
//! The ranking only needs "what was one unit of this token worth at this
//! block". Where that answer comes from is up to the implementation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Mutex;
use ttr_core::Address;

/// Values one unit of a token at a point in time.
pub trait PriceOracle: Send + Sync {
    /// Price of `contract` (or the native currency when `None`) at the
    /// given block. `None` when the price is unknown.
    fn price(&self, contract: Option<&Address>, block_number: u64, timestamp: u64) -> Option<f64>;
}

/// A fixed price per token, independent of time.
///
/// Loads from JSON of the form
/// `{"native": 1800.0, "tokens": {"0xdac1...": 1.0}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticPriceTable {
    #[serde(default)]
    native: Option<f64>,
    #[serde(default)]
    tokens: HashMap<Address, f64>,
}

impl StaticPriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_native_price(mut self, price: f64) -> Self {
        self.native = Some(price);
        self
    }

    pub fn with_token_price(mut self, contract: Address, price: f64) -> Self {
        self.tokens.insert(Address::new(contract), price);
        self
    }

    /// Reads a table from a JSON file.
    pub fn load(path: &Path) -> io::Result<Self> {
        let text = fs::read_to_string(path)?;
        let mut table: Self = serde_json::from_str(&text)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        // Keys in the file may use checksum casing.
        table.tokens = table
            .tokens
            .into_iter()
            .map(|(contract, price)| (Address::new(contract), price))
            .collect();
        Ok(table)
    }
}

impl PriceOracle for StaticPriceTable {
    fn price(&self, contract: Option<&Address>, _block_number: u64, _timestamp: u64) -> Option<f64> {
        match contract {
            None => self.native,
            Some(contract) => self.tokens.get(contract).copied(),
        }
    }
}

type PriceKey = (Option<Address>, u64);

/// Memoises another oracle's answers per token and block.
///
/// Unknown prices are remembered too, so a slow source is asked at most
/// once per key.
pub struct CachedPriceOracle<O> {
    inner: O,
    memo: Mutex<HashMap<PriceKey, Option<f64>>>,
}

impl<O: PriceOracle> CachedPriceOracle<O> {
    pub fn new(inner: O) -> Self {
        Self {
            inner,
            memo: Mutex::new(HashMap::new()),
        }
    }

    /// Number of memoised lookups.
    pub fn cached(&self) -> usize {
        self.memo.lock().map(|memo| memo.len()).unwrap_or(0)
    }
}

impl<O: PriceOracle> PriceOracle for CachedPriceOracle<O> {
    fn price(&self, contract: Option<&Address>, block_number: u64, timestamp: u64) -> Option<f64> {
        let key = (contract.cloned(), block_number);
        if let Ok(memo) = self.memo.lock() {
            if let Some(price) = memo.get(&key) {
                return *price;
            }
        }

        let price = self.inner.price(contract, block_number, timestamp);
        if let Ok(mut memo) = self.memo.lock() {
            memo.insert(key, price);
        }
        price
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
    }

    impl PriceOracle for Counting {
        fn price(&self, contract: Option<&Address>, block_number: u64, _: u64) -> Option<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            contract.is_none().then_some(block_number as f64)
        }
    }

    #[test]
    fn test_static_table_lookup() {
        let table = StaticPriceTable::new()
            .with_native_price(1800.0)
            .with_token_price(Address::new("0xUSDT"), 1.0);

        assert_eq!(table.price(None, 1, 1), Some(1800.0));
        assert_eq!(table.price(Some(&Address::new("0xusdt")), 1, 1), Some(1.0));
        assert_eq!(table.price(Some(&Address::new("0xother")), 1, 1), None);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prices.json");
        fs::write(&path, r#"{"native": 2.5, "tokens": {"0xABC": 0.5}}"#).unwrap();

        let table = StaticPriceTable::load(&path).unwrap();
        assert_eq!(table.price(None, 0, 0), Some(2.5));
        assert_eq!(table.price(Some(&Address::new("0xabc")), 0, 0), Some(0.5));
    }

    #[test]
    fn test_cache_asks_once_per_key() {
        let oracle = CachedPriceOracle::new(Counting {
            calls: AtomicUsize::new(0),
        });

        assert_eq!(oracle.price(None, 7, 0), Some(7.0));
        assert_eq!(oracle.price(None, 7, 99), Some(7.0));
        assert_eq!(oracle.price(Some(&Address::new("0xt")), 7, 0), None);
        assert_eq!(oracle.price(Some(&Address::new("0xt")), 7, 0), None);

        assert_eq!(oracle.inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(oracle.cached(), 2);
    }
}
