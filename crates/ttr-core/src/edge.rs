//! Transaction edges.
//!
//! An edge is one transfer discovered while fetching a node's history. It
//! is created by the response parser and never mutated afterwards.

use crate::address::Address;
use crate::tx::TxType;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which side of an edge a node is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// The node sent the transfer.
    Outgoing,
    /// The node received the transfer.
    Incoming,
}

/// A discovered transfer between two addresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Transaction hash.
    pub hash: String,

    /// Which history listing produced this edge.
    pub tx_type: TxType,

    pub from: Address,
    pub to: Address,

    /// Transferred amount in whole token units (decimals applied).
    pub value: f64,

    /// Unix timestamp of the including block.
    pub timestamp: u64,

    pub block_number: u64,

    /// Token symbol, `ETH` for native value.
    pub symbol: String,

    /// Token contract, `None` for native value.
    pub contract: Option<Address>,

    /// Position of a token transfer log inside its transaction.
    pub log_index: Option<u64>,

    /// Position of an internal call inside its transaction trace.
    pub trace_id: Option<String>,

    /// The provider record this edge was parsed from.
    pub raw: Value,
}

/// Identity of an edge for deduplication.
///
/// Bisected and paginated fetches share their boundary block, so the same
/// record can be returned twice for one node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey {
    tx_type: TxType,
    hash: String,
    from: Address,
    to: Address,
    value_bits: u64,
    log_index: Option<u64>,
    trace_id: Option<String>,
}

impl Edge {
    /// Creates a native-value edge with no block information.
    pub fn new(
        hash: impl Into<String>,
        tx_type: TxType,
        from: impl Into<Address>,
        to: impl Into<Address>,
        value: f64,
    ) -> Self {
        Self {
            hash: hash.into(),
            tx_type,
            from: from.into(),
            to: to.into(),
            value,
            timestamp: 0,
            block_number: 0,
            symbol: "ETH".to_string(),
            contract: None,
            log_index: None,
            trace_id: None,
            raw: Value::Null,
        }
    }

    /// Sets the block number and timestamp.
    pub fn at_block(mut self, block_number: u64, timestamp: u64) -> Self {
        self.block_number = block_number;
        self.timestamp = timestamp;
        self
    }

    /// Marks this edge as a token transfer.
    pub fn with_token(mut self, symbol: impl Into<String>, contract: impl Into<Address>) -> Self {
        self.symbol = symbol.into();
        self.contract = Some(contract.into());
        self
    }

    /// Which side of this edge `node` is on.
    ///
    /// Self-transfers and edges that do not touch `node` have no direction.
    pub fn direction(&self, node: &Address) -> Option<Direction> {
        if self.from == self.to {
            return None;
        }
        if &self.from == node {
            Some(Direction::Outgoing)
        } else if &self.to == node {
            Some(Direction::Incoming)
        } else {
            None
        }
    }

    /// The address on the other side of this edge from `node`.
    pub fn counterparty(&self, node: &Address) -> Option<&Address> {
        let other = match self.direction(node)? {
            Direction::Outgoing => &self.to,
            Direction::Incoming => &self.from,
        };
        (!other.is_empty()).then_some(other)
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            tx_type: self.tx_type,
            hash: self.hash.clone(),
            from: self.from.clone(),
            to: self.to.clone(),
            value_bits: self.value.to_bits(),
            log_index: self.log_index,
            trace_id: self.trace_id.clone(),
        }
    }
}
