//! Transaction types and block ranges.

use crate::error::JobError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A kind of transaction history the provider can list for an address.
///
/// One exploration combines one or more of these; every node is fetched
/// once per type before its edges may be pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxType {
    /// Native value transfers sent by externally owned accounts.
    External,
    /// Native value moved by contract execution.
    Internal,
    /// Fungible token transfers.
    Erc20,
    /// Non-fungible token transfers.
    Erc721,
}

impl TxType {
    pub const ALL: [TxType; 4] = [
        TxType::External,
        TxType::Internal,
        TxType::Erc20,
        TxType::Erc721,
    ];

    /// The provider's `action` query parameter for this type.
    pub fn action(&self) -> &'static str {
        match self {
            Self::External => "txlist",
            Self::Internal => "txlistinternal",
            Self::Erc20 => "tokentx",
            Self::Erc721 => "tokennfttx",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::External => "external",
            Self::Internal => "internal",
            Self::Erc20 => "erc20",
            Self::Erc721 => "erc721",
        }
    }

    /// Parses a comma-separated list such as `"external,internal,erc20"`.
    ///
    /// Duplicates are dropped; the first occurrence keeps its position.
    pub fn parse_list(raw: &str) -> Result<Vec<TxType>, JobError> {
        let mut types = Vec::new();
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let tx_type: TxType = part.parse()?;
            if !types.contains(&tx_type) {
                types.push(tx_type);
            }
        }
        Ok(types)
    }
}

impl FromStr for TxType {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "external" | "txlist" => Ok(Self::External),
            "internal" | "txlistinternal" => Ok(Self::Internal),
            "erc20" | "tokentx" => Ok(Self::Erc20),
            "erc721" | "tokennfttx" => Ok(Self::Erc721),
            _ => Err(JobError::UnknownTxType(s.to_string())),
        }
    }
}

impl fmt::Display for TxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An inclusive block interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRange {
    pub start: u64,
    pub end: u64,
}

impl BlockRange {
    /// Creates a range, rejecting `start > end`.
    pub fn new(start: u64, end: u64) -> Result<Self, JobError> {
        if start > end {
            return Err(JobError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Distance between the bounds. A single-block range has width 0.
    pub fn width(&self) -> u64 {
        self.end - self.start
    }

    pub fn contains(&self, block: u64) -> bool {
        self.start <= block && block <= self.end
    }

    /// Splits the range at its midpoint.
    ///
    /// Halves share the midpoint block, so `[100, 200]` becomes `[100, 150]`
    /// and `[150, 200]`. A width-1 range splits into its two single blocks
    /// and a single block cannot be split at all. Every half is strictly
    /// narrower than `self`.
    pub fn bisect(&self) -> Option<(BlockRange, BlockRange)> {
        match self.width() {
            0 => None,
            1 => Some((
                Self {
                    start: self.start,
                    end: self.start,
                },
                Self {
                    start: self.end,
                    end: self.end,
                },
            )),
            _ => {
                let mid = self.start + self.width() / 2;
                Some((
                    Self {
                        start: self.start,
                        end: mid,
                    },
                    Self {
                        start: mid,
                        end: self.end,
                    },
                ))
            }
        }
    }

    /// The remainder of the range starting at `block`, used for forward
    /// pagination. Returns `None` unless the new start moves forward and
    /// stays inside the range.
    pub fn advance_to(&self, block: u64) -> Option<BlockRange> {
        (block > self.start && block <= self.end).then_some(Self {
            start: block,
            end: self.end,
        })
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}
