//! Exploration job descriptions.
//!
//! A [`JobSpec`] is what a user writes (every field optional, historical
//! field names accepted). [`JobSpec::validate`] turns it into a [`Job`]
//! with every default applied, or fails before anything is fetched.

use crate::address::Address;
use crate::error::JobError;
use crate::tx::{BlockRange, TxType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const DEFAULT_ALPHA: f64 = 0.15;
const DEFAULT_BETA: f64 = 0.7;
const DEFAULT_EPSILON: f64 = 1e-3;
const DEFAULT_END_BLOCK: u64 = 99_999_999;
const DEFAULT_MAX_RETRY: u32 = 2;
/// The provider's page cap; a response this large may be truncated.
const DEFAULT_PAGE_THRESHOLD: usize = 10_000;

/// The ranking strategy variant used by an exploration.
///
/// Variants share the local-push skeleton and differ only in how a node's
/// residual is split across its neighbours and in frontier order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Base,
    Weight,
    Time,
    Redirect,
    Price,
    Alpha,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 6] = [
        StrategyKind::Base,
        StrategyKind::Weight,
        StrategyKind::Time,
        StrategyKind::Redirect,
        StrategyKind::Price,
        StrategyKind::Alpha,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::Weight => "weight",
            Self::Time => "time",
            Self::Redirect => "redirect",
            Self::Price => "price",
            Self::Alpha => "alpha",
        }
    }
}

impl FromStr for StrategyKind {
    type Err = JobError;

    /// Accepts `redirect`, `Redirect` and the prefixed `TTRRedirect` forms.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let name = lower.strip_prefix("ttr").unwrap_or(&lower);
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| JobError::UnknownStrategy(s.to_string()))
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transaction types as written in a job file: a list or a joined string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TxTypeList {
    Joined(String),
    List(Vec<String>),
}

impl TxTypeList {
    fn resolve(&self) -> Result<Vec<TxType>, JobError> {
        match self {
            Self::Joined(raw) => TxType::parse_list(raw),
            Self::List(items) => TxType::parse_list(&items.join(",")),
        }
    }
}

/// A job as written by a user. Absent fields take the documented defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub source: Option<String>,

    #[serde(default, alias = "types", alias = "txs_types")]
    pub tx_types: Option<TxTypeList>,

    #[serde(default, alias = "start_blk")]
    pub start_block: Option<u64>,

    #[serde(default, alias = "end_blk")]
    pub end_block: Option<u64>,

    #[serde(default)]
    pub strategy: Option<String>,

    #[serde(default)]
    pub alpha: Option<f64>,

    #[serde(default)]
    pub beta: Option<f64>,

    #[serde(default)]
    pub epsilon: Option<f64>,

    #[serde(default, alias = "auto_page")]
    pub auto_paginate: Option<bool>,

    #[serde(default)]
    pub max_retry: Option<u32>,

    #[serde(default)]
    pub page_threshold: Option<usize>,
}

impl JobSpec {
    /// A spec with only the source set.
    pub fn for_source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..Self::default()
        }
    }

    /// Reads one job object or an array of them.
    pub fn parse_many(json: &str) -> Result<Vec<JobSpec>, JobError> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OneOrMany {
            Many(Vec<JobSpec>),
            One(Box<JobSpec>),
        }

        match serde_json::from_str::<OneOrMany>(json) {
            Ok(OneOrMany::Many(specs)) => Ok(specs),
            Ok(OneOrMany::One(spec)) => Ok(vec![*spec]),
            Err(e) => Err(JobError::Malformed(e.to_string())),
        }
    }

    /// Applies defaults and checks every field.
    pub fn validate(self) -> Result<Job, JobError> {
        let raw_source = self.source.ok_or(JobError::MissingField("source"))?;
        let source =
            Address::parse(&raw_source).ok_or_else(|| JobError::InvalidAddress(raw_source))?;

        let tx_types = match &self.tx_types {
            Some(list) => list.resolve()?,
            None => vec![TxType::External],
        };
        if tx_types.is_empty() {
            return Err(JobError::NoTxTypes);
        }

        let range = BlockRange::new(
            self.start_block.unwrap_or(0),
            self.end_block.unwrap_or(DEFAULT_END_BLOCK),
        )?;

        let strategy = match &self.strategy {
            Some(name) => name.parse()?,
            None => StrategyKind::Redirect,
        };

        let alpha = unit_interval("alpha", self.alpha.unwrap_or(DEFAULT_ALPHA))?;
        let beta = unit_interval("beta", self.beta.unwrap_or(DEFAULT_BETA))?;

        let epsilon = self.epsilon.unwrap_or(DEFAULT_EPSILON);
        if !(epsilon.is_finite() && epsilon > 0.0) {
            return Err(JobError::ParameterOutOfRange {
                name: "epsilon",
                value: epsilon,
            });
        }

        let page_threshold = self.page_threshold.unwrap_or(DEFAULT_PAGE_THRESHOLD);
        if page_threshold == 0 {
            return Err(JobError::ZeroPageThreshold);
        }

        Ok(Job {
            source,
            tx_types,
            range,
            strategy,
            alpha,
            beta,
            epsilon,
            auto_paginate: self.auto_paginate.unwrap_or(false),
            max_retry: self.max_retry.unwrap_or(DEFAULT_MAX_RETRY),
            page_threshold,
        })
    }
}

fn unit_interval(name: &'static str, value: f64) -> Result<f64, JobError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(JobError::ParameterOutOfRange { name, value })
    }
}

/// A validated exploration job. Immutable once its task starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// The seed address whose neighbourhood is ranked.
    pub source: Address,
    /// Transaction types fetched for every node, in dispatch order.
    pub tx_types: Vec<TxType>,
    /// Full block range fetched for every newly selected node.
    pub range: BlockRange,
    pub strategy: StrategyKind,
    /// Damping parameter; its role depends on the strategy variant.
    pub alpha: f64,
    /// Restart probability: the share of a node's residual it keeps.
    pub beta: f64,
    /// Residual threshold below which a node is not expanded.
    pub epsilon: f64,
    pub auto_paginate: bool,
    /// Counted retries allowed per fetch before the node is fused.
    pub max_retry: u32,
    /// Result count at which a response is treated as a truncated page.
    pub page_threshold: usize,
}
