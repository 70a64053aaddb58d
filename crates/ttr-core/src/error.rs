//! Error types for job acceptance and provider responses.

use thiserror::Error;

/// A job description that cannot start an exploration.
///
/// These are the only fatal errors in the system, and they are raised
/// before any fetch is dispatched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    #[error("job is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid source address: {0:?}")]
    InvalidAddress(String),

    #[error("unknown strategy variant: {0}")]
    UnknownStrategy(String),

    #[error("unknown transaction type: {0}")]
    UnknownTxType(String),

    #[error("job must combine at least one transaction type")]
    NoTxTypes,

    #[error("invalid block range: start {start} is after end {end}")]
    InvalidRange { start: u64, end: u64 },

    #[error("parameter `{name}` = {value} is out of range")]
    ParameterOutOfRange { name: &'static str, value: f64 },

    #[error("page threshold must be positive")]
    ZeroPageThreshold,

    #[error("malformed job description: {0}")]
    Malformed(String),
}

/// A failed fetch, classified from the provider's error payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The provider refused to page past its result window.
    #[error("result window too large: {0}")]
    OversizedResult(String),

    /// The provider timed out on the query; a narrower block range may work.
    #[error("query too large: {0}")]
    QueryTooLarge(String),

    /// The shared API quota is exhausted for now.
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("provider error: {0}")]
    Transient(String),

    /// The body did not have the expected shape.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Classifies a provider status message.
    ///
    /// Anything unrecognised is a [`FetchError::Transient`].
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("query timeout") {
            Self::QueryTooLarge(message.to_string())
        } else if lower.contains("rate limit") {
            Self::RateLimited(message.to_string())
        } else if lower.contains("result window is too large") {
            Self::OversizedResult(message.to_string())
        } else {
            Self::Transient(message.to_string())
        }
    }

    /// Whether recovery means narrowing the block range.
    pub fn needs_split(&self) -> bool {
        matches!(self, Self::OversizedResult(_) | Self::QueryTooLarge(_))
    }

    /// Whether a retry of this error is charged against the retry budget.
    pub fn counts_against_budget(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Malformed(_))
    }
}
