//! Crawl-level errors.
//!
//! Fetch failures never show up here. They are handled node by node inside
//! the orchestrator. What remains is misconfiguration and I/O around the
//! crawl itself.

use crate::config::ConfigError;
use crate::records::SinkError;
use thiserror::Error;
use ttr_core::{Address, JobError};

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("invalid job #{index}: {source}")]
    Job {
        index: usize,
        #[source]
        source: JobError,
    },

    #[error("job for {0} uses the price strategy but no price table is configured")]
    MissingPriceOracle(Address),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}
