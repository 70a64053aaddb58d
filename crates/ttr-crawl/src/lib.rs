//! TTR Crawl - drives explorations against a transaction history provider
//!
//! The [`Orchestrator`] holds every running exploration and decides, for
//! each fetch outcome, what to fetch next: forward pagination on full
//! pages, block-range bisection on oversized queries, delayed resends on
//! rate limits and bounded retries on everything else. The [`Crawler`]
//! carries those decisions out concurrently against a [`Fetcher`] and
//! writes the resulting [`Record`]s to a [`RecordSink`].
//!
//! # Example
//!
//! ```no_run
//! use ttr_core::JobSpec;
//! use ttr_crawl::{CrawlConfig, Crawler, EtherscanFetcher, JsonLinesSink, Orchestrator};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CrawlConfig::default();
//! let mut orchestrator = Orchestrator::new();
//! orchestrator.accept(vec![JobSpec::for_source(
//!     "0x00000000000000000000000000000000000000aa",
//! )])?;
//!
//! let mut sink = JsonLinesSink::new(std::io::stdout());
//! let summary = Crawler::new(EtherscanFetcher::new(&config)?, orchestrator)
//!     .run(&mut sink)
//!     .await?;
//! println!("{} edges confirmed", summary.confirmed_edges);
//! # Ok(())
//! # }
//! ```

mod config;
mod driver;
mod error;
mod etherscan;
mod fetcher;
mod orchestrator;
mod records;
mod request;

pub use config::{ConfigError, CrawlConfig, API_KEY_ENV, STATE_DIR};
pub use driver::{CrawlSummary, Crawler, DEFAULT_MAX_CONCURRENT_REQUESTS};
pub use error::CrawlError;
pub use etherscan::{is_fresh, EtherscanFetcher};
pub use fetcher::Fetcher;
pub use orchestrator::{Action, Orchestrator};
pub use records::{JobInfo, JsonLinesSink, MemorySink, Record, RecordSink, SinkError, StoreSink};
pub use request::FetchRequest;
