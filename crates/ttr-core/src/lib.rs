//! TTR Core - the transaction model shared by every TTR crate
//!
//! This crate knows what a transaction edge looks like, how an exploration
//! job is described, and how a transaction history provider reports its
//! results and failures. It does no ranking and no I/O.
//!
//! # Example
//!
//! ```
//! use ttr_core::{JobSpec, StrategyKind};
//!
//! let mut spec = JobSpec::for_source("0x00000000000000000000000000000000000000aa");
//! spec.strategy = Some("TTRBase".to_string());
//! let job = spec.validate().unwrap();
//! assert_eq!(job.strategy, StrategyKind::Base);
//! ```

mod address;
mod edge;
mod error;
mod job;
mod parser;
mod tx;

pub use address::Address;
pub use edge::{Direction, Edge, EdgeKey};
pub use error::{FetchError, JobError};
pub use job::{Job, JobSpec, StrategyKind, TxTypeList};
pub use parser::{parse_response, parse_value};
pub use tx::{BlockRange, TxType};
