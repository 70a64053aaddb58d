//! TTR Graph - Transaction Trust Rank over a discovered neighbourhood
//!
//! This crate holds the ranking side of an exploration. A [`Strategy`]
//! keeps the importance and residual vectors of one seed address and
//! applies a local-push approximation of personalized PageRank as each
//! node's transactions become known. An [`ExplorationTask`] wraps one
//! strategy with its job and the count of fetches still outstanding for
//! the node being resolved.
//!
//! # Example
//!
//! ```
//! use ttr_core::{Address, Edge, StrategyKind, TxType};
//! use ttr_graph::Strategy;
//!
//! let a = Address::new("a");
//! let mut strategy = Strategy::new(StrategyKind::Base, a.clone(), 0.15, 0.7, 1e-3);
//! let seed = strategy.seed();
//! assert_eq!(seed.residual, 1.0);
//!
//! strategy.push(&a, vec![Edge::new("0x1", TxType::External, "a", "b", 10.0)]);
//! let next = strategy.pop().unwrap();
//! assert_eq!(next.node, Address::new("b"));
//! ```

mod graph;
mod price;
mod store;
mod strategy;
mod task;

pub use graph::{GraphEdge, GraphStats, Transfer, TxGraph};
pub use price::{CachedPriceOracle, PriceOracle, StaticPriceTable};
pub use store::{ResultStore, StoreError, StoredSnapshot};
pub use strategy::{FrontierItem, FrontierPolicy, Strategy};
pub use task::{ExplorationTask, TaskError, TaskId};
