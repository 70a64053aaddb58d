//! Fetch continuations.

use serde::{Deserialize, Serialize};
use std::fmt;
use ttr_core::{Address, BlockRange, TxType};
use ttr_graph::TaskId;

/// Everything needed to issue one fetch and to react to its outcome.
///
/// A request is handed to the fetcher and comes back unchanged with the
/// result, so the orchestrator never has to remember what it dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub task: TaskId,
    pub node: Address,
    pub tx_type: TxType,
    pub range: BlockRange,
    /// Residual the node held when it was selected.
    pub residual: f64,
    /// Counted retries spent on this fetch so far.
    pub retry: u32,
}

impl FetchRequest {
    pub fn new(task: TaskId, node: Address, tx_type: TxType, range: BlockRange, residual: f64) -> Self {
        Self {
            task,
            node,
            tx_type,
            range,
            residual,
            retry: 0,
        }
    }

    /// The same fetch with one more retry spent.
    pub fn retried(&self) -> Self {
        Self {
            retry: self.retry + 1,
            ..self.clone()
        }
    }

    /// The same node and type over a different block range, with a fresh
    /// retry budget.
    pub fn with_range(&self, range: BlockRange) -> Self {
        Self {
            range,
            retry: 0,
            ..self.clone()
        }
    }
}

impl fmt::Display for FetchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "task {} {} {} {}",
            self.task, self.node, self.tx_type, self.range
        )
    }
}
