//! Exploration tasks.
//!
//! A task is one seed address being explored: its job, its strategy and
//! the number of fetches still outstanding for the node being resolved.
//!
//! ```text
//! Idle ──await_all──▶ Resolving ──last resolve──▶ Settling ──pop──▶ Idle
//!                      │   ▲                                   │
//!                      └───┘ await_more (pagination, splits)   └─▶ Done
//! ```
//!
//! The task is locked while fetches are outstanding. Pushing while locked
//! would settle a node on a partial edge set, so it is rejected.

use crate::price::PriceOracle;
use crate::strategy::{FrontierItem, Strategy};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;
use ttr_core::{Address, Edge, Job};

/// Identifies a task inside one crawl.
pub type TaskId = usize;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("task {task} is locked with {pending} fetches outstanding")]
    Locked { task: TaskId, pending: usize },

    #[error("task {0} has no outstanding fetch to resolve")]
    NotPending(TaskId),
}

/// One seed-address exploration.
pub struct ExplorationTask {
    id: TaskId,
    job: Job,
    strategy: Strategy,
    pending: usize,
}

impl ExplorationTask {
    pub fn new(id: TaskId, job: Job) -> Self {
        let strategy = Strategy::from_job(&job);
        Self {
            id,
            job,
            strategy,
            pending: 0,
        }
    }

    pub fn with_price_oracle(mut self, oracle: Arc<dyn PriceOracle>) -> Self {
        self.strategy = self.strategy.with_price_oracle(oracle);
        self
    }

    /// Selects the source as the first node.
    pub fn seed(&mut self) -> FrontierItem {
        self.strategy.seed()
    }

    /// Declares one fetch per transaction type for a newly selected node.
    pub fn await_all(&mut self) {
        if self.pending != 0 {
            warn!(
                "Task {} starting a new node with {} fetches still outstanding",
                self.id, self.pending
            );
        }
        self.pending = self.job.tx_types.len();
    }

    /// Declares `count` more fetches for the current node.
    pub fn await_more(&mut self, count: usize) {
        self.pending += count;
    }

    /// Records one fetch reaching a terminal outcome. Returns how many are
    /// still outstanding.
    pub fn resolve(&mut self) -> Result<usize, TaskError> {
        if self.pending == 0 {
            return Err(TaskError::NotPending(self.id));
        }
        self.pending -= 1;
        Ok(self.pending)
    }

    /// Pushes the node's complete edge set into the strategy.
    pub fn push(&mut self, node: &Address, edges: Vec<Edge>) -> Result<Vec<Edge>, TaskError> {
        if self.is_locked() {
            return Err(TaskError::Locked {
                task: self.id,
                pending: self.pending,
            });
        }
        Ok(self.strategy.push(node, edges))
    }

    pub fn pop(&mut self) -> Option<FrontierItem> {
        self.strategy.pop()
    }

    pub fn fuse(&mut self, node: &Address) -> Option<FrontierItem> {
        self.strategy.fuse(node)
    }

    /// Whether fetches for the current node are still outstanding.
    pub fn is_locked(&self) -> bool {
        self.pending > 0
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    pub fn importance(&self) -> &HashMap<Address, f64> {
        self.strategy.importance()
    }

    pub fn residuals(&self) -> &HashMap<Address, f64> {
        self.strategy.residuals()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ttr_core::{JobSpec, TxType, TxTypeList};

    const SOURCE: &str = "0x00000000000000000000000000000000000000aa";

    fn task_with_types(types: &str) -> ExplorationTask {
        let mut spec = JobSpec::for_source(SOURCE);
        spec.tx_types = Some(TxTypeList::Joined(types.to_string()));
        spec.strategy = Some("base".to_string());
        ExplorationTask::new(0, spec.validate().unwrap())
    }

    #[test]
    fn test_lock_follows_pending_count() {
        let mut task = task_with_types("external,internal,erc20");
        assert!(!task.is_locked());

        task.await_all();
        assert!(task.is_locked());
        assert_eq!(task.pending(), 3);

        task.await_more(2);
        assert_eq!(task.pending(), 5);

        for remaining in (0..5).rev() {
            assert!(task.is_locked());
            assert_eq!(task.resolve(), Ok(remaining));
        }
        assert!(!task.is_locked());
        assert_eq!(task.resolve(), Err(TaskError::NotPending(0)));
    }

    #[test]
    fn test_push_rejected_while_locked() {
        let mut task = task_with_types("external,internal");
        let seed = task.seed();
        task.await_all();
        task.resolve().unwrap();

        let edge = Edge::new("0x1", TxType::External, SOURCE, "0xbb", 1.0);
        assert_eq!(
            task.push(&seed.node, vec![edge.clone()]),
            Err(TaskError::Locked { task: 0, pending: 1 })
        );
        // Nothing was settled by the rejected push.
        assert_eq!(task.strategy().importance_of(&seed.node), 0.0);

        task.resolve().unwrap();
        let confirmed = task.push(&seed.node, vec![edge]).unwrap();
        assert_eq!(confirmed.len(), 1);
        assert!((task.importance()[&seed.node] - 0.7).abs() < 1e-12);
        assert_eq!(task.pop().unwrap().node, Address::new("0xbb"));
    }
}
