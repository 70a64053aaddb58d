//! Frontier selection.
//!
//! The frontier is not a separate queue: every node holding residual above
//! epsilon that was never selected and never fused is a candidate, and the
//! policy picks one. Discovery order is recorded so every comparison is
//! total and two identical runs pick identical nodes.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use ttr_core::{Address, StrategyKind};

/// How the next node to expand is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrontierPolicy {
    /// Largest residual first, earliest discovered on ties.
    LargestResidual,
    /// Earliest discovered first.
    BreadthFirst,
}

impl From<StrategyKind> for FrontierPolicy {
    fn from(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::Time => FrontierPolicy::BreadthFirst,
            _ => FrontierPolicy::LargestResidual,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Frontier {
    policy: FrontierPolicy,
    /// Discovery sequence number per node.
    sequence: HashMap<Address, u64>,
    next_sequence: u64,
    selected: HashSet<Address>,
    fused: HashSet<Address>,
}

impl Frontier {
    pub(crate) fn new(policy: FrontierPolicy) -> Self {
        Self {
            policy,
            sequence: HashMap::new(),
            next_sequence: 0,
            selected: HashSet::new(),
            fused: HashSet::new(),
        }
    }

    /// Records the first time a node receives residual.
    pub(crate) fn discover(&mut self, node: &Address) {
        if !self.sequence.contains_key(node) {
            self.sequence.insert(node.clone(), self.next_sequence);
            self.next_sequence += 1;
        }
    }

    pub(crate) fn mark_selected(&mut self, node: &Address) {
        self.discover(node);
        self.selected.insert(node.clone());
    }

    pub(crate) fn mark_fused(&mut self, node: &Address) {
        self.fused.insert(node.clone());
    }

    /// Whether the node was already selected or fused.
    pub(crate) fn is_settled(&self, node: &Address) -> bool {
        self.selected.contains(node) || self.fused.contains(node)
    }

    pub(crate) fn selected_count(&self) -> usize {
        self.selected.len()
    }

    pub(crate) fn fused_count(&self) -> usize {
        self.fused.len()
    }

    /// Picks the highest-priority candidate from `residuals`.
    pub(crate) fn select(
        &self,
        residuals: &HashMap<Address, f64>,
        epsilon: f64,
    ) -> Option<(Address, f64)> {
        residuals
            .iter()
            .filter(|(node, residual)| **residual > epsilon && !self.is_settled(node))
            .min_by(|a, b| self.compare((a.0, *a.1), (b.0, *b.1)))
            .map(|(node, residual)| (node.clone(), *residual))
    }

    /// `Less` means `a` is expanded before `b`.
    fn compare(&self, a: (&Address, f64), b: (&Address, f64)) -> Ordering {
        let by_sequence = self.sequence_of(a.0).cmp(&self.sequence_of(b.0));
        let ordering = match self.policy {
            FrontierPolicy::LargestResidual => b.1.total_cmp(&a.1).then(by_sequence),
            FrontierPolicy::BreadthFirst => by_sequence,
        };
        ordering.then_with(|| a.0.cmp(b.0))
    }

    fn sequence_of(&self, node: &Address) -> u64 {
        self.sequence.get(node).copied().unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn residuals(entries: &[(&str, f64)]) -> HashMap<Address, f64> {
        entries
            .iter()
            .map(|(node, r)| (Address::new(node), *r))
            .collect()
    }

    #[test]
    fn test_largest_residual_with_discovery_tie_break() {
        let mut frontier = Frontier::new(FrontierPolicy::LargestResidual);
        for node in ["c", "b", "a"] {
            frontier.discover(&Address::new(node));
        }

        let r = residuals(&[("a", 0.2), ("b", 0.2), ("c", 0.1)]);
        // a and b tie; b was discovered first.
        assert_eq!(frontier.select(&r, 1e-3).unwrap().0, Address::new("b"));
    }

    #[test]
    fn test_breadth_first_ignores_residual() {
        let mut frontier = Frontier::new(FrontierPolicy::BreadthFirst);
        for node in ["c", "b", "a"] {
            frontier.discover(&Address::new(node));
        }

        let r = residuals(&[("a", 0.9), ("b", 0.2), ("c", 0.1)]);
        assert_eq!(frontier.select(&r, 1e-3).unwrap().0, Address::new("c"));
    }

    #[test]
    fn test_skips_settled_and_small() {
        let mut frontier = Frontier::new(FrontierPolicy::LargestResidual);
        frontier.mark_selected(&Address::new("a"));
        frontier.discover(&Address::new("b"));
        frontier.discover(&Address::new("c"));
        frontier.mark_fused(&Address::new("b"));

        let r = residuals(&[("a", 0.9), ("b", 0.5), ("c", 1e-4)]);
        assert!(frontier.select(&r, 1e-3).is_none());
    }
}
