//! Local-push ranking strategies.
//!
//! A Gauss–Southwell style approximation of personalized PageRank where
//! the graph is discovered while ranking: each push is driven by the
//! freshly fetched transactions of one node instead of a precomputed
//! adjacency matrix.
//!
//! Two vectors are kept per exploration:
//! - `p`: settled importance. Only ever grows.
//! - `r`: residual mass not yet propagated.
//!
//! `sum(p) + sum(r)` stays at the seed mass of 1.0 except when a node is
//! fused, which discards its residual.

mod frontier;
mod weighting;

pub use frontier::FrontierPolicy;

use frontier::Frontier;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use ttr_core::{Address, Edge, Job, StrategyKind};
use weighting::{neighbour_shares, WeightContext};

use crate::price::PriceOracle;

/// The personalized PageRank mass placed on the seed.
const SEED_MASS: f64 = 1.0;

/// A node selected for expansion and the residual it carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontierItem {
    pub node: Address,
    pub residual: f64,
}

/// One exploration's ranking state.
pub struct Strategy {
    kind: StrategyKind,
    source: Address,
    alpha: f64,
    beta: f64,
    epsilon: f64,
    p: HashMap<Address, f64>,
    r: HashMap<Address, f64>,
    frontier: Frontier,
    oracle: Option<Arc<dyn PriceOracle>>,
}

impl Strategy {
    /// Creates a strategy with all mass on `source`.
    pub fn new(kind: StrategyKind, source: Address, alpha: f64, beta: f64, epsilon: f64) -> Self {
        let mut frontier = Frontier::new(FrontierPolicy::from(kind));
        frontier.discover(&source);

        let mut r = HashMap::new();
        r.insert(source.clone(), SEED_MASS);

        Self {
            kind,
            source,
            alpha,
            beta,
            epsilon,
            p: HashMap::new(),
            r,
            frontier,
            oracle: None,
        }
    }

    pub fn from_job(job: &Job) -> Self {
        Self::new(
            job.strategy,
            job.source.clone(),
            job.alpha,
            job.beta,
            job.epsilon,
        )
    }

    /// Sets the oracle used by [`StrategyKind::Price`] to value edges.
    pub fn with_price_oracle(mut self, oracle: Arc<dyn PriceOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Selects the source as the first node to expand.
    ///
    /// The seed is expanded with its full mass whatever epsilon is.
    pub fn seed(&mut self) -> FrontierItem {
        self.frontier.mark_selected(&self.source);
        FrontierItem {
            node: self.source.clone(),
            residual: self.residual_of(&self.source),
        }
    }

    /// Distributes `node`'s residual over the counterparties in `edges`.
    ///
    /// `edges` must be the node's complete edge set for this round. The
    /// node keeps `beta` of its residual as importance; the rest goes to
    /// its counterparties by the variant's weights, or stays with the node
    /// when it has none. Returns the edges as confirmed, or an empty list
    /// when there were none.
    pub fn push(&mut self, node: &Address, edges: Vec<Edge>) -> Vec<Edge> {
        let residual = self.r.remove(node).unwrap_or(0.0);

        if edges.is_empty() {
            debug!("Settling {} locally: no edges", node);
            self.settle(node, residual);
            return Vec::new();
        }

        let shares = {
            let ctx = WeightContext {
                kind: self.kind,
                alpha: self.alpha,
                node,
                frontier: &self.frontier,
                oracle: self.oracle.as_deref(),
            };
            neighbour_shares(&ctx, &edges)
        };

        let propagated = (1.0 - self.beta) * residual;
        if shares.is_empty() {
            debug!("Settling {} locally: no weighted counterparties", node);
            self.settle(node, residual);
            return edges;
        }

        self.settle(node, self.beta * residual);
        for (neighbour, share) in shares {
            self.frontier.discover(&neighbour);
            *self.r.entry(neighbour).or_insert(0.0) += propagated * share;
        }

        edges
    }

    /// Selects the next node to expand, or `None` when exploration is done.
    pub fn pop(&mut self) -> Option<FrontierItem> {
        let (node, residual) = self.frontier.select(&self.r, self.epsilon)?;
        self.frontier.mark_selected(&node);
        Some(FrontierItem { node, residual })
    }

    /// Removes a node that cannot be fetched and moves on.
    ///
    /// Its residual is discarded rather than settled, so a failed node
    /// gains no importance. Returns the next node to expand.
    pub fn fuse(&mut self, node: &Address) -> Option<FrontierItem> {
        let dropped = self.r.remove(node).unwrap_or(0.0);
        debug!("Fusing {} and dropping residual {}", node, dropped);
        self.frontier.mark_fused(node);
        self.pop()
    }

    fn settle(&mut self, node: &Address, mass: f64) {
        *self.p.entry(node.clone()).or_insert(0.0) += mass;
    }

    /// The importance vector `p`.
    pub fn importance(&self) -> &HashMap<Address, f64> {
        &self.p
    }

    /// The residual vector `r`.
    pub fn residuals(&self) -> &HashMap<Address, f64> {
        &self.r
    }

    pub fn importance_of(&self, node: &Address) -> f64 {
        self.p.get(node).copied().unwrap_or(0.0)
    }

    pub fn residual_of(&self, node: &Address) -> f64 {
        self.r.get(node).copied().unwrap_or(0.0)
    }

    /// `sum(p) + sum(r)`.
    pub fn total_mass(&self) -> f64 {
        self.settled_mass() + self.r.values().sum::<f64>()
    }

    /// `sum(p)`.
    pub fn settled_mass(&self) -> f64 {
        self.p.values().sum()
    }

    /// Importance sorted highest first, ties by address.
    pub fn ranked(&self) -> Vec<(Address, f64)> {
        let mut ranked: Vec<(Address, f64)> =
            self.p.iter().map(|(node, score)| (node.clone(), *score)).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
    }

    /// Nodes selected for expansion so far, the seed included.
    pub fn selected_count(&self) -> usize {
        self.frontier.selected_count()
    }

    pub fn fused_count(&self) -> usize {
        self.frontier.fused_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ttr_core::TxType;

    fn addr(name: &str) -> Address {
        Address::new(name)
    }

    fn edge(from: &str, to: &str, value: f64) -> Edge {
        Edge::new(format!("{from}-{to}"), TxType::External, from, to, value)
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_base_push_scenario() {
        let mut strategy = Strategy::new(StrategyKind::Base, addr("a"), 0.15, 0.7, 1e-3);
        let seed = strategy.seed();
        assert_eq!(seed, FrontierItem { node: addr("a"), residual: 1.0 });

        let edges = vec![edge("a", "b", 10.0), edge("a", "c", 30.0)];
        let confirmed = strategy.push(&addr("a"), edges.clone());

        assert_eq!(confirmed, edges);
        assert!(close(strategy.importance_of(&addr("a")), 0.7));
        assert!(close(strategy.residual_of(&addr("a")), 0.0));
        assert!(close(strategy.residual_of(&addr("b")), 0.075));
        assert!(close(strategy.residual_of(&addr("c")), 0.225));
    }

    #[test]
    fn test_pop_largest_residual_first() {
        let mut strategy = Strategy::new(StrategyKind::Base, addr("a"), 0.15, 0.7, 1e-3);
        strategy.seed();
        strategy.push(&addr("a"), vec![edge("a", "b", 10.0), edge("a", "c", 30.0)]);

        assert_eq!(strategy.pop().unwrap().node, addr("c"));
        assert_eq!(strategy.pop().unwrap().node, addr("b"));
        assert!(strategy.pop().is_none());
    }

    #[test]
    fn test_zero_edge_push_settles_locally() {
        let mut strategy = Strategy::new(StrategyKind::Weight, addr("a"), 0.15, 0.7, 1e-3);
        strategy.seed();

        let confirmed = strategy.push(&addr("a"), Vec::new());
        assert!(confirmed.is_empty());
        assert!(close(strategy.importance_of(&addr("a")), 1.0));
        assert!(strategy.pop().is_none());
    }

    #[test]
    fn test_dangling_node_keeps_propagated_mass() {
        // Only incoming edges and the base variant looks outward only.
        let mut strategy = Strategy::new(StrategyKind::Base, addr("a"), 0.15, 0.7, 1e-3);
        strategy.seed();

        let confirmed = strategy.push(&addr("a"), vec![edge("x", "a", 5.0)]);
        assert_eq!(confirmed.len(), 1);
        assert!(close(strategy.importance_of(&addr("a")), 1.0));
        assert!(strategy.residuals().values().all(|r| *r == 0.0));
    }

    #[test]
    fn test_mass_conservation_without_fuse() {
        for kind in [
            StrategyKind::Base,
            StrategyKind::Weight,
            StrategyKind::Time,
            StrategyKind::Redirect,
            StrategyKind::Alpha,
        ] {
            let mut strategy = Strategy::new(kind, addr("a"), 0.15, 0.7, 1e-4);
            strategy.seed();
            strategy.push(
                &addr("a"),
                vec![
                    edge("a", "b", 3.0).at_block(1, 10),
                    edge("c", "a", 1.0).at_block(2, 20),
                    edge("a", "d", 6.0).at_block(3, 30),
                ],
            );

            let mut steps = 0;
            while let Some(item) = strategy.pop() {
                let node = item.node.as_str().to_string();
                let edges = vec![
                    edge(&node, "e", 2.0).at_block(4, 40),
                    edge("f", &node, 1.0).at_block(5, 50),
                ];
                strategy.push(&item.node, edges);
                assert!(
                    close(strategy.total_mass(), 1.0),
                    "{kind} lost mass: {}",
                    strategy.total_mass()
                );
                steps += 1;
                assert!(steps < 100);
            }
        }
    }

    #[test]
    fn test_importance_is_monotonic() {
        let mut strategy = Strategy::new(StrategyKind::Weight, addr("a"), 0.5, 0.6, 1e-4);
        strategy.seed();
        strategy.push(&addr("a"), vec![edge("a", "b", 1.0), edge("b", "a", 1.0)]);

        let mut previous: HashMap<Address, f64> = strategy.importance().clone();
        while let Some(item) = strategy.pop() {
            let node = item.node.as_str().to_string();
            strategy.push(&item.node, vec![edge(&node, "a", 1.0), edge(&node, "b", 1.0)]);
            for (node, before) in &previous {
                assert!(strategy.importance_of(node) >= *before);
            }
            previous = strategy.importance().clone();
        }
    }

    #[test]
    fn test_fuse_discards_residual_and_continues() {
        let mut strategy = Strategy::new(StrategyKind::Base, addr("a"), 0.15, 0.7, 1e-3);
        strategy.seed();
        strategy.push(&addr("a"), vec![edge("a", "b", 10.0), edge("a", "c", 30.0)]);

        let first = strategy.pop().unwrap();
        assert_eq!(first.node, addr("c"));

        let next = strategy.fuse(&addr("c")).unwrap();
        assert_eq!(next.node, addr("b"));
        assert_eq!((strategy.selected_count(), strategy.fused_count()), (2, 1));
        assert!(close(strategy.total_mass(), 1.0 - 0.225));
        assert_eq!(strategy.importance_of(&addr("c")), 0.0);
    }

    #[test]
    fn test_epsilon_stops_expansion() {
        let mut strategy = Strategy::new(StrategyKind::Base, addr("a"), 0.15, 0.7, 0.1);
        strategy.seed();
        strategy.push(&addr("a"), vec![edge("a", "b", 10.0), edge("a", "c", 30.0)]);

        // b holds 0.075 which is below epsilon.
        assert_eq!(strategy.pop().unwrap().node, addr("c"));
        assert!(strategy.pop().is_none());
    }

    #[test]
    fn test_deterministic_replay() {
        let run = || {
            let mut strategy = Strategy::new(StrategyKind::Redirect, addr("a"), 0.15, 0.7, 1e-3);
            strategy.seed();
            strategy.push(
                &addr("a"),
                vec![edge("a", "b", 1.0), edge("a", "c", 1.0), edge("d", "a", 1.0)],
            );
            let mut order = Vec::new();
            let mut next = strategy.pop();
            while let Some(item) = next {
                order.push(item.node.clone());
                next = if item.node == addr("c") {
                    strategy.fuse(&item.node)
                } else {
                    let node = item.node.as_str().to_string();
                    strategy.push(&item.node, vec![edge(&node, "e", 1.0)]);
                    strategy.pop()
                };
            }
            (order, strategy.ranked())
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn test_ranked_order() {
        let mut strategy = Strategy::new(StrategyKind::Base, addr("a"), 0.15, 0.5, 1e-3);
        strategy.seed();
        strategy.push(&addr("a"), vec![edge("a", "b", 1.0)]);
        let item = strategy.pop().unwrap();
        strategy.push(&item.node, Vec::new());

        let ranked = strategy.ranked();
        assert_eq!(ranked[0], (addr("a"), 0.5));
        assert_eq!(ranked[1], (addr("b"), 0.5));
    }
}
