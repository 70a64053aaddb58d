//! Neighbour weighting per strategy variant.
//!
//! Each variant turns a node's edges into shares over its counterparties.
//! Shares sum to 1; an empty map means the node is dangling and keeps its
//! propagated mass. Maps are ordered by address so the float arithmetic
//! that consumes them is order-stable.

use super::frontier::Frontier;
use crate::price::PriceOracle;
use std::collections::BTreeMap;
use ttr_core::{Address, Direction, Edge, StrategyKind};

pub(crate) type Shares = BTreeMap<Address, f64>;

pub(crate) struct WeightContext<'a> {
    pub kind: StrategyKind,
    pub alpha: f64,
    pub node: &'a Address,
    pub frontier: &'a Frontier,
    pub oracle: Option<&'a dyn PriceOracle>,
}

/// Splits a node's propagated mass over its counterparties.
pub(crate) fn neighbour_shares(ctx: &WeightContext<'_>, edges: &[Edge]) -> Shares {
    let node = ctx.node;
    let everyone = |_: &Address| true;

    match ctx.kind {
        StrategyKind::Base => normalize(side(node, edges, Direction::Outgoing, everyone, |e| {
            e.value
        })),

        StrategyKind::Weight => both_sides(ctx, edges, everyone, |e| e.value),

        StrategyKind::Time => {
            let recency = Recency::of(node, edges);
            both_sides(ctx, edges, everyone, |e| e.value * recency.factor(e))
        }

        StrategyKind::Redirect => {
            let unsettled = |cp: &Address| !ctx.frontier.is_settled(cp);
            both_sides(ctx, edges, unsettled, |e| e.value)
        }

        StrategyKind::Price => both_sides(ctx, edges, everyone, |e| {
            let price = ctx
                .oracle
                .and_then(|oracle| oracle.price(e.contract.as_ref(), e.block_number, e.timestamp))
                .unwrap_or(0.0);
            e.value * price
        }),

        StrategyKind::Alpha => alpha_blend(ctx, edges),
    }
}

/// Weighted counterparties on one side of `node`.
fn side<K, W>(node: &Address, edges: &[Edge], direction: Direction, keep: K, weight: W) -> Shares
where
    K: Fn(&Address) -> bool,
    W: Fn(&Edge) -> f64,
{
    let mut weights = Shares::new();
    for edge in edges {
        if edge.direction(node) != Some(direction) {
            continue;
        }
        let Some(counterparty) = edge.counterparty(node) else {
            continue;
        };
        if !keep(counterparty) {
            continue;
        }
        let w = weight(edge);
        if w.is_finite() && w > 0.0 {
            *weights.entry(counterparty.clone()).or_insert(0.0) += w;
        }
    }
    weights
}

/// Outgoing side gets `1 - alpha`, incoming side `alpha`; a missing side
/// hands its share to the other.
fn both_sides<K, W>(ctx: &WeightContext<'_>, edges: &[Edge], keep: K, weight: W) -> Shares
where
    K: Fn(&Address) -> bool,
    W: Fn(&Edge) -> f64,
{
    let outgoing = normalize(side(ctx.node, edges, Direction::Outgoing, &keep, &weight));
    let incoming = normalize(side(ctx.node, edges, Direction::Incoming, &keep, &weight));

    match (outgoing.is_empty(), incoming.is_empty()) {
        (true, true) => Shares::new(),
        (false, true) => outgoing,
        (true, false) => incoming,
        (false, false) => {
            let mut shares = Shares::new();
            for (cp, share) in outgoing {
                *shares.entry(cp).or_insert(0.0) += (1.0 - ctx.alpha) * share;
            }
            for (cp, share) in incoming {
                *shares.entry(cp).or_insert(0.0) += ctx.alpha * share;
            }
            shares.retain(|_, share| *share > 0.0);
            shares
        }
    }
}

/// Outgoing counterparties weighted `alpha / n + (1 - alpha) * value share`.
fn alpha_blend(ctx: &WeightContext<'_>, edges: &[Edge]) -> Shares {
    let counterparties: Shares = edges
        .iter()
        .filter(|e| e.direction(ctx.node) == Some(Direction::Outgoing))
        .filter_map(|e| e.counterparty(ctx.node))
        .map(|cp| (cp.clone(), 0.0))
        .collect();
    if counterparties.is_empty() {
        return Shares::new();
    }

    let by_value = normalize(side(
        ctx.node,
        edges,
        Direction::Outgoing,
        |_| true,
        |e| e.value,
    ));
    let uniform = ctx.alpha / counterparties.len() as f64;

    let blended = counterparties
        .into_keys()
        .map(|cp| {
            let value_share = by_value.get(&cp).copied().unwrap_or(0.0);
            let share = uniform + (1.0 - ctx.alpha) * value_share;
            (cp, share)
        })
        .collect();
    normalize(blended)
}

/// Scales weights to sum to 1, dropping non-positive entries.
fn normalize(mut weights: Shares) -> Shares {
    weights.retain(|_, w| w.is_finite() && *w > 0.0);
    let total: f64 = weights.values().sum();
    if total <= 0.0 {
        return Shares::new();
    }
    for w in weights.values_mut() {
        *w /= total;
    }
    weights
}

/// Linear recency over the timestamps of one batch: the oldest edge
/// weighs `1 / (span + 1)`, the newest weighs 1.
struct Recency {
    oldest: u64,
    span: u64,
}

impl Recency {
    fn of(node: &Address, edges: &[Edge]) -> Self {
        let touching = edges.iter().filter(|e| e.direction(node).is_some());
        let (oldest, newest) = touching.fold((u64::MAX, 0), |(lo, hi), e| {
            (lo.min(e.timestamp), hi.max(e.timestamp))
        });
        if oldest > newest {
            return Self { oldest: 0, span: 0 };
        }
        Self {
            oldest,
            span: newest - oldest,
        }
    }

    fn factor(&self, edge: &Edge) -> f64 {
        let age = edge.timestamp.saturating_sub(self.oldest);
        (age + 1) as f64 / (self.span + 1) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::price::StaticPriceTable;
    use crate::strategy::frontier::FrontierPolicy;
    use ttr_core::TxType;

    fn edge(from: &str, to: &str, value: f64) -> Edge {
        Edge::new(format!("{from}-{to}"), TxType::External, from, to, value)
    }

    fn shares_for(kind: StrategyKind, alpha: f64, edges: &[Edge], frontier: &Frontier) -> Shares {
        let node = Address::new("a");
        let ctx = WeightContext {
            kind,
            alpha,
            node: &node,
            frontier,
            oracle: None,
        };
        neighbour_shares(&ctx, edges)
    }

    fn share(shares: &Shares, node: &str) -> f64 {
        shares.get(&Address::new(node)).copied().unwrap_or(0.0)
    }

    #[test]
    fn test_base_is_value_proportional_outgoing() {
        let frontier = Frontier::new(FrontierPolicy::LargestResidual);
        let edges = vec![edge("a", "b", 10.0), edge("a", "c", 30.0), edge("d", "a", 50.0)];
        let shares = shares_for(StrategyKind::Base, 0.15, &edges, &frontier);

        assert_eq!(shares.len(), 2);
        assert!((share(&shares, "b") - 0.25).abs() < 1e-12);
        assert!((share(&shares, "c") - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_weight_splits_by_alpha() {
        let frontier = Frontier::new(FrontierPolicy::LargestResidual);
        let edges = vec![edge("a", "b", 10.0), edge("d", "a", 50.0)];
        let shares = shares_for(StrategyKind::Weight, 0.2, &edges, &frontier);

        assert!((share(&shares, "b") - 0.8).abs() < 1e-12);
        assert!((share(&shares, "d") - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_weight_single_side_takes_everything() {
        let frontier = Frontier::new(FrontierPolicy::LargestResidual);
        let edges = vec![edge("d", "a", 5.0), edge("e", "a", 15.0)];
        let shares = shares_for(StrategyKind::Weight, 0.2, &edges, &frontier);

        assert!((share(&shares, "d") - 0.25).abs() < 1e-12);
        assert!((share(&shares, "e") - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_time_favours_recent_edges() {
        let frontier = Frontier::new(FrontierPolicy::BreadthFirst);
        let edges = vec![
            edge("a", "old", 1.0).at_block(1, 100),
            edge("a", "new", 1.0).at_block(2, 199),
        ];
        let shares = shares_for(StrategyKind::Time, 0.15, &edges, &frontier);

        // Factors 1/100 and 100/100.
        assert!((share(&shares, "old") - 1.0 / 101.0).abs() < 1e-12);
        assert!((share(&shares, "new") - 100.0 / 101.0).abs() < 1e-12);
    }

    #[test]
    fn test_redirect_skips_settled_counterparties() {
        let mut frontier = Frontier::new(FrontierPolicy::LargestResidual);
        frontier.mark_selected(&Address::new("b"));
        let edges = vec![edge("a", "b", 10.0), edge("a", "c", 30.0)];
        let shares = shares_for(StrategyKind::Redirect, 0.15, &edges, &frontier);

        assert_eq!(shares.len(), 1);
        assert!((share(&shares, "c") - 1.0).abs() < 1e-12);

        frontier.mark_fused(&Address::new("c"));
        assert!(shares_for(StrategyKind::Redirect, 0.15, &edges, &frontier).is_empty());
    }

    #[test]
    fn test_price_uses_oracle_and_drops_unpriced() {
        let frontier = Frontier::new(FrontierPolicy::LargestResidual);
        let table = StaticPriceTable::new()
            .with_native_price(2.0)
            .with_token_price(Address::new("0xusdt"), 1.0);
        let edges = vec![
            edge("a", "b", 10.0),
            edge("a", "c", 10.0).with_token("USDT", "0xusdt"),
            edge("a", "d", 10.0).with_token("JUNK", "0xjunk"),
        ];
        let node = Address::new("a");
        let ctx = WeightContext {
            kind: StrategyKind::Price,
            alpha: 0.15,
            node: &node,
            frontier: &frontier,
            oracle: Some(&table),
        };
        let shares = neighbour_shares(&ctx, &edges);

        assert!((share(&shares, "b") - 2.0 / 3.0).abs() < 1e-12);
        assert!((share(&shares, "c") - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(share(&shares, "d"), 0.0);
    }

    #[test]
    fn test_alpha_blends_uniform_and_value() {
        let frontier = Frontier::new(FrontierPolicy::LargestResidual);
        let edges = vec![edge("a", "b", 10.0), edge("a", "c", 30.0), edge("a", "z", 0.0)];
        let shares = shares_for(StrategyKind::Alpha, 0.3, &edges, &frontier);

        // uniform 0.1 each, value part 0.7 * {0.25, 0.75, 0}
        assert!((share(&shares, "b") - (0.1 + 0.175)).abs() < 1e-12);
        assert!((share(&shares, "c") - (0.1 + 0.525)).abs() < 1e-12);
        assert!((share(&shares, "z") - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_no_usable_edges_is_dangling() {
        let frontier = Frontier::new(FrontierPolicy::LargestResidual);
        let edges = vec![edge("a", "a", 10.0), edge("x", "y", 3.0)];
        for kind in StrategyKind::ALL {
            assert!(shares_for(kind, 0.15, &edges, &frontier).is_empty());
        }
    }
}
