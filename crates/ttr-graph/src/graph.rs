//! The confirmed transaction subgraph.
//!
//! TxGraph wraps petgraph and indexes nodes by address. It is built from
//! the edges a crawl confirmed and is what gets exported and summarised
//! after the ranking finishes.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use ttr_core::{Address, Edge, TxType};

/// A transfer as stored on a graph edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub hash: String,
    pub tx_type: TxType,
    pub value: f64,
    pub symbol: String,
    pub block_number: u64,
}

impl From<&Edge> for Transfer {
    fn from(edge: &Edge) -> Self {
        Self {
            hash: edge.hash.clone(),
            tx_type: edge.tx_type,
            value: edge.value,
            symbol: edge.symbol.clone(),
            block_number: edge.block_number,
        }
    }
}

/// A flattened edge for export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: Address,
    pub target: Address,
    pub tx_type: TxType,
    pub hash: String,
    pub value: f64,
    pub symbol: String,
}

/// Summary counts for status output.
#[derive(Debug, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub tx_types: Vec<TxType>,
}

/// Directed multigraph of confirmed transfers.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TxGraph {
    graph: DiGraph<Address, Transfer>,
    index: HashMap<Address, NodeIndex>,
}

impl TxGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from confirmed edges.
    pub fn from_edges<'a>(edges: impl IntoIterator<Item = &'a Edge>) -> Self {
        let mut graph = Self::new();
        for edge in edges {
            graph.add_edge(edge);
        }
        graph
    }

    /// Returns the node for `address`, adding it if needed.
    pub fn add_node(&mut self, address: &Address) -> NodeIndex {
        if let Some(index) = self.index.get(address) {
            return *index;
        }
        let index = self.graph.add_node(address.clone());
        self.index.insert(address.clone(), index);
        index
    }

    pub fn add_edge(&mut self, edge: &Edge) {
        let from = self.add_node(&edge.from);
        let to = self.add_node(&edge.to);
        self.graph.add_edge(from, to, Transfer::from(edge));
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Addresses that sent to or received from `address`, sorted.
    pub fn counterparties(&self, address: &Address) -> Vec<&Address> {
        let Some(index) = self.index.get(address) else {
            return Vec::new();
        };
        let neighbours: BTreeSet<&Address> = self
            .graph
            .neighbors_directed(*index, Direction::Outgoing)
            .chain(self.graph.neighbors_directed(*index, Direction::Incoming))
            .filter_map(|idx| self.graph.node_weight(idx))
            .filter(|neighbour| *neighbour != address)
            .collect();
        neighbours.into_iter().collect()
    }

    /// Returns all edges with endpoint addresses for export.
    pub fn export_edges(&self) -> Vec<GraphEdge> {
        self.graph
            .edge_references()
            .filter_map(|edge_ref| {
                let source = self.graph.node_weight(edge_ref.source())?.clone();
                let target = self.graph.node_weight(edge_ref.target())?.clone();
                let transfer = edge_ref.weight();
                Some(GraphEdge {
                    source,
                    target,
                    tx_type: transfer.tx_type,
                    hash: transfer.hash.clone(),
                    value: transfer.value,
                    symbol: transfer.symbol.clone(),
                })
            })
            .collect()
    }

    pub fn stats(&self) -> GraphStats {
        let tx_types: BTreeSet<TxType> = self.graph.edge_weights().map(|t| t.tx_type).collect();
        GraphStats {
            node_count: self.node_count(),
            edge_count: self.edge_count(),
            tx_types: tx_types.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(from: &str, to: &str, value: f64) -> Edge {
        Edge::new(format!("{from}{to}"), TxType::External, from, to, value)
    }

    #[test]
    fn test_nodes_are_shared_by_address() {
        let edges = vec![edge("a", "b", 1.0), edge("b", "c", 2.0), edge("a", "b", 3.0)];
        let graph = TxGraph::from_edges(&edges);

        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 3);
    }

    #[test]
    fn test_counterparties_both_directions() {
        let edges = vec![edge("a", "b", 1.0), edge("c", "a", 2.0), edge("a", "a", 1.0)];
        let graph = TxGraph::from_edges(&edges);

        let names: Vec<&str> = graph
            .counterparties(&Address::new("a"))
            .into_iter()
            .map(Address::as_str)
            .collect();
        assert_eq!(names, vec!["b", "c"]);
        assert!(graph.counterparties(&Address::new("zz")).is_empty());
    }

    #[test]
    fn test_export_and_stats() {
        let mut nft = edge("b", "c", 1.0);
        nft.tx_type = TxType::Erc721;
        let edges = vec![edge("a", "b", 1.0), nft];
        let graph = TxGraph::from_edges(&edges);

        let exported = graph.export_edges();
        assert_eq!(exported.len(), 2);
        assert_eq!(exported[0].source, Address::new("a"));
        assert_eq!(exported[1].tx_type, TxType::Erc721);

        let stats = graph.stats();
        assert_eq!(stats.node_count, 3);
        assert_eq!(stats.tx_types, vec![TxType::External, TxType::Erc721]);
    }
}
