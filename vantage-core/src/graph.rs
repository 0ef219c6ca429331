// In-memory topology graph backing the virtual network cache

use crate::model::{Element, ElementRef, GraphEdge, GraphNode};
use petgraph::stable_graph::{NodeIndex, StableUnGraph};
use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

/// Result of upserting a single edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeUpsert {
    Inserted,
    Replaced,
    MissingEndpoint,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeStats {
    pub nodes_inserted: usize,
    pub nodes_replaced: usize,
    pub edges_inserted: usize,
    pub edges_replaced: usize,
    pub edges_skipped: usize,
}

impl MergeStats {
    pub fn changed(&self) -> usize {
        self.nodes_inserted + self.nodes_replaced + self.edges_inserted + self.edges_replaced
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollapseStats {
    pub nodes_removed: usize,
    pub edges_removed: usize,
}

/// Undirected labeled graph keyed by node id.
///
/// Nodes are unique by id and edges by unordered endpoint pair; every insert is
/// an upsert. Removing a node drops its incident edges with it.
#[derive(Debug, Clone, Default)]
pub struct TopologyGraph {
    graph: StableUnGraph<GraphNode, GraphEdge>,
    index: HashMap<String, NodeIndex>,
}

impl TopologyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.index.get(id).and_then(|&idx| self.graph.node_weight(idx))
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn edge(&self, a: &str, b: &str) -> Option<&GraphEdge> {
        let (&ia, &ib) = (self.index.get(a)?, self.index.get(b)?);
        self.graph
            .find_edge(ia, ib)
            .and_then(|e| self.graph.edge_weight(e))
    }

    /// Insert a node, or replace every attribute of the node with the same id.
    /// Returns true when the id was new.
    pub fn upsert_node(&mut self, node: GraphNode) -> bool {
        match self.index.get(&node.id) {
            Some(&idx) => {
                self.graph[idx] = node;
                false
            }
            None => {
                let id = node.id.clone();
                let idx = self.graph.add_node(node);
                self.index.insert(id, idx);
                true
            }
        }
    }

    pub fn upsert_edge(&mut self, edge: GraphEdge) -> EdgeUpsert {
        let (Some(&source), Some(&target)) =
            (self.index.get(&edge.source), self.index.get(&edge.target))
        else {
            return EdgeUpsert::MissingEndpoint;
        };

        match self.graph.find_edge(source, target) {
            Some(existing) => {
                self.graph[existing] = edge;
                EdgeUpsert::Replaced
            }
            None => {
                self.graph.add_edge(source, target, edge);
                EdgeUpsert::Inserted
            }
        }
    }

    pub fn remove_node(&mut self, id: &str) -> bool {
        match self.index.remove(id) {
            Some(idx) => self.graph.remove_node(idx).is_some(),
            None => false,
        }
    }

    pub fn remove_edge(&mut self, a: &str, b: &str) -> bool {
        let (Some(&ia), Some(&ib)) = (self.index.get(a), self.index.get(b)) else {
            return false;
        };
        match self.graph.find_edge(ia, ib) {
            Some(edge) => self.graph.remove_edge(edge).is_some(),
            None => false,
        }
    }

    /// Apply a batch of upserts: all nodes first, then all edges.
    pub fn merge(&mut self, elements: &[Element]) -> MergeStats {
        let mut stats = MergeStats::default();

        for node in elements.iter().filter_map(Element::as_node) {
            if self.upsert_node(node.clone()) {
                stats.nodes_inserted += 1;
            } else {
                stats.nodes_replaced += 1;
            }
        }

        for edge in elements.iter().filter_map(Element::as_edge) {
            match self.upsert_edge(edge.clone()) {
                EdgeUpsert::Inserted => stats.edges_inserted += 1,
                EdgeUpsert::Replaced => stats.edges_replaced += 1,
                EdgeUpsert::MissingEndpoint => {
                    warn!(
                        "Skipping edge {} ({} - {}): endpoint not in cache",
                        edge.id, edge.source, edge.target
                    );
                    stats.edges_skipped += 1;
                }
            }
        }

        stats
    }

    /// Remove the referenced edges and nodes. Unknown references are ignored.
    pub fn collapse(&mut self, targets: &[ElementRef]) -> CollapseStats {
        let mut stats = CollapseStats::default();

        for target in targets {
            match target {
                ElementRef::Edge { source, target } => {
                    if self.remove_edge(source, target) {
                        stats.edges_removed += 1;
                    }
                }
                ElementRef::Node { id } => {
                    let before = self.edge_count();
                    if self.remove_node(id) {
                        stats.nodes_removed += 1;
                        stats.edges_removed += before - self.edge_count();
                    }
                }
            }
        }

        stats
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.graph
            .node_indices()
            .filter_map(|idx| self.graph.node_weight(idx))
    }

    pub fn edges(&self) -> impl Iterator<Item = &GraphEdge> {
        self.graph
            .edge_indices()
            .filter_map(|idx| self.graph.edge_weight(idx))
    }

    /// Every node followed by every edge.
    pub fn elements(&self) -> Vec<Element> {
        self.nodes()
            .cloned()
            .map(Element::Node)
            .chain(self.edges().cloned().map(Element::Edge))
            .collect()
    }

    pub fn clear(&mut self) {
        self.graph.clear();
        self.index.clear();
    }
}
