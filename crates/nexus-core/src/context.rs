//! Bounded context extraction around a node selection.
//!
//! Reachability ignores edge direction: a child's parent and a parent's
//! children are both context. The directional rules only apply at write
//! time.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::graph::GraphStore;
use crate::model::{Edge, Node, NodeId};

/// How far context expands from the selection.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
    schemars::JsonSchema,
)]
pub enum DepthMode {
    /// Selected nodes only.
    F0,
    /// Selection plus direct neighbours.
    F1,
    /// Selection plus everything within two hops.
    F2,
}

impl DepthMode {
    pub fn hops(self) -> usize {
        match self {
            DepthMode::F0 => 0,
            DepthMode::F1 => 1,
            DepthMode::F2 => 2,
        }
    }
}

impl fmt::Display for DepthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{}", self.hops())
    }
}

impl TryFrom<u8> for DepthMode {
    type Error = Error;

    fn try_from(depth: u8) -> Result<Self> {
        match depth {
            0 => Ok(DepthMode::F0),
            1 => Ok(DepthMode::F1),
            2 => Ok(DepthMode::F2),
            other => Err(Error::invalid(format!(
                "depth {other} is not supported (expected 0, 1 or 2)"
            ))),
        }
    }
}

impl FromStr for DepthMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix('F')
            .or_else(|| trimmed.strip_prefix('f'))
            .unwrap_or(trimmed);
        digits
            .parse::<u8>()
            .map_err(|_| Error::invalid(format!("unknown depth mode '{s}'")))
            .and_then(DepthMode::try_from)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextStats {
    pub node_count: usize,
    pub edge_count: usize,
}

/// The materialised context subgraph. Owns its data, so it stays valid
/// while the store keeps changing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextResult {
    /// Context nodes ordered by id.
    pub nodes: Vec<Node>,
    /// Edges with both endpoints in context, ordered by `(source, target)`.
    pub edges: Vec<Edge>,
    /// Most frequent `module` label among context nodes.
    pub dominant_module: String,
    pub stats: ContextStats,
}

impl ContextResult {
    pub fn node_ids(&self) -> BTreeSet<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n.id.as_str() == id)
    }
}

/// Normalises a selection: ids are de-duplicated and sorted.
pub fn normalize_selection<I, S>(selected: I) -> BTreeSet<NodeId>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    selected
        .into_iter()
        .map(|s| NodeId::from(s.as_ref()))
        .collect()
}

pub struct ContextEngine;

impl ContextEngine {
    /// Computes the context for `selected` at `depth`.
    ///
    /// Fails with [`Error::EmptySelection`] for an empty selection and with
    /// [`Error::UnknownNode`] (naming the smallest missing id) if any selected
    /// id is absent. Unknown ids are never dropped silently.
    pub fn compute<I, S>(graph: &GraphStore, selected: I, depth: DepthMode) -> Result<ContextResult>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let seeds = normalize_selection(selected);
        if seeds.is_empty() {
            return Err(Error::EmptySelection);
        }
        if let Some(missing) = seeds.iter().find(|id| !graph.contains_node(id.as_str())) {
            return Err(Error::UnknownNode(missing.clone()));
        }

        let mut reached: HashSet<&str> = seeds.iter().map(NodeId::as_str).collect();
        if depth.hops() > 0 {
            let adjacency = undirected_adjacency(graph);
            let mut frontier: Vec<&str> = reached.iter().copied().collect();
            for _ in 0..depth.hops() {
                let mut next = Vec::new();
                for id in &frontier {
                    for &neighbor in adjacency.get(id).into_iter().flatten() {
                        if reached.insert(neighbor) {
                            next.push(neighbor);
                        }
                    }
                }
                if next.is_empty() {
                    break;
                }
                frontier = next;
            }
        }

        // Canonical order first: the dominant-module tie-break depends on it.
        let canonical: Vec<&Node> = graph
            .nodes()
            .filter(|n| reached.contains(n.id.as_str()))
            .collect();
        let dominant_module = dominant_module(&canonical);

        let mut nodes: Vec<Node> = canonical.into_iter().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let mut edges: Vec<Edge> = graph
            .edges()
            .filter(|e| reached.contains(e.source.as_str()) && reached.contains(e.target.as_str()))
            .cloned()
            .collect();
        edges.sort_by(|a, b| (&a.source, &a.target).cmp(&(&b.source, &b.target)));

        let stats = ContextStats {
            node_count: nodes.len(),
            edge_count: edges.len(),
        };
        Ok(ContextResult {
            nodes,
            edges,
            dominant_module,
            stats,
        })
    }
}

fn undirected_adjacency(graph: &GraphStore) -> HashMap<&str, Vec<&str>> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in graph.edges() {
        adjacency
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
        adjacency
            .entry(edge.target.as_str())
            .or_default()
            .push(edge.source.as_str());
    }
    adjacency
}

/// Most frequent module label; ties go to the label seen first.
fn dominant_module(nodes: &[&Node]) -> String {
    let mut counts: IndexMap<&str, usize> = IndexMap::new();
    for node in nodes {
        *counts.entry(node.module.as_str()).or_insert(0) += 1;
    }
    let mut best: Option<(&str, usize)> = None;
    for (module, count) in counts {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((module, count));
        }
    }
    best.map(|(m, _)| m.to_string()).unwrap_or_default()
}
