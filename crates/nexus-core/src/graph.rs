//! In-memory graph of one canvas with its structural invariants.
//!
//! Nodes and edges live in insertion-ordered maps; that order is the
//! canonical node ordering used to break ties elsewhere. Every mutation
//! either applies completely or returns an error with the store unchanged.

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Entity, Error, Result};
use crate::model::{
    Edge, EdgeKey, EdgeKind, NewEdge, NewNode, Node, NodeId, NodeKind, NodePatch, NodeType,
    Position,
};
use crate::policy::{GraphView, HierarchyPolicy, Proposal};

/// Point-in-time copy of every node and edge.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// Lightweight node description handed to auto-linking collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSummary {
    pub id: NodeId,
    pub title: String,
    pub summary: String,
    pub tags: BTreeSet<String>,
    pub module: String,
    pub main_topic: String,
    pub node_type: NodeType,
}

/// A deleted node together with the edges removed alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRemoval {
    pub node: Node,
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct PositionUpdate {
    pub updated: usize,
    pub unknown: Vec<NodeId>,
}

#[derive(Debug, Clone, Default)]
pub struct GraphStore {
    nodes: IndexMap<NodeId, Node>,
    edges: IndexMap<EdgeKey, Edge>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a store from stored parts, applying the same rules as live
    /// mutations. Used when loading or importing a canvas.
    pub fn from_parts(nodes: Vec<Node>, edges: Vec<Edge>) -> Result<Self> {
        let mut store = Self::new();
        for node in nodes {
            if node.id.as_str().trim().is_empty() {
                return Err(Error::invalid("node id must not be empty"));
            }
            if store.nodes.contains_key(node.id.as_str()) {
                return Err(Error::DuplicateNode(node.id));
            }
            store.nodes.insert(node.id.clone(), node);
        }
        for edge in edges {
            let key = edge.key();
            if store.edges.contains_key(&key) {
                return Err(Error::invalid(format!("duplicate edge {key}")));
            }
            require_justification(&edge.justification)?;
            check_confidence(edge.confidence)?;
            HierarchyPolicy::validate(
                &Proposal::Edge {
                    source: edge.source.as_str(),
                    target: edge.target.as_str(),
                    kind: edge.kind,
                },
                &store,
            )?;
            store.edges.insert(key, edge);
        }
        Ok(store)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn edge(&self, source: &str, target: &str) -> Option<&Edge> {
        self.edges.get(&EdgeKey::new(source, target))
    }

    /// Nodes in canonical (insertion) order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    /// Ids connected to `id` by an edge in either direction.
    pub fn neighbors<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a NodeId> + 'a {
        self.edges.values().filter_map(move |e| {
            if e.source.as_str() == id {
                Some(&e.target)
            } else if e.target.as_str() == id {
                Some(&e.source)
            } else {
                None
            }
        })
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            nodes: self.nodes.values().cloned().collect(),
            edges: self.edges.values().cloned().collect(),
        }
    }

    pub fn node_summaries(&self, exclude: Option<&str>) -> Vec<NodeSummary> {
        self.nodes
            .values()
            .filter(|n| Some(n.id.as_str()) != exclude)
            .map(|n| NodeSummary {
                id: n.id.clone(),
                title: n.title.clone(),
                summary: n.summary.clone(),
                tags: n.tags.clone(),
                module: n.module.clone(),
                main_topic: n.main_topic.clone(),
                node_type: n.node_type(),
            })
            .collect()
    }

    pub fn add_node(&mut self, new: NewNode) -> Result<NodeId> {
        let id = match &new.id {
            Some(id) if id.as_str().trim().is_empty() => {
                return Err(Error::invalid("node id must not be empty"));
            }
            Some(id) => id.clone(),
            None => loop {
                let candidate = NodeId::generate();
                if !self.nodes.contains_key(candidate.as_str()) {
                    break candidate;
                }
            },
        };
        if self.nodes.contains_key(id.as_str()) {
            return Err(Error::DuplicateNode(id));
        }
        let node = new.build(id.clone())?;
        self.nodes.insert(id.clone(), node);
        Ok(id)
    }

    /// Applies the provided fields. A type change is checked against every
    /// incident hierarchical edge first and rejected, listing the conflicting
    /// edges, if any would become illegal.
    pub fn update_node(&mut self, id: &str, patch: &NodePatch) -> Result<Node> {
        let current = self
            .nodes
            .get(id)
            .ok_or_else(|| Error::NotFound(Entity::Node(NodeId::from(id))))?;

        let mut node = current.clone();
        if let Some(new_type) = patch.node_type {
            if new_type != node.node_type() {
                HierarchyPolicy::validate(&Proposal::Retype { node: id, new_type }, &*self)?;
                node.kind = node.kind.retyped(new_type);
            }
        }
        apply_patch(&mut node, patch)?;

        let slot = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(Entity::Node(NodeId::from(id))))?;
        *slot = node.clone();
        Ok(node)
    }

    /// Removes the node and every edge it is an endpoint of.
    pub fn delete_node(&mut self, id: &str) -> Result<NodeRemoval> {
        let node = self
            .nodes
            .shift_remove(id)
            .ok_or_else(|| Error::NotFound(Entity::Node(NodeId::from(id))))?;
        let mut edges = Vec::new();
        self.edges.retain(|_, e| {
            if e.touches(id) {
                edges.push(e.clone());
                false
            } else {
                true
            }
        });
        Ok(NodeRemoval { node, edges })
    }

    /// Creates the edge, or overwrites the existing one for the same
    /// ordered pair.
    pub fn add_edge(&mut self, new: NewEdge) -> Result<Edge> {
        let justification = require_justification(&new.justification)?;
        check_confidence(new.confidence)?;
        HierarchyPolicy::validate(
            &Proposal::Edge {
                source: new.source.as_str(),
                target: new.target.as_str(),
                kind: new.kind,
            },
            &*self,
        )?;

        let edge = Edge {
            source: new.source,
            target: new.target,
            justification,
            kind: new.kind,
            confidence: new.confidence,
            created_at: chrono::Utc::now(),
        };
        self.edges.insert(edge.key(), edge.clone());
        Ok(edge)
    }

    pub fn update_edge(&mut self, source: &str, target: &str, justification: &str) -> Result<Edge> {
        let key = EdgeKey::new(source, target);
        if !self.edges.contains_key(&key) {
            return Err(Error::NotFound(Entity::Edge(key)));
        }
        let justification = require_justification(justification)?;
        let edge = self
            .edges
            .get_mut(&key)
            .ok_or_else(|| Error::NotFound(Entity::Edge(key.clone())))?;
        edge.justification = justification;
        Ok(edge.clone())
    }

    pub fn delete_edge(&mut self, source: &str, target: &str) -> Result<Edge> {
        let key = EdgeKey::new(source, target);
        self.edges
            .shift_remove(&key)
            .ok_or(Error::NotFound(Entity::Edge(key)))
    }

    /// Bulk position update; unknown ids are skipped and reported.
    pub fn set_positions(&mut self, positions: &BTreeMap<String, Position>) -> PositionUpdate {
        let mut report = PositionUpdate::default();
        for (id, pos) in positions {
            match self.nodes.get_mut(id.as_str()) {
                Some(node) => {
                    node.position = Some(*pos);
                    report.updated += 1;
                }
                None => report.unknown.push(NodeId::from(id.as_str())),
            }
        }
        report
    }
}

impl GraphView for GraphStore {
    fn node_type(&self, id: &str) -> Option<NodeType> {
        self.nodes.get(id).map(Node::node_type)
    }

    fn incident_edges<'a>(&'a self, id: &str) -> Vec<&'a Edge> {
        self.edges.values().filter(|e| e.touches(id)).collect()
    }
}

fn require_justification(text: &str) -> Result<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid("edge justification must not be empty"));
    }
    Ok(trimmed.to_string())
}

fn check_confidence(confidence: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&confidence) {
        return Err(Error::invalid(format!("confidence {confidence} is outside 0..=1")));
    }
    Ok(())
}

fn apply_patch(node: &mut Node, patch: &NodePatch) -> Result<()> {
    if let Some(description) = &patch.description {
        match &mut node.kind {
            NodeKind::Topic { description: d }
            | NodeKind::Module { description: d } => {
                *d = Some(description.clone()).filter(|s| !s.is_empty());
            }
            NodeKind::Child { .. } => {
                return Err(Error::invalid(format!(
                    "child node '{}' cannot carry a description",
                    node.id
                )));
            }
        }
    }
    if let Some(title) = &patch.title {
        node.title = title.clone();
    }
    if let Some(summary) = &patch.summary {
        node.summary = summary.clone();
    }
    if let Some(content) = &patch.content {
        node.content = content.clone();
    }
    if let Some(tags) = &patch.tags {
        node.tags = tags.clone();
    }
    if let Some(topic) = &patch.main_topic {
        node.main_topic = topic.clone();
    }
    if let Some(module) = &patch.module {
        node.module = module.clone();
    }
    if let Some(color) = &patch.color {
        node.color = Some(color.clone()).filter(|c| !c.is_empty());
    }
    if let Some(position) = patch.position {
        node.position = Some(position);
    }
    Ok(())
}

/// Hierarchical edges whose rank ordering currently fails. Always empty for
/// a store built through its own operations.
pub fn rank_violations(store: &GraphStore) -> Vec<EdgeKey> {
    store
        .edges()
        .filter(|e| e.kind == EdgeKind::Hierarchical)
        .filter(|e| {
            match (store.node_type(e.source.as_str()), store.node_type(e.target.as_str())) {
                (Some(s), Some(t)) => !HierarchyPolicy::allows(EdgeKind::Hierarchical, s, t),
                _ => true,
            }
        })
        .map(Edge::key)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Violation;

    fn seeded() -> GraphStore {
        let mut g = GraphStore::new();
        g.add_node(NewNode::new(NodeType::Topic, "Topic").id("T1")).unwrap();
        g.add_node(NewNode::new(NodeType::Module, "Module").id("M1")).unwrap();
        g.add_node(NewNode::new(NodeType::Module, "Module 2").id("M2")).unwrap();
        g.add_node(NewNode::new(NodeType::Child, "Child").id("C1")).unwrap();
        g
    }

    #[test]
    fn add_node_rejects_duplicates() {
        let mut g = seeded();
        let err = g
            .add_node(NewNode::new(NodeType::Child, "again").id("C1"))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateNode(ref id) if id.as_str() == "C1"));
        assert_eq!(g.node_count(), 4);
    }

    #[test]
    fn add_node_generates_ids() {
        let mut g = GraphStore::new();
        let a = g.add_node(NewNode::new(NodeType::Child, "a")).unwrap();
        let b = g.add_node(NewNode::new(NodeType::Child, "b")).unwrap();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("node-"));
    }

    #[test]
    fn hierarchical_edge_direction_is_enforced() {
        let mut g = seeded();
        g.add_edge(NewEdge::hierarchical("C1", "M1", "belongs to")).unwrap();
        let err = g
            .add_edge(NewEdge::hierarchical("M1", "C1", "contains"))
            .unwrap_err();
        assert_eq!(err.kind(), "HierarchyViolationError");
        assert_eq!(g.edge_count(), 1);
        assert!(g.edge("M1", "C1").is_none());
    }

    #[test]
    fn add_edge_checks_endpoints_and_loops() {
        let mut g = seeded();
        let err = g
            .add_edge(NewEdge::associative("C1", "ghost", "x"))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(Entity::Node(ref id)) if id.as_str() == "ghost"));

        let err = g.add_edge(NewEdge::associative("C1", "C1", "x")).unwrap_err();
        assert!(matches!(err, Error::SelfLoop(_)));

        let err = g.add_edge(NewEdge::associative("C1", "M1", "  ")).unwrap_err();
        assert_eq!(err.kind(), "InvalidInputError");

        let err = g
            .add_edge(NewEdge::associative("C1", "M1", "x").confidence(1.5))
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidInputError");
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn re_adding_a_pair_overwrites() {
        let mut g = seeded();
        g.add_edge(NewEdge::associative("T1", "C1", "first")).unwrap();
        g.add_edge(NewEdge::associative("T1", "C1", "second").confidence(0.4))
            .unwrap();
        assert_eq!(g.edge_count(), 1);
        let e = g.edge("T1", "C1").unwrap();
        assert_eq!(e.justification, "second");
        assert_eq!(e.confidence, 0.4);
    }

    #[test]
    fn reverse_pair_is_a_distinct_edge() {
        let mut g = seeded();
        g.add_edge(NewEdge::associative("M1", "M2", "a")).unwrap();
        g.add_edge(NewEdge::associative("M2", "M1", "b")).unwrap();
        assert_eq!(g.edge_count(), 2);
    }

    #[test]
    fn delete_node_cascades() {
        let mut g = seeded();
        g.add_edge(NewEdge::hierarchical("C1", "M1", "in")).unwrap();
        g.add_edge(NewEdge::associative("M2", "C1", "refers")).unwrap();
        g.add_edge(NewEdge::hierarchical("M1", "T1", "in")).unwrap();

        let removal = g.delete_node("C1").unwrap();
        assert_eq!(removal.node.id.as_str(), "C1");
        assert_eq!(removal.edges.len(), 2);
        assert_eq!(g.edge_count(), 1);
        assert!(g.edges().all(|e| !e.touches("C1")));

        let err = g.delete_node("C1").unwrap_err();
        assert_eq!(err.kind(), "NotFoundError");
    }

    #[test]
    fn update_node_merges_fields() {
        let mut g = seeded();
        let node = g
            .update_node("C1", &NodePatch::default().title("Renamed").module("Payments"))
            .unwrap();
        assert_eq!(node.title, "Renamed");
        assert_eq!(node.module, "Payments");
        assert_eq!(node.main_topic, "Uncategorized");
        assert_eq!(g.node("C1").unwrap().title, "Renamed");
    }

    #[test]
    fn retype_conflict_leaves_node_untouched() {
        let mut g = seeded();
        g.add_edge(NewEdge::hierarchical("C1", "M1", "in")).unwrap();

        let err = g
            .update_node("M1", &NodePatch::default().node_type(NodeType::Child).title("x"))
            .unwrap_err();
        match err {
            Error::HierarchyViolation(Violation::RetypeConflict { edges, .. }) => {
                assert_eq!(edges, vec![EdgeKey::new("C1", "M1")]);
            }
            other => panic!("unexpected {other:?}"),
        }
        let m1 = g.node("M1").unwrap();
        assert_eq!(m1.node_type(), NodeType::Module);
        assert_eq!(m1.title, "Module");
        assert!(rank_violations(&g).is_empty());
    }

    #[test]
    fn retype_without_conflict_applies() {
        let mut g = seeded();
        g.add_edge(NewEdge::hierarchical("C1", "M1", "in")).unwrap();
        let node = g
            .update_node("M1", &NodePatch::default().node_type(NodeType::Topic))
            .unwrap();
        assert_eq!(node.node_type(), NodeType::Topic);
        assert!(rank_violations(&g).is_empty());
    }

    #[test]
    fn update_and_delete_edge_require_existing_pair() {
        let mut g = seeded();
        assert_eq!(
            g.update_edge("C1", "M1", "x").unwrap_err().kind(),
            "NotFoundError"
        );
        assert_eq!(g.delete_edge("C1", "M1").unwrap_err().kind(), "NotFoundError");

        g.add_edge(NewEdge::hierarchical("C1", "M1", "in")).unwrap();
        let e = g.update_edge("C1", "M1", "  refined  ").unwrap();
        assert_eq!(e.justification, "refined");
        assert_eq!(e.kind, EdgeKind::Hierarchical);
        assert!(g.update_edge("C1", "M1", "").is_err());
        g.delete_edge("C1", "M1").unwrap();
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn snapshot_has_no_dangling_edges() {
        let mut g = seeded();
        g.add_edge(NewEdge::hierarchical("C1", "M1", "in")).unwrap();
        g.add_edge(NewEdge::hierarchical("M1", "T1", "in")).unwrap();
        g.delete_node("M1").unwrap();
        let snap = g.snapshot();
        let ids: BTreeSet<_> = snap.nodes.iter().map(|n| n.id.as_str()).collect();
        assert!(snap
            .edges
            .iter()
            .all(|e| ids.contains(e.source.as_str()) && ids.contains(e.target.as_str())));
    }

    #[test]
    fn from_parts_applies_policy() {
        let mut g = seeded();
        g.add_edge(NewEdge::hierarchical("C1", "M1", "in")).unwrap();
        let snap = g.snapshot();
        let rebuilt = GraphStore::from_parts(snap.nodes.clone(), snap.edges.clone()).unwrap();
        assert_eq!(rebuilt.snapshot(), snap);

        let mut bad = snap.edges.clone();
        bad[0].source = NodeId::from("M1");
        bad[0].target = NodeId::from("C1");
        let err = GraphStore::from_parts(snap.nodes.clone(), bad).unwrap_err();
        assert_eq!(err.kind(), "HierarchyViolationError");

        let mut dangling = snap.edges.clone();
        dangling[0].target = NodeId::from("gone");
        assert_eq!(
            GraphStore::from_parts(snap.nodes, dangling).unwrap_err().kind(),
            "NotFoundError"
        );
    }

    #[test]
    fn from_parts_applies_edge_field_rules() {
        let mut g = seeded();
        g.add_edge(NewEdge::associative("C1", "T1", "related")).unwrap();
        let snap = g.snapshot();

        let mut blank = snap.edges.clone();
        blank[0].justification = "   ".into();
        assert_eq!(
            GraphStore::from_parts(snap.nodes.clone(), blank).unwrap_err().kind(),
            "InvalidInputError"
        );

        let mut overconfident = snap.edges.clone();
        overconfident[0].confidence = 1.5;
        assert_eq!(
            GraphStore::from_parts(snap.nodes.clone(), overconfident)
                .unwrap_err()
                .kind(),
            "InvalidInputError"
        );

        let mut nameless = snap.nodes.clone();
        nameless[0].id = NodeId::from("");
        assert_eq!(
            GraphStore::from_parts(nameless, Vec::new()).unwrap_err().kind(),
            "InvalidInputError"
        );
    }

    #[test]
    fn positions_skip_unknown_ids() {
        let mut g = seeded();
        let mut positions = BTreeMap::new();
        positions.insert("C1".to_string(), Position { x: 1.0, y: 2.0 });
        positions.insert("nope".to_string(), Position { x: 0.0, y: 0.0 });
        let report = g.set_positions(&positions);
        assert_eq!(report.updated, 1);
        assert_eq!(report.unknown, vec![NodeId::from("nope")]);
        assert_eq!(g.node("C1").unwrap().position, Some(Position { x: 1.0, y: 2.0 }));
    }

    #[test]
    fn summaries_exclude_requested_node() {
        let g = seeded();
        let summaries = g.node_summaries(Some("C1"));
        assert_eq!(summaries.len(), 3);
        assert!(summaries.iter().all(|s| s.id.as_str() != "C1"));
    }
}
