//! Hierarchy rules, independent of storage.
//!
//! The same checks guard live mutations in [`GraphStore`](crate::GraphStore)
//! and bulk loading of a stored canvas through
//! [`GraphStore::from_parts`](crate::GraphStore::from_parts).

use crate::model::{Edge, EdgeKey, EdgeKind, NodeId, NodeType};

/// Read-only view of a graph, as much as the policy needs.
pub trait GraphView {
    fn node_type(&self, id: &str) -> Option<NodeType>;
    fn incident_edges<'a>(&'a self, id: &str) -> Vec<&'a Edge>;
}

/// A change to validate before it is applied.
#[derive(Debug, Clone, Copy)]
pub enum Proposal<'a> {
    Edge {
        source: &'a str,
        target: &'a str,
        kind: EdgeKind,
    },
    Retype {
        node: &'a str,
        new_type: NodeType,
    },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Violation {
    #[error("node '{0}' cannot be linked to itself")]
    SelfLoop(NodeId),

    #[error("node '{0}' does not exist")]
    DanglingEndpoint(NodeId),

    #[error(
        "hierarchical edge must point up the hierarchy, but '{from}' ({from_type}) -> '{to}' ({to_type}) does not"
    )]
    RankOrder {
        from: NodeId,
        from_type: NodeType,
        to: NodeId,
        to_type: NodeType,
    },

    #[error("retyping '{node}' to {new_type} would invalidate {} hierarchical edge(s)", .edges.len())]
    RetypeConflict {
        node: NodeId,
        new_type: NodeType,
        edges: Vec<EdgeKey>,
    },
}

/// Rank table: topic=0 < module=1 < child=2. A hierarchical edge must go
/// from a higher rank number to a strictly lower one.
pub struct HierarchyPolicy;

impl HierarchyPolicy {
    /// Whether an edge of `kind` may connect nodes of these types.
    pub fn allows(kind: EdgeKind, source: NodeType, target: NodeType) -> bool {
        match kind {
            EdgeKind::Associative => true,
            EdgeKind::Hierarchical => source.rank() > target.rank(),
        }
    }

    pub fn validate<V: GraphView + ?Sized>(
        proposal: &Proposal<'_>,
        view: &V,
    ) -> Result<(), Violation> {
        match *proposal {
            Proposal::Edge {
                source,
                target,
                kind,
            } => Self::validate_edge(source, target, kind, view),
            Proposal::Retype { node, new_type } => Self::validate_retype(node, new_type, view),
        }
    }

    fn validate_edge<V: GraphView + ?Sized>(
        source: &str,
        target: &str,
        kind: EdgeKind,
        view: &V,
    ) -> Result<(), Violation> {
        if source == target {
            return Err(Violation::SelfLoop(NodeId::from(source)));
        }
        let from_type = view
            .node_type(source)
            .ok_or_else(|| Violation::DanglingEndpoint(NodeId::from(source)))?;
        let to_type = view
            .node_type(target)
            .ok_or_else(|| Violation::DanglingEndpoint(NodeId::from(target)))?;
        if !Self::allows(kind, from_type, to_type) {
            return Err(Violation::RankOrder {
                from: NodeId::from(source),
                from_type,
                to: NodeId::from(target),
                to_type,
            });
        }
        Ok(())
    }

    fn validate_retype<V: GraphView + ?Sized>(
        node: &str,
        new_type: NodeType,
        view: &V,
    ) -> Result<(), Violation> {
        if view.node_type(node).is_none() {
            return Err(Violation::DanglingEndpoint(NodeId::from(node)));
        }
        let type_of = |id: &str| {
            if id == node {
                Some(new_type)
            } else {
                view.node_type(id)
            }
        };

        let mut conflicts: Vec<EdgeKey> = view
            .incident_edges(node)
            .into_iter()
            .filter(|e| e.kind == EdgeKind::Hierarchical)
            .filter(|e| {
                match (type_of(e.source.as_str()), type_of(e.target.as_str())) {
                    (Some(s), Some(t)) => !Self::allows(EdgeKind::Hierarchical, s, t),
                    _ => true,
                }
            })
            .map(Edge::key)
            .collect();

        if conflicts.is_empty() {
            return Ok(());
        }
        conflicts.sort();
        Err(Violation::RetypeConflict {
            node: NodeId::from(node),
            new_type,
            edges: conflicts,
        })
    }
}
