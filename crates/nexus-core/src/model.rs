//! Node, edge and identifier types of the knowledge graph.

use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Stable node identifier, unique within one canvas.
    NodeId
);
string_id!(
    /// Canvas identifier; also the canvas's storage namespace.
    CanvasId
);
string_id!(
    /// Chat session identifier.
    SessionId
);

impl NodeId {
    /// Fresh id for nodes created without one.
    pub fn generate() -> Self {
        Self(format!("node-{}", Uuid::new_v4().simple()))
    }
}

/// Hierarchy level of a node. Lower rank sits higher in the hierarchy.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Topic,
    Module,
    #[default]
    Child,
}

impl NodeType {
    pub fn rank(self) -> u8 {
        match self {
            NodeType::Topic => 0,
            NodeType::Module => 1,
            NodeType::Child => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Topic => "topic",
            NodeType::Module => "module",
            NodeType::Child => "child",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "topic" => Ok(NodeType::Topic),
            "module" => Ok(NodeType::Module),
            "child" => Ok(NodeType::Child),
            other => Err(Error::invalid(format!(
                "unknown node type '{other}' (expected topic, module or child)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, schemars::JsonSchema)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// How an ingested child node was produced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Document,
    Text,
    Image,
    Video,
    Link,
    Expansion,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, schemars::JsonSchema)]
pub struct NodeSource {
    pub kind: SourceKind,
    /// Filename, URL or parent node id, depending on `kind`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

/// Per-type payload of a node, tagged by `node_type` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "node_type", rename_all = "snake_case")]
pub enum NodeKind {
    Topic {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Module {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Child {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<NodeSource>,
    },
}

impl NodeKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeKind::Topic { .. } => NodeType::Topic,
            NodeKind::Module { .. } => NodeType::Module,
            NodeKind::Child { .. } => NodeType::Child,
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            NodeKind::Topic { description } | NodeKind::Module { description } => {
                description.as_deref()
            }
            NodeKind::Child { .. } => None,
        }
    }

    /// Converts to another type. Topic and module share `description`;
    /// anything else starts empty.
    pub(crate) fn retyped(self, to: NodeType) -> NodeKind {
        if self.node_type() == to {
            return self;
        }
        let description = self.description().map(str::to_string);
        match to {
            NodeType::Topic => NodeKind::Topic { description },
            NodeType::Module => NodeKind::Module { description },
            NodeType::Child => NodeKind::Child { source: None },
        }
    }
}

pub(crate) fn default_main_topic() -> String {
    "Uncategorized".to_string()
}

pub(crate) fn default_module() -> String {
    "General".to_string()
}

/// A node in the knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: NodeId,
    #[serde(flatten)]
    pub kind: NodeKind,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default = "default_main_topic")]
    pub main_topic: String,
    #[serde(default = "default_module")]
    pub module: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Node {
    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }
}

/// Input for [`GraphStore::add_node`](crate::GraphStore::add_node).
#[derive(Debug, Clone, Default)]
pub struct NewNode {
    pub id: Option<NodeId>,
    pub node_type: NodeType,
    pub title: String,
    pub summary: String,
    pub content: String,
    pub tags: BTreeSet<String>,
    pub main_topic: Option<String>,
    pub module: Option<String>,
    pub color: Option<String>,
    pub position: Option<Position>,
    /// Topic and module nodes only.
    pub description: Option<String>,
    /// Child nodes only.
    pub source: Option<NodeSource>,
}

impl NewNode {
    pub fn new(node_type: NodeType, title: impl Into<String>) -> Self {
        Self {
            node_type,
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn id(mut self, id: impl Into<NodeId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn main_topic(mut self, topic: impl Into<String>) -> Self {
        self.main_topic = Some(topic.into());
        self
    }

    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn position(mut self, x: f64, y: f64) -> Self {
        self.position = Some(Position { x, y });
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn source(mut self, kind: SourceKind, origin: Option<String>) -> Self {
        self.source = Some(NodeSource { kind, origin });
        self
    }

    /// Builds the node, rejecting per-type fields on the wrong type.
    pub(crate) fn build(self, id: NodeId) -> Result<Node> {
        let kind = match self.node_type {
            NodeType::Topic | NodeType::Module if self.source.is_some() => {
                return Err(Error::invalid(format!(
                    "{} node '{id}' cannot carry an ingestion source",
                    self.node_type
                )));
            }
            NodeType::Child if self.description.is_some() => {
                return Err(Error::invalid(format!(
                    "child node '{id}' cannot carry a description"
                )));
            }
            NodeType::Topic => NodeKind::Topic {
                description: self.description,
            },
            NodeType::Module => NodeKind::Module {
                description: self.description,
            },
            NodeType::Child => NodeKind::Child {
                source: self.source,
            },
        };
        Ok(Node {
            id,
            kind,
            title: self.title,
            summary: self.summary,
            content: self.content,
            tags: self.tags,
            main_topic: self.main_topic.unwrap_or_else(default_main_topic),
            module: self.module.unwrap_or_else(default_module),
            color: self.color.filter(|c| !c.is_empty()),
            position: self.position,
            created_at: Utc::now(),
        })
    }
}

/// Partial node update: only `Some` fields are applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodePatch {
    #[serde(default)]
    pub node_type: Option<NodeType>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tags: Option<BTreeSet<String>>,
    #[serde(default)]
    pub main_topic: Option<String>,
    #[serde(default)]
    pub module: Option<String>,
    /// An empty string clears the override.
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub position: Option<Position>,
    /// Topic and module nodes only.
    #[serde(default)]
    pub description: Option<String>,
}

impl NodePatch {
    pub fn is_empty(&self) -> bool {
        *self == NodePatch::default()
    }

    pub fn node_type(mut self, node_type: NodeType) -> Self {
        self.node_type = Some(node_type);
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Rank-constrained containment: child -> module -> topic.
    Hierarchical,
    /// Manually justified link with no rank constraint.
    #[default]
    Associative,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EdgeKind::Hierarchical => "hierarchical",
            EdgeKind::Associative => "associative",
        })
    }
}

/// Ordered `(source, target)` pair; at most one edge exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    pub source: NodeId,
    pub target: NodeId,
}

impl EdgeKey {
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' -> '{}'", self.source, self.target)
    }
}

fn default_confidence() -> f64 {
    1.0
}

/// A directed, justified edge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    pub justification: String,
    #[serde(default)]
    pub kind: EdgeKind,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Edge {
    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            source: self.source.clone(),
            target: self.target.clone(),
        }
    }

    pub fn touches(&self, id: &str) -> bool {
        self.source.as_str() == id || self.target.as_str() == id
    }
}

/// Input for [`GraphStore::add_edge`](crate::GraphStore::add_edge).
#[derive(Debug, Clone)]
pub struct NewEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub justification: String,
    pub kind: EdgeKind,
    pub confidence: f64,
}

impl NewEdge {
    pub fn new(
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
        justification: impl Into<String>,
        kind: EdgeKind,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            justification: justification.into(),
            kind,
            confidence: default_confidence(),
        }
    }

    pub fn hierarchical(
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
        justification: impl Into<String>,
    ) -> Self {
        Self::new(source, target, justification, EdgeKind::Hierarchical)
    }

    pub fn associative(
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
        justification: impl Into<String>,
    ) -> Self {
        Self::new(source, target, justification, EdgeKind::Associative)
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }
}
