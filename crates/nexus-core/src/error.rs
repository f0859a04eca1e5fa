//! Error types shared by every nexus-core component.

use std::fmt;

use crate::model::{CanvasId, EdgeKey, NodeId, SessionId};
use crate::policy::Violation;

/// Result type for core operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The thing a [`Error::NotFound`] refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    Node(NodeId),
    Edge(EdgeKey),
    Canvas(CanvasId),
    Session(SessionId),
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Node(id) => write!(f, "node '{id}'"),
            Entity::Edge(key) => write!(f, "edge {key}"),
            Entity::Canvas(id) => write!(f, "canvas '{id}'"),
            Entity::Session(id) => write!(f, "chat session '{id}'"),
        }
    }
}

/// Errors returned by graph, context and canvas operations.
///
/// Every failing operation leaves state untouched: nothing is partially
/// applied and no best-effort result is returned.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Referenced node, edge, canvas or session is absent.
    #[error("{0} not found")]
    NotFound(Entity),

    /// A node with this id already exists in the canvas.
    #[error("node '{0}' already exists")]
    DuplicateNode(NodeId),

    /// A hierarchical edge or node retype breaks the rank ordering.
    #[error("hierarchy violation: {0}")]
    HierarchyViolation(Violation),

    /// An edge from a node to itself was requested.
    #[error("node '{0}' cannot be linked to itself")]
    SelfLoop(NodeId),

    /// Context was requested for an empty selection.
    #[error("context selection is empty")]
    EmptySelection,

    /// A selected id is not present in the canvas being queried.
    #[error("selected node '{0}' does not exist in this canvas")]
    UnknownNode(NodeId),

    /// The default canvas cannot be deleted.
    #[error("canvas '{0}' is protected and cannot be deleted")]
    ProtectedCanvas(CanvasId),

    /// Durable read or write failed.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// Malformed argument (empty justification, bad depth, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Taxonomy name surfaced to API consumers alongside the message.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NotFoundError",
            Error::DuplicateNode(_) => "DuplicateNodeError",
            Error::HierarchyViolation(_) => "HierarchyViolationError",
            Error::SelfLoop(_) => "SelfLoopError",
            Error::EmptySelection => "EmptySelectionError",
            Error::UnknownNode(_) => "UnknownNodeError",
            Error::ProtectedCanvas(_) => "ProtectedCanvasError",
            Error::Persistence(_) => "PersistenceError",
            Error::InvalidInput(_) => "InvalidInputError",
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }
}

impl From<Violation> for Error {
    fn from(v: Violation) -> Self {
        match v {
            Violation::SelfLoop(id) => Error::SelfLoop(id),
            Violation::DanglingEndpoint(id) => Error::NotFound(Entity::Node(id)),
            other => Error::HierarchyViolation(other),
        }
    }
}

/// A durable read or write failed.
///
/// The message names the operation and the canvas but never a filesystem
/// path; paths are only emitted through `tracing`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to {op}{}: {reason}", canvas_suffix(.canvas))]
pub struct PersistenceError {
    pub op: &'static str,
    pub canvas: Option<CanvasId>,
    pub reason: String,
}

fn canvas_suffix(canvas: &Option<CanvasId>) -> String {
    match canvas {
        Some(id) => format!(" for canvas '{id}'"),
        None => String::new(),
    }
}

impl PersistenceError {
    pub fn new(op: &'static str, canvas: Option<&CanvasId>, reason: impl Into<String>) -> Self {
        Self {
            op,
            canvas: canvas.cloned(),
            reason: reason.into(),
        }
    }

    pub fn io(op: &'static str, canvas: Option<&CanvasId>, err: &std::io::Error) -> Self {
        Self::new(op, canvas, err.kind().to_string())
    }

    pub fn codec(op: &'static str, canvas: Option<&CanvasId>, err: &serde_json::Error) -> Self {
        Self::new(op, canvas, format!("malformed data ({err})"))
    }
}
