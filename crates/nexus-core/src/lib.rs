pub mod canvas;
pub mod chat;
pub mod config;
pub mod context;
pub mod error;
pub mod graph;
pub mod model;
pub mod policy;
pub mod registry;
pub mod settings;
pub mod storage;
pub mod structure;

pub use canvas::{Canvas, CanvasEntry, CanvasMeta, ContextQuery, SaveReport};
pub use chat::{session_id, ChatLog, ChatSession, ChatTurn, Role};
pub use config::{ai_configured, default_data_dir, AiSettings, NexusConfig};
pub use context::{ContextEngine, ContextResult, ContextStats, DepthMode};
pub use error::{Entity, Error, PersistenceError, Result};
pub use graph::{rank_violations, GraphStore, NodeRemoval, NodeSummary, PositionUpdate, Snapshot};
pub use model::{
    CanvasId, Edge, EdgeKey, EdgeKind, NewEdge, NewNode, Node, NodeId, NodeKind, NodePatch,
    NodeSource, NodeType, Position, SessionId, SourceKind,
};
pub use policy::{GraphView, HierarchyPolicy, Proposal, Violation};
pub use registry::{CanvasRegistry, DEFAULT_CANVAS_ID, DEFAULT_CANVAS_NAME};
pub use settings::{AutoLinking, CanvasSettings, ContentGeneration, Expansion, Tone};
pub use storage::{CanvasRecord, FsStorage, MemoryStorage, RegistryPointer, Storage};
pub use structure::{Structure, TopicEntry};
