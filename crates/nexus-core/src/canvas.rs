//! A single canvas: its graph, structure, settings and chat log behind
//! per-canvas locks.
//!
//! Graph mutations run on a staged copy under the canvas write lock. The
//! staged copy is persisted and only then swapped in, so a failed write
//! leaves memory exactly as durable storage has it. Chat writes go through
//! a separate mutex and roll back the in-memory change the same way.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::{self, ChatLog, ChatSession, ChatTurn, Role};
use crate::context::{normalize_selection, ContextEngine, ContextResult, DepthMode};
use crate::error::{Entity, Error, Result};
use crate::graph::{GraphStore, NodeRemoval, NodeSummary, PositionUpdate, Snapshot};
use crate::model::{CanvasId, Edge, NewEdge, NewNode, Node, NodePatch, Position, SessionId};
use crate::settings::CanvasSettings;
use crate::storage::{CanvasRecord, Storage};
use crate::structure::Structure;

/// Durable canvas metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasMeta {
    pub id: CanvasId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl CanvasMeta {
    pub fn new(id: CanvasId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            created_at: now,
            last_modified: now,
        }
    }
}

/// One row of [`CanvasRegistry::list`](crate::CanvasRegistry::list).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanvasEntry {
    #[serde(flatten)]
    pub meta: CanvasMeta,
    pub is_active: bool,
}

/// Context plus the chat session it was recorded under.
#[derive(Debug, Clone, Serialize)]
pub struct ContextQuery {
    pub session_id: SessionId,
    pub context: ContextResult,
    pub session: ChatSession,
}

/// Outcome of a manual [`Canvas::save_all`].
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SaveReport {
    pub saved: Vec<&'static str>,
    pub errors: Vec<String>,
}

impl SaveReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

pub(crate) struct CanvasState {
    meta: CanvasMeta,
    graph: GraphStore,
    structure: Structure,
    settings: CanvasSettings,
    /// Set once the canvas is deleted; later writes are refused.
    retired: bool,
}

impl CanvasState {
    pub(crate) fn retire(&mut self) {
        self.retired = true;
    }
}

/// Everything a canvas loads besides its metadata.
struct Parts {
    graph: GraphStore,
    structure: Structure,
    settings: CanvasSettings,
    chat: ChatLog,
}

pub struct Canvas {
    id: CanvasId,
    state: RwLock<CanvasState>,
    chat: Mutex<ChatLog>,
    storage: Arc<dyn Storage>,
}

impl fmt::Debug for Canvas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Canvas").field("id", &self.id).finish_non_exhaustive()
    }
}

impl Canvas {
    /// Persists a new empty canvas with default settings.
    pub(crate) fn create(storage: Arc<dyn Storage>, meta: CanvasMeta) -> Result<Canvas> {
        let graph = GraphStore::new();
        let structure = Structure::default();
        let settings = CanvasSettings::default();
        storage.save_record(&CanvasRecord::new(&meta, &graph))?;
        storage.save_structure(&meta.id, &structure)?;
        storage.save_settings(&meta.id, &settings)?;
        let parts = Parts {
            graph,
            structure,
            settings,
            chat: ChatLog::new(),
        };
        Ok(Self::assemble(storage, meta, parts))
    }

    /// Loads a stored canvas, validating its graph like live mutations do.
    /// Returns `None` when no record exists.
    pub(crate) fn load(storage: Arc<dyn Storage>, id: &CanvasId) -> Result<Option<Canvas>> {
        let Some(record) = storage.load_record(id)? else {
            return Ok(None);
        };
        if &record.meta.id != id {
            return Err(Error::invalid(format!(
                "stored record for canvas '{id}' names canvas '{}'",
                record.meta.id
            )));
        }
        let graph = GraphStore::from_parts(record.nodes, record.edges)?;
        // Labels of nodes written before the structure existed are folded in.
        let mut structure = storage.load_structure(id)?.unwrap_or_default();
        for node in graph.nodes() {
            structure.observe(node);
        }
        let settings = storage.load_settings(id)?.unwrap_or_default();
        settings.validate()?;
        let chat = ChatLog::from_sessions(storage.load_chat(id)?);
        let parts = Parts {
            graph,
            structure,
            settings,
            chat,
        };
        Ok(Some(Self::assemble(storage, record.meta, parts)))
    }

    fn assemble(storage: Arc<dyn Storage>, meta: CanvasMeta, parts: Parts) -> Canvas {
        Canvas {
            id: meta.id.clone(),
            state: RwLock::new(CanvasState {
                meta,
                graph: parts.graph,
                structure: parts.structure,
                settings: parts.settings,
                retired: false,
            }),
            chat: Mutex::new(parts.chat),
            storage,
        }
    }

    pub fn id(&self) -> &CanvasId {
        &self.id
    }

    pub fn meta(&self) -> CanvasMeta {
        self.state.read().meta.clone()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.state.read().graph.snapshot()
    }

    /// Metadata and graph read under one guard, so `last_modified` matches
    /// the nodes and edges returned.
    pub fn snapshot_with_meta(&self) -> (CanvasMeta, Snapshot) {
        let state = self.state.read();
        (state.meta.clone(), state.graph.snapshot())
    }

    pub fn structure(&self) -> Structure {
        self.state.read().structure.clone()
    }

    pub fn node(&self, id: &str) -> Option<Node> {
        self.state.read().graph.node(id).cloned()
    }

    pub fn node_summaries(&self, exclude: Option<&str>) -> Vec<NodeSummary> {
        self.state.read().graph.node_summaries(exclude)
    }

    /// Blocks until in-flight mutations finish and holds off new ones for
    /// as long as the guard lives.
    pub(crate) fn quiesce(&self) -> RwLockWriteGuard<'_, CanvasState> {
        self.state.write()
    }

    fn ensure_live(&self, state: &CanvasState) -> Result<()> {
        if state.retired {
            return Err(Error::NotFound(Entity::Canvas(self.id.clone())));
        }
        Ok(())
    }

    fn mutate<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut GraphStore, &mut Structure) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state.write();
        self.ensure_live(&state)?;

        let mut staged = state.graph.clone();
        let mut structure = state.structure.clone();
        let out = f(&mut staged, &mut structure).map_err(|e| {
            tracing::warn!(canvas = %self.id, op, error = %e, "mutation rejected");
            e
        })?;

        // The structure only grows, so it is written first; a failed record
        // write puts the previous structure back.
        let structure_changed = structure != state.structure;
        if structure_changed {
            self.storage.save_structure(&self.id, &structure).map_err(|e| {
                tracing::error!(canvas = %self.id, op, error = %e, "mutation rolled back");
                e
            })?;
        }

        let mut meta = state.meta.clone();
        meta.last_modified = Utc::now();
        if let Err(e) = self.storage.save_record(&CanvasRecord::new(&meta, &staged)) {
            tracing::error!(canvas = %self.id, op, error = %e, "mutation rolled back");
            if structure_changed {
                if let Err(restore) = self.storage.save_structure(&self.id, &state.structure) {
                    tracing::error!(canvas = %self.id, error = %restore, "structure restore failed");
                }
            }
            return Err(e.into());
        }

        state.graph = staged;
        state.structure = structure;
        state.meta = meta;
        tracing::debug!(canvas = %self.id, op, "mutation committed");
        Ok(out)
    }

    pub fn add_node(&self, new: NewNode) -> Result<Node> {
        let node = self.mutate("add node", |g, structure| {
            let id = g.add_node(new)?;
            let node = g
                .node(id.as_str())
                .cloned()
                .ok_or(Error::NotFound(Entity::Node(id)))?;
            structure.observe(&node);
            Ok(node)
        })?;
        tracing::info!(canvas = %self.id, node = %node.id, node_type = %node.node_type(), "node added");
        Ok(node)
    }

    pub fn update_node(&self, id: &str, patch: &NodePatch) -> Result<Node> {
        self.mutate("update node", |g, structure| {
            let node = g.update_node(id, patch)?;
            structure.observe(&node);
            Ok(node)
        })
    }

    pub fn delete_node(&self, id: &str) -> Result<NodeRemoval> {
        let removal = self.mutate("delete node", |g, _| g.delete_node(id))?;
        tracing::info!(
            canvas = %self.id,
            node = id,
            edges = removal.edges.len(),
            "node deleted"
        );
        Ok(removal)
    }

    pub fn add_edge(&self, new: NewEdge) -> Result<Edge> {
        let edge = self.mutate("add edge", |g, _| g.add_edge(new))?;
        tracing::info!(
            canvas = %self.id,
            source = %edge.source,
            target = %edge.target,
            kind = %edge.kind,
            "edge added"
        );
        Ok(edge)
    }

    pub fn update_edge(&self, source: &str, target: &str, justification: &str) -> Result<Edge> {
        self.mutate("update edge", |g, _| g.update_edge(source, target, justification))
    }

    pub fn delete_edge(&self, source: &str, target: &str) -> Result<Edge> {
        let edge = self.mutate("delete edge", |g, _| g.delete_edge(source, target))?;
        tracing::info!(canvas = %self.id, source, target, "edge deleted");
        Ok(edge)
    }

    pub fn set_positions(&self, positions: &BTreeMap<String, Position>) -> Result<PositionUpdate> {
        self.mutate("set positions", |g, _| Ok(g.set_positions(positions)))
    }

    /// Read-only; takes only this canvas's read lock.
    pub fn compute_context<I, S>(&self, selected: I, depth: DepthMode) -> Result<ContextResult>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let state = self.state.read();
        ContextEngine::compute(&state.graph, selected, depth)
    }

    /// Computes context and opens (or refreshes) the chat session keyed by
    /// this selection and depth.
    pub fn context_query<I, S>(&self, selected: I, depth: DepthMode) -> Result<ContextQuery>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let selection = normalize_selection(selected);
        let state = self.state.read();
        self.ensure_live(&state)?;
        let context = ContextEngine::compute(&state.graph, &selection, depth)?;

        let session_id = chat::session_id(&self.id, &selection, depth);
        let mut log = self.chat.lock();
        let (session, previous) = log.open(session_id.clone(), &selection, depth, context.clone());
        if let Err(e) = self.storage.save_chat(&self.id, &log.to_vec()) {
            log.restore(&session_id, previous);
            return Err(e.into());
        }
        tracing::debug!(
            canvas = %self.id,
            session = %session_id,
            %depth,
            nodes = context.stats.node_count,
            "context computed"
        );
        Ok(ContextQuery {
            session_id,
            context,
            session,
        })
    }

    pub fn append_chat_turn(
        &self,
        session: &str,
        role: Role,
        content: impl Into<String>,
    ) -> Result<ChatTurn> {
        let state = self.state.read();
        self.ensure_live(&state)?;

        let mut log = self.chat.lock();
        let mark = log
            .mark(session)
            .ok_or_else(|| Error::NotFound(Entity::Session(SessionId::from(session))))?;
        let turn = log.append(session, role, content)?;
        if let Err(e) = self.storage.save_chat(&self.id, &log.to_vec()) {
            log.rewind(session, mark);
            return Err(e.into());
        }
        Ok(turn)
    }

    /// Records a question and its answer with a single durable write. On
    /// failure neither turn is kept, in memory or on disk.
    pub fn record_exchange(
        &self,
        session: &str,
        question: impl Into<String>,
        answer: impl Into<String>,
    ) -> Result<(ChatTurn, ChatTurn)> {
        let state = self.state.read();
        self.ensure_live(&state)?;

        let mut log = self.chat.lock();
        let mark = log
            .mark(session)
            .ok_or_else(|| Error::NotFound(Entity::Session(SessionId::from(session))))?;
        let turns = log.append_exchange(session, question, answer)?;
        if let Err(e) = self.storage.save_chat(&self.id, &log.to_vec()) {
            log.rewind(session, mark);
            tracing::error!(canvas = %self.id, session, error = %e, "chat exchange rolled back");
            return Err(e.into());
        }
        tracing::debug!(canvas = %self.id, session, "chat exchange recorded");
        Ok(turns)
    }

    pub fn chat_session(&self, id: &str) -> Result<ChatSession> {
        self.chat
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(Entity::Session(SessionId::from(id))))
    }

    pub fn chat_sessions(&self) -> Vec<ChatSession> {
        self.chat.lock().to_vec()
    }

    pub fn settings(&self) -> CanvasSettings {
        self.state.read().settings.clone()
    }

    /// Shallow-merges `patch` into the settings and persists the result.
    pub fn update_settings(&self, patch: &Value) -> Result<CanvasSettings> {
        let mut state = self.state.write();
        self.ensure_live(&state)?;
        let merged = state.settings.merge(patch)?;
        self.storage.save_settings(&self.id, &merged)?;
        state.settings = merged.clone();
        tracing::info!(canvas = %self.id, "settings updated");
        Ok(merged)
    }

    pub(crate) fn rename(&self, name: &str) -> Result<CanvasMeta> {
        let mut state = self.state.write();
        self.ensure_live(&state)?;
        let mut meta = state.meta.clone();
        meta.name = name.to_string();
        meta.last_modified = Utc::now();
        self.storage
            .save_record(&CanvasRecord::new(&meta, &state.graph))?;
        state.meta = meta.clone();
        Ok(meta)
    }

    /// Writes the record, structure, settings and chat log again. Failures are
    /// collected per part rather than stopping at the first one.
    pub fn save_all(&self) -> SaveReport {
        let state = self.state.read();
        let mut report = SaveReport::default();
        if state.retired {
            report
                .errors
                .push(Error::NotFound(Entity::Canvas(self.id.clone())).to_string());
            return report;
        }

        let record = CanvasRecord::new(&state.meta, &state.graph);
        match self.storage.save_record(&record) {
            Ok(()) => report.saved.push("graph"),
            Err(e) => report.errors.push(e.to_string()),
        }
        match self.storage.save_structure(&self.id, &state.structure) {
            Ok(()) => report.saved.push("structure"),
            Err(e) => report.errors.push(e.to_string()),
        }
        match self.storage.save_settings(&self.id, &state.settings) {
            Ok(()) => report.saved.push("settings"),
            Err(e) => report.errors.push(e.to_string()),
        }
        let sessions = self.chat.lock().to_vec();
        match self.storage.save_chat(&self.id, &sessions) {
            Ok(()) => report.saved.push("chat"),
            Err(e) => report.errors.push(e.to_string()),
        }
        tracing::info!(canvas = %self.id, saved = ?report.saved, errors = report.errors.len(), "manual save");
        report
    }
}
