use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use nexus_core::{
    ai_configured, AiSettings, Canvas, CanvasRegistry, DepthMode, Edge, EdgeKind, Entity, Error,
    NewEdge, NewNode, Node, NodeId, NodePatch, NodeSource, NodeSummary, NodeType, NexusConfig,
    Position, Structure,
};
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    schemars, tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// --- Request types ---

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct CreateCanvasRequest {
    /// Display name of the new canvas
    name: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct CanvasIdRequest {
    /// ID of the canvas (as returned by list_canvases)
    canvas_id: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct RenameCanvasRequest {
    /// ID of the canvas to rename
    canvas_id: String,
    /// New display name
    name: String,
}

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
struct CanvasScope {
    /// Canvas to operate on. Defaults to the active canvas.
    #[serde(default)]
    canvas_id: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct AddNodeRequest {
    /// Canvas to operate on. Defaults to the active canvas.
    #[serde(default)]
    canvas_id: Option<String>,
    /// Node ID. Generated ("node-...") when omitted.
    #[serde(default)]
    id: Option<String>,
    /// "topic", "module" or "child" (default)
    #[serde(default)]
    node_type: NodeType,
    title: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    /// High-level grouping. Defaults to "Uncategorized".
    #[serde(default)]
    main_topic: Option<String>,
    /// Functional module label. Defaults to "General".
    #[serde(default)]
    module: Option<String>,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    position: Option<Position>,
    /// Topic and module nodes only
    #[serde(default)]
    description: Option<String>,
    /// Child nodes only: where the content came from
    #[serde(default)]
    source: Option<NodeSource>,
    /// Ask the AI provider to link the new node to existing nodes. Defaults to
    /// the canvas auto_linking.enabled setting when a provider is configured.
    #[serde(default)]
    auto_link: Option<bool>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct UpdateNodeRequest {
    /// Canvas to operate on. Defaults to the active canvas.
    #[serde(default)]
    canvas_id: Option<String>,
    node_id: String,
    /// Retyping is rejected if any hierarchical edge of the node would become illegal
    #[serde(default)]
    node_type: Option<NodeType>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    content: Option<String>,
    /// Replaces the whole tag set
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    main_topic: Option<String>,
    #[serde(default)]
    module: Option<String>,
    /// Empty string clears the color
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    position: Option<Position>,
    /// Topic and module nodes only
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct NodeIdRequest {
    /// Canvas to operate on. Defaults to the active canvas.
    #[serde(default)]
    canvas_id: Option<String>,
    node_id: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct SetPositionsRequest {
    /// Canvas to operate on. Defaults to the active canvas.
    #[serde(default)]
    canvas_id: Option<String>,
    /// Map of node ID to {x, y}. Unknown IDs are skipped and reported.
    positions: BTreeMap<String, Position>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct AddEdgeRequest {
    /// Canvas to operate on. Defaults to the active canvas.
    #[serde(default)]
    canvas_id: Option<String>,
    source: String,
    target: String,
    /// Why the two nodes are linked. Required, must not be blank.
    justification: String,
    /// "associative" (default) or "hierarchical". Hierarchical edges must point
    /// up: child -> module -> topic.
    #[serde(default)]
    kind: EdgeKind,
    /// 0.0 to 1.0, default 1.0
    #[serde(default)]
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct UpdateEdgeRequest {
    /// Canvas to operate on. Defaults to the active canvas.
    #[serde(default)]
    canvas_id: Option<String>,
    source: String,
    target: String,
    justification: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct EdgeKeyRequest {
    /// Canvas to operate on. Defaults to the active canvas.
    #[serde(default)]
    canvas_id: Option<String>,
    source: String,
    target: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct ComputeContextRequest {
    /// Canvas to operate on. Defaults to the active canvas.
    #[serde(default)]
    canvas_id: Option<String>,
    /// Selected node IDs (at least one)
    node_ids: Vec<String>,
    /// 0 = selection only, 1 = plus direct neighbours, 2 = within two hops
    depth: u8,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct AskRequest {
    /// Canvas to operate on. Defaults to the active canvas.
    #[serde(default)]
    canvas_id: Option<String>,
    /// Selected node IDs (at least one)
    node_ids: Vec<String>,
    /// 0 = selection only, 1 = plus direct neighbours, 2 = within two hops
    depth: u8,
    question: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct ChatHistoryRequest {
    /// Canvas to operate on. Defaults to the active canvas.
    #[serde(default)]
    canvas_id: Option<String>,
    /// Session to return. Lists every session of the canvas when omitted.
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct UpdateSettingsRequest {
    /// Canvas to operate on. Defaults to the active canvas.
    #[serde(default)]
    canvas_id: Option<String>,
    /// Top-level keys replace the current values, e.g.
    /// {"auto_linking": {"enabled": false, "max_connections": 3, "threshold": 0.6}}
    patch: serde_json::Value,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct SuggestJustificationRequest {
    /// Canvas to operate on. Defaults to the active canvas.
    #[serde(default)]
    canvas_id: Option<String>,
    source: String,
    target: String,
    /// The user's own words for the relationship, if any
    #[serde(default)]
    user_hint: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct SetAiSettingsRequest {
    /// "google", "openai", "anthropic", "ollama", "groq", "mistral" or "deepseek"
    provider: String,
    model: String,
    /// Keeps the stored key when omitted. Not needed for ollama.
    #[serde(default)]
    api_key: Option<String>,
}

// --- Responses ---

#[derive(Serialize)]
struct GraphResponse<'a> {
    canvas: nexus_core::CanvasMeta,
    nodes: &'a [Node],
    edges: &'a [Edge],
}

#[derive(Serialize)]
struct ContextResponse<'a> {
    session_id: &'a str,
    context_nodes: &'a [Node],
    context_edges: &'a [Edge],
    dominant_module: &'a str,
    stats: nexus_core::ContextStats,
}

#[derive(Serialize)]
struct AddNodeResponse {
    node: Node,
    links: Vec<Edge>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    link_errors: Vec<String>,
}

#[derive(Serialize)]
struct StructureResponse {
    #[serde(flatten)]
    structure: Structure,
    summary: String,
}

#[derive(Serialize)]
struct JustificationResponse {
    source: NodeId,
    target: NodeId,
    justification: String,
}

#[derive(Serialize)]
struct AiSettingsResponse {
    provider: String,
    model: String,
    configured: bool,
}

#[derive(Serialize)]
struct AskResponse<'a> {
    session_id: &'a str,
    reply: &'a str,
    citations: &'a nexus_chat::Citations,
}

#[derive(Serialize)]
struct SessionSummary<'a> {
    id: &'a str,
    selection: &'a [nexus_core::NodeId],
    depth: DepthMode,
    turns: usize,
    updated_at: DateTime<Utc>,
}

// --- Helpers ---

/// Render a core error as a tool error: `<kind>: <message>`.
fn fail(e: &nexus_core::Error) -> CallToolResult {
    CallToolResult::error(vec![Content::text(format!("{}: {}", e.kind(), e))])
}

fn fail_chat(e: &nexus_chat::ChatError) -> CallToolResult {
    CallToolResult::error(vec![Content::text(format!("{}: {}", e.kind(), e))])
}

fn find_summary(summaries: &[NodeSummary], id: &str) -> nexus_core::Result<NodeSummary> {
    summaries
        .iter()
        .find(|s| s.id.as_str() == id)
        .cloned()
        .ok_or_else(|| Error::NotFound(Entity::Node(NodeId::from(id))))
}

fn json<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(format!("serialize response: {e}"), None))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

fn respond<T: Serialize>(result: nexus_core::Result<T>) -> Result<CallToolResult, McpError> {
    match result {
        Ok(value) => json(&value),
        Err(e) => Ok(fail(&e)),
    }
}

fn depth(raw: u8) -> nexus_core::Result<DepthMode> {
    DepthMode::try_from(raw)
}

// --- Server ---

#[derive(Clone)]
pub struct NexusServer {
    registry: Arc<CanvasRegistry>,
    config: Arc<NexusConfig>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl NexusServer {
    pub fn new(registry: Arc<CanvasRegistry>, config: Arc<NexusConfig>) -> Self {
        Self {
            registry,
            config,
            tool_router: Self::tool_router(),
        }
    }

    fn canvas(&self, id: Option<&str>) -> nexus_core::Result<Arc<Canvas>> {
        match id {
            Some(id) => self.registry.get(id),
            None => self.registry.active(),
        }
    }

    #[tool(description = "List all canvases, most recently modified first. Exactly one is flagged is_active.")]
    fn list_canvases(&self) -> Result<CallToolResult, McpError> {
        json(&self.registry.list())
    }

    #[tool(description = "Create an empty canvas with default settings. The active canvas does not change.")]
    fn create_canvas(
        &self,
        Parameters(req): Parameters<CreateCanvasRequest>,
    ) -> Result<CallToolResult, McpError> {
        respond(self.registry.create(&req.name))
    }

    #[tool(description = "Make a canvas the active one. Unqualified graph, context and chat calls target the active canvas.")]
    fn activate_canvas(
        &self,
        Parameters(req): Parameters<CanvasIdRequest>,
    ) -> Result<CallToolResult, McpError> {
        respond(self.registry.activate(&req.canvas_id))
    }

    #[tool(description = "Rename a canvas")]
    fn rename_canvas(
        &self,
        Parameters(req): Parameters<RenameCanvasRequest>,
    ) -> Result<CallToolResult, McpError> {
        respond(self.registry.rename(&req.canvas_id, &req.name))
    }

    #[tool(description = "Delete a canvas and all of its nodes, edges, settings and chat history. The default canvas cannot be deleted. Deleting the active canvas makes the default canvas active.")]
    fn delete_canvas(
        &self,
        Parameters(req): Parameters<CanvasIdRequest>,
    ) -> Result<CallToolResult, McpError> {
        match self.registry.delete(&req.canvas_id) {
            Ok(()) => Ok(CallToolResult::success(vec![Content::text(format!(
                "Deleted canvas '{}'. Active canvas: '{}'.",
                req.canvas_id,
                self.registry.active_id()
            ))])),
            Err(e) => Ok(fail(&e)),
        }
    }

    #[tool(description = "Get every node and edge of a canvas. Returns {canvas, nodes, edges}.")]
    fn get_graph(&self, Parameters(req): Parameters<CanvasScope>) -> Result<CallToolResult, McpError> {
        let canvas = match self.canvas(req.canvas_id.as_deref()) {
            Ok(c) => c,
            Err(e) => return Ok(fail(&e)),
        };
        let (meta, snapshot) = canvas.snapshot_with_meta();
        json(&GraphResponse {
            canvas: meta,
            nodes: &snapshot.nodes,
            edges: &snapshot.edges,
        })
    }

    #[tool(description = "Add a node. Node IDs are unique per canvas. Optionally asks the AI provider to propose associative edges to existing nodes, kept according to the canvas auto_linking settings.")]
    async fn add_node(
        &self,
        Parameters(req): Parameters<AddNodeRequest>,
    ) -> Result<CallToolResult, McpError> {
        let canvas = match self.canvas(req.canvas_id.as_deref()) {
            Ok(c) => c,
            Err(e) => return Ok(fail(&e)),
        };

        let mut new = NewNode::new(req.node_type, req.title).tags(req.tags);
        new.id = req.id.map(Into::into);
        new.summary = req.summary.unwrap_or_default();
        new.content = req.content.unwrap_or_default();
        new.main_topic = req.main_topic;
        new.module = req.module;
        new.color = req.color;
        new.position = req.position;
        new.description = req.description;
        new.source = req.source;

        let node = match canvas.add_node(new) {
            Ok(node) => node,
            Err(e) => return Ok(fail(&e)),
        };

        let settings = canvas.settings();
        let ai = self.config.read_ai_settings();
        let auto_link = req
            .auto_link
            .unwrap_or(settings.auto_linking.enabled && ai_configured(&ai));

        let mut links = Vec::new();
        let mut link_errors = Vec::new();
        if auto_link {
            let (mine, candidates): (Vec<_>, Vec<_>) = canvas
                .node_summaries(None)
                .into_iter()
                .partition(|s| s.id == node.id);
            if let Some(summary) = mine.first() {
                // The provider call runs without any canvas lock held.
                match nexus_chat::suggest_links(&ai, &settings.auto_linking, summary, &candidates).await {
                    Ok(suggestions) => {
                        for s in suggestions {
                            let edge = NewEdge::associative(node.id.clone(), s.target_id, s.justification)
                                .confidence(s.confidence);
                            match canvas.add_edge(edge) {
                                Ok(edge) => links.push(edge),
                                Err(e) => link_errors.push(format!("{}: {}", e.kind(), e)),
                            }
                        }
                    }
                    Err(e) => link_errors.push(format!("{}: {}", e.kind(), e)),
                }
            }
        }

        json(&AddNodeResponse {
            node,
            links,
            link_errors,
        })
    }

    #[tool(description = "Update fields of an existing node. Only provided fields change.")]
    fn update_node(
        &self,
        Parameters(req): Parameters<UpdateNodeRequest>,
    ) -> Result<CallToolResult, McpError> {
        let canvas = match self.canvas(req.canvas_id.as_deref()) {
            Ok(c) => c,
            Err(e) => return Ok(fail(&e)),
        };
        let patch = NodePatch {
            node_type: req.node_type,
            title: req.title,
            summary: req.summary,
            content: req.content,
            tags: req.tags.map(|t| t.into_iter().collect::<BTreeSet<_>>()),
            main_topic: req.main_topic,
            module: req.module,
            color: req.color,
            position: req.position,
            description: req.description,
        };
        if patch.is_empty() {
            return Ok(CallToolResult::error(vec![Content::text(
                "InvalidInputError: invalid input: no fields to update",
            )]));
        }
        respond(canvas.update_node(&req.node_id, &patch))
    }

    #[tool(description = "Delete a node and every edge it is an endpoint of")]
    fn delete_node(&self, Parameters(req): Parameters<NodeIdRequest>) -> Result<CallToolResult, McpError> {
        let canvas = match self.canvas(req.canvas_id.as_deref()) {
            Ok(c) => c,
            Err(e) => return Ok(fail(&e)),
        };
        match canvas.delete_node(&req.node_id) {
            Ok(removal) => Ok(CallToolResult::success(vec![Content::text(format!(
                "Deleted node '{}' and {} edge(s).",
                removal.node.id,
                removal.edges.len()
            ))])),
            Err(e) => Ok(fail(&e)),
        }
    }

    #[tool(description = "Set canvas positions of several nodes at once")]
    fn set_positions(
        &self,
        Parameters(req): Parameters<SetPositionsRequest>,
    ) -> Result<CallToolResult, McpError> {
        let canvas = match self.canvas(req.canvas_id.as_deref()) {
            Ok(c) => c,
            Err(e) => return Ok(fail(&e)),
        };
        respond(canvas.set_positions(&req.positions))
    }

    #[tool(description = "Create an edge, or replace the edge with the same (source, target). Requires a justification.")]
    fn add_edge(&self, Parameters(req): Parameters<AddEdgeRequest>) -> Result<CallToolResult, McpError> {
        let canvas = match self.canvas(req.canvas_id.as_deref()) {
            Ok(c) => c,
            Err(e) => return Ok(fail(&e)),
        };
        let mut edge = NewEdge::new(req.source, req.target, req.justification, req.kind);
        if let Some(confidence) = req.confidence {
            edge = edge.confidence(confidence);
        }
        respond(canvas.add_edge(edge))
    }

    #[tool(description = "Change the justification of an existing edge")]
    fn update_edge(
        &self,
        Parameters(req): Parameters<UpdateEdgeRequest>,
    ) -> Result<CallToolResult, McpError> {
        let canvas = match self.canvas(req.canvas_id.as_deref()) {
            Ok(c) => c,
            Err(e) => return Ok(fail(&e)),
        };
        respond(canvas.update_edge(&req.source, &req.target, &req.justification))
    }

    #[tool(description = "Delete the edge from source to target")]
    fn delete_edge(&self, Parameters(req): Parameters<EdgeKeyRequest>) -> Result<CallToolResult, McpError> {
        let canvas = match self.canvas(req.canvas_id.as_deref()) {
            Ok(c) => c,
            Err(e) => return Ok(fail(&e)),
        };
        respond(canvas.delete_edge(&req.source, &req.target))
    }

    #[tool(description = "Compute the context subgraph around selected nodes. Edges count in both directions. Returns {session_id, context_nodes, context_edges, dominant_module, stats}; the session keeps chat history for this selection and depth.")]
    fn compute_context(
        &self,
        Parameters(req): Parameters<ComputeContextRequest>,
    ) -> Result<CallToolResult, McpError> {
        let query = self
            .canvas(req.canvas_id.as_deref())
            .and_then(|canvas| canvas.context_query(&req.node_ids, depth(req.depth)?));
        match query {
            Ok(q) => json(&ContextResponse {
                session_id: q.session_id.as_str(),
                context_nodes: &q.context.nodes,
                context_edges: &q.context.edges,
                dominant_module: &q.context.dominant_module,
                stats: q.context.stats,
            }),
            Err(e) => Ok(fail(&e)),
        }
    }

    #[tool(description = "Ask a question answered only from the context of the selected nodes. The reply cites node IDs as [NODE-ID]. Both the question and the reply are recorded in the chat session.")]
    async fn ask(&self, Parameters(req): Parameters<AskRequest>) -> Result<CallToolResult, McpError> {
        let canvas = match self.canvas(req.canvas_id.as_deref()) {
            Ok(c) => c,
            Err(e) => return Ok(fail(&e)),
        };
        let query = match depth(req.depth).and_then(|d| canvas.context_query(&req.node_ids, d)) {
            Ok(q) => q,
            Err(e) => return Ok(fail(&e)),
        };

        let ai = self.config.read_ai_settings();
        let answer = match nexus_chat::ask(&ai, &query.session, &req.question).await {
            Ok(answer) => answer,
            Err(e) => return Ok(fail_chat(&e)),
        };

        // Both turns are kept or neither is.
        let session = query.session_id.as_str();
        if let Err(e) = canvas.record_exchange(session, req.question.as_str(), answer.reply.as_str()) {
            return Ok(fail(&e));
        }

        json(&AskResponse {
            session_id: session,
            reply: &answer.reply,
            citations: &answer.citations,
        })
    }

    #[tool(description = "Draft a justification for an edge the user is drawing between two nodes. Requires manual_connection_ai_assist in the canvas settings and a configured AI provider. Nothing is written; pass the result to add_edge.")]
    async fn suggest_justification(
        &self,
        Parameters(req): Parameters<SuggestJustificationRequest>,
    ) -> Result<CallToolResult, McpError> {
        let canvas = match self.canvas(req.canvas_id.as_deref()) {
            Ok(c) => c,
            Err(e) => return Ok(fail(&e)),
        };
        if req.source == req.target {
            return Ok(fail(&Error::SelfLoop(NodeId::from(req.source.as_str()))));
        }
        let summaries = canvas.node_summaries(None);
        let ends = find_summary(&summaries, &req.source)
            .and_then(|source| find_summary(&summaries, &req.target).map(|target| (source, target)));
        let (source, target) = match ends {
            Ok(ends) => ends,
            Err(e) => return Ok(fail(&e)),
        };

        let ai = self.config.read_ai_settings();
        let settings = canvas.settings();
        match nexus_chat::suggest_justification(&ai, &settings, &source, &target, req.user_hint.as_deref()).await {
            Ok(justification) => json(&JustificationResponse {
                source: source.id,
                target: target.id,
                justification,
            }),
            Err(e) => Ok(fail_chat(&e)),
        }
    }

    #[tool(description = "Get one chat session with its turns, or list the sessions of a canvas when session_id is omitted")]
    fn get_chat_history(
        &self,
        Parameters(req): Parameters<ChatHistoryRequest>,
    ) -> Result<CallToolResult, McpError> {
        let canvas = match self.canvas(req.canvas_id.as_deref()) {
            Ok(c) => c,
            Err(e) => return Ok(fail(&e)),
        };
        if let Some(id) = req.session_id {
            return respond(canvas.chat_session(&id));
        }
        let sessions = canvas.chat_sessions();
        let summaries: Vec<SessionSummary> = sessions
            .iter()
            .map(|s| SessionSummary {
                id: s.id.as_str(),
                selection: &s.selection,
                depth: s.depth,
                turns: s.turns.len(),
                updated_at: s.updated_at,
            })
            .collect();
        json(&summaries)
    }

    #[tool(description = "Get the settings of a canvas (auto_linking, manual_connection_ai_assist, expansion, content_generation)")]
    fn get_settings(&self, Parameters(req): Parameters<CanvasScope>) -> Result<CallToolResult, McpError> {
        respond(self.canvas(req.canvas_id.as_deref()).map(|c| c.settings()))
    }

    #[tool(description = "Merge top-level settings keys into a canvas's settings. Returns the resulting settings.")]
    fn update_settings(
        &self,
        Parameters(req): Parameters<UpdateSettingsRequest>,
    ) -> Result<CallToolResult, McpError> {
        respond(
            self.canvas(req.canvas_id.as_deref())
                .and_then(|c| c.update_settings(&req.patch)),
        )
    }

    #[tool(description = "Get the topics and modules known to a canvas, with descriptions and colors. New labels are added as nodes introduce them. Returns {topics, summary}.")]
    fn get_structure(&self, Parameters(req): Parameters<CanvasScope>) -> Result<CallToolResult, McpError> {
        respond(self.canvas(req.canvas_id.as_deref()).map(|c| {
            let structure = c.structure();
            StructureResponse {
                summary: structure.summary(),
                structure,
            }
        }))
    }

    #[tool(description = "Configure the AI provider used by ask, auto-linking and suggest_justification. Stored in ai.json in the data directory; the key is never returned.")]
    fn set_ai_settings(
        &self,
        Parameters(req): Parameters<SetAiSettingsRequest>,
    ) -> Result<CallToolResult, McpError> {
        let current = self.config.read_ai_settings();
        let settings = AiSettings {
            provider: req.provider.trim().to_string(),
            model: req.model.trim().to_string(),
            api_key: req.api_key.unwrap_or(current.api_key),
        };
        if settings.provider.is_empty() || settings.model.is_empty() {
            return Ok(fail(&Error::InvalidInput(
                "provider and model must not be empty".to_string(),
            )));
        }
        if let Err(e) = self.config.write_ai_settings(&settings) {
            return Ok(fail(&Error::from(e)));
        }
        tracing::info!(provider = %settings.provider, model = %settings.model, "AI settings updated");
        json(&AiSettingsResponse {
            configured: ai_configured(&settings),
            provider: settings.provider,
            model: settings.model,
        })
    }

    #[tool(description = "Write a canvas's graph, structure, settings and chat history to storage again. Returns {saved, errors}.")]
    fn save(&self, Parameters(req): Parameters<CanvasScope>) -> Result<CallToolResult, McpError> {
        let canvas = match self.canvas(req.canvas_id.as_deref()) {
            Ok(c) => c,
            Err(e) => return Ok(fail(&e)),
        };
        let report = canvas.save_all();
        if report.is_ok() {
            json(&report)
        } else {
            let text = serde_json::to_string_pretty(&report)
                .map_err(|e| McpError::internal_error(format!("serialize response: {e}"), None))?;
            Ok(CallToolResult::error(vec![Content::text(text)]))
        }
    }
}

#[tool_handler]
impl ServerHandler for NexusServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(INSTRUCTIONS.into()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

const INSTRUCTIONS: &str = r#"nexus is a knowledge graph organised into canvases. Each canvas holds nodes, justified edges, settings and chat history, isolated from every other canvas.

## Nodes
- **topic**: highest level grouping.
- **module**: a functional area inside a topic.
- **child**: an individual document, note or ingested item (default).
Every node carries a `module` label (default "General") and a `main_topic` (default "Uncategorized").

## Edges
- **hierarchical** edges express containment and must point up the hierarchy: child -> module, child -> topic, module -> topic. Anything else is rejected.
- **associative** edges link any two distinct nodes.
Every edge needs a non-empty justification. There is at most one edge per (source, target).

## Context and chat
`compute_context` takes selected node IDs and a depth (0 selection only, 1 plus neighbours, 2 within two hops) and returns the context subgraph with a `session_id`. `ask` answers strictly from that context and cites nodes as [NODE-ID].

## Structure
`get_structure` lists the topics and modules already in use on a canvas. Reuse them when classifying new nodes.

## AI assist
`set_ai_settings` configures the provider. With `manual_connection_ai_assist` enabled, `suggest_justification` drafts the justification for an edge before you call `add_edge`.

## Errors
Failed calls return `<ErrorKind>: <message>`, e.g. `HierarchyViolationError: ...`. Nothing is partially applied."#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries the protocol, so logs go to stderr.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("NEXUS_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = NexusConfig::from_env();
    let registry = config
        .open_registry()
        .inspect_err(|e| tracing::error!(error = %e, "could not open canvas registry"))?;

    let service = NexusServer::new(Arc::new(registry), Arc::new(config))
        .serve(rmcp::transport::io::stdio())
        .await
        .inspect_err(|e| tracing::error!(error = %e, "MCP server error"))?;
    service.waiting().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_core::MemoryStorage;

    fn server() -> NexusServer {
        let registry = CanvasRegistry::open(Arc::new(MemoryStorage::new())).unwrap();
        let dir = std::env::temp_dir().join("nexus-mcp-tests-no-ai");
        NexusServer::new(Arc::new(registry), Arc::new(NexusConfig::new(dir)))
    }

    fn is_error(result: &CallToolResult) -> bool {
        result.is_error == Some(true)
    }

    fn add_node_request(id: &str, node_type: NodeType) -> AddNodeRequest {
        AddNodeRequest {
            canvas_id: None,
            id: Some(id.to_string()),
            node_type,
            title: id.to_string(),
            summary: None,
            content: None,
            tags: vec![],
            main_topic: None,
            module: None,
            color: None,
            position: None,
            description: None,
            source: None,
            auto_link: Some(false),
        }
    }

    #[tokio::test]
    async fn hierarchy_violation_is_a_tool_error() {
        let s = server();
        assert!(!is_error(
            &s.add_node(Parameters(add_node_request("M1", NodeType::Module)))
                .await
                .unwrap()
        ));
        assert!(!is_error(
            &s.add_node(Parameters(add_node_request("C1", NodeType::Child)))
                .await
                .unwrap()
        ));

        let bad = s
            .add_edge(Parameters(AddEdgeRequest {
                canvas_id: None,
                source: "M1".into(),
                target: "C1".into(),
                justification: "contains".into(),
                kind: EdgeKind::Hierarchical,
                confidence: None,
            }))
            .unwrap();
        assert!(is_error(&bad));

        let good = s
            .add_edge(Parameters(AddEdgeRequest {
                canvas_id: None,
                source: "C1".into(),
                target: "M1".into(),
                justification: "belongs to".into(),
                kind: EdgeKind::Hierarchical,
                confidence: None,
            }))
            .unwrap();
        assert!(!is_error(&good));
        assert_eq!(s.registry.active().unwrap().snapshot().edges.len(), 1);
    }

    #[test]
    fn context_requires_known_nodes_and_valid_depth() {
        let s = server();
        let unknown = s
            .compute_context(Parameters(ComputeContextRequest {
                canvas_id: None,
                node_ids: vec!["ghost".into()],
                depth: 1,
            }))
            .unwrap();
        assert!(is_error(&unknown));

        let bad_depth = s
            .compute_context(Parameters(ComputeContextRequest {
                canvas_id: None,
                node_ids: vec!["ghost".into()],
                depth: 7,
            }))
            .unwrap();
        assert!(is_error(&bad_depth));
    }

    #[test]
    fn default_canvas_delete_is_refused() {
        let s = server();
        let result = s
            .delete_canvas(Parameters(CanvasIdRequest {
                canvas_id: nexus_core::DEFAULT_CANVAS_ID.into(),
            }))
            .unwrap();
        assert!(is_error(&result));
        assert_eq!(s.registry.list().len(), 1);
    }

    fn text(result: &CallToolResult) -> String {
        let value = serde_json::to_value(result).unwrap();
        value["content"][0]["text"].as_str().unwrap_or_default().to_string()
    }

    #[tokio::test]
    async fn structure_lists_labels_introduced_by_nodes() {
        let s = server();
        let mut req = add_node_request("C1", NodeType::Child);
        req.main_topic = Some("Billing".into());
        req.module = Some("Refunds".into());
        assert!(!is_error(&s.add_node(Parameters(req)).await.unwrap()));

        let result = s.get_structure(Parameters(CanvasScope::default())).unwrap();
        let body: serde_json::Value = serde_json::from_str(&text(&result)).unwrap();
        assert!(body["topics"]["Uncategorized"]["modules"]["General"].is_string());
        assert_eq!(body["topics"]["Billing"]["description"], "Auto-generated topic");
        assert!(body["topics"]["Billing"]["modules"]["Refunds"].is_string());
        assert!(body["summary"].as_str().unwrap().contains("- Topic: Billing"));
    }

    #[tokio::test]
    async fn justification_needs_known_nodes_and_enabled_assist() {
        let s = server();
        for (id, node_type) in [("M1", NodeType::Module), ("C1", NodeType::Child)] {
            s.add_node(Parameters(add_node_request(id, node_type))).await.unwrap();
        }
        let request = |target: &str| SuggestJustificationRequest {
            canvas_id: None,
            source: "C1".into(),
            target: target.into(),
            user_hint: None,
        };

        let off = s.suggest_justification(Parameters(request("M1"))).await.unwrap();
        assert!(is_error(&off));
        assert!(text(&off).starts_with("AssistDisabledError: "));

        s.update_settings(Parameters(UpdateSettingsRequest {
            canvas_id: None,
            patch: serde_json::json!({ "manual_connection_ai_assist": true }),
        }))
        .unwrap();
        let ghost = s.suggest_justification(Parameters(request("ghost"))).await.unwrap();
        assert!(text(&ghost).starts_with("NotFoundError: "));
        let self_loop = s.suggest_justification(Parameters(request("C1"))).await.unwrap();
        assert!(text(&self_loop).starts_with("SelfLoopError: "));
    }

    #[test]
    fn ai_settings_are_stored_without_echoing_the_key() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(NexusConfig::new(dir.path()));
        let registry = CanvasRegistry::open(Arc::new(MemoryStorage::new())).unwrap();
        let s = NexusServer::new(Arc::new(registry), config.clone());

        let result = s
            .set_ai_settings(Parameters(SetAiSettingsRequest {
                provider: "openai".into(),
                model: "gpt-4o".into(),
                api_key: Some("sk-secret".into()),
            }))
            .unwrap();
        assert!(!is_error(&result));
        assert!(!text(&result).contains("sk-secret"));
        assert!(text(&result).contains("\"configured\": true"));

        // Omitting the key keeps the stored one.
        s.set_ai_settings(Parameters(SetAiSettingsRequest {
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            api_key: None,
        }))
        .unwrap();
        let stored = config.read_ai_settings();
        assert_eq!(stored.model, "gpt-4o-mini");
        assert_eq!(stored.api_key, "sk-secret");

        let blank = s
            .set_ai_settings(Parameters(SetAiSettingsRequest {
                provider: " ".into(),
                model: "m".into(),
                api_key: None,
            }))
            .unwrap();
        assert!(text(&blank).starts_with("InvalidInputError: "));
    }

    #[test]
    fn graph_reports_the_canvas_it_read() {
        let s = server();
        let result = s.get_graph(Parameters(CanvasScope::default())).unwrap();
        let body: serde_json::Value = serde_json::from_str(&text(&result)).unwrap();
        assert_eq!(body["canvas"]["id"], nexus_core::DEFAULT_CANVAS_ID);
        assert_eq!(body["nodes"].as_array().map(Vec::len), Some(0));
    }
}
