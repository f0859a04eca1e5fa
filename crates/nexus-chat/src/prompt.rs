use nexus_core::{ContextResult, NodeSummary};

/// Longest node content quoted into a prompt, in characters.
const CONTENT_LIMIT: usize = 2000;

fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Render a context subgraph as the text block the model reasons over.
pub fn hydrate_context(context: &ContextResult) -> String {
    let mut out = String::with_capacity(2048);

    out.push_str("### CONTEXT NODES ###\n");
    for node in &context.nodes {
        let body = if node.content.trim().is_empty() {
            node.summary.as_str()
        } else {
            node.content.as_str()
        };
        out.push_str("ID: [");
        out.push_str(node.id.as_str());
        out.push_str("] | Type: ");
        out.push_str(node.node_type().as_str());
        out.push_str(" | Module: ");
        out.push_str(&node.module);
        out.push_str(" | Content: ");
        out.push_str(&truncate(body, CONTENT_LIMIT));
        out.push('\n');
    }

    out.push_str("\n### JUSTIFIED EDGES (RELATIONSHIPS) ###\n");
    for edge in &context.edges {
        out.push_str("From [");
        out.push_str(edge.source.as_str());
        out.push_str("] -> To [");
        out.push_str(edge.target.as_str());
        out.push_str("] | Justification: ");
        out.push_str(&edge.justification);
        out.push('\n');
    }

    out
}

pub fn system_prompt(context: &ContextResult) -> String {
    format!(
        "You are Nexus, an evidence-based reasoning engine.\n\
You must only answer based on the provided Context Nodes. Do not use outside knowledge.\n\
Whenever you reference a specific piece of information, cite the node it came from \
in the strict format [NODE-ID], using the IDs exactly as listed.\n\
If the context does not contain the answer, say so.\n\
Dominant module of this context: {}.\n\n{}",
        if context.dominant_module.is_empty() {
            "none"
        } else {
            context.dominant_module.as_str()
        },
        hydrate_context(context)
    )
}

pub const LINK_SYSTEM: &str = "You are Nexus, an AI knowledge weaver. \
You identify logical connections between documents in a knowledge graph. \
Output ONLY a JSON array, nothing else.";

/// Auto-linking request: which candidates should the new node connect to?
pub fn link_prompt(new_node: &NodeSummary, candidates: &[NodeSummary], max_connections: usize) -> String {
    let mut out = String::with_capacity(1024);
    out.push_str("A new node has been added to the graph.\n\nNEW NODE:\n");
    push_summary(&mut out, new_node);

    out.push_str("\nCANDIDATES:\n");
    for candidate in candidates {
        push_summary(&mut out, candidate);
    }

    out.push_str(&format!(
        "\nFind logical connections (shared topic, dependency, conflict, elaboration) between \
the new node and the candidates. Link ONLY where there is a strong justification, \
at most {max_connections} links.\n\
Each item: {{\"target_id\":\"<candidate id>\",\"justification\":\"<why, max 10 words>\",\
\"confidence\":<0.0-1.0>}}.\n\
If there are no connections, output []."
    ));
    out
}

pub const JUSTIFY_SYSTEM: &str = "You are Nexus, an AI knowledge weaver. \
You explain in one short phrase why one document relates to another. \
Output ONLY the phrase, nothing else.";

/// Manual connection assist: why does `source` relate to `target`?
pub fn justification_prompt(source: &NodeSummary, target: &NodeSummary, hint: Option<&str>) -> String {
    let mut out = String::with_capacity(512);
    out.push_str("A user is connecting two nodes.\n\nSOURCE:\n");
    push_summary(&mut out, source);
    out.push_str("\nTARGET:\n");
    push_summary(&mut out, target);
    if let Some(hint) = hint.map(str::trim).filter(|h| !h.is_empty()) {
        out.push_str("\nThe user describes the relationship as: ");
        out.push_str(&truncate(hint, 200));
        out.push('\n');
    }
    out.push_str("\nWrite the justification for this connection, max 10 words.");
    out
}

fn push_summary(out: &mut String, node: &NodeSummary) {
    out.push('[');
    out.push_str(node.id.as_str());
    out.push_str("] \"");
    out.push_str(&node.title);
    out.push_str("\" (");
    out.push_str(node.node_type.as_str());
    out.push_str(", module=");
    out.push_str(&node.module);
    out.push(')');
    if !node.summary.is_empty() {
        out.push_str(" | ");
        out.push_str(&truncate(&node.summary, 200));
    }
    if !node.tags.is_empty() {
        let tags: Vec<&str> = node.tags.iter().map(String::as_str).collect();
        out.push_str(" tags=");
        out.push_str(&tags.join(","));
    }
    out.push('\n');
}
