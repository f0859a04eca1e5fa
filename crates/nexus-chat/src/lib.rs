pub mod engine;
pub mod parse;
pub mod prompt;

use nexus_core::{ai_configured, AiSettings, AutoLinking, CanvasSettings, ChatSession, NodeSummary};
use serde::Serialize;

pub use parse::{Citations, LinkSuggestion};

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("AI provider is not configured")]
    NotConfigured,

    #[error("AI provider error: {0}")]
    Provider(String),

    #[error("AI assist for manual connections is disabled for this canvas")]
    AssistDisabled,
}

impl ChatError {
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::NotConfigured => "NotConfiguredError",
            ChatError::Provider(_) => "ProviderError",
            ChatError::AssistDisabled => "AssistDisabledError",
        }
    }
}

/// A grounded reply and the node ids it cites.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub reply: String,
    pub citations: Citations,
}

/// Answer `question` from the session's context snapshot, continuing its
/// earlier turns. The session is a value, so the store keeps changing
/// while the provider call is in flight.
pub async fn ask(settings: &AiSettings, session: &ChatSession, question: &str) -> Result<Answer, ChatError> {
    if !ai_configured(settings) {
        return Err(ChatError::NotConfigured);
    }
    let system = prompt::system_prompt(&session.context);

    tracing::info!(
        provider = %settings.provider,
        model = %settings.model,
        session = %session.id,
        nodes = session.context.stats.node_count,
        "sending question"
    );

    let reply = engine::generate(settings, &system, &session.turns, question).await?;
    let citations = parse::citations(&reply, &session.context);
    if !citations.unknown.is_empty() {
        tracing::warn!(session = %session.id, unknown = ?citations.unknown, "reply cites ids outside the context");
    }
    Ok(Answer { reply, citations })
}

/// Ask the provider which candidates `new_node` should be linked to.
/// Disabled auto-linking yields no suggestions without a provider call.
pub async fn suggest_links(
    settings: &AiSettings,
    auto_linking: &AutoLinking,
    new_node: &NodeSummary,
    candidates: &[NodeSummary],
) -> Result<Vec<LinkSuggestion>, ChatError> {
    if !auto_linking.enabled || candidates.is_empty() || auto_linking.max_connections == 0 {
        return Ok(vec![]);
    }
    if !ai_configured(settings) {
        return Err(ChatError::NotConfigured);
    }
    let user_msg = prompt::link_prompt(new_node, candidates, auto_linking.max_connections);

    tracing::info!(
        node = %new_node.id,
        candidates = candidates.len(),
        "detecting relationships"
    );

    let raw = engine::generate(settings, prompt::LINK_SYSTEM, &[], &user_msg).await?;
    tracing::debug!(raw = %raw, "raw link output");
    let links = parse::link_suggestions(&raw, auto_linking, candidates);
    tracing::info!(node = %new_node.id, links = links.len(), "relationships suggested");
    Ok(links)
}

/// Draft a justification for a connection the user is drawing by hand.
/// Only available when the canvas enables manual connection assist.
pub async fn suggest_justification(
    settings: &AiSettings,
    canvas: &CanvasSettings,
    source: &NodeSummary,
    target: &NodeSummary,
    hint: Option<&str>,
) -> Result<String, ChatError> {
    if !canvas.manual_connection_ai_assist {
        return Err(ChatError::AssistDisabled);
    }
    if !ai_configured(settings) {
        return Err(ChatError::NotConfigured);
    }
    let user_msg = prompt::justification_prompt(source, target, hint);

    tracing::info!(source = %source.id, target = %target.id, "drafting justification");
    let raw = engine::generate(settings, prompt::JUSTIFY_SYSTEM, &[], &user_msg).await?;
    parse::justification(&raw)
        .ok_or_else(|| ChatError::Provider("empty justification in reply".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_core::{ChatLog, ContextResult, ContextStats, DepthMode, SessionId};
    use std::collections::BTreeSet;

    fn session() -> ChatSession {
        let context = ContextResult {
            nodes: vec![],
            edges: vec![],
            dominant_module: String::new(),
            stats: ContextStats::default(),
        };
        ChatLog::new()
            .open(SessionId::from("s"), &BTreeSet::new(), DepthMode::F0, context)
            .0
    }

    #[tokio::test]
    async fn ask_without_provider_is_not_configured() {
        let err = ask(&AiSettings::default(), &session(), "why?").await.unwrap_err();
        assert!(matches!(err, ChatError::NotConfigured));
        assert_eq!(err.kind(), "NotConfiguredError");
    }

    #[tokio::test]
    async fn disabled_auto_linking_skips_the_provider() {
        let mut g = nexus_core::GraphStore::new();
        g.add_node(nexus_core::NewNode::new(nexus_core::NodeType::Child, "a").id("a")).unwrap();
        g.add_node(nexus_core::NewNode::new(nexus_core::NodeType::Child, "b").id("b")).unwrap();
        let summaries = g.node_summaries(None);
        let off = AutoLinking {
            enabled: false,
            ..AutoLinking::default()
        };
        let links = suggest_links(&AiSettings::default(), &off, &summaries[0], &summaries[1..])
            .await
            .unwrap();
        assert!(links.is_empty());

        let err = suggest_links(&AiSettings::default(), &AutoLinking::default(), &summaries[0], &summaries[1..])
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotConfigured));
    }

    #[tokio::test]
    async fn justification_needs_assist_then_a_provider() {
        let mut g = nexus_core::GraphStore::new();
        g.add_node(nexus_core::NewNode::new(nexus_core::NodeType::Child, "a").id("a")).unwrap();
        g.add_node(nexus_core::NewNode::new(nexus_core::NodeType::Module, "b").id("b")).unwrap();
        let s = g.node_summaries(None);

        let off = CanvasSettings::default();
        let err = suggest_justification(&AiSettings::default(), &off, &s[0], &s[1], None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::AssistDisabled));
        assert_eq!(err.kind(), "AssistDisabledError");

        let on = CanvasSettings {
            manual_connection_ai_assist: true,
            ..CanvasSettings::default()
        };
        let err = suggest_justification(&AiSettings::default(), &on, &s[0], &s[1], Some("hint"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotConfigured));
    }
}
