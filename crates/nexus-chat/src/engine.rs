use std::time::Duration;

use llm::builder::{LLMBackend, LLMBuilder};
use llm::chat::ChatMessage;

use nexus_core::{AiSettings, ChatTurn, Role};

use crate::ChatError;

/// Upper bound on one provider round trip.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

fn map_backend(provider: &str) -> Result<LLMBackend, ChatError> {
    match provider {
        "openai" => Ok(LLMBackend::OpenAI),
        "anthropic" => Ok(LLMBackend::Anthropic),
        "google" => Ok(LLMBackend::Google),
        "ollama" => Ok(LLMBackend::Ollama),
        "groq" => Ok(LLMBackend::Groq),
        "mistral" => Ok(LLMBackend::Mistral),
        "deepseek" => Ok(LLMBackend::DeepSeek),
        other => Err(ChatError::Provider(format!("unknown provider: {other}"))),
    }
}

fn to_message(turn: &ChatTurn) -> ChatMessage {
    match turn.role {
        Role::User => ChatMessage::user().content(&turn.content).build(),
        Role::Assistant => ChatMessage::assistant().content(&turn.content).build(),
    }
}

/// Send `history` plus `user_msg` to the configured provider and return the
/// reply text.
pub async fn generate(
    settings: &AiSettings,
    system: &str,
    history: &[ChatTurn],
    user_msg: &str,
) -> Result<String, ChatError> {
    let backend = map_backend(&settings.provider)?;

    let mut builder = LLMBuilder::new()
        .backend(backend)
        .model(&settings.model)
        .system(system);

    if !settings.api_key.is_empty() {
        builder = builder.api_key(&settings.api_key);
    }

    let llm = builder
        .build()
        .map_err(|e| ChatError::Provider(format!("build LLM: {e}")))?;

    let mut messages: Vec<ChatMessage> = history.iter().map(to_message).collect();
    messages.push(ChatMessage::user().content(user_msg).build());

    let response = tokio::time::timeout(REQUEST_TIMEOUT, llm.chat(&messages))
        .await
        .map_err(|_| ChatError::Provider("request timed out".to_string()))?
        .map_err(|e| ChatError::Provider(format!("chat: {e}")))?;

    match response.text() {
        Some(text) if !text.trim().is_empty() => Ok(text),
        Some(_) => Err(ChatError::Provider("LLM returned empty text".to_string())),
        None => Err(ChatError::Provider("LLM returned no text".to_string())),
    }
}
