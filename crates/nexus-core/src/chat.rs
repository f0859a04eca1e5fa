//! Per-canvas chat sessions.
//!
//! A session is keyed by the `(canvas, selection, depth)` it was opened
//! for, so asking again about the same selection resumes the same thread.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::{ContextResult, DepthMode};
use crate::error::{Entity, Error, Result};
use crate::model::{CanvasId, NodeId, SessionId};

/// Namespace for session ids; fixed so ids survive restarts.
const SESSION_NAMESPACE: Uuid = Uuid::from_u128(0x6e65_7875_735f_4ad2_9c1e_5d0a_7f3b_c4e1);

/// Deterministic session id for a selection. The selection is
/// de-duplicated and sorted, so caller order does not matter.
pub fn session_id(canvas: &CanvasId, selection: &BTreeSet<NodeId>, depth: DepthMode) -> SessionId {
    let ids: Vec<&str> = selection.iter().map(NodeId::as_str).collect();
    let name = format!("{canvas}\u{1f}{}\u{1f}{depth}", ids.join("\u{1e}"));
    SessionId::from(Uuid::new_v5(&SESSION_NAMESPACE, name.as_bytes()).to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: SessionId,
    pub selection: Vec<NodeId>,
    pub depth: DepthMode,
    /// Context as of the last time the session was opened.
    pub context: ContextResult,
    #[serde(default)]
    pub turns: Vec<ChatTurn>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// In-memory chat sessions of one canvas, in creation order.
#[derive(Debug, Clone, Default)]
pub struct ChatLog {
    sessions: IndexMap<SessionId, ChatSession>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_sessions(sessions: Vec<ChatSession>) -> Self {
        Self {
            sessions: sessions.into_iter().map(|s| (s.id.clone(), s)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Opens the session for this selection, or refreshes its context
    /// snapshot if it exists. Turns are kept. Returns the session and the
    /// previous state, which [`ChatLog::restore`] uses to undo the open.
    pub fn open(
        &mut self,
        id: SessionId,
        selection: &BTreeSet<NodeId>,
        depth: DepthMode,
        context: ContextResult,
    ) -> (ChatSession, Option<ChatSession>) {
        let now = Utc::now();
        let previous = self.sessions.get(&id).cloned();
        let session = match self.sessions.get_mut(&id) {
            Some(existing) => {
                existing.context = context;
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                let session = ChatSession {
                    id: id.clone(),
                    selection: selection.iter().cloned().collect(),
                    depth,
                    context,
                    turns: Vec::new(),
                    created_at: now,
                    updated_at: now,
                };
                self.sessions.insert(id, session.clone());
                session
            }
        };
        (session, previous)
    }

    /// Puts a session back to an earlier state; `None` removes it.
    pub fn restore(&mut self, id: &SessionId, previous: Option<ChatSession>) {
        match previous {
            Some(session) => {
                if let Some(slot) = self.sessions.get_mut(id) {
                    *slot = session;
                }
            }
            None => {
                self.sessions.shift_remove(id);
            }
        }
    }

    pub fn append(&mut self, id: &str, role: Role, content: impl Into<String>) -> Result<ChatTurn> {
        let session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(Entity::Session(SessionId::from(id))))?;
        let turn = ChatTurn {
            role,
            content: content.into(),
            at: Utc::now(),
        };
        session.turns.push(turn.clone());
        session.updated_at = turn.at;
        Ok(turn)
    }

    /// Appends a question and its answer as one step. Either both turns
    /// are added or neither is.
    pub fn append_exchange(
        &mut self,
        id: &str,
        question: impl Into<String>,
        answer: impl Into<String>,
    ) -> Result<(ChatTurn, ChatTurn)> {
        let session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(Entity::Session(SessionId::from(id))))?;
        let at = Utc::now();
        let asked = ChatTurn {
            role: Role::User,
            content: question.into(),
            at,
        };
        let answered = ChatTurn {
            role: Role::Assistant,
            content: answer.into(),
            at,
        };
        session.turns.push(asked.clone());
        session.turns.push(answered.clone());
        session.updated_at = at;
        Ok((asked, answered))
    }

    /// Position a later [`ChatLog::rewind`] returns the session to.
    pub(crate) fn mark(&self, id: &str) -> Option<(usize, DateTime<Utc>)> {
        self.sessions.get(id).map(|s| (s.turns.len(), s.updated_at))
    }

    /// Drops every turn appended to `id` since `mark`.
    pub(crate) fn rewind(&mut self, id: &str, (len, updated_at): (usize, DateTime<Utc>)) {
        if let Some(session) = self.sessions.get_mut(id) {
            session.turns.truncate(len);
            session.updated_at = updated_at;
        }
    }

    pub fn get(&self, id: &str) -> Option<&ChatSession> {
        self.sessions.get(id)
    }

    pub fn to_vec(&self) -> Vec<ChatSession> {
        self.sessions.values().cloned().collect()
    }
}
