//! Conversation memory
//!
//! History is partitioned by [`SessionKey`] and only ever appended to. The
//! orchestrator loads recent history before building a prompt and appends
//! the finished exchange afterwards.

#[cfg(feature = "persistence")]
mod schema;
#[cfg(feature = "persistence")]
mod sqlite;

#[cfg(feature = "persistence")]
pub use sqlite::{SqliteMemory, ThreadSummary};

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::llm::{Message, Role};

/// Identifies a conversation thread, optionally scoped to a resource (user, tenant)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub thread: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}

impl SessionKey {
    pub fn thread(thread: impl Into<String>) -> Self {
        Self {
            thread: thread.into(),
            resource: None,
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.resource {
            Some(resource) => write!(f, "{}/{}", resource, self.thread),
            None => write!(f, "{}", self.thread),
        }
    }
}

/// A message to append
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMemoryMessage {
    pub role: Role,
    pub content: String,
    /// Tool that produced (or was requested by) this message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl NewMemoryMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_name: None,
        }
    }

    pub fn with_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }
}

/// A stored message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MemoryMessage {
    /// Convert to a chat message for the backend
    ///
    /// Stored tool requests are replayed as plain assistant text so the
    /// backend does not try to match them to live tool call ids.
    pub fn to_message(&self) -> Message {
        match (&self.role, &self.tool_name) {
            (Role::Assistant, Some(tool)) => {
                Message::assistant(format!("[called {}] {}", tool, self.content))
            }
            (role, _) => Message::new(*role, &self.content),
        }
    }
}

/// Persistent conversation history
///
/// Appends for one session key should be atomic; concurrent writers on the
/// same key are serialised by the store, not by callers.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Load history for `session`, oldest first; `limit` keeps only the newest N
    async fn load(&self, session: &SessionKey, limit: Option<usize>) -> Result<Vec<MemoryMessage>>;

    /// Append messages to `session` as one batch
    async fn append(&self, session: &SessionKey, messages: Vec<NewMemoryMessage>) -> Result<()>;
}

/// Process-local memory store
#[derive(Debug, Default)]
pub struct InMemoryStore {
    threads: Mutex<HashMap<SessionKey, Vec<MemoryMessage>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<SessionKey, Vec<MemoryMessage>>>> {
        self.threads
            .lock()
            .map_err(|_| AgentError::memory("memory lock poisoned"))
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn load(&self, session: &SessionKey, limit: Option<usize>) -> Result<Vec<MemoryMessage>> {
        let threads = self.lock()?;
        let history = threads.get(session).cloned().unwrap_or_default();
        Ok(keep_newest(history, limit))
    }

    async fn append(&self, session: &SessionKey, messages: Vec<NewMemoryMessage>) -> Result<()> {
        let now = Utc::now();
        let mut threads = self.lock()?;
        threads
            .entry(session.clone())
            .or_default()
            .extend(messages.into_iter().map(|m| MemoryMessage {
                role: m.role,
                content: m.content,
                tool_name: m.tool_name,
                created_at: now,
            }));
        Ok(())
    }
}

fn keep_newest(mut history: Vec<MemoryMessage>, limit: Option<usize>) -> Vec<MemoryMessage> {
    if let Some(limit) = limit {
        if history.len() > limit {
            history.drain(..history.len() - limit);
        }
    }
    history
}
