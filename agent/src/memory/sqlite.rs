//! SQLite-backed memory store
//!
//! Stores threads and messages in a single database file (by default
//! `~/.quill/memory.db`). All access goes through one connection guarded by a
//! mutex, and each append runs in a transaction, so batches from concurrent
//! invocations never interleave.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::schema;
use super::{MemoryMessage, MemoryStore, NewMemoryMessage, SessionKey};
use crate::error::{AgentError, Result};
use crate::llm::Role;

/// A thread listed from the store
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadSummary {
    pub session: SessionKey,
    pub message_count: u32,
    pub updated_at: DateTime<Utc>,
}

/// Memory store backed by a SQLite file
#[derive(Clone)]
pub struct SqliteMemory {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteMemory").field("path", &self.path).finish()
    }
}

fn resource_column(session: &SessionKey) -> &str {
    session.resource.as_deref().unwrap_or("")
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| DateTime::<Utc>::UNIX_EPOCH)
}

impl SqliteMemory {
    /// Open or create the database at the default location (~/.quill/memory.db)
    pub fn open() -> Result<Self> {
        let path = Self::default_path()?;
        Self::open_at(path)
    }

    /// Open or create the database at a specific path
    pub fn open_at(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                AgentError::memory(format!("Failed to create directory {:?}: {}", parent, e))
            })?;
        }

        let conn = Connection::open(&path).map_err(|e| {
            AgentError::memory(format!("Failed to open database at {:?}: {}", path, e))
        })?;
        Self::initialise(conn, path)
    }

    /// Open a throwaway in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialise(conn, PathBuf::from(":memory:"))
    }

    fn initialise(conn: Connection, path: PathBuf) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::create_tables(&conn)?;
        let version = schema::get_version(&conn)?;
        if version != schema::SCHEMA_VERSION {
            return Err(AgentError::memory(format!(
                "Unsupported memory schema version {} (expected {})",
                version,
                schema::SCHEMA_VERSION
            )));
        }
        tracing::info!("Memory database opened at {:?}", path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Get the default database path
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| AgentError::memory("Could not determine home directory"))?;
        Ok(home.join(".quill").join("memory.db"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AgentError::memory("memory database lock poisoned"))
    }

    /// List threads, most recently updated first
    pub fn list_threads(&self, limit: u32) -> Result<Vec<ThreadSummary>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT t.id, t.resource_id, t.updated_at,
                   (SELECT COUNT(*) FROM messages m
                    WHERE m.thread_id = t.id AND m.resource_id = t.resource_id)
            FROM threads t
            ORDER BY t.updated_at DESC
            LIMIT ?1
            "#,
        )?;

        let threads = stmt
            .query_map([limit], |row| {
                let thread: String = row.get(0)?;
                let resource: String = row.get(1)?;
                let updated_at: String = row.get(2)?;
                Ok(ThreadSummary {
                    session: SessionKey {
                        thread,
                        resource: (!resource.is_empty()).then_some(resource),
                    },
                    updated_at: parse_timestamp(&updated_at),
                    message_count: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(threads)
    }

    /// Delete a thread and its messages
    pub fn delete_thread(&self, session: &SessionKey) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM threads WHERE id = ?1 AND resource_id = ?2",
            params![session.thread, resource_column(session)],
        )?;
        Ok(rows > 0)
    }

    fn load_blocking(
        &self,
        session: &SessionKey,
        limit: Option<usize>,
    ) -> Result<Vec<MemoryMessage>> {
        // Newest first so LIMIT keeps the tail; a negative limit means none
        let limit = limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT role, content, tool_name, created_at
            FROM messages
            WHERE thread_id = ?1 AND resource_id = ?2
            ORDER BY seq DESC
            LIMIT ?3
            "#,
        )?;

        let mut messages = stmt
            .query_map(params![session.thread, resource_column(session), limit], |row| {
                let role: String = row.get(0)?;
                let created_at: String = row.get(3)?;
                Ok(MemoryMessage {
                    role: role.parse().map_err(|e: String| {
                        rusqlite::Error::FromSqlConversionFailure(0, Type::Text, e.into())
                    })?,
                    content: row.get(1)?,
                    tool_name: row.get(2)?,
                    created_at: parse_timestamp(&created_at),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        messages.reverse();
        Ok(messages)
    }

    fn append_blocking(&self, session: &SessionKey, messages: Vec<NewMemoryMessage>) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let now = Utc::now().to_rfc3339();
        let resource = resource_column(session);
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let exists: Option<String> = tx
            .query_row(
                "SELECT id FROM threads WHERE id = ?1 AND resource_id = ?2",
                params![session.thread, resource],
                |row| row.get(0),
            )
            .optional()?;

        if exists.is_some() {
            tx.execute(
                "UPDATE threads SET updated_at = ?1 WHERE id = ?2 AND resource_id = ?3",
                params![now, session.thread, resource],
            )?;
        } else {
            tx.execute(
                "INSERT INTO threads (id, resource_id, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?3)",
                params![session.thread, resource, now],
            )?;
        }

        {
            let mut insert = tx.prepare(
                r#"
                INSERT INTO messages (id, thread_id, resource_id, role, content, tool_name, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )?;
            for message in &messages {
                insert.execute(params![
                    Uuid::new_v4().to_string(),
                    session.thread,
                    resource,
                    message.role.to_string(),
                    message.content,
                    message.tool_name,
                    now,
                ])?;
            }
        }

        tx.commit()?;
        tracing::debug!(session = %session, count = messages.len(), "Appended memory");
        Ok(())
    }
}

#[async_trait]
impl MemoryStore for SqliteMemory {
    async fn load(&self, session: &SessionKey, limit: Option<usize>) -> Result<Vec<MemoryMessage>> {
        let store = self.clone();
        let session = session.clone();
        tokio::task::spawn_blocking(move || store.load_blocking(&session, limit))
            .await
            .map_err(|e| AgentError::memory(format!("memory task failed: {}", e)))?
    }

    async fn append(&self, session: &SessionKey, messages: Vec<NewMemoryMessage>) -> Result<()> {
        let store = self.clone();
        let session = session.clone();
        tokio::task::spawn_blocking(move || store.append_blocking(&session, messages))
            .await
            .map_err(|e| AgentError::memory(format!("memory task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn test_store() -> (SqliteMemory, TempDir) {
        let dir = tempdir().unwrap();
        let store = SqliteMemory::open_at(dir.path().join("memory.db")).unwrap();
        (store, dir)
    }

    fn exchange(prompt: &str, reply: &str) -> Vec<NewMemoryMessage> {
        vec![
            NewMemoryMessage::new(Role::User, prompt),
            NewMemoryMessage::new(Role::Assistant, "{\"topic\":\"Rust\"}")
                .with_tool("copywriter-agent"),
            NewMemoryMessage::new(Role::Tool, "draft").with_tool("copywriter-agent"),
            NewMemoryMessage::new(Role::Assistant, reply),
        ]
    }

    #[test]
    fn test_open_creates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("memory.db");
        let store = SqliteMemory::open_at(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), path.as_path());
    }

    #[tokio::test]
    async fn test_append_then_load_preserves_order() {
        let (store, _dir) = test_store();
        let session = SessionKey::thread("blog");

        store.append(&session, exchange("Write about Rust", "Final copy")).await.unwrap();

        let history = store.load(&session, None).await.unwrap();
        let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
        assert_eq!(history[1].tool_name.as_deref(), Some("copywriter-agent"));
        assert_eq!(history[3].content, "Final copy");
    }

    #[tokio::test]
    async fn test_load_limit() {
        let (store, _dir) = test_store();
        let session = SessionKey::thread("blog");
        store.append(&session, exchange("one", "first")).await.unwrap();
        store.append(&session, exchange("two", "second")).await.unwrap();

        let history = store.load(&session, Some(4)).await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].content, "two");
    }

    #[tokio::test]
    async fn test_load_limit_larger_than_thread() {
        let (store, _dir) = test_store();
        let session = SessionKey::thread("blog");
        store.append(&session, exchange("one", "first")).await.unwrap();

        let history = store.load(&session, Some(50)).await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].content, "one");
        assert!(store.load(&session, Some(0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_stored_role_is_an_error() {
        let (store, _dir) = test_store();
        let session = SessionKey::thread("blog");
        store.append(&session, exchange("one", "first")).await.unwrap();

        store
            .lock()
            .unwrap()
            .execute("UPDATE messages SET role = 'narrator' WHERE content = 'first'", [])
            .unwrap();

        let err = store.load(&session, None).await.unwrap_err();
        assert!(matches!(err, AgentError::Memory(_)));
        assert!(err.to_string().contains("narrator"));
    }

    #[tokio::test]
    async fn test_threads_partitioned_by_resource() {
        let (store, _dir) = test_store();
        let alice = SessionKey::thread("shared").with_resource("alice");
        let anonymous = SessionKey::thread("shared");

        store.append(&alice, exchange("a", "b")).await.unwrap();

        assert_eq!(store.load(&alice, None).await.unwrap().len(), 4);
        assert!(store.load(&anonymous, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("memory.db");
        let session = SessionKey::thread("persisted");

        {
            let store = SqliteMemory::open_at(&path).unwrap();
            store.append(&session, exchange("hello", "world")).await.unwrap();
        }

        let reopened = SqliteMemory::open_at(&path).unwrap();
        assert_eq!(reopened.load(&session, None).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_list_and_delete_threads() {
        let (store, _dir) = test_store();
        let first = SessionKey::thread("first");
        let second = SessionKey::thread("second").with_resource("bob");
        store.append(&first, exchange("a", "b")).await.unwrap();
        store.append(&second, exchange("c", "d")).await.unwrap();

        let threads = store.list_threads(10).unwrap();
        assert_eq!(threads.len(), 2);
        assert!(threads.iter().all(|t| t.message_count == 4));
        assert!(threads.iter().any(|t| t.session == second));

        assert!(store.delete_thread(&first).unwrap());
        assert!(store.load(&first, None).await.unwrap().is_empty());
        assert!(!store.delete_thread(&first).unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_appends_do_not_interleave() {
        let (store, _dir) = test_store();
        let session = SessionKey::thread("busy");

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let session = session.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append(
                        &session,
                        vec![
                            NewMemoryMessage::new(Role::User, format!("q{}", i)),
                            NewMemoryMessage::new(Role::Assistant, format!("a{}", i)),
                        ],
                    )
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let history = store.load(&session, None).await.unwrap();
        assert_eq!(history.len(), 16);
        for pair in history.chunks(2) {
            let question = pair[0].content.trim_start_matches('q');
            let answer = pair[1].content.trim_start_matches('a');
            assert_eq!(question, answer);
        }
    }
}
