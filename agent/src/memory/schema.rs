//! Memory database schema

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Create all tables if they don't exist
pub fn create_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- resource_id is '' for threads without a resource
        CREATE TABLE IF NOT EXISTS threads (
            id TEXT NOT NULL,
            resource_id TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (id, resource_id)
        );

        -- seq gives a stable append order within a batch
        CREATE TABLE IF NOT EXISTS messages (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            thread_id TEXT NOT NULL,
            resource_id TEXT NOT NULL DEFAULT '',
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            tool_name TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY (thread_id, resource_id) REFERENCES threads(id, resource_id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_messages_thread
        ON messages(thread_id, resource_id, seq);

        CREATE INDEX IF NOT EXISTS idx_threads_updated
        ON threads(updated_at DESC);

        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );

        INSERT OR IGNORE INTO schema_version (version) VALUES (1);
        "#,
    )
}

/// Get the current schema version
pub fn get_version(conn: &Connection) -> rusqlite::Result<i32> {
    conn.query_row(
        "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
        [],
        |row| row.get(0),
    )
}
