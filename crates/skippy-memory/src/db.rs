use rusqlite::Connection;

use crate::error::Result;

/// Open the memory database with WAL journaling and a 5s busy timeout.
/// Both are mandatory: the file is shared across concurrent prompt chains.
pub fn open(path: &std::path::Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    init_db(&conn)?;
    Ok(conn)
}

/// Initialise tables. Safe to call on every startup (idempotent).
///
/// One `memories` table keyed by `(scope, key)` covers global and all
/// channel scopes; channel scopes come into existence on first write.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memories (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            scope       TEXT NOT NULL,
            key         TEXT NOT NULL,
            value       TEXT NOT NULL,
            category    TEXT NOT NULL DEFAULT 'general',
            tags        TEXT NOT NULL DEFAULT '',
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL,
            UNIQUE(scope, key)
        );
        CREATE INDEX IF NOT EXISTS idx_memories_scope
            ON memories(scope);
        CREATE INDEX IF NOT EXISTS idx_memories_category
            ON memories(category);

        CREATE TABLE IF NOT EXISTS skills (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            name              TEXT NOT NULL UNIQUE,
            description       TEXT NOT NULL DEFAULT '',
            instructions      TEXT NOT NULL DEFAULT '',
            owner             TEXT NOT NULL DEFAULT 'global',
            skill_data        TEXT NOT NULL DEFAULT '{}',
            training_progress TEXT NOT NULL DEFAULT '{}',
            created_at        TEXT NOT NULL,
            updated_at        TEXT NOT NULL
        );",
    )?;
    Ok(())
}
