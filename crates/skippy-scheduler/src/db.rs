use rusqlite::Connection;

use crate::error::Result;

/// Open the cron database with WAL journaling and a 5s busy timeout.
pub fn open(path: &std::path::Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    init_db(&conn)?;
    Ok(conn)
}

/// Initialise the jobs table. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS cron_jobs (
            id          TEXT PRIMARY KEY,
            job_type    TEXT NOT NULL,
            action      TEXT NOT NULL,
            time        TEXT,
            interval_ms INTEGER,
            schedule    TEXT,
            disabled    INTEGER NOT NULL DEFAULT 0,
            last_fired  TEXT,
            created_at  TEXT NOT NULL
        );",
    )?;
    Ok(())
}
