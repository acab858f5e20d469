use rusqlite::Connection;

use crate::error::Result;

/// Initialise the job and job-log tables.
///
/// Safe to call on every startup: uses `IF NOT EXISTS` throughout. The
/// `(status, scheduled_at)` index backs the due-job claim query. Databases
/// created before `retry_at` existed get the column added in place.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id               TEXT    NOT NULL PRIMARY KEY,
            name             TEXT    NOT NULL,
            payload          TEXT    NOT NULL,   -- opaque JSON
            status           TEXT    NOT NULL DEFAULT 'pending',
            scheduled_at     TEXT    NOT NULL,   -- fixed-width RFC 3339, UTC
            recurrence       TEXT    NOT NULL DEFAULT 'none',
            retry_count      INTEGER NOT NULL DEFAULT 0,
            max_retries      INTEGER NOT NULL DEFAULT 3,
            dead_lettered    INTEGER NOT NULL DEFAULT 0,
            last_executed_at TEXT,
            retry_at         TEXT,               -- backoff gate, NULL when not retrying
            created_at       TEXT    NOT NULL,
            updated_at       TEXT    NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_jobs_due ON jobs (status, scheduled_at);

        CREATE TABLE IF NOT EXISTS job_logs (
            id        TEXT NOT NULL PRIMARY KEY,
            job_id    TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
            status    TEXT NOT NULL,
            message   TEXT NOT NULL DEFAULT '',
            logged_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_job_logs_job ON job_logs (job_id, logged_at);
        ",
    )?;
    add_column_if_missing(conn, "jobs", "retry_at", "TEXT")?;
    Ok(())
}

fn add_column_if_missing(conn: &Connection, table: &str, column: &str, decl: &str) -> Result<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    if !names.iter().any(|n| n == column) {
        conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"))?;
    }
    Ok(())
}
