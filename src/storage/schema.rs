//! SQLite schema and connection pragmas.
//!
//! One database file holds both the per-stream checkpoints and the leader
//! lease rows, so every member of a cluster sharing the file sees the same
//! linearizable history.

use rusqlite::Connection;
use std::time::Duration;

/// Pragmas applied to every pooled connection.
///
/// WAL lets readers proceed while a save is in flight; `synchronous=FULL`
/// makes a returned save durable.
pub fn apply_pragmas(conn: &Connection) -> Result<(), rusqlite::Error> {
    // journal_mode answers with the resulting mode ("memory" for in-memory
    // databases), so it cannot go through execute_batch.
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch(
        r#"
        PRAGMA synchronous = FULL;
        PRAGMA foreign_keys = ON;
        "#,
    )
}

/// Create tables if they do not exist yet.
pub fn initialize_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS tso_checkpoints (
            stream_id      TEXT PRIMARY KEY,
            saved_physical INTEGER NOT NULL,
            version        INTEGER NOT NULL,
            updated_at     INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS leader_leases (
            election   TEXT PRIMARY KEY,
            leader_id  TEXT NOT NULL,
            epoch      INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        );
        "#,
    )
}
