//! SQLite-backed metadata store.
//!
//! Uses r2d2 with r2d2_sqlite for pooled access. Every statement runs on the
//! blocking thread pool so async callers never stall a runtime worker on
//! disk I/O. Compare-and-swap is expressed as a guarded `INSERT`/`UPDATE`
//! inside an immediate transaction.

use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;

use super::checkpoint::{Checkpoint, CheckpointStore, StoreError};
use super::schema::{apply_pragmas, initialize_schema};
use crate::clock::{Clock, SystemClock};
use crate::stream::StreamKey;

/// Pooled connections to the shared metadata database.
///
/// Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct SqliteBackend {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteBackend {
    /// Open (creating if needed) the database at `db_path`.
    ///
    /// # Arguments
    ///
    /// * `db_path` - Path to the SQLite database file
    /// * `max_size` - Maximum number of connections in the pool
    pub fn open<P: AsRef<Path>>(db_path: P, max_size: u32) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Unavailable(format!(
                        "cannot create {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(max_size)
            .connection_customizer(Box::new(PragmaCustomizer))
            .build(manager)?;

        {
            let conn = pool.get()?;
            initialize_schema(&conn)?;
        }

        Ok(Self { pool })
    }

    /// Run `f` with a pooled connection on the blocking thread pool.
    pub async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("store task failed: {e}")))?
    }
}

/// Connection customizer that applies pragmas on acquire.
#[derive(Debug)]
struct PragmaCustomizer;

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        apply_pragmas(conn)
    }
}

/// Checkpoint store over the shared SQLite database.
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    backend: SqliteBackend,
}

impl SqliteCheckpointStore {
    pub fn new(backend: SqliteBackend) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &SqliteBackend {
        &self.backend
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn load(&self, stream: &StreamKey) -> Result<Option<Checkpoint>, StoreError> {
        let key = stream.storage_key();
        self.backend
            .with_conn(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT saved_physical, version FROM tso_checkpoints WHERE stream_id = ?1",
                        [&key],
                        |row| {
                            Ok(Checkpoint {
                                saved_physical: row.get(0)?,
                                version: row.get::<_, i64>(1)? as u64,
                            })
                        },
                    )
                    .optional()?;
                Ok(row)
            })
            .await
    }

    async fn save(
        &self,
        stream: &StreamKey,
        saved_physical: i64,
        expected_version: u64,
    ) -> Result<u64, StoreError> {
        let key = stream.storage_key();
        let now = SystemClock.now_millis();
        self.backend
            .with_conn(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

                let changed = if expected_version == 0 {
                    tx.execute(
                        "INSERT INTO tso_checkpoints (stream_id, saved_physical, version, updated_at)
                         VALUES (?1, ?2, 1, ?3)
                         ON CONFLICT(stream_id) DO NOTHING",
                        params![key, saved_physical, now],
                    )?
                } else {
                    tx.execute(
                        "UPDATE tso_checkpoints
                         SET saved_physical = ?2, version = version + 1, updated_at = ?3
                         WHERE stream_id = ?1 AND version = ?4",
                        params![key, saved_physical, now, expected_version as i64],
                    )?
                };

                if changed == 1 {
                    tx.commit()?;
                    return Ok(expected_version + 1);
                }

                let actual: Option<i64> = tx
                    .query_row(
                        "SELECT version FROM tso_checkpoints WHERE stream_id = ?1",
                        [&key],
                        |row| row.get(0),
                    )
                    .optional()?;
                Err(StoreError::VersionConflict {
                    expected: expected_version,
                    actual: actual.map(|v| v as u64),
                })
            })
            .await
    }
}
