//! Durable sample store.
//!
//! Append-only SQLite sink for samples, one row per sample in the
//! `performance` table. Every [`Store::append`] commits before returning;
//! per-record durability is traded against throughput so an acknowledged
//! append survives an immediate crash. The handle is exclusively
//! owned by the running collector; no concurrent writer is assumed.

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use thiserror::Error;

use crate::sample::Sample;

/// DDL for the `performance` table.
///
/// Layout is consumed by an external viewer: auto-increment id, ISO-8601
/// timestamp, cpu/memory percentages, string-encoded GPU reading, and the
/// cycle duration in seconds.
const PERFORMANCE_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS performance (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp    TEXT NOT NULL,
    cpu_usage    REAL NOT NULL,
    memory_usage REAL NOT NULL,
    gpu_usage    TEXT NOT NULL,
    cycle_time   REAL NOT NULL
);
"#;

/// Errors from the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Filesystem error while preparing the database location.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One persisted row, as an external viewer would read it.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceRow {
    pub id: i64,
    pub timestamp: String,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub gpu_usage: String,
    pub cycle_time: f64,
}

/// Long-lived handle to the performance database.
///
/// Opened for the duration of one backend run and released when it stops.
pub struct Store {
    conn: Connection,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Open (creating if absent) the database at `path` and ensure the schema.
    ///
    /// WAL journaling with full synchronous mode: each committed append is
    /// durable on its own.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path: PathBuf = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "FULL")?;

        let store = Self { conn };
        store.ensure_schema()?;
        tracing::debug!(path = %path.display(), "store opened");
        Ok(store)
    }

    /// Create the `performance` table if absent.
    ///
    /// Idempotent: callable any number of times, including against a
    /// database that already holds data.
    pub fn ensure_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(PERFORMANCE_TABLE_DDL)?;
        Ok(())
    }

    /// Append one sample as a fully committed row. Returns the row id.
    pub fn append(&self, sample: &Sample) -> Result<i64, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO performance (timestamp, cpu_usage, memory_usage, gpu_usage, cycle_time)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        stmt.execute(rusqlite::params![
            sample.timestamp.to_rfc3339(),
            sample.cpu_usage,
            sample.memory_usage,
            sample.gpu_usage.encode(),
            sample.cycle_time.as_secs_f64(),
        ])?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Number of persisted rows.
    pub fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM performance", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// All rows in insertion order, as the external viewer reads them.
    pub fn fetch_all(&self) -> Result<Vec<PerformanceRow>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, timestamp, cpu_usage, memory_usage, gpu_usage, cycle_time
             FROM performance ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(PerformanceRow {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                cpu_usage: row.get(2)?,
                memory_usage: row.get(3)?,
                gpu_usage: row.get(4)?,
                cycle_time: row.get(5)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)
    }
}
