//! `SQLite`-backed store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cadence_core::{Error, Result};
use directories::ProjectDirs;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::{prefix_upper_bound, BatchOp, KvStore};

/// Database file name inside the data directory.
const DB_FILE: &str = "cadence.db";

/// [`KvStore`] persisted in a single `SQLite` table.
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteStore {
    /// Open the store in the platform data directory.
    pub fn new() -> Result<Self> {
        let project_dirs = ProjectDirs::from("org", "cadence", "Cadence")
            .ok_or_else(|| Error::Store("Failed to determine data directory".to_string()))?;
        Self::open_in(project_dirs.data_dir())
    }

    /// Open (or create) `cadence.db` inside `dir`.
    pub fn open_in(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::Store(format!("Failed to create data directory: {e}")))?;
        Self::open(dir.join(DB_FILE))
    }

    /// Open (or create) the database file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let db = Connection::open(&path)
            .map_err(|e| Error::Database(format!("Failed to open database: {e}")))?;

        db.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            ) WITHOUT ROWID;
            ",
        )
        .map_err(|e| Error::Database(format!("Failed to initialize database: {e}")))?;

        info!("Store opened at {}", path.display());

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KvStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let db = self.db.lock();
        db.query_row("SELECT value FROM kv WHERE key = ?", [key], |row| {
            row.get::<_, String>(0)
        })
        .optional()
        .map_err(|e| Error::Database(format!("Failed to read {key}: {e}")))
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?, ?)",
            params![key, value],
        )
        .map_err(|e| Error::Database(format!("Failed to write {key}: {e}")))?;
        Ok(())
    }

    fn del(&self, key: &str) -> Result<()> {
        let db = self.db.lock();
        db.execute("DELETE FROM kv WHERE key = ?", [key])
            .map_err(|e| Error::Database(format!("Failed to delete {key}: {e}")))?;
        Ok(())
    }

    fn batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        let mut db = self.db.lock();
        let tx = db
            .transaction()
            .map_err(|e| Error::Database(format!("Failed to begin batch: {e}")))?;
        let count = ops.len();
        for op in ops {
            let applied = match op {
                BatchOp::Put { key, value } => tx.execute(
                    "INSERT OR REPLACE INTO kv (key, value) VALUES (?, ?)",
                    params![key, value],
                ),
                BatchOp::Del { key } => tx.execute("DELETE FROM kv WHERE key = ?", [key]),
            };
            applied.map_err(|e| Error::Database(format!("Batch operation failed: {e}")))?;
        }
        tx.commit()
            .map_err(|e| Error::Database(format!("Failed to commit batch: {e}")))?;
        debug!("Committed batch of {count} operations");
        Ok(())
    }

    fn iterate(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let db = self.db.lock();
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(String, String)> {
            Ok((row.get(0)?, row.get(1)?))
        };
        let rows = match prefix_upper_bound(prefix) {
            Some(upper) => {
                let mut stmt = db
                    .prepare("SELECT key, value FROM kv WHERE key >= ? AND key < ? ORDER BY key")
                    .map_err(|e| Error::Database(format!("Failed to prepare scan: {e}")))?;
                let rows = stmt
                    .query_map(params![prefix, upper], map_row)
                    .map_err(|e| Error::Database(format!("Failed to scan {prefix}: {e}")))?
                    .collect::<rusqlite::Result<Vec<_>>>();
                rows
            }
            None => {
                let mut stmt = db
                    .prepare("SELECT key, value FROM kv ORDER BY key")
                    .map_err(|e| Error::Database(format!("Failed to prepare scan: {e}")))?;
                let rows = stmt
                    .query_map([], map_row)
                    .map_err(|e| Error::Database(format!("Failed to scan store: {e}")))?
                    .collect::<rusqlite::Result<Vec<_>>>();
                rows
            }
        };
        rows.map_err(|e| Error::Database(format!("Failed to read row: {e}")))
    }
}
