//! SQLite-backed [`KvStore`].
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation. Each key is one row holding
//! a JSON text blob and its write version.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, StoreError};
use crate::kv::{KvStore, Versioned, WriteOutcome};
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open (or create) a database at an explicit path, creating parent
    /// directories as needed.
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "opening database");

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl KvStore for Database {
    fn get(&self, key: &str) -> Result<Option<Versioned>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT value, version FROM kv WHERE key = ?1",
                params![key],
                |row| {
                    Ok(Versioned {
                        value: row.get(0)?,
                        version: row.get::<_, i64>(1)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn put(&self, key: &str, value: &str) -> Result<u64> {
        let conn = self.conn()?;
        let version: i64 = conn.query_row(
            "INSERT INTO kv (key, value, version, updated_at)
             VALUES (?1, ?2, 1, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                version = kv.version + 1,
                updated_at = excluded.updated_at
             RETURNING version",
            params![key, value, Utc::now().to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(version as u64)
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<u64>,
        value: &str,
    ) -> Result<WriteOutcome> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();

        let affected = match expected {
            None => conn.execute(
                "INSERT INTO kv (key, value, version, updated_at)
                 VALUES (?1, ?2, 1, ?3)
                 ON CONFLICT(key) DO NOTHING",
                params![key, value, now],
            )?,
            Some(version) => conn.execute(
                "UPDATE kv SET value = ?2, version = version + 1, updated_at = ?3
                 WHERE key = ?1 AND version = ?4",
                params![key, value, now, version as i64],
            )?,
        };

        if affected == 0 {
            return Ok(WriteOutcome::Conflict);
        }
        Ok(WriteOutcome::Written(expected.map_or(1, |v| v + 1)))
    }
}
