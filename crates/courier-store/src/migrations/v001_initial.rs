//! v001 -- Initial schema creation.
//!
//! A single `kv` table: one row per key, holding an opaque JSON text blob and
//! a monotonically increasing write version used for conditional writes.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key        TEXT PRIMARY KEY NOT NULL,
    value      TEXT NOT NULL,                 -- JSON blob, not validated here
    version    INTEGER NOT NULL DEFAULT 1,    -- bumped on every write
    updated_at TEXT NOT NULL                  -- RFC-3339
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
