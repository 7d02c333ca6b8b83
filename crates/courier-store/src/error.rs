use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A value could not be encoded before writing.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted blob is not valid JSON of the expected shape.
    #[error("Corrupt value under '{key}': {detail}")]
    Corrupt { key: String, detail: String },

    /// A conditional write kept losing to concurrent writers.
    #[error("Write conflict on '{key}' after {attempts} attempts")]
    Conflict { key: String, attempts: u32 },

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A lock guarding the connection was poisoned by a panicking holder.
    #[error("Store lock poisoned")]
    Poisoned,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
