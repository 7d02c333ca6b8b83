//! Key-value blob store abstraction.
//!
//! Every value carries a version that increases on each write. Readers that
//! intend to write back pass the version they read to
//! [`KvStore::compare_and_swap`]; the write only lands if nobody else wrote
//! in between.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Result, StoreError};

/// A stored value together with its write version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub value: String,
    pub version: u64,
}

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The value was stored; carries the new version.
    Written(u64),
    /// The key changed since the expected version was read.
    Conflict,
}

pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Versioned>>;

    /// Unconditional write. Returns the new version.
    fn put(&self, key: &str, value: &str) -> Result<u64>;

    /// Write `value` only if the key is still at `expected` (`None` means the
    /// key must not exist yet).
    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<u64>,
        value: &str,
    ) -> Result<WriteOutcome>;
}

/// In-process store, used in tests and when no database path is configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Versioned>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Versioned>> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<u64> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        let version = entries.get(key).map_or(1, |v| v.version + 1);
        entries.insert(
            key.to_string(),
            Versioned {
                value: value.to_string(),
                version,
            },
        );
        Ok(version)
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<u64>,
        value: &str,
    ) -> Result<WriteOutcome> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        let current = entries.get(key).map(|v| v.version);
        if current != expected {
            return Ok(WriteOutcome::Conflict);
        }
        let version = current.map_or(1, |v| v + 1);
        entries.insert(
            key.to_string(),
            Versioned {
                value: value.to_string(),
                version,
            },
        );
        Ok(WriteOutcome::Written(version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_bumps_version() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);
        assert_eq!(store.put("k", "a").unwrap(), 1);
        assert_eq!(store.put("k", "b").unwrap(), 2);
        assert_eq!(
            store.get("k").unwrap(),
            Some(Versioned {
                value: "b".into(),
                version: 2
            })
        );
    }

    #[test]
    fn test_cas_create_only_once() {
        let store = MemoryStore::new();
        assert_eq!(
            store.compare_and_swap("k", None, "a").unwrap(),
            WriteOutcome::Written(1)
        );
        assert_eq!(
            store.compare_and_swap("k", None, "b").unwrap(),
            WriteOutcome::Conflict
        );
        assert_eq!(store.get("k").unwrap().unwrap().value, "a");
    }

    #[test]
    fn test_cas_stale_version_rejected() {
        let store = MemoryStore::new();
        store.put("k", "a").unwrap();
        store.put("k", "b").unwrap();
        assert_eq!(
            store.compare_and_swap("k", Some(1), "c").unwrap(),
            WriteOutcome::Conflict
        );
        assert_eq!(
            store.compare_and_swap("k", Some(2), "c").unwrap(),
            WriteOutcome::Written(3)
        );
    }
}
