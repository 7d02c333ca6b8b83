//! Typed access to JSON blobs stored under a single key.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, StoreError};
use crate::kv::{KvStore, WriteOutcome};

/// Upper bound on read-modify-write retries after a [`WriteOutcome::Conflict`].
pub const MAX_CAS_ATTEMPTS: u32 = 5;

/// A decoded blob and the version it was read at. `version` is `None` when
/// the key does not exist yet.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    pub value: T,
    pub version: Option<u64>,
}

/// Read and decode `key`. A missing key yields `T::default()`. A blob that
/// fails to decode is reported as [`StoreError::Corrupt`] together with the
/// version, so callers can overwrite it.
pub fn read<T>(store: &dyn KvStore, key: &str) -> Result<Snapshot<T>>
where
    T: DeserializeOwned + Default,
{
    match read_lenient(store, key)? {
        (snapshot, None) => Ok(snapshot),
        (_, Some(err)) => Err(err),
    }
}

/// Like [`read`], but a corrupt blob degrades to `T::default()` at the
/// blob's version. The decode error is handed back for logging.
pub fn read_lenient<T>(store: &dyn KvStore, key: &str) -> Result<(Snapshot<T>, Option<StoreError>)>
where
    T: DeserializeOwned + Default,
{
    let Some(stored) = store.get(key)? else {
        return Ok((
            Snapshot {
                value: T::default(),
                version: None,
            },
            None,
        ));
    };

    match serde_json::from_str::<T>(&stored.value) {
        Ok(value) => Ok((
            Snapshot {
                value,
                version: Some(stored.version),
            },
            None,
        )),
        Err(e) => Ok((
            Snapshot {
                value: T::default(),
                version: Some(stored.version),
            },
            Some(StoreError::Corrupt {
                key: key.to_string(),
                detail: e.to_string(),
            }),
        )),
    }
}

/// Encode `value` and write it if `key` is still at `expected`.
pub fn write_if<T: Serialize>(
    store: &dyn KvStore,
    key: &str,
    expected: Option<u64>,
    value: &T,
) -> Result<WriteOutcome> {
    let encoded = serde_json::to_string(value)?;
    store.compare_and_swap(key, expected, &encoded)
}
