//! The user registry: every user who has written to the bot, newest activity
//! kept, oldest evicted beyond a fixed cap. Backs `/users` and `/post all`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use courier_shared::constants::{KEY_USER_LIST, MAX_USERS_LIMIT};
use courier_shared::UserIdentity;

use crate::blob::{self, MAX_CAS_ATTEMPTS};
use crate::error::{Result, StoreError};
use crate::kv::{KvStore, WriteOutcome};
use crate::models::RegistryRecord;

#[derive(Clone)]
pub struct UserRegistry {
    store: Arc<dyn KvStore>,
    capacity: usize,
}

impl UserRegistry {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self::with_capacity(store, MAX_USERS_LIMIT)
    }

    pub fn with_capacity(store: Arc<dyn KvStore>, capacity: usize) -> Self {
        Self { store, capacity }
    }

    /// All records in stored order. Unreadable or corrupt data yields an
    /// empty list.
    pub fn list(&self) -> Vec<RegistryRecord> {
        match blob::read_lenient::<Vec<RegistryRecord>>(self.store.as_ref(), KEY_USER_LIST) {
            Ok((snapshot, None)) => snapshot.value,
            Ok((snapshot, Some(err))) => {
                warn!(error = %err, "User registry is corrupt, treating as empty");
                snapshot.value
            }
            Err(e) => {
                warn!(error = %e, "Failed to read user registry");
                Vec::new()
            }
        }
    }

    /// The `limit` most recently active users, newest first.
    pub fn recent(&self, limit: usize) -> Vec<RegistryRecord> {
        let mut users = self.list();
        sort_newest_first(&mut users);
        users.truncate(limit);
        users
    }

    pub fn chat_ids(&self) -> Vec<i64> {
        self.list().into_iter().map(|r| r.chat_id).collect()
    }

    /// Insert or refresh the record for `identity`'s chat.
    pub fn touch(&self, identity: &UserIdentity, now: DateTime<Utc>) -> Result<()> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let (snapshot, corrupt) =
                blob::read_lenient::<Vec<RegistryRecord>>(self.store.as_ref(), KEY_USER_LIST)?;
            if let Some(err) = corrupt {
                warn!(error = %err, "Overwriting corrupt user registry");
            }

            let mut users = snapshot.value;
            let record = RegistryRecord::from_identity(identity, now);
            match users.iter_mut().find(|u| u.chat_id == identity.chat_id) {
                Some(existing) => *existing = record,
                None => users.push(record),
            }

            if users.len() > self.capacity {
                sort_newest_first(&mut users);
                let evicted = users.len() - self.capacity;
                users.truncate(self.capacity);
                info!(evicted, capacity = self.capacity, "Evicted least recently active users");
            }

            match blob::write_if(self.store.as_ref(), KEY_USER_LIST, snapshot.version, &users)? {
                WriteOutcome::Written(version) => {
                    debug!(chat_id = identity.chat_id, version, "User registry updated");
                    return Ok(());
                }
                WriteOutcome::Conflict => {
                    debug!(attempt, "User registry changed concurrently, retrying");
                }
            }
        }

        Err(StoreError::Conflict {
            key: KEY_USER_LIST.to_string(),
            attempts: MAX_CAS_ATTEMPTS,
        })
    }
}

fn sort_newest_first(users: &mut [RegistryRecord]) {
    users.sort_by(|a, b| b.last_active.cmp(&a.last_active));
}
