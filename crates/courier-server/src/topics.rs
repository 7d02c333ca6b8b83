//! Per-user forum threads in the admin chat.
//!
//! When forum mode is on each user gets a dedicated topic, created lazily on
//! first contact. The user-to-thread mapping is a single JSON object in the
//! store and doubles as the reverse index used to route messages the admin
//! writes inside a topic.

use std::sync::Arc;

use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use courier_shared::constants::{DEFAULT_ICON_COLORS, KEY_USER_TOPIC_MAPPING, MAX_TOPIC_NAME_LEN};
use courier_store::blob::{self, MAX_CAS_ATTEMPTS};
use courier_store::{KvStore, TopicMapping, WriteOutcome};

use crate::client::RetryableApiClient;

/// Longest display name embedded in a topic title.
const MAX_TOPIC_DISPLAY_NAME: usize = 64;

pub struct TopicDirectory {
    store: Arc<dyn KvStore>,
    api: Arc<RetryableApiClient>,
    admin_chat_id: i64,
    enabled: bool,
}

impl TopicDirectory {
    pub fn new(
        store: Arc<dyn KvStore>,
        api: Arc<RetryableApiClient>,
        admin_chat_id: i64,
        enabled: bool,
    ) -> Self {
        Self {
            store,
            api,
            admin_chat_id,
            enabled,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Current mapping. Never fails: a missing or unreadable blob is empty.
    pub fn get_mapping(&self) -> TopicMapping {
        match blob::read_lenient::<TopicMapping>(self.store.as_ref(), KEY_USER_TOPIC_MAPPING) {
            Ok((snapshot, None)) => snapshot.value,
            Ok((snapshot, Some(err))) => {
                warn!(error = %err, "Topic mapping is corrupt, treating as empty");
                snapshot.value
            }
            Err(e) => {
                warn!(error = %e, "Failed to read topic mapping");
                TopicMapping::new()
            }
        }
    }

    /// Thread for `user_id`, creating the topic if there is none yet.
    /// Returns `None` when forum mode is off or the topic cannot be created.
    pub async fn get_or_create_topic(&self, user_id: i64, display_name: &str) -> Option<i64> {
        if !self.enabled {
            return None;
        }

        if let Some(&thread_id) = self.get_mapping().get(&user_id) {
            debug!(user_id, thread_id, "Using existing topic");
            return Some(thread_id);
        }

        let name = topic_name(display_name, user_id);
        let icon_color = {
            let mut rng = rand::thread_rng();
            *DEFAULT_ICON_COLORS
                .choose(&mut rng)
                .unwrap_or(&DEFAULT_ICON_COLORS[0])
        };

        let thread_id = match self
            .api
            .create_forum_topic(self.admin_chat_id, &name, icon_color)
            .await
        {
            Ok(thread_id) => thread_id,
            Err(e) => {
                warn!(user_id, error = %e, "Failed to create forum topic");
                return None;
            }
        };

        info!(user_id, thread_id, %name, "Created forum topic");
        Some(self.record(user_id, thread_id))
    }

    /// Persist `user_id -> thread_id`. If another writer mapped the user in
    /// the meantime, its thread is returned and ours is left orphaned.
    fn record(&self, user_id: i64, thread_id: i64) -> i64 {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let (snapshot, corrupt) = match blob::read_lenient::<TopicMapping>(
                self.store.as_ref(),
                KEY_USER_TOPIC_MAPPING,
            ) {
                Ok(read) => read,
                Err(e) => {
                    warn!(user_id, thread_id, error = %e, "Failed to read topic mapping for update");
                    return thread_id;
                }
            };
            if let Some(err) = corrupt {
                warn!(error = %err, "Overwriting corrupt topic mapping");
            }

            let mut mapping = snapshot.value;
            if let Some(&existing) = mapping.get(&user_id) {
                if existing != thread_id {
                    warn!(
                        user_id,
                        existing,
                        orphaned = thread_id,
                        "Topic was created concurrently, keeping the first one"
                    );
                }
                return existing;
            }
            mapping.insert(user_id, thread_id);

            match blob::write_if(
                self.store.as_ref(),
                KEY_USER_TOPIC_MAPPING,
                snapshot.version,
                &mapping,
            ) {
                Ok(WriteOutcome::Written(version)) => {
                    debug!(user_id, thread_id, version, "Topic mapping saved");
                    return thread_id;
                }
                Ok(WriteOutcome::Conflict) => {
                    debug!(user_id, attempt, "Topic mapping changed concurrently, retrying");
                }
                Err(e) => {
                    warn!(user_id, thread_id, error = %e, "Failed to save topic mapping");
                    return thread_id;
                }
            }
        }

        warn!(
            user_id,
            thread_id,
            attempts = MAX_CAS_ATTEMPTS,
            "Gave up saving topic mapping"
        );
        thread_id
    }

    /// The user whose topic is `thread_id`.
    pub fn reverse_lookup(&self, thread_id: i64) -> Option<i64> {
        self.get_mapping()
            .into_iter()
            .find(|&(_, thread)| thread == thread_id)
            .map(|(user_id, _)| user_id)
    }

    pub fn topic_count(&self) -> usize {
        self.get_mapping().len()
    }
}

fn topic_name(display_name: &str, user_id: i64) -> String {
    let short: String = display_name.chars().take(MAX_TOPIC_DISPLAY_NAME).collect();
    format!("💬 {short} ({user_id})")
        .chars()
        .take(MAX_TOPIC_NAME_LEN)
        .collect()
}
