//! Domain records persisted as JSON blobs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use courier_shared::UserIdentity;

/// `user_id -> forum thread id`, stored under `user_topic_mapping`.
pub type TopicMapping = BTreeMap<i64, i64>;

/// One known user, stored in the `user_list` array.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryRecord {
    pub chat_id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub username: Option<String>,
    /// Older blobs call this `userName`.
    #[serde(alias = "userName")]
    pub display_name: String,
    pub last_active: DateTime<Utc>,
}

impl RegistryRecord {
    pub fn from_identity(identity: &UserIdentity, last_active: DateTime<Utc>) -> Self {
        Self {
            chat_id: identity.chat_id,
            user_id: identity.user_id,
            username: identity.username.clone(),
            display_name: identity.display_name.clone(),
            last_active,
        }
    }
}
