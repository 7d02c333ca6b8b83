use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// The originating end-user of a relayed conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub user_id: i64,
    pub chat_id: i64,
    pub username: Option<String>,
    pub display_name: String,
}

impl UserIdentity {
    /// Build an identity, deriving the display name from the username, then
    /// the first name, then `"Unknown"`.
    pub fn new(
        user_id: i64,
        chat_id: i64,
        username: Option<String>,
        first_name: Option<&str>,
    ) -> Self {
        let username = username.filter(|u| !u.is_empty());
        let display_name = username
            .clone()
            .or_else(|| first_name.filter(|n| !n.is_empty()).map(str::to_string))
            .unwrap_or_else(|| "Unknown".to_string());
        Self {
            user_id,
            chat_id,
            username,
            display_name,
        }
    }
}

impl std::fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.display_name, self.user_id)
    }
}

/// Parse a chat id (`^-?\d+$`). Group chats have negative ids.
pub fn parse_chat_id(raw: &str) -> Result<i64, ValidationError> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::ChatId(raw.to_string()));
    }
    trimmed
        .parse::<i64>()
        .map_err(|_| ValidationError::ChatId(raw.to_string()))
}

/// Parse a user id (`^\d+$`).
pub fn parse_user_id(raw: &str) -> Result<i64, ValidationError> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::UserId(raw.to_string()));
    }
    raw.parse::<i64>()
        .map_err(|_| ValidationError::UserId(raw.to_string()))
}

/// User ids are always positive.
pub fn validate_user_id(user_id: i64) -> Result<(), ValidationError> {
    if user_id <= 0 {
        return Err(ValidationError::UserId(user_id.to_string()));
    }
    Ok(())
}

/// Length is counted in characters, not bytes.
pub fn validate_text(text: &str, max: usize) -> Result<(), ValidationError> {
    let len = text.chars().count();
    if len > max {
        return Err(ValidationError::TextTooLong { len, max });
    }
    Ok(())
}
