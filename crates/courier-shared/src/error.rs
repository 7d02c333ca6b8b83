use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid chat ID format: {0}")]
    ChatId(String),

    #[error("Invalid user ID format: {0}")]
    UserId(String),

    #[error("Invalid message ID: {0}")]
    MessageId(i64),

    #[error("Text exceeds maximum length of {max} (got {len})")]
    TextTooLong { len: usize, max: usize },

    #[error("Message missing required fields")]
    IncompleteMessage,

    #[error("Missing required environment variables: {0}")]
    MissingEnv(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TagError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid HMAC key")]
    InvalidKey,

    /// A signed tag was found but its signature does not match. Either the
    /// text was tampered with or the secret was rotated.
    #[error("Signature mismatch for user {user_id}")]
    SignatureMismatch { user_id: i64 },
}
