/// Application name
pub const APP_NAME: &str = "Courier";

/// Base URL of the Telegram Bot API; the bot token is appended directly.
pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org/bot";

/// Maximum number of users kept in the registry
pub const MAX_USERS_LIMIT: usize = 1000;

/// Recipients per broadcast batch (max in-flight deliveries)
pub const BROADCAST_BATCH_SIZE: usize = 10;

/// Pause between broadcast batches in milliseconds
pub const BROADCAST_DELAY_MS: u64 = 100;

/// Per-attempt budget for a remote API call in milliseconds
pub const API_TIMEOUT_MS: u64 = 30_000;

/// Attempts per remote API call, including the first one
pub const MAX_RETRIES: u32 = 3;

/// Base delay for linear retry backoff (`attempt * base`) in milliseconds
pub const RETRY_DELAY_MS: u64 = 1_000;

/// Forum topic icon colors (RGB)
pub const DEFAULT_ICON_COLORS: [u32; 6] =
    [0x6FB9F0, 0xFFD67E, 0xCB86DB, 0x6EBF95, 0xFFB3BA, 0x87CEFA];

/// Errors listed in a broadcast report before the rest are summarized
pub const MAX_ERROR_DISPLAY: usize = 5;

/// Users shown by `/users`
pub const MAX_RECENT_USERS: usize = 20;

/// Telegram limits
pub const MAX_MESSAGE_LEN: usize = 4096;
pub const MAX_CAPTION_LEN: usize = 1024;
pub const MAX_TOPIC_NAME_LEN: usize = 128;

/// Hex characters kept from the identity signature digest
pub const SIGNATURE_HEX_LEN: usize = 16;

/// Store keys
pub const KEY_USER_TOPIC_MAPPING: &str = "user_topic_mapping";
pub const KEY_USER_LIST: &str = "user_list";
