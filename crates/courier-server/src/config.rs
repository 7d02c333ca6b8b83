//! Bot configuration loaded from environment variables.
//!
//! `BOT_TOKEN` and `ADMIN_CHAT_ID` are required; everything else has a
//! default suitable for a single-instance deployment.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use courier_shared::constants::TELEGRAM_API_BASE;
use courier_shared::types::parse_chat_id;
use courier_shared::ValidationError;

/// Where durable state lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// Process memory; lost on restart.
    Memory,
    /// SQLite database file.
    Path(PathBuf),
}

/// Bot configuration.
#[derive(Clone)]
pub struct BotConfig {
    /// Env: `BOT_TOKEN` (required, `<digits>:<token>`)
    pub bot_token: String,

    /// Chat that receives user messages and issues commands.
    /// Env: `ADMIN_CHAT_ID` (required)
    pub admin_chat_id: i64,

    /// Expected `X-Telegram-Bot-Api-Secret-Token` header value.
    /// Env: `WEBHOOK_SECRET`
    /// Default: none (header not checked).
    pub webhook_secret: Option<String>,

    /// Key for identity tag signatures.
    /// Env: `USER_ID_SECRET`
    /// Default: none (degraded, forgeable signatures).
    pub user_id_secret: Option<String>,

    /// Env: `ENABLE_USER_TRACKING` (true/false)
    /// Default: `false`
    pub user_tracking: bool,

    /// Env: `ENABLE_FORUM_MODE` (true/false)
    /// Default: `false`
    pub forum_mode: bool,

    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Env: `STORE_PATH` (`memory` for an in-process store)
    /// Default: `./courier.db`
    pub store: StoreLocation,

    /// Env: `TELEGRAM_API_BASE`
    /// Default: `https://api.telegram.org/bot`
    pub api_base: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            admin_chat_id: 0,
            webhook_secret: None,
            user_id_secret: None,
            user_tracking: false,
            forum_mode: false,
            http_addr: ([0, 0, 0, 0], 8080).into(),
            store: StoreLocation::Path(PathBuf::from("./courier.db")),
            api_base: TELEGRAM_API_BASE.to_string(),
        }
    }
}

impl fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotConfig")
            .field("bot_token", &"<redacted>")
            .field("admin_chat_id", &self.admin_chat_id)
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "<set>"))
            .field("user_id_secret", &self.user_id_secret.as_ref().map(|_| "<set>"))
            .field("user_tracking", &self.user_tracking)
            .field("forum_mode", &self.forum_mode)
            .field("http_addr", &self.http_addr)
            .field("store", &self.store)
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl BotConfig {
    pub fn from_env() -> Result<Self, ValidationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        let token = var("BOT_TOKEN");
        let admin = var("ADMIN_CHAT_ID");
        let missing: Vec<&str> = [("BOT_TOKEN", &token), ("ADMIN_CHAT_ID", &admin)]
            .into_iter()
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| k)
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::MissingEnv(missing.join(", ")));
        }

        config.bot_token = token.unwrap_or_default();
        if !is_valid_token(&config.bot_token) {
            return Err(ValidationError::Config("BOT_TOKEN has an invalid format".into()));
        }
        config.admin_chat_id = parse_chat_id(&admin.unwrap_or_default())?;

        config.webhook_secret = var("WEBHOOK_SECRET");
        config.user_id_secret = var("USER_ID_SECRET");

        if let Some(val) = var("ENABLE_USER_TRACKING") {
            config.user_tracking = parse_flag(&val);
        }
        if let Some(val) = var("ENABLE_FORUM_MODE") {
            config.forum_mode = parse_flag(&val);
        }

        if let Some(addr) = var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = var("STORE_PATH") {
            config.store = if path == "memory" {
                StoreLocation::Memory
            } else {
                StoreLocation::Path(PathBuf::from(path))
            };
        }

        if let Some(base) = var("TELEGRAM_API_BASE") {
            config.api_base = base;
        }

        Ok(config)
    }
}

fn parse_flag(val: &str) -> bool {
    val == "true" || val == "1"
}

/// `<bot id>:<secret>` where the secret is `[A-Za-z0-9_-]+`.
fn is_valid_token(token: &str) -> bool {
    let Some((id, secret)) = token.split_once(':') else {
        return false;
    };
    !id.is_empty()
        && id.bytes().all(|b| b.is_ascii_digit())
        && !secret.is_empty()
        && secret
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<BotConfig, ValidationError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BotConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_minimal_config() {
        let config = load(&[("BOT_TOKEN", "123:abc-DEF_9"), ("ADMIN_CHAT_ID", "-1001")]).unwrap();
        assert_eq!(config.admin_chat_id, -1001);
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert!(!config.user_tracking);
        assert!(!config.forum_mode);
        assert_eq!(config.user_id_secret, None);
        assert_eq!(config.api_base, TELEGRAM_API_BASE);
    }

    #[test]
    fn test_missing_required() {
        let err = load(&[]).unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingEnv("BOT_TOKEN, ADMIN_CHAT_ID".into())
        );
    }

    #[test]
    fn test_invalid_values() {
        assert!(load(&[("BOT_TOKEN", "nocolon"), ("ADMIN_CHAT_ID", "1")]).is_err());
        assert!(load(&[("BOT_TOKEN", "12:a b"), ("ADMIN_CHAT_ID", "1")]).is_err());
        assert!(matches!(
            load(&[("BOT_TOKEN", "12:ab"), ("ADMIN_CHAT_ID", "admin")]),
            Err(ValidationError::ChatId(_))
        ));
    }

    #[test]
    fn test_optional_values() {
        let config = load(&[
            ("BOT_TOKEN", "12:ab"),
            ("ADMIN_CHAT_ID", "7"),
            ("ENABLE_USER_TRACKING", "true"),
            ("ENABLE_FORUM_MODE", "false"),
            ("USER_ID_SECRET", "k"),
            ("WEBHOOK_SECRET", ""),
            ("STORE_PATH", "memory"),
            ("HTTP_ADDR", "not-an-addr"),
        ])
        .unwrap();
        assert!(config.user_tracking);
        assert!(!config.forum_mode);
        assert_eq!(config.user_id_secret.as_deref(), Some("k"));
        assert_eq!(config.webhook_secret, None);
        assert_eq!(config.store, StoreLocation::Memory);
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = load(&[("BOT_TOKEN", "12:topsecret"), ("ADMIN_CHAT_ID", "7")]).unwrap();
        assert!(!format!("{config:?}").contains("topsecret"));
    }
}
