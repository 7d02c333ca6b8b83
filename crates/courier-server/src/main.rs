//! # courier-server
//!
//! Telegram relay bot between anonymous users and one admin chat.
//!
//! This binary provides:
//! - **Webhook endpoint** (axum) that accepts Telegram updates and handles
//!   each one in a background task
//! - **Identity tags** signed into every relayed message so admin replies
//!   can be routed back without per-message state
//! - **Forum mode** with one topic per user in the admin supergroup
//! - **Broadcasts** to tracked users, batched and rate limited

mod api;
mod background;
mod broadcast;
mod client;
mod config;
mod error;
mod handler;
mod replies;
mod router;
mod telegram;
mod topics;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use courier_shared::SigningMode;
use courier_store::{Database, KvStore, MemoryStore};

use crate::api::AppState;
use crate::client::{HttpTransport, RetryPolicy, RetryableApiClient};
use crate::config::{BotConfig, StoreLocation};
use crate::handler::MessageHandler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,courier_server=debug")),
        )
        .init();

    info!("Starting Courier relay v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = BotConfig::from_env()?;
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let store: Arc<dyn KvStore> = match &config.store {
        StoreLocation::Memory => {
            warn!("Using in-memory store, state will not survive a restart");
            Arc::new(MemoryStore::new())
        }
        StoreLocation::Path(path) => Arc::new(Database::open_at(path)?),
    };

    let transport = Arc::new(HttpTransport::new(&config.api_base, &config.bot_token));
    let api = Arc::new(RetryableApiClient::new(transport, RetryPolicy::default()));

    let handler = Arc::new(MessageHandler::new(&config, api, store));
    if handler.codec().mode() == SigningMode::Degraded {
        warn!("USER_ID_SECRET is not set: identity tags are unkeyed and can be forged");
    }
    info!(
        admin_chat_id = config.admin_chat_id,
        user_tracking = config.user_tracking,
        forum_mode = config.forum_mode,
        webhook_secret = config.webhook_secret.is_some(),
        "Relay settings"
    );

    let http_addr = config.http_addr;
    let app_state = AppState {
        handler,
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
