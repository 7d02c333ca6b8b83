use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use courier_shared::constants::APP_NAME;

use crate::background::BackgroundTask;
use crate::client::{ApiResponse, SendOptions};
use crate::config::BotConfig;
use crate::error::ServerError;
use crate::handler::MessageHandler;
use crate::replies;
use crate::telegram::Update;

const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<MessageHandler>,
    pub config: Arc<BotConfig>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/webhook", post(webhook))
        .route("/setWebhook", get(set_webhook))
        .route("/me", get(me))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index() -> String {
    format!("{APP_NAME} relay is running!")
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found")
}

/// Telegram pushes updates here. The update is processed in the background
/// and the response is sent immediately.
async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<&'static str, ServerError> {
    verify_webhook_secret(&headers, state.config.webhook_secret.as_deref())?;

    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            warn!(error = %e, "Failed to parse webhook update");
            let handler = state.handler.clone();
            let notice = replies::webhook_error(&e.to_string());
            BackgroundTask::spawn("webhook-error-notice", async move {
                handler
                    .notify(handler.admin_chat_id(), &notice, SendOptions::default())
                    .await;
            });
            return Err(ServerError::Internal(e.to_string()));
        }
    };

    match update.message {
        Some(message) => {
            let handler = state.handler.clone();
            BackgroundTask::spawn("handle-update", async move {
                handler.handle(message).await;
            });
        }
        None => info!(update_id = update.update_id, "Ignoring update without a message"),
    }

    Ok("OK")
}

/// Check `X-Telegram-Bot-Api-Secret-Token` when a secret is configured.
fn verify_webhook_secret(headers: &HeaderMap, expected: Option<&str>) -> Result<(), ServerError> {
    let Some(expected) = expected else {
        return Ok(());
    };

    let provided = headers
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    if provided.len() != expected.len() || provided.ct_eq(expected).unwrap_u8() != 1 {
        warn!("Webhook request with invalid secret token");
        return Err(ServerError::Unauthorized);
    }
    Ok(())
}

/// Register `<origin>/webhook` with Telegram, where the origin is taken from
/// the request's `Host` and `X-Forwarded-Proto` headers.
async fn set_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse>, ServerError> {
    let url = format!("{}/webhook", request_origin(&headers)?);
    info!(%url, "Registering webhook");
    let resp = state
        .handler
        .api()
        .set_webhook(&url, state.config.webhook_secret.as_deref())
        .await?;
    Ok(Json(resp))
}

async fn me(State(state): State<AppState>) -> Result<Json<ApiResponse>, ServerError> {
    Ok(Json(state.handler.api().get_me().await?))
}

fn request_origin(headers: &HeaderMap) -> Result<String, ServerError> {
    let host = headers
        .get("host")
        .and_then(|v| v.to_str().ok())
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ServerError::BadRequest("missing Host header".into()))?;
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("https");
    Ok(format!("{scheme}://{host}"))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
