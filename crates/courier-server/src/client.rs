//! Telegram Bot API client with per-attempt timeouts and linear retry.
//!
//! Every call is `POST <base><token>/<method>` with a JSON body; the reply is
//! the `{ ok, result?, description? }` envelope. Timeouts, transport
//! failures, HTTP 429 and 5xx are retried up to [`RetryPolicy::attempts`]
//! times with `attempt * base_delay` between attempts. Anything else is
//! returned immediately.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use courier_shared::constants::{
    API_TIMEOUT_MS, MAX_CAPTION_LEN, MAX_MESSAGE_LEN, MAX_RETRIES, MAX_TOPIC_NAME_LEN,
    RETRY_DELAY_MS,
};
use courier_shared::types::validate_text;
use courier_shared::ValidationError;

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Raw HTTP reply: status code and body text.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// One HTTP round trip to the Bot API. Implementations must not retry.
#[async_trait]
pub trait ApiTransport: Send + Sync {
    async fn post(&self, method: &str, params: &Value) -> Result<HttpReply, TransportError>;
}

/// reqwest-backed transport.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// `api_base` is e.g. `https://api.telegram.org/bot`; the token is
    /// appended directly.
    pub fn new(api_base: &str, bot_token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{api_base}{bot_token}"),
        }
    }
}

#[async_trait]
impl ApiTransport for HttpTransport {
    async fn post(&self, method: &str, params: &Value) -> Result<HttpReply, TransportError> {
        let resp = self
            .client
            .post(format!("{}/{}", self.endpoint, method))
            .json(params)
            .send()
            .await
            .map_err(|e| TransportError(e.without_url().to_string()))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| TransportError(e.without_url().to_string()))?;
        Ok(HttpReply { status, body })
    }
}

// ---------------------------------------------------------------------------
// Errors and responses
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Telegram API timeout for {method} after {after:?}")]
    Timeout { method: String, after: Duration },

    #[error("Telegram API error for {method}: {status} - {description}")]
    Rejected {
        method: String,
        status: u16,
        description: String,
    },

    #[error("Invalid API response format for {method}: {detail}")]
    Malformed { method: String, detail: String },

    #[error("Network error for {method}: {detail}")]
    Transport { method: String, detail: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl ApiError {
    /// Whether another attempt might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Timeout { .. } | ApiError::Transport { .. } => true,
            ApiError::Rejected { status, .. } => *status == 429 || *status >= 500,
            ApiError::Malformed { .. } | ApiError::Validation(_) => false,
        }
    }

    /// Short human-readable reason, used in reports to the administrator.
    pub fn reason(&self) -> String {
        match self {
            ApiError::Rejected { description, .. } => description.clone(),
            other => other.to_string(),
        }
    }
}

/// The Bot API response envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i64>,
}

fn parse_reply(method: &str, reply: HttpReply) -> Result<ApiResponse, ApiError> {
    let parsed: Option<ApiResponse> = serde_json::from_str::<Value>(&reply.body)
        .ok()
        .filter(|v| v.get("ok").is_some_and(Value::is_boolean))
        .and_then(|v| serde_json::from_value(v).ok());

    let success = (200..300).contains(&reply.status);
    match parsed {
        Some(resp) if success && resp.ok => Ok(resp),
        Some(resp) => Err(ApiError::Rejected {
            method: method.to_string(),
            status: if success {
                resp.error_code.map_or(400, |c| c as u16)
            } else {
                reply.status
            },
            description: resp
                .description
                .unwrap_or_else(|| "Unknown error".to_string()),
        }),
        None if success => Err(ApiError::Malformed {
            method: method.to_string(),
            detail: "missing 'ok' field".to_string(),
        }),
        None => Err(ApiError::Rejected {
            method: method.to_string(),
            status: reply.status,
            description: reply.body,
        }),
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay unit; attempt `n` is followed by `n * base_delay`.
    pub base_delay: Duration,
    /// Budget for a single attempt.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: MAX_RETRIES,
            base_delay: Duration::from_millis(RETRY_DELAY_MS),
            timeout: Duration::from_millis(API_TIMEOUT_MS),
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Optional addressing for outgoing messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    pub thread_id: Option<i64>,
    pub reply_to: Option<i64>,
}

impl SendOptions {
    pub fn in_thread(thread_id: Option<i64>) -> Self {
        Self {
            thread_id,
            reply_to: None,
        }
    }

    pub fn reply(reply_to: i64, thread_id: Option<i64>) -> Self {
        Self {
            thread_id,
            reply_to: Some(reply_to),
        }
    }

    fn apply(&self, params: &mut Map<String, Value>) {
        if let Some(thread_id) = self.thread_id {
            params.insert("message_thread_id".into(), json!(thread_id));
        }
        if let Some(reply_to) = self.reply_to {
            params.insert("reply_to_message_id".into(), json!(reply_to));
        }
    }
}

pub struct RetryableApiClient {
    transport: Arc<dyn ApiTransport>,
    policy: RetryPolicy,
}

impl RetryableApiClient {
    pub fn new(transport: Arc<dyn ApiTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// Issue `method` with `params`, retrying transient failures.
    pub async fn call(&self, method: &str, params: Value) -> Result<ApiResponse, ApiError> {
        let attempts = self.policy.attempts.max(1);
        let mut attempt = 1;
        loop {
            let outcome =
                match tokio::time::timeout(self.policy.timeout, self.transport.post(method, &params))
                    .await
                {
                    Err(_) => Err(ApiError::Timeout {
                        method: method.to_string(),
                        after: self.policy.timeout,
                    }),
                    Ok(Err(e)) => Err(ApiError::Transport {
                        method: method.to_string(),
                        detail: e.0,
                    }),
                    Ok(Ok(reply)) => parse_reply(method, reply),
                };

            match outcome {
                Ok(resp) => {
                    debug!(method, attempt, "Telegram API call succeeded");
                    return Ok(resp);
                }
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = self.policy.base_delay * attempt;
                    info!(
                        method,
                        attempt,
                        next_attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(method, attempt, max_attempts = attempts, error = %e, "Telegram API call failed");
                    return Err(e);
                }
            }
        }
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        opts: SendOptions,
    ) -> Result<ApiResponse, ApiError> {
        validate_text(text, MAX_MESSAGE_LEN)?;

        let mut params = Map::new();
        params.insert("chat_id".into(), json!(chat_id));
        params.insert("text".into(), json!(text));
        params.insert("parse_mode".into(), json!("Markdown"));
        params.insert("disable_web_page_preview".into(), json!(true));
        opts.apply(&mut params);

        self.call("sendMessage", Value::Object(params)).await
    }

    /// Clone `message_id` from `from_chat_id` into `chat_id`, optionally
    /// replacing its caption.
    pub async fn copy_message(
        &self,
        chat_id: i64,
        from_chat_id: i64,
        message_id: i64,
        caption: Option<&str>,
        opts: SendOptions,
    ) -> Result<ApiResponse, ApiError> {
        if message_id <= 0 {
            return Err(ValidationError::MessageId(message_id).into());
        }

        let mut params = Map::new();
        params.insert("chat_id".into(), json!(chat_id));
        params.insert("from_chat_id".into(), json!(from_chat_id));
        params.insert("message_id".into(), json!(message_id));
        params.insert("parse_mode".into(), json!("Markdown"));
        if let Some(caption) = caption {
            validate_text(caption, MAX_CAPTION_LEN)?;
            params.insert("caption".into(), json!(caption));
        }
        opts.apply(&mut params);

        self.call("copyMessage", Value::Object(params)).await
    }

    /// Create a forum topic and return its thread id.
    pub async fn create_forum_topic(
        &self,
        chat_id: i64,
        name: &str,
        icon_color: u32,
    ) -> Result<i64, ApiError> {
        validate_text(name, MAX_TOPIC_NAME_LEN)?;

        let resp = self
            .call(
                "createForumTopic",
                json!({ "chat_id": chat_id, "name": name, "icon_color": icon_color }),
            )
            .await?;

        resp.result
            .as_ref()
            .and_then(|r| r.get("message_thread_id"))
            .and_then(Value::as_i64)
            .ok_or_else(|| ApiError::Malformed {
                method: "createForumTopic".to_string(),
                detail: "missing message_thread_id".to_string(),
            })
    }

    pub async fn get_chat(&self, chat_id: i64) -> Result<ApiResponse, ApiError> {
        self.call("getChat", json!({ "chat_id": chat_id })).await
    }

    /// Whether `chat_id` is a forum supergroup. Errors count as "no".
    pub async fn is_forum(&self, chat_id: i64) -> bool {
        match self.get_chat(chat_id).await {
            Ok(resp) => resp
                .result
                .as_ref()
                .and_then(|r| r.get("is_forum"))
                .and_then(Value::as_bool)
                .unwrap_or(false),
            Err(e) => {
                warn!(chat_id, error = %e, "Could not determine whether chat is a forum");
                false
            }
        }
    }

    pub async fn set_webhook(&self, url: &str, secret: Option<&str>) -> Result<ApiResponse, ApiError> {
        self.call(
            "setWebhook",
            json!({ "url": url, "secret_token": secret.unwrap_or_default() }),
        )
        .await
    }

    pub async fn get_me(&self) -> Result<ApiResponse, ApiError> {
        self.call("getMe", json!({})).await
    }
}
