//! Fan-out of one admin message to many users.
//!
//! Recipients are processed in fixed-size batches. Every delivery in a batch
//! runs concurrently and the batch completes only when all of them have
//! settled; a short pause separates consecutive batches to stay under the
//! Bot API's rate limits. Failures are per recipient and never abort the
//! run.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use courier_shared::constants::{
    BROADCAST_BATCH_SIZE, BROADCAST_DELAY_MS, MAX_CAPTION_LEN, MAX_ERROR_DISPLAY, MAX_MESSAGE_LEN,
};
use courier_shared::markdown::{caption_with_prefix, escape_markdown};
use courier_shared::types::{parse_chat_id, validate_text};
use courier_shared::ValidationError;
use courier_store::UserRegistry;

use crate::client::{ApiError, RetryableApiClient, SendOptions};

const TEXT_PREFIX: &str = "📢 *Broadcast:*";
const CAPTION_PREFIX: &str = "📢 Broadcast:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastTargets {
    /// Everyone in the user registry.
    All,
    /// Raw ids as typed by the admin; validated at broadcast time.
    Ids(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastPayload {
    Text(String),
    /// Copy an existing message from the admin chat, captioned with `text`.
    Media {
        from_chat_id: i64,
        message_id: i64,
        text: String,
    },
}

impl BroadcastPayload {
    /// Render what every recipient receives. Fails on text that would be
    /// rejected by `sendMessage` once the prefix and escapes are added.
    fn prepare(&self) -> Result<Outgoing, ValidationError> {
        match self {
            BroadcastPayload::Text(text) => {
                let body = format!("{TEXT_PREFIX}\n\n{}", escape_markdown(text));
                validate_text(&body, MAX_MESSAGE_LEN)?;
                Ok(Outgoing::Text(body))
            }
            BroadcastPayload::Media {
                from_chat_id,
                message_id,
                text,
            } => {
                validate_text(text, MAX_MESSAGE_LEN)?;
                Ok(Outgoing::Media {
                    from_chat_id: *from_chat_id,
                    message_id: *message_id,
                    caption: caption_with_prefix(
                        CAPTION_PREFIX,
                        &escape_markdown(text),
                        MAX_CAPTION_LEN,
                    ),
                })
            }
        }
    }
}

/// A payload rendered once and shared by every delivery.
enum Outgoing {
    Text(String),
    Media {
        from_chat_id: i64,
        message_id: i64,
        caption: String,
    },
}

#[derive(Debug, Clone)]
pub struct BroadcastJob {
    pub targets: BroadcastTargets,
    pub payload: BroadcastPayload,
}

#[derive(Debug, Clone, Copy)]
pub struct BroadcastOptions {
    pub batch_size: usize,
    pub inter_batch_delay: Duration,
    /// Error messages kept verbatim; the rest are only counted.
    pub max_errors: usize,
}

impl Default for BroadcastOptions {
    fn default() -> Self {
        Self {
            batch_size: BROADCAST_BATCH_SIZE,
            inter_batch_delay: Duration::from_millis(BROADCAST_DELAY_MS),
            max_errors: MAX_ERROR_DISPLAY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryResult {
    pub success_count: usize,
    pub failure_count: usize,
    pub errors: Vec<String>,
    pub suppressed_errors: usize,
    pub batches: usize,
}

impl DeliveryResult {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            failure_count: 1,
            errors: vec![error.into()],
            ..Default::default()
        }
    }

    fn record_failure(&mut self, error: String, max_errors: usize) {
        self.failure_count += 1;
        if self.errors.len() < max_errors {
            self.errors.push(error);
        } else {
            self.suppressed_errors += 1;
        }
    }

    /// Kept errors followed by the overflow line, if any.
    pub fn error_lines(&self) -> Vec<String> {
        let mut lines = self.errors.clone();
        if self.suppressed_errors > 0 {
            lines.push(format!("... and {} more errors", self.suppressed_errors));
        }
        lines
    }
}

/// Split `/post` arguments into targets and message text.
///
/// The first whitespace-separated token is either `all` or a comma-separated
/// id list; the remainder is the text. Returns `None` when there is no text.
pub fn parse_post_targets(args: &str) -> Option<(BroadcastTargets, String)> {
    let (targets, text) = args.trim().split_once(char::is_whitespace)?;
    let text = text.trim_start();
    if text.is_empty() {
        return None;
    }

    let targets = if targets == "all" {
        BroadcastTargets::All
    } else {
        BroadcastTargets::Ids(
            targets
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect(),
        )
    };
    Some((targets, text.to_string()))
}

pub struct BroadcastEngine {
    api: Arc<RetryableApiClient>,
    registry: UserRegistry,
    options: BroadcastOptions,
}

impl BroadcastEngine {
    pub fn new(api: Arc<RetryableApiClient>, registry: UserRegistry) -> Self {
        Self::with_options(api, registry, BroadcastOptions::default())
    }

    pub fn with_options(
        api: Arc<RetryableApiClient>,
        registry: UserRegistry,
        options: BroadcastOptions,
    ) -> Self {
        Self {
            api,
            registry,
            options,
        }
    }

    /// Number of recipients `targets` currently expands to.
    pub fn target_count(&self, targets: &BroadcastTargets) -> usize {
        match targets {
            BroadcastTargets::All => self.registry.chat_ids().len(),
            BroadcastTargets::Ids(ids) => ids.len(),
        }
    }

    pub async fn broadcast(&self, job: &BroadcastJob) -> DeliveryResult {
        let outgoing = match job.payload.prepare() {
            Ok(outgoing) => outgoing,
            Err(e) => return DeliveryResult::failed(e.to_string()),
        };

        let mut result = DeliveryResult::default();
        let chat_ids: Vec<i64> = match &job.targets {
            BroadcastTargets::All => {
                let ids = self.registry.chat_ids();
                if ids.is_empty() {
                    return DeliveryResult::failed("no users to broadcast to");
                }
                ids
            }
            BroadcastTargets::Ids(raw) => {
                if raw.is_empty() {
                    return DeliveryResult::failed("no user IDs specified");
                }
                raw.iter()
                    .filter_map(|id| match parse_chat_id(id) {
                        Ok(chat_id) => Some(chat_id),
                        Err(e) => {
                            result.record_failure(e.to_string(), self.options.max_errors);
                            None
                        }
                    })
                    .collect()
            }
        };

        info!(
            recipients = chat_ids.len(),
            rejected = result.failure_count,
            media = matches!(job.payload, BroadcastPayload::Media { .. }),
            "Starting broadcast"
        );

        let outgoing = &outgoing;
        let batch_size = self.options.batch_size.max(1);
        for (index, batch) in chat_ids.chunks(batch_size).enumerate() {
            if index > 0 {
                tokio::time::sleep(self.options.inter_batch_delay).await;
            }

            let outcomes = join_all(
                batch
                    .iter()
                    .map(|&chat_id| async move { (chat_id, self.deliver(chat_id, outgoing).await) }),
            )
            .await;

            for (chat_id, outcome) in outcomes {
                match outcome {
                    Ok(()) => result.success_count += 1,
                    Err(e) => {
                        warn!(chat_id, error = %e, "Broadcast delivery failed");
                        result.record_failure(
                            format!("user {chat_id}: {}", e.reason()),
                            self.options.max_errors,
                        );
                    }
                }
            }
            result.batches += 1;
            debug!(batch = index + 1, size = batch.len(), "Broadcast batch settled");
        }

        info!(
            success = result.success_count,
            failed = result.failure_count,
            batches = result.batches,
            "Broadcast completed"
        );
        result
    }

    async fn deliver(&self, chat_id: i64, outgoing: &Outgoing) -> Result<(), ApiError> {
        match outgoing {
            Outgoing::Text(body) => {
                self.api
                    .send_message(chat_id, body, SendOptions::default())
                    .await?;
            }
            Outgoing::Media {
                from_chat_id,
                message_id,
                caption,
            } => {
                match self
                    .api
                    .copy_message(
                        chat_id,
                        *from_chat_id,
                        *message_id,
                        Some(caption),
                        SendOptions::default(),
                    )
                    .await
                {
                    Ok(_) => {}
                    Err(e @ ApiError::Rejected { .. }) => {
                        debug!(chat_id, error = %e, "Captioned copy rejected, sending separately");
                        self.api
                            .send_message(chat_id, caption, SendOptions::default())
                            .await?;
                        self.api
                            .copy_message(
                                chat_id,
                                *from_chat_id,
                                *message_id,
                                None,
                                SendOptions::default(),
                            )
                            .await?;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }
}
