//! Works out which user an admin message is addressed to.

use std::sync::Arc;

use tracing::{debug, info};

use courier_shared::{TagCodec, TagResolution};

use crate::telegram::Message;
use crate::topics::TopicDirectory;

/// Where the recipient came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Identity tag in the replied-to message.
    Tag(i64),
    /// Forum thread the message was posted in.
    Thread(i64),
    Unroutable,
}

impl Resolution {
    pub fn user_id(self) -> Option<i64> {
        match self {
            Resolution::Tag(id) | Resolution::Thread(id) => Some(id),
            Resolution::Unroutable => None,
        }
    }
}

pub struct DeliveryRouter {
    codec: Arc<TagCodec>,
    topics: Arc<TopicDirectory>,
}

impl DeliveryRouter {
    pub fn new(codec: Arc<TagCodec>, topics: Arc<TopicDirectory>) -> Self {
        Self { codec, topics }
    }

    pub fn resolve(&self, message: &Message) -> Resolution {
        if let Some(replied) = &message.reply_to_message {
            if let Some(text) = replied.text_or_caption() {
                if let Some((format, resolution)) = self.codec.resolve(text) {
                    debug!(?format, signed = format.is_signed(), ?resolution, "Tag found in replied message");
                    if let Some(user_id) = resolution.user_id() {
                        if matches!(resolution, TagResolution::LegacyTrusted(_)) {
                            info!(user_id, "Routing by unsigned legacy tag");
                        }
                        return Resolution::Tag(user_id);
                    }
                }
            }
        }

        if self.topics.enabled() {
            if let Some(thread_id) = message.message_thread_id {
                if let Some(user_id) = self.topics.reverse_lookup(thread_id) {
                    debug!(thread_id, user_id, "Resolved recipient from forum thread");
                    return Resolution::Thread(user_id);
                }
            }
        }

        Resolution::Unroutable
    }
}
