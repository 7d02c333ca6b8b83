//! The subset of the Telegram `Update` payload the bot reads.
//!
//! Every field is optional so that unknown update kinds and partial payloads
//! still deserialize; completeness is checked where it matters.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Update {
    #[serde(default)]
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub chat: Option<Chat>,
    #[serde(default)]
    pub message_thread_id: Option<i64>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub reply_to_message: Option<Box<Message>>,

    #[serde(default)]
    pub photo: Option<Value>,
    #[serde(default)]
    pub video: Option<Value>,
    #[serde(default)]
    pub document: Option<Value>,
    #[serde(default)]
    pub voice: Option<Value>,
    #[serde(default)]
    pub audio: Option<Value>,
    #[serde(default)]
    pub video_note: Option<Value>,
    #[serde(default)]
    pub sticker: Option<Value>,
    #[serde(default)]
    pub animation: Option<Value>,

    #[serde(default)]
    pub forum_topic_created: Option<Value>,
    #[serde(default)]
    pub forum_topic_edited: Option<Value>,
    #[serde(default)]
    pub forum_topic_closed: Option<Value>,
    #[serde(default)]
    pub forum_topic_reopened: Option<Value>,
}

impl Message {
    /// The text, or the media caption when there is no text.
    pub fn text_or_caption(&self) -> Option<&str> {
        self.text.as_deref().or(self.caption.as_deref())
    }

    pub fn is_media(&self) -> bool {
        self.media_kind().is_some()
    }

    /// Label for the attached media, if any.
    pub fn media_kind(&self) -> Option<&'static str> {
        let kinds = [
            (&self.photo, "📷 Photo"),
            (&self.video, "🎬 Video"),
            (&self.document, "📄 Document"),
            (&self.voice, "🎵 Voice message"),
            (&self.audio, "🎵 Audio"),
            (&self.video_note, "🎥 Video message"),
            (&self.sticker, "🎭 Sticker"),
            (&self.animation, "🎬 Animation"),
        ];
        kinds
            .into_iter()
            .find(|(field, _)| field.is_some())
            .map(|(_, label)| label)
    }

    /// Topic lifecycle notices and other messages with nothing to relay.
    pub fn is_service_message(&self) -> bool {
        self.forum_topic_created.is_some()
            || self.forum_topic_edited.is_some()
            || self.forum_topic_closed.is_some()
            || self.forum_topic_reopened.is_some()
            || (self.text.is_none() && !self.is_media())
    }
}
