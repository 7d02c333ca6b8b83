//! Per-update message handling: the user-facing relay and the admin console.
//!
//! Messages from the admin chat are commands or replies; everything else is
//! a user writing to the bot. Each flow returns an [`ApiError`] on failure,
//! which [`MessageHandler::handle`] logs and reports back to the sender.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use courier_shared::constants::{MAX_CAPTION_LEN, MAX_MESSAGE_LEN, MAX_RECENT_USERS};
use courier_shared::markdown::{caption_with_prefix, escape_markdown};
use courier_shared::types::parse_chat_id;
use courier_shared::{TagCodec, UserIdentity, ValidationError};
use courier_store::{KvStore, UserRegistry};

use crate::broadcast::{
    parse_post_targets, BroadcastEngine, BroadcastJob, BroadcastPayload, BroadcastTargets,
};
use crate::client::{ApiError, RetryableApiClient, SendOptions};
use crate::config::BotConfig;
use crate::replies;
use crate::router::{DeliveryRouter, Resolution};
use crate::telegram::Message;
use crate::topics::TopicDirectory;

/// Room left in a forwarded message for the header and tag.
const FORWARD_OVERHEAD: usize = 512;

pub struct MessageHandler {
    api: Arc<RetryableApiClient>,
    codec: Arc<TagCodec>,
    topics: Arc<TopicDirectory>,
    router: DeliveryRouter,
    broadcast: BroadcastEngine,
    registry: UserRegistry,
    admin_chat_id: i64,
    user_tracking: bool,
    forum_mode: bool,
}

impl MessageHandler {
    pub fn new(config: &BotConfig, api: Arc<RetryableApiClient>, store: Arc<dyn KvStore>) -> Self {
        let codec = Arc::new(TagCodec::new(config.user_id_secret.clone()));
        let topics = Arc::new(TopicDirectory::new(
            store.clone(),
            api.clone(),
            config.admin_chat_id,
            config.forum_mode,
        ));
        let registry = UserRegistry::new(store);
        Self {
            router: DeliveryRouter::new(codec.clone(), topics.clone()),
            broadcast: BroadcastEngine::new(api.clone(), registry.clone()),
            api,
            codec,
            topics,
            registry,
            admin_chat_id: config.admin_chat_id,
            user_tracking: config.user_tracking,
            forum_mode: config.forum_mode,
        }
    }

    pub fn codec(&self) -> &TagCodec {
        &self.codec
    }

    pub fn api(&self) -> &RetryableApiClient {
        &self.api
    }

    pub fn admin_chat_id(&self) -> i64 {
        self.admin_chat_id
    }

    /// Handle one message. Never fails: errors are logged and, where
    /// possible, reported to whoever sent the message.
    pub async fn handle(&self, message: Message) {
        let (Some(from), Some(chat)) = (&message.from, &message.chat) else {
            warn!(
                message_id = message.message_id,
                error = %ValidationError::IncompleteMessage,
                "Dropping message"
            );
            return;
        };

        let identity = UserIdentity::new(
            from.id,
            chat.id,
            from.username.clone(),
            from.first_name.as_deref(),
        );
        let is_admin = chat.id == self.admin_chat_id;
        info!(user = %identity, chat_id = chat.id, is_admin, "Received message");

        if is_admin {
            if let Err(e) = self.handle_admin(&message).await {
                error!(error = %e, message_id = message.message_id, "Failed to handle admin message");
                self.notify(
                    self.admin_chat_id,
                    &replies::admin_error(&e.to_string()),
                    SendOptions::in_thread(message.message_thread_id),
                )
                .await;
            }
        } else if let Err(e) = self.handle_user(&message, &identity).await {
            error!(error = %e, user = %identity, "Failed to relay user message");
            self.notify(identity.chat_id, replies::USER_FAILURE, SendOptions::default())
                .await;
        }
    }

    /// Best-effort send; failures are logged and dropped.
    pub async fn notify(&self, chat_id: i64, text: &str, opts: SendOptions) {
        if let Err(e) = self.api.send_message(chat_id, text, opts).await {
            warn!(chat_id, error = %e, "Failed to send notice");
        }
    }

    // -----------------------------------------------------------------------
    // User side
    // -----------------------------------------------------------------------

    async fn handle_user(&self, message: &Message, identity: &UserIdentity) -> Result<(), ApiError> {
        if self.user_tracking {
            if let Err(e) = self.registry.touch(identity, Utc::now()) {
                warn!(user = %identity, error = %e, "Failed to update user registry");
            }
        }

        if message.text.as_deref().map(str::trim) == Some("/start") {
            self.api
                .send_message(identity.chat_id, replies::USER_WELCOME, SendOptions::default())
                .await?;
            return Ok(());
        }

        let tag = self
            .codec
            .build_tag(identity.user_id, identity.username.as_deref());

        let thread_id = if self.forum_mode && self.api.is_forum(self.admin_chat_id).await {
            self.topics
                .get_or_create_topic(identity.user_id, &identity.display_name)
                .await
        } else {
            None
        };
        let in_topic = thread_id.is_some();
        let opts = SendOptions::in_thread(thread_id);
        let now = Utc::now();

        if let Some(text) = &message.text {
            let text = replies::clip(&escape_markdown(text), MAX_MESSAGE_LEN - FORWARD_OVERHEAD);
            let body = replies::forward_text(identity, &text, &tag, in_topic, now);
            self.api.send_message(self.admin_chat_id, &body, opts).await?;
        } else {
            let caption = message
                .caption
                .as_deref()
                .filter(|c| !c.is_empty())
                .map(|c| replies::clip(&escape_markdown(c), MAX_CAPTION_LEN / 2));
            let caption = replies::forward_caption(
                identity,
                caption.as_deref(),
                message.media_kind().unwrap_or("📎 Attachment"),
                &tag,
                in_topic,
                now,
            );
            self.api
                .copy_message(
                    self.admin_chat_id,
                    identity.chat_id,
                    message.message_id,
                    Some(&caption),
                    opts,
                )
                .await?;
        }

        info!(user = %identity, thread_id, "Relayed message to admin");
        self.api
            .send_message(identity.chat_id, replies::USER_ACK, SendOptions::default())
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Admin side
    // -----------------------------------------------------------------------

    async fn handle_admin(&self, message: &Message) -> Result<(), ApiError> {
        let thread = SendOptions::in_thread(message.message_thread_id);
        let answer = SendOptions::reply(message.message_id, message.message_thread_id);

        if let Some(text) = message.text.as_deref().map(str::trim) {
            match text {
                "/start" => {
                    let detected = self.forum_mode && self.api.is_forum(self.admin_chat_id).await;
                    let panel = replies::admin_panel(self.user_tracking, self.forum_mode, detected);
                    self.api.send_message(self.admin_chat_id, &panel, thread).await?;
                    return Ok(());
                }
                "/status" => {
                    let status = self.status().await;
                    self.api.send_message(self.admin_chat_id, &status, thread).await?;
                    return Ok(());
                }
                "/help" => {
                    self.api
                        .send_message(self.admin_chat_id, &replies::help(self.forum_mode), thread)
                        .await?;
                    return Ok(());
                }
                "/users" => {
                    let reply = self.users_overview();
                    self.api.send_message(self.admin_chat_id, &reply, thread).await?;
                    return Ok(());
                }
                _ => {}
            }

            if let Some(args) = post_arguments(text) {
                return self.handle_post(message, args).await;
            }
        }

        let in_topic = self.forum_mode && message.message_thread_id.is_some();
        if in_topic && message.is_service_message() {
            debug!(thread_id = message.message_thread_id, "Ignoring forum service message");
            return Ok(());
        }

        if message.reply_to_message.is_none() && !in_topic {
            self.api
                .send_message(self.admin_chat_id, replies::ADMIN_HINT, answer)
                .await?;
            return Ok(());
        }

        let resolution = self.router.resolve(message);
        let Some(user_id) = resolution.user_id() else {
            let warning = if message.reply_to_message.is_some() {
                replies::unknown_user(self.forum_mode)
            } else {
                replies::UNKNOWN_TOPIC_USER
            };
            self.api.send_message(self.admin_chat_id, warning, answer).await?;
            return Ok(());
        };

        let confirmation = match self.deliver_reply(user_id, message).await {
            Ok(()) => {
                info!(user_id, ?resolution, "Admin reply delivered");
                replies::reply_sent(user_id, matches!(resolution, Resolution::Thread(_)))
            }
            Err(e) => {
                warn!(user_id, error = %e, "Admin reply not delivered");
                replies::reply_failed(&e.reason())
            }
        };
        self.api
            .send_message(self.admin_chat_id, &confirmation, answer)
            .await?;
        Ok(())
    }

    async fn status(&self) -> String {
        let tracked = self.user_tracking.then(|| self.registry.list().len());
        let detected = self.forum_mode && self.api.is_forum(self.admin_chat_id).await;
        let topics = if self.forum_mode {
            self.topics.topic_count()
        } else {
            0
        };
        replies::status(tracked, self.forum_mode, detected, topics, Utc::now())
    }

    fn users_overview(&self) -> String {
        if !self.user_tracking {
            return replies::USERS_DISABLED.to_string();
        }
        let total = self.registry.list().len();
        if total == 0 {
            return replies::USERS_EMPTY.to_string();
        }
        replies::users_list(&self.registry.recent(MAX_RECENT_USERS), total)
    }

    async fn handle_post(&self, message: &Message, args: &str) -> Result<(), ApiError> {
        let answer = SendOptions::reply(message.message_id, message.message_thread_id);

        if args.is_empty() {
            self.api
                .send_message(self.admin_chat_id, &replies::post_usage(), answer)
                .await?;
            return Ok(());
        }

        let Some((targets, text)) = parse_post_targets(args) else {
            self.api
                .send_message(self.admin_chat_id, replies::POST_MISSING_TEXT, answer)
                .await?;
            return Ok(());
        };

        match &targets {
            BroadcastTargets::All if !self.user_tracking => {
                self.api
                    .send_message(self.admin_chat_id, replies::POST_ALL_NEEDS_TRACKING, answer)
                    .await?;
                return Ok(());
            }
            BroadcastTargets::Ids(ids) if ids.iter().all(|id| parse_chat_id(id).is_err()) => {
                self.api
                    .send_message(self.admin_chat_id, replies::POST_NO_VALID_IDS, answer)
                    .await?;
                return Ok(());
            }
            _ => {}
        }

        let payload = match message.reply_to_message.as_deref() {
            Some(replied) if replied.is_media() && !self.carries_user_tag(replied) => {
                BroadcastPayload::Media {
                    from_chat_id: self.admin_chat_id,
                    message_id: replied.message_id,
                    text,
                }
            }
            _ => BroadcastPayload::Text(text),
        };
        let media = matches!(payload, BroadcastPayload::Media { .. });

        let count = self.broadcast.target_count(&targets);
        self.api
            .send_message(
                self.admin_chat_id,
                &replies::broadcast_started(count, media),
                answer,
            )
            .await?;

        let result = self.broadcast.broadcast(&BroadcastJob { targets, payload }).await;

        self.api
            .send_message(
                self.admin_chat_id,
                &replies::broadcast_report(&result, media),
                SendOptions::in_thread(message.message_thread_id),
            )
            .await?;
        Ok(())
    }

    fn carries_user_tag(&self, message: &Message) -> bool {
        message
            .text_or_caption()
            .is_some_and(|text| self.codec.resolve(text).is_some())
    }

    /// Send the admin's message to `user_id`: text is escaped and prefixed,
    /// anything else is copied with a caption, falling back to a separate
    /// prefix message when the copy rejects the caption.
    async fn deliver_reply(&self, user_id: i64, message: &Message) -> Result<(), ApiError> {
        if let Some(text) = &message.text {
            self.api
                .send_message(user_id, &replies::admin_reply_text(text), SendOptions::default())
                .await?;
            return Ok(());
        }

        let body = message
            .caption
            .as_deref()
            .map(escape_markdown)
            .unwrap_or_default();
        let caption = caption_with_prefix(replies::ADMIN_REPLY_PREFIX, &body, MAX_CAPTION_LEN);

        match self
            .api
            .copy_message(
                user_id,
                self.admin_chat_id,
                message.message_id,
                Some(&caption),
                SendOptions::default(),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e @ ApiError::Rejected { .. }) => {
                debug!(user_id, error = %e, "Captioned copy rejected, sending separately");
                self.api
                    .send_message(user_id, replies::ADMIN_REPLY_PREFIX, SendOptions::default())
                    .await?;
                self.api
                    .copy_message(
                        user_id,
                        self.admin_chat_id,
                        message.message_id,
                        None,
                        SendOptions::default(),
                    )
                    .await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Arguments of a `/post` command, or `None` for any other text.
fn post_arguments(text: &str) -> Option<&str> {
    let rest = text.strip_prefix("/post")?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use courier_shared::constants::KEY_USER_TOPIC_MAPPING;
    use courier_store::MemoryStore;

    use super::*;
    use crate::telegram::{Chat, User};
    use crate::testing::{error_reply, fake_client, ok_reply, FakeTransport};

    const ADMIN: i64 = -1000;

    fn config(tracking: bool, forum: bool) -> BotConfig {
        BotConfig {
            bot_token: "1:x".into(),
            admin_chat_id: ADMIN,
            user_id_secret: Some("secret".into()),
            user_tracking: tracking,
            forum_mode: forum,
            ..Default::default()
        }
    }

    struct Harness {
        handler: MessageHandler,
        transport: Arc<FakeTransport>,
        store: Arc<MemoryStore>,
    }

    fn harness_with(cfg: BotConfig, transport: FakeTransport) -> Harness {
        let transport = Arc::new(transport);
        let store = Arc::new(MemoryStore::new());
        let handler = MessageHandler::new(&cfg, fake_client(transport.clone()), store.clone());
        Harness {
            handler,
            transport,
            store,
        }
    }

    fn harness(tracking: bool, forum: bool) -> Harness {
        harness_with(config(tracking, forum), FakeTransport::ok())
    }

    fn from_user(id: i64, username: Option<&str>, text: Option<&str>) -> Message {
        Message {
            message_id: 10,
            from: Some(User {
                id,
                username: username.map(str::to_string),
                first_name: Some("Ann".into()),
            }),
            chat: Some(Chat { id }),
            text: text.map(str::to_string),
            ..Default::default()
        }
    }

    fn from_admin(text: Option<&str>) -> Message {
        Message {
            message_id: 20,
            from: Some(User {
                id: 1,
                username: Some("boss".into()),
                first_name: None,
            }),
            chat: Some(Chat { id: ADMIN }),
            text: text.map(str::to_string),
            ..Default::default()
        }
    }

    fn sent_texts(transport: &FakeTransport) -> Vec<(i64, String)> {
        transport
            .params("sendMessage")
            .iter()
            .map(|p| {
                (
                    p["chat_id"].as_i64().unwrap(),
                    p["text"].as_str().unwrap().to_string(),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_user_start_gets_welcome() {
        let h = harness(true, false);
        h.handler.handle(from_user(5, None, Some("/start"))).await;

        let sent = sent_texts(&h.transport);
        assert_eq!(sent, vec![(5, replies::USER_WELCOME.to_string())]);
        assert_eq!(h.handler.registry.chat_ids(), vec![5]);
    }

    #[tokio::test]
    async fn test_user_text_forwarded_with_tag_and_acked() {
        let h = harness(false, false);
        h.handler.handle(from_user(5, Some("ann"), Some("help me_now"))).await;

        let sent = sent_texts(&h.transport);
        assert_eq!(sent.len(), 2);
        let (chat, body) = &sent[0];
        assert_eq!(*chat, ADMIN);
        assert!(body.contains("help me\\_now"));
        assert_eq!(h.handler.codec().extract_user_id(body), Some(5));
        assert_eq!(sent[1], (5, replies::USER_ACK.to_string()));
    }

    #[tokio::test]
    async fn test_user_media_copied_with_caption() {
        let h = harness(false, false);
        let mut msg = from_user(5, None, None);
        msg.photo = Some(json!([{ "file_id": "p" }]));
        msg.caption = Some("receipt".into());
        h.handler.handle(msg).await;

        let copy = &h.transport.params("copyMessage")[0];
        assert_eq!(copy["chat_id"], ADMIN);
        assert_eq!(copy["from_chat_id"], 5);
        assert_eq!(copy["message_id"], 10);
        let caption = copy["caption"].as_str().unwrap();
        assert!(caption.contains("receipt"));
        assert_eq!(h.handler.codec().extract_user_id(caption), Some(5));
    }

    #[tokio::test]
    async fn test_forum_mode_forwards_into_topic() {
        let h = harness(false, true);
        h.handler.handle(from_user(5, None, Some("hi"))).await;
        h.handler.handle(from_user(5, None, Some("again"))).await;

        assert_eq!(h.transport.count("createForumTopic"), 1);
        let forwards: Vec<Value> = h
            .transport
            .params("sendMessage")
            .into_iter()
            .filter(|p| p["chat_id"] == ADMIN)
            .collect();
        assert_eq!(forwards.len(), 2);
        assert_eq!(forwards[0]["message_thread_id"], 100);
        assert!(forwards[1]["text"].as_str().unwrap().starts_with("📝 *New message:*"));
    }

    #[tokio::test]
    async fn test_user_failure_notice() {
        let h = harness_with(
            config(false, false),
            FakeTransport::with(|_, params| {
                if params["chat_id"] == ADMIN {
                    Ok(error_reply(400, "Bad Request: chat not found"))
                } else {
                    Ok(ok_reply(json!({ "message_id": 1 })))
                }
            }),
        );
        h.handler.handle(from_user(5, None, Some("hello"))).await;

        let sent = sent_texts(&h.transport);
        assert_eq!(sent.last(), Some(&(5, replies::USER_FAILURE.to_string())));
    }

    #[tokio::test]
    async fn test_admin_reply_routed_by_tag() {
        let h = harness(false, false);
        let tag = h.handler.codec().build_tag(42, None);
        let mut reply = from_admin(Some("ok, done."));
        reply.reply_to_message = Some(Box::new(Message {
            message_id: 19,
            text: Some(format!("question\n\n📍 From: {tag}")),
            ..Default::default()
        }));
        h.handler.handle(reply).await;

        let sent = sent_texts(&h.transport);
        assert_eq!(sent[0], (42, "💬 *Admin reply:*\n\nok, done\\.".to_string()));
        assert_eq!(sent[1].0, ADMIN);
        assert!(sent[1].1.contains("`42`"));
    }

    #[tokio::test]
    async fn test_admin_reply_to_forged_tag_is_unroutable() {
        let h = harness(false, false);
        let forged = TagCodec::new(Some("wrong".into())).build_tag(42, None);
        let mut reply = from_admin(Some("hi"));
        reply.reply_to_message = Some(Box::new(Message {
            message_id: 19,
            text: Some(forged),
            ..Default::default()
        }));
        h.handler.handle(reply).await;

        let sent = sent_texts(&h.transport);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], (ADMIN, replies::unknown_user(false).to_string()));
    }

    #[tokio::test]
    async fn test_admin_message_in_topic_routed_by_thread() {
        let h = harness(false, true);
        h.store
            .put(KEY_USER_TOPIC_MAPPING, r#"{"77":300}"#)
            .unwrap();
        let mut msg = from_admin(Some("hello from topic"));
        msg.message_thread_id = Some(300);
        h.handler.handle(msg).await;

        let sent = sent_texts(&h.transport);
        assert_eq!(sent[0].0, 77);
        assert!(sent[1].1.starts_with("✅ Message sent"));
        assert_eq!(h.transport.params("sendMessage")[1]["message_thread_id"], 300);
    }

    #[tokio::test]
    async fn test_topic_service_message_ignored() {
        let h = harness(false, true);
        let mut msg = from_admin(None);
        msg.message_thread_id = Some(300);
        msg.forum_topic_created = Some(json!({ "name": "x" }));
        h.handler.handle(msg).await;
        assert!(h.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_admin_media_reply_falls_back() {
        let h = harness_with(
            config(false, false),
            FakeTransport::with(|method, params| {
                if method == "copyMessage" && params.get("caption").is_some() {
                    return Ok(error_reply(400, "Bad Request: can't add caption"));
                }
                Ok(ok_reply(json!({ "message_id": 1 })))
            }),
        );
        let tag = h.handler.codec().build_tag(42, Some("ann"));
        let mut reply = from_admin(None);
        reply.sticker = Some(json!({ "file_id": "s" }));
        reply.reply_to_message = Some(Box::new(Message {
            message_id: 19,
            caption: Some(tag),
            ..Default::default()
        }));
        h.handler.handle(reply).await;

        assert_eq!(h.transport.count("copyMessage"), 2);
        let sent = sent_texts(&h.transport);
        assert_eq!(sent[0], (42, replies::ADMIN_REPLY_PREFIX.to_string()));
        assert!(sent[1].1.starts_with("✅ Reply sent"));
    }

    #[tokio::test]
    async fn test_admin_plain_message_gets_hint() {
        let h = harness(false, false);
        h.handler.handle(from_admin(Some("hello?"))).await;
        assert_eq!(
            sent_texts(&h.transport),
            vec![(ADMIN, replies::ADMIN_HINT.to_string())]
        );
    }

    #[tokio::test]
    async fn test_admin_commands() {
        let h = harness(false, false);
        h.handler.handle(from_admin(Some("/status"))).await;
        h.handler.handle(from_admin(Some("/users"))).await;
        h.handler.handle(from_admin(Some("/post"))).await;
        h.handler.handle(from_admin(Some("/post all hi"))).await;
        h.handler.handle(from_admin(Some("/post x,y hi"))).await;
        h.handler.handle(from_admin(Some("/post 5"))).await;

        let sent = sent_texts(&h.transport);
        assert!(sent[0].1.contains("tracking disabled"));
        assert_eq!(sent[1].1, replies::USERS_DISABLED);
        assert_eq!(sent[2].1, replies::post_usage());
        assert_eq!(sent[3].1, replies::POST_ALL_NEEDS_TRACKING);
        assert_eq!(sent[4].1, replies::POST_NO_VALID_IDS);
        assert_eq!(sent[5].1, replies::POST_MISSING_TEXT);
    }

    #[tokio::test]
    async fn test_post_broadcast_to_registry() {
        let h = harness(true, false);
        h.handler.handle(from_user(5, None, Some("/start"))).await;
        h.handler.handle(from_user(6, None, Some("/start"))).await;
        h.handler.handle(from_admin(Some("/post all update!"))).await;

        let broadcasts: Vec<i64> = sent_texts(&h.transport)
            .into_iter()
            .filter(|(_, text)| text.starts_with("📢 *Broadcast:*"))
            .map(|(chat, _)| chat)
            .collect();
        assert_eq!(broadcasts.len(), 2);

        let report = sent_texts(&h.transport).pop().unwrap().1;
        assert!(report.contains("✅ Delivered: 2"));
    }

    #[tokio::test]
    async fn test_post_as_reply_to_media_broadcasts_media() {
        let h = harness(false, false);
        let mut post = from_admin(Some("/post 5,6 new menu"));
        post.reply_to_message = Some(Box::new(Message {
            message_id: 15,
            photo: Some(json!([{ "file_id": "m" }])),
            ..Default::default()
        }));
        h.handler.handle(post).await;

        let copies = h.transport.params("copyMessage");
        assert_eq!(copies.len(), 2);
        assert!(copies.iter().all(|c| c["message_id"] == 15 && c["from_chat_id"] == ADMIN));
        assert_eq!(copies[0]["caption"], "📢 Broadcast:\n\nnew menu");
    }

    #[tokio::test]
    async fn test_incomplete_message_dropped() {
        let h = harness(false, false);
        h.handler
            .handle(Message {
                text: Some("orphan".into()),
                ..Default::default()
            })
            .await;
        assert!(h.transport.calls().is_empty());
    }

    #[test]
    fn test_post_arguments() {
        assert_eq!(post_arguments("/post"), Some(""));
        assert_eq!(post_arguments("/post all hi"), Some("all hi"));
        assert_eq!(post_arguments("/poster"), None);
        assert_eq!(post_arguments("hello"), None);
    }
}
