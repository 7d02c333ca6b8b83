//! Human-readable message copy. All strings use Telegram's legacy Markdown;
//! anything user-supplied must be escaped before it gets here.

use chrono::{DateTime, Utc};

use courier_shared::markdown::escape_markdown;
use courier_shared::UserIdentity;
use courier_store::RegistryRecord;

use crate::broadcast::DeliveryResult;

pub const USER_WELCOME: &str = "👋 Hello! I relay messages to the administrator.\n\n\
Send me your message and you will get a reply here as soon as possible.";
pub const USER_ACK: &str = "✅ Your message has been delivered. Please wait for a reply.";
pub const USER_FAILURE: &str = "❌ Sorry, your message could not be delivered. Please try again later.";

pub const POST_MISSING_TEXT: &str = "❌ Please provide the message text to broadcast.";
pub const POST_ALL_NEEDS_TRACKING: &str = "❌ Broadcasting to `all` requires user tracking.\n\n\
Set `ENABLE_USER_TRACKING=true` and restart the bot.";
pub const POST_NO_VALID_IDS: &str =
    "❌ No valid user IDs found.\n\nExpected format: `/post 123,456,789 message text`";

pub const USERS_DISABLED: &str = "❌ User tracking is disabled.\n\n\
Set `ENABLE_USER_TRACKING=true` and restart the bot.";
pub const USERS_EMPTY: &str = "📭 No users yet.\n\nUsers are recorded when they first write to the bot.";

pub const ADMIN_HINT: &str = "💡 *Hint:* reply to a user's message to answer them, or use a broadcast command.\n\n\
📢 Broadcast: `/post all message text`\n❓ Help: `/help`";
pub const UNKNOWN_TOPIC_USER: &str =
    "⚠️ Could not find the user for this topic. Only topics created for user messages can be answered.";

const DIVIDER: &str = "────────────────────";

fn enabled(flag: bool) -> &'static str {
    if flag {
        "🟢 enabled"
    } else {
        "🔴 disabled"
    }
}

pub fn timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Cut `text` to at most `max` characters, marking the cut with `...`.
pub fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

pub fn forward_header(identity: &UserIdentity, now: DateTime<Utc>) -> String {
    let username = identity
        .username
        .as_deref()
        .map(|u| format!("\n👤 Username: @{}", escape_markdown(u)))
        .unwrap_or_default();
    format!(
        "📩 *From: {}*\n🆔 ID: `{}`{username}\n⏰ Time: {}\n{DIVIDER}",
        escape_markdown(&identity.display_name),
        identity.user_id,
        timestamp(now),
    )
}

/// Admin-side copy of a user's text message. `text` is already escaped.
pub fn forward_text(
    identity: &UserIdentity,
    text: &str,
    tag: &str,
    in_topic: bool,
    now: DateTime<Utc>,
) -> String {
    if in_topic {
        format!("📝 *New message:*\n{text}\n\n📍 *From:* {tag}")
    } else {
        format!(
            "{}\n📝 *Message:*\n{text}\n\n📍 *From:* {tag}",
            forward_header(identity, now)
        )
    }
}

/// Caption for a user's media message. `caption` is already escaped.
pub fn forward_caption(
    identity: &UserIdentity,
    caption: Option<&str>,
    media_kind: &str,
    tag: &str,
    in_topic: bool,
    now: DateTime<Utc>,
) -> String {
    match (in_topic, caption) {
        (true, Some(caption)) => format!("📝 *New message:*\n{caption}\n\n📍 *From:* {tag}"),
        (true, None) => format!("📝 *New message:*\n{media_kind}\n\n📍 *From:* {tag}"),
        (false, Some(caption)) => format!(
            "{}\n📝 *Caption:* {caption}\n\n📍 *From:* {tag}",
            forward_header(identity, now)
        ),
        (false, None) => format!("{}\n📍 *From:* {tag}", forward_header(identity, now)),
    }
}

pub fn admin_panel(tracking: bool, forum: bool, forum_detected: bool) -> String {
    let detected = if forum_detected {
        " ✅ forum group detected"
    } else {
        ""
    };
    format!(
        "🔧 *Admin panel*\n\n\
         📋 *Commands:*\n\
         • `/status` - bot status\n\
         • `/help` - usage help\n\
         • `/post` - broadcast a message\n\
         • `/users` - recent users (requires user tracking)\n\n\
         💡 *Usage:*\n\
         • Reply to a forwarded message to answer that user\n\
         • Use /post to broadcast\n\
         • In forum mode every user gets a dedicated topic\n\n\
         📊 *Settings:*\n\
         • User tracking: {}\n\
         • Forum mode: {}{detected}\n\n\
         🤖 Ready for messages.",
        enabled(tracking),
        enabled(forum),
    )
}

pub fn status(
    tracked_users: Option<usize>,
    forum: bool,
    forum_detected: bool,
    topic_count: usize,
    now: DateTime<Utc>,
) -> String {
    let users = tracked_users.map_or_else(|| "tracking disabled".to_string(), |n| n.to_string());
    let detected = if forum_detected { " (forum group)" } else { "" };
    format!(
        "📊 *Bot status*\n\n\
         🟢 State: running\n\
         🔄 Mode: stateless relay\n\
         👥 Tracked users: {users}\n\
         🗣️ Forum mode: {}{detected}\n\
         📝 User topics: {topic_count}\n\
         ⏰ Checked at: {}",
        enabled(forum),
        timestamp(now),
    )
}

pub fn help(forum: bool) -> String {
    let forum_help = if forum {
        "\n\n🗣️ *Forum mode:*\n\
         • Every user has a dedicated topic\n\
         • Messages sent inside a topic go to its user\n\
         • Media works inside topics too"
    } else {
        ""
    };
    format!(
        "❓ *Help*\n\n\
         🔄 *Replying:*\n\
         Reply to a forwarded message to send your answer to that user.\n\n\
         📢 *Broadcasting:*\n\
         • `/post all message text` - everyone (requires user tracking)\n\
         • `/post 123,456,789 message text` - selected users\n\
         • Reply to a media message with /post to broadcast that media\n\n\
         👥 *Users:*\n\
         • `/users` - recently active users\n\n\
         📝 *Messages:*\n\
         • Text, photos, files and other media are supported\n\
         • Markdown formatting is supported{forum_help}\n\n\
         ⚙️ *Commands:*\n\
         • `/start` - admin panel\n\
         • `/status` - bot status\n\
         • `/help` - this message\n\
         • `/post` - broadcast\n\
         • `/users` - user list"
    )
}

pub fn post_usage() -> String {
    "📢 *Broadcast usage*\n\n\
     🎯 *Format:*\n\
     • `/post all message text` - all users\n\
     • `/post 123,456,789 message text` - selected users\n\n\
     💡 *Examples:*\n\
     • `/post all Maintenance tonight 22:00-23:00`\n\
     • `/post 123456789,987654321 Hello, this is a test`\n\n\
     📎 *Media:*\n\
     Reply to a photo or file with /post to broadcast it.\n\n\
     ⚠️ *Notes:*\n\
     • `all` requires user tracking\n\
     • Separate user IDs with commas\n\
     • Broadcasts are rate limited automatically"
        .to_string()
}

/// `users` is newest first; `total` is the full registry size.
pub fn users_list(users: &[RegistryRecord], total: usize) -> String {
    let entries: Vec<String> = users
        .iter()
        .enumerate()
        .map(|(i, user)| {
            format!(
                "{}. {}\n   ID: `{}`\n   Last active: {}",
                i + 1,
                escape_markdown(&user.display_name),
                user.chat_id,
                timestamp(user.last_active),
            )
        })
        .collect();
    let more = if total > users.len() { "\n\n..." } else { "" };
    format!(
        "👥 *Users* (latest {}/{total})\n\n{}{more}",
        users.len(),
        entries.join("\n\n")
    )
}

pub fn broadcast_started(targets: usize, media: bool) -> String {
    let what = if media { "media" } else { "message" };
    format!("🚀 Broadcasting {what}...\n\n📊 Recipients: {targets}\n⏳ Please wait...")
}

pub fn broadcast_report(result: &DeliveryResult, media: bool) -> String {
    let title = if media {
        "Media broadcast finished"
    } else {
        "Broadcast finished"
    };
    let details = if result.failure_count == 0 {
        "🎉 All messages delivered!".to_string()
    } else {
        let lines: Vec<String> = result
            .error_lines()
            .iter()
            .map(|line| escape_markdown(line))
            .collect();
        format!("🔍 *Errors:*\n{}", lines.join("\n"))
    };
    format!(
        "📊 *{title}*\n\n✅ Delivered: {}\n❌ Failed: {}\n\n{details}",
        result.success_count, result.failure_count
    )
}

pub fn admin_reply_text(text: &str) -> String {
    format!("💬 *Admin reply:*\n\n{}", escape_markdown(text))
}

pub const ADMIN_REPLY_PREFIX: &str = "💬 Admin reply:";

pub fn reply_sent(user_id: i64, in_topic: bool) -> String {
    if in_topic {
        format!("✅ Message sent to user (ID: `{user_id}`)")
    } else {
        format!("✅ Reply sent to user (ID: `{user_id}`)")
    }
}

pub fn reply_failed(reason: &str) -> String {
    format!("❌ Failed to deliver: {}", escape_markdown(reason))
}

pub fn unknown_user(forum: bool) -> &'static str {
    if forum {
        "⚠️ Could not identify the user. Either:\n\
         • reply to a forwarded message that carries a user tag, or\n\
         • write inside that user's topic"
    } else {
        "⚠️ Could not identify the user. Reply to a forwarded message that carries a user tag."
    }
}

pub fn admin_error(reason: &str) -> String {
    format!("❌ Error while handling the message: {}", escape_markdown(reason))
}

pub fn webhook_error(reason: &str) -> String {
    format!("🚨 Bot error: {}", escape_markdown(reason))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn ann() -> UserIdentity {
        UserIdentity::new(5, 5, Some("ann_b".into()), Some("Ann"))
    }

    #[test]
    fn test_forward_text_with_header() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let body = forward_text(&ann(), "hi", "[TAG]", false, now);
        assert!(body.starts_with("📩 *From: ann\\_b*"));
        assert!(body.contains("👤 Username: @ann\\_b"));
        assert!(body.contains("2024-03-01 12:00:00 UTC"));
        assert!(body.ends_with("📍 *From:* [TAG]"));
    }

    #[test]
    fn test_forward_in_topic_skips_header() {
        let body = forward_text(&ann(), "hi", "[TAG]", true, Utc::now());
        assert_eq!(body, "📝 *New message:*\nhi\n\n📍 *From:* [TAG]");

        let caption = forward_caption(&ann(), None, "📷 Photo", "[TAG]", true, Utc::now());
        assert!(caption.contains("📷 Photo"));
    }

    #[test]
    fn test_clip() {
        assert_eq!(clip("abc", 5), "abc");
        assert_eq!(clip("abcdefgh", 6), "abc...");
    }

    #[test]
    fn test_broadcast_report() {
        let ok = DeliveryResult {
            success_count: 3,
            batches: 1,
            ..Default::default()
        };
        assert!(broadcast_report(&ok, false).contains("All messages delivered"));

        let failed = DeliveryResult {
            failure_count: 7,
            errors: vec!["user 1: Forbidden".into(); 5],
            suppressed_errors: 2,
            ..Default::default()
        };
        let report = broadcast_report(&failed, true);
        assert!(report.contains("Media broadcast finished"));
        assert!(report.contains("\\.\\.\\. and 2 more errors"));
    }

    #[test]
    fn test_users_list() {
        let now = Utc::now();
        let records = vec![RegistryRecord::from_identity(&ann(), now)];
        let text = users_list(&records, 30);
        assert!(text.contains("(latest 1/30)"));
        assert!(text.contains("ID: `5`"));
        assert!(text.ends_with("..."));
    }
}
