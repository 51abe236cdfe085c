use std::convert::TryFrom;

use chrono_tz::Tz;
use teloxide::{
    types::{BotCommand, User},
    utils::command::BotCommands,
};

use crate::{
    domain::{Blog, StatusCounts},
    moderation::ModerationSettings,
    telegram::types::{AdminCommand, GeneralCommand},
};

const PREVIEW_CHARS: usize = 80;
const TITLE_CHARS: usize = 80;
const AUTHOR_CHARS: usize = 40;
/// Telegram rejects messages over 4096 characters; leave room for the footer.
const MAX_MESSAGE_CHARS: usize = 3900;

/// `None` when the text is not an admin command at all; `Err` carries a usage
/// hint for a recognised command with bad arguments.
pub fn parse_admin_command(text: &str) -> Option<Result<AdminCommand, String>> {
    let mut parts = text.split_whitespace();
    let head = parts.next()?.strip_prefix('/')?;
    let command = head.split('@').next().unwrap_or(head);

    let parse_id = |raw: Option<&str>, usage: &str| -> Result<i64, String> {
        raw.and_then(|value| value.parse::<i64>().ok())
            .ok_or_else(|| format!("A blog id is required. Usage: {usage}"))
    };

    let parsed = match command {
        "pending" => Ok(AdminCommand::Pending),
        "approve" => parse_id(parts.next(), "/approve <blog_id>").map(AdminCommand::Approve),
        "reject" => parse_id(parts.next(), "/reject <blog_id> [note]").map(|blog_id| {
            let note = parts.collect::<Vec<_>>().join(" ");
            AdminCommand::Reject {
                blog_id,
                note: if note.is_empty() { None } else { Some(note) },
            }
        }),
        "recheck" => parse_id(parts.next(), "/recheck <blog_id>").map(AdminCommand::Recheck),
        "settings" => Ok(AdminCommand::Settings),
        "set" => match (parts.next(), parts.next()) {
            (Some(key), Some(value)) => Ok(AdminCommand::Set {
                key: key.to_string(),
                value: value.to_string(),
            }),
            _ => Err("Usage: /set <key> <value>, e.g. /set max_plagiarism_score 0.7".to_string()),
        },
        "stats" => Ok(AdminCommand::Stats),
        "sync_commands" => Ok(AdminCommand::SyncCommands),
        _ => return None,
    };
    Some(parsed)
}

pub fn admin_command_list() -> Vec<BotCommand> {
    let mut commands = GeneralCommand::bot_commands();
    commands.extend(vec![
        BotCommand::new("pending", "list pending blogs"),
        BotCommand::new("approve", "approve a pending blog after automated checks"),
        BotCommand::new("reject", "reject a pending blog with an optional note"),
        BotCommand::new("recheck", "queue a pending blog for auto-moderation"),
        BotCommand::new("settings", "show auto-moderation settings"),
        BotCommand::new("set", "change an auto-moderation setting"),
        BotCommand::new("stats", "blog counts by status"),
        BotCommand::new("sync_commands", "sync bot commands"),
    ]);
    commands
}

pub fn format_settings(settings: &ModerationSettings) -> String {
    let flag = |on: bool| if on { "on" } else { "off" };
    format!(
        "<b>Auto-moderation settings</b>\n\
         enabled: {}\n\
         max_plagiarism_score: {:.2}\n\
         auto_reject_spam: {}\n\
         auto_reject_hate: {}\n\
         auto_reject_inappropriate: {}\n\
         auto_reject_violence: {}\n\
         notify_moderators: {}",
        flag(settings.enabled),
        settings.max_plagiarism_score,
        flag(settings.auto_reject_spam),
        flag(settings.auto_reject_hate),
        flag(settings.auto_reject_inappropriate),
        flag(settings.auto_reject_violence),
        flag(settings.notify_moderators),
    )
}

pub fn format_pending(blogs: &[Blog], timezone: &str) -> String {
    if blogs.is_empty() {
        return "No pending blogs to moderate.".to_string();
    }
    let tz: Tz = timezone.parse().unwrap_or(chrono_tz::UTC);
    let mut message = String::from("<b>Pending blogs</b>\n\n");
    let mut length = message.chars().count();
    for (shown, blog) in blogs.iter().enumerate() {
        let entry = format!(
            "#{} <b>{}</b>\n   by {} at {}{}\n   {}\n",
            blog.id,
            escape_html(&truncate_chars(blog.title.trim(), TITLE_CHARS)),
            escape_html(&truncate_chars(&blog.user_id, AUTHOR_CHARS)),
            blog.created_at.with_timezone(&tz).format("%Y-%m-%d %H:%M"),
            if blog.auto_moderated_at.is_some() {
                " (checked)"
            } else {
                ""
            },
            escape_html(&preview(&blog.content)),
        );
        let entry_length = entry.chars().count();
        if length + entry_length > MAX_MESSAGE_CHARS {
            message.push_str(&format!("…and {} more", blogs.len() - shown));
            break;
        }
        length += entry_length;
        message.push_str(&entry);
    }
    message
}

pub fn format_counts(counts: &StatusCounts) -> String {
    format!(
        "Blogs by status\n- pending: {}\n- approved: {}\n- rejected: {}",
        counts.pending, counts.approved, counts.rejected
    )
}

fn preview(content: &str) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&flat, PREVIEW_CHARS)
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{cut}…")
}

pub fn user_to_i64(user: &User) -> i64 {
    i64::try_from(user.id.0).unwrap_or(i64::MAX)
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
