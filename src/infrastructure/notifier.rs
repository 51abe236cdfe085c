use std::sync::Arc;

use async_trait::async_trait;
use chrono_tz::Tz;
use teloxide::{prelude::*, types::ParseMode};

use crate::{config::AppConfig, domain::Blog, moderation::ModeratorAlerts, telegram::utils::escape_html};

/// Sends a message to the configured admin group, logging a warning on failure.
pub async fn notify_admin_group(bot: &Bot, config: &AppConfig, text: &str) {
    if let Some(admin_group_id) = config.admin_group_id {
        if admin_group_id == 0 {
            return;
        }
        if let Err(err) = bot
            .send_message(ChatId(admin_group_id), text)
            .parse_mode(ParseMode::Html)
            .await
        {
            tracing::warn!(
                target: "telegram",
                error = %err,
                admin_group_id,
                "failed to send admin notification"
            );
        }
    }
}

/// Forwards moderator notifications to the admin group chat.
pub struct TelegramAlerts {
    bot: Bot,
    config: Arc<AppConfig>,
}

impl TelegramAlerts {
    pub fn new(bot: Bot, config: Arc<AppConfig>) -> Self {
        Self { bot, config }
    }
}

#[async_trait]
impl ModeratorAlerts for TelegramAlerts {
    async fn alert(&self, blog: &Blog, message: &str) {
        let text = format_alert(blog, message, &self.config.timezone);
        notify_admin_group(&self.bot, self.config.as_ref(), &text).await;
    }
}

fn format_alert(blog: &Blog, message: &str, timezone: &str) -> String {
    let tz: Tz = timezone.parse().unwrap_or(chrono_tz::UTC);
    format!(
        "<b>Moderation alert</b>\n\n\
         Blog: #{} {}\n\
         Author: {}\n\
         Submitted: {}\n\n\
         {}\n\n\
         Use /approve {} to override after review.",
        blog.id,
        escape_html(&blog.title),
        escape_html(&blog.user_id),
        blog.created_at.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S %Z"),
        escape_html(message),
        blog.id,
    )
}
