use std::sync::Arc;

use teloxide::utils::command::BotCommands;

use crate::{config::AppConfig, moderation::ModerationService, tasks::queue::ModerationQueue};

pub type BotResult<T> = Result<T, teloxide::RequestError>;

pub struct AppState {
    pub config: Arc<AppConfig>,
    pub service: Arc<ModerationService>,
    pub queue: Arc<ModerationQueue>,
}

impl AppState {
    pub fn is_admin_group(&self, chat_id: i64) -> bool {
        self.config.admin_group_id.is_some_and(|id| id == chat_id)
    }

    pub fn is_admin_user(&self, user_id: i64) -> bool {
        self.config.admin_user_id.is_some_and(|id| id == user_id)
    }
}

#[derive(BotCommands, Clone)]
#[command(rename_rule = "snake_case", description = "Available commands:")]
pub enum GeneralCommand {
    #[command(description = "introduce the bot")]
    Start,
    #[command(description = "show this help")]
    Help,
    #[command(description = "queue and moderation status")]
    Status,
    #[command(description = "show the current chat id")]
    Chatid,
    #[command(description = "measure response latency")]
    Ping,
}

/// Commands accepted only from the admin user inside the admin group.
#[derive(Debug, Clone, PartialEq)]
pub enum AdminCommand {
    Pending,
    Approve(i64),
    Reject { blog_id: i64, note: Option<String> },
    Recheck(i64),
    Settings,
    Set { key: String, value: String },
    Stats,
    SyncCommands,
}
