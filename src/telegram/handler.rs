use std::sync::Arc;

use anyhow::Result;
use teloxide::{
    dispatching::Dispatcher,
    error_handlers::LoggingErrorHandler,
    prelude::*,
    types::{BotCommandScope, ChatId, Message, ParseMode, Recipient},
    update_listeners,
    utils::command::BotCommands,
};
use tokio::time::Instant;

use crate::{
    config::AppConfig,
    infrastructure::shutdown::ShutdownListener,
    moderation::{ModerationService, ServiceError},
    tasks::queue::{ModerationQueue, Priority},
};

use super::{
    types::{AdminCommand, AppState, BotResult, GeneralCommand},
    utils::{
        admin_command_list, escape_html, format_counts, format_pending, format_settings,
        parse_admin_command, user_to_i64,
    },
};

const PENDING_LIST_LIMIT: u32 = 20;

/// Operator console: moderators review and override decisions from the
/// admin group chat.
pub struct TelegramService {
    bot: Bot,
    state: Arc<AppState>,
}

impl TelegramService {
    pub fn new(
        bot: Bot,
        config: Arc<AppConfig>,
        service: Arc<ModerationService>,
        queue: Arc<ModerationQueue>,
    ) -> Self {
        let state = Arc::new(AppState {
            config,
            service,
            queue,
        });
        Self { bot, state }
    }

    pub async fn run(&self, mut shutdown: ShutdownListener) -> Result<()> {
        self.sync_commands().await?;
        let me = self.bot.get_me().await?;
        tracing::info!(
            target: "telegram",
            bot_id = me.id.0,
            username = ?me.username,
            "connected to Telegram"
        );

        let handler = Update::filter_message()
            .branch(
                dptree::entry()
                    .filter_command::<GeneralCommand>()
                    .endpoint(Self::on_command),
            )
            .branch(dptree::endpoint(Self::on_plain_message));

        let mut dispatcher = Dispatcher::builder(self.bot.clone(), handler)
            .dependencies(dptree::deps![self.state.clone()])
            .default_handler(|update| async move {
                tracing::debug!(target: "telegram", ?update, "unhandled update");
            })
            .build();

        let listener = update_listeners::polling_default(self.bot.clone()).await;
        let error_handler = LoggingErrorHandler::with_custom_text("update listener error");

        let shutdown_token = dispatcher.shutdown_token();
        let mut dispatcher_future =
            Box::pin(dispatcher.dispatch_with_listener(listener, error_handler));
        let mut dispatcher_finished = false;

        tokio::select! {
            _ = shutdown.notified() => {
                tracing::info!(target: "telegram", "dispatcher shutdown requested");
                if let Ok(wait) = shutdown_token.shutdown() {
                    wait.await;
                }
            }
            _ = &mut dispatcher_future => {
                dispatcher_finished = true;
                tracing::info!(target: "telegram", "dispatcher finished");
            }
        }

        if !dispatcher_finished {
            dispatcher_future.await;
        }

        Ok(())
    }

    async fn on_plain_message(bot: Bot, msg: Message, state: Arc<AppState>) -> BotResult<()> {
        let Some(text) = msg.text() else {
            return Ok(());
        };
        let Some(parsed) = parse_admin_command(text) else {
            return Ok(());
        };
        if !state.is_admin_group(msg.chat.id.0) {
            return Ok(());
        }
        let Some(from) = msg.from.as_ref() else {
            return Ok(());
        };
        if !state.is_admin_user(user_to_i64(from)) {
            bot.send_message(msg.chat.id, "Only the moderator account can use this command.")
                .await?;
            return Ok(());
        }

        match parsed {
            Ok(command) => Self::handle_admin_command(&bot, &msg, command, &state).await,
            Err(usage) => {
                bot.send_message(msg.chat.id, usage).await?;
                Ok(())
            }
        }
    }

    async fn on_command(
        bot: Bot,
        msg: Message,
        cmd: GeneralCommand,
        state: Arc<AppState>,
    ) -> BotResult<()> {
        match cmd {
            GeneralCommand::Start => {
                let settings = state.service.settings();
                bot.send_message(
                    msg.chat.id,
                    format!(
                        "Hello! I screen blog submissions for the moderation team.\nAuto-moderation: {}",
                        if settings.enabled { "enabled" } else { "disabled" }
                    ),
                )
                .await?
            }
            GeneralCommand::Help => {
                bot.send_message(msg.chat.id, GeneralCommand::descriptions().to_string())
                    .await?
            }
            GeneralCommand::Status => {
                let snapshot = state.queue.snapshot();
                let settings = state.service.settings();
                bot.send_message(
                    msg.chat.id,
                    format!(
                        "Moderation status\n- auto-moderation: {}\n- high priority: {}\n- normal priority: {}\n- in flight: {}",
                        if settings.enabled { "enabled" } else { "disabled" },
                        snapshot.high_priority,
                        snapshot.normal_priority,
                        snapshot.in_flight
                    ),
                )
                .await?
            }
            GeneralCommand::Chatid => {
                bot.send_message(msg.chat.id, format!("Current chat id: {}", msg.chat.id))
                    .await?
            }
            GeneralCommand::Ping => {
                let start = Instant::now();
                let sent = bot.send_message(msg.chat.id, "Measuring...").await?;
                let latency_secs = start.elapsed().as_secs_f64();
                bot.edit_message_text(
                    msg.chat.id,
                    sent.id,
                    format!("Pong! Round trip: {:.3}s", latency_secs),
                )
                .await?
            }
        };
        Ok(())
    }

    async fn handle_admin_command(
        bot: &Bot,
        msg: &Message,
        command: AdminCommand,
        state: &AppState,
    ) -> BotResult<()> {
        let chat_id = msg.chat.id;
        match command {
            AdminCommand::Pending => match state.service.pending(PENDING_LIST_LIMIT).await {
                Ok(blogs) => {
                    bot.send_message(chat_id, format_pending(&blogs, &state.config.timezone))
                        .parse_mode(ParseMode::Html)
                        .await?;
                }
                Err(err) => Self::report_failure(bot, chat_id, "list pending blogs", &err).await?,
            },
            AdminCommand::Approve(blog_id) => match state.service.approve(blog_id).await {
                Ok(blog) => {
                    bot.send_message(chat_id, format!("Blog #{} approved.", blog.id))
                        .await?;
                }
                Err(ServiceError::ApprovalBlocked { reasons, .. }) => {
                    bot.send_message(
                        chat_id,
                        format!(
                            "Blog #{blog_id} failed the automated checks and was not approved.\nReasons: {}\nReject it, or adjust /settings and retry.",
                            reasons.join(", ")
                        ),
                    )
                    .await?;
                }
                Err(err) => Self::report_failure(bot, chat_id, "approve the blog", &err).await?,
            },
            AdminCommand::Reject { blog_id, note } => {
                match state.service.reject(blog_id, note.as_deref()).await {
                    Ok(blog) => {
                        bot.send_message(
                            chat_id,
                            format!(
                                "Blog #{} rejected.\nNote: {}",
                                blog.id,
                                blog.moderation_notes.as_deref().unwrap_or("-")
                            ),
                        )
                        .await?;
                    }
                    Err(err) => Self::report_failure(bot, chat_id, "reject the blog", &err).await?,
                }
            }
            AdminCommand::Recheck(blog_id) => {
                let reply = if state.queue.push(Priority::High, blog_id) {
                    format!("Blog #{blog_id} queued for auto-moderation.")
                } else {
                    format!("Blog #{blog_id} is already queued.")
                };
                bot.send_message(chat_id, reply).await?;
            }
            AdminCommand::Settings => {
                bot.send_message(chat_id, format_settings(&state.service.settings()))
                    .parse_mode(ParseMode::Html)
                    .await?;
            }
            AdminCommand::Set { key, value } => {
                match state.service.update_setting(&key, &value).await {
                    Ok(settings) => {
                        tracing::info!(target: "admin", key = %key, value = %value, "moderation setting changed");
                        bot.send_message(chat_id, format_settings(&settings))
                            .parse_mode(ParseMode::Html)
                            .await?;
                    }
                    Err(err) => Self::report_failure(bot, chat_id, "update settings", &err).await?,
                }
            }
            AdminCommand::Stats => match state.service.status_counts().await {
                Ok(counts) => {
                    bot.send_message(chat_id, format_counts(&counts)).await?;
                }
                Err(err) => Self::report_failure(bot, chat_id, "load statistics", &err).await?,
            },
            AdminCommand::SyncCommands => {
                Self::sync_commands_for(bot, &state.config).await?;
                bot.send_message(chat_id, "Bot commands synced.").await?;
            }
        }
        Ok(())
    }

    async fn report_failure(
        bot: &Bot,
        chat_id: ChatId,
        action: &str,
        err: &ServiceError,
    ) -> BotResult<()> {
        tracing::error!(target: "admin", action, error = %err, "moderator command failed");
        bot.send_message(
            chat_id,
            format!("Could not {action}: {}", escape_html(&err.to_string())),
        )
        .parse_mode(ParseMode::Html)
        .await?;
        Ok(())
    }

    async fn sync_commands(&self) -> BotResult<()> {
        Self::sync_commands_for(&self.bot, &self.state.config).await
    }

    async fn sync_commands_for(bot: &Bot, config: &AppConfig) -> BotResult<()> {
        bot.set_my_commands(GeneralCommand::bot_commands()).await?;

        let admin_commands = admin_command_list();
        if let Some(admin_user_id) = config.admin_user_id {
            bot.set_my_commands(admin_commands.clone())
                .scope(BotCommandScope::Chat {
                    chat_id: Recipient::Id(ChatId(admin_user_id)),
                })
                .await?;
        }
        if let Some(admin_group_id) = config.admin_group_id {
            bot.set_my_commands(admin_commands)
                .scope(BotCommandScope::Chat {
                    chat_id: Recipient::Id(ChatId(admin_group_id)),
                })
                .await?;
        }
        tracing::info!(target: "telegram", "bot commands synced");
        Ok(())
    }
}
