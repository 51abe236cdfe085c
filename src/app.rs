use std::{sync::Arc, time::Duration};

use anyhow::Result;
use reqwest::Client;
use teloxide::prelude::*;
use tokio::{task::JoinHandle, time::timeout};
use tokio_cron_scheduler::JobScheduler;

use crate::{
    ai::{CorpusSource, GeminiClient, GeminiContentAnalyzer, GeminiSimilarityScorer},
    config::AppConfig,
    db::{self, blogs::BlogRepository, settings::SqliteSettingsBackend},
    infrastructure::{
        directories::ResolvedPaths,
        notifier::{notify_admin_group, TelegramAlerts},
        shutdown::Shutdown,
    },
    moderation::{
        ModerationEngine, ModerationService, ModerationStore, ModeratorAlerts, RetryPolicy,
        SettingsBackend, SettingsRegistry,
    },
    tasks::{
        processor::ModerationProcessor,
        queue::ModerationQueue,
        scheduler::{build_sweep_callback, configure_sweep_jobs},
    },
    telegram::TelegramService,
};

pub struct ModerationApp {
    _paths: ResolvedPaths,
    scheduler: JobScheduler,
    processor_handle: JoinHandle<()>,
    telegram: TelegramService,
    blogs: Arc<BlogRepository>,
    shutdown: Shutdown,
    config: Arc<AppConfig>,
    bot: Bot,
}

impl ModerationApp {
    pub async fn initialize(
        config: AppConfig,
        paths: ResolvedPaths,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let pool = db::init_pool(&paths.db_path).await?;
        let blogs = Arc::new(BlogRepository::new(pool.clone()));

        let settings_backend: Arc<dyn SettingsBackend> =
            Arc::new(SqliteSettingsBackend::new(pool));
        let settings = Arc::new(SettingsRegistry::load(settings_backend).await?);

        if config.gemini.api_key.is_none() {
            tracing::warn!(
                target: "engine",
                "GEMINI_API_KEY is not set; every automated check will fail and blogs stay pending"
            );
        }

        let http_client = Client::builder()
            .user_agent(format!("transcripto-moderation/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        let gemini = GeminiClient::new(http_client, config.gemini.clone());
        let corpus: Arc<dyn CorpusSource> = blogs.clone();
        let engine = Arc::new(ModerationEngine::new(
            Arc::new(GeminiContentAnalyzer::new(gemini.clone())),
            Arc::new(GeminiSimilarityScorer::new(gemini, corpus)),
            RetryPolicy::from_config(&config.moderation),
        ));

        let bot = Bot::new(&config.telegram_bot_token);
        let alerts: Arc<dyn ModeratorAlerts> =
            Arc::new(TelegramAlerts::new(bot.clone(), config.clone()));
        let store: Arc<dyn ModerationStore> = blogs.clone();
        let service = Arc::new(ModerationService::new(
            engine,
            store,
            settings.clone(),
            Some(alerts),
        ));

        let queue = Arc::new(ModerationQueue::new());
        let processor = Arc::new(ModerationProcessor::new(
            queue.clone(),
            service.clone(),
            config.moderation.worker_concurrency,
        ));
        let processor_handle = processor.spawn(shutdown.subscribe());

        let sweep = build_sweep_callback(
            blogs.clone(),
            settings,
            queue.clone(),
            config.scheduler.sweep_batch,
        );
        let scheduler = configure_sweep_jobs(&config.scheduler.sweep_crons, sweep).await?;

        let telegram = TelegramService::new(bot.clone(), config.clone(), service, queue);

        Ok(Self {
            _paths: paths,
            scheduler,
            processor_handle,
            telegram,
            blogs,
            shutdown,
            config,
            bot,
        })
    }

    pub async fn run(self) -> Result<()> {
        let ModerationApp {
            _paths: _,
            mut scheduler,
            mut processor_handle,
            telegram,
            blogs,
            shutdown,
            config,
            bot,
        } = self;

        tracing::info!(target: "lifecycle", "blog moderation worker started");
        notify_admin_group(&bot, config.as_ref(), "Blog moderation worker started.").await;

        let mut shutdown_listener = shutdown.subscribe();
        let shutdown_timeout = Duration::from_secs(5);
        let mut telegram_future = Box::pin(telegram.run(shutdown.subscribe()));
        let mut telegram_completed = false;

        tokio::select! {
            _ = shutdown_listener.notified() => {
                tracing::info!(target: "lifecycle", "shutdown signal received");
            }
            res = &mut telegram_future => {
                telegram_completed = true;
                if let Err(err) = res {
                    tracing::error!(target: "telegram", ?err, "Telegram console stopped with an error");
                } else {
                    tracing::info!(target: "telegram", "Telegram console stopped");
                }
            }
        }

        shutdown.trigger();

        if !telegram_completed {
            let wait = tokio::time::sleep(shutdown_timeout);
            tokio::pin!(wait);
            tokio::select! {
                res = &mut telegram_future => {
                    if let Err(err) = res {
                        tracing::error!(target: "telegram", ?err, "Telegram console stopped with an error");
                    }
                }
                _ = &mut wait => {
                    tracing::warn!(
                        target: "telegram",
                        "Telegram console did not stop within {:?}; forcing exit",
                        shutdown_timeout
                    );
                }
            }
        }

        match timeout(shutdown_timeout, scheduler.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::error!(target: "scheduler", ?err, "scheduler shutdown failed");
            }
            Err(_) => {
                tracing::warn!(
                    target: "scheduler",
                    "scheduler did not stop within {:?}",
                    shutdown_timeout
                );
            }
        }

        let processor_sleep = tokio::time::sleep(shutdown_timeout);
        tokio::pin!(processor_sleep);
        tokio::select! {
            res = &mut processor_handle => {
                if let Err(err) = res {
                    if err.is_panic() {
                        tracing::error!(target: "processor", "moderation processor panicked");
                    }
                }
            }
            _ = &mut processor_sleep => {
                tracing::warn!(
                    target: "processor",
                    "moderation processor did not stop within {:?}; aborting",
                    shutdown_timeout
                );
                processor_handle.abort();
            }
        }

        if timeout(shutdown_timeout, blogs.close()).await.is_err() {
            tracing::warn!(
                target: "db",
                "database pool did not close within {:?}",
                shutdown_timeout
            );
        }

        tracing::info!(target: "lifecycle", "blog moderation worker stopped");
        notify_admin_group(&bot, config.as_ref(), "Blog moderation worker stopped.").await;
        Ok(())
    }
}
