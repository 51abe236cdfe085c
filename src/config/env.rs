use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub telegram_bot_token: String,
    pub admin_user_id: Option<i64>,
    pub admin_group_id: Option<i64>,
    pub gemini: GeminiConfig,
    pub moderation: ModerationConfig,
    pub directories: DirectoryConfig,
    pub logging: LoggingConfig,
    pub timezone: String,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub api_base: String,
}

/// Tuning for calls made by the decision engine and the background worker.
#[derive(Debug, Clone)]
pub struct ModerationConfig {
    pub call_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub worker_concurrency: usize,
}

#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub logs_dir: String,
    pub data_dir: String,
    pub db_filename: String,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub sweep_crons: Vec<String>,
    pub sweep_batch: u32,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}
