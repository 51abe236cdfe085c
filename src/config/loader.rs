use std::{env, str::FromStr, time::Duration};

use super::env::{
    AppConfig, ConfigError, DirectoryConfig, GeminiConfig, LoggingConfig, ModerationConfig,
    SchedulerConfig,
};

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_SWEEP_CRON: &str = "0 * * * * *";

pub fn load_config() -> Result<AppConfig, ConfigError> {
    AppConfig::from_env()
}

impl AppConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let telegram_bot_token = env::var("TELEGRAM_BOT_TOKEN")
            .map_err(|_| ConfigError::Missing("TELEGRAM_BOT_TOKEN"))?;

        let admin_user_id = parse_int("ADMIN_USER_ID")?;
        let admin_group_id =
            parse_int("ADMIN_GROUP_ID")?.map(|id| if id > 0 { -id } else { id });

        let gemini = GeminiConfig {
            api_key: env::var("GEMINI_API_KEY").ok().filter(|v| !v.is_empty()),
            model: env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-1.5-flash".to_string()),
            api_base: env::var("GEMINI_API_BASE")
                .ok()
                .filter(|v| !v.is_empty())
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string()),
        };

        let moderation = ModerationConfig {
            call_timeout: Duration::from_millis(parse_or("MODERATION_CALL_TIMEOUT_MS", 30_000)?),
            max_retries: parse_or("MODERATION_MAX_RETRIES", 2)?,
            retry_backoff: Duration::from_millis(parse_or("MODERATION_RETRY_BACKOFF_MS", 500)?),
            worker_concurrency: parse_or::<usize>("MODERATION_WORKER_CONCURRENCY", 4)?.max(1),
        };

        let directories = DirectoryConfig {
            logs_dir: env::var("LOGS_DIR").unwrap_or_else(|_| "logs".to_string()),
            data_dir: env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()),
            db_filename: env::var("DB_FILENAME").unwrap_or_else(|_| "transcripto.db".to_string()),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        };

        let timezone = env::var("BOT_TIMEZONE").unwrap_or_else(|_| "UTC".to_string());

        let scheduler = SchedulerConfig {
            sweep_crons: match env::var("MODERATION_SWEEP_CRONS") {
                Ok(value) => split_crons(&value).ok_or(ConfigError::Invalid {
                    key: "MODERATION_SWEEP_CRONS",
                    value,
                })?,
                Err(_) => vec![DEFAULT_SWEEP_CRON.to_string()],
            },
            sweep_batch: parse_or("MODERATION_SWEEP_BATCH", 25)?,
        };

        Ok(Self {
            telegram_bot_token,
            admin_user_id,
            admin_group_id,
            gemini,
            moderation,
            directories,
            logging,
            timezone,
            scheduler,
        })
    }
}

fn parse_int(key: &'static str) -> Result<Option<i64>, ConfigError> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
        _ => Ok(None),
    }
}

/// Unset keys fall back to `default`; set but unparsable keys are an error.
fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { key, value }),
        _ => Ok(default),
    }
}

/// `None` when the list holds no schedule at all.
fn split_crons(value: &str) -> Option<Vec<String>> {
    let specs: Vec<String> = value
        .split(';')
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect();
    (!specs.is_empty()).then_some(specs)
}
