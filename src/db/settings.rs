use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePool;

use crate::moderation::{ModerationSettings, SettingsBackend};

use super::PersistenceError;

type SettingsRow = (bool, f64, bool, bool, bool, bool, bool);

/// Single-row settings table; every save replaces the row.
pub struct SqliteSettingsBackend {
    pool: SqlitePool,
}

impl SqliteSettingsBackend {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsBackend for SqliteSettingsBackend {
    async fn load(&self) -> Result<Option<ModerationSettings>, PersistenceError> {
        let row: Option<SettingsRow> = sqlx::query_as(
            r#"SELECT enabled, max_plagiarism_score, auto_reject_spam, auto_reject_hate,
                      auto_reject_inappropriate, auto_reject_violence, notify_moderators
               FROM moderation_settings WHERE id = 1"#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(
                enabled,
                max_plagiarism_score,
                auto_reject_spam,
                auto_reject_hate,
                auto_reject_inappropriate,
                auto_reject_violence,
                notify_moderators,
            )| ModerationSettings {
                enabled,
                max_plagiarism_score,
                auto_reject_spam,
                auto_reject_hate,
                auto_reject_inappropriate,
                auto_reject_violence,
                notify_moderators,
            },
        ))
    }

    async fn save(&self, settings: &ModerationSettings) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"INSERT OR REPLACE INTO moderation_settings
                (id, enabled, max_plagiarism_score, auto_reject_spam, auto_reject_hate,
                 auto_reject_inappropriate, auto_reject_violence, notify_moderators, updated_at)
               VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
        )
        .bind(settings.enabled)
        .bind(settings.max_plagiarism_score)
        .bind(settings.auto_reject_spam)
        .bind(settings.auto_reject_hate)
        .bind(settings.auto_reject_inappropriate)
        .bind(settings.auto_reject_violence)
        .bind(settings.notify_moderators)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
