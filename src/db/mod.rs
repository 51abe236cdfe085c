use std::{path::Path, str::FromStr, time::Duration};

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use thiserror::Error;

use crate::domain::BlogStatus;

pub mod blogs;
pub mod settings;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("blog {0} not found")]
    NotFound(i64),
    #[error("blog {id} is already {current}; only pending blogs can be decided")]
    InvalidTransition { id: i64, current: BlogStatus },
}

const SCHEMA: [&str; 5] = [
    r#"
    CREATE TABLE IF NOT EXISTS blogs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        title TEXT NOT NULL,
        content TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending'
            CHECK (status IN ('pending', 'approved', 'rejected')),
        moderation_notes TEXT,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        auto_moderated_at DATETIME,
        auto_moderation_attempts INTEGER NOT NULL DEFAULT 0,
        last_attempt_at DATETIME
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS idx_blogs_status_created ON blogs (status, created_at)"#,
    r#"
    CREATE TABLE IF NOT EXISTS moderator_notifications (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        blog_id INTEGER NOT NULL REFERENCES blogs (id),
        type TEXT NOT NULL,
        message TEXT NOT NULL,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS idx_notifications_blog ON moderator_notifications (blog_id)"#,
    r#"
    CREATE TABLE IF NOT EXISTS moderation_settings (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        enabled INTEGER NOT NULL,
        max_plagiarism_score REAL NOT NULL,
        auto_reject_spam INTEGER NOT NULL,
        auto_reject_hate INTEGER NOT NULL,
        auto_reject_inappropriate INTEGER NOT NULL,
        auto_reject_violence INTEGER NOT NULL,
        notify_moderators INTEGER NOT NULL,
        updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )
    "#,
];

pub async fn init_pool(db_path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5))
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    for statement in SCHEMA {
        sqlx::query(statement).execute(&pool).await?;
    }
    tracing::info!(target: "db", path = %db_path.display(), "database ready");

    Ok(pool)
}
