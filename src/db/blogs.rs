use async_trait::async_trait;
use chrono::Utc;
use sqlx::{
    sqlite::{SqlitePool, SqliteRow},
    FromRow, Row,
};

use crate::{
    ai::CorpusSource,
    domain::{Blog, BlogStatus, StatusCounts},
    moderation::{ModerationStore, Notification, MAX_AUTO_ATTEMPTS},
};

use super::PersistenceError;

/// Upper bound on how many existing posts one similarity check compares against.
pub const MAX_CORPUS_ENTRIES: u32 = 200;

const BLOG_COLUMNS: &str = "id, user_id, title, content, status, moderation_notes, \
                            created_at, updated_at, auto_moderated_at";

#[derive(Clone)]
pub struct BlogRepository {
    pool: SqlitePool,
}

impl BlogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Pending blogs that have not had a successful auto-moderation pass and
    /// still have attempts left. Blogs with fewer failed passes come first,
    /// then oldest first.
    pub async fn unmoderated_pending_ids(&self, limit: u32) -> Result<Vec<i64>, PersistenceError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"SELECT id FROM blogs
               WHERE status = 'pending'
                 AND auto_moderated_at IS NULL
                 AND auto_moderation_attempts < ?1
               ORDER BY auto_moderation_attempts ASC, created_at ASC, id ASC
               LIMIT ?2"#,
        )
        .bind(MAX_AUTO_ATTEMPTS)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// The error for a status change that matched no pending row.
    async fn not_pending(&self, id: i64) -> PersistenceError {
        match self.fetch_blog(id).await {
            Ok(Some(blog)) => PersistenceError::InvalidTransition {
                id,
                current: blog.status,
            },
            Ok(None) => PersistenceError::NotFound(id),
            Err(err) => err,
        }
    }
}

#[async_trait]
impl ModerationStore for BlogRepository {
    async fn fetch_blog(&self, id: i64) -> Result<Option<Blog>, PersistenceError> {
        let blog = sqlx::query_as::<_, Blog>(&format!(
            "SELECT {BLOG_COLUMNS} FROM blogs WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(blog)
    }

    async fn apply_status(
        &self,
        id: i64,
        status: BlogStatus,
        notes: Option<&str>,
    ) -> Result<(), PersistenceError> {
        if !BlogStatus::Pending.can_transition_to(status) {
            return Err(PersistenceError::InvalidTransition {
                id,
                current: BlogStatus::Pending,
            });
        }

        let affected = sqlx::query(
            r#"UPDATE blogs
               SET status = ?1,
                   moderation_notes = COALESCE(?2, moderation_notes),
                   updated_at = ?3
               WHERE id = ?4 AND status = 'pending'"#,
        )
        .bind(status.as_str())
        .bind(notes)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(self.not_pending(id).await);
        }
        Ok(())
    }

    async fn mark_auto_moderated(&self, id: i64) -> Result<(), PersistenceError> {
        sqlx::query(r#"UPDATE blogs SET auto_moderated_at = ?1 WHERE id = ?2"#)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_auto_rejection(
        &self,
        id: i64,
        notes: &str,
        notification: Option<Notification<'_>>,
    ) -> Result<(), PersistenceError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let affected = sqlx::query(
            r#"UPDATE blogs
               SET status = 'rejected',
                   moderation_notes = ?1,
                   updated_at = ?2,
                   auto_moderated_at = ?2
               WHERE id = ?3 AND status = 'pending'"#,
        )
        .bind(notes)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if affected == 0 {
            tx.rollback().await?;
            return Err(self.not_pending(id).await);
        }

        if let Some(notification) = notification {
            sqlx::query(
                r#"INSERT INTO moderator_notifications (blog_id, type, message)
                   VALUES (?1, ?2, ?3)"#,
            )
            .bind(id)
            .bind(notification.kind)
            .bind(notification.message)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn record_failed_attempt(
        &self,
        id: i64,
        give_up: bool,
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"UPDATE blogs
               SET auto_moderation_attempts = CASE
                       WHEN ?1 THEN MAX(auto_moderation_attempts + 1, ?2)
                       ELSE auto_moderation_attempts + 1
                   END,
                   last_attempt_at = ?3
               WHERE id = ?4 AND status = 'pending'"#,
        )
        .bind(give_up)
        .bind(MAX_AUTO_ATTEMPTS)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_pending(&self, limit: u32) -> Result<Vec<Blog>, PersistenceError> {
        let blogs = sqlx::query_as::<_, Blog>(&format!(
            "SELECT {BLOG_COLUMNS} FROM blogs WHERE status = 'pending' \
             ORDER BY created_at DESC, id DESC LIMIT ?1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(blogs)
    }

    async fn status_counts(&self) -> Result<StatusCounts, PersistenceError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as(r#"SELECT status, COUNT(*) FROM blogs GROUP BY status"#)
                .fetch_all(&self.pool)
                .await?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            match status.parse::<BlogStatus>() {
                Ok(BlogStatus::Pending) => counts.pending = count,
                Ok(BlogStatus::Approved) => counts.approved = count,
                Ok(BlogStatus::Rejected) => counts.rejected = count,
                Err(err) => tracing::warn!(target: "db", error = %err, "skipping unknown status"),
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl CorpusSource for BlogRepository {
    async fn corpus(&self, exclude: Option<i64>) -> Result<Vec<String>, PersistenceError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"SELECT content FROM blogs
               WHERE status != 'rejected' AND (?1 IS NULL OR id != ?1)
               ORDER BY created_at DESC, id DESC
               LIMIT ?2"#,
        )
        .bind(exclude)
        .bind(MAX_CORPUS_ENTRIES)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(content,)| content).collect())
    }
}

impl<'r> FromRow<'r, SqliteRow> for Blog {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        let status = status
            .parse::<BlogStatus>()
            .map_err(|err| sqlx::Error::Decode(err.into()))?;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            title: row.try_get("title")?,
            content: row.try_get("content")?,
            status,
            moderation_notes: row.try_get("moderation_notes")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            auto_moderated_at: row.try_get("auto_moderated_at")?,
        })
    }
}
