use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    db::PersistenceError,
    domain::{Blog, BlogStatus, Candidate, ModerationDecision, StatusCounts},
};

use super::{
    engine::ModerationEngine,
    errors::ServiceError,
    settings::{ModerationSettings, SettingsRegistry},
};

pub const AUTO_REJECTION_TYPE: &str = "auto_rejection";
pub const DEFAULT_REJECTION_NOTE: &str = "Rejected by moderator";
/// Failed passes after which the sweep stops picking a blog up. Operators can
/// still force a pass with a re-check.
pub const MAX_AUTO_ATTEMPTS: u32 = 5;

/// A moderator notification row to be written alongside a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification<'a> {
    pub kind: &'a str,
    pub message: &'a str,
}

/// Persistence the moderation flow depends on.
#[async_trait]
pub trait ModerationStore: Send + Sync {
    async fn fetch_blog(&self, id: i64) -> Result<Option<Blog>, PersistenceError>;

    /// Moves a pending blog to `status`. Fails with
    /// `PersistenceError::InvalidTransition` if the blog is no longer pending.
    async fn apply_status(
        &self,
        id: i64,
        status: BlogStatus,
        notes: Option<&str>,
    ) -> Result<(), PersistenceError>;

    async fn mark_auto_moderated(&self, id: i64) -> Result<(), PersistenceError>;

    /// Rejects a pending blog, writes `notification` when given and marks the
    /// pass as done. Either all of it is stored or none of it.
    async fn record_auto_rejection(
        &self,
        id: i64,
        notes: &str,
        notification: Option<Notification<'_>>,
    ) -> Result<(), PersistenceError>;

    /// Counts a failed pass. `give_up` takes the blog out of future sweeps.
    async fn record_failed_attempt(&self, id: i64, give_up: bool)
        -> Result<(), PersistenceError>;

    async fn list_pending(&self, limit: u32) -> Result<Vec<Blog>, PersistenceError>;

    async fn status_counts(&self) -> Result<StatusCounts, PersistenceError>;
}

/// Out-of-band delivery of moderator notifications (chat, e-mail, ...).
/// Delivery is best effort; the stored notification is authoritative.
#[async_trait]
pub trait ModeratorAlerts: Send + Sync {
    async fn alert(&self, blog: &Blog, message: &str);
}

#[derive(Debug, Clone, PartialEq)]
pub enum AutoModerationOutcome {
    Decided(ModerationDecision),
    /// Moderation is switched off; the blog is left for a later pass.
    Disabled,
    /// The blog was already approved or rejected.
    AlreadyDecided(BlogStatus),
}

pub struct ModerationService {
    engine: Arc<ModerationEngine>,
    store: Arc<dyn ModerationStore>,
    settings: Arc<SettingsRegistry>,
    alerts: Option<Arc<dyn ModeratorAlerts>>,
}

impl ModerationService {
    pub fn new(
        engine: Arc<ModerationEngine>,
        store: Arc<dyn ModerationStore>,
        settings: Arc<SettingsRegistry>,
        alerts: Option<Arc<dyn ModeratorAlerts>>,
    ) -> Self {
        Self {
            engine,
            store,
            settings,
            alerts,
        }
    }

    pub fn settings(&self) -> ModerationSettings {
        self.settings.snapshot()
    }

    pub async fn update_setting(
        &self,
        key: &str,
        value: &str,
    ) -> Result<ModerationSettings, ServiceError> {
        self.settings.update(|s| s.apply(key, value)).await
    }

    /// One automated pass over a submitted blog. Any failure leaves the blog
    /// pending. Transient failures are counted and retried by later sweeps up
    /// to `MAX_AUTO_ATTEMPTS`; permanent ones drop the blog from the sweep.
    pub async fn auto_moderate(&self, blog_id: i64) -> Result<AutoModerationOutcome, ServiceError> {
        let blog = self.load(blog_id).await?;
        if blog.status != BlogStatus::Pending {
            return Ok(AutoModerationOutcome::AlreadyDecided(blog.status));
        }
        if let Err(err) = ensure_content(&blog) {
            self.record_failure(blog.id, true).await;
            return Err(err);
        }

        let settings = self.settings.snapshot();
        if !settings.enabled {
            return Ok(AutoModerationOutcome::Disabled);
        }

        let candidate = Candidate {
            blog_id: Some(blog.id),
            content: &blog.content,
        };
        let decision = match self.engine.evaluate(&candidate, &settings).await {
            Ok(decision) => decision,
            Err(err) => {
                let give_up = !err.is_transient();
                tracing::error!(
                    target: "moderation",
                    blog_id,
                    give_up,
                    error = %err,
                    "auto-moderation failed; blog stays pending"
                );
                self.record_failure(blog.id, give_up).await;
                return Err(err.into());
            }
        };

        if decision.is_rejected() {
            let notes = decision.notes();
            let message = format!("Blog automatically rejected. Reasons: {notes}");
            let notification = settings.notify_moderators.then_some(Notification {
                kind: AUTO_REJECTION_TYPE,
                message: &message,
            });
            self.store
                .record_auto_rejection(blog.id, &notes, notification)
                .await?;
            tracing::info!(target: "moderation", blog_id, reasons = %notes, "blog auto-rejected");

            if notification.is_some() {
                if let Some(alerts) = &self.alerts {
                    alerts.alert(&blog, &message).await;
                }
            }
        } else {
            self.store.mark_auto_moderated(blog.id).await?;
        }

        Ok(AutoModerationOutcome::Decided(decision))
    }

    /// Operator approval. A fresh engine pass runs first when moderation is
    /// enabled, and any reason it produces blocks the approval.
    pub async fn approve(&self, blog_id: i64) -> Result<Blog, ServiceError> {
        let blog = self.load(blog_id).await?;
        if blog.status != BlogStatus::Pending {
            return Err(PersistenceError::InvalidTransition {
                id: blog_id,
                current: blog.status,
            }
            .into());
        }

        let settings = self.settings.snapshot();
        if settings.enabled {
            ensure_content(&blog)?;
            let candidate = Candidate {
                blog_id: Some(blog.id),
                content: &blog.content,
            };
            let decision = self.engine.evaluate(&candidate, &settings).await?;
            if !decision.reasons.is_empty() {
                tracing::warn!(
                    target: "moderation",
                    blog_id,
                    reasons = %decision.notes(),
                    "approval blocked by automated checks"
                );
                return Err(ServiceError::ApprovalBlocked {
                    blog_id,
                    reasons: decision.reasons,
                });
            }
        }

        self.store
            .apply_status(blog.id, BlogStatus::Approved, None)
            .await?;
        tracing::info!(target: "moderation", blog_id, "blog approved");
        Ok(self.load(blog_id).await?)
    }

    pub async fn reject(&self, blog_id: i64, note: Option<&str>) -> Result<Blog, ServiceError> {
        let note = note
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_REJECTION_NOTE);
        self.store
            .apply_status(blog_id, BlogStatus::Rejected, Some(note))
            .await?;
        tracing::info!(target: "moderation", blog_id, note, "blog rejected by moderator");
        Ok(self.load(blog_id).await?)
    }

    pub async fn pending(&self, limit: u32) -> Result<Vec<Blog>, ServiceError> {
        Ok(self.store.list_pending(limit).await?)
    }

    pub async fn status_counts(&self) -> Result<StatusCounts, ServiceError> {
        Ok(self.store.status_counts().await?)
    }

    async fn load(&self, blog_id: i64) -> Result<Blog, PersistenceError> {
        self.store
            .fetch_blog(blog_id)
            .await?
            .ok_or(PersistenceError::NotFound(blog_id))
    }

    async fn record_failure(&self, blog_id: i64, give_up: bool) {
        if let Err(err) = self.store.record_failed_attempt(blog_id, give_up).await {
            tracing::warn!(
                target: "moderation",
                blog_id,
                error = %err,
                "failed to record auto-moderation attempt"
            );
        }
    }
}

fn ensure_content(blog: &Blog) -> Result<(), ServiceError> {
    if blog.content.trim().is_empty() {
        return Err(ServiceError::EmptyContent(blog.id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicBool, Ordering},
        time::Duration,
    };

    use chrono::Utc;
    use parking_lot::Mutex;

    use super::*;
    use crate::{
        db::blogs::{
            tests::{insert_blog, test_pool},
            BlogRepository,
        },
        domain::ContentCategories,
        moderation::{
            engine::{
                tests::{fast_retry, FakeAnalyzer, FakeScorer},
                REASON_PLAGIARISM, REASON_SPAM,
            },
            errors::{AnalysisError, ModerationError},
            settings::tests::MemorySettingsBackend,
        },
    };

    #[derive(Default)]
    struct MemoryStore {
        blogs: Mutex<HashMap<i64, Blog>>,
        notifications: Mutex<Vec<(i64, String, String)>>,
        /// blog id -> (failed passes, given up)
        attempts: Mutex<HashMap<i64, (u32, bool)>>,
        fail_notifications: AtomicBool,
    }

    impl MemoryStore {
        fn with_blog(id: i64, content: &str) -> Arc<Self> {
            let store = Self::default();
            let now = Utc::now();
            store.blogs.lock().insert(
                id,
                Blog {
                    id,
                    user_id: "user-1".into(),
                    title: "Episode 12".into(),
                    content: content.into(),
                    status: BlogStatus::Pending,
                    moderation_notes: None,
                    created_at: now,
                    updated_at: now,
                    auto_moderated_at: None,
                },
            );
            Arc::new(store)
        }

        fn blog(&self, id: i64) -> Blog {
            self.blogs.lock().get(&id).cloned().unwrap()
        }

        fn attempts(&self, id: i64) -> (u32, bool) {
            self.attempts.lock().get(&id).copied().unwrap_or_default()
        }
    }

    #[async_trait]
    impl ModerationStore for MemoryStore {
        async fn fetch_blog(&self, id: i64) -> Result<Option<Blog>, PersistenceError> {
            Ok(self.blogs.lock().get(&id).cloned())
        }

        async fn apply_status(
            &self,
            id: i64,
            status: BlogStatus,
            notes: Option<&str>,
        ) -> Result<(), PersistenceError> {
            let mut blogs = self.blogs.lock();
            let blog = blogs.get_mut(&id).ok_or(PersistenceError::NotFound(id))?;
            if !blog.status.can_transition_to(status) {
                return Err(PersistenceError::InvalidTransition {
                    id,
                    current: blog.status,
                });
            }
            blog.status = status;
            if let Some(notes) = notes {
                blog.moderation_notes = Some(notes.to_string());
            }
            Ok(())
        }

        async fn mark_auto_moderated(&self, id: i64) -> Result<(), PersistenceError> {
            if let Some(blog) = self.blogs.lock().get_mut(&id) {
                blog.auto_moderated_at = Some(Utc::now());
            }
            Ok(())
        }

        async fn record_auto_rejection(
            &self,
            id: i64,
            notes: &str,
            notification: Option<Notification<'_>>,
        ) -> Result<(), PersistenceError> {
            if notification.is_some() && self.fail_notifications.load(Ordering::SeqCst) {
                return Err(PersistenceError::Database(sqlx::Error::PoolTimedOut));
            }
            let mut blogs = self.blogs.lock();
            let blog = blogs.get_mut(&id).ok_or(PersistenceError::NotFound(id))?;
            if blog.status != BlogStatus::Pending {
                return Err(PersistenceError::InvalidTransition {
                    id,
                    current: blog.status,
                });
            }
            blog.status = BlogStatus::Rejected;
            blog.moderation_notes = Some(notes.to_string());
            blog.auto_moderated_at = Some(Utc::now());
            if let Some(notification) = notification {
                self.notifications.lock().push((
                    id,
                    notification.kind.to_string(),
                    notification.message.to_string(),
                ));
            }
            Ok(())
        }

        async fn record_failed_attempt(
            &self,
            id: i64,
            give_up: bool,
        ) -> Result<(), PersistenceError> {
            let mut attempts = self.attempts.lock();
            let entry = attempts.entry(id).or_default();
            entry.0 += 1;
            entry.1 |= give_up;
            Ok(())
        }

        async fn list_pending(&self, limit: u32) -> Result<Vec<Blog>, PersistenceError> {
            Ok(self
                .blogs
                .lock()
                .values()
                .filter(|b| b.status == BlogStatus::Pending)
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn status_counts(&self) -> Result<StatusCounts, PersistenceError> {
            let mut counts = StatusCounts::default();
            for blog in self.blogs.lock().values() {
                match blog.status {
                    BlogStatus::Pending => counts.pending += 1,
                    BlogStatus::Approved => counts.approved += 1,
                    BlogStatus::Rejected => counts.rejected += 1,
                }
            }
            Ok(counts)
        }
    }

    #[derive(Default)]
    struct RecordingAlerts {
        sent: Mutex<Vec<(i64, String)>>,
    }

    #[async_trait]
    impl ModeratorAlerts for RecordingAlerts {
        async fn alert(&self, blog: &Blog, message: &str) {
            self.sent.lock().push((blog.id, message.to_string()));
        }
    }

    async fn service(
        store: Arc<MemoryStore>,
        analyzer: Arc<FakeAnalyzer>,
        scorer: Arc<FakeScorer>,
        settings: ModerationSettings,
        alerts: Option<Arc<RecordingAlerts>>,
    ) -> ModerationService {
        let backend = Arc::new(MemorySettingsBackend::default());
        *backend.stored.lock() = Some(settings);
        let registry = Arc::new(SettingsRegistry::load(backend).await.unwrap());
        let engine = Arc::new(ModerationEngine::new(analyzer, scorer, fast_retry()));
        ModerationService::new(
            engine,
            store,
            registry,
            alerts.map(|a| a as Arc<dyn ModeratorAlerts>),
        )
    }

    fn spam() -> ContentCategories {
        ContentCategories {
            spam: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn rejection_is_persisted_and_moderators_notified() {
        let store = MemoryStore::with_blog(1, "Buy cheap followers now!!!");
        let alerts = Arc::new(RecordingAlerts::default());
        let service = service(
            store.clone(),
            FakeAnalyzer::returning(spam()),
            FakeScorer::returning(0.1),
            ModerationSettings::default(),
            Some(alerts.clone()),
        )
        .await;

        let outcome = service.auto_moderate(1).await.unwrap();
        let AutoModerationOutcome::Decided(decision) = outcome else {
            panic!("expected a decision");
        };
        assert!(decision.is_rejected());

        let blog = store.blog(1);
        assert_eq!(blog.status, BlogStatus::Rejected);
        assert_eq!(blog.moderation_notes.as_deref(), Some(REASON_SPAM));
        assert!(blog.auto_moderated_at.is_some());

        let notifications = store.notifications.lock();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].1, AUTO_REJECTION_TYPE);
        assert_eq!(
            notifications[0].2,
            "Blog automatically rejected. Reasons: Spam content detected"
        );
        assert_eq!(alerts.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn notification_is_skipped_when_disabled_in_settings() {
        let store = MemoryStore::with_blog(1, "copied text");
        let settings = ModerationSettings {
            notify_moderators: false,
            ..Default::default()
        };
        let service = service(
            store.clone(),
            FakeAnalyzer::returning(ContentCategories::default()),
            FakeScorer::returning(0.95),
            settings,
            None,
        )
        .await;

        service.auto_moderate(1).await.unwrap();
        assert_eq!(store.blog(1).moderation_notes.as_deref(), Some(REASON_PLAGIARISM));
        assert!(store.notifications.lock().is_empty());
    }

    #[tokio::test]
    async fn clean_content_stays_pending_but_is_marked() {
        let store = MemoryStore::with_blog(1, "An ordinary travel diary.");
        let service = service(
            store.clone(),
            FakeAnalyzer::returning(ContentCategories::default()),
            FakeScorer::returning(0.2),
            ModerationSettings::default(),
            None,
        )
        .await;

        let outcome = service.auto_moderate(1).await.unwrap();
        assert_eq!(outcome, AutoModerationOutcome::Decided(ModerationDecision::pending()));
        let blog = store.blog(1);
        assert_eq!(blog.status, BlogStatus::Pending);
        assert!(blog.auto_moderated_at.is_some());
    }

    #[tokio::test]
    async fn engine_failure_leaves_blog_untouched() {
        let store = MemoryStore::with_blog(1, "Some content");
        let service = service(
            store.clone(),
            FakeAnalyzer::failing(|| AnalysisError::Malformed("not json".into())),
            FakeScorer::returning(0.0),
            ModerationSettings::default(),
            None,
        )
        .await;

        let err = service.auto_moderate(1).await.unwrap_err();
        assert!(matches!(err, ServiceError::Moderation(ModerationError::Analysis(_))));
        let blog = store.blog(1);
        assert_eq!(blog.status, BlogStatus::Pending);
        assert!(blog.moderation_notes.is_none());
        assert!(blog.auto_moderated_at.is_none());
        assert!(store.notifications.lock().is_empty());
        assert_eq!(store.attempts(1), (1, true));
    }

    #[tokio::test]
    async fn transient_failure_is_counted_but_kept_for_later_sweeps() {
        let store = MemoryStore::with_blog(1, "Some content");
        let service = service(
            store.clone(),
            FakeAnalyzer::failing(|| AnalysisError::Timeout(Duration::from_millis(5))),
            FakeScorer::returning(0.0),
            ModerationSettings::default(),
            None,
        )
        .await;

        service.auto_moderate(1).await.unwrap_err();
        service.auto_moderate(1).await.unwrap_err();
        assert_eq!(store.attempts(1), (2, false));
        assert_eq!(store.blog(1).status, BlogStatus::Pending);
    }

    #[tokio::test]
    async fn failed_notification_write_keeps_blog_pending_and_silent() {
        let store = MemoryStore::with_blog(1, "Buy cheap followers now!!!");
        store.fail_notifications.store(true, Ordering::SeqCst);
        let alerts = Arc::new(RecordingAlerts::default());
        let service = service(
            store.clone(),
            FakeAnalyzer::returning(spam()),
            FakeScorer::returning(0.1),
            ModerationSettings::default(),
            Some(alerts.clone()),
        )
        .await;

        let err = service.auto_moderate(1).await.unwrap_err();
        assert!(matches!(err, ServiceError::Persistence(PersistenceError::Database(_))));
        let blog = store.blog(1);
        assert_eq!(blog.status, BlogStatus::Pending);
        assert!(blog.moderation_notes.is_none());
        assert!(blog.auto_moderated_at.is_none());
        assert!(store.notifications.lock().is_empty());
        assert!(alerts.sent.lock().is_empty());

        store.fail_notifications.store(false, Ordering::SeqCst);
        service.auto_moderate(1).await.unwrap();
        assert_eq!(store.blog(1).status, BlogStatus::Rejected);
        assert_eq!(store.notifications.lock().len(), 1);
        assert_eq!(alerts.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn disabled_moderation_makes_no_calls_and_no_changes() {
        let store = MemoryStore::with_blog(1, "Some content");
        let analyzer = FakeAnalyzer::returning(spam());
        let scorer = FakeScorer::returning(1.0);
        let settings = ModerationSettings {
            enabled: false,
            ..Default::default()
        };
        let service = service(store.clone(), analyzer.clone(), scorer.clone(), settings, None).await;

        assert_eq!(service.auto_moderate(1).await.unwrap(), AutoModerationOutcome::Disabled);
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 0);
        assert!(store.blog(1).auto_moderated_at.is_none());
    }

    #[tokio::test]
    async fn empty_content_is_refused_before_the_engine_runs() {
        let store = MemoryStore::with_blog(1, "   \n ");
        let analyzer = FakeAnalyzer::returning(ContentCategories::default());
        let service = service(
            store.clone(),
            analyzer.clone(),
            FakeScorer::returning(0.0),
            ModerationSettings::default(),
            None,
        )
        .await;

        let err = service.auto_moderate(1).await.unwrap_err();
        assert!(matches!(err, ServiceError::EmptyContent(1)));
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.attempts(1), (1, true));
    }

    #[tokio::test]
    async fn decided_blogs_are_not_moderated_again() {
        let store = MemoryStore::with_blog(1, "Some content");
        store
            .apply_status(1, BlogStatus::Approved, None)
            .await
            .unwrap();
        let analyzer = FakeAnalyzer::returning(spam());
        let service = service(
            store.clone(),
            analyzer.clone(),
            FakeScorer::returning(0.0),
            ModerationSettings::default(),
            None,
        )
        .await;

        let outcome = service.auto_moderate(1).await.unwrap();
        assert_eq!(outcome, AutoModerationOutcome::AlreadyDecided(BlogStatus::Approved));
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn approval_is_blocked_when_fresh_checks_find_problems() {
        let store = MemoryStore::with_blog(1, "Some content");
        let service = service(
            store.clone(),
            FakeAnalyzer::returning(spam()),
            FakeScorer::returning(0.0),
            ModerationSettings::default(),
            None,
        )
        .await;

        let err = service.approve(1).await.unwrap_err();
        match err {
            ServiceError::ApprovalBlocked { blog_id, reasons } => {
                assert_eq!(blog_id, 1);
                assert_eq!(reasons, vec![REASON_SPAM.to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.blog(1).status, BlogStatus::Pending);
    }

    #[tokio::test]
    async fn approval_fails_closed_on_engine_error() {
        let store = MemoryStore::with_blog(1, "Some content");
        let service = service(
            store.clone(),
            FakeAnalyzer::returning(ContentCategories::default()),
            FakeScorer::failing(|| crate::moderation::errors::SimilarityError::NonNumeric("n/a".into())),
            ModerationSettings::default(),
            None,
        )
        .await;

        assert!(service.approve(1).await.is_err());
        assert_eq!(store.blog(1).status, BlogStatus::Pending);
    }

    #[tokio::test]
    async fn clean_content_can_be_approved_once() {
        let store = MemoryStore::with_blog(1, "Some content");
        let service = service(
            store.clone(),
            FakeAnalyzer::returning(ContentCategories::default()),
            FakeScorer::returning(0.3),
            ModerationSettings::default(),
            None,
        )
        .await;

        let blog = service.approve(1).await.unwrap();
        assert_eq!(blog.status, BlogStatus::Approved);

        let err = service.reject(1, Some("changed my mind")).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Persistence(PersistenceError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn manual_rejection_uses_default_note() {
        let store = MemoryStore::with_blog(1, "Some content");
        let analyzer = FakeAnalyzer::returning(ContentCategories::default());
        let service = service(
            store.clone(),
            analyzer.clone(),
            FakeScorer::returning(0.0),
            ModerationSettings::default(),
            None,
        )
        .await;

        let blog = service.reject(1, Some("  ")).await.unwrap();
        assert_eq!(blog.status, BlogStatus::Rejected);
        assert_eq!(blog.moderation_notes.as_deref(), Some(DEFAULT_REJECTION_NOTE));
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_blog_is_reported() {
        let store = MemoryStore::with_blog(1, "Some content");
        let service = service(
            store,
            FakeAnalyzer::returning(ContentCategories::default()),
            FakeScorer::returning(0.0),
            ModerationSettings::default(),
            None,
        )
        .await;

        let err = service.auto_moderate(42).await.unwrap_err();
        assert!(matches!(err, ServiceError::Persistence(PersistenceError::NotFound(42))));
    }

    async fn sqlite_service(
        store: Arc<BlogRepository>,
        analyzer: Arc<FakeAnalyzer>,
        settings: ModerationSettings,
    ) -> ModerationService {
        let backend = Arc::new(MemorySettingsBackend::default());
        *backend.stored.lock() = Some(settings);
        let registry = Arc::new(SettingsRegistry::load(backend).await.unwrap());
        let engine = Arc::new(ModerationEngine::new(
            analyzer,
            FakeScorer::returning(0.0),
            fast_retry(),
        ));
        ModerationService::new(engine, store, registry, None)
    }

    #[tokio::test]
    async fn operator_approval_racing_auto_rejection_decides_once() {
        let (_dir, pool) = test_pool().await;
        let repo = Arc::new(BlogRepository::new(pool.clone()));
        let id = insert_blog(&pool, "Buy cheap followers now!!!", BlogStatus::Pending).await;

        let worker = sqlite_service(
            repo.clone(),
            FakeAnalyzer::returning(spam()),
            ModerationSettings::default(),
        )
        .await;
        let operator = sqlite_service(
            repo.clone(),
            FakeAnalyzer::returning(ContentCategories::default()),
            ModerationSettings {
                enabled: false,
                ..Default::default()
            },
        )
        .await;

        let (auto, approval) = tokio::join!(worker.auto_moderate(id), operator.approve(id));
        let blog = repo.fetch_blog(id).await.unwrap().unwrap();
        let (notifications,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM moderator_notifications WHERE blog_id = ?1")
                .bind(id)
                .fetch_one(&pool)
                .await
                .unwrap();

        match approval {
            Ok(approved) => {
                assert_eq!(approved.status, BlogStatus::Approved);
                assert_eq!(blog.status, BlogStatus::Approved);
                assert!(matches!(
                    auto,
                    Ok(AutoModerationOutcome::AlreadyDecided(BlogStatus::Approved))
                        | Err(ServiceError::Persistence(
                            PersistenceError::InvalidTransition { .. }
                        ))
                ));
                assert_eq!(notifications, 0);
            }
            Err(err) => {
                assert!(matches!(
                    err,
                    ServiceError::Persistence(PersistenceError::InvalidTransition {
                        current: BlogStatus::Rejected,
                        ..
                    })
                ));
                let decision = match auto {
                    Ok(AutoModerationOutcome::Decided(decision)) => decision,
                    other => panic!("auto-moderation should have decided: {other:?}"),
                };
                assert!(decision.is_rejected());
                assert_eq!(blog.status, BlogStatus::Rejected);
                assert_eq!(notifications, 1);
            }
        }
    }
}
