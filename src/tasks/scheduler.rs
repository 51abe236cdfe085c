use std::sync::Arc;

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::{
    db::blogs::BlogRepository,
    moderation::SettingsRegistry,
    tasks::queue::{ModerationQueue, Priority},
};

pub type SweepCallback = Arc<dyn Fn() + Send + Sync>;

pub async fn configure_sweep_jobs(
    cron_specs: &[String],
    callback: SweepCallback,
) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;
    for spec in cron_specs {
        let label = spec.clone();
        let cb = callback.clone();
        let job = Job::new_async(spec.as_str(), move |_id, _l| {
            let cb = cb.clone();
            let cron_label = label.clone();
            Box::pin(async move {
                tracing::debug!(target: "scheduler", cron = %cron_label, "sweep job triggered");
                cb();
            })
        })?;
        scheduler.add(job).await?;
        tracing::info!(target: "scheduler", cron = %spec, "sweep job registered");
    }
    scheduler.start().await?;
    Ok(scheduler)
}

/// Enqueues pending blogs that have not been auto-moderated yet.
pub async fn sweep_pending(
    blogs: &BlogRepository,
    settings: &SettingsRegistry,
    queue: &ModerationQueue,
    batch: u32,
) -> Result<usize> {
    if !settings.snapshot().enabled {
        return Ok(0);
    }

    let ids = blogs.unmoderated_pending_ids(batch).await?;
    let enqueued = ids
        .into_iter()
        .filter(|id| queue.push(Priority::Normal, *id))
        .count();
    if enqueued > 0 {
        tracing::info!(target: "scheduler", enqueued, "pending blogs queued for moderation");
    }
    Ok(enqueued)
}

pub fn build_sweep_callback(
    blogs: Arc<BlogRepository>,
    settings: Arc<SettingsRegistry>,
    queue: Arc<ModerationQueue>,
    batch: u32,
) -> SweepCallback {
    Arc::new(move || {
        let blogs = blogs.clone();
        let settings = settings.clone();
        let queue = queue.clone();
        tokio::spawn(async move {
            if let Err(err) = sweep_pending(&blogs, &settings, &queue, batch).await {
                tracing::error!(target: "scheduler", error = %err, "pending sweep failed");
            }
        });
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::{
            blogs::tests::{insert_blog, test_pool},
            settings::SqliteSettingsBackend,
        },
        domain::{BlogStatus, ContentCategories},
        moderation::{
            engine::tests::{fast_retry, FakeAnalyzer, FakeScorer},
            ModerationEngine, ModerationService, ModerationStore, ServiceError,
        },
    };

    #[tokio::test]
    async fn sweep_queues_each_unmoderated_blog_once() {
        let (_dir, pool) = test_pool().await;
        let blogs = BlogRepository::new(pool.clone());
        let settings = SettingsRegistry::load(Arc::new(SqliteSettingsBackend::new(pool.clone())))
            .await
            .unwrap();
        let queue = ModerationQueue::new();
        let first = insert_blog(&pool, "one", BlogStatus::Pending).await;
        let second = insert_blog(&pool, "two", BlogStatus::Pending).await;
        insert_blog(&pool, "three", BlogStatus::Rejected).await;

        assert_eq!(sweep_pending(&blogs, &settings, &queue, 10).await.unwrap(), 2);
        assert_eq!(sweep_pending(&blogs, &settings, &queue, 10).await.unwrap(), 0);
        assert_eq!(queue.drain_ordered(), vec![first, second]);
    }

    #[tokio::test]
    async fn sweep_is_idle_while_moderation_is_disabled() {
        let (_dir, pool) = test_pool().await;
        let blogs = BlogRepository::new(pool.clone());
        let settings = SettingsRegistry::load(Arc::new(SqliteSettingsBackend::new(pool.clone())))
            .await
            .unwrap();
        settings.update(|s| s.apply("enabled", "off")).await.unwrap();
        let queue = ModerationQueue::new();
        insert_blog(&pool, "one", BlogStatus::Pending).await;

        assert_eq!(sweep_pending(&blogs, &settings, &queue, 10).await.unwrap(), 0);
        assert_eq!(queue.snapshot().normal_priority, 0);
    }

    #[tokio::test]
    async fn unprocessable_blogs_do_not_starve_newer_submissions() {
        let (_dir, pool) = test_pool().await;
        let blogs = Arc::new(BlogRepository::new(pool.clone()));
        let settings = Arc::new(
            SettingsRegistry::load(Arc::new(SqliteSettingsBackend::new(pool.clone())))
                .await
                .unwrap(),
        );
        let engine = Arc::new(ModerationEngine::new(
            FakeAnalyzer::returning(ContentCategories::default()),
            FakeScorer::returning(0.1),
            fast_retry(),
        ));
        let service = ModerationService::new(engine, blogs.clone(), settings.clone(), None);
        let queue = ModerationQueue::new();

        let blank = insert_blog(&pool, "   ", BlogStatus::Pending).await;
        let empty = insert_blog(&pool, "", BlogStatus::Pending).await;
        let real = insert_blog(&pool, "a real post", BlogStatus::Pending).await;

        let mut processed = Vec::new();
        for _ in 0..3 {
            sweep_pending(&blogs, &settings, &queue, 2).await.unwrap();
            for id in queue.drain_ordered() {
                let result = service.auto_moderate(id).await;
                if id == blank || id == empty {
                    assert!(matches!(result, Err(ServiceError::EmptyContent(_))));
                } else {
                    result.unwrap();
                }
                processed.push(id);
                queue.complete(id);
            }
        }

        assert_eq!(processed, vec![blank, empty, real]);
        let post = blogs.fetch_blog(real).await.unwrap().unwrap();
        assert!(post.auto_moderated_at.is_some());
        assert_eq!(sweep_pending(&blogs, &settings, &queue, 2).await.unwrap(), 0);
    }
}
