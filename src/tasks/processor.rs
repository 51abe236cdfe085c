use std::{sync::Arc, time::Duration};

use anyhow::Result;
use futures::{stream, StreamExt};
use tokio::{task::JoinHandle, time::sleep};

use crate::{
    infrastructure::shutdown::ShutdownListener,
    moderation::{AutoModerationOutcome, ModerationService},
    tasks::queue::ModerationQueue,
};

pub struct ModerationProcessor {
    queue: Arc<ModerationQueue>,
    service: Arc<ModerationService>,
    concurrency: usize,
}

impl ModerationProcessor {
    pub fn new(
        queue: Arc<ModerationQueue>,
        service: Arc<ModerationService>,
        concurrency: usize,
    ) -> Self {
        Self {
            queue,
            service,
            concurrency: concurrency.max(1),
        }
    }

    pub fn spawn(self: Arc<Self>, mut shutdown: ShutdownListener) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(err) = self.run_loop(&mut shutdown).await {
                tracing::error!(target: "processor", error = %err, "moderation processor crashed");
            }
        })
    }

    async fn run_loop(&self, shutdown: &mut ShutdownListener) -> Result<()> {
        loop {
            if shutdown.is_triggered() {
                break;
            }

            let batch = self.queue.drain_ordered();
            if batch.is_empty() {
                tokio::select! {
                    _ = sleep(Duration::from_millis(500)) => {}
                    _ = shutdown.notified() => break,
                }
                continue;
            }

            tracing::info!(target: "processor", total = batch.len(), "processing batch");
            let ids = batch.clone();
            tokio::select! {
                _ = self.handle_batch(batch) => {}
                _ = shutdown.notified() => {
                    tracing::info!(
                        target: "processor",
                        "shutdown requested mid-batch; unfinished blogs stay pending"
                    );
                    for id in ids {
                        self.queue.complete(id);
                    }
                    break;
                }
            }
        }
        tracing::info!(target: "processor", "moderation processor stopped");
        Ok(())
    }

    async fn handle_batch(&self, batch: Vec<i64>) {
        stream::iter(batch)
            .for_each_concurrent(self.concurrency, |blog_id| async move {
                self.process(blog_id).await;
                self.queue.complete(blog_id);
            })
            .await;
    }

    async fn process(&self, blog_id: i64) {
        match self.service.auto_moderate(blog_id).await {
            Ok(AutoModerationOutcome::Decided(decision)) => {
                tracing::info!(
                    target: "processor",
                    blog_id,
                    status = %decision.status,
                    "auto-moderation pass finished"
                );
            }
            Ok(AutoModerationOutcome::Disabled) => {
                tracing::debug!(target: "processor", blog_id, "auto-moderation disabled; skipped");
            }
            Ok(AutoModerationOutcome::AlreadyDecided(status)) => {
                tracing::debug!(target: "processor", blog_id, %status, "blog already decided");
            }
            Err(err) => {
                tracing::error!(
                    target: "processor",
                    blog_id,
                    error = %err,
                    "auto-moderation failed; will retry on a later sweep"
                );
            }
        }
    }
}
