use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::{
    config::PLATFORM_MAX_ASSIGN_BATCH,
    domain::{AssignmentTask, GroupId},
    errors::Error,
    ports::FollowPlatform,
    progress::{stage, Progress},
    throttle::{cancellable, pause},
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ExecutorConfig {
    /// Clamped to the platform ceiling.
    pub max_batch: usize,
    pub batch_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_batch: PLATFORM_MAX_ASSIGN_BATCH,
            batch_delay: Duration::from_secs(1),
        }
    }
}

/// Moves a category's members into its group in bounded batches.
pub struct AssignmentExecutor {
    platform: Arc<dyn FollowPlatform>,
    cfg: ExecutorConfig,
    progress: Progress,
}

impl AssignmentExecutor {
    pub fn new(platform: Arc<dyn FollowPlatform>, cfg: ExecutorConfig, progress: Progress) -> Self {
        Self {
            platform,
            cfg,
            progress,
        }
    }

    fn batch_size(&self) -> usize {
        self.cfg.max_batch.clamp(1, PLATFORM_MAX_ASSIGN_BATCH)
    }

    /// Attempt every batch of `task`, recording per-batch outcomes on it.
    ///
    /// A failed batch is logged and skipped. Only cancellation and
    /// credential errors stop the loop early.
    pub async fn assign(&self, task: &mut AssignmentTask, cancel: &CancellationToken) -> Result<()> {
        let group: GroupId = task.group_id.ok_or_else(|| {
            Error::External(format!("category '{}' has no group id", task.category))
        })?;

        let size = self.batch_size();
        let batches = task.members.len().div_ceil(size);
        let members = task.members.clone();

        for (idx, chunk) in members.chunks(size).enumerate() {
            match cancellable(cancel, self.platform.assign_to_group(chunk, group)).await {
                Ok(()) => {
                    task.succeeded_batches += 1;
                    task.assigned_entities += chunk.len();
                    tracing::info!(category = %task.category, group = %group, batch = idx + 1, of = batches, size = chunk.len(), "assigned batch");
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    task.failed_batches += 1;
                    task.failed_entities += chunk.len();
                    tracing::error!(category = %task.category, group = %group, batch = idx + 1, of = batches, error = %e, "batch assignment failed; continuing");
                }
            }

            self.progress.report(stage::ASSIGN, idx + 1, batches);

            if idx + 1 < batches {
                pause(cancel, self.cfg.batch_delay).await?;
            }
        }

        task.assigned = true;
        tracing::info!(
            category = %task.category,
            assigned = task.assigned_entities,
            failed = task.failed_entities,
            "category done"
        );
        Ok(())
    }
}
