//! Run orchestration: fetch, classify, then group and assign per category.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
    aggregate::{self, ClassificationStatistics},
    assign::{AssignmentExecutor, ExecutorConfig},
    classify::{CategoryClassifier, ClassifierConfig},
    domain::{AssignmentTask, ClassificationResult, OwnerId},
    ports::{ClassifierModel, FollowPlatform},
    progress::{stage, Progress},
    resolve::GroupResolver,
    retrieve::{FollowerRetriever, RetrieverConfig},
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct PipelineConfig {
    pub owner_id: OwnerId,
    /// Categories with fewer members are not turned into groups.
    pub min_group_size: usize,
    pub retriever: RetrieverConfig,
    pub executor: ExecutorConfig,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Retrieving,
    Classifying,
    Summarizing,
    Filtering,
    Assigning,
    Done,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct RunStatistics {
    pub total_entities: usize,
    pub analyzed: usize,
    pub unknown: usize,
    pub created_groups: usize,
    pub reused_groups: usize,
    /// Dropped before resolution: the unknown bucket or below `min_group_size`.
    pub filtered_categories: usize,
    /// Group could not be resolved; no member was moved.
    pub failed_categories: usize,
    pub assigned_entities: usize,
    pub failed_entities: usize,
    pub failed_batches: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunStatistics {
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.finished_at? - self.started_at?)
    }

    /// Percentage of fetched entities that received a known category.
    pub fn success_rate(&self) -> f64 {
        if self.total_entities == 0 {
            return 0.0;
        }
        self.analyzed.saturating_sub(self.unknown) as f64 / self.total_entities as f64 * 100.0
    }
}

/// Everything a caller needs to present a finished run.
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub dry_run: bool,
    pub stats: RunStatistics,
    pub classification: ClassificationStatistics,
    /// Human-readable per-category breakdown (sample members included).
    pub summary: String,
    pub tasks: Vec<AssignmentTask>,
}

pub struct Pipeline {
    cfg: PipelineConfig,
    retriever: FollowerRetriever,
    classifier: CategoryClassifier,
    resolver: GroupResolver,
    executor: AssignmentExecutor,
    progress: Progress,
    stage: Stage,
    stats: RunStatistics,
}

impl Pipeline {
    pub fn new(
        platform: Arc<dyn FollowPlatform>,
        model: Arc<dyn ClassifierModel>,
        cfg: PipelineConfig,
        classifier: ClassifierConfig,
        progress: Progress,
    ) -> Self {
        Self {
            retriever: FollowerRetriever::new(platform.clone(), cfg.retriever, progress.clone()),
            classifier: CategoryClassifier::new(model, classifier, progress.clone()),
            resolver: GroupResolver::new(platform.clone()),
            executor: AssignmentExecutor::new(platform, cfg.executor, progress.clone()),
            cfg,
            progress,
            stage: Stage::Idle,
            stats: RunStatistics::default(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Statistics of the current (or last) run; complete up to the point of failure.
    pub fn stats(&self) -> &RunStatistics {
        &self.stats
    }

    /// Execute one run. With `dry_run` no group is created and no member is moved.
    ///
    /// Retrieval and classification errors end the run before any mutation.
    /// A failure while resolving or filling a group only skips that category.
    pub async fn run(&mut self, dry_run: bool, cancel: &CancellationToken) -> Result<RunReport> {
        self.stats = RunStatistics {
            started_at: Some(Utc::now()),
            ..RunStatistics::default()
        };
        self.stage = Stage::Idle;

        let outcome = self.execute(dry_run, cancel).await;

        self.stats.finished_at = Some(Utc::now());
        self.stage = Stage::Done;
        match &outcome {
            Ok(_) => tracing::info!(
                dry_run,
                total = self.stats.total_entities,
                created = self.stats.created_groups,
                assigned = self.stats.assigned_entities,
                unknown = self.stats.unknown,
                "run finished"
            ),
            Err(e) => tracing::error!(error = %e, "run aborted"),
        }

        outcome.map(|mut report| {
            report.stats = self.stats.clone();
            report
        })
    }

    async fn execute(&mut self, dry_run: bool, cancel: &CancellationToken) -> Result<RunReport> {
        self.stage = Stage::Retrieving;
        let entities = self.retriever.fetch_all(self.cfg.owner_id, cancel).await?;
        self.stats.total_entities = entities.len();

        if entities.is_empty() {
            tracing::warn!("follow list is empty; nothing to do");
            return Ok(self.report(dry_run, &[], Vec::new()));
        }

        self.stage = Stage::Classifying;
        let results = self.classifier.classify(&entities, cancel).await?;
        self.stats.analyzed = results.len();
        self.stats.unknown = results.iter().filter(|r| r.category.is_unknown()).count();

        if dry_run {
            self.stage = Stage::Summarizing;
            tracing::info!("dry run; skipping group creation and assignment");
            return Ok(self.report(dry_run, &results, Vec::new()));
        }

        self.stage = Stage::Filtering;
        let buckets = aggregate::group_by_category(&results);
        let bucket_count = buckets.len();
        let groups = aggregate::filter_groups(buckets, self.cfg.min_group_size);
        let eligible = groups.len();
        self.stats.filtered_categories = bucket_count - eligible;

        if groups.is_empty() {
            tracing::warn!(min_group_size = self.cfg.min_group_size, "no category is large enough to group");
            return Ok(self.report(dry_run, &results, Vec::new()));
        }

        self.stage = Stage::Assigning;
        let mut cache = self.resolver.preload(cancel).await?;
        let mut tasks = Vec::with_capacity(eligible);

        for (idx, (category, members)) in groups.into_iter().enumerate() {
            let mut task =
                AssignmentTask::new(category, members.iter().map(|m| m.entity_id).collect());

            match self.resolver.ensure_group(category.label(), &mut cache, cancel).await {
                Ok(resolved) => {
                    task.group_id = Some(resolved.id);
                    task.created = resolved.created;
                    if resolved.created {
                        self.stats.created_groups += 1;
                    } else {
                        self.stats.reused_groups += 1;
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(category = %category, error = %e, "cannot resolve group; skipping category");
                    self.stats.failed_categories += 1;
                    self.progress.report(stage::RESOLVE, idx + 1, eligible);
                    tasks.push(task);
                    continue;
                }
            }
            self.progress.report(stage::RESOLVE, idx + 1, eligible);

            let outcome = self.executor.assign(&mut task, cancel).await;
            self.stats.assigned_entities += task.assigned_entities;
            self.stats.failed_entities += task.failed_entities;
            self.stats.failed_batches += task.failed_batches;
            match outcome {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(category = %category, error = %e, "assignment aborted; moving on");
                }
            }
            tasks.push(task);
        }

        Ok(self.report(dry_run, &results, tasks))
    }

    fn report(
        &self,
        dry_run: bool,
        results: &[ClassificationResult],
        tasks: Vec<AssignmentTask>,
    ) -> RunReport {
        RunReport {
            dry_run,
            stats: RunStatistics::default(),
            classification: aggregate::statistics(results),
            summary: aggregate::render_summary(&aggregate::group_by_category(results)),
            tasks,
        }
    }
}
