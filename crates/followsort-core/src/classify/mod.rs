//! Batched, rate-limited classification of followed entities.

pub mod prompt;
pub mod response;

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{Category, ClassificationResult, FollowedEntity},
    errors::Error,
    ports::ClassifierModel,
    progress::{stage, Progress},
    throttle::{cancellable, pause, RetryPolicy, TokenBucket},
    Result,
};

use response::Verdict;

pub const REASON_NO_RESULT: &str = "no result returned";
pub const REASON_MISSING_NAME: &str = "missing display name";

#[derive(Clone, Copy, Debug)]
pub struct ClassifierConfig {
    pub batch_size: usize,
    /// Pause between batches, on top of the rate limiter.
    pub batch_delay: Duration,
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
    /// Per-batch retry budget for transient and malformed-response failures.
    pub retry: RetryPolicy,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_delay: Duration::from_secs(2),
            rate_limit_requests: 10,
            rate_limit_window: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

pub struct CategoryClassifier {
    model: Arc<dyn ClassifierModel>,
    cfg: ClassifierConfig,
    limiter: Mutex<TokenBucket>,
    progress: Progress,
}

impl CategoryClassifier {
    pub fn new(model: Arc<dyn ClassifierModel>, cfg: ClassifierConfig, progress: Progress) -> Self {
        Self {
            model,
            limiter: Mutex::new(TokenBucket::new(
                cfg.rate_limit_requests,
                cfg.rate_limit_window,
            )),
            cfg,
            progress,
        }
    }

    /// Classify every entity; the output has one result per input, in input order.
    ///
    /// Batch failures downgrade the batch to `Unknown`. Only configuration
    /// errors and cancellation are returned as errors.
    pub async fn classify(
        &self,
        entities: &[FollowedEntity],
        cancel: &CancellationToken,
    ) -> Result<Vec<ClassificationResult>> {
        let total = entities.len();
        let mut results: Vec<ClassificationResult> = entities
            .iter()
            .map(|e| ClassificationResult::unknown(e, REASON_NO_RESULT))
            .collect();

        let mut named: Vec<usize> = Vec::with_capacity(total);
        for (idx, entity) in entities.iter().enumerate() {
            if entity.name.trim().is_empty() {
                tracing::warn!(entity = %entity.id, "entity has no display name; marking unknown");
                results[idx].reason = REASON_MISSING_NAME.to_string();
            } else {
                named.push(idx);
            }
        }

        let batch_size = self.cfg.batch_size.max(1);
        let batch_count = named.len().div_ceil(batch_size);
        let mut done = total - named.len();

        for (batch_no, chunk) in named.chunks(batch_size).enumerate() {
            let members: Vec<&FollowedEntity> = chunk.iter().map(|&i| &entities[i]).collect();
            tracing::info!(batch = batch_no + 1, of = batch_count, size = members.len(), "classifying batch");

            let batch_results = match self.classify_batch(&members, cancel).await {
                Ok(r) => r,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::error!(batch = batch_no + 1, error = %e, "batch classification failed; marking batch unknown");
                    members
                        .iter()
                        .map(|m| ClassificationResult::unknown(m, format!("classification failed: {e}")))
                        .collect()
                }
            };

            for (&idx, result) in chunk.iter().zip(batch_results) {
                results[idx] = result;
            }

            done += chunk.len();
            self.progress.report(stage::CLASSIFY, done, total);

            if batch_no + 1 < batch_count {
                pause(cancel, self.cfg.batch_delay).await?;
            }
        }

        let unknown = results.iter().filter(|r| r.category.is_unknown()).count();
        tracing::info!(total, classified = total - unknown, unknown, "classification finished");
        Ok(results)
    }

    async fn classify_batch(
        &self,
        members: &[&FollowedEntity],
        cancel: &CancellationToken,
    ) -> Result<Vec<ClassificationResult>> {
        let prompt = prompt::build_prompt(members);
        let attempts = self.cfg.retry.attempts();
        let mut last_err: Option<Error> = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                pause(cancel, self.cfg.retry.delay_for(attempt - 1)).await?;
            }
            self.limiter.lock().await.acquire(cancel).await?;

            let outcome = match cancellable(cancel, self.model.complete(&prompt)).await {
                Ok(raw) => response::parse_verdicts(&response::repair(&raw)),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(verdicts) => return Ok(match_verdicts(members, verdicts)),
                Err(e) if e.is_transient() || matches!(e, Error::AiResponse(_)) => {
                    tracing::warn!(attempt = attempt + 1, of = attempts, error = %e, "classifier call failed");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| Error::External("no classifier attempt was made".to_string())))
    }
}

/// Map verdicts back onto batch members by exact name.
fn match_verdicts(members: &[&FollowedEntity], verdicts: Vec<Verdict>) -> Vec<ClassificationResult> {
    let mut by_name: HashMap<String, Verdict> = HashMap::new();
    for v in verdicts {
        by_name.entry(v.name.clone()).or_insert(v);
    }

    members
        .iter()
        .map(|entity| {
            let Some(v) = by_name.get(&entity.name) else {
                return ClassificationResult::unknown(entity, REASON_NO_RESULT);
            };

            let category = match Category::from_label(&v.category) {
                Some(c) => c,
                None => {
                    tracing::warn!(entity = %entity.id, name = %entity.name, category = %v.category, "category outside vocabulary; using unknown");
                    Category::Unknown
                }
            };

            ClassificationResult {
                entity_id: entity.id,
                name: entity.name.clone(),
                signature: entity.signature.clone(),
                category,
                confidence: v.confidence,
                reason: v.reason.clone(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedModel;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_cfg(batch_size: usize) -> ClassifierConfig {
        ClassifierConfig {
            batch_size,
            batch_delay: Duration::ZERO,
            rate_limit_requests: 1000,
            rate_limit_window: Duration::from_secs(1),
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
            },
        }
    }

    fn five() -> Vec<FollowedEntity> {
        vec![
            FollowedEntity::new(1, "alpha", "rust and chips"),
            FollowedEntity::new(2, "bravo", "speedruns"),
            FollowedEntity::new(3, "charlie", "piano covers"),
            FollowedEntity::new(4, "delta", "street food"),
            FollowedEntity::new(5, "echo", "vlogs"),
        ]
    }

    const LABELS: &[(&str, &str)] = &[
        ("alpha", "科技"),
        ("bravo", "游戏"),
        ("charlie", "音乐"),
        ("delta", "美食"),
        ("echo", "生活"),
    ];

    #[tokio::test]
    async fn third_batch_failure_only_downgrades_its_members() {
        let labelled = ScriptedModel::by_name(LABELS);
        let model = Arc::new(ScriptedModel::new(move |_, prompt| {
            if prompt.user.contains("name: echo\n") {
                return Err(Error::Transient("upstream 503".to_string()));
            }
            labelled.respond(prompt)
        }));
        let c = CategoryClassifier::new(model.clone(), fast_cfg(2), Progress::silent());

        let out = c.classify(&five(), &CancellationToken::new()).await.unwrap();

        assert_eq!(out.len(), 5);
        // (2, 2, 1) batches; the last one is tried 3 times.
        assert_eq!(model.calls(), 2 + 3);
        let cats: Vec<_> = out.iter().map(|r| r.category).collect();
        assert_eq!(
            cats,
            vec![
                Category::Tech,
                Category::Gaming,
                Category::Music,
                Category::Food,
                Category::Unknown
            ]
        );
        assert!(out[4].reason.contains("upstream 503"), "{}", out[4].reason);
        assert_eq!(out[4].confidence, 0.0);
    }

    #[tokio::test]
    async fn missing_items_and_foreign_labels_become_unknown() {
        let model = Arc::new(ScriptedModel::new(|_, _| {
            Ok(r#"<think>hmm</think>{"results": [
                {"name": "alpha", "category": "Cooking", "confidence": 0.7, "reason": "?"},
                {"name": "bravo", "category": "游戏", "confidence": 0.9, "reason": "games"}
            ]}"#
            .to_string())
        }));
        let c = CategoryClassifier::new(model, fast_cfg(10), Progress::silent());
        let entities = five();
        let out = c.classify(&entities[..3], &CancellationToken::new()).await.unwrap();

        assert_eq!(out[0].category, Category::Unknown);
        assert_eq!(out[0].confidence, 0.7);
        assert_eq!(out[1].category, Category::Gaming);
        assert_eq!(out[2].category, Category::Unknown);
        assert_eq!(out[2].reason, REASON_NO_RESULT);
        assert_eq!(out[2].confidence, 0.0);
    }

    #[tokio::test]
    async fn malformed_output_is_retried_then_downgraded() {
        let model = Arc::new(ScriptedModel::new(|_, _| Ok("I cannot help with that".to_string())));
        let c = CategoryClassifier::new(model.clone(), fast_cfg(10), Progress::silent());
        let entities = five();
        let out = c.classify(&entities, &CancellationToken::new()).await.unwrap();

        assert_eq!(model.calls(), 3);
        assert!(out.iter().all(|r| r.category == Category::Unknown));
        assert!(out.iter().all(|r| r.reason.starts_with("classification failed: ai response error")));
    }

    #[tokio::test]
    async fn recovers_when_a_retry_succeeds() {
        let labelled = ScriptedModel::by_name(LABELS);
        let model = Arc::new(ScriptedModel::new(move |call, prompt| {
            if call == 0 {
                return Ok("{\"results\": [".to_string());
            }
            labelled.respond(prompt)
        }));
        let c = CategoryClassifier::new(model.clone(), fast_cfg(10), Progress::silent());
        let out = c.classify(&five(), &CancellationToken::new()).await.unwrap();
        assert_eq!(model.calls(), 2);
        assert!(out.iter().all(|r| !r.category.is_unknown()));
    }

    #[tokio::test]
    async fn non_retryable_service_error_fails_batch_without_retry() {
        let model = Arc::new(ScriptedModel::new(|_, _| {
            Err(Error::External("400 bad request".to_string()))
        }));
        let c = CategoryClassifier::new(model.clone(), fast_cfg(10), Progress::silent());
        let out = c.classify(&five(), &CancellationToken::new()).await.unwrap();
        assert_eq!(model.calls(), 1);
        assert!(out.iter().all(|r| r.category.is_unknown()));
    }

    #[tokio::test]
    async fn configuration_error_aborts() {
        let model = Arc::new(ScriptedModel::new(|_, _| {
            Err(Error::Config("invalid api key".to_string()))
        }));
        let c = CategoryClassifier::new(model, fast_cfg(10), Progress::silent());
        let err = c.classify(&five(), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn blank_names_skip_the_model() {
        let model = Arc::new(ScriptedModel::by_name(LABELS));
        let c = CategoryClassifier::new(model.clone(), fast_cfg(10), Progress::silent());
        let entities = vec![
            FollowedEntity::new(1, "alpha", ""),
            FollowedEntity::new(9, "  ", "ghost"),
        ];
        let out = c.classify(&entities, &CancellationToken::new()).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].category, Category::Tech);
        assert_eq!(out[1].category, Category::Unknown);
        assert_eq!(out[1].reason, REASON_MISSING_NAME);
        assert_eq!(model.calls(), 1);
        assert!(!model.prompts()[0].user.contains("ghost"));
    }

    #[tokio::test]
    async fn empty_input_makes_no_calls() {
        let model = Arc::new(ScriptedModel::by_name(LABELS));
        let c = CategoryClassifier::new(model.clone(), fast_cfg(10), Progress::silent());
        let out = c.classify(&[], &CancellationToken::new()).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn reports_progress_after_each_batch() {
        let model = Arc::new(ScriptedModel::by_name(LABELS));
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let c = CategoryClassifier::new(
            model,
            fast_cfg(2),
            Progress::new(move |_, cur, tot| sink.lock().unwrap().push((cur, tot))),
        );
        c.classify(&five(), &CancellationToken::new()).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![(2, 5), (4, 5), (5, 5)]);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limiter_spaces_calls_beyond_budget() {
        let model = Arc::new(ScriptedModel::by_name(LABELS));
        let mut cfg = fast_cfg(1);
        cfg.rate_limit_requests = 2;
        cfg.rate_limit_window = Duration::from_secs(60);
        let c = CategoryClassifier::new(model.clone(), cfg, Progress::silent());

        let start = tokio::time::Instant::now();
        let out = c.classify(&five()[..3], &CancellationToken::new()).await.unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(model.calls(), 3);
        // Third call waits for a refill: 2 tokens per 60s -> 30s.
        assert!(start.elapsed() >= Duration::from_secs(29));
    }

    #[tokio::test]
    async fn cancellation_stops_between_batches() {
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let trip = cancel.clone();
        let labelled = ScriptedModel::by_name(LABELS);
        let model = Arc::new(ScriptedModel::new(move |_, prompt| {
            counter.fetch_add(1, Ordering::SeqCst);
            trip.cancel();
            labelled.respond(prompt)
        }));
        let c = CategoryClassifier::new(model, fast_cfg(2), Progress::silent());
        let err = c.classify(&five(), &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
