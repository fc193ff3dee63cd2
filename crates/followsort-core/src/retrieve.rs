use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    domain::{FollowedEntity, OwnerId},
    ports::FollowPlatform,
    progress::{stage, Progress},
    throttle::cancellable,
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct RetrieverConfig {
    pub page_size: u32,
    pub max_pages: u32,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            page_size: 24,
            max_pages: 100,
        }
    }
}

/// Walks the paginated follow list into a flat entity list.
pub struct FollowerRetriever {
    platform: Arc<dyn FollowPlatform>,
    cfg: RetrieverConfig,
    progress: Progress,
}

impl FollowerRetriever {
    pub fn new(platform: Arc<dyn FollowPlatform>, cfg: RetrieverConfig, progress: Progress) -> Self {
        Self {
            platform,
            cfg,
            progress,
        }
    }

    /// Fetch every followed entity, stopping at an empty page, the reported
    /// total, or the page cap.
    ///
    /// A failing page ends the walk and returns what was gathered so far.
    /// Credential errors and cancellation are returned as errors.
    pub async fn fetch_all(
        &self,
        owner: OwnerId,
        cancel: &CancellationToken,
    ) -> Result<Vec<FollowedEntity>> {
        let mut all: Vec<FollowedEntity> = Vec::new();

        for page in 1..=self.cfg.max_pages {
            let fetched = cancellable(
                cancel,
                self.platform.following_page(owner, page, self.cfg.page_size),
            )
            .await;

            let resp = match fetched {
                Ok(resp) => resp,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::error!(page, error = %e, fetched = all.len(), "failed to fetch follow page; keeping partial list");
                    break;
                }
            };

            if resp.entities.is_empty() {
                tracing::info!(page, "no more followings");
                break;
            }

            let got = resp.entities.len();
            all.extend(resp.entities);
            tracing::info!(page, got, total = all.len(), reported = resp.total, "fetched follow page");
            self.progress
                .report(stage::FETCH, all.len(), resp.total.max(all.len()));

            if all.len() >= resp.total {
                tracing::info!(total = resp.total, "fetched entire follow list");
                break;
            }
            if page == self.cfg.max_pages {
                tracing::warn!(max_pages = self.cfg.max_pages, "page cap reached before the reported total");
            }
        }

        Ok(all)
    }
}
