use std::{collections::HashMap, sync::Arc};

use tokio_util::sync::CancellationToken;

use crate::{
    domain::GroupId,
    errors::Error,
    ports::FollowPlatform,
    throttle::cancellable,
    Result,
};

/// Run-scoped `group name -> id` map.
///
/// Owned by the orchestrator and lent out mutably, so writes are serialized
/// by construction.
#[derive(Clone, Debug, Default)]
pub struct GroupCache {
    ids: HashMap<String, GroupId>,
}

impl GroupCache {
    pub fn get(&self, name: &str) -> Option<GroupId> {
        self.ids.get(name).copied()
    }

    pub fn insert(&mut self, name: impl Into<String>, id: GroupId) {
        self.ids.insert(name.into(), id);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Outcome of `ensure_group`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolved {
    pub id: GroupId,
    pub created: bool,
}

pub struct GroupResolver {
    platform: Arc<dyn FollowPlatform>,
}

impl GroupResolver {
    pub fn new(platform: Arc<dyn FollowPlatform>) -> Self {
        Self { platform }
    }

    /// Build the cache from the platform's existing groups.
    ///
    /// A failed listing is logged and yields an empty cache; fatal errors propagate.
    pub async fn preload(&self, cancel: &CancellationToken) -> Result<GroupCache> {
        let mut cache = GroupCache::default();
        match cancellable(cancel, self.platform.list_groups()).await {
            Ok(groups) => {
                for g in groups {
                    cache.insert(g.name, g.id);
                }
                tracing::info!(existing = cache.len(), "loaded existing groups");
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::error!(error = %e, "failed to list existing groups; continuing with an empty cache");
            }
        }
        Ok(cache)
    }

    /// Return the group id for `name`, creating the group if it is not cached.
    pub async fn ensure_group(
        &self,
        name: &str,
        cache: &mut GroupCache,
        cancel: &CancellationToken,
    ) -> Result<Resolved> {
        if let Some(id) = cache.get(name) {
            tracing::info!(group = name, id = %id, "group already exists");
            return Ok(Resolved { id, created: false });
        }

        let id = cancellable(cancel, self.platform.create_group(name))
            .await
            .map_err(|e| {
                tracing::error!(group = name, error = %e, "failed to create group");
                e
            })?;
        if id.0 <= 0 {
            return Err(Error::Platform {
                code: -1,
                message: format!("platform returned no id for group '{name}'"),
            });
        }

        tracing::info!(group = name, id = %id, "created group");
        cache.insert(name, id);
        Ok(Resolved { id, created: true })
    }
}
