use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{sync::Mutex, time::sleep};

use crate::{
    domain::{EntityId, FollowingPage, Group, GroupId, OwnerId},
    ports::FollowPlatform,
    throttle::IntervalLimiter,
    Result,
};

/// FollowPlatform decorator that spaces out outbound calls.
///
/// Every call, read or write, reserves a slot on one shared limiter.
pub struct ThrottledPlatform {
    inner: Arc<dyn FollowPlatform>,
    limiter: Mutex<IntervalLimiter>,
}

impl ThrottledPlatform {
    pub fn new(inner: Arc<dyn FollowPlatform>, min_interval: Duration) -> Self {
        Self {
            inner,
            limiter: Mutex::new(IntervalLimiter::new(min_interval)),
        }
    }

    async fn throttle(&self) {
        let wait = { self.limiter.lock().await.reserve() };
        if wait > Duration::ZERO {
            sleep(wait).await;
        }
    }
}

#[async_trait]
impl FollowPlatform for ThrottledPlatform {
    async fn following_page(
        &self,
        owner: OwnerId,
        page: u32,
        page_size: u32,
    ) -> Result<FollowingPage> {
        self.throttle().await;
        self.inner.following_page(owner, page, page_size).await
    }

    async fn list_groups(&self) -> Result<Vec<Group>> {
        self.throttle().await;
        self.inner.list_groups().await
    }

    async fn create_group(&self, name: &str) -> Result<GroupId> {
        self.throttle().await;
        self.inner.create_group(name).await
    }

    async fn assign_to_group(&self, members: &[EntityId], group: GroupId) -> Result<()> {
        self.throttle().await;
        self.inner.assign_to_group(members, group).await
    }
}
