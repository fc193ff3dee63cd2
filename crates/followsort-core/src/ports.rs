use async_trait::async_trait;

use crate::{
    domain::{EntityId, FollowingPage, Group, GroupId, OwnerId},
    Result,
};

/// Hexagonal port for the social platform.
///
/// Implementations own transport concerns (auth, retry/backoff); callers only
/// see typed results and `Error` kinds.
#[async_trait]
pub trait FollowPlatform: Send + Sync {
    /// Fetch one page (1-based) of the owner's follow list.
    async fn following_page(
        &self,
        owner: OwnerId,
        page: u32,
        page_size: u32,
    ) -> Result<FollowingPage>;

    async fn list_groups(&self) -> Result<Vec<Group>>;

    async fn create_group(&self, name: &str) -> Result<GroupId>;

    async fn assign_to_group(&self, members: &[EntityId], group: GroupId) -> Result<()>;
}

/// A single prompt for the classification model.
#[derive(Clone, Debug)]
pub struct ClassifierPrompt {
    pub system: String,
    pub user: String,
}

/// Port for the text-classification model.
///
/// Returns the raw completion text; callers repair and validate it.
#[async_trait]
pub trait ClassifierModel: Send + Sync {
    async fn complete(&self, prompt: &ClassifierPrompt) -> Result<String>;
}
