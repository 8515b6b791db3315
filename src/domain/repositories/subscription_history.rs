use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::subscription_history::{
    NewSubscriptionHistoryEntity, SubscriptionHistoryEntity,
};

#[async_trait]
#[automock]
pub trait SubscriptionHistoryRepository {
    async fn append(&self, entry: NewSubscriptionHistoryEntity) -> Result<Uuid>;

    /// Entries for one subscription, oldest first.
    async fn list_for_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Vec<SubscriptionHistoryEntity>>;
}
