use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::payment_transactions::PaymentTransactionEntity;

#[async_trait]
#[automock]
pub trait PaymentTransactionRepository {
    /// Idempotency lookup. A hit means the event was already applied.
    async fn find_by_webhook_event_id(
        &self,
        webhook_event_id: &str,
    ) -> Result<Option<PaymentTransactionEntity>>;

    async fn list_for_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Vec<PaymentTransactionEntity>>;
}
