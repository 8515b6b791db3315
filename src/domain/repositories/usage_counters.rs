use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

/// Derived usage counts plus the governing-plan pointer the state machine
/// synchronizes on activation, cancellation, and expiry. Counts are read from
/// the live tables without locks; brief staleness is acceptable.
#[async_trait]
#[automock]
pub trait UsageCounterRepository {
    async fn governing_plan_id(&self, user_id: Uuid) -> Result<Option<Uuid>>;
    async fn set_governing_plan(&self, user_id: Uuid, plan_id: Uuid) -> Result<()>;

    async fn count_forms(&self, user_id: Uuid) -> Result<i64>;
    async fn count_submissions(&self, form_id: Uuid) -> Result<i64>;
    async fn count_exports(&self, form_id: Uuid) -> Result<i64>;
}
