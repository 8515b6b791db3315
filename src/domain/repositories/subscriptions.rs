use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::{
    payment_transactions::NewPaymentTransactionEntity,
    subscriptions::{InsertSubscriptionEntity, SubscriptionEntity},
};
use crate::domain::value_objects::{
    enums::subscription_statuses::SubscriptionStatus, subscriptions::SubscriptionChanges,
};

/// Result of the serialized check-then-insert performed by `create`.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Created(SubscriptionEntity),
    /// The user already holds a pending or active subscription.
    AlreadyOpen(SubscriptionEntity),
}

/// Result of a guarded transition. The repository locks the row, re-checks the
/// expected status set, applies the full change set, and records the optional
/// payment event in the same transaction.
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    Updated(SubscriptionEntity),
    /// A concurrent transition changed the status first; carries the fresh row.
    StatusMismatch(SubscriptionEntity),
    /// The accompanying payment event was already recorded; nothing was written.
    DuplicateEvent,
    NotFound,
}

#[async_trait]
#[automock]
pub trait SubscriptionRepository {
    async fn find_by_id(&self, subscription_id: Uuid) -> Result<Option<SubscriptionEntity>>;

    /// Latest subscription in an open (pending or active) status for the user.
    async fn find_open_for_user(&self, user_id: Uuid) -> Result<Option<SubscriptionEntity>>;

    /// Latest non-terminal subscription for the user (includes suspended).
    async fn find_current_for_user(&self, user_id: Uuid) -> Result<Option<SubscriptionEntity>>;

    async fn find_by_provider_subscription_id(
        &self,
        provider_subscription_id: &str,
    ) -> Result<Option<SubscriptionEntity>>;

    /// Check-then-insert serialized per user so two concurrent creates cannot
    /// both pass the open-subscription check.
    async fn insert_unless_open_exists(
        &self,
        insert: InsertSubscriptionEntity,
    ) -> Result<InsertOutcome>;

    /// Applies `changes` iff the current status is in `expected_statuses`,
    /// under a row lock, atomically with the optional payment-event insert.
    async fn update_guarded(
        &self,
        subscription_id: Uuid,
        expected_statuses: &[SubscriptionStatus],
        changes: SubscriptionChanges,
        payment_event: Option<NewPaymentTransactionEntity>,
    ) -> Result<UpdateOutcome>;

    /// Active subscriptions whose period lapsed without auto-renewal.
    async fn list_expirable(&self, as_of: DateTime<Utc>) -> Result<Vec<SubscriptionEntity>>;
}
