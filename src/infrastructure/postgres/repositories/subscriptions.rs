use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{OptionalExtension, RunQueryDsl, insert_into, prelude::*, sql_types::Text, update};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{
    entities::{
        payment_transactions::NewPaymentTransactionEntity,
        subscriptions::{
            InsertSubscriptionEntity, PENDING_PLAN_CHANGE_KEY, SubscriptionEntity, SubscriptionRow,
        },
    },
    repositories::subscriptions::{InsertOutcome, SubscriptionRepository, UpdateOutcome},
    value_objects::{
        enums::subscription_statuses::SubscriptionStatus, subscriptions::SubscriptionChanges,
    },
};
use crate::infrastructure::postgres::{
    postgres_connection::PgPoolSquad,
    schema::{payment_transactions, subscriptions},
};

pub struct SubscriptionPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl SubscriptionPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }

    fn open_statuses() -> Vec<String> {
        vec![
            SubscriptionStatus::Pending.to_string(),
            SubscriptionStatus::Active.to_string(),
        ]
    }

    fn terminal_statuses() -> Vec<String> {
        vec![
            SubscriptionStatus::Canceled.to_string(),
            SubscriptionStatus::Expired.to_string(),
        ]
    }
}

#[async_trait]
impl SubscriptionRepository for SubscriptionPostgres {
    async fn find_by_id(&self, subscription_id: Uuid) -> Result<Option<SubscriptionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let row = subscriptions::table
            .find(subscription_id)
            .first::<SubscriptionRow>(&mut conn)
            .optional()?;

        Ok(row.map(SubscriptionEntity::from))
    }

    async fn find_open_for_user(&self, user_id: Uuid) -> Result<Option<SubscriptionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let row = subscriptions::table
            .filter(subscriptions::user_id.eq(user_id))
            .filter(subscriptions::status.eq_any(Self::open_statuses()))
            .order(subscriptions::created_at.desc())
            .first::<SubscriptionRow>(&mut conn)
            .optional()?;

        Ok(row.map(SubscriptionEntity::from))
    }

    async fn find_current_for_user(&self, user_id: Uuid) -> Result<Option<SubscriptionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let row = subscriptions::table
            .filter(subscriptions::user_id.eq(user_id))
            .filter(diesel::dsl::not(
                subscriptions::status.eq_any(Self::terminal_statuses()),
            ))
            .order(subscriptions::created_at.desc())
            .first::<SubscriptionRow>(&mut conn)
            .optional()?;

        Ok(row.map(SubscriptionEntity::from))
    }

    async fn find_by_provider_subscription_id(
        &self,
        provider_subscription_id: &str,
    ) -> Result<Option<SubscriptionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let row = subscriptions::table
            .filter(subscriptions::provider_subscription_id.eq(provider_subscription_id))
            .order(subscriptions::created_at.desc())
            .first::<SubscriptionRow>(&mut conn)
            .optional()?;

        Ok(row.map(SubscriptionEntity::from))
    }

    async fn insert_unless_open_exists(
        &self,
        insert: InsertSubscriptionEntity,
    ) -> Result<InsertOutcome> {
        let mut conn = Arc::clone(&self.db_pool).get()?;
        let user_id = insert.user_id;

        let outcome = conn.transaction::<InsertOutcome, diesel::result::Error, _>(|conn| {
            // Serializes concurrent creates for the same user; a partial
            // unique index cannot express "at most one pending-or-active".
            diesel::sql_query("SELECT pg_advisory_xact_lock(hashtext($1))")
                .bind::<Text, _>(user_id.to_string())
                .execute(conn)?;

            let existing = subscriptions::table
                .filter(subscriptions::user_id.eq(user_id))
                .filter(subscriptions::status.eq_any(Self::open_statuses()))
                .order(subscriptions::created_at.desc())
                .first::<SubscriptionRow>(conn)
                .optional()?;

            if let Some(existing) = existing {
                return Ok(InsertOutcome::AlreadyOpen(existing.into()));
            }

            let created = insert_into(subscriptions::table)
                .values(&insert)
                .returning(SubscriptionRow::as_returning())
                .get_result::<SubscriptionRow>(conn)?;

            Ok(InsertOutcome::Created(created.into()))
        })?;

        Ok(outcome)
    }

    async fn update_guarded(
        &self,
        subscription_id: Uuid,
        expected_statuses: &[SubscriptionStatus],
        changes: SubscriptionChanges,
        payment_event: Option<NewPaymentTransactionEntity>,
    ) -> Result<UpdateOutcome> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = conn.transaction::<UpdateOutcome, diesel::result::Error, _>(|conn| {
            let row = subscriptions::table
                .find(subscription_id)
                .for_update()
                .first::<SubscriptionRow>(conn)
                .optional()?;
            let Some(row) = row else {
                return Ok(UpdateOutcome::NotFound);
            };

            let mut metadata = row.metadata.clone();
            let current: SubscriptionEntity = row.into();
            if !expected_statuses.contains(&current.status) {
                return Ok(UpdateOutcome::StatusMismatch(current));
            }

            // Merge the change set over the locked row so the transition is
            // written whole or not at all.
            let next_pending = match &changes.pending_change {
                Some(next) => next.clone(),
                None => current.pending_change.clone(),
            };
            if !metadata.is_object() {
                metadata = serde_json::json!({});
            }
            match &next_pending {
                Some(change) => {
                    metadata[PENDING_PLAN_CHANGE_KEY] =
                        serde_json::to_value(change).unwrap_or_default();
                }
                None => {
                    if let Some(map) = metadata.as_object_mut() {
                        map.remove(PENDING_PLAN_CHANGE_KEY);
                    }
                }
            }

            let status = changes.status.unwrap_or(current.status).to_string();
            let plan_id = changes.plan_id.unwrap_or(current.plan_id);
            let amount_minor = changes.amount_minor.unwrap_or(current.amount_minor);
            let ends_at = changes.ends_at.unwrap_or(current.ends_at);
            let next_billing_at = changes.next_billing_at.unwrap_or(current.next_billing_at);
            let canceled_at = changes.canceled_at.or(current.canceled_at);
            let auto_renew = changes.auto_renew.unwrap_or(current.auto_renew);
            let failed_payment_attempts = changes
                .failed_payment_attempts
                .unwrap_or(current.failed_payment_attempts);
            let provider_subscription_id = changes
                .provider_subscription_id
                .clone()
                .or_else(|| current.provider_subscription_id.clone());
            let payment_method_id = changes
                .payment_method_id
                .clone()
                .or_else(|| current.payment_method_id.clone());

            let updated = update(subscriptions::table.find(subscription_id))
                .set((
                    subscriptions::status.eq(status),
                    subscriptions::plan_id.eq(plan_id),
                    subscriptions::amount_minor.eq(amount_minor),
                    subscriptions::ends_at.eq(ends_at),
                    subscriptions::next_billing_at.eq(next_billing_at),
                    subscriptions::canceled_at.eq(canceled_at),
                    subscriptions::auto_renew.eq(auto_renew),
                    subscriptions::failed_payment_attempts.eq(failed_payment_attempts),
                    subscriptions::provider_subscription_id.eq(provider_subscription_id),
                    subscriptions::payment_method_id.eq(payment_method_id),
                    subscriptions::metadata.eq(metadata),
                    subscriptions::updated_at.eq(Utc::now()),
                ))
                .returning(SubscriptionRow::as_returning())
                .get_result::<SubscriptionRow>(conn)?;

            if let Some(event) = payment_event {
                // Unique webhook_event_id is the concurrency gate: a duplicate
                // aborts the whole transaction so the subscription update
                // above is not reapplied.
                let inserted = insert_into(payment_transactions::table)
                    .values(&event)
                    .on_conflict(payment_transactions::webhook_event_id)
                    .do_nothing()
                    .execute(conn)?;
                if inserted == 0 {
                    return Err(diesel::result::Error::RollbackTransaction);
                }
            }

            Ok(UpdateOutcome::Updated(updated.into()))
        });

        match result {
            Ok(outcome) => Ok(outcome),
            Err(diesel::result::Error::RollbackTransaction) => Ok(UpdateOutcome::DuplicateEvent),
            Err(err) => Err(err.into()),
        }
    }

    async fn list_expirable(&self, as_of: DateTime<Utc>) -> Result<Vec<SubscriptionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let rows = subscriptions::table
            .filter(subscriptions::status.eq(SubscriptionStatus::Active.to_string()))
            .filter(subscriptions::auto_renew.eq(false))
            .filter(subscriptions::ends_at.is_not_null())
            .filter(subscriptions::ends_at.lt(as_of))
            .select(SubscriptionRow::as_select())
            .load::<SubscriptionRow>(&mut conn)?;

        Ok(rows.into_iter().map(SubscriptionEntity::from).collect())
    }
}
