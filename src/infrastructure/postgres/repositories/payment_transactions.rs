use anyhow::Result;
use async_trait::async_trait;
use diesel::{OptionalExtension, RunQueryDsl, prelude::*};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{
    entities::payment_transactions::PaymentTransactionEntity,
    repositories::payment_transactions::PaymentTransactionRepository,
};
use crate::infrastructure::postgres::{
    postgres_connection::PgPoolSquad, schema::payment_transactions,
};

/// Lookups over the append-only payment event ledger. Inserts happen inside
/// the subscription transition transaction (see SubscriptionPostgres) so the
/// idempotency gate and the state change commit together.
pub struct PaymentTransactionPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl PaymentTransactionPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl PaymentTransactionRepository for PaymentTransactionPostgres {
    async fn find_by_webhook_event_id(
        &self,
        webhook_event_id: &str,
    ) -> Result<Option<PaymentTransactionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let row = payment_transactions::table
            .filter(payment_transactions::webhook_event_id.eq(webhook_event_id))
            .first::<PaymentTransactionEntity>(&mut conn)
            .optional()?;

        Ok(row)
    }

    async fn list_for_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Vec<PaymentTransactionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let rows = payment_transactions::table
            .filter(payment_transactions::subscription_id.eq(subscription_id))
            .order(payment_transactions::created_at.desc())
            .select(PaymentTransactionEntity::as_select())
            .load::<PaymentTransactionEntity>(&mut conn)?;

        Ok(rows)
    }
}
