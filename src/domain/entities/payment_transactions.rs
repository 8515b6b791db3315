use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::infrastructure::postgres::schema::payment_transactions;

/// One row per processed provider event. `webhook_event_id` is unique across
/// the ledger and gates duplicate deliveries.
#[derive(Debug, Clone, PartialEq, Identifiable, Selectable, Queryable)]
#[diesel(table_name = payment_transactions)]
pub struct PaymentTransactionEntity {
    pub id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub user_id: Uuid,
    pub provider: String,
    pub provider_transaction_id: Option<String>,
    pub webhook_event_id: String,
    pub status: String,
    pub amount_minor: i32,
    pub currency: String,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = payment_transactions)]
pub struct NewPaymentTransactionEntity {
    pub subscription_id: Option<Uuid>,
    pub user_id: Uuid,
    pub provider: String,
    pub provider_transaction_id: Option<String>,
    pub webhook_event_id: String,
    pub status: String,
    pub amount_minor: i32,
    pub currency: String,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
    pub retry_count: i32,
}
