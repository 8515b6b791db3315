use anyhow::Result;
use async_trait::async_trait;
use diesel::{RunQueryDsl, insert_into, prelude::*};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{
    entities::subscription_history::{NewSubscriptionHistoryEntity, SubscriptionHistoryEntity},
    repositories::subscription_history::SubscriptionHistoryRepository,
};
use crate::infrastructure::postgres::{
    postgres_connection::PgPoolSquad, schema::subscription_history,
};

pub struct SubscriptionHistoryPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl SubscriptionHistoryPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl SubscriptionHistoryRepository for SubscriptionHistoryPostgres {
    async fn append(&self, entry: NewSubscriptionHistoryEntity) -> Result<Uuid> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let entry_id = insert_into(subscription_history::table)
            .values(&entry)
            .returning(subscription_history::id)
            .get_result::<Uuid>(&mut conn)?;

        Ok(entry_id)
    }

    async fn list_for_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Vec<SubscriptionHistoryEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let entries = subscription_history::table
            .filter(subscription_history::subscription_id.eq(subscription_id))
            .order(subscription_history::created_at.asc())
            .select(SubscriptionHistoryEntity::as_select())
            .load::<SubscriptionHistoryEntity>(&mut conn)?;

        Ok(entries)
    }
}
