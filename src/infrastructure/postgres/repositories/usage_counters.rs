use anyhow::Result;
use async_trait::async_trait;
use diesel::{OptionalExtension, RunQueryDsl, prelude::*, update};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::repositories::usage_counters::UsageCounterRepository;
use crate::infrastructure::postgres::{
    postgres_connection::PgPoolSquad,
    schema::{form_exports, form_submissions, forms, users},
};

pub struct UsageCounterPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl UsageCounterPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl UsageCounterRepository for UsageCounterPostgres {
    async fn governing_plan_id(&self, user_id: Uuid) -> Result<Option<Uuid>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let plan_id = users::table
            .find(user_id)
            .select(users::plan_id)
            .first::<Option<Uuid>>(&mut conn)
            .optional()?;

        Ok(plan_id.flatten())
    }

    async fn set_governing_plan(&self, user_id: Uuid, plan_id: Uuid) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        update(users::table.find(user_id))
            .set(users::plan_id.eq(Some(plan_id)))
            .execute(&mut conn)?;

        Ok(())
    }

    async fn count_forms(&self, user_id: Uuid) -> Result<i64> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let count = forms::table
            .filter(forms::user_id.eq(user_id))
            .count()
            .get_result::<i64>(&mut conn)?;

        Ok(count)
    }

    async fn count_submissions(&self, form_id: Uuid) -> Result<i64> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let count = form_submissions::table
            .filter(form_submissions::form_id.eq(form_id))
            .count()
            .get_result::<i64>(&mut conn)?;

        Ok(count)
    }

    async fn count_exports(&self, form_id: Uuid) -> Result<i64> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let count = form_exports::table
            .filter(form_exports::form_id.eq(form_id))
            .count()
            .get_result::<i64>(&mut conn)?;

        Ok(count)
    }
}
