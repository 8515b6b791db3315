use anyhow::Result;
use async_trait::async_trait;
use diesel::{OptionalExtension, RunQueryDsl, prelude::*};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{
    entities::plans::{PlanEntity, PlanRow},
    repositories::plans::PlanRepository,
};
use crate::infrastructure::postgres::{postgres_connection::PgPoolSquad, schema::plans};

pub struct PlanPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl PlanPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl PlanRepository for PlanPostgres {
    async fn find_by_id(&self, plan_id: Uuid) -> Result<Option<PlanEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let row = plans::table
            .filter(plans::id.eq(plan_id))
            .first::<PlanRow>(&mut conn)
            .optional()?;

        Ok(row.map(PlanEntity::from))
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<PlanEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let row = plans::table
            .filter(plans::name.eq(name))
            .first::<PlanRow>(&mut conn)
            .optional()?;

        Ok(row.map(PlanEntity::from))
    }

    async fn find_default(&self) -> Result<PlanEntity> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        // Exactly one default plan must exist; a missing row is a hard error.
        let row = plans::table
            .filter(plans::is_default.eq(true))
            .first::<PlanRow>(&mut conn)?;

        Ok(row.into())
    }

    async fn list_active_plans(&self) -> Result<Vec<PlanEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let rows = plans::table
            .filter(plans::is_active.eq(true))
            .select(PlanRow::as_select())
            .load::<PlanRow>(&mut conn)?;

        Ok(rows.into_iter().map(PlanEntity::from).collect())
    }
}
