use std::sync::Arc;

use tracing::{debug, error};
use uuid::Uuid;

use crate::application::usecases::subscriptions::{SubscriptionError, UseCaseResult};
use crate::domain::{
    entities::plans::PlanEntity,
    repositories::{plans::PlanRepository, usage_counters::UsageCounterRepository},
    value_objects::usage::{LimitCheck, UsageAction},
};

/// Answers "is this action allowed under the plan currently in effect".
/// Reads only: the governing plan is whatever the state machine last
/// synchronized, with the default plan as fallback, and counts come from the
/// live resource tables. Pending plan changes are never consulted.
pub struct UsageLimitUseCase<P, U>
where
    P: PlanRepository + Send + Sync + 'static,
    U: UsageCounterRepository + Send + Sync + 'static,
{
    plan_repo: Arc<P>,
    usage_repo: Arc<U>,
}

impl<P, U> UsageLimitUseCase<P, U>
where
    P: PlanRepository + Send + Sync + 'static,
    U: UsageCounterRepository + Send + Sync + 'static,
{
    pub fn new(plan_repo: Arc<P>, usage_repo: Arc<U>) -> Self {
        Self {
            plan_repo,
            usage_repo,
        }
    }

    pub async fn check_limit(
        &self,
        user_id: Uuid,
        action: UsageAction,
    ) -> UseCaseResult<LimitCheck> {
        let plan = self.resolve_governing_plan(user_id).await?;

        let (limit, current) = match action {
            UsageAction::CreateForm => {
                let current = self.usage_repo.count_forms(user_id).await.map_err(|err| {
                    error!(%user_id, db_error = ?err, "usage: failed to count forms");
                    SubscriptionError::Internal(err)
                })?;
                (plan.limits.max_forms_or_default(), current)
            }
            UsageAction::SubmitForm { form_id } => {
                let current = self
                    .usage_repo
                    .count_submissions(form_id)
                    .await
                    .map_err(|err| {
                        error!(%form_id, db_error = ?err, "usage: failed to count submissions");
                        SubscriptionError::Internal(err)
                    })?;
                (plan.limits.max_submissions_per_form_or_default(), current)
            }
            UsageAction::ExportData { form_id } => {
                let current = self.usage_repo.count_exports(form_id).await.map_err(|err| {
                    error!(%form_id, db_error = ?err, "usage: failed to count exports");
                    SubscriptionError::Internal(err)
                })?;
                (plan.limits.max_exports_or_default(), current)
            }
        };

        let check = LimitCheck::evaluate(limit, current);
        debug!(
            %user_id,
            action = action.as_str(),
            plan_id = %plan.id,
            allowed = check.allowed,
            limit = check.limit,
            current = check.current,
            "usage: limit checked"
        );
        Ok(check)
    }

    async fn resolve_governing_plan(&self, user_id: Uuid) -> UseCaseResult<PlanEntity> {
        let governing = self
            .usage_repo
            .governing_plan_id(user_id)
            .await
            .map_err(|err| {
                error!(%user_id, db_error = ?err, "usage: failed to load governing plan pointer");
                SubscriptionError::Internal(err)
            })?;

        if let Some(plan_id) = governing {
            match self.plan_repo.find_by_id(plan_id).await.map_err(|err| {
                error!(%plan_id, db_error = ?err, "usage: failed to load governing plan");
                SubscriptionError::Internal(err)
            })? {
                Some(plan) => return Ok(plan),
                None => {
                    // Stale pointer, e.g. a plan retired after assignment.
                    debug!(%user_id, %plan_id, "usage: governing plan missing, using default");
                }
            }
        }

        self.plan_repo.find_default().await.map_err(|err| {
            error!(db_error = ?err, "usage: failed to load default plan");
            SubscriptionError::Internal(err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repositories::{
        plans::MockPlanRepository, usage_counters::MockUsageCounterRepository,
    };
    use crate::domain::value_objects::{
        enums::billing_models::BillingModel, plans::PlanLimits,
    };
    use mockall::predicate::eq;

    fn plan_with_limits(id: Uuid, limits: PlanLimits) -> PlanEntity {
        PlanEntity {
            id,
            name: "Starter".to_string(),
            description: None,
            billing_model: BillingModel::Recurring,
            price_monthly_minor: 500,
            price_yearly_minor: 5000,
            price_lifetime_minor: 0,
            currency: "usd".to_string(),
            limits,
            is_default: false,
            is_active: true,
            stripe_price_monthly: None,
            stripe_price_yearly: None,
            stripe_price_lifetime: None,
        }
    }

    #[tokio::test]
    async fn at_limit_blocks_with_full_numbers() {
        let user_id = Uuid::new_v4();
        let plan_id = Uuid::new_v4();

        let mut usage_repo = MockUsageCounterRepository::new();
        usage_repo
            .expect_governing_plan_id()
            .with(eq(user_id))
            .returning(move |_| Box::pin(async move { Ok(Some(plan_id)) }));
        usage_repo
            .expect_count_forms()
            .with(eq(user_id))
            .returning(|_| Box::pin(async { Ok(5) }));

        let mut plan_repo = MockPlanRepository::new();
        let plan = plan_with_limits(
            plan_id,
            PlanLimits {
                max_forms: Some(5),
                max_submissions_per_form: Some(100),
                max_exports: Some(10),
            },
        );
        plan_repo
            .expect_find_by_id()
            .with(eq(plan_id))
            .returning(move |_| {
                let plan = plan.clone();
                Box::pin(async move { Ok(Some(plan)) })
            });

        let usecase = UsageLimitUseCase::new(Arc::new(plan_repo), Arc::new(usage_repo));

        let check = usecase
            .check_limit(user_id, UsageAction::CreateForm)
            .await
            .expect("limit check should succeed");
        assert_eq!(
            check,
            LimitCheck {
                allowed: false,
                limit: 5,
                current: 5,
                remaining: 0
            }
        );
    }

    #[tokio::test]
    async fn falls_back_to_default_plan_without_a_governing_plan() {
        let user_id = Uuid::new_v4();

        let mut usage_repo = MockUsageCounterRepository::new();
        usage_repo
            .expect_governing_plan_id()
            .returning(|_| Box::pin(async { Ok(None) }));
        usage_repo
            .expect_count_forms()
            .returning(|_| Box::pin(async { Ok(1) }));

        let mut plan_repo = MockPlanRepository::new();
        let default_plan = plan_with_limits(
            Uuid::new_v4(),
            PlanLimits {
                max_forms: Some(3),
                max_submissions_per_form: Some(50),
                max_exports: Some(0),
            },
        );
        plan_repo.expect_find_default().returning(move || {
            let plan = default_plan.clone();
            Box::pin(async move { Ok(plan) })
        });

        let usecase = UsageLimitUseCase::new(Arc::new(plan_repo), Arc::new(usage_repo));

        let check = usecase
            .check_limit(user_id, UsageAction::CreateForm)
            .await
            .expect("limit check should succeed");
        assert!(check.allowed);
        assert_eq!(check.limit, 3);
        assert_eq!(check.remaining, 2);
    }

    #[tokio::test]
    async fn zero_limit_always_blocks() {
        let user_id = Uuid::new_v4();
        let form_id = Uuid::new_v4();

        let mut usage_repo = MockUsageCounterRepository::new();
        usage_repo
            .expect_governing_plan_id()
            .returning(|_| Box::pin(async { Ok(None) }));
        usage_repo
            .expect_count_exports()
            .with(eq(form_id))
            .returning(|_| Box::pin(async { Ok(0) }));

        let mut plan_repo = MockPlanRepository::new();
        let default_plan = plan_with_limits(
            Uuid::new_v4(),
            PlanLimits {
                max_forms: Some(3),
                max_submissions_per_form: Some(50),
                max_exports: Some(0),
            },
        );
        plan_repo.expect_find_default().returning(move || {
            let plan = default_plan.clone();
            Box::pin(async move { Ok(plan) })
        });

        let usecase = UsageLimitUseCase::new(Arc::new(plan_repo), Arc::new(usage_repo));

        let check = usecase
            .check_limit(user_id, UsageAction::ExportData { form_id })
            .await
            .expect("limit check should succeed");
        assert!(!check.allowed);
        assert_eq!(check.limit, 0);
    }

    #[tokio::test]
    async fn submissions_are_counted_per_form() {
        let user_id = Uuid::new_v4();
        let plan_id = Uuid::new_v4();
        let form_id = Uuid::new_v4();

        let mut usage_repo = MockUsageCounterRepository::new();
        usage_repo
            .expect_governing_plan_id()
            .returning(move |_| Box::pin(async move { Ok(Some(plan_id)) }));
        usage_repo
            .expect_count_submissions()
            .with(eq(form_id))
            .returning(|_| Box::pin(async { Ok(99) }));

        let mut plan_repo = MockPlanRepository::new();
        let plan = plan_with_limits(
            plan_id,
            PlanLimits {
                max_forms: Some(5),
                max_submissions_per_form: Some(100),
                max_exports: Some(10),
            },
        );
        plan_repo.expect_find_by_id().returning(move |_| {
            let plan = plan.clone();
            Box::pin(async move { Ok(Some(plan)) })
        });

        let usecase = UsageLimitUseCase::new(Arc::new(plan_repo), Arc::new(usage_repo));

        let check = usecase
            .check_limit(user_id, UsageAction::SubmitForm { form_id })
            .await
            .expect("limit check should succeed");
        assert!(check.allowed);
        assert_eq!(check.remaining, 1);
    }
}
