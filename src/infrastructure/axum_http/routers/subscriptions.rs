use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use crate::application::{
    interfaces::payment_gateway::PaymentGateway,
    usecases::subscriptions::{SubscriptionError, SubscriptionService},
};
use crate::auth::AuthUser;
use crate::domain::{
    repositories::{
        plans::PlanRepository, subscription_history::SubscriptionHistoryRepository,
        subscriptions::SubscriptionRepository, usage_counters::UsageCounterRepository,
    },
    value_objects::{
        enums::change_actors::ChangeActor,
        subscriptions::{
            CancelSubscriptionModel, CheckoutModel, CreateSubscriptionModel,
            NewSubscriptionRequest, PlanChangeModel, SubscriptionDto,
        },
    },
};

pub fn routes<P, S, H, U, G>(usecase: Arc<SubscriptionService<P, S, H, U, G>>) -> Router
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    H: SubscriptionHistoryRepository + Send + Sync + 'static,
    U: UsageCounterRepository + Send + Sync + 'static,
    G: PaymentGateway + Send + Sync + 'static,
{
    Router::new()
        .route("/plans", get(list_plans))
        .route("/current", get(current_subscription))
        .route("/", post(create_subscription))
        .route("/change-plan", post(request_plan_change))
        .route("/cancel", post(cancel_subscription))
        .route("/checkout", post(start_checkout))
        .with_state(usecase)
}

pub async fn list_plans<P, S, H, U, G>(
    State(usecase): State<Arc<SubscriptionService<P, S, H, U, G>>>,
    _auth: AuthUser,
) -> Result<impl IntoResponse, SubscriptionError>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    H: SubscriptionHistoryRepository + Send + Sync + 'static,
    U: UsageCounterRepository + Send + Sync + 'static,
    G: PaymentGateway + Send + Sync + 'static,
{
    let plans = usecase.list_plans().await?;
    Ok(Json(plans))
}

pub async fn current_subscription<P, S, H, U, G>(
    State(usecase): State<Arc<SubscriptionService<P, S, H, U, G>>>,
    auth: AuthUser,
) -> Result<impl IntoResponse, SubscriptionError>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    H: SubscriptionHistoryRepository + Send + Sync + 'static,
    U: UsageCounterRepository + Send + Sync + 'static,
    G: PaymentGateway + Send + Sync + 'static,
{
    let current = usecase.current_subscription(auth.user_id).await?;
    Ok(Json(current))
}

pub async fn create_subscription<P, S, H, U, G>(
    State(usecase): State<Arc<SubscriptionService<P, S, H, U, G>>>,
    auth: AuthUser,
    Json(model): Json<CreateSubscriptionModel>,
) -> Result<impl IntoResponse, SubscriptionError>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    H: SubscriptionHistoryRepository + Send + Sync + 'static,
    U: UsageCounterRepository + Send + Sync + 'static,
    G: PaymentGateway + Send + Sync + 'static,
{
    let created = usecase
        .create(NewSubscriptionRequest {
            user_id: auth.user_id,
            plan_id: model.plan_id,
            billing_cycle: model.billing_cycle,
            payment_provider: Some("stripe".to_string()),
            payment_method_id: model.payment_method_id,
            trial_days: model.trial_days,
            actor: ChangeActor::User,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(SubscriptionDto::from(created))))
}

pub async fn request_plan_change<P, S, H, U, G>(
    State(usecase): State<Arc<SubscriptionService<P, S, H, U, G>>>,
    auth: AuthUser,
    Json(model): Json<PlanChangeModel>,
) -> Result<impl IntoResponse, SubscriptionError>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    H: SubscriptionHistoryRepository + Send + Sync + 'static,
    U: UsageCounterRepository + Send + Sync + 'static,
    G: PaymentGateway + Send + Sync + 'static,
{
    let updated = usecase
        .request_plan_change_for_user(
            auth.user_id,
            model.target_plan_id,
            model.kind,
            ChangeActor::User,
        )
        .await?;
    Ok(Json(SubscriptionDto::from(updated)))
}

pub async fn cancel_subscription<P, S, H, U, G>(
    State(usecase): State<Arc<SubscriptionService<P, S, H, U, G>>>,
    auth: AuthUser,
    Json(model): Json<CancelSubscriptionModel>,
) -> Result<impl IntoResponse, SubscriptionError>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    H: SubscriptionHistoryRepository + Send + Sync + 'static,
    U: UsageCounterRepository + Send + Sync + 'static,
    G: PaymentGateway + Send + Sync + 'static,
{
    let canceled = usecase
        .cancel_for_user(auth.user_id, model.reason, ChangeActor::User)
        .await?;
    Ok(Json(SubscriptionDto::from(canceled)))
}

pub async fn start_checkout<P, S, H, U, G>(
    State(usecase): State<Arc<SubscriptionService<P, S, H, U, G>>>,
    auth: AuthUser,
    Json(model): Json<CheckoutModel>,
) -> Result<impl IntoResponse, SubscriptionError>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    H: SubscriptionHistoryRepository + Send + Sync + 'static,
    U: UsageCounterRepository + Send + Sync + 'static,
    G: PaymentGateway + Send + Sync + 'static,
{
    let checkout_url = usecase
        .start_checkout(auth.user_id, model.billing_cycle)
        .await?;
    Ok(Json(serde_json::json!({ "checkout_url": checkout_url })))
}
