use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
};

use crate::application::{
    interfaces::payment_gateway::PaymentGateway,
    usecases::webhooks::{WebhookError, WebhookProcessor},
};
use crate::domain::repositories::{
    payment_transactions::PaymentTransactionRepository, plans::PlanRepository,
    subscription_history::SubscriptionHistoryRepository, subscriptions::SubscriptionRepository,
    usage_counters::UsageCounterRepository,
};

pub fn routes<P, S, H, U, G, T>(processor: Arc<WebhookProcessor<P, S, H, U, G, T>>) -> Router
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    H: SubscriptionHistoryRepository + Send + Sync + 'static,
    U: UsageCounterRepository + Send + Sync + 'static,
    G: PaymentGateway + Send + Sync + 'static,
    T: PaymentTransactionRepository + Send + Sync + 'static,
{
    Router::new()
        .route("/:provider", post(handle_webhook))
        .with_state(processor)
}

/// Takes the body as raw bytes: the provider signature is computed over the
/// exact payload, so nothing may parse it before verification.
pub async fn handle_webhook<P, S, H, U, G, T>(
    State(processor): State<Arc<WebhookProcessor<P, S, H, U, G, T>>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, WebhookError>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    H: SubscriptionHistoryRepository + Send + Sync + 'static,
    U: UsageCounterRepository + Send + Sync + 'static,
    G: PaymentGateway + Send + Sync + 'static,
    T: PaymentTransactionRepository + Send + Sync + 'static,
{
    let outcome = processor.process(&provider, &headers, &body).await?;
    Ok(Json(serde_json::json!({ "status": outcome })))
}
