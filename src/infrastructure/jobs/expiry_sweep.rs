use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tracing::{debug, error, info};

use crate::application::{
    interfaces::payment_gateway::PaymentGateway, usecases::subscriptions::SubscriptionService,
};
use crate::domain::repositories::{
    plans::PlanRepository, subscription_history::SubscriptionHistoryRepository,
    subscriptions::SubscriptionRepository, usage_counters::UsageCounterRepository,
};

/// Periodically expires active subscriptions whose period lapsed without
/// auto-renew. An external scheduler can drive the same operation; this loop
/// keeps a single-node deployment self-contained.
pub async fn run_expiry_sweep_loop<P, S, H, U, G>(
    service: Arc<SubscriptionService<P, S, H, U, G>>,
    period: Duration,
) where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    H: SubscriptionHistoryRepository + Send + Sync + 'static,
    U: UsageCounterRepository + Send + Sync + 'static,
    G: PaymentGateway + Send + Sync + 'static,
{
    info!(period_secs = period.as_secs(), "Starting expiry sweep loop");
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        match service.expire_lapsed(Utc::now()).await {
            Ok(summary) if summary.expired > 0 || summary.failed > 0 => {
                info!(
                    expired = summary.expired,
                    skipped = summary.skipped,
                    failed = summary.failed,
                    "Expiry sweep tick finished"
                );
            }
            Ok(_) => debug!("Expiry sweep tick found nothing to expire"),
            Err(err) => error!(error = ?err, "Expiry sweep tick failed"),
        }
    }
}
