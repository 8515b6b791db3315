use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    Router,
    http::{
        Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::get,
};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};
use url::Url;

use crate::application::{
    notifications::{NotificationProvider, SubscriptionNotifier},
    usecases::{
        subscriptions::{BillingSettings, SubscriptionService},
        usage_limits::UsageLimitUseCase,
        webhooks::WebhookProcessor,
    },
};
use crate::config::config_model::DotEnvyConfig;
use crate::infrastructure::{
    axum_http::{default_routers, routers},
    jobs::expiry_sweep,
    notifications::EmailServiceProvider,
    payments::stripe_client::StripeClient,
    postgres::{
        postgres_connection::PgPoolSquad,
        repositories::{
            payment_transactions::PaymentTransactionPostgres, plans::PlanPostgres,
            subscription_history::SubscriptionHistoryPostgres,
            subscriptions::SubscriptionPostgres, usage_counters::UsageCounterPostgres,
        },
    },
};

pub type AppSubscriptionService = SubscriptionService<
    PlanPostgres,
    SubscriptionPostgres,
    SubscriptionHistoryPostgres,
    UsageCounterPostgres,
    StripeClient,
>;

pub type AppWebhookProcessor = WebhookProcessor<
    PlanPostgres,
    SubscriptionPostgres,
    SubscriptionHistoryPostgres,
    UsageCounterPostgres,
    StripeClient,
    PaymentTransactionPostgres,
>;

pub async fn start(config: Arc<DotEnvyConfig>, db_pool: Arc<PgPoolSquad>) -> Result<()> {
    let stripe_client = Arc::new(StripeClient::new(
        config.stripe.secret_key.clone(),
        config.stripe.webhook_secret.clone(),
        config.stripe.success_url.clone(),
        config.stripe.cancel_url.clone(),
        Duration::from_secs(config.stripe.request_timeout_secs),
    )?);

    let mut providers: Vec<Arc<dyn NotificationProvider>> = Vec::new();
    match config.billing.notification_endpoint.as_deref() {
        Some(raw) => match Url::parse(raw) {
            Ok(endpoint) => providers.push(Arc::new(EmailServiceProvider::new(endpoint)?)),
            Err(err) => {
                warn!(error = %err, "Invalid notification endpoint; notifications disabled");
            }
        },
        None => info!("No notification endpoint configured"),
    }
    let notifier = SubscriptionNotifier::new(providers);

    let subscription_service: Arc<AppSubscriptionService> = Arc::new(SubscriptionService::new(
        Arc::new(PlanPostgres::new(Arc::clone(&db_pool))),
        Arc::new(SubscriptionPostgres::new(Arc::clone(&db_pool))),
        Arc::new(SubscriptionHistoryPostgres::new(Arc::clone(&db_pool))),
        Arc::new(UsageCounterPostgres::new(Arc::clone(&db_pool))),
        Arc::clone(&stripe_client),
        notifier,
        BillingSettings {
            subscriptions_enabled: config.billing.subscriptions_enabled,
        },
    ));

    let webhook_processor: Arc<AppWebhookProcessor> = Arc::new(WebhookProcessor::new(
        Arc::clone(&subscription_service),
        Arc::new(PaymentTransactionPostgres::new(Arc::clone(&db_pool))),
        vec![stripe_client],
    ));

    let usage_limits = Arc::new(UsageLimitUseCase::new(
        Arc::new(PlanPostgres::new(Arc::clone(&db_pool))),
        Arc::new(UsageCounterPostgres::new(Arc::clone(&db_pool))),
    ));

    tokio::spawn(expiry_sweep::run_expiry_sweep_loop(
        Arc::clone(&subscription_service),
        Duration::from_secs(config.billing.expiry_sweep_interval_secs),
    ));

    let app = Router::new()
        .fallback(default_routers::not_found)
        .nest(
            "/api/v1/subscriptions",
            routers::subscriptions::routes(Arc::clone(&subscription_service)),
        )
        .nest("/api/v1/usage", routers::usage::routes(usage_limits))
        .nest("/webhooks", routers::webhooks::routes(webhook_processor))
        .route("/api/v1/health-check", get(default_routers::health_check))
        .layer(TimeoutLayer::new(Duration::from_secs(config.server.timeout)))
        .layer(RequestBodyLimitLayer::new(
            (config.server.body_limit * 1024 * 1024).try_into()?,
        ))
        .layer(
            CorsLayer::new()
                .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE])
                .allow_origin(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = TcpListener::bind(addr).await?;

    info!("Server is running on port {}", config.server.port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
    };

    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}
