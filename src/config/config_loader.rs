use anyhow::{Ok, Result};

use super::config_model::{Billing, Database, DotEnvyConfig, Server, Stripe};

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    let server = Server {
        port: std::env::var("SERVER_PORT")
            .expect("SERVER_PORT is invalid")
            .parse()?,
        body_limit: std::env::var("SERVER_BODY_LIMIT")
            .expect("SERVER_BODY_LIMIT is invalid")
            .parse()?,
        timeout: std::env::var("SERVER_TIMEOUT")
            .expect("SERVER_TIMEOUT is invalid")
            .parse()?,
    };

    let database = Database {
        url: std::env::var("DATABASE_URL").expect("DATABASE_URL is invalid"),
    };

    let stripe = Stripe {
        secret_key: std::env::var("STRIPE_SECRET_KEY").expect("STRIPE_SECRET_KEY is invalid"),
        webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET")
            .expect("STRIPE_WEBHOOK_SECRET is invalid"),
        success_url: std::env::var("STRIPE_SUCCESS_URL").expect("STRIPE_SUCCESS_URL is invalid"),
        cancel_url: std::env::var("STRIPE_CANCEL_URL").expect("STRIPE_CANCEL_URL is invalid"),
        request_timeout_secs: std::env::var("STRIPE_REQUEST_TIMEOUT")
            .unwrap_or_else(|_| "15".to_string())
            .parse()?,
    };

    let billing = Billing {
        subscriptions_enabled: std::env::var("SUBSCRIPTIONS_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse()?,
        expiry_sweep_interval_secs: std::env::var("EXPIRY_SWEEP_INTERVAL")
            .unwrap_or_else(|_| "3600".to_string())
            .parse()?,
        notification_endpoint: std::env::var("NOTIFICATION_ENDPOINT").ok(),
    };

    Ok(DotEnvyConfig {
        server,
        database,
        stripe,
        billing,
    })
}

pub fn get_jwt_secret() -> Result<String> {
    dotenvy::dotenv().ok();

    Ok(std::env::var("JWT_SECRET").expect("JWT_SECRET is invalid"))
}
