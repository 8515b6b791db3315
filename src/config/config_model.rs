#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub server: Server,
    pub database: Database,
    pub stripe: Stripe,
    pub billing: Billing,
}

#[derive(Debug, Clone)]
pub struct Server {
    pub port: u16,
    pub body_limit: u64,
    pub timeout: u64,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct Stripe {
    pub secret_key: String,
    pub webhook_secret: String,
    pub success_url: String,
    pub cancel_url: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct Billing {
    /// Constructed replacement for a runtime "plans disabled" flag: read once
    /// at startup and passed into the service.
    pub subscriptions_enabled: bool,
    pub expiry_sweep_interval_secs: u64,
    pub notification_endpoint: Option<String>,
}
