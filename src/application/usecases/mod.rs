pub mod subscriptions;
pub mod usage_limits;
pub mod webhooks;
