pub mod subscriptions;
pub mod usage;
pub mod webhooks;
