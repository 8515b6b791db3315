pub mod billing_cycles;
pub mod billing_models;
pub mod change_actors;
pub mod history_actions;
pub mod subscription_statuses;
pub mod transaction_statuses;
