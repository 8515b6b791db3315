pub mod axum_http;
pub mod jobs;
pub mod notifications;
pub mod payments;
pub mod postgres;
