use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::application::usecases::{subscriptions::SubscriptionError, webhooks::WebhookError};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
}

// App-level error type for plumbing outside the usecases.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Internal(_) => {
                // Don't leak internal error detail to client
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        error_body(status, message)
    }
}

impl IntoResponse for SubscriptionError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status.is_server_error() {
            // Provider codes and storage detail stay in the logs and ledger.
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        error_body(status, message)
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status.is_server_error() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        error_body(status, message)
    }
}

fn error_body(status: StatusCode, message: String) -> Response {
    let body = Json(ErrorResponse {
        code: status.as_u16(),
        message,
    });

    (status, body).into_response()
}
