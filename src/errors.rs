//! Application-wide error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Webhook signature did not match the request body.
    #[error("Webhook signature rejected")]
    Authenticity,

    /// The gateway reported a different amount than the order was created
    /// with. Never auto-corrected; left for manual reconciliation.
    #[error("Amount mismatch for {reference}: expected {expected}, gateway reported {actual}")]
    AmountMismatch {
        reference: String,
        expected: i64,
        actual: i64,
    },

    #[error("Order not found: {0}")]
    NotFound(String),

    #[error("Duplicate order reference: {0}")]
    DuplicateReference(String),

    #[error("Access token does not match this order")]
    InvalidToken,

    #[error("Access token has expired")]
    ExpiredToken,

    #[error("Order has not been confirmed as paid")]
    NotPaid,

    /// The payment gateway rejected a call or was unreachable.
    #[error("Payment gateway error: {0}")]
    Gateway(String),

    /// An outbound dispatch (attribution or notification) failed. Recorded
    /// on the order and retried by the sweeper; never customer-facing.
    #[error("Dispatch failed: {0}")]
    Dispatch(String),
}

pub type Result<T> = std::result::Result<T, CheckoutError>;

impl CheckoutError {
    /// Stable machine-readable code so clients can tell the token failure
    /// kinds (all 4xx) apart.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) | Self::Migrate(_) => "database",
            Self::Http(_) => "http",
            Self::Json(_) => "json",
            Self::Config(_) => "config",
            Self::Validation(_) => "validation",
            Self::Authenticity => "authenticity",
            Self::AmountMismatch { .. } => "amount_mismatch",
            Self::NotFound(_) => "not_found",
            Self::DuplicateReference(_) => "duplicate_reference",
            Self::InvalidToken => "invalid_token",
            Self::ExpiredToken => "expired_token",
            Self::NotPaid => "not_paid",
            Self::Gateway(_) => "gateway",
            Self::Dispatch(_) => "dispatch",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Authenticity => StatusCode::UNAUTHORIZED,
            Self::AmountMismatch { .. } => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::DuplicateReference(_) => StatusCode::CONFLICT,
            Self::InvalidToken | Self::ExpiredToken => StatusCode::FORBIDDEN,
            Self::NotPaid => StatusCode::CONFLICT,
            Self::Gateway(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CheckoutError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("{self}");
        }
        let body = serde_json::json!({
            "error": self.to_string(),
            "code": self.code(),
        });
        (status, Json(body)).into_response()
    }
}
