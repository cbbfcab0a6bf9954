use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use types::errors::{LedgerError, MarketError};

/// Central error type for the Gateway application
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Market(#[from] MarketError),

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            AppError::RateLimitExceeded(_) => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT_EXCEEDED"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::InternalError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            AppError::Market(err) => match err {
                MarketError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
                MarketError::InsufficientFunds { .. } => (StatusCode::PAYMENT_REQUIRED, "INSUFFICIENT_FUNDS"),
                MarketError::CityNotOwned { .. } => (StatusCode::FORBIDDEN, "CITY_NOT_OWNED"),
                MarketError::NotOwner { .. } => (StatusCode::FORBIDDEN, "NOT_OWNER"),
                MarketError::InvalidState { .. } => (StatusCode::CONFLICT, "INVALID_STATE"),
                MarketError::OrderNotFound { .. } => (StatusCode::NOT_FOUND, "ORDER_NOT_FOUND"),
                MarketError::OrderUnavailable { .. } => (StatusCode::NOT_FOUND, "ORDER_UNAVAILABLE"),
                MarketError::OrderAlreadyFilled { .. } => (StatusCode::CONFLICT, "ORDER_ALREADY_FILLED"),
                MarketError::SelfTrade => (StatusCode::BAD_REQUEST, "SELF_TRADE"),
                MarketError::ConcurrencyConflict { .. } => (StatusCode::CONFLICT, "CONCURRENCY_CONFLICT"),
                MarketError::Ledger(LedgerError::VersionConflict { .. }) => {
                    (StatusCode::CONFLICT, "CONCURRENCY_CONFLICT")
                }
                MarketError::Ledger(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
                MarketError::Journal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": code,
            "message": message
        }));

        (status, body).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}
