//! Closed error taxonomy for the pricing pipeline.
//!
//! Every operation on the request path returns `Result<_, PricingError>`.
//! Infrastructure-level setup (DB connection, config loading) uses
//! `anyhow::Result` instead, since those failures have no place in the
//! request-facing taxonomy.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum PricingError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unknown client")]
    UnknownClient,

    #[error("unknown ticker")]
    UnknownTicker,

    #[error("rate limit exceeded")]
    RateLimitExceeded { retry_after: Duration },

    #[error("upstream unavailable")]
    UpstreamUnavailable,

    #[error("upstream timeout")]
    UpstreamTimeout,

    #[error("cache store unavailable")]
    CacheStoreUnavailable,

    #[error("audit failure")]
    AuditFailure,

    #[error("request cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    InternalError(String),
}

impl PricingError {
    pub fn error_code(&self) -> &'static str {
        match self {
            PricingError::InvalidInput(_) => "INVALID_PARAMETER",
            PricingError::UnknownTicker => "TICKER_NOT_FOUND",
            PricingError::UnknownClient => "CLIENT_NOT_FOUND",
            PricingError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            PricingError::UpstreamUnavailable | PricingError::UpstreamTimeout => {
                "UPSTREAM_UNAVAILABLE"
            }
            PricingError::CacheStoreUnavailable => "UPSTREAM_UNAVAILABLE",
            PricingError::AuditFailure => "INTERNAL_ERROR",
            PricingError::Cancelled => "INTERNAL_ERROR",
            PricingError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            PricingError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            PricingError::UnknownClient | PricingError::UnknownTicker => StatusCode::NOT_FOUND,
            PricingError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            PricingError::UpstreamUnavailable
            | PricingError::UpstreamTimeout
            | PricingError::CacheStoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            PricingError::AuditFailure => StatusCode::INTERNAL_SERVER_ERROR,
            PricingError::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
            PricingError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    status: &'static str,
    error: String,
    error_code: &'static str,
}

impl IntoResponse for PricingError {
    fn into_response(self) -> Response {
        match &self {
            PricingError::UpstreamUnavailable
            | PricingError::UpstreamTimeout
            | PricingError::CacheStoreUnavailable => {
                tracing::warn!(error = %self, "recovered error surfaced");
            }
            PricingError::AuditFailure | PricingError::InternalError(_) => {
                tracing::error!(error = %self, "fatal error");
            }
            _ => {
                tracing::info!(error = %self, "request rejected");
            }
        }

        let status = self.status();
        let error_code = self.error_code();
        let mut response = (
            status,
            Json(ErrorBody {
                status: "error",
                error: self.to_string(),
                error_code,
            }),
        )
            .into_response();

        if let PricingError::RateLimitExceeded { retry_after } = self {
            if let Ok(value) = retry_after.as_secs().max(1).to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }

        response
    }
}
