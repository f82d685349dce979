//! Axum middleware wiring the token-bucket rate limiter (C5) in front of
//! the pricing handlers.

use crate::domain::ClientIdentity;
use crate::rate_limiter::RateLimiter;
use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
struct RateLimitBody {
    status: &'static str,
    error: &'static str,
    error_code: &'static str,
}

pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let client_id = req
        .extensions()
        .get::<ClientIdentity>()
        .map(|c| c.as_str().to_string());

    let Some(client_id) = client_id else {
        // No resolved identity yet (e.g. auth extractor runs later in the
        // stack for this route): let the request through for the handler
        // to reject with the appropriate error.
        return next.run(req).await;
    };

    let decision = limiter.allow(&client_id);
    if decision.allowed {
        next.run(req).await
    } else {
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(RateLimitBody {
                status: "error",
                error: "rate limit exceeded",
                error_code: "RATE_LIMIT_EXCEEDED",
            }),
        )
            .into_response();
        if let Ok(value) = decision.retry_after.as_secs().max(1).to_string().parse() {
            response.headers_mut().insert("Retry-After", value);
        }
        response
    }
}
