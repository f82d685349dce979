//! Resolves the `X-API-Key` header into a `ClientIdentity` and inserts it
//! into request extensions. Key issuance/storage/rotation is explicitly out
//! of scope for this service: the pipeline only needs *something* keyed by
//! client identity, so the header value is trusted as-is. A real deployment
//! sits this behind an API gateway that performs the actual key resolution.

use crate::domain::ClientIdentity;
use axum::{body::Body, http::Request, middleware::Next, response::Response};

pub async fn client_identity_middleware(mut req: Request<Body>, next: Next) -> Response {
    if let Some(key) = req
        .headers()
        .get("X-API-Key")
        .and_then(|h| h.to_str().ok())
    {
        req.extensions_mut().insert(ClientIdentity(key.to_string()));
    }
    next.run(req).await
}
