//! Middleware: client-identity extraction and rate limiting.

pub mod client_identity;
pub mod rate_limit;

pub use client_identity::client_identity_middleware;
pub use rate_limit::rate_limit_middleware;
