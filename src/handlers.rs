//! HTTP surface (C9, ambient): thin axum handlers translating the two
//! routes in §6.1 into calls against the orchestrator. Everything about
//! request parsing/validation beyond what the orchestrator itself
//! re-validates is deliberately minimal — the spec treats the HTTP layer as
//! an external collaborator, interface-only.

use crate::domain::{ClientIdentity, FeeBreakdown, QuoteSource};
use crate::error::PricingError;
use crate::orchestrator::Orchestrator;
use axum::extract::{Extension, Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

#[derive(Debug, Deserialize)]
pub struct CalculateLocateParams {
    pub ticker: String,
    pub position_value: Decimal,
    pub loan_days: u32,
    /// Carried for wire-schema compatibility with the request body the
    /// spec's HTTP surface describes. The identity that actually governs
    /// broker-config resolution, pricing, and the audit trail is the one
    /// `client_identity_middleware` resolved from `X-API-Key` and attached
    /// to the request as an `Extension<ClientIdentity>` — never this field.
    pub client_id: String,
}

#[derive(Serialize)]
struct CalculateLocateResponse {
    status: &'static str,
    total_fee: Decimal,
    breakdown: FeeBreakdown,
    borrow_rate_used: Decimal,
}

#[derive(Serialize)]
struct RateQuoteResponse {
    status: &'static str,
    ticker: String,
    borrow_rate: Decimal,
    source: QuoteSource,
    observed_at: DateTime<Utc>,
}

async fn run_calculate_locate(
    state: &AppState,
    client: &ClientIdentity,
    params: CalculateLocateParams,
) -> Result<Json<CalculateLocateResponse>, PricingError> {
    let (result, _record) = state
        .orchestrator
        .price(
            client,
            &params.ticker,
            params.position_value,
            params.loan_days,
        )
        .await?;

    Ok(Json(CalculateLocateResponse {
        status: "success",
        total_fee: result.total_fee,
        breakdown: result.breakdown,
        borrow_rate_used: result.rate_used,
    }))
}

/// `POST /api/v1/calculate-locate` with a JSON body. Pricing, broker-config
/// resolution, and the audit trail key off `client`, the identity
/// `client_identity_middleware` resolved from `X-API-Key` — not the
/// `client_id` field on the body.
pub async fn calculate_locate_post(
    State(state): State<AppState>,
    Extension(client): Extension<ClientIdentity>,
    Json(params): Json<CalculateLocateParams>,
) -> Result<Json<CalculateLocateResponse>, PricingError> {
    run_calculate_locate(&state, &client, params).await
}

/// `GET /api/v1/calculate-locate` with the same fields as query parameters.
pub async fn calculate_locate_get(
    State(state): State<AppState>,
    Extension(client): Extension<ClientIdentity>,
    Query(params): Query<CalculateLocateParams>,
) -> Result<Json<CalculateLocateResponse>, PricingError> {
    run_calculate_locate(&state, &client, params).await
}

/// `GET /api/v1/rates/{ticker}` — the resolved borrow-rate quote only.
pub async fn get_rate(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<Json<RateQuoteResponse>, PricingError> {
    let quote = state.orchestrator.rate_quote(&ticker).await?;
    Ok(Json(RateQuoteResponse {
        status: "success",
        ticker: quote.ticker,
        borrow_rate: quote.base_rate,
        source: quote.source,
        observed_at: quote.observed_at,
    }))
}
