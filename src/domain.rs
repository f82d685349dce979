//! Core entities from the data model: reference data, upstream quotes,
//! calculation results, and the audit record.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Identity resolved upstream of the pipeline from an `X-API-Key` header.
/// The pipeline never sees the raw key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientIdentity(pub String);

impl ClientIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LendStatus {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Security {
    pub ticker: String,
    pub lend_status: LendStatus,
    pub min_borrow_rate: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FeeType {
    Flat,
    Percentage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub client_id: String,
    pub markup_pct: Decimal,
    pub fee_type: FeeType,
    pub fee_amount: Decimal,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QuoteSource {
    Live,
    Cached,
    CachedStale,
    FallbackMin,
    FallbackDefault,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BorrowRateQuote {
    pub ticker: String,
    pub base_rate: Decimal,
    pub observed_at: DateTime<Utc>,
    pub source: QuoteSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityMetric {
    pub ticker: String,
    pub index: Decimal,
    pub observed_at: DateTime<Utc>,
    pub source: QuoteSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRisk {
    pub ticker: String,
    pub factor: Decimal,
    pub observed_at: DateTime<Utc>,
    pub source: QuoteSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackKind {
    Rate,
    Volatility,
    Event,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub borrow_cost: Decimal,
    pub markup: Decimal,
    pub transaction_fees: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculationResult {
    pub total_fee: Decimal,
    pub breakdown: FeeBreakdown,
    pub rate_used: Decimal,
    pub fallbacks_used: HashSet<FallbackKind>,
    pub source: QuoteSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditInputs {
    pub ticker: String,
    pub client_id: String,
    pub position_value: Decimal,
    pub loan_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSources {
    pub borrow_rate: BorrowRateQuote,
    pub volatility: VolatilityMetric,
    pub event_risk: EventRisk,
}

/// Append-only record. `self_hash` is computed over every other field, so it
/// is serialized last and recomputed from `canonical_json` on verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub record_id: i64,
    pub partition: String,
    pub timestamp: DateTime<Utc>,
    pub inputs: AuditInputs,
    pub result: CalculationResult,
    pub sources: AuditSources,
    pub fallbacks_used: HashSet<FallbackKind>,
    pub prev_hash: String,
    pub self_hash: String,
}

#[derive(Debug, Clone)]
pub struct RateBucket {
    pub client_id: String,
    pub tokens: f64,
    pub capacity: f64,
    pub refill_rate: f64,
    pub last_refill: DateTime<Utc>,
}
