//! Audit sink (C7): append-only, hash-chained record writer.
//!
//! `self_hash = SHA-256(prev_hash || canonical_json(record_without_self_hash))`.
//! Writes are synchronous within the request: a record is durable in the
//! SQLite store before `Price` (see `orchestrator`) returns successfully.

use crate::db::Db;
use crate::domain::{AuditInputs, AuditRecord, AuditSources, CalculationResult, FallbackKind};
use crate::error::PricingError;
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const GENESIS_HASH: &str = "GENESIS";

#[derive(Serialize)]
struct HashableRecord<'a> {
    record_id: i64,
    partition: &'a str,
    timestamp: String,
    inputs: &'a AuditInputs,
    result: &'a CalculationResult,
    sources: &'a AuditSources,
    fallbacks_used: &'a HashSet<FallbackKind>,
    prev_hash: &'a str,
}

pub struct AuditSink {
    db: Arc<Db>,
    partition: String,
    lock_deadline: Duration,
}

impl AuditSink {
    pub fn new(db: Arc<Db>, partition: String, lock_deadline: Duration) -> Self {
        AuditSink {
            db,
            partition,
            lock_deadline,
        }
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Computes the canonical JSON of `record` (everything but `self_hash`),
    /// sorted by field name — `serde_json`'s default `Map` is a `BTreeMap`
    /// (no `preserve_order` feature enabled), so key order is deterministic
    /// for free.
    fn canonical_json(hashable: &HashableRecord) -> String {
        serde_json::to_string(hashable).expect("audit record must serialize")
    }

    pub fn append(
        &self,
        inputs: AuditInputs,
        result: CalculationResult,
        sources: AuditSources,
        fallbacks_used: HashSet<FallbackKind>,
    ) -> Result<AuditRecord, PricingError> {
        let timestamp = Utc::now();
        let timestamp_str = timestamp.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true);

        // Record-id allocation, chain-head read, and the insert all happen
        // under one lock acquisition in `append_audit_record` so concurrent
        // requests in the same partition can't observe the same
        // `(record_id, prev_hash)` pair — see its doc comment.
        let (record_id, prev_hash, self_hash) = self
            .db
            .append_audit_record(&self.partition, self.lock_deadline, |record_id, prev_hash| {
                let hashable = HashableRecord {
                    record_id,
                    partition: &self.partition,
                    timestamp: timestamp_str.clone(),
                    inputs: &inputs,
                    result: &result,
                    sources: &sources,
                    fallbacks_used: &fallbacks_used,
                    prev_hash,
                };
                let canonical = Self::canonical_json(&hashable);

                let mut hasher = Sha256::new();
                hasher.update(prev_hash.as_bytes());
                hasher.update(canonical.as_bytes());
                let self_hash = hex::encode(hasher.finalize());

                Ok((timestamp_str.clone(), self_hash, canonical))
            })
            .map_err(|_| PricingError::AuditFailure)?;

        Ok(AuditRecord {
            record_id,
            partition: self.partition.clone(),
            timestamp,
            inputs,
            result,
            sources,
            fallbacks_used,
            prev_hash,
            self_hash,
        })
    }
}

/// Recomputes `SHA-256(prev_hash || canonical(record_i))` for a sequence of
/// records and checks it against each stored `self_hash`. Used by the audit
/// chain conformance test (spec scenario 6) and by an operator-triggered
/// integrity sweep.
pub fn verify_chain(records: &[AuditRecord]) -> Result<(), usize> {
    for (i, record) in records.iter().enumerate() {
        let hashable = HashableRecord {
            record_id: record.record_id,
            partition: &record.partition,
            timestamp: record.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true),
            inputs: &record.inputs,
            result: &record.result,
            sources: &record.sources,
            fallbacks_used: &record.fallbacks_used,
            prev_hash: &record.prev_hash,
        };
        let canonical = AuditSink::canonical_json(&hashable);
        let mut hasher = Sha256::new();
        hasher.update(record.prev_hash.as_bytes());
        hasher.update(canonical.as_bytes());
        let expected = hex::encode(hasher.finalize());
        if expected != record.self_hash {
            return Err(i);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        BorrowRateQuote, EventRisk, FeeBreakdown, QuoteSource, VolatilityMetric,
    };
    use rust_decimal::Decimal;

    fn sample_sources() -> AuditSources {
        let now = Utc::now();
        AuditSources {
            borrow_rate: BorrowRateQuote {
                ticker: "AAPL".into(),
                base_rate: Decimal::new(5, 2),
                observed_at: now,
                source: QuoteSource::Live,
            },
            volatility: VolatilityMetric {
                ticker: "AAPL".into(),
                index: Decimal::new(20, 0),
                observed_at: now,
                source: QuoteSource::Live,
            },
            event_risk: EventRisk {
                ticker: "AAPL".into(),
                factor: Decimal::ZERO,
                observed_at: now,
                source: QuoteSource::FallbackDefault,
            },
        }
    }

    fn sample_result() -> CalculationResult {
        CalculationResult {
            total_fee: Decimal::new(55000, 2),
            breakdown: FeeBreakdown {
                borrow_cost: Decimal::new(50000, 2),
                markup: Decimal::new(2500, 2),
                transaction_fees: Decimal::new(2500, 2),
            },
            rate_used: Decimal::new(6, 2),
            fallbacks_used: HashSet::new(),
            source: QuoteSource::Live,
        }
    }

    #[test]
    fn chain_verifies_after_sequential_appends() {
        let db = Arc::new(Db::open(":memory:").unwrap());
        let sink = AuditSink::new(db, "prod".into(), Duration::from_secs(1));
        let mut records = vec![];
        for _ in 0..5 {
            let record = sink
                .append(
                    AuditInputs {
                        ticker: "AAPL".into(),
                        client_id: "client-1".into(),
                        position_value: Decimal::new(10000000, 2),
                        loan_days: 30,
                    },
                    sample_result(),
                    sample_sources(),
                    HashSet::new(),
                )
                .unwrap();
            records.push(record);
        }
        assert!(verify_chain(&records).is_ok());
        assert_eq!(records[0].prev_hash, GENESIS_HASH);
        assert_eq!(records[1].prev_hash, records[0].self_hash);
    }

    #[test]
    fn tampered_record_breaks_verification() {
        let db = Arc::new(Db::open(":memory:").unwrap());
        let sink = AuditSink::new(db, "prod".into(), Duration::from_secs(1));
        let mut record = sink
            .append(
                AuditInputs {
                    ticker: "AAPL".into(),
                    client_id: "client-1".into(),
                    position_value: Decimal::new(10000000, 2),
                    loan_days: 30,
                },
                sample_result(),
                sample_sources(),
                HashSet::new(),
            )
            .unwrap();
        record.self_hash = "tampered".into();
        assert!(verify_chain(&[record]).is_err());
    }
}
