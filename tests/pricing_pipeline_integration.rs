//! End-to-end exercise of the pricing pipeline against an in-memory SQLite
//! database and stub upstream adapters, mirroring the role the teacher's
//! `backtest_run_integration.rs` plays as the crate's single top-level
//! integration test: everything else lives in per-module `#[cfg(test)]`.

use async_trait::async_trait;
use chrono::Utc;
use locate_pricing_engine::adapters::{AdapterError, UpstreamAdapter, UpstreamQuote};
use locate_pricing_engine::audit::AuditSink;
use locate_pricing_engine::cache::l2::InMemoryL2Store;
use locate_pricing_engine::cache::TwoTierCache;
use locate_pricing_engine::config::Config;
use locate_pricing_engine::db::Db;
use locate_pricing_engine::domain::{BrokerConfig, ClientIdentity, FeeType, QuoteSource};
use locate_pricing_engine::error::PricingError;
use locate_pricing_engine::orchestrator::Orchestrator;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

struct StubAdapter(rust_decimal::Decimal);

#[async_trait]
impl UpstreamAdapter for StubAdapter {
    fn name(&self) -> &'static str {
        "stub"
    }
    async fn fetch(&self, _ticker: &str) -> Result<UpstreamQuote, AdapterError> {
        Ok(UpstreamQuote {
            value: self.0,
            observed_at: Utc::now(),
        })
    }
}

fn build_orchestrator() -> Orchestrator {
    let db = Arc::new(Db::open(":memory:").expect("in-memory db"));
    db.upsert_broker_config(&BrokerConfig {
        client_id: "acme-desk".into(),
        markup_pct: dec!(0.05),
        fee_type: FeeType::Flat,
        fee_amount: dec!(25.00),
        active: true,
    })
    .expect("seed broker config");

    Orchestrator {
        cache: Arc::new(TwoTierCache::new(
            Arc::new(InMemoryL2Store::new()),
            256,
            Duration::from_millis(200),
        )),
        db: db.clone(),
        audit: Arc::new(AuditSink::new(
            db,
            "integration".into(),
            Duration::from_secs(1),
        )),
        config: Arc::new(Config::default()),
        borrow_rate_adapter: Arc::new(StubAdapter(dec!(0.05))),
        volatility_adapter: Arc::new(StubAdapter(dec!(20.0))),
        event_risk_adapter: Arc::new(StubAdapter(dec!(0))),
        environment: "integration".into(),
    }
}

#[tokio::test]
async fn full_pipeline_prices_and_chains_audit_records() {
    let orchestrator = build_orchestrator();
    let client = ClientIdentity("acme-desk".into());

    let (first, record_one) = orchestrator
        .price(&client, "AAPL", dec!(100000), 30)
        .await
        .expect("first calculation succeeds");
    assert_eq!(first.total_fee, dec!(550.0000));
    assert_eq!(first.source, QuoteSource::Live);
    assert_eq!(record_one.prev_hash, "GENESIS");

    let (second, record_two) = orchestrator
        .price(&client, "AAPL", dec!(100000), 30)
        .await
        .expect("second calculation hits the calculation cache");
    assert_eq!(second.total_fee, first.total_fee);
    assert_eq!(second.source, QuoteSource::Cached);
    assert_eq!(record_two.prev_hash, record_one.self_hash);
    assert_ne!(record_two.record_id, record_one.record_id);
}

#[tokio::test]
async fn unknown_client_never_reaches_the_audit_chain() {
    let orchestrator = build_orchestrator();
    let client = ClientIdentity("nobody-desk".into());

    let err = orchestrator
        .price(&client, "AAPL", dec!(100000), 30)
        .await
        .unwrap_err();
    assert!(matches!(err, PricingError::UnknownClient));
    assert_eq!(
        orchestrator.db.latest_audit_hash("integration").unwrap(),
        None
    );
}

#[tokio::test]
async fn rate_quote_route_resolves_independently_of_fee_calculation() {
    let orchestrator = build_orchestrator();
    let quote = orchestrator
        .rate_quote("AAPL")
        .await
        .expect("rate-only lookup succeeds");
    assert_eq!(quote.base_rate, dec!(0.05));
    assert_eq!(quote.source, QuoteSource::Live);
}
