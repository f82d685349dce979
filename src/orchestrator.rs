//! Calculation orchestrator (C6): the pipeline's single public entry point.
//!
//! `price()` runs the seven-step sequence from the spec: validate, check the
//! calculation cache, resolve broker config, fan out to the three resolvers
//! in parallel, apply the formula kernel, write the calculation cache, and
//! emit the audit record before returning. The rate limiter (C5) sits in
//! front of this as axum middleware (see `middleware::rate_limit`), not
//! inside `price()` itself — by the time a request reaches here it has
//! already been admitted.

use crate::adapters::UpstreamAdapter;
use crate::audit::AuditSink;
use crate::cache::{cache_key, CacheKind, CacheRead, TwoTierCache};
use crate::config::Config;
use crate::db::Db;
use crate::domain::{
    AuditInputs, AuditRecord, AuditSources, BorrowRateQuote, CalculationResult, ClientIdentity,
    FallbackKind, QuoteSource,
};
use crate::error::PricingError;
use crate::kernel;
use crate::resolver::ResolverContext;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

pub struct Orchestrator {
    pub cache: Arc<TwoTierCache>,
    pub db: Arc<Db>,
    pub audit: Arc<AuditSink>,
    pub config: Arc<Config>,
    pub borrow_rate_adapter: Arc<dyn UpstreamAdapter>,
    pub volatility_adapter: Arc<dyn UpstreamAdapter>,
    pub event_risk_adapter: Arc<dyn UpstreamAdapter>,
    pub environment: String,
}

/// What the calculation cache stores: everything needed to replay an
/// identical audit record (§8 scenario 5 — a cache hit still emits one) plus
/// the result the handler returns.
#[derive(Clone, Serialize, Deserialize)]
struct CachedCalculation {
    result: CalculationResult,
    sources: AuditSources,
    fallbacks_used: HashSet<FallbackKind>,
}

fn resolver_ctx(o: &Orchestrator) -> ResolverContext {
    ResolverContext {
        cache: o.cache.clone(),
        db: o.db.clone(),
        config: o.config.clone(),
        environment: o.environment.clone(),
    }
}

fn valid_ticker(ticker: &str) -> bool {
    (1..=5).contains(&ticker.len()) && ticker.bytes().all(|b| b.is_ascii_uppercase())
}

fn valid_client_id(client_id: &str) -> bool {
    (3..=50).contains(&client_id.len())
        && client_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

fn validate(
    ticker: &str,
    position_value: Decimal,
    loan_days: u32,
    client_id: &str,
) -> Result<(), PricingError> {
    if !valid_ticker(ticker) {
        return Err(PricingError::InvalidInput(
            "ticker must match [A-Z]{1,5}".into(),
        ));
    }
    if !valid_client_id(client_id) {
        return Err(PricingError::InvalidInput(
            "client_id must match [A-Za-z0-9_-]{3,50}".into(),
        ));
    }
    if position_value < Decimal::ONE || position_value > Decimal::from(1_000_000_000i64) {
        return Err(PricingError::InvalidInput(
            "position_value must be in [1, 1000000000]".into(),
        ));
    }
    if loan_days < 1 || loan_days > 365 {
        return Err(PricingError::InvalidInput(
            "loan_days must be in [1, 365]".into(),
        ));
    }
    Ok(())
}

impl Orchestrator {
    pub async fn price(
        &self,
        client: &ClientIdentity,
        ticker: &str,
        position_value: Decimal,
        loan_days: u32,
    ) -> Result<(CalculationResult, AuditRecord), PricingError> {
        validate(ticker, position_value, loan_days, client.as_str())?;

        let calc_key = cache_key(
            &self.environment,
            CacheKind::Calculation,
            &format!(
                "{}:{}:{}:{}",
                ticker,
                client.as_str(),
                position_value,
                loan_days
            ),
        );

        if let CacheRead::Fresh(cached) = self.cache.get::<CachedCalculation>(&calc_key).await {
            let mut result = cached.result;
            result.source = QuoteSource::Cached;
            let record = self.emit_audit(
                &calc_key,
                client,
                ticker,
                position_value,
                loan_days,
                result.clone(),
                cached.sources,
                cached.fallbacks_used,
                false,
            )?;
            return Ok((result, record));
        }

        let resolver = resolver_ctx(self);
        let broker_config = resolver.resolve_broker_config(client.as_str()).await?;

        let deadline = self.config.request_deadline;
        let (rate, volatility, event) = match tokio::time::timeout(
            deadline,
            async {
                tokio::join!(
                    resolver.resolve_borrow_rate(ticker, self.borrow_rate_adapter.as_ref()),
                    resolver.resolve_volatility(ticker, self.volatility_adapter.as_ref()),
                    resolver.resolve_event_risk(ticker, self.event_risk_adapter.as_ref()),
                )
            },
        )
        .await
        {
            Ok(triple) => triple,
            Err(_) => return Err(PricingError::Cancelled),
        };

        if !self.config.enable_fallback {
            if let Some(kind) = [&rate.fallback, &volatility.fallback, &event.fallback]
                .into_iter()
                .flatten()
                .next()
            {
                tracing::warn!(?kind, "fallback disabled, surfacing upstream failure");
                return Err(PricingError::UpstreamUnavailable);
            }
        }

        let mut fallbacks_used: HashSet<FallbackKind> = HashSet::new();
        fallbacks_used.extend(rate.fallback);
        fallbacks_used.extend(volatility.fallback);
        fallbacks_used.extend(event.fallback);

        let min_borrow_rate = self.min_borrow_rate_floor(ticker).await;

        let adj = kernel::adjusted_rate(
            rate.value.base_rate,
            volatility.value.index,
            event.value.factor,
            min_borrow_rate,
            self.config.v_factor,
            self.config.e_factor,
        )?;

        let cost = kernel::borrow_cost(position_value, adj, loan_days)?;
        let (total, breakdown) = kernel::total_fee(
            cost,
            broker_config.markup_pct,
            broker_config.fee_type,
            broker_config.fee_amount,
            position_value,
        )?;

        let result = CalculationResult {
            total_fee: total,
            breakdown: breakdown.clone(),
            rate_used: adj,
            fallbacks_used: fallbacks_used.clone(),
            source: QuoteSource::Live,
        };

        let sources = AuditSources {
            borrow_rate: rate.value,
            volatility: volatility.value,
            event_risk: event.value,
        };

        let cached = CachedCalculation {
            result: result.clone(),
            sources: sources.clone(),
            fallbacks_used: fallbacks_used.clone(),
        };
        let _ = self
            .cache
            .put(&calc_key, &cached, self.config.ttl_calculation)
            .await;

        let record = self.emit_audit(
            &calc_key,
            client,
            ticker,
            position_value,
            loan_days,
            result.clone(),
            sources,
            fallbacks_used,
            true,
        )?;

        Ok((result, record))
    }

    /// Backs `GET /api/v1/rates/{ticker}`: runs the fallback ladder for the
    /// borrow-rate input alone, with no fee calculation and no audit record
    /// (the spec scopes that route to "the resolved borrow-rate quote
    /// only").
    pub async fn rate_quote(&self, ticker: &str) -> Result<BorrowRateQuote, PricingError> {
        if !valid_ticker(ticker) {
            return Err(PricingError::InvalidInput(
                "ticker must match [A-Z]{1,5}".into(),
            ));
        }
        let resolver = resolver_ctx(self);
        let resolved = tokio::time::timeout(
            self.config.request_deadline,
            resolver.resolve_borrow_rate(ticker, self.borrow_rate_adapter.as_ref()),
        )
        .await
        .map_err(|_| PricingError::Cancelled)?;
        Ok(resolved.value)
    }

    /// Per-security minimum borrow rate, cache-fronted (§4.4 step 5), falling
    /// through to the global floor when persistence has no override. The
    /// kernel clamps the adjusted rate to this floor regardless of whether
    /// the live quote already cleared it.
    async fn min_borrow_rate_floor(&self, ticker: &str) -> Decimal {
        let key = cache_key(&self.environment, CacheKind::MinRate, ticker);
        if let CacheRead::Fresh(rate) = self.cache.get::<Decimal>(&key).await {
            return rate;
        }
        match self.db.get_min_borrow_rate(ticker) {
            Ok(Some(rate)) => {
                let _ = self.cache.put(&key, &rate, self.config.ttl_min_rate).await;
                rate
            }
            _ => self.config.global_min_rate,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_audit(
        &self,
        calc_key: &str,
        client: &ClientIdentity,
        ticker: &str,
        position_value: Decimal,
        loan_days: u32,
        result: CalculationResult,
        sources: AuditSources,
        fallbacks_used: HashSet<FallbackKind>,
        rollback_cache_on_failure: bool,
    ) -> Result<AuditRecord, PricingError> {
        let inputs = AuditInputs {
            ticker: ticker.to_string(),
            client_id: client.as_str().to_string(),
            position_value,
            loan_days,
        };

        match self.audit.append(inputs, result, sources, fallbacks_used) {
            Ok(record) => Ok(record),
            Err(e) => {
                if rollback_cache_on_failure {
                    // The cache write already happened; a request that never
                    // gets an audit trail must not appear idempotent-cached
                    // on retry, so the calculation-cache entry is undone.
                    let cache = self.cache.clone();
                    let key = calc_key.to_string();
                    tokio::spawn(async move {
                        cache.invalidate(&key).await;
                    });
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{AdapterError, UpstreamQuote};
    use crate::cache::l2::InMemoryL2Store;
    use crate::domain::{BrokerConfig, FeeType};
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    struct FixedAdapter {
        value: Result<Decimal, AdapterError>,
    }

    #[async_trait]
    impl UpstreamAdapter for FixedAdapter {
        fn name(&self) -> &'static str {
            "fixed"
        }
        async fn fetch(&self, _ticker: &str) -> Result<UpstreamQuote, AdapterError> {
            self.value.map(|value| UpstreamQuote {
                value,
                observed_at: Utc::now(),
            })
        }
    }

    fn orchestrator(config: Config) -> Orchestrator {
        let db = Arc::new(Db::open(":memory:").unwrap());
        db.upsert_broker_config(&BrokerConfig {
            client_id: "client-1".into(),
            markup_pct: dec!(0.05),
            fee_type: FeeType::Flat,
            fee_amount: dec!(25.00),
            active: true,
        })
        .unwrap();

        Orchestrator {
            cache: Arc::new(TwoTierCache::new(
                Arc::new(InMemoryL2Store::new()),
                100,
                Duration::from_millis(200),
            )),
            db,
            audit: Arc::new(AuditSink::new(
                Arc::new(Db::open(":memory:").unwrap()),
                "test".into(),
                Duration::from_secs(1),
            )),
            config: Arc::new(config),
            borrow_rate_adapter: Arc::new(FixedAdapter { value: Ok(dec!(0.05)) }),
            volatility_adapter: Arc::new(FixedAdapter { value: Ok(dec!(20.0)) }),
            event_risk_adapter: Arc::new(FixedAdapter { value: Ok(dec!(0)) }),
            environment: "test".into(),
        }
    }

    #[tokio::test]
    async fn baseline_scenario_matches_spec() {
        let orch = orchestrator(Config::default());
        let client = ClientIdentity("client-1".into());
        let (result, record) = orch
            .price(&client, "AAPL", dec!(100000), 30)
            .await
            .unwrap();
        assert_eq!(result.total_fee, dec!(550.0000));
        assert_eq!(result.breakdown.borrow_cost, dec!(500.0000));
        assert_eq!(record.inputs.ticker, "AAPL");
        assert_eq!(record.prev_hash, "GENESIS");
    }

    #[tokio::test]
    async fn rejects_unknown_client() {
        let orch = orchestrator(Config::default());
        let client = ClientIdentity("ghost-client".into());
        let err = orch
            .price(&client, "AAPL", dec!(100000), 30)
            .await
            .unwrap_err();
        assert!(matches!(err, PricingError::UnknownClient));
    }

    #[tokio::test]
    async fn rejects_invalid_ticker_without_consuming_downstream_state() {
        let orch = orchestrator(Config::default());
        let client = ClientIdentity("client-1".into());
        let err = orch
            .price(&client, "TOOLONG", dec!(100000), 30)
            .await
            .unwrap_err();
        assert!(matches!(err, PricingError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn second_identical_call_is_idempotent_and_still_audited() {
        let orch = orchestrator(Config::default());
        let client = ClientIdentity("client-1".into());
        let (first, record_one) = orch
            .price(&client, "AAPL", dec!(100000), 30)
            .await
            .unwrap();
        let (second, record_two) = orch
            .price(&client, "AAPL", dec!(100000), 30)
            .await
            .unwrap();

        assert_eq!(first.total_fee, second.total_fee);
        assert_eq!(second.source, QuoteSource::Cached);
        assert_ne!(record_one.record_id, record_two.record_id);
    }

    #[tokio::test]
    async fn fallback_disabled_surfaces_upstream_unavailable() {
        let mut config = Config::default();
        config.enable_fallback = false;
        let mut orch = orchestrator(config);
        orch.borrow_rate_adapter = Arc::new(FixedAdapter {
            value: Err(AdapterError::UpstreamUnavailable),
        });
        let client = ClientIdentity("client-1".into());
        let err = orch
            .price(&client, "GME", dec!(100000), 30)
            .await
            .unwrap_err();
        assert!(matches!(err, PricingError::UpstreamUnavailable));
    }

    #[tokio::test]
    async fn fallback_ladder_scenario_matches_spec() {
        let db = Arc::new(Db::open(":memory:").unwrap());
        db.upsert_broker_config(&BrokerConfig {
            client_id: "client-1".into(),
            markup_pct: Decimal::ZERO,
            fee_type: FeeType::Flat,
            fee_amount: Decimal::ZERO,
            active: true,
        })
        .unwrap();
        db.upsert_min_borrow_rate("GME", dec!(0.30)).unwrap();

        let orch = Orchestrator {
            cache: Arc::new(TwoTierCache::new(
                Arc::new(InMemoryL2Store::new()),
                100,
                Duration::from_millis(200),
            )),
            db,
            audit: Arc::new(AuditSink::new(
                Arc::new(Db::open(":memory:").unwrap()),
                "test".into(),
                Duration::from_secs(1),
            )),
            config: Arc::new(Config::default()),
            borrow_rate_adapter: Arc::new(FixedAdapter {
                value: Err(AdapterError::UpstreamUnavailable),
            }),
            volatility_adapter: Arc::new(FixedAdapter { value: Ok(dec!(55.0)) }),
            event_risk_adapter: Arc::new(FixedAdapter { value: Ok(dec!(10)) }),
            environment: "test".into(),
        };

        let client = ClientIdentity("client-1".into());
        let (result, record) = orch
            .price(&client, "GME", dec!(100000), 30)
            .await
            .unwrap();
        assert!(result.fallbacks_used.contains(&FallbackKind::Rate));
        assert_eq!(record.sources.borrow_rate.source, QuoteSource::FallbackMin);
    }

    #[tokio::test]
    async fn rate_quote_resolves_without_emitting_audit() {
        let orch = orchestrator(Config::default());
        let quote = orch.rate_quote("AAPL").await.unwrap();
        assert_eq!(quote.base_rate, dec!(0.05));
        assert_eq!(
            orch.db.latest_audit_hash("test").unwrap(),
            None,
            "rate-only lookup must not touch the audit chain"
        );
    }

    #[tokio::test]
    async fn rate_quote_rejects_malformed_ticker() {
        let orch = orchestrator(Config::default());
        let err = orch.rate_quote("toolong123").await.unwrap_err();
        assert!(matches!(err, PricingError::InvalidInput(_)));
    }
}
