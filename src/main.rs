//! Securities-lending locate pricing service.
//!
//! Wires the pipeline components (cache, adapters, resolver, rate limiter,
//! audit sink) into an `Orchestrator`, then exposes it behind the two axum
//! routes described in the HTTP surface: `POST/GET /api/v1/calculate-locate`
//! and `GET /api/v1/rates/{ticker}`.

use anyhow::{Context, Result};
use axum::{middleware as axum_mw, routing::get, Router};
use locate_pricing_engine::adapters::borrow_rate::BorrowRateAdapter;
use locate_pricing_engine::adapters::event_risk::EventRiskAdapter;
use locate_pricing_engine::adapters::volatility::VolatilityAdapter;
use locate_pricing_engine::adapters::UpstreamAdapter;
use locate_pricing_engine::audit::AuditSink;
use locate_pricing_engine::cache::l2::InMemoryL2Store;
use locate_pricing_engine::cache::TwoTierCache;
use locate_pricing_engine::config::Config;
use locate_pricing_engine::db::Db;
use locate_pricing_engine::handlers::{self, AppState};
use locate_pricing_engine::middleware::{client_identity_middleware, rate_limit_middleware};
use locate_pricing_engine::orchestrator::Orchestrator;
use locate_pricing_engine::rate_limiter::{RateLimitParams, RateLimiter};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();

    let config = Arc::new(Config::from_env());
    info!(
        environment = %config.environment,
        port = config.port,
        "starting locate pricing engine"
    );

    let db = Arc::new(Db::open(&config.database_path).context("opening pricing database")?);
    let cache = Arc::new(TwoTierCache::new(
        Arc::new(InMemoryL2Store::new()),
        config.l1_max_entries,
        config.cache_deadline,
    ));
    let audit = Arc::new(AuditSink::new(
        db.clone(),
        config.environment.clone(),
        config.audit_deadline,
    ));

    let borrow_rate_adapter: Arc<dyn UpstreamAdapter> = Arc::new(BorrowRateAdapter::new(
        config.borrow_rate_base_url.clone(),
        &config,
    ));
    let volatility_adapter: Arc<dyn UpstreamAdapter> = Arc::new(VolatilityAdapter::new(
        config.volatility_base_url.clone(),
        &config,
    ));
    let event_risk_adapter: Arc<dyn UpstreamAdapter> = Arc::new(EventRiskAdapter::new(
        config.event_risk_base_url.clone(),
        &config,
    ));

    let orchestrator = Arc::new(Orchestrator {
        cache,
        db,
        audit,
        config: config.clone(),
        borrow_rate_adapter,
        volatility_adapter,
        event_risk_adapter,
        environment: config.environment.clone(),
    });

    let rate_limiter = Arc::new(RateLimiter::new(
        RateLimitParams {
            capacity: config.rate_limit_default_capacity as f64,
            refill_per_second: config.rate_limit_default_refill as f64,
            burst_allowance: config.rate_limit_default_burst as f64,
        },
        config.rate_limiter_deadline,
    ));

    let app_state = AppState { orchestrator };

    let app = Router::new()
        .route(
            "/api/v1/calculate-locate",
            get(handlers::calculate_locate_get).post(handlers::calculate_locate_post),
        )
        .route("/api/v1/rates/:ticker", get(handlers::get_rate))
        .route_layer(axum_mw::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ))
        .layer(axum_mw::from_fn(client_identity_middleware))
        .with_state(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.bind_addr, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "pricing engine listening");
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "locate_pricing_engine=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Installs the Prometheus recorder the `metrics::counter!`/`histogram!`
/// call sites throughout the pipeline feed. Exposed at `/metrics` on its
/// own listener (default `0.0.0.0:9090`) rather than on the service's own
/// router, so a scraper outage never shares a port with request traffic.
fn init_metrics() {
    if let Err(e) = PrometheusBuilder::new().install() {
        tracing::warn!(error = %e, "failed to install prometheus metrics exporter");
    }
}
