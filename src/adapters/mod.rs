//! Upstream adapters (C2): typed HTTP clients for borrow-rate, volatility,
//! and event-risk providers, each wrapped in a circuit breaker with
//! retry+jitter.

pub mod borrow_rate;
pub mod circuit_breaker;
pub mod event_risk;
pub mod volatility;

use crate::config::Config;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use circuit_breaker::CircuitBreaker;
use rand::Rng;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterError {
    /// Breaker open or a terminal (non-retryable) upstream failure.
    UpstreamUnavailable,
    UpstreamTimeout,
    /// Missing/unknown required fields in the response body.
    ProtocolError,
}

#[derive(Debug, Deserialize)]
pub struct UpstreamQuote {
    pub value: Decimal,
    pub observed_at: DateTime<Utc>,
}

#[async_trait]
pub trait UpstreamAdapter: Send + Sync {
    fn name(&self) -> &'static str;
    async fn fetch(&self, ticker: &str) -> Result<UpstreamQuote, AdapterError>;
}

/// Shared execution machinery: circuit breaker gate, retry with full-jitter
/// exponential backoff, and per-attempt timeout. Concrete adapters provide
/// only the URL-building and response-shape logic via `UpstreamAdapter`.
pub struct HttpAdapter {
    pub client: reqwest::Client,
    pub base_url: String,
    pub breaker: Arc<CircuitBreaker>,
    pub retry_attempts: u32,
    pub base_backoff: Duration,
    pub timeout: Duration,
    pub name: &'static str,
}

impl HttpAdapter {
    pub fn new(name: &'static str, base_url: String, config: &Config) -> Self {
        HttpAdapter {
            client: reqwest::Client::new(),
            base_url,
            breaker: Arc::new(CircuitBreaker::new(
                name,
                config.breaker_failure_threshold,
                config.breaker_success_threshold,
                config.breaker_recovery_timeout,
            )),
            retry_attempts: config.upstream_retry_attempts,
            base_backoff: config.upstream_base_backoff,
            timeout: config.upstream_deadline,
            name,
        }
    }

    /// Executes `GET {base_url}/{ticker}`, parsing an `UpstreamQuote`.
    /// Retries transport errors and 5xx with full-jitter backoff; 4xx is
    /// terminal. Never retries once the caller's deadline is exceeded.
    pub async fn fetch_with_retry(&self, ticker: &str) -> Result<UpstreamQuote, AdapterError> {
        if !self.breaker.allow_request() {
            metrics::counter!("adapter_breaker_rejections_total", "adapter" => self.name).increment(1);
            return Err(AdapterError::UpstreamUnavailable);
        }

        let url = format!("{}/{}", self.base_url, ticker);
        let mut backoff = self.base_backoff;
        let mut last_err = AdapterError::UpstreamUnavailable;

        for attempt in 0..=self.retry_attempts {
            let started = std::time::Instant::now();
            let outcome = tokio::time::timeout(self.timeout, self.client.get(&url).send()).await;
            let elapsed = started.elapsed();
            metrics::histogram!("adapter_request_duration_seconds", elapsed.as_secs_f64(), "adapter" => self.name);

            match outcome {
                Ok(Ok(response)) => {
                    let status = response.status();
                    if status.is_success() {
                        match response.json::<UpstreamQuote>().await {
                            Ok(quote) => {
                                self.breaker.record_success();
                                metrics::counter!("adapter_success_total", "adapter" => self.name).increment(1);
                                return Ok(quote);
                            }
                            Err(_) => {
                                // malformed/missing fields: terminal, no retry
                                self.breaker.record_failure();
                                metrics::counter!("adapter_failure_total", "adapter" => self.name).increment(1);
                                return Err(AdapterError::ProtocolError);
                            }
                        }
                    } else if status.is_client_error() {
                        self.breaker.record_failure();
                        metrics::counter!("adapter_failure_total", "adapter" => self.name).increment(1);
                        return Err(AdapterError::UpstreamUnavailable);
                    } else {
                        tracing::warn!(adapter = self.name, %status, attempt, "upstream 5xx, retrying");
                        last_err = AdapterError::UpstreamUnavailable;
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!(adapter = self.name, error = %e, attempt, "transport error, retrying");
                    last_err = AdapterError::UpstreamUnavailable;
                }
                Err(_) => {
                    tracing::warn!(adapter = self.name, attempt, "request timed out");
                    last_err = AdapterError::UpstreamTimeout;
                }
            }

            if attempt < self.retry_attempts {
                let jittered = full_jitter(backoff);
                tokio::time::sleep(jittered).await;
                backoff = (backoff * 2).min(Duration::from_secs(30));
            }
        }

        self.breaker.record_failure();
        metrics::counter!("adapter_failure_total", "adapter" => self.name).increment(1);
        Err(last_err)
    }
}

fn full_jitter(backoff: Duration) -> Duration {
    let max_millis = backoff.as_millis().max(1) as u64;
    let jittered = rand::thread_rng().gen_range(0..=max_millis);
    Duration::from_millis(jittered)
}
