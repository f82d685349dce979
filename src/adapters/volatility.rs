use super::{AdapterError, HttpAdapter, UpstreamAdapter, UpstreamQuote};
use crate::config::Config;
use async_trait::async_trait;

pub struct VolatilityAdapter {
    inner: HttpAdapter,
}

impl VolatilityAdapter {
    pub fn new(base_url: String, config: &Config) -> Self {
        VolatilityAdapter {
            inner: HttpAdapter::new("volatility", base_url, config),
        }
    }
}

#[async_trait]
impl UpstreamAdapter for VolatilityAdapter {
    fn name(&self) -> &'static str {
        "volatility"
    }

    async fn fetch(&self, ticker: &str) -> Result<UpstreamQuote, AdapterError> {
        self.inner.fetch_with_retry(ticker).await
    }
}
