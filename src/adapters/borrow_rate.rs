use super::{AdapterError, HttpAdapter, UpstreamAdapter, UpstreamQuote};
use crate::config::Config;
use async_trait::async_trait;

pub struct BorrowRateAdapter {
    inner: HttpAdapter,
}

impl BorrowRateAdapter {
    pub fn new(base_url: String, config: &Config) -> Self {
        BorrowRateAdapter {
            inner: HttpAdapter::new("borrow_rate", base_url, config),
        }
    }
}

#[async_trait]
impl UpstreamAdapter for BorrowRateAdapter {
    fn name(&self) -> &'static str {
        "borrow_rate"
    }

    async fn fetch(&self, ticker: &str) -> Result<UpstreamQuote, AdapterError> {
        self.inner.fetch_with_retry(ticker).await
    }
}
