use super::{AdapterError, HttpAdapter, UpstreamAdapter, UpstreamQuote};
use crate::config::Config;
use async_trait::async_trait;

pub struct EventRiskAdapter {
    inner: HttpAdapter,
}

impl EventRiskAdapter {
    pub fn new(base_url: String, config: &Config) -> Self {
        EventRiskAdapter {
            inner: HttpAdapter::new("event_risk", base_url, config),
        }
    }
}

#[async_trait]
impl UpstreamAdapter for EventRiskAdapter {
    fn name(&self) -> &'static str {
        "event_risk"
    }

    async fn fetch(&self, ticker: &str) -> Result<UpstreamQuote, AdapterError> {
        self.inner.fetch_with_retry(ticker).await
    }
}
