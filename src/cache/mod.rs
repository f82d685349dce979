//! Two-tier cache (C3): L1 (per-process) fronting L2 (shared), with keyed
//! TTLs, single-flight dedup, and an invalidation bus.

pub mod envelope;
pub mod invalidation;
pub mod l1;
pub mod l2;
pub mod single_flight;

use crate::error::PricingError;
use envelope::Envelope;
use invalidation::InvalidationBus;
use l1::L1Cache;
use l2::{L2Error, L2Store};
use serde::{de::DeserializeOwned, Serialize};
use single_flight::SingleFlight;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    BorrowRate,
    Volatility,
    EventRisk,
    BrokerConfig,
    Calculation,
    MinRate,
}

impl CacheKind {
    fn segment(&self) -> &'static str {
        match self {
            CacheKind::BorrowRate => "borrow_rate",
            CacheKind::Volatility => "volatility",
            CacheKind::EventRisk => "event_risk",
            CacheKind::BrokerConfig => "broker_config",
            CacheKind::Calculation => "calculation",
            CacheKind::MinRate => "min_rate",
        }
    }
}

pub fn cache_key(env: &str, kind: CacheKind, identifier: &str) -> String {
    format!("{env}:{}:{identifier}", kind.segment())
}

pub struct TwoTierCache {
    l1: L1Cache,
    l2: Arc<dyn L2Store>,
    bus: InvalidationBus,
    single_flight: SingleFlight,
    deadline: Duration,
}

pub enum CacheRead<V> {
    Fresh(V),
    Miss,
}

impl TwoTierCache {
    /// `deadline` bounds every L2 round trip (§5: "cache operations 200
    /// ms"). A timed-out L2 call degrades to L1-only exactly like
    /// `L2Error::Unavailable` — the store being slow and the store being
    /// down look the same from here.
    pub fn new(l2: Arc<dyn L2Store>, l1_max_entries: usize, deadline: Duration) -> Self {
        TwoTierCache {
            l1: L1Cache::new(l1_max_entries),
            l2,
            bus: InvalidationBus::new(),
            single_flight: SingleFlight::new(),
            deadline,
        }
    }

    pub fn single_flight(&self) -> &SingleFlight {
        &self.single_flight
    }

    /// L1 -> L2 -> miss. Promotes an L2 hit into L1.
    pub async fn get<V: DeserializeOwned>(&self, key: &str) -> CacheRead<V> {
        if let Some(envelope) = self.l1.get(key) {
            if let Some(value) = envelope.decode() {
                return CacheRead::Fresh(value);
            }
        }

        let outcome = match tokio::time::timeout(self.deadline, self.l2.get(key)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(key, "L2 read exceeded deadline, degrading to L1-only");
                metrics::counter!("cache_deadline_exceeded_total").increment(1);
                return CacheRead::Miss;
            }
        };

        match outcome {
            Ok(Some(envelope)) => {
                self.l1.put(key, envelope.clone());
                match envelope.decode() {
                    Some(value) => CacheRead::Fresh(value),
                    None => CacheRead::Miss,
                }
            }
            Ok(None) => CacheRead::Miss,
            Err(L2Error::Unavailable) => {
                tracing::warn!("L2 unavailable, degrading to L1-only");
                metrics::counter!("cache_store_unavailable_total").increment(1);
                CacheRead::Miss
            }
        }
    }

    /// L2 first, then L1, per the write ordering in the spec.
    pub async fn put<V: Serialize>(
        &self,
        key: &str,
        value: &V,
        ttl: Duration,
    ) -> Result<(), PricingError> {
        let envelope = Envelope::new(value, ttl);
        match tokio::time::timeout(self.deadline, self.l2.set(key, envelope.clone())).await {
            Ok(Ok(())) => {}
            Ok(Err(L2Error::Unavailable)) => {
                tracing::warn!(key, "L2 write failed, continuing with L1-only");
                metrics::counter!("cache_store_unavailable_total").increment(1);
            }
            Err(_) => {
                tracing::warn!(key, "L2 write exceeded deadline, continuing with L1-only");
                metrics::counter!("cache_deadline_exceeded_total").increment(1);
            }
        }
        self.l1.put(key, envelope);
        Ok(())
    }

    /// Most recently expired value, used only by the fallback ladder.
    pub async fn get_stale<V: DeserializeOwned>(&self, key: &str) -> Option<V> {
        match tokio::time::timeout(self.deadline, self.l2.get_stale(key)).await {
            Ok(Ok(Some(envelope))) => envelope.decode(),
            _ => None,
        }
    }

    pub async fn invalidate(&self, key: &str) {
        self.l1.invalidate(key);
        let _ = self.l2.invalidate(key).await;
        self.bus.publish(key);
    }

    pub fn subscribe_invalidations(&self) -> tokio::sync::broadcast::Receiver<invalidation::InvalidationEvent> {
        self.bus.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use l2::InMemoryL2Store;

    fn test_cache() -> TwoTierCache {
        TwoTierCache::new(
            Arc::new(InMemoryL2Store::new()),
            100,
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn read_your_writes_within_process() {
        let cache = test_cache();
        let key = cache_key("test", CacheKind::BorrowRate, "AAPL");
        cache.put(&key, &"value".to_string(), Duration::from_secs(60)).await.unwrap();
        let read: CacheRead<String> = cache.get(&key).await;
        match read {
            CacheRead::Fresh(v) => assert_eq!(v, "value"),
            CacheRead::Miss => panic!("expected fresh read"),
        }
    }

    #[tokio::test]
    async fn miss_when_absent() {
        let cache = test_cache();
        let read: CacheRead<String> = cache.get("missing").await;
        assert!(matches!(read, CacheRead::Miss));
    }
}
