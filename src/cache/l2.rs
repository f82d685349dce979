//! L2: shared key-value tier. No distributed-cache crate (redis/dashmap/
//! moka) appears anywhere in the reference corpus this service was built
//! against, so the shared tier is expressed as a trait — `L2Store` — with a
//! process-local implementation behind it, matching the `PricingCache`
//! idiom of an `Arc<RwLock<...>>` guarding shared state. A networked
//! implementation can be swapped in behind the same trait without touching
//! the resolver or cache-facade code.

use super::envelope::Envelope;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L2Error {
    Unavailable,
}

#[async_trait]
pub trait L2Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Envelope>, L2Error>;
    async fn set(&self, key: &str, envelope: Envelope) -> Result<(), L2Error>;
    /// Most recently expired value for `key`, if any is retained.
    async fn get_stale(&self, key: &str) -> Result<Option<Envelope>, L2Error>;
    async fn invalidate(&self, key: &str) -> Result<(), L2Error>;
}

#[derive(Default)]
struct Slot {
    current: Option<Envelope>,
    last_expired: Option<Envelope>,
}

pub struct InMemoryL2Store {
    data: Arc<RwLock<HashMap<String, Slot>>>,
}

impl InMemoryL2Store {
    pub fn new() -> Self {
        InMemoryL2Store {
            data: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryL2Store {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl L2Store for InMemoryL2Store {
    async fn get(&self, key: &str) -> Result<Option<Envelope>, L2Error> {
        let mut data = self.data.write().await;
        let now = chrono::Utc::now();
        if let Some(slot) = data.get_mut(key) {
            if let Some(envelope) = &slot.current {
                if envelope.is_fresh(now) {
                    return Ok(Some(envelope.clone()));
                }
                // Expired on read: demote to the stale slot so GetStale can
                // still serve the fallback ladder.
                slot.last_expired = slot.current.take();
            }
        }
        Ok(None)
    }

    async fn set(&self, key: &str, envelope: Envelope) -> Result<(), L2Error> {
        let mut data = self.data.write().await;
        let slot = data.entry(key.to_string()).or_default();
        slot.current = Some(envelope);
        Ok(())
    }

    async fn get_stale(&self, key: &str) -> Result<Option<Envelope>, L2Error> {
        let data = self.data.read().await;
        Ok(data
            .get(key)
            .and_then(|slot| slot.current.clone().or_else(|| slot.last_expired.clone())))
    }

    async fn invalidate(&self, key: &str) -> Result<(), L2Error> {
        let mut data = self.data.write().await;
        if let Some(slot) = data.get_mut(key) {
            slot.last_expired = slot.current.take().or_else(|| slot.last_expired.take());
        }
        Ok(())
    }
}
