//! Single-flight dedup: at most one concurrent upstream fetch per
//! (process, key). Implemented as a registry of per-key async mutexes
//! rather than a global lock, so unrelated keys never block each other.

use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::OwnedMutexGuard;

#[derive(Default)]
pub struct SingleFlight {
    locks: SyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        SingleFlight::default()
    }

    /// Acquires the per-key lock. Caller is expected to re-check the cache
    /// after acquiring the guard: whoever held the lock first may already
    /// have populated the entry.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        // Opportunistically shrink the registry; cheap relative to the I/O
        // this guards.
        {
            let mut locks = self.locks.lock();
            locks.retain(|_, v| Arc::strong_count(v) > 1);
        }
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn serializes_concurrent_fetches_for_the_same_key() {
        let sf = Arc::new(SingleFlight::new());
        let counter = Arc::new(AtomicU32::new(0));
        let mut handles = vec![];

        for _ in 0..8 {
            let sf = sf.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                let _guard = sf.acquire("AAPL").await;
                let current = counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                assert_eq!(counter.load(Ordering::SeqCst), current + 1);
            }));
        }

        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_block_each_other() {
        let sf = SingleFlight::new();
        let _a = sf.acquire("AAPL").await;
        let b = tokio::time::timeout(std::time::Duration::from_millis(50), sf.acquire("TSLA")).await;
        assert!(b.is_ok());
    }
}
