//! L1: per-process bounded in-memory cache with its own short TTL ceiling.

use super::envelope::Envelope;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::Duration;

pub const L1_TTL_CEILING: Duration = Duration::from_secs(60);

struct Inner {
    entries: HashMap<String, Envelope>,
    recency: VecDeque<String>,
    max_entries: usize,
}

pub struct L1Cache {
    inner: Mutex<Inner>,
}

impl L1Cache {
    pub fn new(max_entries: usize) -> Self {
        L1Cache {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                recency: VecDeque::new(),
                max_entries,
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<Envelope> {
        let mut inner = self.inner.lock();
        let fresh = inner
            .entries
            .get(key)
            .map(|e| e.is_fresh(Utc::now()))
            .unwrap_or(false);
        if !fresh {
            return None;
        }
        Self::touch(&mut inner, key);
        inner.entries.get(key).cloned()
    }

    pub fn put(&self, key: &str, mut envelope: Envelope) {
        // L1 never outlives its own TTL ceiling regardless of the source
        // envelope's TTL.
        if envelope.ttl_secs > L1_TTL_CEILING.as_secs() {
            envelope.ttl_secs = L1_TTL_CEILING.as_secs();
        }
        let mut inner = self.inner.lock();
        let max_entries = inner.max_entries;
        inner.entries.insert(key.to_string(), envelope);
        Self::touch(&mut inner, key);
        while inner.entries.len() > max_entries {
            if let Some(evicted) = inner.recency.pop_front() {
                inner.entries.remove(&evicted);
            } else {
                break;
            }
        }
    }

    pub fn invalidate(&self, key: &str) {
        let mut inner = self.inner.lock();
        inner.entries.remove(key);
        inner.recency.retain(|k| k != key);
    }

    fn touch(inner: &mut Inner, key: &str) {
        inner.recency.retain(|k| k != key);
        inner.recency.push_back(key.to_string());
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}
