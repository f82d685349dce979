//! Rate limiter (C5): per-client token bucket backed by the shared tier.
//!
//! The spec calls for "an atomic script against the shared store so that
//! decrement and read are a single logical step". Since this deployment's
//! shared store is the in-process `Arc<Mutex<_>>` described in
//! `cache::l2` (see DESIGN.md OQ-1), the critical section here is that
//! mutex: decrement-and-read happens while holding the lock, which is the
//! single-instance equivalent of an atomic Lua script against a real
//! external store.

use crate::domain::RateBucket;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitParams {
    pub capacity: f64,
    pub refill_per_second: f64,
    pub burst_allowance: f64,
}

pub struct RateLimitDecision {
    pub allowed: bool,
    pub retry_after: Duration,
}

pub struct RateLimiter {
    buckets: Mutex<HashMap<String, RateBucket>>,
    default_params: RateLimitParams,
    lock_deadline: Duration,
}

impl RateLimiter {
    pub fn new(default_params: RateLimitParams, lock_deadline: Duration) -> Self {
        RateLimiter {
            buckets: Mutex::new(HashMap::new()),
            default_params,
            lock_deadline,
        }
    }

    /// O(1): single lock acquisition, refill math, decrement, return.
    /// Never performs I/O, so it cannot itself time out; `lock_deadline`
    /// bounds only the lock-acquisition wait under contention. Failing to
    /// acquire the lock within that window fails OPEN (admits the caller)
    /// rather than blocking the request indefinitely.
    pub fn allow(&self, client_id: &str) -> RateLimitDecision {
        let params = self.default_params;
        let now = Utc::now();
        let Some(mut buckets) = self.buckets.try_lock_for(self.lock_deadline) else {
            tracing::error!(client_id, "rate limiter lock acquisition timed out, failing open");
            metrics::counter!("rate_limiter_deadline_exceeded_total").increment(1);
            return RateLimitDecision {
                allowed: true,
                retry_after: Duration::ZERO,
            };
        };
        let bucket = buckets.entry(client_id.to_string()).or_insert_with(|| RateBucket {
            client_id: client_id.to_string(),
            tokens: params.capacity + params.burst_allowance,
            capacity: params.capacity + params.burst_allowance,
            refill_rate: params.refill_per_second,
            last_refill: now,
        });

        let elapsed = (now - bucket.last_refill).num_milliseconds().max(0) as f64 / 1000.0;
        let refilled = (bucket.tokens + elapsed * bucket.refill_rate).min(bucket.capacity);
        bucket.tokens = refilled;
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            metrics::counter!("rate_limiter_allowed_total").increment(1);
            RateLimitDecision {
                allowed: true,
                retry_after: Duration::ZERO,
            }
        } else {
            let deficit = 1.0 - bucket.tokens;
            let wait_secs = if bucket.refill_rate > 0.0 {
                deficit / bucket.refill_rate
            } else {
                1.0
            };
            metrics::counter!("rate_limiter_denied_total").increment(1);
            RateLimitDecision {
                allowed: false,
                retry_after: Duration::from_secs_f64(wait_secs.max(0.0)),
            }
        }
    }
}
