//! Self-describing cache envelope. Every value stored in L1 or L2 carries a
//! schema version; an entry whose version this binary does not recognize is
//! treated as a miss rather than deserialized blindly.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;

pub const CURRENT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u32,
    pub payload: serde_json::Value,
    pub inserted_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl Envelope {
    pub fn new<V: Serialize>(value: &V, ttl: Duration) -> Self {
        Envelope {
            version: CURRENT_SCHEMA_VERSION,
            payload: serde_json::to_value(value).expect("cache value must serialize"),
            inserted_at: Utc::now(),
            ttl_secs: ttl.as_secs(),
        }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.inserted_at + chrono::Duration::seconds(self.ttl_secs as i64) >= now
    }

    pub fn decode<V: DeserializeOwned>(&self) -> Option<V> {
        if self.version != CURRENT_SCHEMA_VERSION {
            return None;
        }
        serde_json::from_value(self.payload.clone()).ok()
    }
}
