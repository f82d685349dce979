//! Invalidation bus: the L2 store publishes key-specific invalidation
//! events; every subscriber (each process's L1) evicts the matching entry.
//! Best-effort — L1 staleness is bounded by the L1 TTL regardless of
//! whether an event is ever delivered.

use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub struct InvalidationEvent {
    pub key: String,
}

#[derive(Clone)]
pub struct InvalidationBus {
    sender: broadcast::Sender<InvalidationEvent>,
}

impl InvalidationBus {
    pub fn new() -> Self {
        let (sender, _receiver) = broadcast::channel(1024);
        InvalidationBus { sender }
    }

    pub fn publish(&self, key: &str) {
        // A lagging/absent subscriber is fine: L1 TTL bounds staleness.
        let _ = self.sender.send(InvalidationEvent {
            key: key.to_string(),
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InvalidationEvent> {
        self.sender.subscribe()
    }
}

impl Default for InvalidationBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_key() {
        let bus = InvalidationBus::new();
        let mut rx = bus.subscribe();
        bus.publish("prod:borrow_rate:AAPL");
        let event = rx.recv().await.unwrap();
        assert_eq!(event.key, "prod:borrow_rate:AAPL");
    }
}
