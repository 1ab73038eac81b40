//! In-memory pub/sub transport, grounded on `mqk-testkit::FakeBroker`'s
//! "minimal fake used ONLY for tests" shape: no network I/O, deterministic,
//! keyed by the same handle a real broker client would use (here,
//! `destination` rather than `idempotency_key`).
//!
//! This is the seam spec.md §1 leaves for "a real broker client" — in this
//! workspace that concrete client is out of scope (SPEC_FULL.md §8), so
//! `FakeTransport` doubles as both the test double and the daemon's default
//! wiring until a real one is plugged in.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use wcf_types::MessageEnvelope;
use wcf_workers::{PublishOutcome, RawDelivery, TransportError, TransportPublisher, TransportSubscriber};

/// Queues deliveries per destination. `publish` pushes, `recv` pops — both
/// non-blocking, matching the Consumer Worker's "drain what's buffered"
/// intake loop (spec.md §4.4 point 1).
#[derive(Default)]
pub struct FakeTransport {
    queues: Mutex<HashMap<String, VecDeque<RawDelivery>>>,
    refuse: Mutex<Option<String>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subsequent `publish` call is refused with `reason` until
    /// cleared. Exercises the Publisher Worker's "refused" path (spec.md
    /// §4.3 point 3) without needing an actually-unreachable broker.
    pub fn refuse_next_publishes(&self, reason: impl Into<String>) {
        *self.refuse.lock().unwrap() = Some(reason.into());
    }

    pub fn accept_publishes_again(&self) {
        *self.refuse.lock().unwrap() = None;
    }

    /// Total frames ever queued for `destination`, delivered or not.
    pub fn queued_len(&self, destination: &str) -> usize {
        self.queues.lock().unwrap().get(destination).map(VecDeque::len).unwrap_or(0)
    }
}

#[async_trait]
impl TransportPublisher for FakeTransport {
    async fn publish(&self, envelope: &MessageEnvelope, destination: &str) -> Result<PublishOutcome, TransportError> {
        if let Some(reason) = self.refuse.lock().unwrap().clone() {
            return Ok(PublishOutcome::Refused(reason));
        }

        let frame = wcf_routing::wire::to_wire_bytes(envelope)
            .map_err(|e| TransportError(e.to_string()))?;
        self.queues
            .lock()
            .unwrap()
            .entry(destination.to_string())
            .or_default()
            .push_back(RawDelivery { topic: destination.to_string(), frame });
        Ok(PublishOutcome::Accepted)
    }
}

/// A subscriber view over a fixed set of destinations on a shared
/// [`FakeTransport`] — mirrors how a real subscriber binds to one or more
/// topics at startup rather than discovering them dynamically.
pub struct FakeTransportSubscriber {
    transport: std::sync::Arc<FakeTransport>,
    destinations: Vec<String>,
}

impl FakeTransportSubscriber {
    pub fn new(transport: std::sync::Arc<FakeTransport>, destinations: Vec<String>) -> Self {
        Self { transport, destinations }
    }
}

#[async_trait]
impl TransportSubscriber for FakeTransportSubscriber {
    async fn recv(&self) -> Option<RawDelivery> {
        let mut queues = self.transport.queues.lock().unwrap();
        for destination in &self.destinations {
            if let Some(queue) = queues.get_mut(destination) {
                if let Some(delivery) = queue.pop_front() {
                    return Some(delivery);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn published_envelope_is_delivered_to_its_destination() {
        let transport = std::sync::Arc::new(FakeTransport::new());
        let envelope = MessageEnvelope::new(Uuid::new_v4(), serde_json::json!({"__type": "CreateProduct"}));

        let outcome = transport.publish(&envelope, "orders").await.unwrap();
        assert_eq!(outcome, PublishOutcome::Accepted);

        let subscriber = FakeTransportSubscriber::new(transport.clone(), vec!["orders".to_string()]);
        let delivery = subscriber.recv().await.expect("one delivery queued");
        assert_eq!(delivery.topic, "orders");
        assert!(subscriber.recv().await.is_none());
    }

    #[tokio::test]
    async fn refused_publish_never_reaches_the_queue() {
        let transport = FakeTransport::new();
        transport.refuse_next_publishes("broker unreachable");
        let envelope = MessageEnvelope::new(Uuid::new_v4(), serde_json::json!({}));

        let outcome = transport.publish(&envelope, "orders").await.unwrap();
        assert_eq!(outcome, PublishOutcome::Refused("broker unreachable".to_string()));
        assert_eq!(transport.queued_len("orders"), 0);
    }
}
