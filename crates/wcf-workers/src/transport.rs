//! Transport seams the Publisher/Consumer workers are parameterized over
//! (spec.md §6 transport contract). Narrow interfaces only — concrete
//! broker/queue clients are explicitly out of scope (spec.md §1).

use async_trait::async_trait;
use wcf_types::MessageEnvelope;

/// What a publish attempt produced. `Refused` is not an error — the row's
/// lease is simply released on the next flush and it will be retried
/// (spec.md §4.3 point 2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Accepted,
    Refused(String),
}

/// A hard transport failure (as opposed to a soft `Refused`) — the
/// envelope could not even be attempted (e.g. connection not established).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError(pub String);

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "transport error: {}", self.0)
    }
}

impl std::error::Error for TransportError {}

/// Wraps the concrete transport client for the Publisher Worker (C3).
#[async_trait]
pub trait TransportPublisher: Send + Sync {
    async fn publish(&self, envelope: &MessageEnvelope, destination: &str) -> Result<PublishOutcome, TransportError>;
}

/// One frame delivered off the transport, not yet deserialized.
#[derive(Debug, Clone)]
pub struct RawDelivery {
    pub topic: String,
    pub frame: Vec<u8>,
}

/// Wraps the concrete transport client for the Consumer Worker (C4). A
/// subscriber is already bound to whatever `(topic, subscription)` pairs
/// the caller configured; `recv` yields the next delivery or `None` on a
/// poll timeout (treated as an empty poll for idle-tracking purposes, not
/// a closed subscription).
#[async_trait]
pub trait TransportSubscriber: Send + Sync {
    async fn recv(&self) -> Option<RawDelivery>;
}

/// Resolves a handler name and event-ness for an incoming message type —
/// the narrow seam onto the code-generated dispatch metadata the
/// domain-language layer owns (spec.md §1 "consumed through narrow
/// interfaces").
pub trait MessageTypeCatalog: Send + Sync {
    fn is_event(&self, message_type: &str) -> bool;
    fn handler_name(&self, message_type: &str) -> Option<String>;
}
