//! Shared wire and domain types for the work-coordination core.
//!
//! Every other crate in the workspace depends on this one for the envelope,
//! hop, and identity shapes defined by the external interfaces (see
//! `SPEC_FULL.md` §4 and §6). Keeping these in one crate avoids each of
//! `wcf-db`, `wcf-dispatch`, `wcf-routing`, and `wcf-workers` inventing its
//! own copy of "what a stream id is".

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod partition;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// A logical ordered sequence of events keyed by an aggregate id.
pub type StreamId = String;

/// `(instance_id, service_name, host_name, process_id, metadata)` — the
/// identity a service instance advertises on every `process_work_batch`
/// call (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceInstanceId {
    /// Version-7 UUID: time-ordered, generated once per process lifetime.
    pub instance_id: Uuid,
    pub service_name: String,
    pub host_name: String,
    pub process_id: u32,
}

impl ServiceInstanceId {
    /// Mint a fresh identity for the current process.
    pub fn new(service_name: impl Into<String>, host_name: impl Into<String>) -> Self {
        Self {
            instance_id: Uuid::now_v7(),
            service_name: service_name.into(),
            host_name: host_name.into(),
            process_id: std::process::id(),
        }
    }
}

/// Access-control context carried on every hop. Enforcement lives outside
/// the coordinator (spec.md Non-goals); the coordinator only threads it
/// through so a downstream policy layer can read it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecurityContext {
    pub tenant_id: Option<String>,
    pub user_id: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Envelope & hops
// ---------------------------------------------------------------------------

/// Whether a hop describes the current service's processing of the message
/// or a parent service's (one entry per service boundary crossed).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum HopType {
    Current,
    Parent,
}

/// One entry in the envelope's processing chain, recording which service
/// touched it (spec.md §4.6, §6 wire format).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct MessageHop {
    pub service_instance: ServiceInstanceId,
    #[serde(rename = "Type")]
    pub hop_type: HopType,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Uuid,
    pub causation_id: Option<Uuid>,
    pub security_context: SecurityContext,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl MessageHop {
    /// The well-known metadata key whose value (if present on the first
    /// hop) defines the envelope's `stream_id` for ordering (spec.md §6).
    pub const AGGREGATE_ID_KEY: &'static str = "AggregateId";

    pub fn aggregate_id(&self) -> Option<&str> {
        self.metadata.get(Self::AGGREGATE_ID_KEY)?.as_str()
    }
}

/// Transport-wrapper around a message carrying identity, correlation, and
/// hop history (spec.md §4.6, §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct MessageEnvelope {
    pub message_id: Uuid,
    pub payload: serde_json::Value,
    pub hops: Vec<MessageHop>,
}

impl MessageEnvelope {
    pub fn new(message_id: Uuid, payload: serde_json::Value) -> Self {
        Self {
            message_id,
            payload,
            hops: Vec::new(),
        }
    }

    /// Append a new hop at a service boundary. `causation_id` should link to
    /// the id of the caller's current message when one exists.
    pub fn append_hop(&mut self, hop: MessageHop) {
        self.hops.push(hop);
    }

    /// `stream_id` for ordering: the first hop's `Metadata.AggregateId` if
    /// present, falling back to `message_id` (spec.md §6).
    pub fn stream_id(&self) -> StreamId {
        self.hops
            .first()
            .and_then(MessageHop::aggregate_id)
            .map(str::to_string)
            .unwrap_or_else(|| self.message_id.to_string())
    }
}

// ---------------------------------------------------------------------------
// Status bit-field (shared by outbox and inbox rows, spec.md §4.1)
// ---------------------------------------------------------------------------

/// Status bit-field shared by outbox and inbox rows.
///
/// Bits are additive: a row can be `InFlight` and later gain `Published`
/// without losing history, which is why this is a bit-field rather than an
/// enum (spec.md §4.1 "Status bit semantics").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusBits(pub i32);

impl StatusBits {
    pub const IN_FLIGHT: i32 = 1 << 0;
    pub const COMPLETED: i32 = 1 << 1;
    pub const PUBLISHED: i32 = 1 << 2;
    pub const FAILED: i32 = 1 << 3;
    pub const EVENT_STORED: i32 = 1 << 4;

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn is_set(self, bit: i32) -> bool {
        self.0 & bit != 0
    }

    pub const fn with_set(self, bit: i32) -> Self {
        Self(self.0 | bit)
    }

    pub const fn with_cleared(self, bit: i32) -> Self {
        Self(self.0 & !bit)
    }

    pub const fn is_terminal(self) -> bool {
        self.is_set(Self::COMPLETED) || self.is_set(Self::PUBLISHED) || self.is_set(Self::FAILED)
    }
}

impl Default for StatusBits {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_stream_id_falls_back_to_message_id() {
        let id = Uuid::new_v4();
        let env = MessageEnvelope::new(id, serde_json::json!({}));
        assert_eq!(env.stream_id(), id.to_string());
    }

    #[test]
    fn envelope_stream_id_uses_first_hop_aggregate_id() {
        let id = Uuid::new_v4();
        let mut env = MessageEnvelope::new(id, serde_json::json!({}));
        let mut metadata = BTreeMap::new();
        metadata.insert(
            MessageHop::AGGREGATE_ID_KEY.to_string(),
            serde_json::json!("order-42"),
        );
        env.append_hop(MessageHop {
            service_instance: ServiceInstanceId::new("svc", "host"),
            hop_type: HopType::Current,
            timestamp: Utc::now(),
            correlation_id: Uuid::new_v4(),
            causation_id: None,
            security_context: SecurityContext::default(),
            metadata,
        });
        assert_eq!(env.stream_id(), "order-42");
    }

    #[test]
    fn status_bits_set_and_clear() {
        let s = StatusBits::empty().with_set(StatusBits::IN_FLIGHT);
        assert!(s.is_set(StatusBits::IN_FLIGHT));
        assert!(!s.is_terminal());
        let s = s.with_cleared(StatusBits::IN_FLIGHT).with_set(StatusBits::PUBLISHED);
        assert!(!s.is_set(StatusBits::IN_FLIGHT));
        assert!(s.is_terminal());
    }
}
