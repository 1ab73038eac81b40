//! Dispatcher & envelope model (C6, spec.md §4.6).
//!
//! `Dispatcher` is the in-process routing seam: `Send` queues a durable
//! outbox row, `LocalInvoke` calls a registered receptor synchronously,
//! `Publish` fans an event out to every configured destination. All three
//! build a [`wcf_types::MessageEnvelope`] and append a hop before handing
//! anything to the strategy.

pub mod registry;
pub mod scope;

use std::collections::BTreeMap;

use anyhow::Result;
use serde_json::Value;
use uuid::Uuid;
use wcf_db::NewOutboxMessage;
use wcf_types::partition::partition_of;
use wcf_types::{HopType, MessageEnvelope, MessageHop, ServiceInstanceId, StreamId};

pub use registry::{InvokeError, OutputEvent, Receptor, ReceptorError, ReceptorMeta, ReceptorRegistry, RegistryError};
pub use scope::RequestScope;

/// Errors produced by the dispatcher itself (as opposed to a receptor's own
/// `ReceptorError`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// `LocalInvoke` was called against a dispatcher wired to a remote
    /// transport (spec.md §4.6 `LocalInvoke` semantics).
    RemoteNotSupported,
    Registry(RegistryError),
    Receptor(ReceptorError),
    NoDestinationsConfigured { message_type: String },
    /// Allocating the next `event_store` version for a stream failed.
    EventVersionAllocation(String),
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RemoteNotSupported => {
                write!(f, "LocalInvoke is not supported by a dispatcher configured with a remote transport")
            }
            Self::Registry(e) => write!(f, "{e}"),
            Self::Receptor(e) => write!(f, "{e}"),
            Self::NoDestinationsConfigured { message_type } => {
                write!(f, "Publish called for '{message_type}' with no configured destinations")
            }
            Self::EventVersionAllocation(e) => write!(f, "failed to allocate event version: {e}"),
        }
    }
}

impl std::error::Error for DispatchError {}

impl From<InvokeError> for DispatchError {
    fn from(e: InvokeError) -> Self {
        match e {
            InvokeError::Registry(r) => Self::Registry(r),
            InvokeError::Receptor(r) => Self::Receptor(r),
        }
    }
}

/// A delivery receipt handed back from `Send`/`Publish` — correlation ids a
/// caller can use to track the message, not a proof of delivery (delivery
/// is only certain once the outbox row is Published).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub message_id: Uuid,
    pub correlation_id: Uuid,
    pub stream_id: StreamId,
}

/// Whether this dispatcher instance may reach a receptor directly.
/// `LocalInvoke` is refused when `Remote` (spec.md §4.6), mirroring the
/// teacher's `BrokerGateway` choke-point pattern — one type is the only
/// path to the thing it wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Local,
    Remote,
}

/// Per-message-type routing: which transport destination(s) a `Send` or
/// `Publish` targets. `wcf-routing` computes these from a topic strategy;
/// the dispatcher only needs the resolved string(s).
pub trait DestinationResolver: Send + Sync {
    /// The single destination for a `Send` (durable point-to-point).
    fn destination_for_send(&self, message_type: &str) -> Option<String>;
    /// All destinations for a `Publish` (fan-out); empty means
    /// unconfigured.
    fn destinations_for_publish(&self, message_type: &str) -> Vec<String>;
}

/// In-process routing (C6, spec.md §4.6). Holds the receptor registry for
/// `LocalInvoke`, a destination resolver for `Send`/`Publish`, and this
/// instance's identity for hop-chain construction.
pub struct Dispatcher {
    pub mode: TransportMode,
    pub instance: ServiceInstanceId,
    pub receptors: ReceptorRegistry,
    pub destinations: Box<dyn DestinationResolver>,
    pub partition_count: u32,
}

impl Dispatcher {
    pub fn new(
        mode: TransportMode,
        instance: ServiceInstanceId,
        receptors: ReceptorRegistry,
        destinations: Box<dyn DestinationResolver>,
        partition_count: u32,
    ) -> Self {
        Self {
            mode,
            instance,
            receptors,
            destinations,
            partition_count,
        }
    }

    /// Build the first hop of a freshly dispatched message, stamping this
    /// instance's identity, a fresh correlation id, and the aggregate id
    /// metadata key that later defines `stream_id` (spec.md §6).
    fn build_hop(
        &self,
        scope: &RequestScope,
        stream_id: &str,
    ) -> MessageHop {
        let mut metadata = BTreeMap::new();
        metadata.insert(
            MessageHop::AGGREGATE_ID_KEY.to_string(),
            Value::String(stream_id.to_string()),
        );
        MessageHop {
            service_instance: self.instance.clone(),
            hop_type: HopType::Current,
            timestamp: chrono::Utc::now(),
            correlation_id: scope.correlation_id,
            causation_id: scope.causation_id,
            security_context: scope.security_context.clone(),
            metadata,
        }
    }

    /// `Send(message)` — durable, transport-agnostic: produces one outbox
    /// row via the strategy (spec.md §4.6). When `is_event`, allocates the
    /// next version for `stream_id` (invariant §3.2.1) before queuing —
    /// `process_work_batch` writes it straight into `event_store.version`,
    /// which is `not null`.
    pub async fn send(
        &self,
        scope: &RequestScope,
        message_type: &str,
        stream_id: &str,
        payload: Value,
        is_event: bool,
    ) -> Result<DeliveryReceipt, DispatchError> {
        let destination = self
            .destinations
            .destination_for_send(message_type)
            .ok_or_else(|| DispatchError::NoDestinationsConfigured {
                message_type: message_type.to_string(),
            })?;

        let message_id = Uuid::new_v4();
        let mut envelope = MessageEnvelope::new(message_id, payload.clone());
        envelope.append_hop(self.build_hop(scope, stream_id));

        let envelope_data = serde_json::to_value(&envelope).expect("envelope serializes");
        let partition_number = partition_of(stream_id, self.partition_count) as i32;

        let event_version = if is_event {
            Some(
                wcf_db::next_event_version(&scope.pool, stream_id)
                    .await
                    .map_err(|e| DispatchError::EventVersionAllocation(e.to_string()))?,
            )
        } else {
            None
        };

        scope.strategy.queue_outbox_message(NewOutboxMessage {
            message_id,
            destination,
            envelope_type: "MessageEnvelope".to_string(),
            envelope_data,
            message_type: message_type.to_string(),
            stream_id: stream_id.to_string(),
            partition_number,
            is_event,
            event_version,
            metadata: Value::Object(Default::default()),
        });

        Ok(DeliveryReceipt {
            message_id,
            correlation_id: scope.correlation_id,
            stream_id: stream_id.to_string(),
        })
    }

    /// `LocalInvoke<T, R>(message)` — in-process only, calls the registered
    /// receptor synchronously (spec.md §4.6). Refused if this dispatcher is
    /// configured with a remote transport.
    pub fn local_invoke(
        &self,
        scope: &RequestScope,
        message_type: &str,
        payload: &Value,
    ) -> Result<Vec<OutputEvent>, DispatchError> {
        if self.mode == TransportMode::Remote {
            return Err(DispatchError::RemoteNotSupported);
        }
        self.receptors
            .invoke(message_type, scope, payload)
            .map_err(DispatchError::from)
    }

    /// `Publish(event)` — fan-out: one outbox row per configured
    /// destination, no result (spec.md §4.6). Every fanned-out row carries
    /// `is_event = true`, and the outbox→event-store coupling (DESIGN.md) is
    /// per-row, so each destination's copy gets its own consecutive version
    /// on `stream_id` rather than sharing one — `unique (stream_id, version)`
    /// on `event_store` would otherwise reject every destination after the
    /// first.
    pub async fn publish(
        &self,
        scope: &RequestScope,
        message_type: &str,
        stream_id: &str,
        payload: Value,
    ) -> Result<(), DispatchError> {
        let destinations = self.destinations.destinations_for_publish(message_type);
        if destinations.is_empty() {
            return Err(DispatchError::NoDestinationsConfigured {
                message_type: message_type.to_string(),
            });
        }

        let mut next_version = wcf_db::next_event_version(&scope.pool, stream_id)
            .await
            .map_err(|e| DispatchError::EventVersionAllocation(e.to_string()))?;

        let partition_number = partition_of(stream_id, self.partition_count) as i32;
        for destination in destinations {
            let message_id = Uuid::new_v4();
            let mut envelope = MessageEnvelope::new(message_id, payload.clone());
            envelope.append_hop(self.build_hop(scope, stream_id));
            let envelope_data = serde_json::to_value(&envelope).expect("envelope serializes");

            scope.strategy.queue_outbox_message(NewOutboxMessage {
                message_id,
                destination,
                envelope_type: "MessageEnvelope".to_string(),
                envelope_data,
                message_type: message_type.to_string(),
                stream_id: stream_id.to_string(),
                partition_number,
                is_event: true,
                event_version: Some(next_version),
                metadata: Value::Object(Default::default()),
            });
            next_version += 1;
        }
        Ok(())
    }
}
