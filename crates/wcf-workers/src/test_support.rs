//! In-process test doubles shared by this crate's unit tests. Not a public
//! module — `wcf-testkit` ships the equivalent fakes (`FakeTransport`,
//! orchestrator) for integration tests that span crates.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;
use wcf_coordinator::{WorkBatch, WorkCoordinatorStrategy};
use wcf_db::{ClaimedInboxRow, ClaimedOutboxRow, ClaimedRow, InboxCompletion, InboxFailure, NewInboxMessage, NewOutboxMessage, OutboxCompletion, OutboxFailure, PerspectiveCompletion, PerspectiveFailure};
use wcf_types::{HopType, MessageEnvelope, MessageHop, SecurityContext, ServiceInstanceId};

use crate::transport::{MessageTypeCatalog, PublishOutcome, RawDelivery, TransportError, TransportPublisher, TransportSubscriber};

/// A canned-response `WorkCoordinatorStrategy`: the first `flush()` call
/// returns a pre-seeded batch, every subsequent call returns an empty one.
/// Every `queue_*` call is recorded so tests can assert on it.
#[derive(Default)]
pub struct InMemoryStrategy {
    batches: Mutex<VecDeque<WorkBatch>>,
    new_outbox: Mutex<Vec<NewOutboxMessage>>,
    new_inbox: Mutex<Vec<NewInboxMessage>>,
    outbox_completions: Mutex<Vec<OutboxCompletion>>,
    outbox_failures: Mutex<Vec<OutboxFailure>>,
    inbox_completions: Mutex<Vec<InboxCompletion>>,
    inbox_failures: Mutex<Vec<InboxFailure>>,
    perspective_completions: Mutex<Vec<PerspectiveCompletion>>,
    perspective_failures: Mutex<Vec<PerspectiveFailure>>,
}

impl InMemoryStrategy {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_outbox_row(stream_id: &str, destination: &str) -> Self {
        let message_id = Uuid::new_v4();
        let mut envelope = MessageEnvelope::new(message_id, serde_json::json!({"__type": "TestEvent"}));
        let mut metadata = BTreeMap::new();
        metadata.insert(MessageHop::AGGREGATE_ID_KEY.to_string(), Value::String(stream_id.to_string()));
        envelope.append_hop(MessageHop {
            service_instance: ServiceInstanceId::new("svc", "host"),
            hop_type: HopType::Current,
            timestamp: chrono::Utc::now(),
            correlation_id: Uuid::new_v4(),
            causation_id: None,
            security_context: SecurityContext::default(),
            metadata,
        });

        let row = ClaimedRow::Outbox(ClaimedOutboxRow {
            message_id,
            destination: destination.to_string(),
            envelope_type: "MessageEnvelope".to_string(),
            envelope_data: serde_json::to_value(&envelope).unwrap(),
            stream_id: stream_id.to_string(),
            partition_number: 0,
            attempts: 0,
            status: 0,
            sequence_order: 1,
        });

        let strategy = Self::default();
        strategy.batches.lock().unwrap().push_back(WorkBatch { claimed: vec![row] });
        strategy
    }

    pub fn claiming_inbox_once(message_id: Uuid, handler_name: &str) -> Self {
        let row = ClaimedRow::Inbox(ClaimedInboxRow {
            message_id,
            envelope_type: "MessageEnvelope".to_string(),
            envelope_data: serde_json::json!({"Payload": {"sku": "abc"}}),
            stream_id: "order-1".to_string(),
            partition_number: 0,
            attempts: 0,
            status: 0,
            sequence_order: 1,
            handler_name: handler_name.to_string(),
        });

        let strategy = Self::default();
        strategy.batches.lock().unwrap().push_back(WorkBatch { claimed: vec![row] });
        strategy
    }

    pub fn outbox_completions(&self) -> Vec<OutboxCompletion> {
        self.outbox_completions.lock().unwrap().clone()
    }
    pub fn outbox_failures(&self) -> Vec<OutboxFailure> {
        self.outbox_failures.lock().unwrap().clone()
    }
    pub fn queued_inbox_messages(&self) -> Vec<NewInboxMessage> {
        self.new_inbox.lock().unwrap().clone()
    }
    pub fn inbox_completions(&self) -> Vec<InboxCompletion> {
        self.inbox_completions.lock().unwrap().clone()
    }
    pub fn inbox_failures(&self) -> Vec<InboxFailure> {
        self.inbox_failures.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkCoordinatorStrategy for InMemoryStrategy {
    fn queue_outbox_message(&self, message: NewOutboxMessage) {
        self.new_outbox.lock().unwrap().push(message);
    }
    fn queue_inbox_message(&self, message: NewInboxMessage) {
        self.new_inbox.lock().unwrap().push(message);
    }
    fn queue_outbox_completion(&self, message_id: Uuid, status: i32) {
        self.outbox_completions.lock().unwrap().push(OutboxCompletion { message_id, status });
    }
    fn queue_outbox_failure(&self, message_id: Uuid, status: i32, error_text: String) {
        self.outbox_failures.lock().unwrap().push(OutboxFailure { message_id, status, error: error_text });
    }
    fn queue_inbox_completion(&self, message_id: Uuid, status: i32) {
        self.inbox_completions.lock().unwrap().push(InboxCompletion { message_id, status });
    }
    fn queue_inbox_failure(&self, message_id: Uuid, status: i32, error_text: String) {
        self.inbox_failures.lock().unwrap().push(InboxFailure { message_id, status, error: error_text });
    }
    fn queue_perspective_completion(&self, perspective_name: String, stream_id: String, last_event_id: Uuid, last_sequence_number: i64) {
        self.perspective_completions.lock().unwrap().push(PerspectiveCompletion {
            perspective_name,
            stream_id,
            last_event_id,
            last_sequence_number,
        });
    }
    fn queue_perspective_failure(&self, perspective_name: String, stream_id: String, error_text: String) {
        self.perspective_failures.lock().unwrap().push(PerspectiveFailure {
            perspective_name,
            stream_id,
            error: error_text,
        });
    }
    fn queue_renew_outbox_lease(&self, _message_id: Uuid) {}
    fn queue_renew_inbox_lease(&self, _message_id: Uuid) {}

    async fn flush(&self, _flags: Value) -> anyhow::Result<WorkBatch> {
        Ok(self.batches.lock().unwrap().pop_front().unwrap_or_default())
    }
}

pub struct NullTransportPublisher {
    accept: bool,
}

impl NullTransportPublisher {
    pub fn accepting() -> Self {
        Self { accept: true }
    }
}

#[async_trait]
impl TransportPublisher for NullTransportPublisher {
    async fn publish(&self, _envelope: &MessageEnvelope, _destination: &str) -> Result<PublishOutcome, TransportError> {
        Ok(if self.accept {
            PublishOutcome::Accepted
        } else {
            PublishOutcome::Refused("test".to_string())
        })
    }
}

pub struct RefusingTransportPublisher;

#[async_trait]
impl TransportPublisher for RefusingTransportPublisher {
    async fn publish(&self, _envelope: &MessageEnvelope, _destination: &str) -> Result<PublishOutcome, TransportError> {
        Ok(PublishOutcome::Refused("transport not ready".to_string()))
    }
}

pub struct FakeCatalog {
    handler_name: String,
}

impl FakeCatalog {
    pub fn always(handler_name: &str) -> Self {
        Self { handler_name: handler_name.to_string() }
    }
}

impl MessageTypeCatalog for FakeCatalog {
    fn is_event(&self, _message_type: &str) -> bool {
        false
    }
    fn handler_name(&self, _message_type: &str) -> Option<String> {
        Some(self.handler_name.clone())
    }
}

/// Replays a fixed sequence of frames, then signals end-of-stream with
/// `None` (mirrors `mqk-testkit::FakeBroker`'s canned-response shape).
pub struct FakeSubscriber {
    frames: Mutex<VecDeque<RawDelivery>>,
}

impl FakeSubscriber {
    pub fn empty() -> Self {
        Self { frames: Mutex::new(VecDeque::new()) }
    }

    pub fn with_envelope_twice(message_id: Uuid, stream_id: &str, message_type: &str) -> Self {
        let mut envelope = MessageEnvelope::new(message_id, serde_json::json!({"__type": message_type}));
        let mut metadata = BTreeMap::new();
        metadata.insert(MessageHop::AGGREGATE_ID_KEY.to_string(), Value::String(stream_id.to_string()));
        envelope.append_hop(MessageHop {
            service_instance: ServiceInstanceId::new("svc", "host"),
            hop_type: HopType::Current,
            timestamp: chrono::Utc::now(),
            correlation_id: Uuid::new_v4(),
            causation_id: None,
            security_context: SecurityContext::default(),
            metadata,
        });
        let frame = wcf_routing::wire::to_wire_bytes(&envelope).unwrap();

        let mut frames = VecDeque::new();
        frames.push_back(RawDelivery { topic: "test-topic".to_string(), frame: frame.clone() });
        frames.push_back(RawDelivery { topic: "test-topic".to_string(), frame });
        Self { frames: Mutex::new(frames) }
    }
}

#[async_trait]
impl TransportSubscriber for FakeSubscriber {
    async fn recv(&self) -> Option<RawDelivery> {
        self.frames.lock().unwrap().pop_front()
    }
}
