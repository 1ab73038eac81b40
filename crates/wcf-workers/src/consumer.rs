//! Consumer Worker (C4, spec.md §4.4): subscribes to transport
//! destinations, deserialises envelopes, inserts new inbox rows via C1
//! (dedup), then drains inbox rows and dispatches them to handlers.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use wcf_coordinator::WorkCoordinatorStrategy;
use wcf_db::{ClaimedRow, NewInboxMessage, ProcessWorkBatchArgs};
use wcf_dispatch::{InvokeError, ReceptorRegistry, RequestScope};
use wcf_routing::wire::{from_wire_bytes, SerializationError};
use wcf_types::{partition::partition_of, ServiceInstanceId, StatusBits};

use crate::idle::IdleTracker;
use crate::transport::{MessageTypeCatalog, RawDelivery, TransportSubscriber};

pub struct ConsumerWorkerConfig {
    pub poll_interval: Duration,
    pub lease_seconds: i64,
    pub stale_threshold_seconds: i64,
    pub partition_count: i32,
    pub max_partitions_per_instance: Option<i32>,
    pub idle_threshold_polls: u32,
}

/// Drives inbox intake + dispatch (C4, spec.md §4.4). `subscriber` yields
/// raw transport frames; `catalog` resolves a delivered message's
/// `is_event`/`handler_name` from generated type metadata (spec.md §1,
/// consumed through a narrow interface); `receptors` is the C6 registry
/// used to dispatch handlers keyed by `handler_name`.
pub struct ConsumerWorker {
    pool: PgPool,
    instance: ServiceInstanceId,
    strategy: Arc<dyn WorkCoordinatorStrategy>,
    subscriber: Arc<dyn TransportSubscriber>,
    catalog: Arc<dyn MessageTypeCatalog>,
    receptors: Arc<ReceptorRegistry>,
    scope_factory: Arc<dyn Fn() -> RequestScope + Send + Sync>,
    config: ConsumerWorkerConfig,
}

impl ConsumerWorker {
    pub fn new(
        pool: PgPool,
        instance: ServiceInstanceId,
        strategy: Arc<dyn WorkCoordinatorStrategy>,
        subscriber: Arc<dyn TransportSubscriber>,
        catalog: Arc<dyn MessageTypeCatalog>,
        receptors: Arc<ReceptorRegistry>,
        scope_factory: Arc<dyn Fn() -> RequestScope + Send + Sync>,
        config: ConsumerWorkerConfig,
    ) -> Self {
        Self {
            pool,
            instance,
            strategy,
            subscriber,
            catalog,
            receptors,
            scope_factory,
            config,
        }
    }

    fn heartbeat_args(&self) -> ProcessWorkBatchArgs {
        ProcessWorkBatchArgs::heartbeat_only(
            self.instance.clone(),
            self.config.lease_seconds,
            self.config.stale_threshold_seconds,
            self.config.partition_count,
            self.config.max_partitions_per_instance,
        )
    }

    /// Drain every delivery currently buffered by the subscriber, queueing
    /// one inbox insert per frame (spec.md §4.4 points 1-3). Malformed
    /// frames are rejected rather than queued.
    async fn intake(&self) {
        while let Some(delivery) = self.subscriber.recv().await {
            self.intake_one(delivery).await;
        }
    }

    async fn intake_one(&self, delivery: RawDelivery) {
        let envelope = match from_wire_bytes(&delivery.frame) {
            Ok(e) => e,
            Err(SerializationError::MalformedEnvelope(msg)) => {
                tracing::warn!(topic = %delivery.topic, error = %msg, "rejecting malformed frame");
                return;
            }
            Err(SerializationError::UnknownTypeId(id)) => {
                tracing::warn!(topic = %delivery.topic, type_id = %id, "rejecting unknown type id");
                return;
            }
        };

        let message_type = envelope
            .payload
            .get("__type")
            .and_then(Value::as_str)
            .unwrap_or(&delivery.topic)
            .to_string();

        let Some(handler_name) = self.catalog.handler_name(&message_type) else {
            tracing::warn!(message_type = %message_type, "no handler registered for message type");
            return;
        };
        let is_event = self.catalog.is_event(&message_type);
        let stream_id = envelope.stream_id();
        let partition_number = partition_of(&stream_id, self.config.partition_count as u32) as i32;

        let event_version = if is_event {
            match wcf_db::next_event_version(&self.pool, &stream_id).await {
                Ok(version) => Some(version),
                Err(e) => {
                    tracing::error!(stream_id = %stream_id, error = %e, "failed to allocate event version, rejecting delivery");
                    return;
                }
            }
        } else {
            None
        };

        self.strategy.queue_inbox_message(NewInboxMessage {
            message_id: envelope.message_id,
            envelope_type: "MessageEnvelope".to_string(),
            envelope_data: serde_json::to_value(&envelope).expect("envelope serializes"),
            message_type,
            handler_name,
            stream_id,
            partition_number,
            is_event,
            event_version,
            metadata: Value::Object(Default::default()),
        });
    }

    /// One poll cycle: intake buffered deliveries, flush (C1 dedupes by
    /// `message_id`), dispatch every returned inbox row to its registered
    /// handler within a fresh scope, queue completion/failure. Returns
    /// whether the claimed batch was empty.
    pub async fn run_once(&self) -> anyhow::Result<bool> {
        self.intake().await;

        let batch = self.strategy.flush(serde_json::to_value(&self.heartbeat_args())?).await?;

        for row in &batch.claimed {
            let ClaimedRow::Inbox(inbox) = row else {
                continue;
            };

            let scope = (self.scope_factory)();
            let payload = inbox
                .envelope_data
                .get("Payload")
                .cloned()
                .unwrap_or(Value::Null);

            match self.receptors.invoke(&inbox.handler_name, &scope, &payload) {
                Ok(_events) => {
                    // The event-store append for an is_event row already
                    // happened inside the flush above, as part of
                    // process_work_batch phase 5; this only acknowledges it
                    // (spec.md §4.4 point 4), it never appends twice.
                    self.strategy.queue_inbox_completion(inbox.message_id, StatusBits::COMPLETED);
                }
                Err(InvokeError::Registry(e)) => {
                    self.strategy.queue_inbox_failure(
                        inbox.message_id,
                        StatusBits::FAILED,
                        format!("dispatch failed: {e}"),
                    );
                }
                Err(InvokeError::Receptor(e)) => {
                    self.strategy.queue_inbox_failure(inbox.message_id, StatusBits::FAILED, e.to_string());
                }
            }
        }

        Ok(batch.claimed.is_empty())
    }

    /// Runs the poll loop until `cancellation` fires. In-flight messages
    /// finish their current scope before the loop exits (spec.md §4.4
    /// cancellation).
    pub async fn run(self: Arc<Self>, cancellation: CancellationToken) {
        let (mut idle, _rx) = IdleTracker::new(self.config.idle_threshold_polls);
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    tracing::info!("consumer worker shutting down");
                    break;
                }
                result = self.run_once() => {
                    match result {
                        Ok(empty) => idle.record_poll(empty),
                        Err(e) => tracing::error!(error = %e, "consumer worker poll failed"),
                    }
                }
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}
