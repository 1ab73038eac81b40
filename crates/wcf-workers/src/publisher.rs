//! Publisher Worker (C3, spec.md §4.3): drains outbox rows returned by C1,
//! hands them to a [`TransportPublisher`], reports completion/failure.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use wcf_coordinator::WorkCoordinatorStrategy;
use wcf_db::{ClaimedRow, ProcessWorkBatchArgs};
use wcf_types::{MessageEnvelope, ServiceInstanceId, StatusBits};

use crate::idle::IdleTracker;
use crate::transport::{PublishOutcome, TransportPublisher};

pub struct PublisherWorkerConfig {
    pub poll_interval: Duration,
    pub lease_seconds: i64,
    pub stale_threshold_seconds: i64,
    pub partition_count: i32,
    pub max_partitions_per_instance: Option<i32>,
    pub idle_threshold_polls: u32,
}

/// Drains outbox rows claimed by `process_work_batch` and hands each one to
/// the transport-publish strategy (C3, spec.md §4.3).
pub struct PublisherWorker {
    instance: ServiceInstanceId,
    strategy: Arc<dyn WorkCoordinatorStrategy>,
    publisher: Arc<dyn TransportPublisher>,
    config: PublisherWorkerConfig,
}

impl PublisherWorker {
    pub fn new(
        instance: ServiceInstanceId,
        strategy: Arc<dyn WorkCoordinatorStrategy>,
        publisher: Arc<dyn TransportPublisher>,
        config: PublisherWorkerConfig,
    ) -> Self {
        Self {
            instance,
            strategy,
            publisher,
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

    /// One poll cycle: flush with no queued work, hand every returned
    /// outbox row to the transport, queue completion/failure for the next
    /// flush. Returns whether the claimed batch was empty.
    pub async fn run_once(&self) -> anyhow::Result<bool> {
        let batch = self.strategy.flush(serde_json::to_value(&self.heartbeat_args())?).await?;

        for row in &batch.claimed {
            let ClaimedRow::Outbox(outbox) = row else {
                continue;
            };

            let envelope: MessageEnvelope = match serde_json::from_value(outbox.envelope_data.clone()) {
                Ok(e) => e,
                Err(e) => {
                    // Malformed stored envelope: a SerializationError (§7), not
                    // a transport problem. Fail the row so an operator can fix
                    // the data and skip/re-enqueue it.
                    self.strategy.queue_outbox_failure(
                        outbox.message_id,
                        StatusBits::FAILED,
                        format!("malformed envelope: {e}"),
                    );
                    continue;
                }
            };

            match self.publisher.publish(&envelope, &outbox.destination).await {
                Ok(PublishOutcome::Accepted) => {
                    self.strategy.queue_outbox_completion(outbox.message_id, StatusBits::PUBLISHED);
                }
                Ok(PublishOutcome::Refused(reason)) => {
                    // Not a terminal failure (spec.md §4.3 point 2): the lease
                    // is simply released on the next flush by never being
                    // renewed, and the row becomes claimable again.
                    tracing::warn!(
                        message_id = %outbox.message_id,
                        destination = %outbox.destination,
                        reason = %reason,
                        "publish refused; row will be retried"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        message_id = %outbox.message_id,
                        destination = %outbox.destination,
                        error = %e,
                        "transport error publishing outbox row; will retry"
                    );
                }
            }
        }

        Ok(batch.claimed.is_empty())
    }

    /// Runs the poll loop until `cancellation` fires, sleeping
    /// `poll_interval` between cycles (spec.md §4.3 points 4-5).
    pub async fn run(self: Arc<Self>, cancellation: CancellationToken) {
        let (mut idle, _rx) = IdleTracker::new(self.config.idle_threshold_polls);
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    tracing::info!("publisher worker shutting down");
                    break;
                }
                result = self.run_once() => {
                    match result {
                        Ok(empty) => idle.record_poll(empty),
                        Err(e) => tracing::error!(error = %e, "publisher worker poll failed"),
                    }
                }
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{InMemoryStrategy, NullTransportPublisher, RefusingTransportPublisher};
    use std::sync::Mutex as StdMutex;

    #[tokio::test]
    async fn accepted_publish_queues_a_completion() {
        let strategy = Arc::new(InMemoryStrategy::with_outbox_row("order-1", "dest-a"));
        let worker = PublisherWorker::new(
            ServiceInstanceId::new("svc", "host"),
            strategy.clone(),
            Arc::new(NullTransportPublisher::accepting()),
            PublisherWorkerConfig {
                poll_interval: Duration::from_millis(1),
                lease_seconds: 30,
                stale_threshold_seconds: 60,
                partition_count: 1,
                max_partitions_per_instance: None,
                idle_threshold_polls: 2,
            },
        );

        worker.run_once().await.unwrap();
        assert_eq!(strategy.outbox_completions().len(), 1);
        assert!(strategy.outbox_failures().is_empty());
    }

    #[tokio::test]
    async fn refused_publish_does_not_complete_or_fail() {
        let strategy = Arc::new(InMemoryStrategy::with_outbox_row("order-1", "dest-a"));
        let worker = PublisherWorker::new(
            ServiceInstanceId::new("svc", "host"),
            strategy.clone(),
            Arc::new(RefusingTransportPublisher),
            PublisherWorkerConfig {
                poll_interval: Duration::from_millis(1),
                lease_seconds: 30,
                stale_threshold_seconds: 60,
                partition_count: 1,
                max_partitions_per_instance: None,
                idle_threshold_polls: 2,
            },
        );

        worker.run_once().await.unwrap();
        assert!(strategy.outbox_completions().is_empty());
        assert!(strategy.outbox_failures().is_empty());
    }

    #[tokio::test]
    async fn empty_batch_reports_idle_after_threshold() {
        let strategy = Arc::new(InMemoryStrategy::empty());
        let worker = Arc::new(PublisherWorker::new(
            ServiceInstanceId::new("svc", "host"),
            strategy,
            Arc::new(NullTransportPublisher::accepting()),
            PublisherWorkerConfig {
                poll_interval: Duration::from_millis(1),
                lease_seconds: 30,
                stale_threshold_seconds: 60,
                partition_count: 1,
                max_partitions_per_instance: None,
                idle_threshold_polls: 2,
            },
        ));

        let was_empty = StdMutex::new(Vec::new());
        for _ in 0..2 {
            let empty = worker.run_once().await.unwrap();
            was_empty.lock().unwrap().push(empty);
        }
        assert!(was_empty.lock().unwrap().iter().all(|e| *e));
    }
}
