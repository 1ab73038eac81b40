//! Composes the Publisher/Consumer/Perspective loops into one deterministic
//! drain harness, grounded on `mqk-testkit::orchestrator`'s "composes
//! existing engines into a single loop ... intentionally minimal: no network
//! I/O, deterministic" shape. A scenario test drives `drain_to_idle`
//! instead of sleeping on background `tokio::spawn`ed loops (spec.md §4.7
//! "test synchronization" use of idle signals).

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use wcf_coordinator::WorkCoordinatorStrategy;
use wcf_dispatch::{ReceptorRegistry, RequestScope};
use wcf_types::ServiceInstanceId;
use wcf_workers::{
    ConsumerWorker, ConsumerWorkerConfig, MessageTypeCatalog, PerspectiveRegistry, PerspectiveStore,
    PerspectiveWorker, PerspectiveWorkerConfig, PublisherWorker, PublisherWorkerConfig, TransportPublisher,
    TransportSubscriber,
};

/// Shared timing knobs for all three workers in a harness (individual
/// `*WorkerConfig`s still carry their own `idle_threshold_polls`).
#[derive(Clone)]
pub struct HarnessConfig {
    pub lease_seconds: i64,
    pub stale_threshold_seconds: i64,
    pub partition_count: i32,
    pub max_partitions_per_instance: Option<i32>,
    pub idle_threshold_polls: u32,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            lease_seconds: 30,
            stale_threshold_seconds: 60,
            partition_count: 1,
            max_partitions_per_instance: None,
            idle_threshold_polls: 2,
        }
    }
}

/// One instance's worth of Publisher + Consumer + Perspective, wired to the
/// same strategy, for scenario tests that need the full C3→C4→C5 pipeline
/// without a live broker or a second process.
pub struct TestHarness {
    publisher: PublisherWorker,
    consumer: ConsumerWorker,
    perspective: PerspectiveWorker,
}

impl TestHarness {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        instance: ServiceInstanceId,
        strategy: Arc<dyn WorkCoordinatorStrategy>,
        transport_publisher: Arc<dyn TransportPublisher>,
        transport_subscriber: Arc<dyn TransportSubscriber>,
        catalog: Arc<dyn MessageTypeCatalog>,
        receptors: Arc<ReceptorRegistry>,
        perspectives: Arc<PerspectiveRegistry>,
        store: Arc<dyn PerspectiveStore>,
        config: HarnessConfig,
    ) -> Self {
        let publisher = PublisherWorker::new(
            instance.clone(),
            strategy.clone(),
            transport_publisher,
            PublisherWorkerConfig {
                poll_interval: Duration::from_millis(1),
                lease_seconds: config.lease_seconds,
                stale_threshold_seconds: config.stale_threshold_seconds,
                partition_count: config.partition_count,
                max_partitions_per_instance: config.max_partitions_per_instance,
                idle_threshold_polls: config.idle_threshold_polls,
            },
        );

        let consumer = ConsumerWorker::new(
            pool.clone(),
            instance.clone(),
            strategy.clone(),
            transport_subscriber,
            catalog,
            receptors,
            Arc::new(RequestScope::for_test),
            ConsumerWorkerConfig {
                poll_interval: Duration::from_millis(1),
                lease_seconds: config.lease_seconds,
                stale_threshold_seconds: config.stale_threshold_seconds,
                partition_count: config.partition_count,
                max_partitions_per_instance: config.max_partitions_per_instance,
                idle_threshold_polls: config.idle_threshold_polls,
            },
        );

        let perspective = PerspectiveWorker::new(
            pool,
            instance,
            strategy,
            perspectives,
            store,
            PerspectiveWorkerConfig {
                poll_interval: Duration::from_millis(1),
                lease_seconds: config.lease_seconds,
                stale_threshold_seconds: config.stale_threshold_seconds,
                partition_count: config.partition_count,
                max_partitions_per_instance: config.max_partitions_per_instance,
                idle_threshold_polls: config.idle_threshold_polls,
            },
        );

        Self { publisher, consumer, perspective }
    }

    /// One round: publisher drains outbox → transport, consumer drains
    /// transport → inbox → dispatch, perspective replays checkpoints —
    /// the same left-to-right order spec.md §2's data-flow diagram shows.
    /// Returns whether every worker's batch was empty this round.
    pub async fn drain_once(&self) -> anyhow::Result<bool> {
        let publisher_idle = self.publisher.run_once().await?;
        let consumer_idle = self.consumer.run_once().await?;
        let perspective_idle = self.perspective.run_once().await?;
        Ok(publisher_idle && consumer_idle && perspective_idle)
    }

    /// Drains rounds until one reports every worker idle, or `max_rounds` is
    /// exhausted. Scenario tests use this instead of a wall-clock sleep.
    pub async fn drain_to_idle(&self, max_rounds: usize) -> anyhow::Result<()> {
        for _ in 0..max_rounds {
            if self.drain_once().await? {
                return Ok(());
            }
        }
        anyhow::bail!("harness did not reach idle within {max_rounds} rounds")
    }
}
