//! Default worker wiring: boots Publisher/Consumer/Perspective loops against
//! `wcf-testkit`'s in-memory fakes (`FakeTransport`, `InMemoryPerspectiveStore`)
//! until a real broker client and application-owned read-model store are
//! plugged in (spec.md §1 "narrow interfaces"; SPEC_FULL.md §7).
//!
//! Drives each worker with its own poll loop rather than `Worker::run`, so
//! the daemon can keep the `IdleTracker` receiver for `GET /v1/status`
//! instead of discarding it the way a standalone `run()` caller would. The
//! Consumer and Perspective loops additionally fire the two lifecycle
//! stages SPEC_FULL.md §7 names as the SSE feed — `PostDistributeAsync` and
//! `PostPerspectiveInline` — since `wcf-hooks`' registry is a library seam
//! the host wires in, not something `ConsumerWorker`/`PerspectiveWorker`
//! call on their own.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use wcf_config::WorkerConfig;
use wcf_coordinator::{CoordinatorConfig, IntervalStrategy, WorkCoordinatorStrategy};
use wcf_dispatch::{ReceptorRegistry, RequestScope};
use wcf_hooks::{AsyncHookPool, LifecycleContext, LifecycleRegistry, LifecycleStage};
use wcf_types::ServiceInstanceId;
use wcf_workers::{
    ConsumerWorker, ConsumerWorkerConfig, IdleTracker, MessageTypeCatalog, PerspectiveRegistry, PerspectiveWorker,
    PerspectiveWorkerConfig, PublisherWorker, PublisherWorkerConfig,
};

use crate::state::BusMsg;

/// A catalog with no registered message types — a real deployment supplies
/// one generated from its message schemas; this keeps the default wiring
/// bootable with zero configured receptors (spec.md §1 out-of-scope DSL
/// layer).
struct EmptyCatalog;

impl MessageTypeCatalog for EmptyCatalog {
    fn is_event(&self, _message_type: &str) -> bool {
        false
    }
    fn handler_name(&self, _message_type: &str) -> Option<String> {
        None
    }
}

pub struct SpawnedWorkers {
    pub publisher_idle: watch::Receiver<bool>,
    pub consumer_idle: watch::Receiver<bool>,
    pub perspective_idle: watch::Receiver<bool>,
    pub cancellation: CancellationToken,
}

fn forward_to_bus(bus: broadcast::Sender<BusMsg>, stage: &'static str) -> impl Fn(&LifecycleContext) -> Result<(), wcf_hooks::LifecycleHookError> {
    move |ctx: &LifecycleContext| {
        let _ = bus.send(BusMsg::Lifecycle {
            stage: stage.to_string(),
            message_id: ctx.message_id,
            message_type: ctx.message_type.clone(),
            stream_id: ctx.stream_id.clone(),
        });
        Ok(())
    }
}

/// Registers the two hooks SPEC_FULL.md §7 names as the SSE feed.
fn build_lifecycle_registry(bus: broadcast::Sender<BusMsg>) -> LifecycleRegistry {
    let mut registry = LifecycleRegistry::new();
    registry.register(
        LifecycleStage::PostPerspectiveInline,
        Box::new(forward_to_bus(bus.clone(), "PostPerspectiveInline")),
    );
    registry.register(
        LifecycleStage::PostDistributeAsync,
        Box::new(forward_to_bus(bus, "PostDistributeAsync")),
    );
    registry
}

/// Boots the three worker loops plus the lifecycle hooks that feed
/// `GET /v1/events`. `worker_config` supplies the shared timing knobs
/// (spec.md §6); a real deployment loads it via
/// `wcf_config::load_worker_config`.
pub fn spawn_default_workers(
    pool: sqlx::PgPool,
    instance: ServiceInstanceId,
    worker_config: WorkerConfig,
    bus: broadcast::Sender<BusMsg>,
) -> SpawnedWorkers {
    let cancellation = CancellationToken::new();
    let poll_interval = Duration::from_millis(worker_config.polling_interval_ms);

    let coordinator_config = CoordinatorConfig {
        lease_seconds: worker_config.lease_seconds as i64,
        stale_threshold_seconds: worker_config.stale_threshold_seconds as i64,
        partition_count: worker_config.partition_count as i32,
        max_partitions_per_instance: worker_config.max_partitions_per_instance.map(|v| v as i32),
    };
    let strategy: Arc<dyn WorkCoordinatorStrategy> = IntervalStrategy::spawn(
        pool.clone(),
        instance.clone(),
        coordinator_config,
        poll_interval,
        cancellation.clone(),
    );

    let transport = Arc::new(wcf_testkit::FakeTransport::new());
    let perspective_store = Arc::new(wcf_testkit::InMemoryPerspectiveStore::new());
    let receptors = Arc::new(ReceptorRegistry::new());
    let perspectives = Arc::new(PerspectiveRegistry::new());
    let catalog = Arc::new(EmptyCatalog);

    let lifecycle_registry = Arc::new(build_lifecycle_registry(bus));
    let lifecycle_pool = Arc::new(AsyncHookPool::spawn(lifecycle_registry.clone(), 256, 1, cancellation.clone()));

    let lease_seconds = worker_config.lease_seconds as i64;
    let stale_threshold_seconds = worker_config.stale_threshold_seconds as i64;
    let partition_count = worker_config.partition_count as i32;
    let max_partitions_per_instance = worker_config.max_partitions_per_instance.map(|v| v as i32);
    let idle_threshold_polls = worker_config.idle_threshold_polls;

    let publisher = Arc::new(PublisherWorker::new(
        instance.clone(),
        strategy.clone(),
        transport.clone(),
        PublisherWorkerConfig {
            poll_interval,
            lease_seconds,
            stale_threshold_seconds,
            partition_count,
            max_partitions_per_instance,
            idle_threshold_polls,
        },
    ));

    let consumer = Arc::new(ConsumerWorker::new(
        pool.clone(),
        instance.clone(),
        strategy.clone(),
        Arc::new(wcf_testkit::FakeTransportSubscriber::new(transport.clone(), Vec::new())),
        catalog,
        receptors,
        Arc::new(RequestScope::for_test),
        ConsumerWorkerConfig {
            poll_interval,
            lease_seconds,
            stale_threshold_seconds,
            partition_count,
            max_partitions_per_instance,
            idle_threshold_polls,
        },
    ));

    let perspective = Arc::new(PerspectiveWorker::new(
        pool,
        instance,
        strategy,
        perspectives,
        perspective_store,
        PerspectiveWorkerConfig {
            poll_interval,
            lease_seconds,
            stale_threshold_seconds,
            partition_count,
            max_partitions_per_instance,
            idle_threshold_polls,
        },
    ));

    let publisher_idle = spawn_publisher_loop(publisher, idle_threshold_polls, poll_interval, cancellation.clone());
    let consumer_idle = spawn_consumer_loop(
        consumer,
        lifecycle_pool.clone(),
        idle_threshold_polls,
        poll_interval,
        cancellation.clone(),
    );
    let perspective_idle = spawn_perspective_loop(
        perspective,
        lifecycle_registry,
        idle_threshold_polls,
        poll_interval,
        cancellation.clone(),
    );

    SpawnedWorkers {
        publisher_idle,
        consumer_idle,
        perspective_idle,
        cancellation,
    }
}

fn synthetic_context(message_type: &'static str) -> LifecycleContext {
    LifecycleContext {
        message_id: uuid::Uuid::new_v4(),
        message_type: message_type.to_string(),
        stream_id: String::new(),
        payload: serde_json::Value::Null,
        occurred_at: chrono::Utc::now(),
    }
}

fn spawn_publisher_loop(
    worker: Arc<PublisherWorker>,
    idle_threshold_polls: u32,
    poll_interval: Duration,
    cancellation: CancellationToken,
) -> watch::Receiver<bool> {
    let (mut tracker, rx) = IdleTracker::new(idle_threshold_polls);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    tracing::info!(worker = "publisher", "worker loop shutting down");
                    break;
                }
                result = worker.run_once() => {
                    match result {
                        Ok(empty) => tracker.record_poll(empty),
                        Err(e) => tracing::error!(worker = "publisher", error = %e, "worker poll failed"),
                    }
                }
            }
            tokio::time::sleep(poll_interval).await;
        }
    });
    rx
}

/// Fires `PostDistributeAsync` on every non-empty poll (spec.md §4.7; fed
/// to `GET /v1/events` through `AsyncHookPool`).
fn spawn_consumer_loop(
    worker: Arc<ConsumerWorker>,
    lifecycle_pool: Arc<AsyncHookPool>,
    idle_threshold_polls: u32,
    poll_interval: Duration,
    cancellation: CancellationToken,
) -> watch::Receiver<bool> {
    let (mut tracker, rx) = IdleTracker::new(idle_threshold_polls);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    tracing::info!(worker = "consumer", "worker loop shutting down");
                    break;
                }
                result = worker.run_once() => {
                    match result {
                        Ok(empty) => {
                            tracker.record_poll(empty);
                            if !empty {
                                lifecycle_pool
                                    .dispatch(LifecycleStage::PostDistributeAsync, synthetic_context("InboxDispatched"))
                                    .await;
                            }
                        }
                        Err(e) => tracing::error!(worker = "consumer", error = %e, "worker poll failed"),
                    }
                }
            }
            tokio::time::sleep(poll_interval).await;
        }
    });
    rx
}

/// Fires `PostPerspectiveInline` on every non-empty poll (spec.md §4.7),
/// synchronously — the stage is `Inline`, so this runs it directly rather
/// than through the async pool.
fn spawn_perspective_loop(
    worker: Arc<PerspectiveWorker>,
    lifecycle_registry: Arc<LifecycleRegistry>,
    idle_threshold_polls: u32,
    poll_interval: Duration,
    cancellation: CancellationToken,
) -> watch::Receiver<bool> {
    let (mut tracker, rx) = IdleTracker::new(idle_threshold_polls);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    tracing::info!(worker = "perspective", "worker loop shutting down");
                    break;
                }
                result = worker.run_once() => {
                    match result {
                        Ok(empty) => {
                            tracker.record_poll(empty);
                            if !empty {
                                if let Err(e) = lifecycle_registry
                                    .run_inline(LifecycleStage::PostPerspectiveInline, &synthetic_context("PerspectiveCheckpointAdvanced"))
                                {
                                    tracing::warn!(error = %e, "PostPerspectiveInline hook failed");
                                }
                            }
                        }
                        Err(e) => tracing::error!(worker = "perspective", error = %e, "worker poll failed"),
                    }
                }
            }
            tokio::time::sleep(poll_interval).await;
        }
    });
    rx
}
