//! Work-Coordinator Strategy (C2, spec.md §4.2): a per-instance façade over
//! [`wcf_db::process_work_batch`]. Three strategies share one accumulator —
//! they differ only in *when* they flush.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use wcf_db::{
    ClaimedRow, InboxCompletion, InboxFailure, NewInboxMessage, NewOutboxMessage, OutboxCompletion,
    OutboxFailure, PerspectiveCompletion, PerspectiveFailure, ProcessWorkBatchArgs,
};
use wcf_types::ServiceInstanceId;

/// The rows a flush returned — either real claimed work or
/// [`WorkBatch::empty`] when a concurrent flush was already in flight.
#[derive(Debug, Clone, Default)]
pub struct WorkBatch {
    pub claimed: Vec<ClaimedRow>,
}

impl WorkBatch {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }
}

/// Fixed per-instance parameters a strategy needs on every flush call;
/// these rarely change after construction, unlike the queued operations.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub lease_seconds: i64,
    pub stale_threshold_seconds: i64,
    pub partition_count: i32,
    pub max_partitions_per_instance: Option<i32>,
}

/// Common contract implemented by [`ImmediateStrategy`], [`IntervalStrategy`]
/// and [`ManualStrategy`] (spec.md §4.2). The `queue_*` methods are
/// synchronous — they only ever touch the in-memory pending set, never I/O —
/// while `flush` is the sole async, database-touching operation.
#[async_trait]
pub trait WorkCoordinatorStrategy: Send + Sync {
    fn queue_outbox_message(&self, message: NewOutboxMessage);
    fn queue_inbox_message(&self, message: NewInboxMessage);
    fn queue_outbox_completion(&self, message_id: Uuid, status: i32);
    fn queue_outbox_failure(&self, message_id: Uuid, status: i32, error_text: String);
    fn queue_inbox_completion(&self, message_id: Uuid, status: i32);
    fn queue_inbox_failure(&self, message_id: Uuid, status: i32, error_text: String);
    fn queue_perspective_completion(&self, perspective_name: String, stream_id: String, last_event_id: Uuid, last_sequence_number: i64);
    fn queue_perspective_failure(&self, perspective_name: String, stream_id: String, error_text: String);
    fn queue_renew_outbox_lease(&self, message_id: Uuid);
    fn queue_renew_inbox_lease(&self, message_id: Uuid);

    /// Drain the queue into one `process_work_batch` call. Concurrent flushes
    /// on the same strategy are serialized; a second concurrent call returns
    /// [`WorkBatch::empty`] immediately instead of blocking (spec.md §4.2).
    async fn flush(&self, flags: Value) -> Result<WorkBatch>;
}

#[derive(Default)]
struct PendingOps {
    new_outbox: Vec<NewOutboxMessage>,
    new_inbox: Vec<NewInboxMessage>,
    outbox_completions: Vec<OutboxCompletion>,
    outbox_failures: Vec<OutboxFailure>,
    inbox_completions: Vec<InboxCompletion>,
    inbox_failures: Vec<InboxFailure>,
    perspective_completions: Vec<PerspectiveCompletion>,
    perspective_failures: Vec<PerspectiveFailure>,
    renew_outbox_lease_ids: Vec<Uuid>,
    renew_inbox_lease_ids: Vec<Uuid>,
}

impl PendingOps {
    fn take(&mut self) -> PendingOps {
        std::mem::take(self)
    }

    /// Merge a drained-but-unflushed set of operations back in, preserving
    /// anything queued in the meantime. Used when a flush's round-trip to
    /// C1 fails, so the caller's next flush attempt still sees this work
    /// (mirrors the teacher's "release claim on failure" discipline — a
    /// failed flush must not silently drop queued operations).
    fn restore(&mut self, mut other: PendingOps) {
        other.new_outbox.append(&mut self.new_outbox);
        self.new_outbox = other.new_outbox;
        other.new_inbox.append(&mut self.new_inbox);
        self.new_inbox = other.new_inbox;
        other.outbox_completions.append(&mut self.outbox_completions);
        self.outbox_completions = other.outbox_completions;
        other.outbox_failures.append(&mut self.outbox_failures);
        self.outbox_failures = other.outbox_failures;
        other.inbox_completions.append(&mut self.inbox_completions);
        self.inbox_completions = other.inbox_completions;
        other.inbox_failures.append(&mut self.inbox_failures);
        self.inbox_failures = other.inbox_failures;
        other
            .perspective_completions
            .append(&mut self.perspective_completions);
        self.perspective_completions = other.perspective_completions;
        other
            .perspective_failures
            .append(&mut self.perspective_failures);
        self.perspective_failures = other.perspective_failures;
        other
            .renew_outbox_lease_ids
            .append(&mut self.renew_outbox_lease_ids);
        self.renew_outbox_lease_ids = other.renew_outbox_lease_ids;
        other
            .renew_inbox_lease_ids
            .append(&mut self.renew_inbox_lease_ids);
        self.renew_inbox_lease_ids = other.renew_inbox_lease_ids;
    }

    fn is_empty(&self) -> bool {
        self.new_outbox.is_empty()
            && self.new_inbox.is_empty()
            && self.outbox_completions.is_empty()
            && self.outbox_failures.is_empty()
            && self.inbox_completions.is_empty()
            && self.inbox_failures.is_empty()
            && self.perspective_completions.is_empty()
            && self.perspective_failures.is_empty()
            && self.renew_outbox_lease_ids.is_empty()
            && self.renew_inbox_lease_ids.is_empty()
    }
}

/// Shared accumulator + flush-gate mechanics, reused by all three strategy
/// shapes. `pending` is a plain `std::sync::Mutex` — its critical sections
/// are a handful of `Vec::push`/`mem::take` calls and never span an await
/// point. `flush_gate` is a `tokio::sync::Mutex` held deliberately across
/// the `process_work_batch` await: that's its entire purpose, serializing
/// concurrent flushes rather than letting them race C1.
struct Accumulator {
    pool: PgPool,
    instance: ServiceInstanceId,
    config: CoordinatorConfig,
    pending: StdMutex<PendingOps>,
    flush_gate: AsyncMutex<()>,
}

impl Accumulator {
    fn new(pool: PgPool, instance: ServiceInstanceId, config: CoordinatorConfig) -> Self {
        Self {
            pool,
            instance,
            config,
            pending: StdMutex::new(PendingOps::default()),
            flush_gate: AsyncMutex::new(()),
        }
    }

    fn queue_outbox_message(&self, message: NewOutboxMessage) {
        self.pending.lock().unwrap().new_outbox.push(message);
    }

    fn queue_inbox_message(&self, message: NewInboxMessage) {
        self.pending.lock().unwrap().new_inbox.push(message);
    }

    fn queue_outbox_completion(&self, message_id: Uuid, status: i32) {
        self.pending
            .lock()
            .unwrap()
            .outbox_completions
            .push(OutboxCompletion { message_id, status });
    }

    fn queue_outbox_failure(&self, message_id: Uuid, status: i32, error: String) {
        self.pending.lock().unwrap().outbox_failures.push(OutboxFailure {
            message_id,
            status,
            error,
        });
    }

    fn queue_inbox_completion(&self, message_id: Uuid, status: i32) {
        self.pending
            .lock()
            .unwrap()
            .inbox_completions
            .push(InboxCompletion { message_id, status });
    }

    fn queue_inbox_failure(&self, message_id: Uuid, status: i32, error: String) {
        self.pending.lock().unwrap().inbox_failures.push(InboxFailure {
            message_id,
            status,
            error,
        });
    }

    fn queue_perspective_completion(&self, perspective_name: String, stream_id: String, last_event_id: Uuid, last_sequence_number: i64) {
        self.pending.lock().unwrap().perspective_completions.push(PerspectiveCompletion {
            perspective_name,
            stream_id,
            last_event_id,
            last_sequence_number,
        });
    }

    fn queue_perspective_failure(&self, perspective_name: String, stream_id: String, error: String) {
        self.pending.lock().unwrap().perspective_failures.push(PerspectiveFailure {
            perspective_name,
            stream_id,
            error,
        });
    }

    fn queue_renew_outbox_lease(&self, message_id: Uuid) {
        self.pending.lock().unwrap().renew_outbox_lease_ids.push(message_id);
    }

    fn queue_renew_inbox_lease(&self, message_id: Uuid) {
        self.pending.lock().unwrap().renew_inbox_lease_ids.push(message_id);
    }

    async fn flush(&self, flags: Value) -> Result<WorkBatch> {
        let _gate = match self.flush_gate.try_lock() {
            Ok(gate) => gate,
            Err(_) => {
                tracing::debug!(
                    instance_id = %self.instance.instance_id,
                    "flush skipped: concurrent flush already in flight"
                );
                return Ok(WorkBatch::empty());
            }
        };

        let drained = self.pending.lock().unwrap().take();
        let was_empty = drained.is_empty();

        let args = ProcessWorkBatchArgs {
            instance: self.instance.clone(),
            metadata: Value::Object(Default::default()),
            outbox_completions: drained.outbox_completions.clone(),
            outbox_failures: drained.outbox_failures.clone(),
            inbox_completions: drained.inbox_completions.clone(),
            inbox_failures: drained.inbox_failures.clone(),
            receptor_completions: Vec::new(),
            receptor_failures: Vec::new(),
            perspective_completions: drained.perspective_completions.clone(),
            perspective_failures: drained.perspective_failures.clone(),
            new_outbox: drained.new_outbox.clone(),
            new_inbox: drained.new_inbox.clone(),
            renew_outbox_lease_ids: drained.renew_outbox_lease_ids.clone(),
            renew_inbox_lease_ids: drained.renew_inbox_lease_ids.clone(),
            lease_seconds: self.config.lease_seconds,
            stale_threshold_seconds: self.config.stale_threshold_seconds,
            flags,
            partition_count: self.config.partition_count,
            max_partitions_per_instance: self.config.max_partitions_per_instance,
        };

        match wcf_db::process_work_batch(&self.pool, args).await {
            Ok(rows) => Ok(WorkBatch { claimed: rows }),
            Err(e) => {
                if !was_empty {
                    tracing::warn!(
                        instance_id = %self.instance.instance_id,
                        error = %e,
                        "process_work_batch failed; restoring queued operations for next flush"
                    );
                    self.pending.lock().unwrap().restore(drained);
                }
                Err(e)
            }
        }
    }
}

/// Flushes synchronously on every queued operation. Because `queue_*` is a
/// synchronous trait method, the flush itself runs on a detached task
/// (teacher's `mqk-daemon` fire-and-forget background-task convention) —
/// the caller is never blocked on a database round-trip just to enqueue one
/// row. Callers that need the resulting `WorkBatch` should call `flush`
/// directly instead of relying on the background flush.
pub struct ImmediateStrategy {
    acc: Arc<Accumulator>,
}

impl ImmediateStrategy {
    pub fn new(pool: PgPool, instance: ServiceInstanceId, config: CoordinatorConfig) -> Self {
        Self {
            acc: Arc::new(Accumulator::new(pool, instance, config)),
        }
    }

    fn spawn_background_flush(&self) {
        let acc = self.acc.clone();
        tokio::spawn(async move {
            if let Err(e) = acc.flush(Value::Null).await {
                tracing::warn!(error = %e, "immediate-strategy background flush failed");
            }
        });
    }
}

#[async_trait]
impl WorkCoordinatorStrategy for ImmediateStrategy {
    fn queue_outbox_message(&self, message: NewOutboxMessage) {
        self.acc.queue_outbox_message(message);
        self.spawn_background_flush();
    }

    fn queue_inbox_message(&self, message: NewInboxMessage) {
        self.acc.queue_inbox_message(message);
        self.spawn_background_flush();
    }

    fn queue_outbox_completion(&self, message_id: Uuid, status: i32) {
        self.acc.queue_outbox_completion(message_id, status);
        self.spawn_background_flush();
    }

    fn queue_outbox_failure(&self, message_id: Uuid, status: i32, error_text: String) {
        self.acc.queue_outbox_failure(message_id, status, error_text);
        self.spawn_background_flush();
    }

    fn queue_inbox_completion(&self, message_id: Uuid, status: i32) {
        self.acc.queue_inbox_completion(message_id, status);
        self.spawn_background_flush();
    }

    fn queue_inbox_failure(&self, message_id: Uuid, status: i32, error_text: String) {
        self.acc.queue_inbox_failure(message_id, status, error_text);
        self.spawn_background_flush();
    }

    fn queue_perspective_completion(&self, perspective_name: String, stream_id: String, last_event_id: Uuid, last_sequence_number: i64) {
        self.acc.queue_perspective_completion(perspective_name, stream_id, last_event_id, last_sequence_number);
        self.spawn_background_flush();
    }

    fn queue_perspective_failure(&self, perspective_name: String, stream_id: String, error_text: String) {
        self.acc.queue_perspective_failure(perspective_name, stream_id, error_text);
        self.spawn_background_flush();
    }

    fn queue_renew_outbox_lease(&self, message_id: Uuid) {
        self.acc.queue_renew_outbox_lease(message_id);
    }

    fn queue_renew_inbox_lease(&self, message_id: Uuid) {
        self.acc.queue_renew_inbox_lease(message_id);
    }

    async fn flush(&self, flags: Value) -> Result<WorkBatch> {
        self.acc.flush(flags).await
    }
}

/// Only flushes on explicit [`WorkCoordinatorStrategy::flush`] calls.
pub struct ManualStrategy {
    acc: Arc<Accumulator>,
}

impl ManualStrategy {
    pub fn new(pool: PgPool, instance: ServiceInstanceId, config: CoordinatorConfig) -> Self {
        Self {
            acc: Arc::new(Accumulator::new(pool, instance, config)),
        }
    }
}

#[async_trait]
impl WorkCoordinatorStrategy for ManualStrategy {
    fn queue_outbox_message(&self, message: NewOutboxMessage) {
        self.acc.queue_outbox_message(message);
    }

    fn queue_inbox_message(&self, message: NewInboxMessage) {
        self.acc.queue_inbox_message(message);
    }

    fn queue_outbox_completion(&self, message_id: Uuid, status: i32) {
        self.acc.queue_outbox_completion(message_id, status);
    }

    fn queue_outbox_failure(&self, message_id: Uuid, status: i32, error_text: String) {
        self.acc.queue_outbox_failure(message_id, status, error_text);
    }

    fn queue_inbox_completion(&self, message_id: Uuid, status: i32) {
        self.acc.queue_inbox_completion(message_id, status);
    }

    fn queue_inbox_failure(&self, message_id: Uuid, status: i32, error_text: String) {
        self.acc.queue_inbox_failure(message_id, status, error_text);
    }

    fn queue_perspective_completion(&self, perspective_name: String, stream_id: String, last_event_id: Uuid, last_sequence_number: i64) {
        self.acc.queue_perspective_completion(perspective_name, stream_id, last_event_id, last_sequence_number);
    }

    fn queue_perspective_failure(&self, perspective_name: String, stream_id: String, error_text: String) {
        self.acc.queue_perspective_failure(perspective_name, stream_id, error_text);
    }

    fn queue_renew_outbox_lease(&self, message_id: Uuid) {
        self.acc.queue_renew_outbox_lease(message_id);
    }

    fn queue_renew_inbox_lease(&self, message_id: Uuid) {
        self.acc.queue_renew_inbox_lease(message_id);
    }

    async fn flush(&self, flags: Value) -> Result<WorkBatch> {
        self.acc.flush(flags).await
    }
}

/// Flushes on a background `tokio::time::interval` tick, in addition to
/// supporting explicit flushes (spec.md §4.2). Dropping the returned
/// `Arc<IntervalStrategy>`'s last handle does not stop the background
/// task; cancel via the `CancellationToken` passed to [`Self::spawn`]
/// (teacher: `mqk-daemon::state::spawn_heartbeat` shape).
pub struct IntervalStrategy {
    acc: Arc<Accumulator>,
    interval_task: JoinHandle<()>,
}

impl IntervalStrategy {
    pub fn spawn(
        pool: PgPool,
        instance: ServiceInstanceId,
        config: CoordinatorConfig,
        interval: Duration,
        cancellation: CancellationToken,
    ) -> Arc<Self> {
        let acc = Arc::new(Accumulator::new(pool, instance, config));
        let acc_bg = acc.clone();
        let interval_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => {
                        tracing::info!("interval strategy flush loop shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = acc_bg.flush(Value::Null).await {
                            tracing::warn!(error = %e, "interval flush failed");
                        }
                    }
                }
            }
        });

        Arc::new(Self { acc, interval_task })
    }

    pub fn abort(&self) {
        self.interval_task.abort();
    }
}

#[async_trait]
impl WorkCoordinatorStrategy for IntervalStrategy {
    fn queue_outbox_message(&self, message: NewOutboxMessage) {
        self.acc.queue_outbox_message(message);
    }

    fn queue_inbox_message(&self, message: NewInboxMessage) {
        self.acc.queue_inbox_message(message);
    }

    fn queue_outbox_completion(&self, message_id: Uuid, status: i32) {
        self.acc.queue_outbox_completion(message_id, status);
    }

    fn queue_outbox_failure(&self, message_id: Uuid, status: i32, error_text: String) {
        self.acc.queue_outbox_failure(message_id, status, error_text);
    }

    fn queue_inbox_completion(&self, message_id: Uuid, status: i32) {
        self.acc.queue_inbox_completion(message_id, status);
    }

    fn queue_inbox_failure(&self, message_id: Uuid, status: i32, error_text: String) {
        self.acc.queue_inbox_failure(message_id, status, error_text);
    }

    fn queue_perspective_completion(&self, perspective_name: String, stream_id: String, last_event_id: Uuid, last_sequence_number: i64) {
        self.acc.queue_perspective_completion(perspective_name, stream_id, last_event_id, last_sequence_number);
    }

    fn queue_perspective_failure(&self, perspective_name: String, stream_id: String, error_text: String) {
        self.acc.queue_perspective_failure(perspective_name, stream_id, error_text);
    }

    fn queue_renew_outbox_lease(&self, message_id: Uuid) {
        self.acc.queue_renew_outbox_lease(message_id);
    }

    fn queue_renew_inbox_lease(&self, message_id: Uuid) {
        self.acc.queue_renew_inbox_lease(message_id);
    }

    async fn flush(&self, flags: Value) -> Result<WorkBatch> {
        self.acc.flush(flags).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_ops_restore_preserves_both_generations() {
        let mut pending = PendingOps::default();
        pending.queue_test_outbox_completion(Uuid::nil(), 1);
        let drained = pending.take();
        assert!(pending.is_empty());

        pending.queue_test_outbox_completion(Uuid::max(), 2);
        pending.restore(drained);

        assert_eq!(pending.outbox_completions.len(), 2);
        assert_eq!(pending.outbox_completions[0].message_id, Uuid::nil());
        assert_eq!(pending.outbox_completions[1].message_id, Uuid::max());
    }

    impl PendingOps {
        fn queue_test_outbox_completion(&mut self, message_id: Uuid, status: i32) {
            self.outbox_completions.push(OutboxCompletion { message_id, status });
        }
    }

    #[test]
    fn work_batch_empty_is_empty() {
        assert!(WorkBatch::empty().is_empty());
    }
}
