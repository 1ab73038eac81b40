//! Perspective Worker (C5, spec.md §4.5): drains perspective-checkpoint
//! rows, replays ordered events through a pure `Apply` function, persists
//! the updated read-model row.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use wcf_coordinator::WorkCoordinatorStrategy;
use wcf_db::{ClaimedRow, ProcessWorkBatchArgs, StoredEvent};
use wcf_types::ServiceInstanceId;

use crate::idle::IdleTracker;

/// Raised by an `Apply` function. Distinct from [`wcf_dispatch::ReceptorError`]
/// because a perspective failure carries the offending event's id
/// (spec.md §4.5 "queue a perspective failure with the error text and the
/// offending event's id").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyError {
    pub message: String,
    pub event_id: Uuid,
}

impl std::fmt::Display for ApplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "apply failed on event {}: {}", self.event_id, self.message)
    }
}

impl std::error::Error for ApplyError {}

/// A pure projection function: no I/O, deterministic (spec.md §4.5 point 3).
pub type ApplyFn = Box<dyn Fn(&Value, &StoredEvent) -> Result<Value, ApplyError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PerspectiveRegistryError {
    DuplicatePerspective { perspective_name: String },
    UnknownPerspective { perspective_name: String },
}

impl std::fmt::Display for PerspectiveRegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicatePerspective { perspective_name } => {
                write!(f, "perspective '{perspective_name}' is already registered")
            }
            Self::UnknownPerspective { perspective_name } => {
                write!(f, "no Apply function registered for perspective '{perspective_name}'")
            }
        }
    }
}

impl std::error::Error for PerspectiveRegistryError {}

/// Catalogue of `Apply` functions keyed by perspective name, in the same
/// insertion-ordered shape as [`wcf_dispatch::ReceptorRegistry`].
#[derive(Default)]
pub struct PerspectiveRegistry {
    functions: BTreeMap<String, ApplyFn>,
}

impl PerspectiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, perspective_name: impl Into<String>, apply: ApplyFn) -> Result<(), PerspectiveRegistryError> {
        let perspective_name = perspective_name.into();
        if self.functions.contains_key(&perspective_name) {
            return Err(PerspectiveRegistryError::DuplicatePerspective { perspective_name });
        }
        self.functions.insert(perspective_name, apply);
        Ok(())
    }

    pub fn contains(&self, perspective_name: &str) -> bool {
        self.functions.contains_key(perspective_name)
    }

    fn get(&self, perspective_name: &str) -> Result<&ApplyFn, PerspectiveRegistryError> {
        self.functions
            .get(perspective_name)
            .ok_or_else(|| PerspectiveRegistryError::UnknownPerspective {
                perspective_name: perspective_name.to_string(),
            })
    }
}

/// The narrow interface onto an application-owned read-model table — the
/// shape of that table is perspective-specific and out of scope here
/// (spec.md §1). Framework guarantee: the checkpoint is only advanced
/// (via [`WorkCoordinatorStrategy::flush`]) after `save` succeeds, so a
/// storage failure is indistinguishable from an `Apply` failure — the
/// checkpoint stays sticky in `Failed` and the read-model row is left as
/// it was (spec.md §8 "Ordered two-event stream" scenario).
#[async_trait]
pub trait PerspectiveStore: Send + Sync {
    async fn load(&self, pool: &PgPool, perspective_name: &str, stream_id: &str) -> anyhow::Result<Value>;
    async fn save(&self, pool: &PgPool, perspective_name: &str, stream_id: &str, data: &Value) -> anyhow::Result<()>;
}

pub struct PerspectiveWorkerConfig {
    pub poll_interval: Duration,
    pub lease_seconds: i64,
    pub stale_threshold_seconds: i64,
    pub partition_count: i32,
    pub max_partitions_per_instance: Option<i32>,
    pub idle_threshold_polls: u32,
}

/// Drives read-model materialisation (C5, spec.md §4.5). State machine per
/// checkpoint: `Idle → InFlight → (Completed → Idle) | Failed`.
pub struct PerspectiveWorker {
    pool: PgPool,
    instance: ServiceInstanceId,
    strategy: Arc<dyn WorkCoordinatorStrategy>,
    registry: Arc<PerspectiveRegistry>,
    store: Arc<dyn PerspectiveStore>,
    config: PerspectiveWorkerConfig,
}

impl PerspectiveWorker {
    pub fn new(
        pool: PgPool,
        instance: ServiceInstanceId,
        strategy: Arc<dyn WorkCoordinatorStrategy>,
        registry: Arc<PerspectiveRegistry>,
        store: Arc<dyn PerspectiveStore>,
        config: PerspectiveWorkerConfig,
    ) -> Self {
        Self {
            pool,
            instance,
            strategy,
            registry,
            store,
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

    /// One poll cycle: flush, process every claimed perspective row,
    /// return whether the batch was empty (for idle tracking).
    pub async fn run_once(&self) -> anyhow::Result<bool> {
        let batch = self.strategy.flush(serde_json::to_value(&self.heartbeat_args())?).await?;

        for row in &batch.claimed {
            let ClaimedRow::Perspective(checkpoint) = row else {
                continue;
            };

            let events = wcf_db::load_stream_events_after(
                &self.pool,
                &checkpoint.stream_id,
                checkpoint.last_event_id,
            )
            .await?;

            let mut current = self
                .store
                .load(&self.pool, &checkpoint.perspective_name, &checkpoint.stream_id)
                .await
                .unwrap_or(Value::Null);

            let mut applied_up_to: Option<&StoredEvent> = None;
            let mut failure: Option<ApplyError> = None;

            for event in &events {
                match self.apply_one(&checkpoint.perspective_name, &current, event) {
                    Ok(next) => {
                        current = next;
                        applied_up_to = Some(event);
                    }
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }

            if let Some(err) = failure {
                self.strategy.queue_perspective_failure(
                    checkpoint.perspective_name.clone(),
                    checkpoint.stream_id.clone(),
                    err.to_string(),
                );
                continue;
            }

            if let Some(last) = applied_up_to {
                if let Err(e) = self
                    .store
                    .save(&self.pool, &checkpoint.perspective_name, &checkpoint.stream_id, &current)
                    .await
                {
                    self.strategy.queue_perspective_failure(
                        checkpoint.perspective_name.clone(),
                        checkpoint.stream_id.clone(),
                        format!("read-model persistence failed: {e}"),
                    );
                    continue;
                }

                self.strategy.queue_perspective_completion(
                    checkpoint.perspective_name.clone(),
                    checkpoint.stream_id.clone(),
                    last.event_id,
                    last.sequence_number,
                );
            } else {
                // No new events; checkpoint already current. Completing
                // with its existing last_event_id keeps it from sticking
                // in InFlight.
                self.strategy.queue_perspective_completion(
                    checkpoint.perspective_name.clone(),
                    checkpoint.stream_id.clone(),
                    checkpoint.last_event_id.unwrap_or(Uuid::nil()),
                    checkpoint.last_sequence_number,
                );
            }
        }

        Ok(batch.claimed.is_empty())
    }

    fn apply_one(&self, perspective_name: &str, current: &Value, event: &StoredEvent) -> Result<Value, ApplyError> {
        let apply = self.registry.get(perspective_name).map_err(|_| ApplyError {
            message: format!("no Apply function registered for perspective '{perspective_name}'"),
            event_id: event.event_id,
        })?;
        apply(current, event)
    }

    /// Runs the poll loop until `cancellation` fires.
    pub async fn run(self: Arc<Self>, cancellation: CancellationToken) {
        let (mut idle, _rx) = IdleTracker::new(self.config.idle_threshold_polls);
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    tracing::info!("perspective worker shutting down");
                    break;
                }
                result = self.run_once() => {
                    match result {
                        Ok(empty) => idle.record_poll(empty),
                        Err(e) => tracing::error!(error = %e, "perspective worker poll failed"),
                    }
                }
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}
