//! Lifecycle stages (spec.md §4.7, §9 "map lifecycle stages to explicit
//! extension points"). `Inline` stages run synchronously inside the calling
//! worker's transactional path and can block progress; `Async` stages are
//! pushed onto a bounded queue drained by a small task pool so a slow
//! audit/metrics hook never stalls dispatch.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// The six stages fired per message, in document order (spec.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleStage {
    PreDistributeAsync,
    PreDistributeInline,
    PostDistributeAsync,
    PostDistributeInline,
    PrePerspectiveInline,
    PostPerspectiveInline,
}

impl LifecycleStage {
    pub fn is_async(self) -> bool {
        matches!(self, Self::PreDistributeAsync | Self::PostDistributeAsync)
    }
}

/// Context handed to every lifecycle hook: enough about the in-flight
/// message for audit/metrics/test-synchronization use without exposing the
/// full envelope.
#[derive(Debug, Clone)]
pub struct LifecycleContext {
    pub message_id: Uuid,
    pub message_type: String,
    pub stream_id: String,
    pub payload: Value,
    pub occurred_at: DateTime<Utc>,
}

/// Error surfaced by a lifecycle hook. `Inline` hook errors propagate to the
/// caller (they can block progress, per spec.md §4.7); `Async` hook errors
/// are only logged — they cannot block a transaction they aren't part of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleHookError(pub String);

impl std::fmt::Display for LifecycleHookError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "lifecycle hook failed: {}", self.0)
    }
}

impl std::error::Error for LifecycleHookError {}

pub type LifecycleHook = Box<dyn Fn(&LifecycleContext) -> Result<(), LifecycleHookError> + Send + Sync>;

/// Registered receptors per stage, in registration order (spec.md §4.7
/// "Registered receptors fire at the matching stage").
#[derive(Default)]
pub struct LifecycleRegistry {
    hooks: BTreeMap<LifecycleStage, Vec<LifecycleHook>>,
}

impl LifecycleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, stage: LifecycleStage, hook: LifecycleHook) {
        self.hooks.entry(stage).or_default().push(hook);
    }

    pub fn count_for(&self, stage: LifecycleStage) -> usize {
        self.hooks.get(&stage).map(Vec::len).unwrap_or(0)
    }

    /// Run every hook registered for an `Inline` stage synchronously,
    /// stopping at the first error (it runs in the caller's transactional
    /// path and may block progress, per spec.md §4.7).
    pub fn run_inline(&self, stage: LifecycleStage, ctx: &LifecycleContext) -> Result<(), LifecycleHookError> {
        debug_assert!(!stage.is_async(), "run_inline called with an Async stage");
        for hook in self.hooks.get(&stage).into_iter().flatten() {
            hook(ctx)?;
        }
        Ok(())
    }
}

/// Drains `Async` stage hooks from a bounded channel on a small pool of
/// worker tasks (spec.md §9 "placed on a bounded task queue drained by a
/// pool"). Dropping the pool stops acceptance of new work; in-flight hooks
/// still run to completion unless `cancellation` fires.
pub struct AsyncHookPool {
    sender: mpsc::Sender<(LifecycleStage, LifecycleContext)>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl AsyncHookPool {
    pub fn spawn(
        registry: Arc<LifecycleRegistry>,
        queue_capacity: usize,
        worker_count: usize,
        cancellation: CancellationToken,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(queue_capacity);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let mut workers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let registry = registry.clone();
            let receiver = receiver.clone();
            let cancellation = cancellation.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let next = tokio::select! {
                        _ = cancellation.cancelled() => None,
                        item = async { receiver.lock().await.recv().await } => item,
                    };
                    let Some((stage, ctx)) = next else {
                        break;
                    };
                    for hook in registry.hooks.get(&stage).into_iter().flatten() {
                        if let Err(e) = hook(&ctx) {
                            tracing::warn!(
                                stage = ?stage,
                                message_id = %ctx.message_id,
                                error = %e,
                                "async lifecycle hook failed"
                            );
                        }
                    }
                }
            }));
        }

        Self { sender, workers }
    }

    /// Enqueue an `Async` stage for out-of-band processing. Never blocks the
    /// caller's transactional path; a full queue drops the oldest-pending
    /// send attempt's caller onto a logged warning instead (backpressure is
    /// explicitly out of scope per spec.md §5).
    pub async fn dispatch(&self, stage: LifecycleStage, ctx: LifecycleContext) {
        debug_assert!(stage.is_async(), "dispatch called with an Inline stage");
        if self.sender.try_send((stage, ctx)).is_err() {
            tracing::warn!(stage = ?stage, "async lifecycle hook queue full; dropping dispatch");
        }
    }

    pub fn abort(&self) {
        for w in &self.workers {
            w.abort();
        }
    }
}
