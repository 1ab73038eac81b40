//! Shared runtime state for wcf-daemon, grounded on `mqk-daemon::state`:
//! a `Clone`-able `Arc<AppState>` handlers pull from `State<Arc<AppState>>`,
//! plus a broadcast bus that feeds `GET /v1/events`.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;
use wcf_types::ServiceInstanceId;

/// Messages broadcast over the internal bus and surfaced as SSE events.
/// `Lifecycle` carries the stage name a hook fired for (spec.md §4.7
/// "test synchronization" use), distinct from the periodic `Heartbeat`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Lifecycle { stage: String, message_id: Uuid, message_type: String, stream_id: String },
}

/// Static build metadata included in health/status responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// One worker loop's idle/busy state, observed through its
/// `wcf_workers::IdleTracker` watch channel.
#[derive(Clone)]
pub struct WorkerHandles {
    pub publisher_idle: watch::Receiver<bool>,
    pub consumer_idle: watch::Receiver<bool>,
    pub perspective_idle: watch::Receiver<bool>,
}

/// Cloneable (Arc) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    pub instance: ServiceInstanceId,
    /// `None` when the daemon booted degraded (no reachable Postgres) —
    /// `/v1/health` and `/v1/status` still serve, just without worker loops
    /// or live partition data (mirrors `mqk-daemon`'s fail-open boot).
    pub pool: Option<PgPool>,
    pub stale_threshold_seconds: i64,
    pub partition_count: i32,
    pub workers: Option<WorkerHandles>,
}

impl AppState {
    pub fn new(
        instance: ServiceInstanceId,
        pool: Option<PgPool>,
        stale_threshold_seconds: i64,
        partition_count: i32,
        workers: Option<WorkerHandles>,
    ) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        Self {
            bus,
            build: BuildInfo {
                service: "wcf-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            instance,
            pool,
            stale_threshold_seconds,
            partition_count,
            workers,
        }
    }
}

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START.get_or_init(std::time::Instant::now).elapsed().as_secs()
}

/// Background task emitting a heartbeat SSE event every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: chrono::Utc::now().timestamp_millis() });
        }
    });
}
