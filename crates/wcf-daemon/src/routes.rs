//! Axum router and HTTP handlers for wcf-daemon (SPEC_FULL.md §7), shaped
//! exactly like `mqk-daemon::routes`: `build_router` is the single entry
//! point, `main.rs` attaches middleware, handlers are `pub(crate)` so the
//! scenario tests in `tests/` can compose the bare router.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use wcf_types::partition::assign_partitions;

use crate::api_types::{HealthResponse, PartitionAssignment, StatusResponse, WorkerStatus};
use crate::state::{uptime_secs, AppState, BusMsg};

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .route("/v1/events", get(events))
        .with_state(state)
}

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let database_connected = match &st.pool {
        Some(pool) => wcf_db::status(pool).await.map(|s| s.ok).unwrap_or(false),
        None => false,
    };
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
            database_connected,
        }),
    )
}

/// Read-only partition-assignment display (spec.md §4.1 point 7), computed
/// the same deterministic way `process_work_batch`'s phase 7 does — never
/// authoritative, purely a snapshot for an operator inspecting the daemon.
async fn display_partitions(st: &AppState) -> Vec<PartitionAssignment> {
    let Some(pool) = &st.pool else {
        return Vec::new();
    };
    let Ok(live_ids) = wcf_db::list_live_instance_ids(pool, st.stale_threshold_seconds).await else {
        return Vec::new();
    };
    if live_ids.is_empty() {
        return Vec::new();
    }

    let result = assign_partitions(&live_ids, st.partition_count as u32, None);
    result
        .assignments
        .into_iter()
        .map(|(instance_id, partitions)| PartitionAssignment { instance_id, partitions })
        .collect()
}

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let database_connected = match &st.pool {
        Some(pool) => wcf_db::status(pool).await.map(|s| s.ok).unwrap_or(false),
        None => false,
    };

    let workers = match &st.workers {
        Some(handles) => vec![
            WorkerStatus { name: "publisher", idle: *handles.publisher_idle.borrow() },
            WorkerStatus { name: "consumer", idle: *handles.consumer_idle.borrow() },
            WorkerStatus { name: "perspective", idle: *handles.perspective_idle.borrow() },
        ],
        None => Vec::new(),
    };

    let partitions = display_partitions(&st).await;

    (
        StatusCode::OK,
        Json(StatusResponse {
            instance_id: st.instance.instance_id.to_string(),
            daemon_uptime_secs: uptime_secs(),
            database_connected,
            workers,
            partitions,
        }),
    )
}

/// SSE stream of [`BusMsg`] events — heartbeats plus the lifecycle-hook
/// feed named in SPEC_FULL.md §7 (`PostDistributeAsync`/
/// `PostPerspectiveInline`), the same "test synchronization" use spec.md
/// §4.7 names for lifecycle hooks.
pub(crate) async fn events(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let stream = broadcast_to_sse(rx);
    (headers, Sse::new(stream).keep_alive(KeepAlive::default())).into_response()
}

fn broadcast_to_sse(rx: broadcast::Receiver<BusMsg>) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        let msg = msg.ok()?;
        let event_name = match &msg {
            BusMsg::Heartbeat { .. } => "heartbeat",
            BusMsg::Lifecycle { .. } => "lifecycle",
        };
        let data = serde_json::to_string(&msg).ok()?;
        Some(Ok(Event::default().event(event_name).data(data)))
    })
}
