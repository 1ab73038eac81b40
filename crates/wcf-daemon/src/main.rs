//! wcf-daemon entry point.
//!
//! Intentionally thin: sets up tracing, connects to Postgres (or boots
//! degraded if it can't), wires the default worker set, and starts the
//! HTTP server. Route handlers live in `routes.rs`; shared state in
//! `state.rs`; default worker wiring in `wiring.rs`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};
use wcf_daemon::{routes, state, wiring};
use wcf_types::ServiceInstanceId;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Dev-time .env.local bootstrap; silent if absent (production injects
    // env vars directly).
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let instance = ServiceInstanceId::new("wcf-daemon", hostname());
    let worker_config = load_worker_config();

    let pool = match wcf_db::connect_from_env().await {
        Ok(pool) => match wcf_db::migrate(&pool).await {
            Ok(()) => Some(pool),
            Err(e) => {
                warn!(error = %e, "migration failed; serving degraded (no worker loops)");
                None
            }
        },
        Err(e) => {
            warn!(error = %e, "could not connect to Postgres; serving degraded (no worker loops)");
            None
        }
    };

    let (bus, _rx) = tokio::sync::broadcast::channel::<state::BusMsg>(1024);
    state::spawn_heartbeat(bus.clone(), Duration::from_secs(1));

    let workers = pool.clone().map(|pool| {
        let spawned = wiring::spawn_default_workers(pool, instance.clone(), worker_config, bus.clone());
        state::WorkerHandles {
            publisher_idle: spawned.publisher_idle,
            consumer_idle: spawned.consumer_idle,
            perspective_idle: spawned.perspective_idle,
        }
    });

    let shared = Arc::new(state::AppState::new(
        instance,
        pool,
        worker_config.stale_threshold_seconds as i64,
        worker_config.partition_count as i32,
        workers,
    ));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8899)));
    info!("wcf-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("WCF_DAEMON_ADDR").ok()?.parse().ok()
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

/// Loads `/workers/daemon` from a layered YAML config if `WCF_CONFIG_PATHS`
/// (colon-separated) is set, falling back to `WorkerConfig::default`
/// (spec.md §6).
fn load_worker_config() -> wcf_config::WorkerConfig {
    let Ok(paths_var) = std::env::var("WCF_CONFIG_PATHS") else {
        return wcf_config::WorkerConfig::default();
    };
    let paths: Vec<&str> = paths_var.split(':').collect();
    match wcf_config::load_layered_yaml(&paths) {
        Ok(loaded) => wcf_config::load_worker_config(&loaded.config_json, "daemon"),
        Err(e) => {
            warn!(error = %e, "failed to load layered config; using worker defaults");
            wcf_config::WorkerConfig::default()
        }
    }
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins.iter().filter_map(|o| HeaderValue::from_str(o).ok()).collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
