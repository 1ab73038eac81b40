//! Request and response types for every wcf-daemon HTTP endpoint. Kept
//! free of business logic, same as `mqk-daemon`'s `api_types.rs`.

use serde::{Deserialize, Serialize};

/// GET /v1/health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
    pub database_connected: bool,
}

/// One worker loop's idle/busy state, as observed through its
/// [`wcf_workers::IdleTracker`] watch channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub name: &'static str,
    pub idle: bool,
}

/// A display-only partition assignment for the live instance set, computed
/// the same way `process_work_batch`'s phase 7 does (spec.md §4.1 point 7)
/// but read-only: the authoritative assignment lives in Postgres, this is
/// for operators inspecting the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionAssignment {
    pub instance_id: String,
    pub partitions: Vec<u32>,
}

/// GET /v1/status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub instance_id: String,
    pub daemon_uptime_secs: u64,
    pub database_connected: bool,
    pub workers: Vec<WorkerStatus>,
    pub partitions: Vec<PartitionAssignment>,
}
