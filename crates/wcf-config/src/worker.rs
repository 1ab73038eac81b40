//! Pointer-based readers for the §6 worker configuration surface, layered
//! on top of [`crate::load_layered_yaml`]'s merged JSON the way teacher's
//! `consumption.rs` enumerates which config pointers a given run mode
//! reads — except here every worker reads the same shape, just under a
//! different `/workers/<name>` root, with `/workers/defaults` as a
//! fallback and hard defaults below that.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Full configuration surface for one Publisher/Consumer/Perspective worker
/// (spec.md §6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerConfig {
    pub polling_interval_ms: u64,
    pub lease_seconds: u64,
    pub stale_threshold_seconds: u64,
    pub debug_mode: bool,
    pub partition_count: u32,
    pub idle_threshold_polls: u32,
    pub max_partitions_per_instance: Option<u32>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            polling_interval_ms: 500,
            lease_seconds: 30,
            stale_threshold_seconds: 60,
            debug_mode: false,
            partition_count: 10_000,
            idle_threshold_polls: 2,
            max_partitions_per_instance: None,
        }
    }
}

fn read_u64_at(config: &Value, pointer: &str) -> Option<u64> {
    config.pointer(pointer)?.as_u64()
}

fn read_u32_at(config: &Value, pointer: &str) -> Option<u32> {
    read_u64_at(config, pointer).map(|v| v as u32)
}

fn read_bool_at(config: &Value, pointer: &str) -> Option<bool> {
    config.pointer(pointer)?.as_bool()
}

/// Read `/workers/<worker_name>/*`, falling back to `/workers/defaults/*`,
/// falling back to [`WorkerConfig::default`]. Every field is independently
/// defaulted, so a config that only overrides `lease_seconds` still gets
/// sane values for everything else.
pub fn load_worker_config(config_json: &Value, worker_name: &str) -> WorkerConfig {
    let defaults = WorkerConfig::default();
    let worker_root = format!("/workers/{worker_name}");
    let shared_root = "/workers/defaults";

    let read_field = |field: &str| -> Option<&Value> {
        config_json
            .pointer(&format!("{worker_root}/{field}"))
            .or_else(|| config_json.pointer(&format!("{shared_root}/{field}")))
    };

    WorkerConfig {
        polling_interval_ms: read_field("polling_interval_ms")
            .and_then(|v| v.as_u64())
            .unwrap_or(defaults.polling_interval_ms),
        lease_seconds: read_field("lease_seconds")
            .and_then(|v| v.as_u64())
            .unwrap_or(defaults.lease_seconds),
        stale_threshold_seconds: read_field("stale_threshold_seconds")
            .and_then(|v| v.as_u64())
            .unwrap_or(defaults.stale_threshold_seconds),
        debug_mode: read_field("debug_mode")
            .and_then(|v| v.as_bool())
            .unwrap_or(defaults.debug_mode),
        partition_count: read_field("partition_count")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .unwrap_or(defaults.partition_count),
        idle_threshold_polls: read_field("idle_threshold_polls")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .unwrap_or(defaults.idle_threshold_polls),
        max_partitions_per_instance: read_field("max_partitions_per_instance")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .or(defaults.max_partitions_per_instance),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_yields_spec_defaults() {
        let cfg = load_worker_config(&Value::Null, "publisher");
        assert_eq!(cfg.partition_count, 10_000);
        assert_eq!(cfg.idle_threshold_polls, 2);
    }

    #[test]
    fn worker_specific_override_wins_over_shared_default() {
        let config = serde_json::json!({
            "workers": {
                "defaults": { "lease_seconds": 30 },
                "publisher": { "lease_seconds": 45 }
            }
        });
        assert_eq!(load_worker_config(&config, "publisher").lease_seconds, 45);
        assert_eq!(load_worker_config(&config, "consumer").lease_seconds, 30);
    }

    #[test]
    fn unused_fields_read_ignored() {
        let _ = read_u64_at(&Value::Null, "/x");
        let _ = read_u32_at(&Value::Null, "/x");
        let _ = read_bool_at(&Value::Null, "/x");
    }
}
