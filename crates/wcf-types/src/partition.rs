//! Partition hashing and rebalancing helpers (spec.md §4.1 "Partition
//! assignment" / "Partition selection").
//!
//! `process_work_batch`'s PL/pgSQL phase 7 implements the same algorithm in
//! SQL (it has to — partition ownership is authoritative in the database).
//! This module exists so the algorithm can be unit-tested in isolation and
//! so `wcf-testkit`'s scenarios can assert fairness without a live database.

use std::collections::BTreeMap;

/// FNV-1a 64-bit hash. Chosen over `std::hash::DefaultHasher` because the
/// latter is seeded randomly per process — partition assignment must be
/// reproducible across instances and restarts given the same `stream_id`.
pub fn stable_hash(stream_id: &str) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET_BASIS;
    for byte in stream_id.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// `partition(stream_id) = stable_hash(stream_id) mod partition_count`.
pub fn partition_of(stream_id: &str, partition_count: u32) -> u32 {
    assert!(partition_count > 0, "partition_count must be > 0");
    (stable_hash(stream_id) % partition_count as u64) as u32
}

/// Deterministic modulo assignment of partitions to live instances.
///
/// Given the same sorted set of live instance ids, every caller computes the
/// same assignment without coordination (spec.md §4.1). Instances are
/// visited in sorted-id round-robin order; an instance already holding
/// `max_partitions_per_instance` partitions is skipped for further rounds.
/// If every live instance is at its cap before all partitions are placed,
/// the remaining partitions are left unassigned (returned in
/// `RebalanceResult::unassigned`) rather than violating the cap.
pub fn assign_partitions(
    live_instance_ids: &[String],
    partition_count: u32,
    max_partitions_per_instance: Option<u32>,
) -> RebalanceResult {
    let mut sorted: Vec<&String> = live_instance_ids.iter().collect();
    sorted.sort();
    sorted.dedup();

    let mut assignments: BTreeMap<String, Vec<u32>> =
        sorted.iter().map(|id| ((*id).clone(), Vec::new())).collect();
    let mut unassigned = Vec::new();

    if sorted.is_empty() {
        return RebalanceResult {
            assignments,
            unassigned: (0..partition_count).collect(),
        };
    }

    let k = sorted.len();
    for partition in 0..partition_count {
        let start = (partition as usize) % k;
        let mut placed = false;
        for offset in 0..k {
            let idx = (start + offset) % k;
            let id = sorted[idx];
            let entry = assignments.get_mut(id).expect("seeded above");
            let within_cap = max_partitions_per_instance
                .map(|cap| (entry.len() as u32) < cap)
                .unwrap_or(true);
            if within_cap {
                entry.push(partition);
                placed = true;
                break;
            }
        }
        if !placed {
            unassigned.push(partition);
        }
    }

    RebalanceResult {
        assignments,
        unassigned,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebalanceResult {
    /// instance_id -> partitions owned, sorted ascending within each vec by
    /// construction (partitions are visited in ascending order above).
    pub assignments: BTreeMap<String, Vec<u32>>,
    /// Partitions that could not be placed under the configured cap.
    pub unassigned: Vec<u32>,
}

impl RebalanceResult {
    pub fn partitions_for(&self, instance_id: &str) -> &[u32] {
        self.assignments
            .get(instance_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}
