//! Config hash stability: same content -> same hash, regardless of key
//! order; different content -> different hash. Mirrors the teacher's
//! scenario_config_hash_stable.rs.

use wcf_config::load_layered_yaml_from_strings;

const BASE_YAML: &str = r#"
workers:
  defaults:
    polling_interval_ms: 500
    lease_seconds: 30
database:
  pool_size: 10
"#;

const BASE_YAML_REORDERED: &str = r#"
database:
  pool_size: 10
workers:
  defaults:
    lease_seconds: 30
    polling_interval_ms: 500
"#;

#[test]
fn same_input_produces_identical_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.canonical_json, b.canonical_json);
}

#[test]
fn reordered_keys_produce_same_hash() {
    let original = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let reordered = load_layered_yaml_from_strings(&[BASE_YAML_REORDERED]).unwrap();
    assert_eq!(original.config_hash, reordered.config_hash);
}

#[test]
fn different_values_produce_different_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let modified = BASE_YAML.replace("30", "45");
    let b = load_layered_yaml_from_strings(&[&modified]).unwrap();
    assert_ne!(a.config_hash, b.config_hash);
}

#[test]
fn layered_overlay_overrides_base_and_changes_hash() {
    let base = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let overlay = "workers:\n  defaults:\n    lease_seconds: 99\n";
    let layered = load_layered_yaml_from_strings(&[BASE_YAML, overlay]).unwrap();
    assert_ne!(base.config_hash, layered.config_hash);
    assert_eq!(layered.config_json["workers"]["defaults"]["lease_seconds"], 99);
    // base-only key survives the overlay merge.
    assert_eq!(layered.config_json["workers"]["defaults"]["polling_interval_ms"], 500);
}
