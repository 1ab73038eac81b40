//! Mode-aware secrets enforcement, mirroring the teacher's
//! scenario_secrets_mode_enforcement.rs: production mode must fail closed
//! on a missing secret; non-production modes tolerate absence.

use wcf_config::resolve_runtime_secrets;

#[test]
fn production_mode_requires_database_url_env() {
    let config = serde_json::json!({});
    let err = resolve_runtime_secrets(&config, "production").unwrap_err();
    assert!(err.to_string().to_lowercase().contains("database_url_env"));
}

#[test]
fn development_mode_resolves_without_any_secrets_configured() {
    let config = serde_json::json!({});
    let resolved = resolve_runtime_secrets(&config, "development").expect("tolerant in dev");
    assert!(resolved.database_url.is_none());
}

#[test]
fn production_mode_requires_configured_transport_env_vars_to_be_set() {
    std::env::remove_var("WCF_TEST_UNSET_KAFKA_PASSWORD");
    let config = serde_json::json!({
        "secrets": {
            "database_url_env": "WCF_TEST_DB_URL_FOR_TRANSPORT_TEST",
            "transport": { "kafka_password": "WCF_TEST_UNSET_KAFKA_PASSWORD" }
        }
    });
    std::env::set_var("WCF_TEST_DB_URL_FOR_TRANSPORT_TEST", "postgres://ok");
    let err = resolve_runtime_secrets(&config, "production").unwrap_err();
    assert!(err.to_string().contains("kafka_password"));
    std::env::remove_var("WCF_TEST_DB_URL_FOR_TRANSPORT_TEST");
}
