//! Requires WCF_DATABASE_URL; mirrors the teacher's
//! scenario_migrate_idempotent_on_clean_db.rs.

#[tokio::test]
#[ignore = "requires WCF_DATABASE_URL; run against a disposable Postgres"]
async fn migrate_is_idempotent_on_clean_and_already_migrated_db() {
    let pool = wcf_db::connect_from_env().await.expect("connect");
    wcf_db::migrate(&pool).await.expect("first migrate");
    wcf_db::migrate(&pool).await.expect("second migrate is a no-op");

    let status = wcf_db::status(&pool).await.expect("status");
    assert!(status.ok);
    assert!(status.has_core_tables);
}
