//! Requires WCF_DATABASE_URL. Exercises the `Dispatcher::publish` fan-out
//! path (spec.md §4.6): every destination gets its own outbox row, and
//! because each row is independently paired with `event_store`
//! (DESIGN.md's outbox→event-store hard contract), each gets its own
//! consecutive version on the stream rather than colliding on one.

use std::sync::Arc;
use uuid::Uuid;
use wcf_coordinator::{CoordinatorConfig, ManualStrategy, WorkCoordinatorStrategy};
use wcf_dispatch::{Dispatcher, DestinationResolver, ReceptorRegistry, RequestScope, TransportMode};
use wcf_types::ServiceInstanceId;

struct TwoDestinations;

impl DestinationResolver for TwoDestinations {
    fn destination_for_send(&self, _message_type: &str) -> Option<String> {
        Some("orders-topic".to_string())
    }
    fn destinations_for_publish(&self, _message_type: &str) -> Vec<String> {
        vec!["events-a".to_string(), "events-b".to_string()]
    }
}

#[tokio::test]
#[ignore = "requires WCF_DATABASE_URL; run against a disposable Postgres"]
async fn publish_allocates_one_version_per_fanned_out_destination() {
    let pool = wcf_db::testkit_db_pool().await.expect("connect+migrate");
    let instance = ServiceInstanceId::new("orders", "test-host");

    let strategy = Arc::new(ManualStrategy::new(pool.clone(), instance.clone(), CoordinatorConfig {
        lease_seconds: 30,
        stale_threshold_seconds: 60,
        partition_count: 1,
        max_partitions_per_instance: None,
    }));

    let dispatcher = Dispatcher::new(
        TransportMode::Local,
        instance,
        ReceptorRegistry::new(),
        Box::new(TwoDestinations),
        1,
    );

    let scope = RequestScope::new(pool.clone(), strategy.clone() as Arc<dyn WorkCoordinatorStrategy>, Uuid::new_v4(), None, Default::default());

    dispatcher
        .publish(&scope, "ProductCreatedEvent", "order-1", serde_json::json!({"sku": "abc"}))
        .await
        .expect("publish fans out to both destinations");
    strategy.flush(serde_json::Value::Null).await.expect("flush queued rows");

    let events = wcf_db::load_stream_events_after(&pool, "order-1", None)
        .await
        .expect("load stream events");
    assert_eq!(events.len(), 2, "one event_store row per fanned-out destination");
    let mut versions: Vec<i64> = events.iter().map(|e| e.version).collect();
    versions.sort();
    assert_eq!(versions, vec![1, 2], "each destination's copy gets its own consecutive version");
}
