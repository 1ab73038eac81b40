//! Requires WCF_DATABASE_URL. Exercises spec.md §8 end-to-end scenario 1,
//! "Create-and-materialise": two events land in the event store and, after
//! one Perspective Worker poll, each event's associated read-model row
//! reflects the applied projection.

use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use wcf_coordinator::{CoordinatorConfig, ManualStrategy, WorkCoordinatorStrategy};
use wcf_db::NewOutboxMessage;
use wcf_testkit::InMemoryPerspectiveStore;
use wcf_types::ServiceInstanceId;
use wcf_workers::{PerspectiveRegistry, PerspectiveWorker, PerspectiveWorkerConfig};

fn harness_config() -> CoordinatorConfig {
    CoordinatorConfig {
        lease_seconds: 30,
        stale_threshold_seconds: 60,
        partition_count: 1,
        max_partitions_per_instance: None,
    }
}

fn new_event(stream_id: &str, message_type: &str, version: i64, data: serde_json::Value) -> NewOutboxMessage {
    NewOutboxMessage {
        message_id: Uuid::new_v4(),
        destination: "inventory-events".to_string(),
        envelope_type: "MessageEnvelope".to_string(),
        envelope_data: data,
        message_type: message_type.to_string(),
        stream_id: stream_id.to_string(),
        partition_number: 0,
        is_event: true,
        event_version: Some(version),
        metadata: json!({}),
    }
}

#[tokio::test]
#[ignore = "requires WCF_DATABASE_URL; run against a disposable Postgres"]
async fn create_product_materialises_both_perspectives() {
    let pool = wcf_db::testkit_db_pool().await.expect("connect+migrate");
    let instance = ServiceInstanceId::new("inventory", "test-host");

    wcf_db::register_message_association(&pool, "ProductCreatedEvent", "perspective", "Product", "inventory")
        .await
        .expect("register Product association");
    wcf_db::register_message_association(&pool, "InventoryRestockedEvent", "perspective", "Inventory", "inventory")
        .await
        .expect("register Inventory association");

    let strategy = ManualStrategy::new(pool.clone(), instance.clone(), harness_config());

    // "CreateProduct{ProductId=P1, Name="T", Price=10, Stock=5}" yields one
    // ProductCreatedEvent and one InventoryRestockedEvent (spec.md §8
    // scenario 1's literal input/output pair).
    strategy.queue_outbox_message(new_event(
        "P1",
        "ProductCreatedEvent",
        1,
        json!({"Name": "T", "Price": 10}),
    ));
    strategy.queue_outbox_message(new_event(
        "P1",
        "InventoryRestockedEvent",
        2,
        json!({"QuantityAdded": 5, "NewTotalQuantity": 5}),
    ));
    strategy.flush(serde_json::Value::Null).await.expect("enqueue events");

    let mut perspectives = PerspectiveRegistry::new();
    perspectives
        .register(
            "Product",
            Box::new(|_current, event| {
                Ok(json!({
                    "Name": event.event_data.get("Name").cloned().unwrap_or(serde_json::Value::Null),
                    "Price": event.event_data.get("Price").cloned().unwrap_or(serde_json::Value::Null),
                }))
            }),
        )
        .unwrap();
    perspectives
        .register(
            "Inventory",
            Box::new(|_current, event| {
                Ok(json!({
                    "Quantity": event.event_data.get("NewTotalQuantity").cloned().unwrap_or(serde_json::Value::Null),
                }))
            }),
        )
        .unwrap();

    let store = Arc::new(InMemoryPerspectiveStore::new());
    let worker = PerspectiveWorker::new(
        pool,
        instance,
        Arc::new(strategy),
        Arc::new(perspectives),
        store.clone(),
        PerspectiveWorkerConfig {
            poll_interval: std::time::Duration::from_millis(1),
            lease_seconds: 30,
            stale_threshold_seconds: 60,
            partition_count: 1,
            max_partitions_per_instance: None,
            idle_threshold_polls: 2,
        },
    );

    // One poll claims both auto-created checkpoints and replays their
    // single event each; a second poll confirms they are now idle.
    let first_empty = worker.run_once().await.expect("first poll");
    assert!(!first_empty, "first poll should have claimed the two auto-created checkpoints");
    let second_empty = worker.run_once().await.expect("second poll");
    assert!(second_empty, "checkpoints should be idle after materialising");

    assert_eq!(store.get("Product", "P1"), Some(json!({"Name": "T", "Price": 10})));
    assert_eq!(store.get("Inventory", "P1"), Some(json!({"Quantity": 5})));
}
