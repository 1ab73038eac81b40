//! Requires WCF_DATABASE_URL. Exercises spec.md §8 end-to-end scenario 3,
//! "Ordered two-event stream": when `Apply` throws on the first event of a
//! stream, the checkpoint goes Failed, the second event is never applied,
//! and the read-model row is left unchanged (spec.md §4.5, invariant §3.2.5).

use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use wcf_coordinator::{CoordinatorConfig, ManualStrategy, WorkCoordinatorStrategy};
use wcf_db::NewOutboxMessage;
use wcf_testkit::InMemoryPerspectiveStore;
use wcf_types::ServiceInstanceId;
use wcf_workers::{ApplyError, PerspectiveRegistry, PerspectiveWorker, PerspectiveWorkerConfig};

fn new_event(stream_id: &str, message_type: &str, version: i64) -> NewOutboxMessage {
    NewOutboxMessage {
        message_id: Uuid::new_v4(),
        destination: "orders-events".to_string(),
        envelope_type: "MessageEnvelope".to_string(),
        envelope_data: json!({"version": version}),
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
async fn apply_failure_on_first_event_blocks_the_second() {
    let pool = wcf_db::testkit_db_pool().await.expect("connect+migrate");
    let instance = ServiceInstanceId::new("orders", "test-host");

    wcf_db::register_message_association(&pool, "OrderPlaced", "perspective", "OrderTotals", "orders")
        .await
        .expect("register association");

    let strategy = ManualStrategy::new(pool.clone(), instance.clone(), CoordinatorConfig {
        lease_seconds: 30,
        stale_threshold_seconds: 60,
        partition_count: 1,
        max_partitions_per_instance: None,
    });

    strategy.queue_outbox_message(new_event("S", "OrderPlaced", 1));
    strategy.queue_outbox_message(new_event("S", "OrderPlaced", 2));
    strategy.flush(serde_json::Value::Null).await.expect("enqueue events");

    let mut perspectives = PerspectiveRegistry::new();
    perspectives
        .register(
            "OrderTotals",
            Box::new(|_current, event| {
                Err(ApplyError {
                    message: "boom".to_string(),
                    event_id: event.event_id,
                })
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

    worker.run_once().await.expect("first poll applies nothing, fails on E1");

    // The checkpoint is now sticky Failed; it is not reclaimed by a normal
    // poll (only lease expiry or an operator resolution would free it), so
    // a second poll must not claim it again.
    let second_empty = worker.run_once().await.expect("second poll");
    assert!(second_empty, "a Failed checkpoint is not reclaimed by an ordinary poll");

    assert_eq!(store.get("OrderTotals", "S"), None, "read-model row must be unchanged");
}
