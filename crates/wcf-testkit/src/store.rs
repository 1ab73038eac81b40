//! In-memory `PerspectiveStore`, grounded on the same "minimal fake used
//! ONLY for tests" shape as [`crate::transport::FakeTransport`]: no real
//! table, just a map keyed the same way the framework addresses a
//! checkpoint (`perspective_name`, `stream_id`).
//!
//! The shape of a real read-model table is application-specific and out of
//! scope here (spec.md §1); this lets scenario tests and `wcf-daemon`'s
//! default wiring exercise the Perspective Worker without one.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use wcf_workers::PerspectiveStore;

#[derive(Default)]
pub struct InMemoryPerspectiveStore {
    rows: Mutex<HashMap<(String, String), Value>>,
}

impl InMemoryPerspectiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, perspective_name: &str, stream_id: &str) -> Option<Value> {
        self.rows
            .lock()
            .unwrap()
            .get(&(perspective_name.to_string(), stream_id.to_string()))
            .cloned()
    }
}

#[async_trait]
impl PerspectiveStore for InMemoryPerspectiveStore {
    async fn load(&self, _pool: &PgPool, perspective_name: &str, stream_id: &str) -> anyhow::Result<Value> {
        Ok(self.get(perspective_name, stream_id).unwrap_or(Value::Null))
    }

    async fn save(&self, _pool: &PgPool, perspective_name: &str, stream_id: &str, data: &Value) -> anyhow::Result<()> {
        self.rows
            .lock()
            .unwrap()
            .insert((perspective_name.to_string(), stream_id.to_string()), data.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = InMemoryPerspectiveStore::new();
        let pool = PgPool::connect_lazy("postgres://unused/unused").unwrap();
        store.save(&pool, "OrderTotals", "order-1", &serde_json::json!({"total": 3})).await.unwrap();
        let loaded = store.load(&pool, "OrderTotals", "order-1").await.unwrap();
        assert_eq!(loaded, serde_json::json!({"total": 3}));
    }

    #[tokio::test]
    async fn unknown_checkpoint_loads_as_null() {
        let store = InMemoryPerspectiveStore::new();
        let pool = PgPool::connect_lazy("postgres://unused/unused").unwrap();
        let loaded = store.load(&pool, "OrderTotals", "order-2").await.unwrap();
        assert_eq!(loaded, Value::Null);
    }
}
