//! `RequestScope` — the §9 "dependency-injected scoped services" redesign:
//! an explicit value constructed once per dispatched message and threaded
//! through `Send`/`LocalInvoke`/handler calls, carrying the database pool,
//! the active coordinator strategy, a tracing span, and envelope metadata,
//! instead of being pulled from an ambient DI container.

use std::sync::Arc;

use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;
use wcf_coordinator::WorkCoordinatorStrategy;
use wcf_types::SecurityContext;

/// Per-message scope. Cheap to construct and clone (everything inside is an
/// `Arc`/`Clone`-cheap handle); a fresh one is built for every dispatched
/// message rather than reused across messages.
#[derive(Clone)]
pub struct RequestScope {
    pub pool: PgPool,
    pub strategy: Arc<dyn WorkCoordinatorStrategy>,
    pub span: tracing::Span,
    pub correlation_id: Uuid,
    pub causation_id: Option<Uuid>,
    pub security_context: SecurityContext,
    pub metadata: Value,
}

impl RequestScope {
    pub fn new(
        pool: PgPool,
        strategy: Arc<dyn WorkCoordinatorStrategy>,
        correlation_id: Uuid,
        causation_id: Option<Uuid>,
        security_context: SecurityContext,
    ) -> Self {
        Self {
            pool,
            strategy,
            span: tracing::info_span!("dispatch", correlation_id = %correlation_id),
            correlation_id,
            causation_id,
            security_context,
            metadata: Value::Object(Default::default()),
        }
    }

    /// A scope backed by a lazily-connecting pool, for unit tests that
    /// exercise registry/dispatch logic without touching a live database.
    #[cfg(any(test, feature = "testkit"))]
    pub fn for_test() -> Self {
        struct NullStrategy;

        #[async_trait::async_trait]
        impl WorkCoordinatorStrategy for NullStrategy {
            fn queue_outbox_message(&self, _message: wcf_db::NewOutboxMessage) {}
            fn queue_inbox_message(&self, _message: wcf_db::NewInboxMessage) {}
            fn queue_outbox_completion(&self, _message_id: Uuid, _status: i32) {}
            fn queue_outbox_failure(&self, _message_id: Uuid, _status: i32, _error_text: String) {}
            fn queue_inbox_completion(&self, _message_id: Uuid, _status: i32) {}
            fn queue_inbox_failure(&self, _message_id: Uuid, _status: i32, _error_text: String) {}
            fn queue_perspective_completion(&self, _perspective_name: String, _stream_id: String, _last_event_id: Uuid, _last_sequence_number: i64) {}
            fn queue_perspective_failure(&self, _perspective_name: String, _stream_id: String, _error_text: String) {}
            fn queue_renew_outbox_lease(&self, _message_id: Uuid) {}
            fn queue_renew_inbox_lease(&self, _message_id: Uuid) {}

            async fn flush(&self, _flags: Value) -> anyhow::Result<wcf_coordinator::WorkBatch> {
                Ok(wcf_coordinator::WorkBatch::empty())
            }
        }

        let pool = PgPool::connect_lazy("postgres://localhost/wcf_test_unused")
            .expect("lazy pool construction never touches the network");

        Self::new(pool, Arc::new(NullStrategy), Uuid::new_v4(), None, SecurityContext::default())
    }
}
