//! Test tooling shared across scenario tests, mirroring `mqk-testkit`:
//! a [`transport::FakeTransport`] double (grounded on `FakeBroker`), a
//! [`recovery`] module for crash-replay scenarios (grounded on
//! `recover_outbox_against_broker`), a [`store::InMemoryPerspectiveStore`]
//! fake read-model, and an [`orchestrator::TestHarness`] that composes the
//! Publisher/Consumer/Perspective loops deterministically (grounded on
//! `mqk-testkit::orchestrator`).
//!
//! Integration tests across this workspace that need Postgres are gated
//! behind `WCF_DATABASE_URL` + `#[ignore = "requires WCF_DATABASE_URL; ..."]`
//! exactly as `mqk-db`'s scenario tests are; this crate's own `tests/`
//! follow the same convention.

pub mod orchestrator;
pub mod recovery;
pub mod store;
pub mod transport;

pub use orchestrator::{HarnessConfig, TestHarness};
pub use recovery::{recover_unresolved_outbox_for_stream, RecoveryReport};
pub use store::InMemoryPerspectiveStore;
pub use transport::{FakeTransport, FakeTransportSubscriber};
