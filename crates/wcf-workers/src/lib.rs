//! Publisher / Consumer / Perspective worker loops (C3/C4/C5, spec.md
//! §4.3-§4.5), all driven by [`wcf_coordinator::WorkCoordinatorStrategy`]
//! as their sole synchronization primitive (spec.md §2 data flow).

pub mod consumer;
pub mod idle;
pub mod perspective;
pub mod publisher;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use consumer::{ConsumerWorker, ConsumerWorkerConfig};
pub use idle::IdleTracker;
pub use perspective::{ApplyError, ApplyFn, PerspectiveRegistry, PerspectiveStore, PerspectiveWorker, PerspectiveWorkerConfig};
pub use publisher::{PublisherWorker, PublisherWorkerConfig};
pub use transport::{MessageTypeCatalog, PublishOutcome, RawDelivery, TransportError, TransportPublisher, TransportSubscriber};
