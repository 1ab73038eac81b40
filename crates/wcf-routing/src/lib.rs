//! Topic routing & envelope serialization (C8, spec.md §4.8).

pub mod topic;
pub mod wire;

pub use topic::{CompositeStrategy, GenericRoundRobinStrategy, NamespaceStrategy, PoolSuffixStrategy, TopicStrategy};
pub use wire::{canonicalize_json, from_wire_bytes, sort_keys, to_wire_bytes, DecodeFn, SerializationError, WireTypeRegistry};
