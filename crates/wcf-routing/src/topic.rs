//! Topic routing strategies (C8, spec.md §4.8):
//! `ResolveTopic(message_type, base_topic) → concrete_topic`.

use std::sync::atomic::{AtomicU32, Ordering};

/// Pluggable topic-resolution strategy. `message_type` is the envelope's
/// fully-qualified dotted type name (e.g. `"Orders.Commands.CreateOrder"`).
pub trait TopicStrategy: Send + Sync {
    fn resolve_topic(&self, message_type: &str, base_topic: &str) -> String;
}

const RECOGNIZED_NAMESPACE_SEGMENTS: [&str; 4] = ["Commands", "Events", "Messages", "Queries"];

fn recognized_suffix(namespace_segment: &str) -> Option<&'static str> {
    match namespace_segment {
        "Commands" => Some("Command"),
        "Events" => Some("Event"),
        "Messages" => Some("Message"),
        "Queries" => Some("Query"),
        _ => None,
    }
}

/// Strips a trailing generic arity marker (`` `1 ``) from a namespace or
/// type segment, leaving the "non-generic" name spec.md §4.8 asks for.
fn strip_generic_arity(segment: &str) -> &str {
    segment.split('`').next().unwrap_or(segment)
}

/// Extracts the last non-generic namespace segment, lowercased; if that
/// segment is one of `Commands`/`Events`/`Messages`/`Queries`, strips the
/// matching suffix from the type name instead (spec.md §4.8).
pub struct NamespaceStrategy;

impl TopicStrategy for NamespaceStrategy {
    fn resolve_topic(&self, message_type: &str, base_topic: &str) -> String {
        let segments: Vec<&str> = message_type.split('.').collect();
        let type_name = segments.last().copied().unwrap_or(message_type);
        let namespace_segment = if segments.len() >= 2 {
            strip_generic_arity(segments[segments.len() - 2])
        } else {
            ""
        };

        if RECOGNIZED_NAMESPACE_SEGMENTS.contains(&namespace_segment) {
            let suffix = recognized_suffix(namespace_segment).unwrap_or("");
            let stripped = type_name.strip_suffix(suffix).unwrap_or(type_name);
            format!("{base_topic}.{}", stripped.to_lowercase())
        } else {
            format!("{base_topic}.{}", namespace_segment.to_lowercase())
        }
    }
}

/// Appends a fixed suffix for horizontal partitioning of topics
/// (e.g. `orders` → `orders-01`).
pub struct PoolSuffixStrategy {
    pub suffix: String,
}

impl PoolSuffixStrategy {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self { suffix: suffix.into() }
    }
}

impl TopicStrategy for PoolSuffixStrategy {
    fn resolve_topic(&self, _message_type: &str, base_topic: &str) -> String {
        format!("{base_topic}{}", self.suffix)
    }
}

/// Round-robins over a fixed count of topic suffixes (`topic-00`,
/// `topic-01`, ...) for broker-compatibility testing (spec.md §4.8).
pub struct GenericRoundRobinStrategy {
    count: u32,
    next: AtomicU32,
}

impl GenericRoundRobinStrategy {
    pub fn new(count: u32) -> Self {
        Self {
            count: count.max(1),
            next: AtomicU32::new(0),
        }
    }
}

impl TopicStrategy for GenericRoundRobinStrategy {
    fn resolve_topic(&self, _message_type: &str, base_topic: &str) -> String {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.count;
        format!("{base_topic}-{idx:02}")
    }
}

/// Chains any number of strategies: each strategy's output becomes the next
/// strategy's `base_topic` input (spec.md §4.8 "compose any chain").
pub struct CompositeStrategy {
    strategies: Vec<Box<dyn TopicStrategy>>,
}

impl CompositeStrategy {
    pub fn new(strategies: Vec<Box<dyn TopicStrategy>>) -> Self {
        Self { strategies }
    }
}

impl TopicStrategy for CompositeStrategy {
    fn resolve_topic(&self, message_type: &str, base_topic: &str) -> String {
        let mut topic = base_topic.to_string();
        for strategy in &self.strategies {
            topic = strategy.resolve_topic(message_type, &topic);
        }
        topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_strategy_uses_namespace_segment_when_not_recognized() {
        let strategy = NamespaceStrategy;
        let topic = strategy.resolve_topic("Orders.Inventory.ReservationCreated", "wcf");
        assert_eq!(topic, "wcf.inventory");
    }

    #[test]
    fn namespace_strategy_strips_recognized_suffix_instead() {
        let strategy = NamespaceStrategy;
        let topic = strategy.resolve_topic("Orders.Commands.CreateOrderCommand", "wcf");
        assert_eq!(topic, "wcf.createorder");
    }

    #[test]
    fn namespace_strategy_strips_generic_arity_marker() {
        let strategy = NamespaceStrategy;
        let topic = strategy.resolve_topic("Orders.Events`1.OrderShippedEvent", "wcf");
        assert_eq!(topic, "wcf.ordershipped");
    }

    #[test]
    fn pool_suffix_strategy_appends_fixed_suffix() {
        let strategy = PoolSuffixStrategy::new("-01");
        assert_eq!(strategy.resolve_topic("Whatever", "orders"), "orders-01");
    }

    #[test]
    fn round_robin_strategy_cycles_through_count() {
        let strategy = GenericRoundRobinStrategy::new(3);
        let topics: Vec<String> = (0..4).map(|_| strategy.resolve_topic("X", "topic")).collect();
        assert_eq!(
            topics,
            vec!["topic-00", "topic-01", "topic-02", "topic-00"]
        );
    }

    #[test]
    fn composite_strategy_chains_in_order() {
        let composite = CompositeStrategy::new(vec![
            Box::new(NamespaceStrategy),
            Box::new(PoolSuffixStrategy::new("-01")),
        ]);
        let topic = composite.resolve_topic("Orders.Events.OrderShippedEvent", "wcf");
        assert_eq!(topic, "wcf.ordershipped-01");
    }
}
