//! Local stats registry: named counters plus pluggable stat producers.
//!
//! A node keeps one [`StatsRegistry`]. Code anywhere in the node bumps
//! counters with [`StatsRegistry::increment_counter`]; components that can
//! report a gauge-like view of themselves implement [`StatsProducer`] and are
//! registered once. The gatherer reads everything through
//! [`StatsRegistry::snapshot`] on each poll.
//!
//! Producers are merged in registration order and a later producer silently
//! overwrites keys an earlier one already emitted. Keep producer key
//! namespaces disjoint (e.g. prefix keys with the producer name).

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StatsError;

/// Mapping of stat name to value as emitted by a producer.
pub type StatsMap = BTreeMap<String, Value>;

/// Anything that can describe itself as a flat set of named stats.
pub trait StatsProducer: Send + Sync {
    /// Short name used in logs; must not be empty.
    fn name(&self) -> &str;

    /// Current stats. Must be cheap: it runs inside the poll handler.
    fn get_stats(&self) -> StatsMap;
}

/// Result of one `get_stats` poll, as sent over the wire and persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsReport {
    #[serde(default)]
    pub counters: BTreeMap<String, i64>,
    #[serde(default)]
    pub stats: StatsMap,
}

/// Per-node aggregate of counters and stat producers.
#[derive(Default)]
pub struct StatsRegistry {
    counters: DashMap<String, i64>,
    producers: RwLock<Vec<Arc<dyn StatsProducer>>>,
}

impl StatsRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adjust a counter by `delta`, creating it at zero first if unseen.
    /// Counters saturate at the `i64` bounds.
    pub fn increment_counter(&self, name: &str, delta: i64) {
        if let Some(mut value) = self.counters.get_mut(name) {
            *value = value.saturating_add(delta);
            return;
        }
        let mut value = self.counters.entry(name.to_string()).or_insert(0);
        *value = value.saturating_add(delta);
    }

    /// Current value of a single counter.
    #[must_use]
    pub fn counter(&self, name: &str) -> Option<i64> {
        self.counters.get(name).map(|v| *v)
    }

    /// Append a producer to the merge order.
    pub fn register_producer(&self, producer: Arc<dyn StatsProducer>) -> Result<(), StatsError> {
        if producer.name().trim().is_empty() {
            return Err(StatsError::UnnamedProducer);
        }
        tracing::debug!(producer = producer.name(), "registered stats producer");
        self.producers.write().push(producer);
        Ok(())
    }

    #[must_use]
    pub fn producer_count(&self) -> usize {
        self.producers.read().len()
    }

    /// Copy of every counter plus the merged output of all producers.
    ///
    /// Each counter value is read atomically; the set as a whole is not a
    /// consistent cut across counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsReport {
        let counters = self
            .counters
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();

        let producers = self.producers.read().clone();
        let mut stats = StatsMap::new();
        for producer in &producers {
            stats.extend(producer.get_stats());
        }

        StatsReport { counters, stats }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixed {
        name: &'static str,
        stats: Vec<(&'static str, Value)>,
    }

    impl StatsProducer for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn get_stats(&self) -> StatsMap {
            self.stats
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect()
        }
    }

    #[test]
    fn test_counter_increments() {
        let registry = StatsRegistry::new();
        registry.increment_counter("x", 5);
        registry.increment_counter("x", -2);
        assert_eq!(registry.counter("x"), Some(3));

        registry.increment_counter("fresh", 1);
        assert_eq!(registry.counter("fresh"), Some(1));
        assert_eq!(registry.counter("never"), None);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.counters["x"], 3);
        assert_eq!(snapshot.counters["fresh"], 1);
    }

    #[test]
    fn test_negative_counter_from_zero() {
        let registry = StatsRegistry::new();
        registry.increment_counter("leases", -4);
        assert_eq!(registry.counter("leases"), Some(-4));
    }

    #[test]
    fn test_counter_saturates_at_bounds() {
        let registry = StatsRegistry::new();
        registry.increment_counter("bytes", i64::MAX);
        registry.increment_counter("bytes", 1);
        assert_eq!(registry.counter("bytes"), Some(i64::MAX));

        registry.increment_counter("debt", i64::MIN);
        registry.increment_counter("debt", -1);
        assert_eq!(registry.counter("debt"), Some(i64::MIN));

        registry.increment_counter("bytes", -1);
        assert_eq!(registry.counter("bytes"), Some(i64::MAX - 1));
    }

    #[test]
    fn test_later_producer_wins_on_collision() {
        let registry = StatsRegistry::new();
        registry
            .register_producer(Arc::new(Fixed {
                name: "first",
                stats: vec![("shared", json!(1)), ("first.only", json!("a"))],
            }))
            .unwrap();
        registry
            .register_producer(Arc::new(Fixed {
                name: "second",
                stats: vec![("shared", json!(2)), ("second.only", json!(2.5))],
            }))
            .unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.stats["shared"], json!(2));
        assert_eq!(snapshot.stats["first.only"], json!("a"));
        assert_eq!(snapshot.stats["second.only"], json!(2.5));
        assert_eq!(registry.producer_count(), 2);
    }

    #[test]
    fn test_unnamed_producer_rejected() {
        let registry = StatsRegistry::new();
        let result = registry.register_producer(Arc::new(Fixed {
            name: " ",
            stats: vec![],
        }));
        assert!(matches!(result, Err(StatsError::UnnamedProducer)));
        assert_eq!(registry.producer_count(), 0);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let registry = Arc::new(StatsRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        registry.increment_counter("hits", 1);
                        let _ = registry.snapshot();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.counter("hits"), Some(8000));
    }

    #[test]
    fn test_report_wire_shape() {
        let registry = StatsRegistry::new();
        registry.increment_counter("uploads", 2);
        let value = serde_json::to_value(registry.snapshot()).unwrap();
        assert_eq!(value, json!({"counters": {"uploads": 2}, "stats": {}}));
    }
}
