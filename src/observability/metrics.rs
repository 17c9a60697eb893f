//! Service metrics
//!
//! - Counters are monotonic and reset only on process start
//! - `last_*_ms` gauges hold the most recent duration
//! - Per-predicate query latency is kept as count, total and max

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

/// Query latency for one predicate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PredicateLatency {
    pub count: u64,
    pub total_ms: u64,
    pub max_ms: u64,
}

/// All counters of the service. Shared behind an `Arc`.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    facts_loaded: AtomicU64,
    facts_load_requests: AtomicU64,
    facts_rejected: AtomicU64,
    queries_evaluated: AtomicU64,
    queries_rejected: AtomicU64,
    compilations: AtomicU64,
    compile_failures: AtomicU64,
    last_facts_load_ms: AtomicU64,
    last_query_ms: AtomicU64,
    predicates: Mutex<BTreeMap<String, PredicateLatency>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Fact loads

    pub fn record_facts_load(&self, admitted: u64, elapsed_ms: u64) {
        self.facts_load_requests.fetch_add(1, Ordering::Relaxed);
        self.facts_loaded.fetch_add(admitted, Ordering::Relaxed);
        self.last_facts_load_ms.store(elapsed_ms, Ordering::Relaxed);
    }

    /// A load request that admitted nothing
    pub fn record_facts_rejected(&self, submitted: u64) {
        self.facts_load_requests.fetch_add(1, Ordering::Relaxed);
        self.facts_rejected.fetch_add(submitted, Ordering::Relaxed);
    }

    // Queries

    pub fn record_query(&self, predicate: &str, elapsed_ms: u64) {
        self.queries_evaluated.fetch_add(1, Ordering::Relaxed);
        self.last_query_ms.store(elapsed_ms, Ordering::Relaxed);

        let mut predicates = self.predicates.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = predicates.entry(predicate.to_string()).or_default();
        entry.count += 1;
        entry.total_ms += elapsed_ms;
        entry.max_ms = entry.max_ms.max(elapsed_ms);
    }

    pub fn increment_queries_rejected(&self) {
        self.queries_rejected.fetch_add(1, Ordering::Relaxed);
    }

    // Compilation

    pub fn increment_compilations(&self) {
        self.compilations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_compile_failures(&self) {
        self.compile_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            facts_loaded: self.facts_loaded.load(Ordering::Relaxed),
            facts_load_requests: self.facts_load_requests.load(Ordering::Relaxed),
            facts_rejected: self.facts_rejected.load(Ordering::Relaxed),
            queries_evaluated: self.queries_evaluated.load(Ordering::Relaxed),
            queries_rejected: self.queries_rejected.load(Ordering::Relaxed),
            compilations: self.compilations.load(Ordering::Relaxed),
            compile_failures: self.compile_failures.load(Ordering::Relaxed),
            last_facts_load_ms: self.last_facts_load_ms.load(Ordering::Relaxed),
            last_query_ms: self.last_query_ms.load(Ordering::Relaxed),
            predicates: self
                .predicates
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self.snapshot()).unwrap_or_else(|_| serde_json::json!({}))
    }
}

/// A point-in-time copy of all metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub facts_loaded: u64,
    pub facts_load_requests: u64,
    pub facts_rejected: u64,
    pub queries_evaluated: u64,
    pub queries_rejected: u64,
    pub compilations: u64,
    pub compile_failures: u64,
    pub last_facts_load_ms: u64,
    pub last_query_ms: u64,
    pub predicates: BTreeMap<String, PredicateLatency>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_new_registry_is_zero() {
        let snapshot = MetricsRegistry::new().snapshot();
        assert_eq!(snapshot.facts_loaded, 0);
        assert_eq!(snapshot.queries_evaluated, 0);
        assert!(snapshot.predicates.is_empty());
    }

    #[test]
    fn test_facts_counters() {
        let registry = MetricsRegistry::new();
        registry.record_facts_load(10, 4);
        registry.record_facts_rejected(3);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.facts_loaded, 10);
        assert_eq!(snapshot.facts_load_requests, 2);
        assert_eq!(snapshot.facts_rejected, 3);
        assert_eq!(snapshot.last_facts_load_ms, 4);
    }

    #[test]
    fn test_predicate_latency() {
        let registry = MetricsRegistry::new();
        registry.record_query("valid_card", 3);
        registry.record_query("valid_card", 7);
        registry.record_query("price_for", 1);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.queries_evaluated, 3);
        assert_eq!(snapshot.last_query_ms, 1);
        assert_eq!(
            snapshot.predicates["valid_card"],
            PredicateLatency {
                count: 2,
                total_ms: 10,
                max_ms: 7
            }
        );
    }

    #[test]
    fn test_to_json() {
        let registry = MetricsRegistry::new();
        registry.increment_compilations();
        registry.record_query("duplicate_of", 2);

        let json = registry.to_json();
        assert_eq!(json["compilations"], 1);
        assert_eq!(json["predicates"]["duplicate_of"]["max_ms"], 2);
    }

    #[test]
    fn test_concurrent_updates() {
        let registry = Arc::new(MetricsRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..100 {
                        reg.record_query("valid_card", 1);
                        reg.increment_queries_rejected();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.queries_evaluated, 800);
        assert_eq!(snapshot.queries_rejected, 800);
        assert_eq!(snapshot.predicates["valid_card"].count, 800);
    }
}
