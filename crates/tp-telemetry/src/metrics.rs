use ahash::AHashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

// Metric names shared by the session and tool crates.
pub const SESSIONS_REGISTERED: &str = "sessions_registered_total";
pub const SESSIONS_EVICTED: &str = "sessions_evicted_total";
pub const SESSIONS_REMOVED: &str = "sessions_removed_total";
pub const CAPACITY_WARNINGS: &str = "capacity_warnings_total";
pub const ACTIVE_SESSIONS: &str = "active_sessions";
pub const TOOL_CALLS: &str = "tool_calls_total";
pub const TOOL_CALL_DURATION: &str = "tool_call_duration_seconds";

// ---------------------------------------------------------------------------
// Durations
// ---------------------------------------------------------------------------

/// Running count and total of observed durations, in seconds.
#[derive(Debug, Default)]
struct DurationStats {
    count: AtomicU64,
    // f64 bits, updated with a CAS loop.
    total_bits: AtomicU64,
}

impl DurationStats {
    fn observe(&self, seconds: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .total_bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + seconds).to_bits())
            });
    }

    fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn total(&self) -> f64 {
        f64::from_bits(self.total_bits.load(Ordering::Relaxed))
    }
}

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

/// Label pairs sorted by key, so call sites may list them in any order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Labels(Vec<(String, String)>);

impl Labels {
    fn new(pairs: &[(&str, &str)]) -> Self {
        let mut v: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        v.sort_by(|a, b| a.0.cmp(&b.0));
        Self(v)
    }
}

// ---------------------------------------------------------------------------
// MetricsCollector
// ---------------------------------------------------------------------------

/// In-process counters, gauges and duration totals for the session pool.
///
/// Registration of new series takes a write lock; updates to existing
/// series only need a read lock and an atomic.
#[derive(Debug)]
pub struct MetricsCollector {
    counters: RwLock<AHashMap<(String, Labels), AtomicU64>>,
    gauges: RwLock<AHashMap<String, AtomicI64>>,
    durations: RwLock<AHashMap<String, DurationStats>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(AHashMap::new()),
            gauges: RwLock::new(AHashMap::new()),
            durations: RwLock::new(AHashMap::new()),
        }
    }

    // -- Counters -----------------------------------------------------------

    pub fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) {
        self.increment_counter_by(name, labels, 1);
    }

    pub fn increment_counter_by(&self, name: &str, labels: &[(&str, &str)], amount: u64) {
        let key = (name.to_string(), Labels::new(labels));
        {
            let map = read(&self.counters);
            if let Some(c) = map.get(&key) {
                c.fetch_add(amount, Ordering::Relaxed);
                return;
            }
        }
        let mut map = write(&self.counters);
        map.entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(amount, Ordering::Relaxed);
    }

    pub fn get_counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = (name.to_string(), Labels::new(labels));
        read(&self.counters)
            .get(&key)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    // -- Gauges -------------------------------------------------------------

    pub fn set_gauge(&self, name: &str, value: i64) {
        {
            let map = read(&self.gauges);
            if let Some(g) = map.get(name) {
                g.store(value, Ordering::Relaxed);
                return;
            }
        }
        write(&self.gauges)
            .entry(name.to_string())
            .or_insert_with(|| AtomicI64::new(0))
            .store(value, Ordering::Relaxed);
    }

    pub fn get_gauge(&self, name: &str) -> i64 {
        read(&self.gauges)
            .get(name)
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    // -- Durations ----------------------------------------------------------

    pub fn record_duration(&self, name: &str, seconds: f64) {
        {
            let map = read(&self.durations);
            if let Some(d) = map.get(name) {
                d.observe(seconds);
                return;
            }
        }
        write(&self.durations)
            .entry(name.to_string())
            .or_default()
            .observe(seconds);
    }

    pub fn duration_count(&self, name: &str) -> u64 {
        read(&self.durations)
            .get(name)
            .map(DurationStats::count)
            .unwrap_or(0)
    }

    /// Sum of every duration recorded under `name`, in seconds.
    pub fn duration_total(&self, name: &str) -> f64 {
        read(&self.durations)
            .get(name)
            .map(DurationStats::total)
            .unwrap_or(0.0)
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Global singleton
// ---------------------------------------------------------------------------

/// Returns the process-wide `MetricsCollector`.
pub fn global_metrics() -> &'static MetricsCollector {
    use std::sync::OnceLock;
    static INSTANCE: OnceLock<MetricsCollector> = OnceLock::new();
    INSTANCE.get_or_init(MetricsCollector::new)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_increment() {
        let m = MetricsCollector::new();
        m.increment_counter(SESSIONS_EVICTED, &[("reason", "lru")]);
        m.increment_counter(SESSIONS_EVICTED, &[("reason", "lru")]);
        m.increment_counter(SESSIONS_EVICTED, &[("reason", "exited")]);

        assert_eq!(m.get_counter(SESSIONS_EVICTED, &[("reason", "lru")]), 2);
        assert_eq!(m.get_counter(SESSIONS_EVICTED, &[("reason", "exited")]), 1);
        assert_eq!(m.get_counter(SESSIONS_EVICTED, &[("reason", "protected")]), 0);
    }

    #[test]
    fn test_gauge_set() {
        let m = MetricsCollector::new();
        m.set_gauge(ACTIVE_SESSIONS, 5);
        assert_eq!(m.get_gauge(ACTIVE_SESSIONS), 5);
        m.set_gauge(ACTIVE_SESSIONS, 3);
        assert_eq!(m.get_gauge(ACTIVE_SESSIONS), 3);
    }

    #[test]
    fn durations_accumulate() {
        let m = MetricsCollector::new();
        m.record_duration(TOOL_CALL_DURATION, 0.05);
        m.record_duration(TOOL_CALL_DURATION, 0.5);
        m.record_duration(TOOL_CALL_DURATION, 2.0);

        assert_eq!(m.duration_count(TOOL_CALL_DURATION), 3);
        assert!((m.duration_total(TOOL_CALL_DURATION) - 2.55).abs() < 0.001);
    }

    #[test]
    fn test_global_metrics_singleton() {
        assert!(std::ptr::eq(global_metrics(), global_metrics()));
    }
}
