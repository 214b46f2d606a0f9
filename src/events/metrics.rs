//! # Per-bus delivery counters.
//!
//! [`EventMetrics`] tracks total emitted/delivered/failed/dropped events,
//! breakdowns by event type and priority, and an exponentially-weighted
//! moving average of delivery latency. Handler failures bump counters and
//! never stop the bus.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;
use std::time::Duration;

use crate::events::{Event, EventPriority};

/// EWMA smoothing: new = old + (sample - old) / 8.
const LATENCY_SMOOTHING: u64 = 8;

/// Lock-free counters plus coarse-grained breakdown maps.
#[derive(Debug, Default)]
pub struct EventMetrics {
    emitted: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    latency_us: AtomicU64,
    by_priority: [AtomicU64; 5],
    by_type: Mutex<HashMap<String, u64>>,
}

impl EventMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records acceptance of an event into the queue.
    pub fn record_emitted(&self, event: &Event) {
        self.emitted.fetch_add(1, AtomicOrdering::Relaxed);
        self.by_priority[event.priority.as_index()].fetch_add(1, AtomicOrdering::Relaxed);
        if let Ok(mut map) = self.by_type.lock() {
            *map.entry(event.event_type.to_string()).or_insert(0) += 1;
        }
    }

    /// Records one successful delivery and its latency since emission.
    pub fn record_delivered(&self, latency: Duration) {
        self.delivered.fetch_add(1, AtomicOrdering::Relaxed);
        self.observe_latency(latency);
    }

    /// Records one failed delivery (handler error, panic, or timeout).
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Records an event evicted under the drop-oldest overflow policy.
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, AtomicOrdering::Relaxed);
    }

    fn observe_latency(&self, latency: Duration) {
        let sample = latency.as_micros().min(u128::from(u64::MAX)) as u64;
        // racy read-modify-write is acceptable for a smoothed gauge
        let old = self.latency_us.load(AtomicOrdering::Relaxed);
        let new = if old == 0 {
            sample
        } else if sample >= old {
            old + (sample - old) / LATENCY_SMOOTHING
        } else {
            old - (old - sample) / LATENCY_SMOOTHING
        };
        self.latency_us.store(new, AtomicOrdering::Relaxed);
    }

    /// Takes a point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let by_type = self
            .by_type
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default();
        let mut by_priority = HashMap::new();
        for p in EventPriority::ALL {
            let v = self.by_priority[p.as_index()].load(AtomicOrdering::Relaxed);
            if v > 0 {
                by_priority.insert(p, v);
            }
        }
        MetricsSnapshot {
            emitted: self.emitted.load(AtomicOrdering::Relaxed),
            delivered: self.delivered.load(AtomicOrdering::Relaxed),
            failed: self.failed.load(AtomicOrdering::Relaxed),
            dropped: self.dropped.load(AtomicOrdering::Relaxed),
            avg_latency: Duration::from_micros(self.latency_us.load(AtomicOrdering::Relaxed)),
            by_type,
            by_priority,
        }
    }
}

/// Point-in-time copy of the bus counters, safe to hold across awaits.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// Events accepted into the queue.
    pub emitted: u64,
    /// Successful deliveries (one per matching subscription).
    pub delivered: u64,
    /// Failed deliveries (errors, panics, timeouts after retries).
    pub failed: u64,
    /// Events evicted by the drop-oldest overflow policy.
    pub dropped: u64,
    /// Moving average delivery latency.
    pub avg_latency: Duration,
    /// Emission counts per event type.
    pub by_type: HashMap<String, u64>,
    /// Emission counts per priority (zero entries omitted).
    pub by_priority: HashMap<EventPriority, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let m = EventMetrics::new();
        m.record_emitted(&Event::new("a", "s"));
        m.record_emitted(&Event::new("a", "s").with_priority(EventPriority::High));
        m.record_delivered(Duration::from_micros(100));
        m.record_failed();
        m.record_dropped();

        let snap = m.snapshot();
        assert_eq!(snap.emitted, 2);
        assert_eq!(snap.delivered, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.dropped, 1);
        assert_eq!(snap.by_type.get("a"), Some(&2));
        assert_eq!(snap.by_priority.get(&EventPriority::High), Some(&1));
        assert_eq!(snap.avg_latency, Duration::from_micros(100));
    }

    #[test]
    fn latency_moves_toward_samples() {
        let m = EventMetrics::new();
        m.record_delivered(Duration::from_micros(800));
        let first = m.snapshot().avg_latency;
        for _ in 0..50 {
            m.record_delivered(Duration::from_micros(100));
        }
        let later = m.snapshot().avg_latency;
        assert!(later < first);
    }
}
