//! # Events exchanged between services.
//!
//! An [`Event`] is an immutable record created by a producer at emit time:
//! a type string, a source, a [`EventPriority`], an opaque payload map, and
//! a wall-clock timestamp. Each event gets a globally unique, monotonically
//! increasing `id` from an atomic counter, so consumers can restore exact
//! emission order even when deliveries complete out of order.
//!
//! ## Example
//! ```rust
//! use servisor::{Event, EventPriority};
//!
//! let ev = Event::new("cache.invalidated", "catalog")
//!     .with_priority(EventPriority::High)
//!     .with_field("key", "sku-123");
//!
//! assert_eq!(ev.event_type.as_ref(), "cache.invalidated");
//! assert_eq!(ev.field("key"), Some("sku-123"));
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::SystemTime;

/// Global counter for event ids.
static EVENT_ID: AtomicU64 = AtomicU64::new(0);

/// Relative importance of an event or a subscription.
///
/// Within one event, higher-priority subscriptions are invoked first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventPriority {
    Low,
    Normal,
    Medium,
    High,
    Critical,
}

impl EventPriority {
    /// All priorities, lowest first. Index matches `as_index`.
    pub const ALL: [EventPriority; 5] = [
        EventPriority::Low,
        EventPriority::Normal,
        EventPriority::Medium,
        EventPriority::High,
        EventPriority::Critical,
    ];

    /// Dense index for per-priority counters.
    pub fn as_index(self) -> usize {
        match self {
            EventPriority::Low => 0,
            EventPriority::Normal => 1,
            EventPriority::Medium => 2,
            EventPriority::High => 3,
            EventPriority::Critical => 4,
        }
    }

    /// Short stable label (snake_case) for logs/metrics.
    pub fn as_label(self) -> &'static str {
        match self {
            EventPriority::Low => "low",
            EventPriority::Normal => "normal",
            EventPriority::Medium => "medium",
            EventPriority::High => "high",
            EventPriority::Critical => "critical",
        }
    }
}

impl Default for EventPriority {
    /// Returns [`EventPriority::Normal`].
    fn default() -> Self {
        EventPriority::Normal
    }
}

/// Immutable runtime event.
///
/// Cheap to clone: the type, source, and payload are `Arc`-backed.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing id.
    pub id: u64,
    /// Event classification, e.g. `"service.health.changed"`.
    pub event_type: Arc<str>,
    /// Name of the producer.
    pub source: Arc<str>,
    /// Dispatch priority.
    pub priority: EventPriority,
    /// Opaque payload map.
    pub payload: Arc<HashMap<String, String>>,
    /// Wall-clock creation timestamp.
    pub at: SystemTime,
}

impl Event {
    /// Creates an event with the next global id and the current timestamp.
    pub fn new(event_type: impl Into<Arc<str>>, source: impl Into<Arc<str>>) -> Self {
        Self {
            id: EVENT_ID.fetch_add(1, AtomicOrdering::Relaxed),
            event_type: event_type.into(),
            source: source.into(),
            priority: EventPriority::Normal,
            payload: Arc::new(HashMap::new()),
            at: SystemTime::now(),
        }
    }

    /// Sets the priority.
    #[inline]
    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Adds one payload field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.payload).insert(key.into(), value.into());
        self
    }

    /// Replaces the whole payload map.
    pub fn with_payload(mut self, payload: HashMap<String, String>) -> Self {
        self.payload = Arc::new(payload);
        self
    }

    /// Looks up one payload field.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic() {
        let a = Event::new("t", "s");
        let b = Event::new("t", "s");
        assert!(b.id > a.id);
    }

    #[test]
    fn priority_ordering() {
        assert!(EventPriority::Critical > EventPriority::High);
        assert!(EventPriority::High > EventPriority::Medium);
        assert!(EventPriority::Medium > EventPriority::Normal);
        assert!(EventPriority::Normal > EventPriority::Low);
    }

    #[test]
    fn payload_builder() {
        let ev = Event::new("t", "s").with_field("k", "v").with_field("k2", "v2");
        assert_eq!(ev.field("k"), Some("v"));
        assert_eq!(ev.field("missing"), None);
        assert_eq!(ev.payload.len(), 2);
    }
}
