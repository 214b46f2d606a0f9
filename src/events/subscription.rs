//! # Subscriptions: standing registrations of interest in event types.
//!
//! A [`Subscription`] binds a set of event types to a handler with a
//! [`DeliveryMode`], a priority, and an optional filter predicate. An event
//! is delivered to a subscription only if the subscription is active, the
//! event type is in the set, and the filter (when present) accepts the event.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::events::{Event, EventPriority, HandlerRef};

/// Identifier returned by `subscribe` and consumed by `unsubscribe`.
pub type SubscriptionId = u64;

/// Filter predicate applied after the type match.
pub type EventFilter = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// How deliveries to one subscription are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Run inline in the dispatch loop; `emit` returns only after the
    /// handler completes. Never auto-retried.
    Sync,
    /// One task per delivery; the event counts as processed once all async
    /// deliveries joined. Retried with backoff on failure or timeout.
    Async,
    /// Detached task; success is recorded immediately. Retried with backoff.
    FireAndForget,
}

/// A standing registration of interest in one or more event types.
pub struct Subscription {
    /// Unique subscription id.
    pub id: SubscriptionId,
    /// Identifier of the subscribing component.
    pub subscriber: Arc<str>,
    /// Event types this subscription matches.
    pub types: HashSet<String>,
    /// Handler invoked per matching event.
    pub handler: HandlerRef,
    /// Scheduling mode for deliveries.
    pub mode: DeliveryMode,
    /// Priority relative to other subscriptions of the same event.
    pub priority: EventPriority,
    /// Optional filter applied after the type match.
    pub filter: Option<EventFilter>,
    /// Inactive subscriptions receive nothing and are eventually swept.
    active: AtomicBool,
    /// Last time this subscription matched an event (drives idle cleanup).
    last_seen: Mutex<Instant>,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        subscriber: Arc<str>,
        types: HashSet<String>,
        handler: HandlerRef,
        mode: DeliveryMode,
        priority: EventPriority,
        filter: Option<EventFilter>,
    ) -> Self {
        Self {
            id,
            subscriber,
            types,
            handler,
            mode,
            priority,
            filter,
            active: AtomicBool::new(true),
            last_seen: Mutex::new(Instant::now()),
        }
    }

    /// True if the subscription currently receives events.
    pub fn is_active(&self) -> bool {
        self.active.load(AtomicOrdering::Relaxed)
    }

    /// Pauses or resumes the subscription.
    pub fn set_active(&self, active: bool) {
        self.active.store(active, AtomicOrdering::Relaxed);
        if active {
            self.touch();
        }
    }

    /// True if the event passes the active/type/filter gate.
    pub fn matches(&self, event: &Event) -> bool {
        if !self.is_active() {
            return false;
        }
        if !self.types.contains(event.event_type.as_ref()) {
            return false;
        }
        match &self.filter {
            Some(f) => f(event),
            None => true,
        }
    }

    /// Records delivery activity for idle tracking.
    pub(crate) fn touch(&self) {
        if let Ok(mut t) = self.last_seen.lock() {
            *t = Instant::now();
        }
    }

    /// Time since the last matched delivery (or activation).
    pub(crate) fn idle_for(&self) -> std::time::Duration {
        self.last_seen
            .lock()
            .map(|t| t.elapsed())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("subscriber", &self.subscriber)
            .field("types", &self.types)
            .field("mode", &self.mode)
            .field("priority", &self.priority)
            .field("active", &self.is_active())
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}
