//! # EventBus: bounded-queue pub/sub with priority fan-out.
//!
//! A single background dispatch loop pulls events FIFO from a bounded ingress
//! queue and fans each one out to the matching subscriptions, higher
//! subscription priority first. Per-subscriber failures are fully contained:
//! a handler error, panic, or timeout is recorded in [`EventMetrics`] and
//! never blocks delivery to the other subscribers of the same event.
//!
//! ## Architecture
//! ```text
//! Producers (many):                      Dispatch (one loop):
//!   emit(Event) ──► [bounded VecDeque] ──► match subscriptions
//!        │                                   sort by priority desc
//!        │                                   ├─ Sync:          inline, awaited
//!        │                                   ├─ Async:         task per handler, joined
//!        │                                   └─ FireAndForget: detached task
//!        └─ awaits sync completion when the event matches a Sync subscription
//! ```
//!
//! ## Rules
//! - **FIFO across events**; priority order within one event; no ordering
//!   guarantee across in-flight async deliveries of different events.
//! - **Backpressure**: a full queue rejects the event
//!   ([`OverflowPolicy::Reject`], default) or evicts the oldest
//!   ([`OverflowPolicy::DropOldest`]); an emitter awaiting Sync completion
//!   of an evicted event gets [`BusError::Dropped`].
//! - **Stop discards**: [`EventBus::stop`] cancels the loop and drops any
//!   still-queued events, no flush guarantee.
//! - **Retries**: Async/FireAndForget deliveries retry with exponential
//!   backoff on error or timeout; Sync deliveries never auto-retry.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Instant;

use futures::FutureExt;
use tokio::sync::{oneshot, Notify};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{BusConfig, OverflowPolicy};
use crate::error::BusError;
use crate::events::{
    DeliveryMode, Event, EventFilter, EventMetrics, EventPriority, HandlerRef, MetricsSnapshot,
    Subscription, SubscriptionId,
};
use crate::policies::BackoffPolicy;

/// One ingress queue entry.
struct QueuedEvent {
    event: Event,
    enqueued_at: Instant,
    /// Present when the event matched a Sync subscription at emit time; the
    /// dispatch loop signals it after the inline deliveries finish.
    sync_done: Option<oneshot::Sender<()>>,
}

struct BusInner {
    cfg: BusConfig,
    backoff: BackoffPolicy,
    queue: Mutex<VecDeque<QueuedEvent>>,
    notify: Notify,
    subs: RwLock<Vec<Arc<Subscription>>>,
    history: Mutex<VecDeque<Event>>,
    metrics: EventMetrics,
    running: AtomicBool,
    next_id: AtomicU64,
    cancel: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

/// Bounded-queue publish/subscribe channel with priority-aware dispatch.
///
/// Cheap to clone; all clones share the same queue, subscriptions, and
/// metrics.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Creates a stopped bus. Call [`EventBus::start`] before emitting.
    pub fn new(cfg: BusConfig) -> Self {
        let backoff = BackoffPolicy::doubling(cfg.retry_delay, cfg.retry_jitter);
        Self {
            inner: Arc::new(BusInner {
                backoff,
                queue: Mutex::new(VecDeque::with_capacity(cfg.max_queue_size.min(1024))),
                notify: Notify::new(),
                subs: RwLock::new(Vec::new()),
                history: Mutex::new(VecDeque::new()),
                metrics: EventMetrics::new(),
                running: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                cancel: CancellationToken::new(),
                dispatcher: Mutex::new(None),
                cfg,
            }),
        }
    }

    /// Spawns the dispatch loop. Idempotent while running; a no-op once
    /// the bus has been stopped.
    pub fn start(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        if self.inner.running.swap(true, AtomicOrdering::SeqCst) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let cancel = self.inner.cancel.clone();
        let handle = tokio::spawn(dispatch_loop(inner, cancel));
        *lock(&self.inner.dispatcher) = Some(handle);
    }

    /// Cancels the dispatch loop and discards still-queued events.
    ///
    /// Pending `emit` calls waiting on Sync completion fail with
    /// [`BusError::Stopped`]. Idempotent; the bus cannot be restarted.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, AtomicOrdering::SeqCst) {
            return;
        }
        self.inner.cancel.cancel();
        // dropping the entries drops their sync_done senders
        lock(&self.inner.queue).clear();
        let handle = lock(&self.inner.dispatcher).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// True while the dispatch loop is running.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(AtomicOrdering::SeqCst)
    }

    /// Registers a subscription for the given event types.
    ///
    /// `types` must be non-empty. The handler is typed, so there is no nil
    /// handler to guard against.
    pub fn subscribe(
        &self,
        subscriber: &str,
        types: &[&str],
        mode: DeliveryMode,
        priority: EventPriority,
        handler: HandlerRef,
    ) -> Result<SubscriptionId, BusError> {
        self.subscribe_inner(subscriber, types, mode, priority, handler, None)
    }

    /// Like [`EventBus::subscribe`], with a filter predicate applied after
    /// the type match.
    pub fn subscribe_filtered(
        &self,
        subscriber: &str,
        types: &[&str],
        mode: DeliveryMode,
        priority: EventPriority,
        handler: HandlerRef,
        filter: EventFilter,
    ) -> Result<SubscriptionId, BusError> {
        self.subscribe_inner(subscriber, types, mode, priority, handler, Some(filter))
    }

    fn subscribe_inner(
        &self,
        subscriber: &str,
        types: &[&str],
        mode: DeliveryMode,
        priority: EventPriority,
        handler: HandlerRef,
        filter: Option<EventFilter>,
    ) -> Result<SubscriptionId, BusError> {
        if types.is_empty() {
            return Err(BusError::InvalidSubscription {
                reason: "event type set is empty".to_string(),
            });
        }
        let id = self.inner.next_id.fetch_add(1, AtomicOrdering::Relaxed);
        let sub = Arc::new(Subscription::new(
            id,
            Arc::from(subscriber),
            types.iter().map(|t| t.to_string()).collect(),
            handler,
            mode,
            priority,
            filter,
        ));
        write(&self.inner.subs).push(sub);
        Ok(id)
    }

    /// Removes a subscription. Returns `false` when the id is unknown, so a
    /// second call on the same id returns `false`.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = write(&self.inner.subs);
        match subs.iter().position(|s| s.id == id) {
            Some(pos) => {
                subs.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Pauses or resumes a subscription. Returns `false` if unknown.
    ///
    /// Paused subscriptions receive nothing; once idle longer than
    /// `inactive_ttl` they are swept away by the dispatch loop.
    pub fn set_active(&self, id: SubscriptionId, active: bool) -> bool {
        let subs = read(&self.inner.subs);
        match subs.iter().find(|s| s.id == id) {
            Some(sub) => {
                sub.set_active(active);
                true
            }
            None => false,
        }
    }

    /// Number of registered subscriptions.
    pub fn subscription_count(&self) -> usize {
        read(&self.inner.subs).len()
    }

    /// Publishes an event.
    ///
    /// Fails with [`BusError::Stopped`] when the bus is not running, or with
    /// [`BusError::QueueFull`] when the ingress queue is full under the
    /// reject policy. When the event matches an active Sync subscription the
    /// call returns only after those inline deliveries complete; if the
    /// queued entry is evicted under the drop-oldest policy before dispatch,
    /// the call fails with [`BusError::Dropped`].
    pub async fn emit(&self, event: Event) -> Result<(), BusError> {
        if !self.inner.running.load(AtomicOrdering::SeqCst) {
            return Err(BusError::Stopped);
        }

        let wants_sync = read(&self.inner.subs)
            .iter()
            .any(|s| s.mode == DeliveryMode::Sync && s.matches(&event));
        let (sync_done, wait) = if wants_sync {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        {
            let mut queue = lock(&self.inner.queue);
            if queue.len() >= self.inner.cfg.max_queue_size {
                match self.inner.cfg.overflow {
                    OverflowPolicy::Reject => {
                        return Err(BusError::QueueFull {
                            capacity: self.inner.cfg.max_queue_size,
                        });
                    }
                    OverflowPolicy::DropOldest => {
                        if queue.pop_front().is_some() {
                            self.inner.metrics.record_dropped();
                        }
                    }
                }
            }
            queue.push_back(QueuedEvent {
                event: event.clone(),
                enqueued_at: Instant::now(),
                sync_done,
            });
        }

        self.inner.metrics.record_emitted(&event);
        self.push_history(event);
        self.inner.notify.notify_one();

        if let Some(rx) = wait {
            // the loop signals after inline Sync deliveries; a dropped sender
            // means the entry was evicted under drop-oldest, or the bus was
            // stopped underneath us (stop flips `running` before clearing)
            rx.await.map_err(|_| {
                if self.inner.running.load(AtomicOrdering::SeqCst) {
                    BusError::Dropped
                } else {
                    BusError::Stopped
                }
            })?;
        }
        Ok(())
    }

    /// Point-in-time copy of the delivery counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Most recent accepted events, oldest first (bounded ring).
    pub fn recent_events(&self) -> Vec<Event> {
        lock(&self.inner.history).iter().cloned().collect()
    }

    fn push_history(&self, event: Event) {
        if self.inner.cfg.history_capacity == 0 {
            return;
        }
        let mut history = lock(&self.inner.history);
        if history.len() >= self.inner.cfg.history_capacity {
            history.pop_front();
        }
        history.push_back(event);
    }
}

/// Mutex helpers: a poisoned lock carries no broken invariant here, the
/// protected values stay usable.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn read<T>(l: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(l: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(|e| e.into_inner())
}

/// Single queue consumer: drain, dispatch, sleep until notified.
async fn dispatch_loop(inner: Arc<BusInner>, cancel: CancellationToken) {
    let mut sweep = tokio::time::interval(inner.cfg.sweep_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        // bind first so the queue guard is released before the await
        loop {
            let item = lock(&inner.queue).pop_front();
            match item {
                Some(item) => dispatch_one(&inner, item).await,
                None => break,
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = inner.notify.notified() => {}
            _ = sweep.tick() => sweep_idle(&inner),
        }
    }
}

/// Fans one event out to the matching subscriptions.
async fn dispatch_one(inner: &Arc<BusInner>, item: QueuedEvent) {
    let QueuedEvent {
        event,
        enqueued_at,
        sync_done,
    } = item;

    let matching: Vec<Arc<Subscription>> = {
        let subs = read(&inner.subs);
        let mut m: Vec<_> = subs.iter().filter(|s| s.matches(&event)).cloned().collect();
        // stable sort keeps insertion order within one priority
        m.sort_by(|a, b| b.priority.cmp(&a.priority));
        m
    };

    let mut joined = JoinSet::new();
    for sub in matching {
        sub.touch();
        match sub.mode {
            DeliveryMode::Sync => {
                match deliver_once(inner, &sub, event.clone()).await {
                    Ok(()) => inner.metrics.record_delivered(enqueued_at.elapsed()),
                    Err(err) => {
                        inner.metrics.record_failed();
                        warn!(
                            subscriber = sub.subscriber.as_ref(),
                            event_type = event.event_type.as_ref(),
                            error = %err,
                            "sync delivery failed"
                        );
                    }
                }
            }
            DeliveryMode::Async => {
                let inner = Arc::clone(inner);
                let event = event.clone();
                joined.spawn(async move {
                    if deliver_with_retry(&inner, &sub, event).await {
                        inner.metrics.record_delivered(enqueued_at.elapsed());
                    } else {
                        inner.metrics.record_failed();
                    }
                });
            }
            DeliveryMode::FireAndForget => {
                // success is recorded up front; an eventual failure still
                // bumps the failed counter
                inner.metrics.record_delivered(enqueued_at.elapsed());
                let inner = Arc::clone(inner);
                let event = event.clone();
                tokio::spawn(async move {
                    if !deliver_with_retry(&inner, &sub, event).await {
                        inner.metrics.record_failed();
                    }
                });
            }
        }
    }

    // unblock the emitter once the inline Sync deliveries are done
    if let Some(done) = sync_done {
        let _ = done.send(());
    }

    // the event counts as processed only after all async deliveries joined
    while joined.join_next().await.is_some() {}
}

/// One bounded handler invocation with panic isolation.
async fn deliver_once(
    inner: &Arc<BusInner>,
    sub: &Arc<Subscription>,
    event: Event,
) -> Result<(), BusError> {
    let fut = AssertUnwindSafe(sub.handler.handle(event)).catch_unwind();
    match tokio::time::timeout(inner.cfg.delivery_timeout, fut).await {
        Err(_) => Err(BusError::DeliveryTimeout {
            timeout: inner.cfg.delivery_timeout,
        }),
        Ok(Err(_panic)) => Err(BusError::Handler {
            handler: sub.handler.name().to_string(),
            message: "handler panicked".to_string(),
        }),
        Ok(Ok(Err(err))) => Err(BusError::Handler {
            handler: sub.handler.name().to_string(),
            message: err.message,
        }),
        Ok(Ok(Ok(()))) => Ok(()),
    }
}

/// Retrying delivery for Async/FireAndForget subscriptions.
async fn deliver_with_retry(
    inner: &Arc<BusInner>,
    sub: &Arc<Subscription>,
    event: Event,
) -> bool {
    let mut attempt: u32 = 0;
    loop {
        match deliver_once(inner, sub, event.clone()).await {
            Ok(()) => return true,
            Err(err) => {
                if attempt >= inner.cfg.retry_attempts {
                    warn!(
                        subscriber = sub.subscriber.as_ref(),
                        event_type = event.event_type.as_ref(),
                        attempts = attempt + 1,
                        error = %err,
                        "delivery exhausted retries"
                    );
                    return false;
                }
                let delay = inner.backoff.next(attempt);
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Drops inactive subscriptions that have been idle longer than the TTL.
fn sweep_idle(inner: &Arc<BusInner>) {
    let ttl = inner.cfg.inactive_ttl;
    let mut subs = write(&inner.subs);
    let before = subs.len();
    subs.retain(|s| s.is_active() || s.idle_for() < ttl);
    let removed = before - subs.len();
    if removed > 0 {
        debug!(removed, "swept idle inactive subscriptions");
    }
}
