//! Event system: data model, handler contract, subscriptions, and the bus.
//!
//! ## Contents
//! - [`Event`], [`EventPriority`] — the immutable event record
//! - [`EventHandler`], [`HandlerFn`], [`HandlerRef`] — the typed handler seam
//! - [`Subscription`], [`DeliveryMode`], [`EventFilter`] — standing interest
//! - [`EventBus`] — bounded-queue dispatch loop with priority fan-out
//! - [`EventMetrics`], [`MetricsSnapshot`] — per-bus delivery counters
//!
//! Services talk to each other through the bus only; the orchestrator uses
//! it (when attached) to announce lifecycle and health transitions.

mod bus;
mod event;
mod handler;
mod metrics;
mod subscription;

#[cfg(feature = "logging")]
mod log;

pub use bus::EventBus;
pub use event::{Event, EventPriority};
pub use handler::{EventHandler, HandlerFn, HandlerRef};
pub use metrics::{EventMetrics, MetricsSnapshot};
pub use subscription::{DeliveryMode, EventFilter, Subscription, SubscriptionId};

#[cfg(feature = "logging")]
pub use log::EventLogger;
