//! # Event handler contract.
//!
//! [`EventHandler`] is the single typed interface every subscription supplies.
//! Handlers are invoked by the dispatch loop (inline for Sync subscriptions,
//! from spawned tasks otherwise); a failure is contained to the owning
//! subscription and recorded in the bus metrics.
//!
//! [`HandlerFn`] wraps a closure `F: Fn(Event) -> Fut`, producing a fresh
//! future per delivery, so no shared mutable state is needed. Share state
//! explicitly with `Arc` inside the closure when you want it.
//!
//! ## Example
//! ```rust
//! use servisor::{Event, HandlerFn, HandlerRef};
//!
//! let h: HandlerRef = HandlerFn::arc("audit", |ev: Event| async move {
//!     let _ = ev.id;
//!     Ok(())
//! });
//! assert_eq!(h.name(), "audit");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::HandlerError;
use crate::events::Event;

/// Shared handle to an event handler.
pub type HandlerRef = Arc<dyn EventHandler>;

/// Contract for event handlers.
///
/// Implementations may be slow (I/O, batching); Sync deliveries block the
/// dispatch loop for at most the configured delivery timeout, Async and
/// FireAndForget deliveries run on their own tasks.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Processes one event. The event is an owned, cheap clone.
    async fn handle(&self, event: Event) -> Result<(), HandlerError>;

    /// Human-readable name (for logs/metrics).
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Function-backed handler implementation.
#[derive(Debug)]
pub struct HandlerFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> HandlerFn<F> {
    /// Creates a new function-backed handler.
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self { name: name.into(), f }
    }

    /// Creates the handler and returns it as a shared [`HandlerRef`].
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<F, Fut> EventHandler for HandlerFn<F>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, event: Event) -> Result<(), HandlerError> {
        (self.f)(event).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
