//! Retry delay policies.
//!
//! Used by the event bus to space out redelivery attempts for Async and
//! FireAndForget subscriptions.
//!
//! - [`BackoffPolicy`] — how retry delays grow with the attempt number.
//! - [`JitterPolicy`] — randomization applied on top of the computed delay.

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
