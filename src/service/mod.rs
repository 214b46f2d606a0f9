//! # Service contract and per-service lifecycle state.
//!
//! - [`Service`] is the trait every managed component implements: async
//!   lifecycle hooks plus a health probe.
//! - [`FnService`] builds a service from closures, for small components and
//!   tests.
//! - [`ServiceHandle`] wraps one service with its state machine (status,
//!   health, failure counters) and serializes lifecycle operations.

mod contract;
mod fn_service;
mod handle;
mod status;

pub use contract::{Service, ServiceRef};
pub use fn_service::{FnService, FnServiceBuilder};
pub use handle::{ServiceHandle, TransitionCallback};
pub use status::{HealthReport, ServiceHealth, ServiceSnapshot, ServiceStatus};
