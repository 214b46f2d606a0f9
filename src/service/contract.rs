//! # Service contract.
//!
//! [`Service`] is the lifecycle interface every managed component
//! implements. The orchestrator holds a collection of `Arc<dyn Service>`,
//! never concrete types; the state machine around the hooks lives in
//! [`ServiceHandle`](crate::service::ServiceHandle), so implementations only
//! provide the side effects.
//!
//! ## Example
//! ```
//! use async_trait::async_trait;
//! use servisor::{HealthReport, Service, ServiceError};
//!
//! struct CacheWarmer;
//!
//! #[async_trait]
//! impl Service for CacheWarmer {
//!     fn name(&self) -> &str { "cache-warmer" }
//!
//!     async fn on_initialize(&self) -> Result<(), ServiceError> { Ok(()) }
//!     async fn on_start(&self) -> Result<(), ServiceError> { Ok(()) }
//!     async fn on_stop(&self) -> Result<(), ServiceError> { Ok(()) }
//!     async fn on_health_check(&self) -> Result<HealthReport, ServiceError> {
//!         Ok(HealthReport::healthy())
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ServiceError;
use crate::service::HealthReport;

/// Shared handle to a managed service.
pub type ServiceRef = Arc<dyn Service>;

/// Lifecycle hooks supplied by a concrete service.
///
/// A hook error (or panic) moves the service to `Error`/`Unhealthy` and is
/// re-raised to the caller. Hooks may block on collaborator I/O; the
/// orchestrator wraps every invocation with a deadline.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Stable, unique service name.
    fn name(&self) -> &str;

    /// Acquire resources; runs during `Created → Ready`.
    async fn on_initialize(&self) -> Result<(), ServiceError>;

    /// Begin doing work; runs during `Ready → Running`.
    async fn on_start(&self) -> Result<(), ServiceError>;

    /// Release resources; runs during `→ Stopped`.
    async fn on_stop(&self) -> Result<(), ServiceError>;

    /// Point-in-time self-report used by the health loop.
    async fn on_health_check(&self) -> Result<HealthReport, ServiceError>;

    /// Suspend work; runs during `Running → Paused`. Defaults to a no-op.
    async fn on_pause(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Resume work; runs during `Paused → Running`. Defaults to a no-op.
    async fn on_resume(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}
