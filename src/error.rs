//! Error types used by the orchestrator, the event bus, and managed services.
//!
//! This module defines the error taxonomy of the runtime:
//!
//! - [`OrchestratorError`] — errors raised by the orchestration layer
//!   (registration, dependency graph, coordinated start/stop).
//! - [`BusError`] — errors raised by the event bus (backpressure, delivery).
//! - [`ServiceError`] — errors raised by a single service's lifecycle hooks
//!   or by an invalid state transition.
//! - [`HandlerError`] — error returned by an event handler invocation.
//!
//! Structural errors (`NotFound`, `Duplicate`, `Cycle`) are returned
//! synchronously and leave state unchanged. Runtime failures are converted
//! into the service's `Error`/`Failed` status at the orchestrator boundary
//! and never crash the health loop or the dispatch loop.
//!
//! All enums provide `as_label()` returning a short stable snake_case label
//! for logs and metrics.

use std::time::Duration;
use thiserror::Error;

use crate::service::ServiceStatus;

/// # Errors produced by the orchestration layer.
///
/// These represent failures of the coordination runtime itself: unknown or
/// duplicate service names, dependency cycles, and start/stop failures of
/// managed services.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// A named service (or graph node) is not registered.
    #[error("service not found: {name}")]
    NotFound {
        /// The unknown service name.
        name: String,
    },

    /// A service with this name is already registered.
    #[error("service already registered: {name}")]
    Duplicate {
        /// The conflicting service name.
        name: String,
    },

    /// Adding the edge would make the dependency graph cyclic.
    ///
    /// The graph is left unchanged when this is returned.
    #[error("dependency cycle: {node} -> {depends_on}")]
    Cycle {
        /// The node the edge starts from.
        node: String,
        /// The dependency the edge points at.
        depends_on: String,
    },

    /// A service failed to reach `Running` (hook failure or timeout).
    #[error("service '{name}' failed to start: {reason}")]
    Startup {
        /// Name of the service that failed.
        name: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// A service failed to stop cleanly (hook failure or timeout).
    #[error("service '{name}' failed to stop: {reason}")]
    Shutdown {
        /// Name of the service that failed.
        name: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// A lifecycle operation exceeded its configured deadline.
    #[error("{op} of service '{name}' timed out after {timeout:?}")]
    Timeout {
        /// Name of the service the operation targeted.
        name: String,
        /// The operation that timed out ("start", "stop", "health_check").
        op: &'static str,
        /// The deadline that was exceeded.
        timeout: Duration,
    },

    /// The orchestrator is not in a state that allows the operation.
    #[error("orchestrator is {state}: {op} not allowed")]
    InvalidState {
        /// Current orchestrator state, formatted.
        state: &'static str,
        /// The rejected operation.
        op: &'static str,
    },
}

impl OrchestratorError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            OrchestratorError::NotFound { .. } => "service_not_found",
            OrchestratorError::Duplicate { .. } => "service_duplicate",
            OrchestratorError::Cycle { .. } => "dependency_cycle",
            OrchestratorError::Startup { .. } => "service_startup_failed",
            OrchestratorError::Shutdown { .. } => "service_shutdown_failed",
            OrchestratorError::Timeout { .. } => "operation_timeout",
            OrchestratorError::InvalidState { .. } => "orchestrator_invalid_state",
        }
    }
}

/// # Errors produced by the event bus.
///
/// Backpressure errors (`QueueFull`) are returned synchronously from
/// [`EventBus::emit`](crate::events::EventBus::emit); delivery errors are
/// contained per subscription and surface only in metrics.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BusError {
    /// The bus was stopped (or never started); the event was not accepted.
    #[error("event bus is stopped")]
    Stopped,

    /// The ingress queue is full under the reject-on-overflow policy.
    #[error("event queue full (capacity {capacity})")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// The event was evicted from a full queue under the drop-oldest
    /// policy before it could be dispatched.
    #[error("event evicted from full queue before dispatch")]
    Dropped,

    /// The subscription request was malformed (e.g. empty type set).
    #[error("invalid subscription: {reason}")]
    InvalidSubscription {
        /// What was wrong with the request.
        reason: String,
    },

    /// A single delivery exceeded the configured delivery timeout.
    #[error("delivery timed out after {timeout:?}")]
    DeliveryTimeout {
        /// The deadline that was exceeded.
        timeout: Duration,
    },

    /// A handler returned an error (or panicked) while processing an event.
    #[error("handler '{handler}' failed: {message}")]
    Handler {
        /// Name of the failing handler.
        handler: String,
        /// Failure message.
        message: String,
    },
}

impl BusError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            BusError::Stopped => "bus_stopped",
            BusError::QueueFull { .. } => "bus_queue_full",
            BusError::Dropped => "bus_event_dropped",
            BusError::InvalidSubscription { .. } => "bus_invalid_subscription",
            BusError::DeliveryTimeout { .. } => "bus_delivery_timeout",
            BusError::Handler { .. } => "bus_handler_failed",
        }
    }
}

/// # Errors produced by a single service.
///
/// Lifecycle hooks return [`ServiceError::Hook`]; the state machine in
/// [`ServiceHandle`](crate::service::ServiceHandle) returns
/// [`ServiceError::InvalidTransition`] when an operation is attempted from
/// the wrong state.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ServiceError {
    /// A lifecycle hook reported a failure.
    #[error("hook failed: {message}")]
    Hook {
        /// Failure message from the hook.
        message: String,
    },

    /// The operation is not valid from the service's current status.
    #[error("'{name}' cannot {op} from {from:?}")]
    InvalidTransition {
        /// Service name.
        name: String,
        /// The rejected operation.
        op: &'static str,
        /// Status the service was in.
        from: ServiceStatus,
    },

    /// The operation was abandoned because the runtime is shutting down.
    #[error("operation canceled")]
    Canceled,
}

impl ServiceError {
    /// Convenience constructor for hook failures.
    pub fn hook(message: impl Into<String>) -> Self {
        ServiceError::Hook {
            message: message.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ServiceError::Hook { .. } => "service_hook_failed",
            ServiceError::InvalidTransition { .. } => "service_invalid_transition",
            ServiceError::Canceled => "service_canceled",
        }
    }
}

/// Error returned by an [`EventHandler`](crate::events::EventHandler).
///
/// Handler failures are contained per subscription: they are recorded in the
/// bus metrics and never block delivery to other subscribers.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct HandlerError {
    /// Failure message.
    pub message: String,
}

impl HandlerError {
    /// Creates a handler error from any displayable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}
