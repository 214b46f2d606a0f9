//! # Service status, health, and report types.

use std::collections::HashMap;

/// Lifecycle status of a managed service.
///
/// Happy path: `Created → Initializing → Ready → Running`, with
/// `Running ↔ Paused`, and `any → Stopping → Stopped`. A hook failure moves
/// the service to `Error`; the orchestrator marks startup casualties
/// `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceStatus {
    Created,
    Initializing,
    Ready,
    Running,
    Paused,
    Stopping,
    Stopped,
    Error,
    Failed,
}

impl ServiceStatus {
    /// Short stable label (snake_case) for logs/metrics.
    pub fn as_label(self) -> &'static str {
        match self {
            ServiceStatus::Created => "created",
            ServiceStatus::Initializing => "initializing",
            ServiceStatus::Ready => "ready",
            ServiceStatus::Running => "running",
            ServiceStatus::Paused => "paused",
            ServiceStatus::Stopping => "stopping",
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Error => "error",
            ServiceStatus::Failed => "failed",
        }
    }
}

/// Point-in-time health classification of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceHealth {
    Healthy,
    Degraded,
    Unhealthy,
    /// No health check has completed yet.
    Unknown,
}

impl ServiceHealth {
    /// Short stable label (snake_case) for logs/metrics.
    pub fn as_label(self) -> &'static str {
        match self {
            ServiceHealth::Healthy => "healthy",
            ServiceHealth::Degraded => "degraded",
            ServiceHealth::Unhealthy => "unhealthy",
            ServiceHealth::Unknown => "unknown",
        }
    }
}

/// Self-reported result of one health check.
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Overall verdict; `false` counts toward the failure threshold.
    pub healthy: bool,
    /// Health classification.
    pub health: ServiceHealth,
    /// Optional human-readable status message.
    pub message: Option<String>,
    /// Free-form diagnostic details.
    pub details: HashMap<String, String>,
}

impl HealthReport {
    /// A plain healthy report.
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            health: ServiceHealth::Healthy,
            message: None,
            details: HashMap::new(),
        }
    }

    /// Operational but impaired; counts as healthy for recovery purposes.
    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            healthy: true,
            health: ServiceHealth::Degraded,
            message: Some(message.into()),
            details: HashMap::new(),
        }
    }

    /// Not operational.
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            health: ServiceHealth::Unhealthy,
            message: Some(message.into()),
            details: HashMap::new(),
        }
    }

    /// Adds one diagnostic detail.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Copy of one service's descriptor, safe to hold across awaits.
#[derive(Debug, Clone)]
pub struct ServiceSnapshot {
    /// Unique service name.
    pub name: String,
    /// Current lifecycle status.
    pub status: ServiceStatus,
    /// Last observed health.
    pub health: ServiceHealth,
    /// Message of the most recent error, if any.
    pub last_error: Option<String>,
    /// Consecutive unhealthy health-loop ticks.
    pub consecutive_failures: u32,
}
