//! # Runtime configuration.
//!
//! [`OrchestratorConfig`] defines the orchestrator's behavior: startup and
//! shutdown deadlines, health-loop cadence, concurrency limits, and
//! auto-recovery. [`BusConfig`] defines the event bus behavior: queue bounds,
//! delivery timeout, retry policy, and overflow handling.
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use servisor::{OrchestratorConfig, BusConfig, OverflowPolicy};
//!
//! let mut cfg = OrchestratorConfig::default();
//! cfg.startup_timeout = Duration::from_secs(10);
//! cfg.max_concurrent_starts = 2;
//!
//! let mut bus = BusConfig::default();
//! bus.max_queue_size = 1;
//! bus.overflow = OverflowPolicy::Reject;
//! ```

use std::time::Duration;

use crate::policies::JitterPolicy;

/// Policy applied when an event is emitted while the ingress queue is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Reject the new event with a `QueueFull` error (default).
    Reject,
    /// Evict the oldest queued event to make room for the new one.
    DropOldest,
}

impl Default for OverflowPolicy {
    /// Returns [`OverflowPolicy::Reject`].
    fn default() -> Self {
        OverflowPolicy::Reject
    }
}

/// Configuration for the [`ServiceOrchestrator`](crate::ServiceOrchestrator).
///
/// Controls lifecycle deadlines, concurrent startup, and the health loop.
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Deadline for one service to complete `initialize` + `start`.
    pub startup_timeout: Duration,
    /// Deadline for one service to complete `stop`.
    pub shutdown_timeout: Duration,
    /// Health-loop tick period (0 = health loop disabled).
    pub health_check_interval: Duration,
    /// Deadline for a single `health_check` call.
    pub health_check_timeout: Duration,
    /// Maximum number of services starting concurrently (0 = unlimited).
    pub max_concurrent_starts: usize,
    /// Whether the health loop attempts a stop-then-start recovery cycle.
    pub enable_auto_recovery: bool,
    /// Consecutive unhealthy ticks tolerated before recovery/failure.
    pub failure_threshold: u32,
}

impl Default for OrchestratorConfig {
    /// Provides a default configuration:
    /// - `startup_timeout = 30s`
    /// - `shutdown_timeout = 30s`
    /// - `health_check_interval = 30s`
    /// - `health_check_timeout = 5s`
    /// - `max_concurrent_starts = 4`
    /// - `enable_auto_recovery = false`
    /// - `failure_threshold = 3`
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            health_check_interval: Duration::from_secs(30),
            health_check_timeout: Duration::from_secs(5),
            max_concurrent_starts: 4,
            enable_auto_recovery: false,
            failure_threshold: 3,
        }
    }
}

/// Configuration for the [`EventBus`](crate::events::EventBus).
///
/// Controls ingress queue bounds, per-delivery deadlines, retry behavior for
/// async deliveries, the bounded event history, and subscription cleanup.
#[derive(Clone, Debug)]
pub struct BusConfig {
    /// Capacity of the ingress queue.
    pub max_queue_size: usize,
    /// Deadline for a single handler invocation.
    pub delivery_timeout: Duration,
    /// Retry attempts for Async/FireAndForget deliveries (0 = no retries).
    pub retry_attempts: u32,
    /// Base delay before the first retry; doubles per attempt.
    pub retry_delay: Duration,
    /// Jitter applied to retry delays.
    pub retry_jitter: JitterPolicy,
    /// What to do when the ingress queue is full.
    pub overflow: OverflowPolicy,
    /// Capacity of the in-memory event history ring (oldest evicted).
    pub history_capacity: usize,
    /// Inactive subscriptions idle longer than this are swept away.
    pub inactive_ttl: Duration,
    /// Period of the idle-subscription sweep inside the dispatch loop.
    pub sweep_interval: Duration,
}

impl Default for BusConfig {
    /// Provides a default configuration:
    /// - `max_queue_size = 1024`
    /// - `delivery_timeout = 5s`
    /// - `retry_attempts = 3`
    /// - `retry_delay = 100ms`
    /// - `retry_jitter = JitterPolicy::None`
    /// - `overflow = OverflowPolicy::Reject`
    /// - `history_capacity = 256`
    /// - `inactive_ttl = 300s`
    /// - `sweep_interval = 60s`
    fn default() -> Self {
        Self {
            max_queue_size: 1024,
            delivery_timeout: Duration::from_secs(5),
            retry_attempts: 3,
            retry_delay: Duration::from_millis(100),
            retry_jitter: JitterPolicy::None,
            overflow: OverflowPolicy::Reject,
            history_capacity: 256,
            inactive_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
        }
    }
}
