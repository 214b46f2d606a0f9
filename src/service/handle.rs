//! # ServiceHandle: the per-service lifecycle state machine.
//!
//! Wraps one [`Service`] with its descriptor state (status, health, last
//! error, failure counter, opaque config map) and drives the transitions:
//!
//! ```text
//! Created ──initialize──► Initializing ──► Ready ──start──► Running
//!                                                            │   ▲
//!                                                      pause ▼   │ resume
//!                                                           Paused
//! any ──stop──► Stopping ──► Stopped          hook failure ──► Error
//! ```
//!
//! ## Rules
//! - All lifecycle operations on one handle are serialized by a private
//!   async lock; concurrent `start`/`stop` never race on the status field.
//! - Status transitions are published through a `watch` channel; the
//!   orchestrator's start wait-gate awaits `Running` there.
//! - Transition callbacks fire synchronously; a panicking callback is
//!   logged and swallowed, never propagated.
//! - `initialize` is re-entrant for terminal states (`Stopped`, `Error`,
//!   `Failed`), so a later start attempt on a failed service is a fresh one.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};

use futures::FutureExt;
use tokio::sync::{watch, Mutex};
use tracing::warn;

use crate::error::ServiceError;
use crate::service::{
    HealthReport, ServiceHealth, ServiceRef, ServiceSnapshot, ServiceStatus,
};

/// Callback fired on every status transition: `(name, from, to)`.
pub type TransitionCallback = Arc<dyn Fn(&str, ServiceStatus, ServiceStatus) + Send + Sync>;

/// Mutable descriptor guarded by the handle's state lock.
#[derive(Debug)]
struct State {
    status: ServiceStatus,
    health: ServiceHealth,
    last_error: Option<String>,
    consecutive_failures: u32,
    recovery_attempted: bool,
    config: HashMap<String, String>,
}

/// One registered service plus its lifecycle state.
pub struct ServiceHandle {
    service: ServiceRef,
    state: RwLock<State>,
    status_tx: watch::Sender<ServiceStatus>,
    op_lock: Mutex<()>,
    callbacks: RwLock<Vec<TransitionCallback>>,
}

impl ServiceHandle {
    /// Wraps a service in a fresh `Created` descriptor.
    pub fn new(service: ServiceRef) -> Arc<Self> {
        let (status_tx, _rx) = watch::channel(ServiceStatus::Created);
        Arc::new(Self {
            service,
            state: RwLock::new(State {
                status: ServiceStatus::Created,
                health: ServiceHealth::Unknown,
                last_error: None,
                consecutive_failures: 0,
                recovery_attempted: false,
                config: HashMap::new(),
            }),
            status_tx,
            op_lock: Mutex::new(()),
            callbacks: RwLock::new(Vec::new()),
        })
    }

    /// Service name (stable, unique within an orchestrator).
    pub fn name(&self) -> &str {
        self.service.name()
    }

    /// Current lifecycle status.
    pub fn status(&self) -> ServiceStatus {
        self.read().status
    }

    /// Last observed health.
    pub fn health(&self) -> ServiceHealth {
        self.read().health
    }

    /// Consecutive unhealthy ticks (reset on a healthy report).
    pub fn consecutive_failures(&self) -> u32 {
        self.read().consecutive_failures
    }

    /// Copies the descriptor without holding the lock across awaits.
    pub fn snapshot(&self) -> ServiceSnapshot {
        let state = self.read();
        ServiceSnapshot {
            name: self.service.name().to_string(),
            status: state.status,
            health: state.health,
            last_error: state.last_error.clone(),
            consecutive_failures: state.consecutive_failures,
        }
    }

    /// Sets one opaque config entry.
    pub fn set_config(&self, key: impl Into<String>, value: impl Into<String>) {
        self.write().config.insert(key.into(), value.into());
    }

    /// Reads one opaque config entry.
    pub fn config_value(&self, key: &str) -> Option<String> {
        self.read().config.get(key).cloned()
    }

    /// Subscribes to status transitions (used by the start wait-gate).
    pub fn subscribe_status(&self) -> watch::Receiver<ServiceStatus> {
        self.status_tx.subscribe()
    }

    /// Registers a synchronous transition callback.
    pub fn on_transition(&self, callback: TransitionCallback) {
        self.write_callbacks().push(callback);
    }

    /// Drives `Created → Initializing → Ready`.
    ///
    /// No-op when the service is already initializing or past `Ready`.
    /// Terminal states (`Stopped`, `Error`, `Failed`) re-initialize, so a
    /// subsequent start is a fresh attempt.
    pub async fn initialize(&self) -> Result<(), ServiceError> {
        let _guard = self.op_lock.lock().await;
        match self.status() {
            ServiceStatus::Created
            | ServiceStatus::Stopped
            | ServiceStatus::Error
            | ServiceStatus::Failed => {}
            _ => return Ok(()),
        }
        self.set_status(ServiceStatus::Initializing);
        match self.run_hook("initialize", self.service.on_initialize()).await {
            Ok(()) => {
                self.set_status(ServiceStatus::Ready);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Drives `Ready → Running`. Any other starting status is rejected with
    /// [`ServiceError::InvalidTransition`].
    pub async fn start(&self) -> Result<(), ServiceError> {
        let _guard = self.op_lock.lock().await;
        let status = self.status();
        if status != ServiceStatus::Ready {
            return Err(ServiceError::InvalidTransition {
                name: self.name().to_string(),
                op: "start",
                from: status,
            });
        }
        match self.run_hook("start", self.service.on_start()).await {
            Ok(()) => {
                self.set_status(ServiceStatus::Running);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Drives `any → Stopping → Stopped`. Idempotent: stopping an already
    /// stopped (or never started) service succeeds without running the hook.
    pub async fn stop(&self) -> Result<(), ServiceError> {
        let _guard = self.op_lock.lock().await;
        match self.status() {
            ServiceStatus::Stopped => return Ok(()),
            ServiceStatus::Created => {
                self.set_status(ServiceStatus::Stopped);
                return Ok(());
            }
            _ => {}
        }
        self.set_status(ServiceStatus::Stopping);
        match self.run_hook("stop", self.service.on_stop()).await {
            Ok(()) => {
                self.set_status(ServiceStatus::Stopped);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Drives `Running → Paused`.
    pub async fn pause(&self) -> Result<(), ServiceError> {
        let _guard = self.op_lock.lock().await;
        let status = self.status();
        if status != ServiceStatus::Running {
            return Err(ServiceError::InvalidTransition {
                name: self.name().to_string(),
                op: "pause",
                from: status,
            });
        }
        self.run_hook("pause", self.service.on_pause()).await?;
        self.set_status(ServiceStatus::Paused);
        Ok(())
    }

    /// Drives `Paused → Running`.
    pub async fn resume(&self) -> Result<(), ServiceError> {
        let _guard = self.op_lock.lock().await;
        let status = self.status();
        if status != ServiceStatus::Paused {
            return Err(ServiceError::InvalidTransition {
                name: self.name().to_string(),
                op: "resume",
                from: status,
            });
        }
        self.run_hook("resume", self.service.on_resume()).await?;
        self.set_status(ServiceStatus::Running);
        Ok(())
    }

    /// Runs the service's health hook and folds the result into the
    /// descriptor (health, failure counter).
    pub async fn health_check(&self) -> Result<HealthReport, ServiceError> {
        let _guard = self.op_lock.lock().await;
        let outcome = AssertUnwindSafe(self.service.on_health_check())
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(report)) => {
                let mut state = self.write();
                state.health = report.health;
                if report.healthy {
                    state.consecutive_failures = 0;
                    state.recovery_attempted = false;
                } else {
                    state.consecutive_failures += 1;
                    state.last_error = report.message.clone();
                }
                Ok(report)
            }
            Ok(Err(err)) => {
                self.record_hook_failure(&err);
                Err(err)
            }
            Err(_) => {
                let err = ServiceError::hook("health_check hook panicked");
                self.record_hook_failure(&err);
                Err(err)
            }
        }
    }

    /// Folds an externally observed failure (e.g. a timed-out health probe)
    /// into the descriptor without changing the lifecycle status.
    pub fn note_unhealthy(&self, reason: impl Into<String>) {
        let mut state = self.write();
        state.health = ServiceHealth::Unhealthy;
        state.last_error = Some(reason.into());
        state.consecutive_failures += 1;
    }

    /// Marks the service `Failed` (startup casualty).
    pub fn mark_failed(&self, reason: impl Into<String>) {
        {
            let mut state = self.write();
            state.health = ServiceHealth::Unhealthy;
            state.last_error = Some(reason.into());
        }
        self.set_status(ServiceStatus::Failed);
    }

    /// Forces the service out of the active set (stop timeout).
    pub fn mark_error(&self, reason: impl Into<String>) {
        {
            let mut state = self.write();
            state.health = ServiceHealth::Unhealthy;
            state.last_error = Some(reason.into());
        }
        self.set_status(ServiceStatus::Error);
    }

    /// True once the health loop has spent its single recovery cycle.
    pub fn recovery_attempted(&self) -> bool {
        self.read().recovery_attempted
    }

    /// Records that the single recovery cycle was spent.
    pub fn set_recovery_attempted(&self) {
        self.write().recovery_attempted = true;
    }

    /// Runs one hook with panic isolation; failures set `Error`/`Unhealthy`
    /// and are re-raised.
    async fn run_hook<F>(&self, op: &'static str, fut: F) -> Result<(), ServiceError>
    where
        F: std::future::Future<Output = Result<(), ServiceError>>,
    {
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                self.record_hook_failure(&err);
                Err(err)
            }
            Err(_) => {
                let err = ServiceError::hook(format!("{op} hook panicked"));
                self.record_hook_failure(&err);
                Err(err)
            }
        }
    }

    fn record_hook_failure(&self, err: &ServiceError) {
        {
            let mut state = self.write();
            state.health = ServiceHealth::Unhealthy;
            state.last_error = Some(err.to_string());
            state.consecutive_failures += 1;
        }
        self.set_status(ServiceStatus::Error);
    }

    /// Applies a status transition, publishes it, and fires callbacks.
    fn set_status(&self, to: ServiceStatus) {
        let from = {
            let mut state = self.write();
            let from = state.status;
            state.status = to;
            from
        };
        if from == to {
            return;
        }
        // send_replace keeps the stored value current even with no live receivers,
        // so late subscribers observe the latest status via borrow_and_update.
        self.status_tx.send_replace(to);

        let callbacks = self.read_callbacks();
        for cb in callbacks.iter() {
            // callback panics are logged, never propagated
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                cb(self.service.name(), from, to)
            }));
            if result.is_err() {
                warn!(
                    service = self.service.name(),
                    from = from.as_label(),
                    to = to.as_label(),
                    "transition callback panicked"
                );
            }
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read_callbacks(&self) -> Vec<TransitionCallback> {
        self.callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn write_callbacks(&self) -> std::sync::RwLockWriteGuard<'_, Vec<TransitionCallback>> {
        self.callbacks.write().unwrap_or_else(|e| e.into_inner())
    }
}
