//! # ServiceOrchestrator: registry, ordered startup/shutdown, health loop.
//!
//! The orchestrator owns the set of registered services and their dependency
//! graph, and coordinates lifecycle operations across them:
//!
//! - **Registry**: services are registered by name; names are unique per
//!   orchestrator instance. Dependency edges go through the
//!   [`DependencyResolver`], so the graph stays acyclic by construction.
//! - **Startup**: [`start_service`](ServiceOrchestrator::start_service)
//!   walks the transitive dependency closure in topological order;
//!   [`start_all`](ServiceOrchestrator::start_all) launches one task per
//!   service, bounded by `max_concurrent_starts`, where each task waits at
//!   an explicit gate until every direct dependency reports `Running`
//!   before its own start begins. Launch order alone is not enough: a slow
//!   dependency must hold its dependents back.
//! - **Shutdown**: reverse topological order, best-effort; a service that
//!   fails or times out on stop is forced to `Error` and the batch proceeds.
//! - **Health loop**: a background ticker probes every active service under
//!   a per-call deadline. With auto-recovery enabled, a service unhealthy
//!   beyond the failure threshold gets exactly one stop-then-start cycle
//!   before being left `Failed`.
//!
//! Registry and graph mutation happen only under the orchestrator lock.
//! Lifecycle calls into hooks always run on a snapshot of handles so the
//! lock is never held across a slow hook.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::{Mutex, RwLock as AsyncRwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::events::{Event, EventBus, EventPriority};
use crate::graph::DependencyResolver;
use crate::service::{
    HealthReport, ServiceHandle, ServiceHealth, ServiceRef, ServiceSnapshot, ServiceStatus,
};

/// Orchestrator lifecycle phase, mirroring the service contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Created,
    Initialized,
    Running,
    Stopping,
    Stopped,
}

impl Phase {
    fn as_label(self) -> &'static str {
        match self {
            Phase::Created => "created",
            Phase::Initialized => "initialized",
            Phase::Running => "running",
            Phase::Stopping => "stopping",
            Phase::Stopped => "stopped",
        }
    }
}

/// Registry guarded by the orchestrator lock.
struct Registry {
    handles: HashMap<String, Arc<ServiceHandle>>,
    resolver: DependencyResolver,
}

struct OrchestratorInner {
    cfg: OrchestratorConfig,
    phase: RwLock<Phase>,
    registry: AsyncRwLock<Registry>,
    bus: Option<EventBus>,
    cancel: CancellationToken,
    health_task: Mutex<Option<JoinHandle<()>>>,
    // serializes start_all / shutdown against each other
    lifecycle: Mutex<()>,
}

/// Coordinates registration, dependency-ordered startup/shutdown, and
/// periodic health monitoring for a set of [`Service`](crate::Service)s.
///
/// Cheap to clone; clones share the same registry and health loop.
///
/// # Example
/// ```no_run
/// use servisor::{FnService, OrchestratorConfig, ServiceOrchestrator};
///
/// # async fn demo() -> Result<(), servisor::OrchestratorError> {
/// let orch = ServiceOrchestrator::new(OrchestratorConfig::default());
///
/// orch.register(FnService::builder("db").build()).await?;
/// orch.register(FnService::builder("api").build()).await?;
/// orch.add_dependency("api", "db").await?;
///
/// orch.start_all().await?; // db starts before api
/// orch.shutdown().await?;  // api stops before db
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ServiceOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl ServiceOrchestrator {
    /// Creates an orchestrator with no event bus attached.
    pub fn new(cfg: OrchestratorConfig) -> Self {
        Self::build(cfg, None)
    }

    /// Creates an orchestrator that announces lifecycle and health
    /// transitions on the given bus.
    pub fn with_bus(cfg: OrchestratorConfig, bus: EventBus) -> Self {
        Self::build(cfg, Some(bus))
    }

    fn build(cfg: OrchestratorConfig, bus: Option<EventBus>) -> Self {
        Self {
            inner: Arc::new(OrchestratorInner {
                cfg,
                phase: RwLock::new(Phase::Created),
                registry: AsyncRwLock::new(Registry {
                    handles: HashMap::new(),
                    resolver: DependencyResolver::new(),
                }),
                bus,
                cancel: CancellationToken::new(),
                health_task: Mutex::new(None),
                lifecycle: Mutex::new(()),
            }),
        }
    }

    /// Moves `Created → Initialized` and spawns the health loop (when an
    /// interval is configured).
    ///
    /// No-op when already initialized. Called implicitly by
    /// [`start_service`](Self::start_service) and
    /// [`start_all`](Self::start_all).
    pub async fn initialize(&self) -> Result<(), OrchestratorError> {
        match self.phase() {
            Phase::Created => {
                self.set_phase(Phase::Initialized);
                self.spawn_health_loop().await;
                Ok(())
            }
            Phase::Initialized | Phase::Running => Ok(()),
            phase => Err(OrchestratorError::InvalidState {
                state: phase.as_label(),
                op: "initialize",
            }),
        }
    }

    /// Registers a service under its own name.
    ///
    /// Returns [`OrchestratorError::Duplicate`] when the name is taken.
    pub async fn register(&self, service: ServiceRef) -> Result<(), OrchestratorError> {
        self.ensure_accepting("register")?;
        let mut reg = self.inner.registry.write().await;
        let name = service.name().to_string();
        if reg.handles.contains_key(&name) {
            return Err(OrchestratorError::Duplicate { name });
        }
        reg.resolver.add_node(&name);
        reg.handles.insert(name.clone(), ServiceHandle::new(service));
        debug!(service = %name, "service registered");
        Ok(())
    }

    /// Registers a service and its direct dependencies in one call.
    ///
    /// Every dependency must already be registered; a cycle error leaves the
    /// graph unchanged but the service itself stays registered.
    pub async fn register_with_dependencies(
        &self,
        service: ServiceRef,
        depends_on: &[&str],
    ) -> Result<(), OrchestratorError> {
        let name = service.name().to_string();
        self.register(service).await?;
        for dep in depends_on {
            self.add_dependency(&name, dep).await?;
        }
        Ok(())
    }

    /// Removes a service and its graph node (and all touching edges).
    ///
    /// Returns `false` when the name is unknown. The service is not stopped;
    /// callers stop it first if it is running.
    pub async fn unregister(&self, name: &str) -> bool {
        let mut reg = self.inner.registry.write().await;
        reg.resolver.remove_node(name);
        reg.handles.remove(name).is_some()
    }

    /// Declares that `name` depends on `depends_on`.
    ///
    /// Not-found and cycle errors propagate unchanged from the resolver; on a
    /// cycle the graph is left exactly as it was.
    pub async fn add_dependency(
        &self,
        name: &str,
        depends_on: &str,
    ) -> Result<(), OrchestratorError> {
        let mut reg = self.inner.registry.write().await;
        reg.resolver.add_edge(name, depends_on)
    }

    /// Removes a dependency edge. No-op if the edge is absent.
    pub async fn remove_dependency(&self, name: &str, depends_on: &str) {
        let mut reg = self.inner.registry.write().await;
        reg.resolver.remove_edge(name, depends_on);
    }

    /// Current status of one service.
    pub async fn service_status(&self, name: &str) -> Result<ServiceStatus, OrchestratorError> {
        let reg = self.inner.registry.read().await;
        match reg.handles.get(name) {
            Some(handle) => Ok(handle.status()),
            None => Err(OrchestratorError::NotFound {
                name: name.to_string(),
            }),
        }
    }

    /// Full descriptor snapshot of one service.
    pub async fn service_snapshot(
        &self,
        name: &str,
    ) -> Result<ServiceSnapshot, OrchestratorError> {
        let reg = self.inner.registry.read().await;
        match reg.handles.get(name) {
            Some(handle) => Ok(handle.snapshot()),
            None => Err(OrchestratorError::NotFound {
                name: name.to_string(),
            }),
        }
    }

    /// Snapshots of every registered service, in registration order.
    pub async fn snapshots(&self) -> Vec<ServiceSnapshot> {
        let reg = self.inner.registry.read().await;
        reg.resolver
            .nodes()
            .iter()
            .filter_map(|name| reg.handles.get(name))
            .map(|handle| handle.snapshot())
            .collect()
    }

    /// Number of registered services.
    pub async fn service_count(&self) -> usize {
        self.inner.registry.read().await.handles.len()
    }

    /// Starts one service, first bringing every transitive dependency to
    /// `Running` in topological order.
    ///
    /// A dependency (or the target) that fails its hooks or exceeds the
    /// startup timeout is marked `Failed` and a typed startup error is
    /// returned. Dependencies already started are not rolled back.
    pub async fn start_service(&self, name: &str) -> Result<(), OrchestratorError> {
        self.ensure_accepting("start_service")?;
        self.initialize().await?;
        let order = {
            let reg = self.inner.registry.read().await;
            if !reg.handles.contains_key(name) {
                return Err(OrchestratorError::NotFound {
                    name: name.to_string(),
                });
            }
            let mut subset = reg.resolver.transitive_dependencies(name)?;
            subset.push(name.to_string());
            let refs: Vec<&str> = subset.iter().map(String::as_str).collect();
            let order = reg.resolver.topological_order_of(&refs)?;
            order
                .into_iter()
                .filter_map(|n| reg.handles.get(&n).cloned())
                .collect::<Vec<_>>()
        };

        for handle in order {
            self.start_one(&handle).await?;
        }
        Ok(())
    }

    /// Stops only the named service under the shutdown timeout.
    ///
    /// Does not cascade to dependents; ordered teardown is
    /// [`stop_all`](Self::stop_all). A service that exceeds the timeout is
    /// forced to `Error` so nothing ever deadlocks waiting on it.
    pub async fn stop_service(&self, name: &str) -> Result<(), OrchestratorError> {
        let handle = {
            let reg = self.inner.registry.read().await;
            reg.handles
                .get(name)
                .cloned()
                .ok_or_else(|| OrchestratorError::NotFound {
                    name: name.to_string(),
                })?
        };
        self.stop_one(&handle).await
    }

    /// Starts every registered service in dependency order.
    ///
    /// One task per service, bounded by `max_concurrent_starts`. Each task
    /// waits until all direct dependencies report `Running` before acquiring
    /// a start slot. Best-effort: branches that succeed keep running even if
    /// a sibling branch fails; the first failure is returned.
    pub async fn start_all(&self) -> Result<(), OrchestratorError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.ensure_accepting("start_all")?;
        self.initialize().await?;

        let (order, handles, deps) = {
            let reg = self.inner.registry.read().await;
            let order = reg.resolver.topological_order();
            let handles = reg.handles.clone();
            let deps: HashMap<String, Vec<String>> = order
                .iter()
                .map(|n| (n.clone(), reg.resolver.dependencies_of(n).unwrap_or_default()))
                .collect();
            (order, handles, deps)
        };

        let limit = self.inner.cfg.max_concurrent_starts;
        let semaphore = (limit > 0).then(|| Arc::new(Semaphore::new(limit)));

        let mut tasks: JoinSet<Result<(), OrchestratorError>> = JoinSet::new();
        for name in &order {
            let handle = match handles.get(name) {
                Some(h) => Arc::clone(h),
                None => continue,
            };
            let gates: Vec<(String, Arc<ServiceHandle>)> = deps
                .get(name)
                .into_iter()
                .flatten()
                .filter_map(|dep| handles.get(dep).map(|h| (dep.clone(), Arc::clone(h))))
                .collect();
            let semaphore = semaphore.clone();
            let this = self.clone();
            tasks.spawn(async move {
                for (dep_name, dep) in &gates {
                    if let Err(err) = this.await_running(dep_name, dep).await {
                        let reason = format!("dependency '{dep_name}' did not start: {err}");
                        handle.mark_failed(&reason);
                        this.announce_failure(handle.name(), &reason).await;
                        return Err(OrchestratorError::Startup {
                            name: handle.name().to_string(),
                            reason,
                        });
                    }
                }
                let _permit = match &semaphore {
                    Some(s) => Some(s.clone().acquire_owned().await.map_err(|_| {
                        OrchestratorError::InvalidState {
                            state: "stopping",
                            op: "start_all",
                        }
                    })?),
                    None => None,
                };
                this.start_one(&handle).await
            });
        }

        let mut first_err = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(error = %err, "service failed to start");
                    first_err.get_or_insert(err);
                }
                Err(join_err) => {
                    warn!(error = %join_err, "start task aborted");
                }
            }
        }

        // branches that made it stay running either way
        self.set_phase(Phase::Running);
        match first_err {
            None => {
                info!(services = order.len(), "all services started");
                Ok(())
            }
            Some(err) => Err(err),
        }
    }

    /// Stops every registered service in reverse dependency order.
    ///
    /// Best-effort: failures are logged and the batch proceeds; the first
    /// failure is returned once every service has been attempted.
    pub async fn stop_all(&self) -> Result<(), OrchestratorError> {
        let order = {
            let reg = self.inner.registry.read().await;
            let mut order = reg.resolver.topological_order();
            order.reverse();
            order
                .into_iter()
                .filter_map(|n| reg.handles.get(&n).cloned())
                .collect::<Vec<_>>()
        };

        let mut first_err = None;
        for handle in order {
            if let Err(err) = self.stop_one(&handle).await {
                warn!(service = handle.name(), error = %err, "service failed to stop");
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Probes every active service concurrently under the per-call health
    /// timeout. A hung probe counts as unhealthy and never blocks the
    /// aggregate beyond the deadline.
    pub async fn check_all_health(&self) -> HashMap<String, HealthReport> {
        let handles: Vec<Arc<ServiceHandle>> = {
            let reg = self.inner.registry.read().await;
            reg.handles
                .values()
                .filter(|h| {
                    matches!(
                        h.status(),
                        ServiceStatus::Running | ServiceStatus::Paused | ServiceStatus::Error
                    )
                })
                .cloned()
                .collect()
        };

        let deadline = self.inner.cfg.health_check_timeout;
        let mut probes: JoinSet<(String, HealthReport)> = JoinSet::new();
        for handle in handles {
            probes.spawn(async move {
                let name = handle.name().to_string();
                let report = match timeout(deadline, handle.health_check()).await {
                    Ok(Ok(report)) => report,
                    Ok(Err(err)) => HealthReport::unhealthy(err.to_string()),
                    Err(_) => {
                        let reason = format!("health check timed out after {deadline:?}");
                        handle.note_unhealthy(&reason);
                        HealthReport::unhealthy(reason)
                    }
                };
                (name, report)
            });
        }

        let mut results = HashMap::new();
        while let Some(joined) = probes.join_next().await {
            if let Ok((name, report)) = joined {
                results.insert(name, report);
            }
        }
        results
    }

    /// Stops the health loop, stops all services, and clears the registry.
    /// Idempotent; safe to call while a start batch is in flight.
    pub async fn shutdown(&self) -> Result<(), OrchestratorError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.phase() == Phase::Stopped {
            return Ok(());
        }
        self.set_phase(Phase::Stopping);
        self.inner.cancel.cancel();
        if let Some(task) = self.inner.health_task.lock().await.take() {
            let _ = task.await;
        }

        let result = self.stop_all().await;

        {
            let mut reg = self.inner.registry.write().await;
            reg.handles.clear();
            reg.resolver = DependencyResolver::new();
        }
        self.set_phase(Phase::Stopped);
        info!("orchestrator stopped");
        result
    }

    // ---- internals ------------------------------------------------------

    /// Drives one handle to `Running` under the startup timeout, announcing
    /// the outcome on the bus.
    async fn start_one(&self, handle: &Arc<ServiceHandle>) -> Result<(), OrchestratorError> {
        if matches!(
            handle.status(),
            ServiceStatus::Running | ServiceStatus::Paused
        ) {
            return Ok(());
        }
        let name = handle.name().to_string();
        let startup = async {
            handle.initialize().await?;
            handle.start().await
        };
        match timeout(self.inner.cfg.startup_timeout, startup).await {
            Ok(Ok(())) => {
                debug!(service = %name, "service started");
                self.announce(&name, "service.started", EventPriority::Normal)
                    .await;
                Ok(())
            }
            Ok(Err(err)) => {
                let reason = err.to_string();
                handle.mark_failed(&reason);
                self.announce_failure(&name, &reason).await;
                Err(OrchestratorError::Startup { name, reason })
            }
            Err(_) => {
                let deadline = self.inner.cfg.startup_timeout;
                handle.mark_failed(format!("startup timed out after {deadline:?}"));
                self.announce_failure(&name, "startup timed out").await;
                Err(OrchestratorError::Timeout {
                    name,
                    op: "start",
                    timeout: deadline,
                })
            }
        }
    }

    /// Stops one handle under the shutdown timeout; on timeout the service
    /// is forced to `Error` so nothing waits on it again.
    async fn stop_one(&self, handle: &Arc<ServiceHandle>) -> Result<(), OrchestratorError> {
        let name = handle.name().to_string();
        match timeout(self.inner.cfg.shutdown_timeout, handle.stop()).await {
            Ok(Ok(())) => {
                debug!(service = %name, "service stopped");
                self.announce(&name, "service.stopped", EventPriority::Normal)
                    .await;
                Ok(())
            }
            Ok(Err(err)) => Err(OrchestratorError::Shutdown {
                name,
                reason: err.to_string(),
            }),
            Err(_) => {
                let deadline = self.inner.cfg.shutdown_timeout;
                handle.mark_error(format!("stop timed out after {deadline:?}"));
                Err(OrchestratorError::Timeout {
                    name,
                    op: "stop",
                    timeout: deadline,
                })
            }
        }
    }

    /// Wait gate: blocks until the dependency reports `Running`, or fails
    /// fast when it lands in `Error`/`Failed`.
    ///
    /// A terminal status left over from an earlier batch is not judged:
    /// the gate waits for the dependency's fresh attempt in this batch to
    /// move the status before failing fast.
    async fn await_running(
        &self,
        dep_name: &str,
        dep: &Arc<ServiceHandle>,
    ) -> Result<(), OrchestratorError> {
        let mut rx = dep.subscribe_status();
        let mut attempt_seen = false;
        let gate = async {
            loop {
                match *rx.borrow_and_update() {
                    ServiceStatus::Running => return Ok(()),
                    ServiceStatus::Error | ServiceStatus::Failed if attempt_seen => {
                        return Err(OrchestratorError::Startup {
                            name: dep_name.to_string(),
                            reason: "failed before reaching running".to_string(),
                        });
                    }
                    ServiceStatus::Error | ServiceStatus::Failed => {}
                    _ => attempt_seen = true,
                }
                if rx.changed().await.is_err() {
                    return Err(OrchestratorError::Startup {
                        name: dep_name.to_string(),
                        reason: "handle dropped".to_string(),
                    });
                }
            }
        };
        match timeout(self.inner.cfg.startup_timeout, gate).await {
            Ok(result) => result,
            Err(_) => Err(OrchestratorError::Timeout {
                name: dep_name.to_string(),
                op: "dependency_wait",
                timeout: self.inner.cfg.startup_timeout,
            }),
        }
    }

    /// Spawns the health loop once, if an interval is configured.
    async fn spawn_health_loop(&self) {
        if self.inner.cfg.health_check_interval.is_zero() {
            return;
        }
        let mut slot = self.inner.health_task.lock().await;
        if slot.is_some() {
            return;
        }
        let this = self.clone();
        *slot = Some(tokio::spawn(async move {
            this.health_loop().await;
        }));
    }

    async fn health_loop(&self) {
        let mut ticker = interval(self.inner.cfg.health_check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // first tick fires immediately
        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                _ = ticker.tick() => self.health_tick().await,
            }
        }
    }

    /// One health-loop tick: probe everything, then apply auto-recovery.
    async fn health_tick(&self) {
        let before: HashMap<String, ServiceHealth> = {
            let reg = self.inner.registry.read().await;
            reg.handles
                .iter()
                .map(|(name, h)| (name.clone(), h.health()))
                .collect()
        };

        let reports = self.check_all_health().await;
        for (name, report) in &reports {
            if !report.healthy {
                debug!(
                    service = %name,
                    health = report.health.as_label(),
                    "unhealthy tick"
                );
            }
            if before.get(name).copied() != Some(report.health) {
                self.announce_health_change(name, report.health).await;
            }
        }
        if !self.inner.cfg.enable_auto_recovery {
            return;
        }

        let candidates: Vec<Arc<ServiceHandle>> = {
            let reg = self.inner.registry.read().await;
            reg.handles
                .values()
                .filter(|h| {
                    h.health() == ServiceHealth::Unhealthy
                        && h.consecutive_failures() > self.inner.cfg.failure_threshold
                        && h.status() != ServiceStatus::Failed
                })
                .cloned()
                .collect()
        };

        for handle in candidates {
            let name = handle.name().to_string();
            if handle.recovery_attempted() {
                handle.mark_failed("still unhealthy after recovery attempt");
                self.announce_failure(&name, "still unhealthy after recovery attempt")
                    .await;
                continue;
            }
            handle.set_recovery_attempted();
            info!(service = %name, "attempting recovery (stop then start)");
            if let Err(err) = self.stop_one(&handle).await {
                warn!(service = %name, error = %err, "recovery stop failed");
            }
            match self.start_one(&handle).await {
                Ok(()) => {
                    self.announce(&name, "service.recovered", EventPriority::Medium)
                        .await;
                }
                Err(err) => {
                    warn!(service = %name, error = %err, "recovery start failed");
                }
            }
        }
    }

    async fn announce(&self, service: &str, event_type: &str, priority: EventPriority) {
        let Some(bus) = &self.inner.bus else {
            return;
        };
        if !bus.is_running() {
            return;
        }
        let event = Event::new(event_type.to_string(), service.to_string())
            .with_priority(priority);
        if let Err(err) = bus.emit(event).await {
            debug!(event_type, error = %err, "lifecycle announcement dropped");
        }
    }

    async fn announce_health_change(&self, service: &str, health: ServiceHealth) {
        let priority = match health {
            ServiceHealth::Unhealthy => EventPriority::High,
            ServiceHealth::Degraded => EventPriority::Medium,
            _ => EventPriority::Normal,
        };
        let Some(bus) = &self.inner.bus else {
            return;
        };
        if !bus.is_running() {
            return;
        }
        let event = Event::new("service.health.changed", service.to_string())
            .with_priority(priority)
            .with_field("health", health.as_label());
        if let Err(err) = bus.emit(event).await {
            debug!(error = %err, "health announcement dropped");
        }
    }

    async fn announce_failure(&self, service: &str, reason: &str) {
        let Some(bus) = &self.inner.bus else {
            return;
        };
        if !bus.is_running() {
            return;
        }
        let event = Event::new("service.failed", service.to_string())
            .with_priority(EventPriority::High)
            .with_field("reason", reason);
        if let Err(err) = bus.emit(event).await {
            debug!(error = %err, "failure announcement dropped");
        }
    }

    fn ensure_accepting(&self, op: &'static str) -> Result<(), OrchestratorError> {
        match self.phase() {
            Phase::Stopping | Phase::Stopped => Err(OrchestratorError::InvalidState {
                state: self.phase().as_label(),
                op,
            }),
            _ => Ok(()),
        }
    }

    fn phase(&self) -> Phase {
        *self.inner.phase.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, phase: Phase) {
        *self.inner.phase.write().unwrap_or_else(|e| e.into_inner()) = phase;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusConfig;
    use crate::error::ServiceError;
    use crate::events::{DeliveryMode, HandlerFn};
    use crate::service::FnService;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig {
            startup_timeout: Duration::from_secs(2),
            shutdown_timeout: Duration::from_secs(2),
            health_check_interval: Duration::ZERO,
            health_check_timeout: Duration::from_millis(200),
            max_concurrent_starts: 4,
            enable_auto_recovery: false,
            failure_threshold: 3,
        }
    }

    fn recording(name: &'static str, log: Arc<StdMutex<Vec<String>>>) -> ServiceRef {
        let start_log = Arc::clone(&log);
        let stop_log = log;
        FnService::builder(name)
            .on_start(move || {
                let log = Arc::clone(&start_log);
                async move {
                    log.lock().unwrap().push(format!("start:{name}"));
                    Ok(())
                }
            })
            .on_stop(move || {
                let log = Arc::clone(&stop_log);
                async move {
                    log.lock().unwrap().push(format!("stop:{name}"));
                    Ok(())
                }
            })
            .build()
    }

    #[tokio::test]
    async fn register_rejects_duplicates() {
        let orch = ServiceOrchestrator::new(fast_config());
        orch.register(FnService::builder("a").build()).await.unwrap();
        let err = orch.register(FnService::builder("a").build()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Duplicate { .. }));
        assert_eq!(orch.service_count().await, 1);
    }

    #[tokio::test]
    async fn unregister_returns_whether_present() {
        let orch = ServiceOrchestrator::new(fast_config());
        orch.register(FnService::builder("a").build()).await.unwrap();
        assert!(orch.unregister("a").await);
        assert!(!orch.unregister("a").await);
        assert!(matches!(
            orch.service_status("a").await,
            Err(OrchestratorError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn add_dependency_propagates_graph_errors() {
        let orch = ServiceOrchestrator::new(fast_config());
        orch.register(FnService::builder("a").build()).await.unwrap();
        orch.register(FnService::builder("b").build()).await.unwrap();

        assert!(matches!(
            orch.add_dependency("a", "ghost").await,
            Err(OrchestratorError::NotFound { .. })
        ));

        orch.add_dependency("a", "b").await.unwrap();
        assert!(matches!(
            orch.add_dependency("b", "a").await,
            Err(OrchestratorError::Cycle { .. })
        ));
    }

    #[tokio::test]
    async fn start_service_starts_transitive_deps_first() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let orch = ServiceOrchestrator::new(fast_config());
        orch.register(recording("a", Arc::clone(&log))).await.unwrap();
        orch.register(recording("b", Arc::clone(&log))).await.unwrap();
        orch.register(recording("c", Arc::clone(&log))).await.unwrap();
        orch.add_dependency("a", "b").await.unwrap();
        orch.add_dependency("b", "c").await.unwrap();

        orch.start_service("a").await.unwrap();

        assert_eq!(
            log.lock().unwrap().as_slice(),
            &["start:c", "start:b", "start:a"]
        );
        for name in ["a", "b", "c"] {
            assert_eq!(
                orch.service_status(name).await.unwrap(),
                ServiceStatus::Running
            );
        }
    }

    #[tokio::test]
    async fn start_all_honors_dependency_order() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let orch = ServiceOrchestrator::new(fast_config());
        orch.register(recording("a", Arc::clone(&log))).await.unwrap();
        orch.register(recording("b", Arc::clone(&log))).await.unwrap();
        orch.register(recording("c", Arc::clone(&log))).await.unwrap();
        orch.add_dependency("a", "b").await.unwrap();
        orch.add_dependency("b", "c").await.unwrap();

        orch.start_all().await.unwrap();

        // linear chain: start order is fully determined
        assert_eq!(
            log.lock().unwrap().as_slice(),
            &["start:c", "start:b", "start:a"]
        );
        assert_eq!(
            orch.service_status("a").await.unwrap(),
            ServiceStatus::Running
        );
    }

    #[tokio::test]
    async fn dependent_waits_for_slow_dependency() {
        // the dependency sleeps in on_start; the dependent's hook asserts it
        // only runs after the dependency's hook completed
        let dep_done = Arc::new(AtomicU32::new(0));
        let dep_done2 = Arc::clone(&dep_done);
        let observed = Arc::new(AtomicU32::new(u32::MAX));
        let observed2 = Arc::clone(&observed);

        let slow = FnService::builder("slow")
            .on_start(move || {
                let done = Arc::clone(&dep_done2);
                async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    done.store(1, AtomicOrdering::SeqCst);
                    Ok(())
                }
            })
            .build();
        let dependent = FnService::builder("dependent")
            .on_start(move || {
                let done = Arc::clone(&dep_done);
                let observed = Arc::clone(&observed2);
                async move {
                    observed.store(done.load(AtomicOrdering::SeqCst), AtomicOrdering::SeqCst);
                    Ok(())
                }
            })
            .build();

        let orch = ServiceOrchestrator::new(fast_config());
        orch.register(slow).await.unwrap();
        orch.register(dependent).await.unwrap();
        orch.add_dependency("dependent", "slow").await.unwrap();

        orch.start_all().await.unwrap();
        assert_eq!(observed.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_start_hook_marks_failed_and_allows_fresh_attempt() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts2 = Arc::clone(&attempts);
        let flaky = FnService::builder("flaky")
            .on_start(move || {
                let attempts = Arc::clone(&attempts2);
                async move {
                    if attempts.fetch_add(1, AtomicOrdering::SeqCst) == 0 {
                        Err(ServiceError::hook("cold cache"))
                    } else {
                        Ok(())
                    }
                }
            })
            .build();

        let orch = ServiceOrchestrator::new(fast_config());
        orch.register(flaky).await.unwrap();

        let err = orch.start_service("flaky").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Startup { .. }));
        assert_eq!(
            orch.service_status("flaky").await.unwrap(),
            ServiceStatus::Failed
        );

        orch.start_service("flaky").await.unwrap();
        assert_eq!(
            orch.service_status("flaky").await.unwrap(),
            ServiceStatus::Running
        );
    }

    #[tokio::test]
    async fn start_all_is_best_effort_across_branches() {
        let orch = ServiceOrchestrator::new(fast_config());
        orch.register(FnService::builder("good").build()).await.unwrap();
        orch.register(
            FnService::builder("bad")
                .on_start(|| async { Err(ServiceError::hook("broken")) })
                .build(),
        )
        .await
        .unwrap();

        let err = orch.start_all().await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Startup { .. } | OrchestratorError::Timeout { .. }
        ));
        assert_eq!(
            orch.service_status("good").await.unwrap(),
            ServiceStatus::Running
        );
        assert_eq!(
            orch.service_status("bad").await.unwrap(),
            ServiceStatus::Failed
        );
    }

    #[tokio::test]
    async fn failed_dependency_fails_its_dependents() {
        let orch = ServiceOrchestrator::new(fast_config());
        orch.register(
            FnService::builder("base")
                .on_start(|| async { Err(ServiceError::hook("no disk")) })
                .build(),
        )
        .await
        .unwrap();
        orch.register(FnService::builder("top").build()).await.unwrap();
        orch.add_dependency("top", "base").await.unwrap();

        assert!(orch.start_all().await.is_err());
        assert_eq!(
            orch.service_status("base").await.unwrap(),
            ServiceStatus::Failed
        );
        assert_eq!(
            orch.service_status("top").await.unwrap(),
            ServiceStatus::Failed
        );
    }

    #[tokio::test]
    async fn start_all_recovers_after_failed_batch() {
        init_tracing();
        // first batch fails at the base of the chain; the second batch must
        // see the dependency reach Running even though no status receiver
        // was alive when the transition happened
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts2 = Arc::clone(&attempts);
        let base = FnService::builder("base")
            .on_start(move || {
                let attempts = Arc::clone(&attempts2);
                async move {
                    if attempts.fetch_add(1, AtomicOrdering::SeqCst) == 0 {
                        Err(ServiceError::hook("cold cache"))
                    } else {
                        Ok(())
                    }
                }
            })
            .build();

        let orch = ServiceOrchestrator::new(fast_config());
        orch.register(base).await.unwrap();
        orch.register(FnService::builder("top").build()).await.unwrap();
        orch.add_dependency("top", "base").await.unwrap();

        assert!(orch.start_all().await.is_err());

        orch.start_all().await.unwrap();
        assert_eq!(
            orch.service_status("base").await.unwrap(),
            ServiceStatus::Running
        );
        assert_eq!(
            orch.service_status("top").await.unwrap(),
            ServiceStatus::Running
        );
    }

    #[tokio::test]
    async fn concurrent_starts_respect_the_bound() {
        let in_flight = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));

        let mut cfg = fast_config();
        cfg.max_concurrent_starts = 1;
        let orch = ServiceOrchestrator::new(cfg);

        for name in ["s1", "s2", "s3"] {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            let svc = FnService::builder(name)
                .on_start(move || {
                    let in_flight = Arc::clone(&in_flight);
                    let peak = Arc::clone(&peak);
                    async move {
                        let now = in_flight.fetch_add(1, AtomicOrdering::SeqCst) + 1;
                        peak.fetch_max(now, AtomicOrdering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        in_flight.fetch_sub(1, AtomicOrdering::SeqCst);
                        Ok(())
                    }
                })
                .build();
            orch.register(svc).await.unwrap();
        }

        orch.start_all().await.unwrap();
        assert_eq!(peak.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_timeout_forces_error_state() {
        let mut cfg = fast_config();
        cfg.shutdown_timeout = Duration::from_millis(50);
        let orch = ServiceOrchestrator::new(cfg);
        orch.register(
            FnService::builder("stuck")
                .on_stop(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                })
                .build(),
        )
        .await
        .unwrap();

        orch.start_service("stuck").await.unwrap();
        let err = orch.stop_service("stuck").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Timeout { op: "stop", .. }));
        assert_eq!(
            orch.service_status("stuck").await.unwrap(),
            ServiceStatus::Error
        );
    }

    #[tokio::test]
    async fn stop_all_runs_in_reverse_dependency_order() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let orch = ServiceOrchestrator::new(fast_config());
        orch.register(recording("a", Arc::clone(&log))).await.unwrap();
        orch.register(recording("b", Arc::clone(&log))).await.unwrap();
        orch.add_dependency("a", "b").await.unwrap();

        orch.start_all().await.unwrap();
        log.lock().unwrap().clear();
        orch.stop_all().await.unwrap();

        assert_eq!(log.lock().unwrap().as_slice(), &["stop:a", "stop:b"]);
    }

    #[tokio::test]
    async fn hung_health_check_counts_as_unhealthy() {
        let orch = ServiceOrchestrator::new(fast_config());
        orch.register(
            FnService::builder("hung")
                .on_health_check(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(HealthReport::healthy())
                })
                .build(),
        )
        .await
        .unwrap();
        orch.start_service("hung").await.unwrap();

        let reports = orch.check_all_health().await;
        assert!(!reports["hung"].healthy);
        let snap = orch.service_snapshot("hung").await.unwrap();
        assert_eq!(snap.health, ServiceHealth::Unhealthy);
        assert_eq!(snap.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn health_loop_recovers_an_unhealthy_service_once() {
        init_tracing();
        let starts = Arc::new(AtomicU32::new(0));
        let starts2 = Arc::clone(&starts);
        let starts3 = Arc::clone(&starts);
        let svc = FnService::builder("wobbly")
            .on_start(move || {
                let starts = Arc::clone(&starts2);
                async move {
                    starts.fetch_add(1, AtomicOrdering::SeqCst);
                    Ok(())
                }
            })
            .on_health_check(move || {
                let starts = Arc::clone(&starts3);
                async move {
                    // unhealthy until the recovery restart happened
                    if starts.load(AtomicOrdering::SeqCst) >= 2 {
                        Ok(HealthReport::healthy())
                    } else {
                        Ok(HealthReport::unhealthy("stale connection"))
                    }
                }
            })
            .build();

        let mut cfg = fast_config();
        cfg.health_check_interval = Duration::from_millis(30);
        cfg.enable_auto_recovery = true;
        cfg.failure_threshold = 1;
        let orch = ServiceOrchestrator::new(cfg);
        orch.register(svc).await.unwrap();
        orch.start_all().await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        loop {
            let snap = orch.service_snapshot("wobbly").await.unwrap();
            if snap.status == ServiceStatus::Running && snap.health == ServiceHealth::Healthy {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "recovery never completed: {snap:?}"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(starts.load(AtomicOrdering::SeqCst), 2);
        orch.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn persistently_unhealthy_service_ends_failed() {
        let svc = FnService::builder("doomed")
            .on_health_check(|| async { Ok(HealthReport::unhealthy("always down")) })
            .build();

        let mut cfg = fast_config();
        cfg.health_check_interval = Duration::from_millis(30);
        cfg.enable_auto_recovery = true;
        cfg.failure_threshold = 1;
        let orch = ServiceOrchestrator::new(cfg);
        orch.register(svc).await.unwrap();
        orch.start_all().await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        loop {
            if orch.service_status("doomed").await.unwrap() == ServiceStatus::Failed {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "service never marked failed"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        orch.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_clears_state() {
        let orch = ServiceOrchestrator::new(fast_config());
        orch.register(FnService::builder("a").build()).await.unwrap();
        orch.start_all().await.unwrap();

        orch.shutdown().await.unwrap();
        orch.shutdown().await.unwrap();
        assert_eq!(orch.service_count().await, 0);

        let err = orch
            .register(FnService::builder("late").build())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn lifecycle_events_are_announced_on_the_bus() {
        let bus = EventBus::new(BusConfig::default());
        bus.start();

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        bus.subscribe(
            "audit",
            &["service.started", "service.stopped"],
            DeliveryMode::Sync,
            EventPriority::Normal,
            HandlerFn::arc("audit", move |event: Event| {
                let seen = Arc::clone(&seen2);
                async move {
                    seen.lock().unwrap().push(event.event_type.to_string());
                    Ok(())
                }
            }),
        )
        .unwrap();

        let orch = ServiceOrchestrator::with_bus(fast_config(), bus.clone());
        orch.register(FnService::builder("a").build()).await.unwrap();
        orch.start_all().await.unwrap();
        orch.shutdown().await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &["service.started", "service.stopped"]);
        drop(seen);
        bus.stop().await;
    }

    #[tokio::test]
    async fn random_dags_never_run_a_service_before_its_deps() {
        use rand::Rng;

        for _ in 0..10 {
            let mut rng = rand::rng();
            let n = rng.random_range(3..8usize);
            let names: Vec<String> = (0..n).map(|i| format!("svc{i}")).collect();

            let running_order: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));
            let orch = ServiceOrchestrator::new(fast_config());
            for name in &names {
                let order = Arc::clone(&running_order);
                let tag = name.clone();
                let svc = FnService::builder(tag.clone())
                    .on_start(move || {
                        let order = Arc::clone(&order);
                        let tag = tag.clone();
                        async move {
                            order.lock().unwrap().push(tag);
                            Ok(())
                        }
                    })
                    .build();
                orch.register(svc).await.unwrap();
            }

            // edges only from higher to lower index keep the graph acyclic
            let mut edges = Vec::new();
            for i in 1..n {
                for j in 0..i {
                    if rng.random_range(0..3) == 0 {
                        orch.add_dependency(&names[i], &names[j]).await.unwrap();
                        edges.push((i, j));
                    }
                }
            }

            orch.start_all().await.unwrap();

            let order = running_order.lock().unwrap();
            let position: HashMap<&str, usize> = order
                .iter()
                .enumerate()
                .map(|(pos, name)| (name.as_str(), pos))
                .collect();
            for (i, j) in edges {
                assert!(
                    position[names[j].as_str()] < position[names[i].as_str()],
                    "{} started before its dependency {}",
                    names[i],
                    names[j]
                );
            }
        }
    }
}
