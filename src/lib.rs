//! # servisor
//!
//! **Servisor** is an in-process service lifecycle and coordination runtime
//! for Rust.
//!
//! It provides primitives to register long-lived services, declare the
//! dependencies between them, start and stop them in dependency order, and
//! monitor their health. Loosely-coupled communication between services goes
//! through a priority-aware event bus. The crate is designed as a building
//! block for higher-level facades (HTTP servers, CLIs, daemons).
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │   Service    │   │   Service    │   │   Service    │
//!     │  (database)  │   │   (cache)    │   │    (api)     │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  ServiceOrchestrator                                              │
//! │  - Registry (ServiceHandle per registered service)                │
//! │  - DependencyResolver (acyclic graph, topological order)          │
//! │  - health loop (periodic probes, optional auto-recovery)          │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │ServiceHandle │   │ServiceHandle │   │ServiceHandle │
//!     │(state machine│   │ status/health│   │ op lock +    │
//!     │ + watch gate)│   │ snapshot     │   │ callbacks    │
//!     └──────────────┘   └──────────────┘   └──────────────┘
//!
//!                  lifecycle / health announcements
//!                               ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  EventBus (bounded ingress queue + single dispatch loop)          │
//! │  - priority-ordered fan-out per event                             │
//! │  - Sync / Async / FireAndForget delivery modes                    │
//! │  - retry with backoff for async deliveries, metrics, history      │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ### Service lifecycle
//! ```text
//! Created ──initialize──► Initializing ──► Ready ──start──► Running
//!                                                            │   ▲
//!                                                      pause ▼   │ resume
//!                                                           Paused
//! any ──stop──► Stopping ──► Stopped        hook failure ──► Error
//! startup timeout / exhausted recovery ──► Failed
//! ```
//!
//! Startup order is enforced by an explicit wait gate, not just launch
//! order: a service's `start` begins only after every direct dependency
//! reports `Running`, even when dependency startup is slow or retried.
//!
//! ## Features
//! | Area              | Description                                                          | Key types / traits                          |
//! |-------------------|----------------------------------------------------------------------|---------------------------------------------|
//! | **Service API**   | Lifecycle hooks + health probe implemented by every managed unit.    | [`Service`], [`FnService`]                  |
//! | **Orchestration** | Registration, dependency-ordered start/stop, health loop.            | [`ServiceOrchestrator`]                     |
//! | **Dependencies**  | Acyclic graph with deterministic topological order.                  | [`DependencyResolver`]                      |
//! | **Events**        | Priority-aware pub/sub with typed handlers and delivery modes.       | [`EventBus`], [`Event`], [`EventHandler`]   |
//! | **Policies**      | Backoff/jitter for async delivery retries.                           | [`BackoffPolicy`], [`JitterPolicy`]         |
//! | **Errors**        | Typed errors for orchestration, bus, and service hooks.              | [`OrchestratorError`], [`BusError`]         |
//! | **Configuration** | Construction-time knobs for the orchestrator and the bus.            | [`OrchestratorConfig`], [`BusConfig`]       |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`EventLogger`] subscriber that
//!   maps event priorities onto `tracing` levels _(demo/reference only)_.
//!
//! ## Example
//! ```rust
//! use servisor::{
//!     BusConfig, EventBus, FnService, OrchestratorConfig, ServiceOrchestrator,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus = EventBus::new(BusConfig::default());
//!     bus.start();
//!
//!     let orch = ServiceOrchestrator::with_bus(OrchestratorConfig::default(), bus.clone());
//!
//!     // Define services from closures (or implement `Service` directly)
//!     let db = FnService::builder("database")
//!         .on_start(|| async {
//!             println!("database up");
//!             Ok(())
//!         })
//!         .build();
//!     let api = FnService::builder("api")
//!         .on_start(|| async {
//!             println!("api up");
//!             Ok(())
//!         })
//!         .build();
//!
//!     orch.register(db).await?;
//!     orch.register(api).await?;
//!     orch.add_dependency("api", "database").await?;
//!
//!     orch.start_all().await?; // database starts before api
//!     orch.shutdown().await?;  // api stops before database
//!     bus.stop().await;
//!     Ok(())
//! }
//! ```
mod config;
mod core;
mod error;
mod events;
mod graph;
mod policies;
mod service;

// ---- Public re-exports ----

pub use config::{BusConfig, OrchestratorConfig, OverflowPolicy};
pub use core::ServiceOrchestrator;
pub use error::{BusError, HandlerError, OrchestratorError, ServiceError};
pub use events::{
    DeliveryMode, Event, EventBus, EventFilter, EventHandler, EventPriority, HandlerFn,
    HandlerRef, MetricsSnapshot, SubscriptionId,
};
pub use graph::DependencyResolver;
pub use policies::{BackoffPolicy, JitterPolicy};
pub use service::{
    FnService, FnServiceBuilder, HealthReport, Service, ServiceHandle, ServiceHealth,
    ServiceRef, ServiceSnapshot, ServiceStatus, TransitionCallback,
};

// Optional: expose a simple built-in event logger (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use events::EventLogger;
