//! # Orchestration core.
//!
//! [`ServiceOrchestrator`] ties the pieces together: the service registry,
//! the dependency graph, coordinated start/stop, and the health loop.

mod orchestrator;

pub use orchestrator::ServiceOrchestrator;
