//! Dependency graph over service-name nodes.
//!
//! [`DependencyResolver`] holds the directed "requires" relation between
//! registered services and provides the pure graph algorithms the
//! orchestrator plans with: cycle detection at edge insertion, Kahn's
//! topological order with deterministic tie-breaking, and transitive
//! dependency/dependent queries.

mod resolver;

pub use resolver::DependencyResolver;
