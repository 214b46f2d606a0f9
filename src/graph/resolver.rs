//! # DependencyResolver: directed "requires" graph over service names.
//!
//! Nodes are opaque service names; an edge `(node → depends_on)` means the
//! node cannot reach `Running` before `depends_on` is `Running`.
//!
//! ## Rules
//! - The graph is acyclic at all times: [`DependencyResolver::add_edge`]
//!   detects cycles with the edge provisionally added and rolls it back on
//!   failure, so an erroring call leaves the graph unchanged.
//! - [`DependencyResolver::topological_order`] uses Kahn's algorithm; ties
//!   among zero-in-degree nodes are broken by insertion order, so the output
//!   is deterministic and testable.
//! - All algorithms are O(V+E); the graph size equals the service count.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use crate::error::OrchestratorError;

/// Directed dependency graph with insertion-ordered nodes.
#[derive(Debug, Default, Clone)]
pub struct DependencyResolver {
    /// Node names in insertion order (drives topological tie-breaking).
    order: Vec<String>,
    /// Forward edges: node → set of names it depends on.
    deps: HashMap<String, HashSet<String>>,
    /// Reverse edges: node → set of names that depend on it.
    rdeps: HashMap<String, HashSet<String>>,
}

impl DependencyResolver {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node. Returns `false` if the name is already present.
    pub fn add_node(&mut self, name: &str) -> bool {
        if self.deps.contains_key(name) {
            return false;
        }
        self.order.push(name.to_string());
        self.deps.insert(name.to_string(), HashSet::new());
        self.rdeps.insert(name.to_string(), HashSet::new());
        true
    }

    /// Removes a node and every edge touching it. Returns `false` if absent.
    pub fn remove_node(&mut self, name: &str) -> bool {
        if self.deps.remove(name).is_none() {
            return false;
        }
        self.rdeps.remove(name);
        self.order.retain(|n| n != name);
        for set in self.deps.values_mut() {
            set.remove(name);
        }
        for set in self.rdeps.values_mut() {
            set.remove(name);
        }
        true
    }

    /// True if the node is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.deps.contains_key(name)
    }

    /// Number of registered nodes.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True if the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Node names in insertion order.
    pub fn nodes(&self) -> &[String] {
        &self.order
    }

    /// Adds the edge `node → depends_on`.
    ///
    /// Fails with [`OrchestratorError::NotFound`] if either node is unknown,
    /// or with [`OrchestratorError::Cycle`] if the edge would make the graph
    /// cyclic. On error the graph is left byte-for-byte unchanged. Adding an
    /// existing edge is a no-op.
    pub fn add_edge(&mut self, node: &str, depends_on: &str) -> Result<(), OrchestratorError> {
        for name in [node, depends_on] {
            if !self.deps.contains_key(name) {
                return Err(OrchestratorError::NotFound {
                    name: name.to_string(),
                });
            }
        }
        if self.deps[node].contains(depends_on) {
            return Ok(());
        }

        // Provisionally insert, then probe for a cycle through the new edge.
        if let Some(set) = self.deps.get_mut(node) {
            set.insert(depends_on.to_string());
        }
        if self.has_cycle(node) {
            if let Some(set) = self.deps.get_mut(node) {
                set.remove(depends_on);
            }
            return Err(OrchestratorError::Cycle {
                node: node.to_string(),
                depends_on: depends_on.to_string(),
            });
        }
        if let Some(set) = self.rdeps.get_mut(depends_on) {
            set.insert(node.to_string());
        }
        Ok(())
    }

    /// Removes the edge `node → depends_on`. No-op if the edge is absent.
    pub fn remove_edge(&mut self, node: &str, depends_on: &str) {
        if let Some(set) = self.deps.get_mut(node) {
            set.remove(depends_on);
        }
        if let Some(set) = self.rdeps.get_mut(depends_on) {
            set.remove(node);
        }
    }

    /// Direct dependencies of `node`, in insertion order.
    pub fn dependencies_of(&self, node: &str) -> Result<Vec<String>, OrchestratorError> {
        let set = self.deps.get(node).ok_or_else(|| OrchestratorError::NotFound {
            name: node.to_string(),
        })?;
        Ok(self.in_insertion_order(set))
    }

    /// Direct dependents of `node` (reverse edges), in insertion order.
    pub fn dependents(&self, node: &str) -> Result<Vec<String>, OrchestratorError> {
        let set = self.rdeps.get(node).ok_or_else(|| OrchestratorError::NotFound {
            name: node.to_string(),
        })?;
        Ok(self.in_insertion_order(set))
    }

    /// Every transitive dependency of `node`, discovered by BFS over forward
    /// edges. The node itself is not included.
    pub fn transitive_dependencies(&self, node: &str) -> Result<Vec<String>, OrchestratorError> {
        if !self.deps.contains_key(node) {
            return Err(OrchestratorError::NotFound {
                name: node.to_string(),
            });
        }
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        let mut out = Vec::new();
        seen.insert(node.to_string());
        queue.push_back(node.to_string());
        while let Some(current) = queue.pop_front() {
            for dep in self.in_insertion_order(&self.deps[&current]) {
                if seen.insert(dep.clone()) {
                    out.push(dep.clone());
                    queue.push_back(dep);
                }
            }
        }
        Ok(out)
    }

    /// True if a cycle is reachable from `node`, detected by DFS with
    /// recursion-stack tracking.
    pub fn has_cycle(&self, node: &str) -> bool {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: HashSet<&str> = HashSet::new();
        self.dfs_cycle(node, &mut visited, &mut stack)
    }

    fn dfs_cycle<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        stack: &mut HashSet<&'a str>,
    ) -> bool {
        if stack.contains(node) {
            return true;
        }
        if !visited.insert(node) {
            return false;
        }
        stack.insert(node);
        if let Some(deps) = self.deps.get(node) {
            for dep in deps {
                if self.dfs_cycle(dep, visited, stack) {
                    return true;
                }
            }
        }
        stack.remove(node);
        false
    }

    /// Topological order of the whole graph: every dependency appears before
    /// its dependents. Kahn's algorithm; zero-in-degree ties resolve in
    /// insertion order.
    pub fn topological_order(&self) -> Vec<String> {
        self.kahn(&self.order.iter().map(String::as_str).collect::<Vec<_>>())
    }

    /// Topological order of the subgraph induced by `subset`.
    ///
    /// Edges leaving the subset are ignored. Unknown names fail with
    /// [`OrchestratorError::NotFound`].
    pub fn topological_order_of(&self, subset: &[&str]) -> Result<Vec<String>, OrchestratorError> {
        for name in subset {
            if !self.deps.contains_key(*name) {
                return Err(OrchestratorError::NotFound {
                    name: name.to_string(),
                });
            }
        }
        Ok(self.kahn(subset))
    }

    /// Kahn's algorithm over the induced subgraph, deterministic by
    /// insertion index.
    fn kahn(&self, subset: &[&str]) -> Vec<String> {
        let members: HashSet<&str> = subset.iter().copied().collect();
        let index: HashMap<&str, usize> = self
            .order
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();

        // in-degree = number of dependencies inside the subset
        let mut indegree: HashMap<&str, usize> = HashMap::new();
        for &name in &members {
            let deg = self.deps[name]
                .iter()
                .filter(|d| members.contains(d.as_str()))
                .count();
            indegree.insert(name, deg);
        }

        let mut ready: BinaryHeap<Reverse<(usize, &str)>> = indegree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(name, _)| Reverse((index[name], *name)))
            .collect();

        let mut out = Vec::with_capacity(members.len());
        while let Some(Reverse((_, name))) = ready.pop() {
            out.push(name.to_string());
            for dependent in &self.rdeps[name] {
                let dependent = dependent.as_str();
                if !members.contains(dependent) {
                    continue;
                }
                if let Some(deg) = indegree.get_mut(dependent) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.push(Reverse((index[dependent], dependent)));
                    }
                }
            }
        }
        out
    }

    /// Orders the members of a set by node insertion order.
    fn in_insertion_order(&self, set: &HashSet<String>) -> Vec<String> {
        self.order
            .iter()
            .filter(|n| set.contains(*n))
            .cloned()
            .collect()
    }
}
