// src/resolver/graph.rs

//! Dependency graph over concrete packages
//!
//! Nodes are keyed by fingerprint. An edge `a -> b` means `a` requires a
//! reference that `b` satisfies (directly or through `provides`). Used for
//! ordering operations and for dependent lookups.

use crate::error::{Error, Result};
use crate::package::Package;
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

/// Dependency graph for ordering
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, Package>,
    /// Outgoing edges: package -> its dependencies
    edges: BTreeMap<String, BTreeSet<String>>,
    /// Package -> packages that depend on it
    reverse_edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph over `packages`, only linking packages inside the set
    pub fn from_packages(packages: &[Package]) -> Self {
        let mut graph = Self::new();
        for pkg in packages {
            graph.add_node(pkg.clone());
        }
        for pkg in packages {
            for req in &pkg.requires {
                for dep in packages.iter().filter(|d| !d.same_as(pkg) && d.satisfies(req)) {
                    graph.add_edge(&pkg.fingerprint(), &dep.fingerprint());
                }
            }
        }
        graph
    }

    pub fn add_node(&mut self, pkg: Package) {
        self.nodes.insert(pkg.fingerprint(), pkg);
    }

    /// Record that `from` depends on `to`
    pub fn add_edge(&mut self, from: &str, to: &str) {
        self.edges
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
        self.reverse_edges
            .entry(to.to_string())
            .or_default()
            .insert(from.to_string());
    }

    pub fn get_node(&self, fingerprint: &str) -> Option<&Package> {
        self.nodes.get(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get_dependencies(&self, fingerprint: &str) -> Vec<&str> {
        self.edges
            .get(fingerprint)
            .map(|deps| deps.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn get_dependents(&self, fingerprint: &str) -> Vec<&str> {
        self.reverse_edges
            .get(fingerprint)
            .map(|deps| deps.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Kahn's algorithm, dependencies before dependents
    ///
    /// Ties are broken by fingerprint so the order is stable. Fails when the
    /// graph has a cycle.
    pub fn topological_sort(&self) -> Result<Vec<Package>> {
        // A node is ready once all of its dependencies have been emitted
        let mut pending: BTreeMap<&str, usize> = self
            .nodes
            .keys()
            .map(|k| (k.as_str(), self.edges.get(k).map_or(0, BTreeSet::len)))
            .collect();

        let mut queue: VecDeque<&str> = pending
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(k, _)| *k)
            .collect();
        let mut result = Vec::with_capacity(self.nodes.len());

        while let Some(name) = queue.pop_front() {
            if let Some(pkg) = self.nodes.get(name) {
                result.push(pkg.clone());
            }
            let mut ready = Vec::new();
            for dependent in self.get_dependents(name) {
                if let Some(degree) = pending.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(dependent);
                    }
                }
            }
            ready.sort_unstable();
            queue.extend(ready);
        }

        if result.len() != self.nodes.len() {
            let cycle = self.detect_cycle().unwrap_or_default();
            return Err(Error::ConflictError(format!(
                "Circular dependency detected: {}",
                cycle.join(" -> ")
            )));
        }
        Ok(result)
    }

    /// The packages of some cycle, if the graph has one
    pub fn detect_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut stack = Vec::new();

        for name in self.nodes.keys() {
            if !visited.contains(name.as_str())
                && let Some(cycle) = self.dfs_cycle(name, &mut visited, &mut stack)
            {
                return Some(cycle);
            }
        }
        None
    }

    fn dfs_cycle<'a>(
        &'a self,
        name: &'a str,
        visited: &mut HashSet<&'a str>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(name);
        stack.push(name);

        for dep in self.get_dependencies(name) {
            if let Some(pos) = stack.iter().position(|s| *s == dep) {
                let mut cycle: Vec<String> = stack[pos..].iter().map(|s| s.to_string()).collect();
                cycle.push(dep.to_string());
                return Some(cycle);
            }
            if !visited.contains(dep)
                && let Some(cycle) = self.dfs_cycle(dep, visited, stack)
            {
                return Some(cycle);
            }
        }

        stack.pop();
        None
    }

    /// Every package depending on `fingerprint`, directly or transitively
    pub fn find_breaking_packages(&self, fingerprint: &str) -> Vec<String> {
        let mut breaking = BTreeSet::new();
        let mut queue = VecDeque::from([fingerprint.to_string()]);

        while let Some(name) = queue.pop_front() {
            for dependent in self.get_dependents(&name) {
                if dependent != fingerprint && breaking.insert(dependent.to_string()) {
                    queue.push_back(dependent.to_string());
                }
            }
        }
        breaking.into_iter().collect()
    }
}
