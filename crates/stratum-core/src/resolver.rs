//! Dependency ordering
//!
//! The graph is rebuilt from the registry on every resolution. Unknown
//! dependency names and cycles are configuration errors: they mean the catalog
//! is broken and no amount of retrying will fix it.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::component::Component;
use crate::error::{CoreError, Result};
use crate::registry::ComponentRegistry;

/// Validated, acyclic dependency graph in processing order
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Names in processing order
    order: Vec<String>,
    /// name -> direct dependencies
    dependencies: HashMap<String, Vec<String>>,
    /// name -> direct dependents
    dependents: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Build and topologically sort the registry
    ///
    /// Kahn's algorithm, always taking the earliest-declared component among
    /// those whose dependencies are already placed. With no edges this returns
    /// the declaration order unchanged.
    pub fn build(registry: &ComponentRegistry) -> Result<Self> {
        let components: Vec<&Component> = registry.list().collect();
        let n = components.len();

        let mut dependencies: HashMap<String, Vec<String>> = HashMap::with_capacity(n);
        let mut dependents: HashMap<String, Vec<String>> = HashMap::with_capacity(n);
        let mut in_degree = vec![0usize; n];

        for (idx, component) in components.iter().enumerate() {
            let mut seen = HashSet::new();
            for dep in &component.dependencies {
                if !registry.contains(dep) {
                    return Err(CoreError::UnknownDependency {
                        component: component.name.clone(),
                        dependency: dep.clone(),
                    });
                }
                // Listing the same dependency twice is harmless
                if seen.insert(dep.as_str()) {
                    in_degree[idx] += 1;
                    dependents
                        .entry(dep.clone())
                        .or_default()
                        .push(component.name.clone());
                }
            }
            dependencies.insert(
                component.name.clone(),
                component.dependencies.iter().filter(|d| seen.remove(d.as_str())).cloned().collect(),
            );
        }

        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(n);

        while let Some(idx) = ready.pop_first() {
            let name = &components[idx].name;
            order.push(name.clone());
            for dependent in dependents.get(name).into_iter().flatten() {
                if let Some(dep_idx) = registry.position(dependent) {
                    in_degree[dep_idx] -= 1;
                    if in_degree[dep_idx] == 0 {
                        ready.insert(dep_idx);
                    }
                }
            }
        }

        if order.len() < n {
            let placed: HashSet<&str> = order.iter().map(String::as_str).collect();
            let remaining: Vec<&Component> = components
                .iter()
                .copied()
                .filter(|c| !placed.contains(c.name.as_str()))
                .collect();
            return Err(CoreError::DependencyCycle {
                cycle: describe_cycle(&remaining, &dependencies),
            });
        }

        tracing::debug!(components = n, "Resolved dependency order");

        Ok(Self {
            order,
            dependencies,
            dependents,
        })
    }

    /// Processing order: dependencies before dependents
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Uninstall order: dependents before dependencies
    pub fn reverse_order(&self) -> impl Iterator<Item = &str> {
        self.order.iter().rev().map(String::as_str)
    }

    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.dependencies.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn dependents_of(&self, name: &str) -> &[String] {
        self.dependents.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether `ancestor` is reachable by following dependencies from `name`
    pub fn depends_on(&self, name: &str, ancestor: &str) -> bool {
        let mut stack: Vec<&str> = self.dependencies_of(name).iter().map(String::as_str).collect();
        let mut visited = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == ancestor {
                return true;
            }
            if visited.insert(current) {
                stack.extend(self.dependencies_of(current).iter().map(String::as_str));
            }
        }
        false
    }

    /// True when neither component is an ancestor of the other
    pub fn independent(&self, a: &str, b: &str) -> bool {
        a != b && !self.depends_on(a, b) && !self.depends_on(b, a)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Resolve the processing order of a registry
pub fn resolve_order(registry: &ComponentRegistry) -> Result<Vec<&Component>> {
    let graph = DependencyGraph::build(registry)?;
    graph.order().iter().map(|name| registry.lookup(name)).collect()
}

/// Walk dependencies from the first unplaced component until a name repeats
fn describe_cycle(remaining: &[&Component], dependencies: &HashMap<String, Vec<String>>) -> String {
    let remaining_names: HashSet<&str> = remaining.iter().map(|c| c.name.as_str()).collect();
    let Some(start) = remaining.first() else {
        return String::new();
    };

    let mut path: Vec<&str> = vec![start.name.as_str()];
    let mut current = start.name.as_str();
    loop {
        let next = dependencies
            .get(current)
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|d| remaining_names.contains(d));
        let Some(next) = next else {
            break;
        };
        if let Some(pos) = path.iter().position(|p| *p == next) {
            let mut cycle: Vec<&str> = path[pos..].to_vec();
            cycle.push(next);
            return cycle.join(" -> ");
        }
        path.push(next);
        current = next;
    }

    path.join(" -> ")
}
