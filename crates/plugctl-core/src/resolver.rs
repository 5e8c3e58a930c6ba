//! Dependency checks and ordering over a snapshot of registry data.
//!
//! Everything here is pure: callers load plugins and edges, build a
//! [`DependencyGraph`], and ask the [`DependencyResolver`] questions about it.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use thiserror::Error;

use crate::classification::{ClassificationTable, LoadOrderPolicy};
use crate::models::{Dependency, NewPlugin, Plugin, Violation};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("dependency cycle among: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

/// The slice of a plugin the resolver cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    pub name: String,
    pub is_enabled: bool,
    pub load_order: i64,
}

impl From<&Plugin> for GraphNode {
    fn from(plugin: &Plugin) -> Self {
        Self {
            name: plugin.name.clone(),
            is_enabled: plugin.is_enabled,
            load_order: plugin.load_order,
        }
    }
}

/// Registered plugins plus their dependency edges.
///
/// Edges may name plugins that are not registered yet; those count as
/// "not enabled" everywhere.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, GraphNode>,
    edges: Vec<Dependency>,
}

impl DependencyGraph {
    pub fn new<N, E>(nodes: N, edges: E) -> Self
    where
        N: IntoIterator<Item = GraphNode>,
        E: IntoIterator<Item = Dependency>,
    {
        Self {
            nodes: nodes.into_iter().map(|n| (n.name.clone(), n)).collect(),
            edges: edges.into_iter().collect(),
        }
    }

    pub fn from_plugins(plugins: &[Plugin], edges: Vec<Dependency>) -> Self {
        Self::new(plugins.iter().map(GraphNode::from), edges)
    }

    pub fn node(&self, name: &str) -> Option<&GraphNode> {
        self.nodes.get(name)
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.nodes.get(name).is_some_and(|n| n.is_enabled)
    }

    /// Edges declared by `name`, in insertion order.
    pub fn dependencies<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Dependency> + 'a {
        self.edges.iter().filter(move |e| e.plugin == name)
    }

    /// Edges that point at `name`.
    pub fn dependents<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Dependency> + 'a {
        self.edges.iter().filter(move |e| e.requires_plugin == name)
    }

    pub fn enabled(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values().filter(|n| n.is_enabled)
    }

    /// Flip a node's enabled flag, e.g. to evaluate a batch of changes.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) {
        if let Some(node) = self.nodes.get_mut(name) {
            node.is_enabled = enabled;
        }
    }
}

/// Outcome of [`DependencyResolver::can_enable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnableCheck {
    pub allowed: bool,
    /// Required plugins that are not enabled, in declaration order.
    pub missing: Vec<String>,
}

/// Outcome of [`DependencyResolver::can_disable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisableCheck {
    pub allowed: bool,
    /// Enabled plugins with a required dependency on the target, sorted.
    pub blockers: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyResolver {
    policy: LoadOrderPolicy,
}

impl DependencyResolver {
    pub fn new(policy: LoadOrderPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &LoadOrderPolicy {
        &self.policy
    }

    /// Every unsatisfied required edge of every enabled plugin.
    pub fn verify(&self, graph: &DependencyGraph) -> Vec<Violation> {
        let mut out = Vec::new();
        for node in graph.enabled() {
            for dep in graph.dependencies(&node.name) {
                if !dep.is_optional && !graph.is_enabled(&dep.requires_plugin) {
                    out.push(Violation {
                        plugin: node.name.clone(),
                        missing_dependency: dep.requires_plugin.clone(),
                    });
                }
            }
        }
        out
    }

    pub fn can_enable(&self, graph: &DependencyGraph, name: &str) -> EnableCheck {
        let missing: Vec<String> = graph
            .dependencies(name)
            .filter(|dep| !dep.is_optional && !graph.is_enabled(&dep.requires_plugin))
            .map(|dep| dep.requires_plugin.clone())
            .collect();
        EnableCheck {
            allowed: missing.is_empty(),
            missing,
        }
    }

    pub fn can_disable(&self, graph: &DependencyGraph, name: &str) -> DisableCheck {
        let blockers: BTreeSet<String> = graph
            .dependents(name)
            .filter(|dep| !dep.is_optional && graph.is_enabled(&dep.plugin))
            .map(|dep| dep.plugin.clone())
            .collect();
        DisableCheck {
            allowed: blockers.is_empty(),
            blockers: blockers.into_iter().collect(),
        }
    }

    /// Tier-based load order for a plugin about to be registered.
    pub fn compute_load_order(&self, plugin: &NewPlugin, table: &ClassificationTable) -> i64 {
        self.policy.load_order(
            &plugin.category,
            plugin.is_core,
            table.core_priority(&plugin.name),
        )
    }

    /// Enabled plugins in an order where every plugin follows the enabled
    /// plugins it depends on (optional edges included).
    ///
    /// Ready nodes are taken lowest `(load_order, name)` first, so the tier
    /// assignment only breaks ties the graph leaves open.
    pub fn load_sequence(&self, graph: &DependencyGraph) -> Result<Vec<String>, ResolveError> {
        let enabled: BTreeMap<&str, &GraphNode> =
            graph.enabled().map(|n| (n.name.as_str(), n)).collect();

        let mut in_degree: BTreeMap<&str, usize> = enabled.keys().map(|k| (*k, 0)).collect();
        let mut unlocks: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        let mut seen_edges: BTreeSet<(&str, &str)> = BTreeSet::new();
        for name in enabled.keys() {
            for dep in graph.dependencies(name) {
                let required = dep.requires_plugin.as_str();
                if !enabled.contains_key(required) || !seen_edges.insert((name, required)) {
                    continue;
                }
                if let Some(degree) = in_degree.get_mut(name) {
                    *degree += 1;
                }
                unlocks.entry(required).or_default().push(name);
            }
        }

        let mut ready: BinaryHeap<Reverse<(i64, &str)>> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .filter_map(|(name, _)| enabled.get(name).map(|n| Reverse((n.load_order, *name))))
            .collect();

        let mut order = Vec::with_capacity(enabled.len());
        while let Some(Reverse((_, name))) = ready.pop() {
            order.push(name.to_string());
            for next in unlocks.get(name).into_iter().flatten() {
                let Some(degree) = in_degree.get_mut(next) else {
                    continue;
                };
                *degree -= 1;
                if *degree == 0 {
                    if let Some(node) = enabled.get(next) {
                        ready.push(Reverse((node.load_order, *next)));
                    }
                }
            }
        }

        if order.len() < enabled.len() {
            let stuck = in_degree
                .into_iter()
                .filter(|(_, degree)| *degree > 0)
                .map(|(name, _)| name.to_string())
                .collect();
            return Err(ResolveError::Cycle(stuck));
        }
        Ok(order)
    }

    /// Registered transitive required dependencies of `name`, deepest first,
    /// ending with `name` itself.
    pub fn dependency_tree(
        &self,
        graph: &DependencyGraph,
        name: &str,
    ) -> Result<Vec<String>, ResolveError> {
        let mut out = Vec::new();
        let mut done = BTreeSet::new();
        let mut path = Vec::new();
        visit(graph, name, &mut path, &mut done, &mut out)?;
        Ok(out)
    }
}

fn visit(
    graph: &DependencyGraph,
    name: &str,
    path: &mut Vec<String>,
    done: &mut BTreeSet<String>,
    out: &mut Vec<String>,
) -> Result<(), ResolveError> {
    if done.contains(name) || graph.node(name).is_none() {
        return Ok(());
    }
    if let Some(start) = path.iter().position(|p| p == name) {
        return Err(ResolveError::Cycle(path[start..].to_vec()));
    }
    path.push(name.to_string());
    for dep in graph.dependencies(name) {
        if !dep.is_optional {
            visit(graph, &dep.requires_plugin, path, done, out)?;
        }
    }
    path.pop();
    done.insert(name.to_string());
    out.push(name.to_string());
    Ok(())
}
