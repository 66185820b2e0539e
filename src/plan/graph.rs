// src/plan/graph.rs

use std::collections::HashMap;

use crate::plan::model::TaskPlan;

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone)]
struct GraphNode {
    /// Direct dependencies: containers that must be healthy before this one
    /// can start.
    deps: Vec<String>,
    /// Direct dependents: containers that depend on this one.
    dependents: Vec<String>,
}

/// Simple in-memory dependency graph keyed by container name.
///
/// Acyclicity is validated at config load time, so here we just keep
/// adjacency information for scheduling and teardown ordering.
#[derive(Debug, Clone)]
pub struct ContainerGraph {
    nodes: HashMap<String, GraphNode>,
}

impl ContainerGraph {
    /// Build the graph from a resolved [`TaskPlan`].
    ///
    /// Assumes that:
    /// - all dependency references are valid
    /// - there are no cycles
    pub fn from_plan(plan: &TaskPlan) -> Self {
        let mut nodes: HashMap<String, GraphNode> = HashMap::new();

        // First pass: create nodes with their dependency lists.
        for (name, container) in plan.containers.iter() {
            nodes.insert(
                name.clone(),
                GraphNode {
                    deps: container.dependencies.clone(),
                    dependents: Vec::new(),
                },
            );
        }

        // Second pass: populate dependents based on deps.
        let names: Vec<String> = nodes.keys().cloned().collect();
        for name in names {
            let deps = nodes
                .get(&name)
                .map(|n| n.deps.clone())
                .unwrap_or_default();

            for dep in deps {
                if let Some(dep_node) = nodes.get_mut(&dep) {
                    dep_node.dependents.push(name.clone());
                }
            }
        }

        Self { nodes }
    }

    /// Return all container names.
    pub fn containers(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    /// Immediate dependencies of a container.
    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.nodes
            .get(name)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a container.
    pub fn dependents_of(&self, name: &str) -> &[String] {
        self.nodes
            .get(name)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }
}
