//! Dependency resolver: cycle detection, ordering, partitioning.
//!
//! Proves the graph is a DAG (cycles are a validation failure, not a
//! runtime condition), computes a topological order with declaration-order
//! tie-breaking so runs are deterministic, and partitions the graph into
//! independent components that the scheduler may execute concurrently.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use petgraph::algo::tarjan_scc;
use petgraph::Direction;
use tracing::debug;

use crate::error::{Result, ValidationError};

use super::builder::ResourceGraph;

/// The resolver's output: a proven-acyclic ordering plus partition.
#[derive(Debug)]
pub struct Resolution {
    /// Declaration indices in a valid application order.
    pub order: Vec<usize>,
    /// Independent (weakly connected) components, each listing declaration
    /// indices in ascending order; components sorted by smallest member.
    pub components: Vec<Vec<usize>>,
}

impl Resolution {
    /// Maps the order onto resource ids, mostly for reporting and tests.
    #[must_use]
    pub fn ordered_ids<'a>(&self, graph: &'a ResourceGraph) -> Vec<&'a str> {
        self.order.iter().map(|&i| graph.id_of(i)).collect()
    }

    /// Returns the position of a declaration index within the order.
    #[must_use]
    pub fn position(&self, index: usize) -> Option<usize> {
        self.order.iter().position(|&i| i == index)
    }
}

/// Resolver over a built [`ResourceGraph`].
#[derive(Debug, Default)]
pub struct DependencyResolver;

impl DependencyResolver {
    /// Creates a new dependency resolver.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates acyclicity and computes the execution order.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::CyclicDependency`] naming every resource
    /// in the first cycle found (in declaration order, closed on the first
    /// member).
    pub fn resolve(&self, graph: &ResourceGraph) -> Result<Resolution> {
        Self::ensure_acyclic(graph)?;

        let order = Self::topological_order(graph);
        let components = Self::partition(graph);

        debug!(
            "Resolved order for {} resources across {} independent components",
            order.len(),
            components.len()
        );

        Ok(Resolution { order, components })
    }

    /// Rejects graphs containing cycles, naming the cycle members.
    fn ensure_acyclic(graph: &ResourceGraph) -> Result<()> {
        // Strongly connected components of size > 1 are cycles; a size-1
        // component is only a cycle if the node loops onto itself.
        for scc in tarjan_scc(graph.petgraph()) {
            let mut members: Vec<usize> = scc.iter().map(|&n| graph.petgraph()[n]).collect();
            let is_cycle = members.len() > 1
                || graph.has_edge(members[0], members[0]);
            if !is_cycle {
                continue;
            }

            members.sort_unstable();
            let mut cycle: Vec<String> =
                members.iter().map(|&i| graph.id_of(i).to_string()).collect();
            cycle.push(cycle[0].clone());

            return Err(ValidationError::CyclicDependency { cycle }.into());
        }
        Ok(())
    }

    /// Kahn's algorithm over declaration indices.
    ///
    /// The frontier is a min-heap keyed on declaration index, so whenever
    /// several resources are simultaneously ready the earliest-declared one
    /// comes first. That makes the order a pure function of the stack.
    fn topological_order(graph: &ResourceGraph) -> Vec<usize> {
        let mut indegree: Vec<usize> = (0..graph.len())
            .map(|i| {
                graph
                    .petgraph()
                    .neighbors_directed(graph.node(i), Direction::Incoming)
                    .count()
            })
            .collect();

        let mut ready: BinaryHeap<Reverse<usize>> = indegree
            .iter()
            .enumerate()
            .filter_map(|(i, &d)| (d == 0).then_some(Reverse(i)))
            .collect();

        let mut order = Vec::with_capacity(graph.len());
        while let Some(Reverse(index)) = ready.pop() {
            order.push(index);
            for dependent in graph.dependents_of(index) {
                indegree[dependent] -= 1;
                if indegree[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        // ensure_acyclic ran first, so every node is reachable.
        debug_assert_eq!(order.len(), graph.len());
        order
    }

    /// Partitions the DAG into weakly connected components.
    fn partition(graph: &ResourceGraph) -> Vec<Vec<usize>> {
        let mut component_of = vec![usize::MAX; graph.len()];
        let mut next_component = 0;

        for start in 0..graph.len() {
            if component_of[start] != usize::MAX {
                continue;
            }
            let mut stack = vec![start];
            component_of[start] = next_component;
            while let Some(current) = stack.pop() {
                let neighbors = graph
                    .dependencies_of(current)
                    .into_iter()
                    .chain(graph.dependents_of(current));
                for neighbor in neighbors {
                    if component_of[neighbor] == usize::MAX {
                        component_of[neighbor] = next_component;
                        stack.push(neighbor);
                    }
                }
            }
            next_component += 1;
        }

        let mut components = vec![Vec::new(); next_component];
        for (index, &component) in component_of.iter().enumerate() {
            components[component].push(index);
        }
        components
    }
}
