//! Graph builder: resources plus dependency edges.
//!
//! A pure transformation of a declared stack into a directed graph. Every
//! reference found in a property value contributes an implicit edge from
//! the referenced resource to the dependent one; explicit `depends_on`
//! entries contribute explicit edges. Edge direction is dependency ->
//! dependent throughout.
//!
//! References are only discovered in structured [`PropertyValue::Ref`]
//! positions. A value interpolated by hand into an opaque blob (e.g. a
//! user-data script) is invisible here; authors must declare such couplings
//! with a `Ref` property or an explicit `depends_on`.

use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use tracing::debug;

use crate::error::{Result, ValidationError};
use crate::model::{PropertyValue, Stack};

/// How a dependency edge came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Author-declared ordering constraint (`depends_on`).
    Explicit,
    /// Derived from a reference in a property value.
    Implicit,
}

/// The dependency graph over a stack's resources.
///
/// Nodes are declaration indices into the stack's resource list, which
/// keeps declaration order available as the deterministic tie-break.
#[derive(Debug)]
pub struct ResourceGraph {
    graph: DiGraph<usize, EdgeKind>,
    nodes: Vec<NodeIndex>,
    ids: Vec<String>,
    index_of: HashMap<String, usize>,
}

impl ResourceGraph {
    /// Returns the number of resources in the graph.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if the graph has no resources.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Returns the resource id at a declaration index.
    #[must_use]
    pub fn id_of(&self, index: usize) -> &str {
        &self.ids[index]
    }

    /// Returns the declaration index of a resource id.
    #[must_use]
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index_of.get(id).copied()
    }

    /// Returns the declaration indices this resource depends on.
    #[must_use]
    pub fn dependencies_of(&self, index: usize) -> Vec<usize> {
        let mut deps: Vec<usize> = self
            .graph
            .neighbors_directed(self.nodes[index], Direction::Incoming)
            .map(|n| self.graph[n])
            .collect();
        deps.sort_unstable();
        deps.dedup();
        deps
    }

    /// Returns the declaration indices that depend on this resource.
    #[must_use]
    pub fn dependents_of(&self, index: usize) -> Vec<usize> {
        let mut deps: Vec<usize> = self
            .graph
            .neighbors_directed(self.nodes[index], Direction::Outgoing)
            .map(|n| self.graph[n])
            .collect();
        deps.sort_unstable();
        deps.dedup();
        deps
    }

    /// Returns the declaration indices that transitively depend on this
    /// resource, in ascending declaration order.
    #[must_use]
    pub fn transitive_dependents_of(&self, index: usize) -> Vec<usize> {
        let mut seen = vec![false; self.len()];
        let mut stack = vec![index];
        while let Some(current) = stack.pop() {
            for dependent in self.dependents_of(current) {
                if !seen[dependent] {
                    seen[dependent] = true;
                    stack.push(dependent);
                }
            }
        }
        seen.iter()
            .enumerate()
            .filter_map(|(i, &hit)| hit.then_some(i))
            .collect()
    }

    /// Returns true if there is an edge from `from` to `to`.
    #[must_use]
    pub fn has_edge(&self, from: usize, to: usize) -> bool {
        self.graph
            .find_edge(self.nodes[from], self.nodes[to])
            .is_some()
    }

    /// Returns the kind of the edge from `from` to `to`, if one exists.
    #[must_use]
    pub fn edge_kind(&self, from: usize, to: usize) -> Option<EdgeKind> {
        self.graph
            .find_edge(self.nodes[from], self.nodes[to])
            .map(|edge| self.graph[edge])
    }

    pub(super) const fn petgraph(&self) -> &DiGraph<usize, EdgeKind> {
        &self.graph
    }

    pub(super) fn node(&self, index: usize) -> NodeIndex {
        self.nodes[index]
    }
}

/// Builder assembling a stack into a [`ResourceGraph`].
#[derive(Debug, Default)]
pub struct GraphBuilder;

impl GraphBuilder {
    /// Creates a new graph builder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Builds the dependency graph for a stack.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownReference`] if a property
    /// references a resource id the stack does not declare.
    pub fn build(&self, stack: &Stack) -> Result<ResourceGraph> {
        let mut graph = DiGraph::new();
        let mut nodes = Vec::with_capacity(stack.len());
        let mut ids = Vec::with_capacity(stack.len());
        let mut index_of = HashMap::with_capacity(stack.len());

        for (index, spec) in stack.resources.iter().enumerate() {
            nodes.push(graph.add_node(index));
            ids.push(spec.id.clone());
            index_of.insert(spec.id.clone(), index);
        }

        for (index, spec) in stack.resources.iter().enumerate() {
            for value in spec.properties.values() {
                for reference in value.references() {
                    let Some(&source) = index_of.get(&reference.resource) else {
                        return Err(ValidationError::UnknownReference {
                            resource: spec.id.clone(),
                            referenced: reference.resource.clone(),
                        }
                        .into());
                    };
                    Self::add_edge(&mut graph, nodes[source], nodes[index], EdgeKind::Implicit);
                }
            }

            for dependency in &spec.depends_on {
                let Some(&source) = index_of.get(dependency) else {
                    return Err(ValidationError::UnknownDependency {
                        resource: spec.id.clone(),
                        dependency: dependency.clone(),
                    }
                    .into());
                };
                Self::add_edge(&mut graph, nodes[source], nodes[index], EdgeKind::Explicit);
            }
        }

        debug!(
            "Built graph for stack '{}': {} nodes, {} edges",
            stack.name,
            graph.node_count(),
            graph.edge_count()
        );

        Ok(ResourceGraph {
            graph,
            nodes,
            ids,
            index_of,
        })
    }

    fn add_edge(
        graph: &mut DiGraph<usize, EdgeKind>,
        from: NodeIndex,
        to: NodeIndex,
        kind: EdgeKind,
    ) {
        // One edge per ordered pair is enough; an ordering constraint does
        // not get stronger by being declared twice.
        if graph.find_edge(from, to).is_none() {
            graph.add_edge(from, to, kind);
        }
    }
}

/// Walks property values looking for references; used by tests and by the
/// diff engine's replace propagation to ask "does this spec reference that
/// resource".
#[must_use]
pub(crate) fn value_references_resource(value: &PropertyValue, resource_id: &str) -> bool {
    value
        .references()
        .iter()
        .any(|r| r.resource == resource_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConvergeError;
    use crate::model::{PropertyValue, ResourceSpec};

    fn network_stack() -> Stack {
        Stack::new("net")
            .with_resource(
                ResourceSpec::new("my-vpc", "network")
                    .with_property("cidr_block", PropertyValue::string("10.0.0.0/16")),
            )
            .with_resource(
                ResourceSpec::new("public-subnet", "subnet")
                    .with_property("network_id", PropertyValue::reference("my-vpc", "id"))
                    .with_property("cidr_block", PropertyValue::string("10.0.1.0/24"))
                    .with_property("availability_zone", PropertyValue::string("ap-southeast-1a")),
            )
            .with_resource(
                ResourceSpec::new("web", "compute_instance")
                    .with_property("instance_type", PropertyValue::string("t2.micro"))
                    .with_property("ami", PropertyValue::string("ami-060e277c0d4cce553"))
                    .with_property("subnet_id", PropertyValue::reference("public-subnet", "id"))
                    .with_depends_on("my-vpc"),
            )
    }

    #[test]
    fn test_implicit_edges_from_references() {
        let graph = GraphBuilder::new()
            .build(&network_stack())
            .expect("graph should build");

        let vpc = graph.index_of("my-vpc").expect("vpc index");
        let subnet = graph.index_of("public-subnet").expect("subnet index");
        let web = graph.index_of("web").expect("web index");

        assert!(graph.has_edge(vpc, subnet));
        assert!(graph.has_edge(subnet, web));
        assert!(!graph.has_edge(subnet, vpc));
        assert_eq!(graph.edge_kind(vpc, subnet), Some(EdgeKind::Implicit));
    }

    #[test]
    fn test_explicit_edges_from_depends_on() {
        let graph = GraphBuilder::new()
            .build(&network_stack())
            .expect("graph should build");

        let vpc = graph.index_of("my-vpc").expect("vpc index");
        let web = graph.index_of("web").expect("web index");
        assert_eq!(graph.edge_kind(vpc, web), Some(EdgeKind::Explicit));
    }

    #[test]
    fn test_unknown_reference_rejected() {
        let stack = Stack::new("net").with_resource(
            ResourceSpec::new("public-subnet", "subnet")
                .with_property("network_id", PropertyValue::reference("ghost-vpc", "id"))
                .with_property("cidr_block", PropertyValue::string("10.0.1.0/24"))
                .with_property("availability_zone", PropertyValue::string("ap-southeast-1a")),
        );

        let err = GraphBuilder::new()
            .build(&stack)
            .expect_err("unknown reference should fail");
        assert!(matches!(
            err,
            ConvergeError::Validation(ValidationError::UnknownReference { ref referenced, .. })
                if referenced == "ghost-vpc"
        ));
    }

    #[test]
    fn test_nested_references_produce_edges() {
        let stack = Stack::new("net")
            .with_resource(
                ResourceSpec::new("public-secgrp", "security_group")
                    .with_property("network_id", PropertyValue::string("vpc-literal")),
            )
            .with_resource(
                ResourceSpec::new("web", "compute_instance")
                    .with_property("instance_type", PropertyValue::string("t2.micro"))
                    .with_property("ami", PropertyValue::string("ami-1"))
                    .with_property("subnet_id", PropertyValue::string("subnet-literal"))
                    .with_property(
                        "security_group_ids",
                        PropertyValue::list([PropertyValue::reference("public-secgrp", "id")]),
                    ),
            );

        let graph = GraphBuilder::new().build(&stack).expect("graph should build");
        let secgrp = graph.index_of("public-secgrp").expect("secgrp index");
        let web = graph.index_of("web").expect("web index");
        assert!(graph.has_edge(secgrp, web));
    }

    #[test]
    fn test_transitive_dependents() {
        let graph = GraphBuilder::new()
            .build(&network_stack())
            .expect("graph should build");

        let vpc = graph.index_of("my-vpc").expect("vpc index");
        let dependents = graph.transitive_dependents_of(vpc);
        assert_eq!(dependents.len(), 2);
    }
}
