//! Dependency graph construction and resolution.
//!
//! The graph builder turns a validated stack into a directed graph whose
//! edges point from a dependency to its dependents; the resolver proves the
//! graph acyclic, computes a deterministic topological order, and partitions
//! it into independent components for parallel execution.

mod builder;
mod resolver;

pub use builder::{EdgeKind, GraphBuilder, ResourceGraph};
pub(crate) use builder::value_references_resource;
pub use resolver::{DependencyResolver, Resolution};
