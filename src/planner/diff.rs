//! Diff engine for comparing desired specs against recorded state.
//!
//! Classifies every resource into one operation: create, update in place,
//! replace, delete, or no-op. Which property changes force a replace comes
//! from per-type metadata in the [`TypeRegistry`], never from engine logic,
//! and a replace cascades: any dependent referencing a replaced resource's
//! output must itself be re-applied (or replaced, if the referencing
//! property is immutable for its own type).

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::graph::{value_references_resource, ResourceGraph, Resolution};
use crate::model::{
    Operation, PropertyValue, ResourceSpec, SpecHasher, Stack, TypeRegistry,
};
use crate::state::StateSnapshot;

/// Difference for a single resource.
#[derive(Debug, Clone)]
pub struct ResourceDiff {
    /// Logical resource id.
    pub id: String,
    /// Type tag.
    pub type_name: String,
    /// The operation this run must perform.
    pub operation: Operation,
    /// Property-level changes behind the classification.
    pub details: Vec<PropertyChange>,
    /// Human-readable reason for the operation.
    pub reason: String,
    /// Spec hash recorded by the previous run, if any.
    pub old_hash: Option<String>,
    /// Spec hash of the desired spec, absent for deletes.
    pub new_hash: Option<String>,
}

/// A single changed property.
#[derive(Debug, Clone)]
pub struct PropertyChange {
    /// Property name.
    pub property: String,
    /// Previously applied value.
    pub old: Option<PropertyValue>,
    /// Desired value.
    pub new: Option<PropertyValue>,
    /// True if this change forces a replace for the resource's type.
    pub requires_replace: bool,
}

/// Complete diff result.
#[derive(Debug)]
pub struct DiffResult {
    /// All resource diffs: declared resources in declaration order,
    /// followed by orphaned state records sorted by id.
    pub diffs: Vec<ResourceDiff>,
    /// Number of resources to create.
    pub creates: usize,
    /// Number of resources to update in place.
    pub updates: usize,
    /// Number of resources to replace.
    pub replaces: usize,
    /// Number of resources to delete.
    pub deletes: usize,
    /// Number of unchanged resources.
    pub unchanged: usize,
}

/// Engine computing diffs between a desired stack and recorded state.
#[derive(Debug)]
pub struct DiffEngine<'a> {
    registry: &'a TypeRegistry,
    hasher: SpecHasher,
}

impl<'a> DiffEngine<'a> {
    /// Creates a diff engine backed by the given type registry.
    #[must_use]
    pub const fn new(registry: &'a TypeRegistry) -> Self {
        Self {
            registry,
            hasher: SpecHasher::new(),
        }
    }

    /// Computes the diff for every declared resource plus orphaned records.
    ///
    /// Replace propagation walks the graph in topological order, so a
    /// replace anywhere upstream transitively re-applies (or replaces)
    /// every dependent that references it.
    #[must_use]
    pub fn compute_diff(
        &self,
        stack: &Stack,
        graph: &ResourceGraph,
        resolution: &Resolution,
        snapshot: &StateSnapshot,
    ) -> DiffResult {
        let mut diffs: Vec<ResourceDiff> = stack
            .resources
            .iter()
            .map(|spec| self.classify(spec, snapshot))
            .collect();

        self.propagate_replaces(stack, graph, resolution, &mut diffs);

        // Records with no declared counterpart are orphans to delete.
        let mut orphan_ids: Vec<&String> = snapshot
            .records
            .keys()
            .filter(|id| !stack.declares(id))
            .collect();
        orphan_ids.sort();

        for id in orphan_ids {
            let record = &snapshot.records[id];
            debug!("Found orphaned resource: {id}");
            diffs.push(ResourceDiff {
                id: id.clone(),
                type_name: record.type_name.clone(),
                operation: Operation::Delete,
                details: vec![],
                reason: String::from("removed from stack"),
                old_hash: Some(record.spec_hash.clone()),
                new_hash: None,
            });
        }

        let creates = Self::count(&diffs, Operation::Create);
        let updates = Self::count(&diffs, Operation::UpdateInPlace);
        let replaces = Self::count(&diffs, Operation::Replace);
        let deletes = Self::count(&diffs, Operation::Delete);
        let unchanged = Self::count(&diffs, Operation::NoOp);

        debug!(
            "Diff: {creates} creates, {updates} updates, {replaces} replaces, \
             {deletes} deletes, {unchanged} unchanged"
        );

        DiffResult {
            diffs,
            creates,
            updates,
            replaces,
            deletes,
            unchanged,
        }
    }

    /// Classifies one declared resource against its state record.
    fn classify(&self, spec: &ResourceSpec, snapshot: &StateSnapshot) -> ResourceDiff {
        let new_hash = self.hasher.hash_spec(spec);

        let Some(record) = snapshot.get(&spec.id) else {
            return ResourceDiff {
                id: spec.id.clone(),
                type_name: spec.type_name.clone(),
                operation: Operation::Create,
                details: vec![],
                reason: String::from("not present in state"),
                old_hash: None,
                new_hash: Some(new_hash),
            };
        };

        if !record.is_live() {
            // A failed prior apply: recreate. If something was physically
            // created we must replace it, otherwise a plain create will do.
            let (operation, reason) = if record.physical_id.is_some() {
                (
                    Operation::Replace,
                    String::from("previous apply failed; recreating"),
                )
            } else {
                (
                    Operation::Create,
                    String::from("previous create never completed"),
                )
            };
            return ResourceDiff {
                id: spec.id.clone(),
                type_name: spec.type_name.clone(),
                operation,
                details: vec![],
                reason,
                old_hash: Some(record.spec_hash.clone()),
                new_hash: Some(new_hash),
            };
        }

        if record.spec_hash == new_hash {
            debug!("Resource {} is up to date", spec.id);
            return ResourceDiff {
                id: spec.id.clone(),
                type_name: spec.type_name.clone(),
                operation: Operation::NoOp,
                details: vec![],
                reason: String::from("no changes"),
                old_hash: Some(record.spec_hash.clone()),
                new_hash: Some(new_hash),
            };
        }

        let details = self.compare_properties(spec, &record.properties);
        let (operation, reason) = if details.is_empty() {
            // Hash covers ordering metadata too; if no property actually
            // changed there is nothing for the provider to do.
            (Operation::NoOp, String::from("no changes"))
        } else if let Some(trigger) = details.iter().find(|d| d.requires_replace) {
            (
                Operation::Replace,
                format!("{} changed (immutable)", trigger.property),
            )
        } else {
            (
                Operation::UpdateInPlace,
                format!("{} properties changed", details.len()),
            )
        };

        debug!("Resource {} needs {}: {}", spec.id, operation, reason);
        ResourceDiff {
            id: spec.id.clone(),
            type_name: spec.type_name.clone(),
            operation,
            details,
            reason,
            old_hash: Some(record.spec_hash.clone()),
            new_hash: Some(new_hash),
        }
    }

    /// Compares desired properties against last-applied ones.
    fn compare_properties(
        &self,
        spec: &ResourceSpec,
        recorded: &BTreeMap<String, PropertyValue>,
    ) -> Vec<PropertyChange> {
        let def = self.registry.get(&spec.type_name);
        let mut changes = Vec::new();

        let property_names: HashSet<&String> =
            spec.properties.keys().chain(recorded.keys()).collect();
        let mut property_names: Vec<&String> = property_names.into_iter().collect();
        property_names.sort();

        for name in property_names {
            let old = recorded.get(name);
            let new = spec.properties.get(name);
            if old == new {
                continue;
            }
            changes.push(PropertyChange {
                property: name.clone(),
                old: old.cloned(),
                new: new.cloned(),
                requires_replace: def.is_some_and(|d| d.requires_replace(name)),
            });
        }

        changes
    }

    /// Upgrades dependents of replaced resources, in topological order.
    fn propagate_replaces(
        &self,
        stack: &Stack,
        graph: &ResourceGraph,
        resolution: &Resolution,
        diffs: &mut [ResourceDiff],
    ) {
        let mut replaced: HashSet<usize> = HashSet::new();

        for &index in &resolution.order {
            if diffs[index].operation == Operation::Replace {
                replaced.insert(index);
                continue;
            }

            let spec = &stack.resources[index];
            let def = self.registry.get(&spec.type_name);

            for dependency in graph.dependencies_of(index) {
                if !replaced.contains(&dependency) {
                    continue;
                }
                let dependency_id = graph.id_of(dependency);

                let mut references = false;
                let mut triggers_replace = false;
                for (name, value) in &spec.properties {
                    if value_references_resource(value, dependency_id) {
                        references = true;
                        if def.is_some_and(|d| d.requires_replace(name)) {
                            triggers_replace = true;
                        }
                    }
                }
                if !references {
                    // Ordering-only dependents keep their own classification.
                    continue;
                }

                let diff = &mut diffs[index];
                if triggers_replace && diff.operation != Operation::Create {
                    diff.operation = Operation::Replace;
                    diff.reason = format!(
                        "references replaced resource '{dependency_id}' via an immutable property"
                    );
                } else if diff.operation == Operation::NoOp {
                    diff.operation = Operation::UpdateInPlace;
                    diff.reason =
                        format!("references replaced resource '{dependency_id}'");
                }
            }

            if diffs[index].operation == Operation::Replace {
                replaced.insert(index);
            }
        }
    }

    fn count(diffs: &[ResourceDiff], operation: Operation) -> usize {
        diffs.iter().filter(|d| d.operation == operation).count()
    }
}

impl DiffResult {
    /// Returns true if there are any changes.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.creates > 0 || self.updates > 0 || self.replaces > 0 || self.deletes > 0
    }

    /// Returns the total number of changes.
    #[must_use]
    pub const fn total_changes(&self) -> usize {
        self.creates + self.updates + self.replaces + self.deletes
    }

    /// Looks up the diff for a resource id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ResourceDiff> {
        self.diffs.iter().find(|d| d.id == id)
    }

    /// Filters to only diffs that require action.
    #[must_use]
    pub fn actionable_diffs(&self) -> Vec<&ResourceDiff> {
        self.diffs
            .iter()
            .filter(|d| d.operation.is_actionable())
            .collect()
    }
}

impl std::fmt::Display for ResourceDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} ({})", self.id, self.operation, self.reason)?;
        if !self.details.is_empty() {
            write!(f, " [")?;
            for (i, detail) in self.details.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", detail.property)?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}
