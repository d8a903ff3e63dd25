//! Plan types and construction.
//!
//! A plan is an ordered list of steps, each carrying the step indices it
//! depends on. Step order is consistent with the topological order of the
//! dependency graph; orphan deletes come first, then apply steps, then the
//! deposed halves of replaces.
//!
//! Replace expansion is the delicate part. A replace becomes two steps with
//! blue/green semantics: the successor create runs before dependents
//! re-apply, and the deposed delete depends on the successor *and* on every
//! dependent's re-apply, so the old instance is never deleted while
//! anything still references its outputs.

use std::collections::HashMap;

use tracing::debug;

use crate::graph::{ResourceGraph, Resolution};
use crate::model::{Operation, Stack};
use crate::state::StateSnapshot;

use super::diff::DiffResult;

/// A single step of a plan.
#[derive(Debug, Clone)]
pub struct PlanStep {
    /// Step index within the plan.
    pub index: usize,
    /// Logical resource id this step operates on.
    pub resource_id: String,
    /// Type tag.
    pub type_name: String,
    /// Provider operation to perform (`Replace` never appears here; it is
    /// expanded into a create and a deposed delete).
    pub operation: Operation,
    /// True for the create half of a replace.
    pub replacement: bool,
    /// True for the delete-the-old-instance half of a replace.
    pub deposed: bool,
    /// Physical id to delete or update, from the state snapshot.
    pub physical_id: Option<String>,
    /// Step indices that must complete successfully first.
    pub depends_on: Vec<usize>,
}

impl PlanStep {
    /// Returns a human-readable description of the step.
    #[must_use]
    pub fn description(&self) -> String {
        match self.operation {
            Operation::Create if self.replacement => {
                format!("Create replacement for '{}'", self.resource_id)
            }
            Operation::Create => format!("Create '{}'", self.resource_id),
            Operation::UpdateInPlace => format!("Update '{}'", self.resource_id),
            Operation::Delete if self.deposed => {
                format!("Delete deposed instance of '{}'", self.resource_id)
            }
            Operation::Delete => format!("Delete '{}'", self.resource_id),
            Operation::Replace => format!("Replace '{}'", self.resource_id),
            Operation::NoOp => format!("No change for '{}'", self.resource_id),
        }
    }
}

/// An ordered, dependency-annotated list of steps.
#[derive(Debug, Default)]
pub struct Plan {
    /// Steps in a topologically consistent order.
    pub steps: Vec<PlanStep>,
}

impl Plan {
    /// Builds a plan from a diff.
    ///
    /// Orphan deletes are ordered among themselves using the dependency ids
    /// recorded in state (dependents deleted before their dependencies);
    /// apply steps follow the resolver's order; deposed deletes come last.
    #[must_use]
    pub fn from_diff(
        diff: &DiffResult,
        stack: &Stack,
        graph: &ResourceGraph,
        resolution: &Resolution,
        snapshot: &StateSnapshot,
    ) -> Self {
        let mut steps: Vec<PlanStep> = Vec::new();

        // Orphan deletes first. An orphan's recorded dependencies that are
        // themselves orphans must outlive it, so the dependency's delete
        // step waits for the dependent's.
        let orphan_ids: Vec<&str> = diff
            .diffs
            .iter()
            .filter(|d| d.operation == Operation::Delete && !stack.declares(&d.id))
            .map(|d| d.id.as_str())
            .collect();

        let mut orphan_step: HashMap<&str, usize> = HashMap::new();
        for &id in &orphan_ids {
            let index = steps.len();
            orphan_step.insert(id, index);
            let record = snapshot.get(id);
            steps.push(PlanStep {
                index,
                resource_id: id.to_string(),
                type_name: record.map_or_else(String::new, |r| r.type_name.clone()),
                operation: Operation::Delete,
                replacement: false,
                deposed: false,
                physical_id: record.and_then(|r| r.physical_id.clone()),
                depends_on: Vec::new(),
            });
        }
        for &id in &orphan_ids {
            let Some(record) = snapshot.get(id) else {
                continue;
            };
            let dependent_step = orphan_step[id];
            for dependency in &record.dependencies {
                if let Some(&dependency_step) = orphan_step.get(dependency.as_str()) {
                    steps[dependency_step].depends_on.push(dependent_step);
                }
            }
        }

        // Apply steps in resolver order. Replaces register their successor
        // create here and queue the deposed delete for the end.
        let mut apply_step: Vec<Option<usize>> = vec![None; graph.len()];
        let mut deposed: Vec<usize> = Vec::new();

        for &resource_index in &resolution.order {
            let id = graph.id_of(resource_index);
            let Some(resource_diff) = diff.get(id) else {
                continue;
            };

            let depends_on: Vec<usize> = graph
                .dependencies_of(resource_index)
                .into_iter()
                .filter_map(|dep| apply_step[dep])
                .collect();

            let step_index = steps.len();
            let (operation, replacement) = match resource_diff.operation {
                Operation::Replace => (Operation::Create, true),
                op => (op, false),
            };

            let physical_id = match operation {
                Operation::UpdateInPlace => snapshot
                    .get(id)
                    .and_then(|r| r.physical_id.clone()),
                _ => None,
            };

            steps.push(PlanStep {
                index: step_index,
                resource_id: id.to_string(),
                type_name: resource_diff.type_name.clone(),
                operation,
                replacement,
                deposed: false,
                physical_id,
                depends_on,
            });
            apply_step[resource_index] = Some(step_index);

            if replacement {
                deposed.push(resource_index);
            }
        }

        // Deposed deletes last: each waits for its successor and for every
        // dependent's re-apply, which is what keeps the old instance's
        // outputs valid until nothing references them.
        for resource_index in deposed {
            let id = graph.id_of(resource_index);
            let mut depends_on: Vec<usize> = Vec::new();
            if let Some(successor) = apply_step[resource_index] {
                depends_on.push(successor);
            }
            for dependent in graph.dependents_of(resource_index) {
                if let Some(step) = apply_step[dependent] {
                    depends_on.push(step);
                }
            }

            let step_index = steps.len();
            steps.push(PlanStep {
                index: step_index,
                resource_id: id.to_string(),
                type_name: diff.get(id).map_or_else(String::new, |d| d.type_name.clone()),
                operation: Operation::Delete,
                replacement: false,
                deposed: true,
                physical_id: snapshot.get(id).and_then(|r| r.physical_id.clone()),
                depends_on,
            });
        }

        debug!("Built plan with {} steps", steps.len());
        Self { steps }
    }

    /// Returns true if no step issues a provider call.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.iter().all(|s| s.operation == Operation::NoOp)
    }

    /// Returns the number of steps.
    #[must_use]
    pub const fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Returns the step indices for a resource id (two for a replace).
    #[must_use]
    pub fn steps_for(&self, resource_id: &str) -> Vec<&PlanStep> {
        self.steps
            .iter()
            .filter(|s| s.resource_id == resource_id)
            .collect()
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Plan ({} steps):", self.steps.len())?;
        for step in &self.steps {
            writeln!(f, "  {}. {}", step.index, step.description())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{DependencyResolver, GraphBuilder};
    use crate::model::{PropertyValue, ResourceSpec, SpecHasher, TypeRegistry};
    use crate::planner::DiffEngine;
    use crate::state::StateRecord;
    use serde_json::Value;

    fn applied_record(spec: &ResourceSpec, physical_id: &str) -> StateRecord {
        let hasher = SpecHasher::new();
        let mut record = StateRecord::new(&spec.id, &spec.type_name, &hasher.hash_spec(spec));
        record.properties = spec.properties.clone();
        let mut outputs = crate::model::Outputs::new();
        outputs.insert(String::from("id"), Value::String(physical_id.to_string()));
        record.mark_applied(Some(physical_id.to_string()), outputs);
        record
    }

    fn plan_for(stack: &Stack, snapshot: &StateSnapshot) -> Plan {
        let registry = TypeRegistry::builtin();
        let graph = GraphBuilder::new().build(stack).expect("graph");
        let resolution = DependencyResolver::new().resolve(&graph).expect("resolve");
        let diff =
            DiffEngine::new(&registry).compute_diff(stack, &graph, &resolution, snapshot);
        Plan::from_diff(&diff, stack, &graph, &resolution, snapshot)
    }

    fn subnet_nat_stack() -> Stack {
        Stack::new("net")
            .with_resource(
                ResourceSpec::new("public-subnet", "subnet")
                    .with_property("network_id", PropertyValue::string("vpc-1"))
                    .with_property("cidr_block", PropertyValue::string("10.0.1.0/24"))
                    .with_property("availability_zone", PropertyValue::string("ap-southeast-1a")),
            )
            .with_resource(
                ResourceSpec::new("nat-gateway", "nat_gateway")
                    .with_property("subnet_id", PropertyValue::reference("public-subnet", "id"))
                    .with_property("allocation_id", PropertyValue::string("eip-1")),
            )
    }

    #[test]
    fn test_create_steps_follow_dependency_order() {
        let plan = plan_for(&subnet_nat_stack(), &StateSnapshot::empty());

        assert_eq!(plan.step_count(), 2);
        assert_eq!(plan.steps[0].resource_id, "public-subnet");
        assert_eq!(plan.steps[1].resource_id, "nat-gateway");
        assert_eq!(plan.steps[1].depends_on, vec![0]);
    }

    #[test]
    fn test_replace_expands_into_two_steps() {
        let stack = subnet_nat_stack();
        let snapshot = StateSnapshot::from_records(
            stack
                .resources
                .iter()
                .map(|s| (s.id.clone(), applied_record(s, &format!("p-{}", s.id))))
                .collect(),
        );

        let mut changed = stack.clone();
        changed.resources[0] = changed.resources[0]
            .clone()
            .with_property("availability_zone", PropertyValue::string("ap-southeast-1b"));

        let plan = plan_for(&changed, &snapshot);
        let subnet_steps = plan.steps_for("public-subnet");
        assert_eq!(subnet_steps.len(), 2);

        let create = subnet_steps
            .iter()
            .find(|s| s.replacement)
            .expect("successor create step");
        let delete = subnet_steps
            .iter()
            .find(|s| s.deposed)
            .expect("deposed delete step");

        assert_eq!(create.operation, Operation::Create);
        assert_eq!(delete.operation, Operation::Delete);
        assert_eq!(delete.physical_id.as_deref(), Some("p-public-subnet"));

        // The deposed delete must wait for the successor and for the
        // dependent gateway's re-apply.
        let gateway_step = plan
            .steps_for("nat-gateway")
            .iter()
            .find(|s| !s.deposed)
            .map(|s| s.index)
            .expect("gateway apply step");
        assert!(delete.depends_on.contains(&create.index));
        assert!(delete.depends_on.contains(&gateway_step));
    }

    #[test]
    fn test_orphan_deletes_ordered_dependents_first() {
        // State holds subnet -> nat-gateway; the stack declares neither, so
        // both are orphans and the gateway must be deleted before the
        // subnet it depends on.
        let subnet_spec = ResourceSpec::new("public-subnet", "subnet")
            .with_property("network_id", PropertyValue::string("vpc-1"))
            .with_property("cidr_block", PropertyValue::string("10.0.1.0/24"))
            .with_property("availability_zone", PropertyValue::string("ap-southeast-1a"));
        let gateway_spec = ResourceSpec::new("nat-gateway", "nat_gateway")
            .with_property("subnet_id", PropertyValue::reference("public-subnet", "id"))
            .with_property("allocation_id", PropertyValue::string("eip-1"));

        let mut subnet_record = applied_record(&subnet_spec, "subnet-1");
        subnet_record.dependencies = vec![];
        let mut gateway_record = applied_record(&gateway_spec, "nat-1");
        gateway_record.dependencies = vec![String::from("public-subnet")];

        let snapshot = StateSnapshot::from_records(
            [
                (String::from("public-subnet"), subnet_record),
                (String::from("nat-gateway"), gateway_record),
            ]
            .into_iter()
            .collect(),
        );

        let plan = plan_for(&Stack::new("empty"), &snapshot);
        assert_eq!(plan.step_count(), 2);

        let subnet_step = plan.steps_for("public-subnet")[0];
        let gateway_step = plan.steps_for("nat-gateway")[0];
        assert!(subnet_step.depends_on.contains(&gateway_step.index));
        assert!(gateway_step.depends_on.is_empty());
    }

    #[test]
    fn test_noop_plan_is_empty() {
        let stack = subnet_nat_stack();
        let snapshot = StateSnapshot::from_records(
            stack
                .resources
                .iter()
                .map(|s| (s.id.clone(), applied_record(s, &format!("p-{}", s.id))))
                .collect(),
        );

        let plan = plan_for(&stack, &snapshot);
        assert!(plan.is_empty());
        assert_eq!(plan.step_count(), 2);
    }
}
