//! Per-run resource objects and lifecycle states.
//!
//! A [`Resource`] is created fresh for every run from its declared spec. It
//! is mutated only by the diff engine (assigning an operation) and the
//! execution scheduler (recording outputs and lifecycle transitions), and
//! discarded at the end of the run; durable facts live in the state store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::stack::ResourceSpec;
use super::value::PropertyValue;

/// Outputs produced by a provider for a single resource.
pub type Outputs = BTreeMap<String, Value>;

/// Lifecycle state of a resource within a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// The resource has a planned operation but no work has started.
    Planned,
    /// A provider call for this resource is in flight.
    Applying,
    /// The provider call succeeded; outputs are available.
    Applied,
    /// The provider call failed terminally.
    Failed,
    /// The resource was deleted.
    Deleted,
}

/// The operation a run will perform for a resource.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Create a resource that does not exist yet.
    Create,
    /// Update a live resource without recreating it.
    UpdateInPlace,
    /// Recreate the resource (an immutable property changed).
    Replace,
    /// Delete a resource that is no longer declared.
    Delete,
    /// Nothing to do.
    NoOp,
}

/// A declared resource with its desired properties and run-time outputs.
#[derive(Debug, Clone)]
pub struct Resource {
    /// Unique logical id within the stack.
    pub id: String,
    /// Type tag (e.g. `network`, `subnet`, `compute_instance`).
    pub type_name: String,
    /// Desired properties, possibly containing unresolved references.
    pub properties: BTreeMap<String, PropertyValue>,
    /// Provider-assigned outputs; populated only after a successful apply.
    pub outputs: Outputs,
    /// Current lifecycle state.
    pub lifecycle: LifecycleState,
}

impl Resource {
    /// Creates a bare resource known only from recorded state (e.g. an
    /// orphan about to be deleted).
    #[must_use]
    pub fn new(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_name: type_name.into(),
            properties: BTreeMap::new(),
            outputs: Outputs::new(),
            lifecycle: LifecycleState::Planned,
        }
    }

    /// Creates a fresh resource from its declared spec.
    #[must_use]
    pub fn from_spec(spec: &ResourceSpec) -> Self {
        Self {
            id: spec.id.clone(),
            type_name: spec.type_name.clone(),
            properties: spec.properties.clone(),
            outputs: Outputs::new(),
            lifecycle: LifecycleState::Planned,
        }
    }

    /// Transitions the resource to a new lifecycle state.
    pub fn set_lifecycle(&mut self, state: LifecycleState) {
        self.lifecycle = state;
    }

    /// Returns true once the resource has reached a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self.lifecycle,
            LifecycleState::Applied | LifecycleState::Failed | LifecycleState::Deleted
        )
    }
}

impl Operation {
    /// Returns true if this operation issues any provider call.
    #[must_use]
    pub const fn is_actionable(&self) -> bool {
        !matches!(self, Self::NoOp)
    }

    /// Returns true if this operation removes a live resource.
    #[must_use]
    pub const fn is_destructive(&self) -> bool {
        matches!(self, Self::Delete | Self::Replace)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Planned => "planned",
            Self::Applying => "applying",
            Self::Applied => "applied",
            Self::Failed => "failed",
            Self::Deleted => "deleted",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::UpdateInPlace => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::NoOp => "noop",
        };
        write!(f, "{s}")
    }
}
