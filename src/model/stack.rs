//! Declarative stack specification types.
//!
//! A [`Stack`] is the engine's input: an ordered sequence of resource
//! specifications plus named exports. Declaration order matters only as a
//! deterministic tie-break during scheduling; correctness comes from
//! reference-derived and explicit dependency edges.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::value::{PropertyValue, Reference};

/// Specification of a single declared resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Unique logical id within the stack.
    pub id: String,
    /// Type tag, resolved against the type registry.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Desired properties; values may be literals, references, or secrets.
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
    /// Author-declared ordering constraints in addition to implicit edges.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl ResourceSpec {
    /// Creates a new resource spec with no properties.
    #[must_use]
    pub fn new(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_name: type_name.into(),
            properties: BTreeMap::new(),
            depends_on: Vec::new(),
        }
    }

    /// Adds a property.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    /// Adds an explicit dependency on another resource id.
    #[must_use]
    pub fn with_depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    /// Collects every reference in this spec's property values.
    #[must_use]
    pub fn references(&self) -> Vec<&Reference> {
        self.properties
            .values()
            .flat_map(PropertyValue::references)
            .collect()
    }
}

/// A complete declared stack: resources plus exports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stack {
    /// Stack name, used for logging only.
    pub name: String,
    /// Declared resources, in declaration order.
    pub resources: Vec<ResourceSpec>,
    /// Named exports resolved from resource outputs at end of run.
    #[serde(default)]
    pub exports: BTreeMap<String, Reference>,
}

impl Stack {
    /// Creates a new empty stack.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resources: Vec::new(),
            exports: BTreeMap::new(),
        }
    }

    /// Adds a resource to the stack.
    #[must_use]
    pub fn with_resource(mut self, spec: ResourceSpec) -> Self {
        self.resources.push(spec);
        self
    }

    /// Declares a named export.
    #[must_use]
    pub fn with_export(
        mut self,
        name: impl Into<String>,
        resource: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        self.exports
            .insert(name.into(), Reference::new(resource, output));
        self
    }

    /// Looks up a resource spec by id.
    #[must_use]
    pub fn resource(&self, id: &str) -> Option<&ResourceSpec> {
        self.resources.iter().find(|r| r.id == id)
    }

    /// Returns true if the stack declares the given resource id.
    #[must_use]
    pub fn declares(&self, id: &str) -> bool {
        self.resources.iter().any(|r| r.id == id)
    }

    /// Returns the number of declared resources.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if the stack declares no resources.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_collects_references() {
        let spec = ResourceSpec::new("public-subnet", "subnet")
            .with_property("network_id", PropertyValue::reference("my-vpc", "id"))
            .with_property("cidr_block", PropertyValue::string("10.0.1.0/24"));

        let refs = spec.references();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].resource, "my-vpc");
        assert_eq!(refs[0].output, "id");
    }

    #[test]
    fn test_stack_lookup() {
        let stack = Stack::new("net")
            .with_resource(ResourceSpec::new("my-vpc", "network"))
            .with_export("vpc_id", "my-vpc", "id");

        assert!(stack.declares("my-vpc"));
        assert!(!stack.declares("other"));
        assert_eq!(stack.resource("my-vpc").map(|r| r.type_name.as_str()), Some("network"));
        assert_eq!(stack.exports["vpc_id"], Reference::new("my-vpc", "id"));
    }
}
