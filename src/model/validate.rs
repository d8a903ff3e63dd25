//! Semantic validation of a declared stack.
//!
//! Runs before graph construction and catches everything that does not need
//! dependency analysis: duplicate ids, unknown types, schema violations,
//! and malformed explicit dependency lists. Reference targets are checked
//! by the graph builder, cycles by the dependency resolver.

use std::collections::HashSet;

use tracing::debug;

use crate::error::{Result, ValidationError};

use super::registry::TypeRegistry;
use super::stack::Stack;

/// Validator for declared stacks.
#[derive(Debug)]
pub struct StackValidator<'a> {
    registry: &'a TypeRegistry,
}

impl<'a> StackValidator<'a> {
    /// Creates a validator backed by the given type registry.
    #[must_use]
    pub const fn new(registry: &'a TypeRegistry) -> Self {
        Self { registry }
    }

    /// Validates the stack.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] encountered, in declaration
    /// order, so repeated runs report failures deterministically.
    pub fn validate(&self, stack: &Stack) -> Result<()> {
        debug!("Validating stack '{}' ({} resources)", stack.name, stack.len());

        let mut seen: HashSet<&str> = HashSet::new();
        for spec in &stack.resources {
            if !seen.insert(spec.id.as_str()) {
                return Err(ValidationError::DuplicateId {
                    id: spec.id.clone(),
                }
                .into());
            }
        }

        for spec in &stack.resources {
            let Some(def) = self.registry.get(&spec.type_name) else {
                return Err(ValidationError::UnknownType {
                    resource: spec.id.clone(),
                    type_name: spec.type_name.clone(),
                }
                .into());
            };

            for required in &def.required {
                if !spec.properties.contains_key(required) {
                    return Err(ValidationError::MissingProperty {
                        resource: spec.id.clone(),
                        property: required.clone(),
                    }
                    .into());
                }
            }

            for property in spec.properties.keys() {
                if !def.allows(property) {
                    return Err(ValidationError::UnknownProperty {
                        resource: spec.id.clone(),
                        property: property.clone(),
                        type_name: spec.type_name.clone(),
                    }
                    .into());
                }
            }

            for dependency in &spec.depends_on {
                if dependency == &spec.id {
                    return Err(ValidationError::SelfDependency {
                        resource: spec.id.clone(),
                    }
                    .into());
                }
                if !stack.declares(dependency) {
                    return Err(ValidationError::UnknownDependency {
                        resource: spec.id.clone(),
                        dependency: dependency.clone(),
                    }
                    .into());
                }
            }
        }

        for (export, reference) in &stack.exports {
            if !stack.declares(&reference.resource) {
                return Err(ValidationError::UnknownExportTarget {
                    export: export.clone(),
                    referenced: reference.resource.clone(),
                }
                .into());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConvergeError;
    use crate::model::{PropertyValue, ResourceSpec};

    fn vpc() -> ResourceSpec {
        ResourceSpec::new("my-vpc", "network")
            .with_property("cidr_block", PropertyValue::string("10.0.0.0/16"))
    }

    fn validate(stack: &Stack) -> Result<()> {
        let registry = TypeRegistry::builtin();
        StackValidator::new(&registry).validate(stack)
    }

    #[test]
    fn test_valid_stack_passes() {
        let stack = Stack::new("net").with_resource(vpc()).with_resource(
            ResourceSpec::new("public-subnet", "subnet")
                .with_property("network_id", PropertyValue::reference("my-vpc", "id"))
                .with_property("cidr_block", PropertyValue::string("10.0.1.0/24"))
                .with_property("availability_zone", PropertyValue::string("ap-southeast-1a")),
        );

        validate(&stack).expect("stack should validate");
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let stack = Stack::new("net").with_resource(vpc()).with_resource(vpc());
        let err = validate(&stack).expect_err("duplicate should fail");
        assert!(matches!(
            err,
            ConvergeError::Validation(ValidationError::DuplicateId { .. })
        ));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let stack =
            Stack::new("net").with_resource(ResourceSpec::new("mystery", "quantum_router"));
        let err = validate(&stack).expect_err("unknown type should fail");
        assert!(matches!(
            err,
            ConvergeError::Validation(ValidationError::UnknownType { .. })
        ));
    }

    #[test]
    fn test_missing_required_property_rejected() {
        let stack = Stack::new("net").with_resource(ResourceSpec::new("my-vpc", "network"));
        let err = validate(&stack).expect_err("missing property should fail");
        assert!(matches!(
            err,
            ConvergeError::Validation(ValidationError::MissingProperty { ref property, .. })
                if property == "cidr_block"
        ));
    }

    #[test]
    fn test_unknown_property_rejected() {
        let stack = Stack::new("net").with_resource(
            vpc().with_property("flavour", PropertyValue::string("strawberry")),
        );
        let err = validate(&stack).expect_err("unknown property should fail");
        assert!(matches!(
            err,
            ConvergeError::Validation(ValidationError::UnknownProperty { .. })
        ));
    }

    #[test]
    fn test_unknown_explicit_dependency_rejected() {
        let stack = Stack::new("net").with_resource(vpc().with_depends_on("ghost"));
        let err = validate(&stack).expect_err("unknown dependency should fail");
        assert!(matches!(
            err,
            ConvergeError::Validation(ValidationError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let stack = Stack::new("net").with_resource(vpc().with_depends_on("my-vpc"));
        let err = validate(&stack).expect_err("self dependency should fail");
        assert!(matches!(
            err,
            ConvergeError::Validation(ValidationError::SelfDependency { .. })
        ));
    }

    #[test]
    fn test_unknown_export_target_rejected() {
        let stack = Stack::new("net")
            .with_resource(vpc())
            .with_export("router_id", "ghost", "id");
        let err = validate(&stack).expect_err("unknown export target should fail");
        assert!(matches!(
            err,
            ConvergeError::Validation(ValidationError::UnknownExportTarget { .. })
        ));
    }
}
