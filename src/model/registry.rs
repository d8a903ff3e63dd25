//! Per-type resource metadata.
//!
//! Each resource type declares its property schema and, crucially, which
//! properties are replace-triggering: changing one of those forces the diff
//! engine to plan a delete-and-recreate instead of an in-place update. The
//! table is injected as data so embedders can register their own types
//! without touching engine logic.

use std::collections::HashMap;

/// Metadata for a single resource type.
#[derive(Debug, Clone)]
pub struct TypeDef {
    /// Type tag (e.g. `subnet`).
    pub name: String,
    /// Properties that must be present on every spec of this type.
    pub required: Vec<String>,
    /// Properties that may be present.
    pub optional: Vec<String>,
    /// Properties whose change forces a replace instead of an update.
    pub replace_triggering: Vec<String>,
    /// Output names this type produces on apply.
    pub outputs: Vec<String>,
}

impl TypeDef {
    /// Creates a new type definition with an empty schema.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: Vec::new(),
            optional: Vec::new(),
            replace_triggering: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Declares required properties.
    #[must_use]
    pub fn with_required(mut self, names: &[&str]) -> Self {
        self.required.extend(names.iter().map(ToString::to_string));
        self
    }

    /// Declares optional properties.
    #[must_use]
    pub fn with_optional(mut self, names: &[&str]) -> Self {
        self.optional.extend(names.iter().map(ToString::to_string));
        self
    }

    /// Declares replace-triggering properties.
    #[must_use]
    pub fn with_replace_on(mut self, names: &[&str]) -> Self {
        self.replace_triggering
            .extend(names.iter().map(ToString::to_string));
        self
    }

    /// Declares produced outputs.
    #[must_use]
    pub fn with_outputs(mut self, names: &[&str]) -> Self {
        self.outputs.extend(names.iter().map(ToString::to_string));
        self
    }

    /// Returns true if the property is part of this type's schema.
    #[must_use]
    pub fn allows(&self, property: &str) -> bool {
        self.required.iter().any(|p| p == property) || self.optional.iter().any(|p| p == property)
    }

    /// Returns true if changing the property forces a replace.
    #[must_use]
    pub fn requires_replace(&self, property: &str) -> bool {
        self.replace_triggering.iter().any(|p| p == property)
    }
}

/// Registry of known resource types.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<String, TypeDef>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            types: HashMap::new(),
        }
    }

    /// Registers a type definition, replacing any previous one.
    pub fn register(&mut self, def: TypeDef) {
        self.types.insert(def.name.clone(), def);
    }

    /// Looks up a type definition.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    /// Returns true if the type is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Returns a registry pre-populated with the builtin network topology
    /// types (network, subnet, gateways, route tables, security groups,
    /// compute instances).
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();

        registry.register(
            TypeDef::new("network")
                .with_required(&["cidr_block"])
                .with_optional(&["tags"])
                .with_replace_on(&["cidr_block"])
                .with_outputs(&["id"]),
        );
        registry.register(
            TypeDef::new("subnet")
                .with_required(&["network_id", "cidr_block", "availability_zone"])
                .with_optional(&["map_public_ip", "tags"])
                .with_replace_on(&["network_id", "cidr_block", "availability_zone"])
                .with_outputs(&["id"]),
        );
        registry.register(
            TypeDef::new("internet_gateway")
                .with_required(&["network_id"])
                .with_optional(&["tags"])
                .with_replace_on(&["network_id"])
                .with_outputs(&["id"]),
        );
        registry.register(
            TypeDef::new("route_table")
                .with_required(&["network_id"])
                .with_optional(&["tags"])
                .with_replace_on(&["network_id"])
                .with_outputs(&["id"]),
        );
        registry.register(
            TypeDef::new("route")
                .with_required(&["route_table_id", "destination_cidr_block"])
                .with_optional(&["gateway_id", "nat_gateway_id"])
                .with_replace_on(&["route_table_id", "destination_cidr_block"])
                .with_outputs(&["id"]),
        );
        registry.register(
            TypeDef::new("route_table_association")
                .with_required(&["subnet_id", "route_table_id"])
                .with_replace_on(&["subnet_id", "route_table_id"])
                .with_outputs(&["id"]),
        );
        registry.register(
            TypeDef::new("elastic_ip")
                .with_optional(&["tags"])
                .with_outputs(&["id", "public_ip"]),
        );
        registry.register(
            TypeDef::new("nat_gateway")
                .with_required(&["subnet_id", "allocation_id"])
                .with_optional(&["tags"])
                .with_replace_on(&["subnet_id", "allocation_id"])
                .with_outputs(&["id"]),
        );
        registry.register(
            TypeDef::new("security_group")
                .with_required(&["network_id"])
                .with_optional(&["description", "ingress", "egress", "tags"])
                .with_replace_on(&["network_id"])
                .with_outputs(&["id"]),
        );
        registry.register(
            TypeDef::new("compute_instance")
                .with_required(&["instance_type", "ami", "subnet_id"])
                .with_optional(&[
                    "security_group_ids",
                    "key_name",
                    "associate_public_ip",
                    "user_data",
                    "tags",
                ])
                .with_replace_on(&["ami", "subnet_id"])
                .with_outputs(&["id", "public_ip", "private_ip"]),
        );

        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_types_present() {
        let registry = TypeRegistry::builtin();
        for name in [
            "network",
            "subnet",
            "internet_gateway",
            "route_table",
            "route",
            "route_table_association",
            "elastic_ip",
            "nat_gateway",
            "security_group",
            "compute_instance",
        ] {
            assert!(registry.contains(name), "missing builtin type {name}");
        }
    }

    #[test]
    fn test_replace_triggering_lookup() {
        let registry = TypeRegistry::builtin();
        let subnet = registry.get("subnet").expect("subnet type");

        assert!(subnet.requires_replace("availability_zone"));
        assert!(subnet.requires_replace("cidr_block"));
        assert!(!subnet.requires_replace("map_public_ip"));
        assert!(!subnet.requires_replace("tags"));
    }

    #[test]
    fn test_instance_type_updates_in_place() {
        let registry = TypeRegistry::builtin();
        let instance = registry.get("compute_instance").expect("instance type");

        assert!(!instance.requires_replace("instance_type"));
        assert!(instance.requires_replace("ami"));
        assert!(instance.requires_replace("subnet_id"));
    }

    #[test]
    fn test_custom_type_registration() {
        let mut registry = TypeRegistry::new();
        registry.register(
            TypeDef::new("dns_record")
                .with_required(&["zone", "name"])
                .with_replace_on(&["zone"])
                .with_outputs(&["fqdn"]),
        );

        let def = registry.get("dns_record").expect("registered type");
        assert!(def.allows("zone"));
        assert!(!def.allows("ttl"));
        assert!(def.requires_replace("zone"));
    }
}
