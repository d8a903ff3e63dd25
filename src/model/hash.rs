//! Spec hashing for change detection.
//!
//! Provides deterministic hashing of resource specifications. The hash is
//! stored in each state record and lets the diff engine classify an
//! unchanged resource as `NoOp` without a property-by-property comparison.

use sha2::{Digest, Sha256};

use super::stack::ResourceSpec;

/// Hasher for computing resource spec hashes.
#[derive(Debug, Default)]
pub struct SpecHasher;

impl SpecHasher {
    /// Creates a new spec hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of a single resource specification.
    ///
    /// Properties are stored in a sorted map and serialized to canonical
    /// JSON, so the hash is stable across runs and property insertion
    /// order. Secret values never enter the hash (only their keys do).
    #[must_use]
    pub fn hash_spec(&self, spec: &ResourceSpec) -> String {
        let mut hasher = Sha256::new();

        hasher.update(spec.id.as_bytes());
        hasher.update(spec.type_name.as_bytes());

        // BTreeMap iteration order makes this canonical.
        let properties =
            serde_json::to_vec(&spec.properties).unwrap_or_default();
        hasher.update(&properties);

        let mut depends_on = spec.depends_on.clone();
        depends_on.sort_unstable();
        for dependency in &depends_on {
            hasher.update(dependency.as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(hash: &str) -> String {
        hash.chars().take(8).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PropertyValue;

    fn subnet() -> ResourceSpec {
        ResourceSpec::new("public-subnet", "subnet")
            .with_property("network_id", PropertyValue::reference("my-vpc", "id"))
            .with_property("cidr_block", PropertyValue::string("10.0.1.0/24"))
            .with_property("availability_zone", PropertyValue::string("ap-southeast-1a"))
    }

    #[test]
    fn test_hash_deterministic() {
        let hasher = SpecHasher::new();
        assert_eq!(hasher.hash_spec(&subnet()), hasher.hash_spec(&subnet()));
    }

    #[test]
    fn test_hash_changes_with_property() {
        let hasher = SpecHasher::new();
        let changed = subnet()
            .with_property("availability_zone", PropertyValue::string("ap-southeast-1b"));

        assert_ne!(hasher.hash_spec(&subnet()), hasher.hash_spec(&changed));
    }

    #[test]
    fn test_hash_changes_with_depends_on() {
        let hasher = SpecHasher::new();
        let changed = subnet().with_depends_on("nat-gateway");

        assert_ne!(hasher.hash_spec(&subnet()), hasher.hash_spec(&changed));
    }

    #[test]
    fn test_short_hash() {
        let short = SpecHasher::short_hash("abcdef1234567890");
        assert_eq!(short, "abcdef12");
    }
}
