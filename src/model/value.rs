//! Property values and references.
//!
//! A property value is either a literal, a reference to another resource's
//! output, a secret reference, or a nested list/map of values. References
//! are what the graph builder mines for implicit dependency edges, and what
//! the scheduler resolves into concrete values once the referenced resource
//! has been applied.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ConvergeError, Result, SecretError};
use crate::secret::{SecretRef, SecretString};

use super::resource::Outputs;

/// A reference to another resource's output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    /// Logical id of the referenced resource.
    pub resource: String,
    /// Name of the referenced output (e.g. `id`, `public_ip`).
    pub output: String,
}

impl Reference {
    /// Creates a new reference.
    #[must_use]
    pub fn new(resource: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            output: output.into(),
        }
    }
}

/// A desired property value in a resource specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    /// A plain JSON literal.
    Literal(Value),
    /// Another resource's output; unresolved until that resource is applied.
    Ref(Reference),
    /// A secret resolved from an external secret store at apply time.
    Secret(SecretRef),
    /// A list of values (each element may itself be a reference).
    List(Vec<PropertyValue>),
    /// A string-keyed map of values.
    Map(BTreeMap<String, PropertyValue>),
}

impl PropertyValue {
    /// Creates a string literal.
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::Literal(Value::String(value.into()))
    }

    /// Creates a boolean literal.
    #[must_use]
    pub const fn boolean(value: bool) -> Self {
        Self::Literal(Value::Bool(value))
    }

    /// Creates an integer literal.
    #[must_use]
    pub fn number(value: i64) -> Self {
        Self::Literal(Value::Number(value.into()))
    }

    /// Creates a reference to another resource's output.
    #[must_use]
    pub fn reference(resource: impl Into<String>, output: impl Into<String>) -> Self {
        Self::Ref(Reference::new(resource, output))
    }

    /// Creates a secret reference.
    #[must_use]
    pub fn secret(key: impl Into<String>) -> Self {
        Self::Secret(SecretRef::new(key))
    }

    /// Creates a list value.
    #[must_use]
    pub fn list(items: impl IntoIterator<Item = Self>) -> Self {
        Self::List(items.into_iter().collect())
    }

    /// Creates a map value.
    #[must_use]
    pub fn map(entries: impl IntoIterator<Item = (String, Self)>) -> Self {
        Self::Map(entries.into_iter().collect())
    }

    /// Collects every reference in this value, including nested ones.
    #[must_use]
    pub fn references(&self) -> Vec<&Reference> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Self::Ref(reference) => out.push(reference),
            Self::List(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            Self::Map(entries) => {
                for value in entries.values() {
                    value.collect_references(out);
                }
            }
            Self::Literal(_) | Self::Secret(_) => {}
        }
    }

    /// Collects every secret reference in this value, including nested ones.
    #[must_use]
    pub fn secret_refs(&self) -> Vec<&SecretRef> {
        let mut refs = Vec::new();
        self.collect_secret_refs(&mut refs);
        refs
    }

    fn collect_secret_refs<'a>(&'a self, out: &mut Vec<&'a SecretRef>) {
        match self {
            Self::Secret(secret) => out.push(secret),
            Self::List(items) => {
                for item in items {
                    item.collect_secret_refs(out);
                }
            }
            Self::Map(entries) => {
                for value in entries.values() {
                    value.collect_secret_refs(out);
                }
            }
            Self::Literal(_) | Self::Ref(_) => {}
        }
    }

    /// Resolves this value into a concrete JSON value.
    ///
    /// References are substituted from `outputs` (logical id -> outputs of
    /// an applied resource) and secrets from the pre-resolved `secrets` map.
    ///
    /// # Errors
    ///
    /// Returns an error if a referenced output or secret is unavailable.
    /// The scheduler only dispatches a resource once all of its dependencies
    /// are applied, so a missing output here is an internal invariant
    /// violation rather than a user error.
    pub fn resolve(
        &self,
        outputs: &HashMap<String, Outputs>,
        secrets: &HashMap<String, SecretString>,
    ) -> Result<Value> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Ref(reference) => outputs
                .get(&reference.resource)
                .and_then(|o| o.get(&reference.output))
                .cloned()
                .ok_or_else(|| {
                    ConvergeError::internal(format!(
                        "output '{}.{}' is not available for resolution",
                        reference.resource, reference.output
                    ))
                }),
            Self::Secret(secret) => secrets
                .get(&secret.key)
                .map(|s| Value::String(s.expose().to_string()))
                .ok_or_else(|| {
                    ConvergeError::Secret(SecretError::NotFound {
                        key: secret.key.clone(),
                    })
                }),
            Self::List(items) => {
                let resolved: Result<Vec<Value>> = items
                    .iter()
                    .map(|item| item.resolve(outputs, secrets))
                    .collect();
                Ok(Value::Array(resolved?))
            }
            Self::Map(entries) => {
                let mut resolved = serde_json::Map::new();
                for (key, value) in entries {
                    resolved.insert(key.clone(), value.resolve(outputs, secrets)?);
                }
                Ok(Value::Object(resolved))
            }
        }
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.resource, self.output)
    }
}
