//! Secret references and apply-time resolution.
//!
//! Secrets are never inlined in resource specifications, state records, or
//! logs. A spec carries a [`SecretRef`] naming a key in an external secret
//! store; the scheduler resolves it through a [`SecretResolver`] just
//! before the provider call, and the resolved value lives only inside a
//! redacting [`SecretString`].

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ConvergeError, Result, SecretError};

/// A reference to a secret held in an external secret store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecretRef {
    /// Key identifying the secret (e.g. `db/appuser_password`).
    pub key: String,
}

impl SecretRef {
    /// Creates a new secret reference.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// A resolved secret value that redacts itself everywhere except
/// [`SecretString::expose`].
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    /// Wraps a resolved secret value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the underlying secret value.
    ///
    /// The only way to get at the plaintext; call sites are easy to audit.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretString(***)")
    }
}

impl std::fmt::Display for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "***")
    }
}

impl Serialize for SecretString {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        // Redacted on purpose: a SecretString must never reach disk intact.
        serializer.serialize_str("***")
    }
}

/// Trait for resolving secret references at apply time.
#[async_trait]
pub trait SecretResolver: Send + Sync {
    /// Resolves a secret reference into its value.
    async fn resolve(&self, secret: &SecretRef) -> Result<SecretString>;

    /// Gets the resolver backend name.
    fn backend_type(&self) -> &'static str;
}

/// Secret resolver backed by process environment variables.
///
/// The secret key is used verbatim as the variable name.
#[derive(Debug, Default)]
pub struct EnvSecretResolver;

impl EnvSecretResolver {
    /// Creates a new environment-backed resolver.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SecretResolver for EnvSecretResolver {
    async fn resolve(&self, secret: &SecretRef) -> Result<SecretString> {
        std::env::var(&secret.key)
            .map(SecretString::new)
            .map_err(|_| {
                ConvergeError::Secret(SecretError::NotFound {
                    key: secret.key.clone(),
                })
            })
    }

    fn backend_type(&self) -> &'static str {
        "env"
    }
}

/// In-memory secret resolver for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySecretResolver {
    values: HashMap<String, String>,
}

impl MemorySecretResolver {
    /// Creates an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// Adds a secret value.
    #[must_use]
    pub fn with_secret(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl SecretResolver for MemorySecretResolver {
    async fn resolve(&self, secret: &SecretRef) -> Result<SecretString> {
        self.values
            .get(&secret.key)
            .map(SecretString::new)
            .ok_or_else(|| {
                ConvergeError::Secret(SecretError::NotFound {
                    key: secret.key.clone(),
                })
            })
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_string_redacts_debug_and_display() {
        let secret = SecretString::new("hunter2");
        assert_eq!(format!("{secret:?}"), "SecretString(***)");
        assert_eq!(secret.to_string(), "***");
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn test_secret_string_redacts_serialization() {
        let secret = SecretString::new("hunter2");
        let encoded = serde_json::to_string(&secret).expect("serialize");
        assert_eq!(encoded, "\"***\"");
    }

    #[tokio::test]
    async fn test_memory_resolver() {
        let resolver = MemorySecretResolver::new().with_secret("db/password", "s3cr3t");

        let resolved = resolver
            .resolve(&SecretRef::new("db/password"))
            .await
            .expect("secret should resolve");
        assert_eq!(resolved.expose(), "s3cr3t");

        let missing = resolver.resolve(&SecretRef::new("db/missing")).await;
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn test_env_resolver_reads_environment() {
        // PATH is guaranteed present; a bogus name is guaranteed absent.
        let resolver = EnvSecretResolver::new();
        assert!(resolver.resolve(&SecretRef::new("PATH")).await.is_ok());
        assert!(resolver
            .resolve(&SecretRef::new("CONVERGE_TEST_NO_SUCH_VAR"))
            .await
            .is_err());
    }
}
