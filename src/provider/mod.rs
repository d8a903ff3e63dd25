//! Provider abstraction for resource CRUD.
//!
//! The engine never talks to a cloud API directly; it drives a [`Provider`]
//! supplied by the surrounding infrastructure. Each call receives a
//! read-only [`ProviderContext`] (account, region, default tags) so no
//! provider needs ambient global state.
//!
//! `create` and `update` are synchronous-to-completion: they return only
//! once the resource is fully usable, including any provider-side readiness
//! polling, bounded by the provider's own timeout
//! ([`ProviderError::ReadyTimeout`] when exceeded). That keeps the
//! scheduler's suspension points well-defined: a worker blocks on exactly
//! one provider call at a time.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProviderError;
use crate::model::Outputs;

mod memory;

pub use memory::MemoryProvider;

/// Read-only context passed into every provider call.
#[derive(Debug, Clone, Default)]
pub struct ProviderContext {
    /// Account identifier the run operates in.
    pub account_id: String,
    /// Region the run operates in.
    pub region: String,
    /// Tags the provider should stamp on every created resource.
    pub default_tags: BTreeMap<String, String>,
}

impl ProviderContext {
    /// Creates a new context.
    #[must_use]
    pub fn new(account_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            region: region.into(),
            default_tags: BTreeMap::new(),
        }
    }

    /// Adds a default tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_tags.insert(key.into(), value.into());
        self
    }
}

/// A resource specification with every reference and secret resolved to a
/// concrete JSON value; the only form a provider ever sees.
#[derive(Debug, Clone)]
pub struct ResolvedSpec {
    /// Logical resource id (for logging and tagging).
    pub id: String,
    /// Type tag.
    pub type_name: String,
    /// Fully resolved properties.
    pub properties: BTreeMap<String, Value>,
}

/// Result type for provider operations, classified for retry.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Trait implemented by resource providers.
///
/// Outputs returned by `create` and `update` must include an `id` entry
/// holding the physical resource id.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Creates a resource and blocks until it is ready.
    async fn create(&self, spec: &ResolvedSpec, ctx: &ProviderContext) -> ProviderResult<Outputs>;

    /// Reads the current outputs of a resource, or `None` if it is gone.
    async fn read(
        &self,
        type_name: &str,
        physical_id: &str,
        ctx: &ProviderContext,
    ) -> ProviderResult<Option<Outputs>>;

    /// Updates a live resource in place and blocks until it is ready.
    async fn update(
        &self,
        physical_id: &str,
        spec: &ResolvedSpec,
        ctx: &ProviderContext,
    ) -> ProviderResult<Outputs>;

    /// Deletes a resource.
    async fn delete(
        &self,
        type_name: &str,
        physical_id: &str,
        ctx: &ProviderContext,
    ) -> ProviderResult<()>;

    /// Gets the provider name.
    fn name(&self) -> &'static str;
}
