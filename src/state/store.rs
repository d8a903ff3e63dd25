//! State store trait definition.
//!
//! This module defines the common interface for state storage backends.
//! Reads happen once, at plan time; writes happen once per resource,
//! immediately after that resource's apply finishes, each performed by the
//! single worker applying it.

use async_trait::async_trait;

use crate::error::Result;

use super::record::{StateRecord, StateSnapshot};

/// Trait for state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads a snapshot of all records.
    async fn load(&self) -> Result<StateSnapshot>;

    /// Saves a single record, keyed by its logical id.
    async fn save(&self, record: &StateRecord) -> Result<()>;

    /// Removes the record for a logical id, if present.
    async fn remove(&self, id: &str) -> Result<()>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl StateStore for Box<dyn StateStore> {
    async fn load(&self) -> Result<StateSnapshot> {
        (**self).load().await
    }

    async fn save(&self, record: &StateRecord) -> Result<()> {
        (**self).save(record).await
    }

    async fn remove(&self, id: &str) -> Result<()> {
        (**self).remove(id).await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}
