//! In-memory state store for tests and embedding.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Result;

use super::record::{StateRecord, StateSnapshot};
use super::store::StateStore;

/// In-memory state store.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: Mutex<HashMap<String, StateRecord>>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a store pre-seeded with records.
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = StateRecord>) -> Self {
        Self {
            records: Mutex::new(
                records
                    .into_iter()
                    .map(|r| (r.id.clone(), r))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<StateSnapshot> {
        let records = self.records.lock().await;
        Ok(StateSnapshot::from_records(records.clone()))
    }

    async fn save(&self, record: &StateRecord) -> Result<()> {
        let mut records = self.records.lock().await;
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let mut records = self.records.lock().await;
        records.remove(id);
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_load_remove() {
        let store = MemoryStateStore::new();

        let record = StateRecord::new("my-vpc", "network", "abc");
        store.save(&record).await.expect("save should succeed");

        let snapshot = store.load().await.expect("load should succeed");
        assert!(snapshot.contains("my-vpc"));

        store.remove("my-vpc").await.expect("remove should succeed");
        let snapshot = store.load().await.expect("load should succeed");
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_is_point_in_time() {
        let store = MemoryStateStore::new();
        let snapshot = store.load().await.expect("load should succeed");

        store
            .save(&StateRecord::new("my-vpc", "network", "abc"))
            .await
            .expect("save should succeed");

        // The earlier snapshot must not see the later write.
        assert!(snapshot.is_empty());
    }
}
