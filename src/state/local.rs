//! Local file-based state storage backend.
//!
//! Stores every record in a single JSON document. Writes go through a
//! temp-file-plus-rename so a crash mid-write can never corrupt the
//! previous state, and an internal mutex serializes concurrent per-resource
//! saves from the worker pool.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{ConvergeError, Result, StateError};

use super::record::{StateRecord, StateSnapshot, STATE_VERSION};
use super::store::StateStore;

/// On-disk representation of the state file.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    version: String,
    records: HashMap<String, StateRecord>,
}

/// Local file-based state store.
#[derive(Debug)]
pub struct LocalStateStore {
    state_path: PathBuf,
    write_guard: Mutex<()>,
}

impl LocalStateStore {
    /// Creates a store backed by the given state file path.
    #[must_use]
    pub fn new(state_path: impl Into<PathBuf>) -> Self {
        Self {
            state_path: state_path.into(),
            write_guard: Mutex::new(()),
        }
    }

    /// Returns the path of the backing state file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.state_path
    }

    async fn read_all(&self) -> Result<HashMap<String, StateRecord>> {
        if !self.state_path.exists() {
            debug!("State file does not exist: {}", self.state_path.display());
            return Ok(HashMap::new());
        }

        let content = fs::read_to_string(&self.state_path).await.map_err(|e| {
            ConvergeError::State(StateError::Corrupted {
                message: format!("Failed to read state file: {e}"),
            })
        })?;

        let persisted: PersistedState = serde_json::from_str(&content).map_err(|e| {
            ConvergeError::State(StateError::Corrupted {
                message: format!("Failed to parse state file: {e}"),
            })
        })?;

        Ok(persisted.records)
    }

    async fn write_all(&self, records: HashMap<String, StateRecord>) -> Result<()> {
        if let Some(parent) = self.state_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                ConvergeError::State(StateError::backend(format!(
                    "Failed to create state directory: {e}"
                )))
            })?;
        }

        let persisted = PersistedState {
            version: STATE_VERSION.to_string(),
            records,
        };
        let content = serde_json::to_string_pretty(&persisted).map_err(|e| {
            ConvergeError::State(StateError::serialization(format!(
                "Failed to serialize state: {e}"
            )))
        })?;

        // Write to a temporary file first, then rename for atomicity
        let temp_path = self.state_path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            ConvergeError::State(StateError::backend(format!(
                "Failed to create temp state file: {e}"
            )))
        })?;

        file.write_all(content.as_bytes()).await.map_err(|e| {
            ConvergeError::State(StateError::backend(format!(
                "Failed to write state file: {e}"
            )))
        })?;

        file.sync_all().await.map_err(|e| {
            ConvergeError::State(StateError::backend(format!(
                "Failed to sync state file: {e}"
            )))
        })?;

        fs::rename(&temp_path, &self.state_path).await.map_err(|e| {
            ConvergeError::State(StateError::backend(format!(
                "Failed to rename state file: {e}"
            )))
        })?;

        debug!("State saved to {}", self.state_path.display());
        Ok(())
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<StateSnapshot> {
        info!("Loading state from: {}", self.state_path.display());
        let records = self.read_all().await?;
        Ok(StateSnapshot::from_records(records))
    }

    async fn save(&self, record: &StateRecord) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        let mut records = self.read_all().await?;
        records.insert(record.id.clone(), record.clone());
        self.write_all(records).await
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        let mut records = self.read_all().await?;
        if records.remove(id).is_some() {
            self.write_all(records).await?;
        }
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (LocalStateStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::new(temp_dir.path().join("state.json"));
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, _temp) = create_test_store();

        let record = StateRecord::new("my-vpc", "network", "abc123");
        store.save(&record).await.expect("Failed to save record");

        let snapshot = store.load().await.expect("Failed to load state");
        let loaded = snapshot.get("my-vpc").expect("Record should exist");
        assert_eq!(loaded.type_name, "network");
        assert_eq!(loaded.spec_hash, "abc123");
    }

    #[tokio::test]
    async fn test_load_nonexistent_is_empty() {
        let (store, _temp) = create_test_store();
        let snapshot = store.load().await.expect("Load should not fail");
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_remove() {
        let (store, _temp) = create_test_store();

        store
            .save(&StateRecord::new("my-vpc", "network", "abc"))
            .await
            .expect("Failed to save record");
        store.remove("my-vpc").await.expect("Failed to remove");

        let snapshot = store.load().await.expect("Failed to load state");
        assert!(!snapshot.contains("my-vpc"));
    }

    #[tokio::test]
    async fn test_saves_accumulate() {
        let (store, _temp) = create_test_store();

        store
            .save(&StateRecord::new("my-vpc", "network", "a"))
            .await
            .expect("save vpc");
        store
            .save(&StateRecord::new("public-subnet", "subnet", "b"))
            .await
            .expect("save subnet");

        let snapshot = store.load().await.expect("Failed to load state");
        assert_eq!(snapshot.len(), 2);
    }

    #[tokio::test]
    async fn test_version_written() {
        let (store, _temp) = create_test_store();
        store
            .save(&StateRecord::new("my-vpc", "network", "a"))
            .await
            .expect("save vpc");

        let content = tokio::fs::read_to_string(store.path())
            .await
            .expect("read state file");
        let parsed: serde_json::Value = serde_json::from_str(&content).expect("parse");
        assert_eq!(parsed["version"], STATE_VERSION);
    }
}
