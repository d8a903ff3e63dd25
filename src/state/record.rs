//! Persisted state record types.
//!
//! A [`StateRecord`] captures the durable facts about one resource: the
//! spec that was last applied (kept symbolic, references and secret keys
//! unresolved), the outputs the provider returned, and the dependency ids
//! recorded so a later run can order orphan deletes without the original
//! stack.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{LifecycleState, Outputs, PropertyValue};

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Durable record of one resource's last-applied state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateRecord {
    /// Logical resource id.
    pub id: String,
    /// Type tag.
    pub type_name: String,
    /// Provider-assigned physical id, if the resource was ever created.
    pub physical_id: Option<String>,
    /// Hash of the last-applied spec, the diff engine's fast path.
    pub spec_hash: String,
    /// Last-applied desired properties, references left symbolic. Secret
    /// values are represented by their keys and never persisted resolved.
    pub properties: BTreeMap<String, PropertyValue>,
    /// Outputs returned by the provider on the last successful apply.
    pub outputs: Outputs,
    /// Logical ids this resource depended on when applied.
    pub dependencies: Vec<String>,
    /// Lifecycle status at the time of the last write.
    pub status: LifecycleState,
    /// When the record was first written.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl StateRecord {
    /// Creates a new record for a resource that is about to be applied.
    #[must_use]
    pub fn new(id: &str, type_name: &str, spec_hash: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            type_name: type_name.to_string(),
            physical_id: None,
            spec_hash: spec_hash.to_string(),
            properties: BTreeMap::new(),
            outputs: Outputs::new(),
            dependencies: Vec::new(),
            status: LifecycleState::Planned,
            created_at: now,
            updated_at: now,
        }
    }

    /// Records a successful apply.
    pub fn mark_applied(&mut self, physical_id: Option<String>, outputs: Outputs) {
        self.physical_id = physical_id;
        self.outputs = outputs;
        self.status = LifecycleState::Applied;
        self.updated_at = Utc::now();
    }

    /// Records a terminal failure.
    pub fn mark_failed(&mut self) {
        self.status = LifecycleState::Failed;
        self.updated_at = Utc::now();
    }

    /// Returns true if the resource was live at the last write.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self.status, LifecycleState::Applied)
    }
}

/// Point-in-time view of every record in the store.
///
/// Taken once at plan time, before any worker starts; workers never read
/// the store again during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Records keyed by logical resource id.
    pub records: HashMap<String, StateRecord>,
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
}

impl StateSnapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            records: HashMap::new(),
            taken_at: Utc::now(),
        }
    }

    /// Creates a snapshot from a record map.
    #[must_use]
    pub fn from_records(records: HashMap<String, StateRecord>) -> Self {
        Self {
            records,
            taken_at: Utc::now(),
        }
    }

    /// Looks up a record by logical id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&StateRecord> {
        self.records.get(id)
    }

    /// Returns true if a record exists for the id.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the snapshot holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_mark_applied_updates_status_and_outputs() {
        let mut record = StateRecord::new("my-vpc", "network", "abc123");
        assert!(!record.is_live());

        let mut outputs = Outputs::new();
        outputs.insert(String::from("id"), Value::String(String::from("vpc-1")));
        record.mark_applied(Some(String::from("vpc-1")), outputs);

        assert!(record.is_live());
        assert_eq!(record.physical_id.as_deref(), Some("vpc-1"));
        assert_eq!(
            record.outputs.get("id"),
            Some(&Value::String(String::from("vpc-1")))
        );
    }

    #[test]
    fn test_record_round_trips_through_json() {
        let mut record = StateRecord::new("public-subnet", "subnet", "deadbeef");
        record.properties.insert(
            String::from("network_id"),
            PropertyValue::reference("my-vpc", "id"),
        );
        record.dependencies.push(String::from("my-vpc"));

        let encoded = serde_json::to_string(&record).expect("serialize");
        let decoded: StateRecord = serde_json::from_str(&encoded).expect("deserialize");

        assert_eq!(decoded.id, "public-subnet");
        assert_eq!(decoded.dependencies, vec!["my-vpc"]);
        assert_eq!(
            decoded.properties.get("network_id"),
            Some(&PropertyValue::reference("my-vpc", "id"))
        );
    }
}
