//! In-memory provider for tests, dry-runs, and embedding.
//!
//! Simulates a resource backend: physical ids are generated per type,
//! outputs are shaped like the builtin topology types expect (addresses
//! for instances and elastic IPs), and failures can be injected per logical
//! resource id, either permanent or transient-for-n-calls.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::ProviderError;
use crate::model::Outputs;

use super::{Provider, ProviderContext, ProviderResult, ResolvedSpec};

/// A live simulated resource.
#[derive(Debug, Clone)]
struct LiveResource {
    type_name: String,
    properties: BTreeMap<String, Value>,
    outputs: Outputs,
}

/// Injected failure behavior for a logical resource id.
#[derive(Debug)]
enum FailureMode {
    /// Fail every call permanently.
    Permanent,
    /// Fail the next `n` calls with a transient error, then succeed.
    Transient(u32),
}

/// In-memory provider.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    live: Mutex<HashMap<String, LiveResource>>,
    failures: Mutex<HashMap<String, FailureMode>>,
    latency: Option<Duration>,
    calls: AtomicUsize,
    address_counter: AtomicU32,
}

impl MemoryProvider {
    /// Creates a new provider with no live resources.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds artificial latency to every call.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Injects a permanent failure for every call targeting the logical id.
    pub fn fail_permanently(&self, logical_id: impl Into<String>) {
        self.failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(logical_id.into(), FailureMode::Permanent);
    }

    /// Injects `times` transient failures for the logical id, after which
    /// calls succeed.
    pub fn fail_transiently(&self, logical_id: impl Into<String>, times: u32) {
        self.failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(logical_id.into(), FailureMode::Transient(times));
    }

    /// Returns the total number of provider calls made.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns the number of live resources.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }

    /// Returns true if a physical id is live.
    #[must_use]
    pub fn is_live(&self, physical_id: &str) -> bool {
        self.live.lock().unwrap_or_else(std::sync::PoisonError::into_inner).contains_key(physical_id)
    }

    async fn enter(&self, logical_id: &str) -> ProviderResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut failures = self.failures.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match failures.get_mut(logical_id) {
            Some(FailureMode::Permanent) => Err(ProviderError::InvalidProperty {
                property: String::from("injected"),
                message: format!("permanent failure injected for '{logical_id}'"),
            }),
            Some(FailureMode::Transient(remaining)) => {
                if *remaining == 0 {
                    Ok(())
                } else {
                    *remaining -= 1;
                    Err(ProviderError::Unavailable {
                        message: format!("transient failure injected for '{logical_id}'"),
                    })
                }
            }
            None => Ok(()),
        }
    }

    fn physical_id_for(type_name: &str) -> String {
        let prefix = match type_name {
            "network" => "vpc",
            "subnet" => "subnet",
            "internet_gateway" => "igw",
            "route_table" => "rtb",
            "route" => "r",
            "route_table_association" => "rtbassoc",
            "elastic_ip" => "eipalloc",
            "nat_gateway" => "nat",
            "security_group" => "sg",
            "compute_instance" => "i",
            other => other,
        };
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{prefix}-{}", &suffix[..12])
    }

    fn build_outputs(&self, spec: &ResolvedSpec, physical_id: &str) -> Outputs {
        let mut outputs = Outputs::new();
        outputs.insert(
            String::from("id"),
            Value::String(physical_id.to_string()),
        );

        match spec.type_name.as_str() {
            "elastic_ip" => {
                let n = self.address_counter.fetch_add(1, Ordering::SeqCst) % 254;
                outputs.insert(
                    String::from("public_ip"),
                    Value::String(format!("203.0.113.{}", n + 1)),
                );
            }
            "compute_instance" => {
                let n = self.address_counter.fetch_add(1, Ordering::SeqCst) % 254;
                outputs.insert(
                    String::from("private_ip"),
                    Value::String(format!("10.0.0.{}", n + 1)),
                );
                let public = spec
                    .properties
                    .get("associate_public_ip")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if public {
                    outputs.insert(
                        String::from("public_ip"),
                        Value::String(format!("198.51.100.{}", n + 1)),
                    );
                }
            }
            _ => {}
        }

        outputs
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    async fn create(&self, spec: &ResolvedSpec, _ctx: &ProviderContext) -> ProviderResult<Outputs> {
        self.enter(&spec.id).await?;

        let physical_id = Self::physical_id_for(&spec.type_name);
        let outputs = self.build_outputs(spec, &physical_id);

        debug!("memory provider: created {} as {physical_id}", spec.id);
        self.live.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(
            physical_id,
            LiveResource {
                type_name: spec.type_name.clone(),
                properties: spec.properties.clone(),
                outputs: outputs.clone(),
            },
        );

        Ok(outputs)
    }

    async fn read(
        &self,
        type_name: &str,
        physical_id: &str,
        _ctx: &ProviderContext,
    ) -> ProviderResult<Option<Outputs>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let live = self.live.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(live
            .get(physical_id)
            .filter(|r| r.type_name == type_name)
            .map(|r| r.outputs.clone()))
    }

    async fn update(
        &self,
        physical_id: &str,
        spec: &ResolvedSpec,
        _ctx: &ProviderContext,
    ) -> ProviderResult<Outputs> {
        self.enter(&spec.id).await?;

        let mut live = self.live.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(resource) = live.get_mut(physical_id) else {
            return Err(ProviderError::NotFound {
                physical_id: physical_id.to_string(),
            });
        };

        debug!("memory provider: updated {} ({physical_id})", spec.id);
        resource.properties = spec.properties.clone();
        Ok(resource.outputs.clone())
    }

    async fn delete(
        &self,
        _type_name: &str,
        physical_id: &str,
        _ctx: &ProviderContext,
    ) -> ProviderResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut live = self.live.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if live.remove(physical_id).is_none() {
            return Err(ProviderError::NotFound {
                physical_id: physical_id.to_string(),
            });
        }

        debug!("memory provider: deleted {physical_id}");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
