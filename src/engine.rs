//! Top-level engine wiring plan and apply.
//!
//! The engine owns the full pipeline: validate the stack, build and resolve
//! the dependency graph, snapshot the state store, diff, plan, and execute.
//! Validation failures abort the run before a single provider call is made;
//! execution failures produce a partial result that names the final state
//! of every resource, never a bare pass/fail.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ConvergeError, Result};
use crate::graph::{DependencyResolver, GraphBuilder, Resolution, ResourceGraph};
use crate::model::{Operation, Stack, StackValidator, TypeRegistry};
use crate::planner::{
    CancelFlag, DiffEngine, DiffResult, Plan, PlanExecutor, RetryPolicy, StepOutcome,
    DEFAULT_CONCURRENCY,
};
use crate::provider::{Provider, ProviderContext};
use crate::secret::{EnvSecretResolver, SecretResolver};
use crate::state::{StateSnapshot, StateStore};

/// Tunables for a run.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Worker pool size for independent branches.
    pub concurrency: usize,
    /// Retry policy for transient provider errors.
    pub retry: RetryPolicy,
    /// Context passed into every provider call.
    pub context: ProviderContext,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
            context: ProviderContext::default(),
        }
    }
}

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every resource reached its intended terminal state.
    Success,
    /// At least one resource failed or was skipped; others succeeded.
    PartialSuccess,
    /// Validation failed; no provider call was made.
    Aborted,
    /// The run was cancelled before completing.
    Cancelled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::PartialSuccess => "partial success",
            Self::Aborted => "aborted",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Final report for one resource.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceReport {
    /// The operation the plan chose for this resource.
    pub operation: Operation,
    /// The terminal outcome.
    pub outcome: StepOutcome,
    /// Error message for failures and skips.
    pub error: Option<String>,
    /// Provider attempts made.
    pub attempts: u32,
}

/// The result of a run: per-resource outcomes plus resolved exports.
#[derive(Debug, Serialize)]
pub struct RunReport {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// Name of the stack that was applied.
    pub stack: String,
    /// Overall status.
    pub status: RunStatus,
    /// Final state of every resource the run touched.
    pub resources: BTreeMap<String, ResourceReport>,
    /// Declared exports resolved from applied outputs.
    pub exports: BTreeMap<String, Value>,
    /// Abort reason, when validation failed.
    pub error: Option<String>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Looks up a resource's outcome.
    #[must_use]
    pub fn outcome_of(&self, id: &str) -> Option<StepOutcome> {
        self.resources.get(id).map(|r| r.outcome)
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Run {} ({}): {}", self.run_id, self.stack, self.status)?;
        for (id, report) in &self.resources {
            write!(f, "  {id}: {} -> {}", report.operation, report.outcome)?;
            if let Some(error) = &report.error {
                write!(f, " ({error})")?;
            }
            writeln!(f)?;
        }
        if let Some(error) = &self.error {
            writeln!(f, "  error: {error}")?;
        }
        Ok(())
    }
}

/// The plan phase's output, for callers that want a preview.
#[derive(Debug)]
pub struct PlannedRun {
    /// The computed diff.
    pub diff: DiffResult,
    /// The executable plan.
    pub plan: Plan,
    /// Resource ids in application order.
    pub order: Vec<String>,
}

/// Everything apply needs, produced by the shared plan phase.
struct Prepared {
    graph: ResourceGraph,
    resolution: Resolution,
    snapshot: StateSnapshot,
    diff: DiffResult,
    plan: Plan,
}

/// The provisioning engine.
pub struct Engine {
    registry: TypeRegistry,
    provider: Arc<dyn Provider>,
    store: Arc<dyn StateStore>,
    secrets: Arc<dyn SecretResolver>,
    options: EngineOptions,
}

impl Engine {
    /// Creates an engine with the builtin type registry, environment-backed
    /// secrets, and default options.
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>, store: Arc<dyn StateStore>) -> Self {
        Self {
            registry: TypeRegistry::builtin(),
            provider,
            store,
            secrets: Arc::new(EnvSecretResolver::new()),
            options: EngineOptions::default(),
        }
    }

    /// Replaces the type registry.
    #[must_use]
    pub fn with_registry(mut self, registry: TypeRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replaces the secret resolver.
    #[must_use]
    pub fn with_secret_resolver(mut self, secrets: Arc<dyn SecretResolver>) -> Self {
        self.secrets = secrets;
        self
    }

    /// Replaces the run options.
    #[must_use]
    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Computes the plan for a stack without touching the provider.
    ///
    /// # Errors
    ///
    /// Returns a validation error for invalid stacks, or a state error if
    /// the snapshot cannot be loaded.
    pub async fn plan(&self, stack: &Stack) -> Result<PlannedRun> {
        let prepared = self.prepare(stack).await?;
        let order = prepared
            .resolution
            .ordered_ids(&prepared.graph)
            .into_iter()
            .map(ToString::to_string)
            .collect();

        Ok(PlannedRun {
            diff: prepared.diff,
            plan: prepared.plan,
            order,
        })
    }

    /// Applies a stack to completion.
    ///
    /// # Errors
    ///
    /// Returns an error for state-store or internal faults. Validation
    /// failures are reported as an [`RunStatus::Aborted`] report, and
    /// per-resource provider failures as [`RunStatus::PartialSuccess`].
    pub async fn apply(&self, stack: &Stack) -> Result<RunReport> {
        self.apply_with_cancel(stack, &CancelFlag::new()).await
    }

    /// Applies a stack, honoring a cancellation flag.
    ///
    /// # Errors
    ///
    /// Same contract as [`Engine::apply`].
    pub async fn apply_with_cancel(
        &self,
        stack: &Stack,
        cancel: &CancelFlag,
    ) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!("Starting run {run_id} for stack '{}'", stack.name);

        let prepared = match self.prepare(stack).await {
            Ok(prepared) => prepared,
            Err(ConvergeError::Validation(e)) => {
                warn!("Run {run_id} aborted: {e}");
                return Ok(RunReport {
                    run_id,
                    stack: stack.name.clone(),
                    status: RunStatus::Aborted,
                    resources: BTreeMap::new(),
                    exports: BTreeMap::new(),
                    error: Some(e.to_string()),
                    started_at,
                    finished_at: Utc::now(),
                });
            }
            Err(e) => return Err(e),
        };

        let executor = PlanExecutor::new(
            Arc::clone(&self.provider),
            Arc::clone(&self.store),
            Arc::clone(&self.secrets),
            self.options.context.clone(),
        )
        .with_concurrency(self.options.concurrency)
        .with_retry(self.options.retry);

        let execution = executor
            .execute_with_cancel(
                &prepared.plan,
                stack,
                &prepared.graph,
                &prepared.snapshot,
                cancel,
            )
            .await?;

        // Fold step results into per-resource reports; replaces contribute
        // two steps for one resource.
        let mut resources: BTreeMap<String, ResourceReport> = BTreeMap::new();
        for result in &execution.results {
            let operation = prepared
                .diff
                .get(&result.resource_id)
                .map_or(result.operation, |d| d.operation);

            let entry = resources
                .entry(result.resource_id.clone())
                .or_insert_with(|| ResourceReport {
                    operation,
                    outcome: result.outcome,
                    error: result.error.clone(),
                    attempts: result.attempts,
                });

            entry.attempts = entry.attempts.max(result.attempts);
            if result.deposed {
                match result.outcome {
                    StepOutcome::Failed => {
                        entry.outcome = StepOutcome::Failed;
                        entry.error = result.error.clone();
                    }
                    StepOutcome::Skipped if entry.outcome == StepOutcome::Applied => {
                        // The successor is live; only the cleanup was cut
                        // short. Surface it without failing the resource.
                        entry.error =
                            Some(String::from("deposed instance was not removed"));
                    }
                    _ => {}
                }
            } else {
                entry.outcome = result.outcome;
                entry.error = result.error.clone();
            }
        }

        let mut exports = BTreeMap::new();
        for (name, reference) in &stack.exports {
            if let Some(value) = execution
                .outputs
                .get(&reference.resource)
                .and_then(|outputs| outputs.get(&reference.output))
            {
                exports.insert(name.clone(), value.clone());
            }
        }

        let status = if execution.cancelled {
            RunStatus::Cancelled
        } else if execution.success {
            RunStatus::Success
        } else {
            RunStatus::PartialSuccess
        };

        let report = RunReport {
            run_id,
            stack: stack.name.clone(),
            status,
            resources,
            exports,
            error: None,
            started_at,
            finished_at: Utc::now(),
        };
        info!("Run {run_id} finished: {}", report.status);
        Ok(report)
    }

    /// The shared plan phase: validate, graph, resolve, snapshot, diff.
    async fn prepare(&self, stack: &Stack) -> Result<Prepared> {
        StackValidator::new(&self.registry).validate(stack)?;

        let graph = GraphBuilder::new().build(stack)?;
        let resolution = DependencyResolver::new().resolve(&graph)?;

        let snapshot = self.store.load().await?;
        let diff = DiffEngine::new(&self.registry).compute_diff(
            stack,
            &graph,
            &resolution,
            &snapshot,
        );
        let plan = Plan::from_diff(&diff, stack, &graph, &resolution, &snapshot);

        Ok(Prepared {
            graph,
            resolution,
            snapshot,
            diff,
            plan,
        })
    }
}
