//! Execution scheduler for applying plans.
//!
//! Drives a plan against the provider with a bounded worker pool:
//! independent branches of the dependency graph proceed concurrently while
//! chains stay strictly serialized. A step is dispatched only when every
//! step it depends on has completed successfully; on failure all transitive
//! dependents are skipped without being attempted while unrelated branches
//! run to completion. Each resource's state record is written immediately
//! after its apply finishes, so partial progress survives a failed run.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{ConvergeError, ExecError, ProviderError, Result};
use crate::graph::ResourceGraph;
use crate::model::{
    LifecycleState, Operation, Outputs, PropertyValue, Resource, SpecHasher, Stack,
};
use crate::provider::{Provider, ProviderContext, ResolvedSpec};
use crate::secret::{SecretResolver, SecretString};
use crate::state::{StateRecord, StateSnapshot, StateStore};

use super::plan::{Plan, PlanStep};

/// Default worker pool size.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Retry policy for transient provider errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum attempts per step, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each attempt.
    pub base_delay: Duration,
    /// Upper bound on the computed backoff.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Computes the backoff delay after a given attempt number (1-based).
    ///
    /// A provider-supplied hint (e.g. a rate-limit retry-after) wins when it
    /// is longer than the exponential backoff.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, hint_secs: Option<u64>) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let backoff = self
            .base_delay
            .saturating_mul(1 << exponent)
            .min(self.max_delay);
        hint_secs.map_or(backoff, |secs| backoff.max(Duration::from_secs(secs)))
    }
}

/// Cooperative cancellation flag for a run.
///
/// Cancelling lets in-flight provider calls finish (half-created resources
/// must still be recorded) but prevents any new step from starting.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Creates a new, unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Terminal outcome of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    /// The provider call succeeded and outputs are recorded.
    Applied,
    /// The resource was deleted (or already gone).
    Deleted,
    /// Nothing needed doing.
    Unchanged,
    /// The provider call failed terminally.
    Failed,
    /// Never attempted because a dependency did not complete.
    Skipped,
    /// Never attempted because the run was cancelled.
    Cancelled,
}

impl StepOutcome {
    /// Returns true for outcomes that unblock dependent steps.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Applied | Self::Deleted | Self::Unchanged)
    }
}

impl std::fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Applied => "applied",
            Self::Deleted => "deleted",
            Self::Unchanged => "unchanged",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Result of executing a single step.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// Step index within the plan.
    pub step: usize,
    /// Logical resource id.
    pub resource_id: String,
    /// Operation the step performed (or would have performed).
    pub operation: Operation,
    /// True for the deposed half of a replace.
    pub deposed: bool,
    /// Terminal outcome.
    pub outcome: StepOutcome,
    /// Error message for failures and skips.
    pub error: Option<String>,
    /// Provider attempts made (0 if never dispatched).
    pub attempts: u32,
}

/// Result of executing an entire plan.
#[derive(Debug)]
pub struct ExecutionResult {
    /// Per-step results, ordered by step index.
    pub results: Vec<StepResult>,
    /// Outputs of every resource that is applied at end of run.
    pub outputs: HashMap<String, Outputs>,
    /// Per-run resource objects with their final lifecycle states.
    pub resources: HashMap<String, Resource>,
    /// Number of steps applied.
    pub applied: usize,
    /// Number of steps that deleted a resource.
    pub deleted: usize,
    /// Number of no-op steps.
    pub unchanged: usize,
    /// Number of failed steps.
    pub failed: usize,
    /// Number of steps skipped because of failed dependencies.
    pub skipped: usize,
    /// Number of steps cut off by cancellation.
    pub cancelled_steps: usize,
    /// True if the run was cancelled.
    pub cancelled: bool,
    /// True if every step reached a successful outcome.
    pub success: bool,
}

impl ExecutionResult {
    fn from_results(
        results: Vec<StepResult>,
        outputs: HashMap<String, Outputs>,
        resources: HashMap<String, Resource>,
        cancelled: bool,
    ) -> Self {
        let count = |outcome: StepOutcome| results.iter().filter(|r| r.outcome == outcome).count();
        let applied = count(StepOutcome::Applied);
        let deleted = count(StepOutcome::Deleted);
        let unchanged = count(StepOutcome::Unchanged);
        let failed = count(StepOutcome::Failed);
        let skipped = count(StepOutcome::Skipped);
        let cancelled_steps = count(StepOutcome::Cancelled);
        let success = failed == 0 && skipped == 0 && cancelled_steps == 0;

        Self {
            results,
            outputs,
            resources,
            applied,
            deleted,
            unchanged,
            failed,
            skipped,
            cancelled_steps,
            cancelled,
            success,
        }
    }

    /// Looks up the results for a resource id (two entries for a replace).
    #[must_use]
    pub fn results_for(&self, resource_id: &str) -> Vec<&StepResult> {
        self.results
            .iter()
            .filter(|r| r.resource_id == resource_id)
            .collect()
    }
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Executed {} steps: {} applied, {} deleted, {} unchanged, {} failed, {} skipped, {} cancelled",
            self.results.len(),
            self.applied,
            self.deleted,
            self.unchanged,
            self.failed,
            self.skipped,
            self.cancelled_steps
        )
    }
}

/// Everything a worker needs to run one step, owned.
#[derive(Debug, Clone)]
struct StepWork {
    step: PlanStep,
    properties: BTreeMap<String, PropertyValue>,
    dependencies: Vec<String>,
    spec_hash: String,
    prior: Option<StateRecord>,
}

/// Shared handles cloned into each worker.
struct StepContext {
    provider: Arc<dyn Provider>,
    store: Arc<dyn StateStore>,
    secrets: Arc<dyn SecretResolver>,
    context: ProviderContext,
    retry: RetryPolicy,
    cancel: CancelFlag,
    /// Snapshot of resolved outputs at dispatch time; every dependency has
    /// completed by then, so the values this step needs are final.
    outputs: HashMap<String, Outputs>,
}

/// Executor applying plans with a bounded worker pool.
pub struct PlanExecutor {
    provider: Arc<dyn Provider>,
    store: Arc<dyn StateStore>,
    secrets: Arc<dyn SecretResolver>,
    context: ProviderContext,
    concurrency: usize,
    retry: RetryPolicy,
}

impl PlanExecutor {
    /// Creates a new plan executor.
    #[must_use]
    pub fn new(
        provider: Arc<dyn Provider>,
        store: Arc<dyn StateStore>,
        secrets: Arc<dyn SecretResolver>,
        context: ProviderContext,
    ) -> Self {
        Self {
            provider,
            store,
            secrets,
            context,
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
        }
    }

    /// Sets the worker pool size.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Executes a plan to completion.
    ///
    /// # Errors
    ///
    /// Returns an error only for internal faults (e.g. a panicked worker);
    /// per-resource failures are reported in the [`ExecutionResult`].
    pub async fn execute(
        &self,
        plan: &Plan,
        stack: &Stack,
        graph: &ResourceGraph,
        snapshot: &StateSnapshot,
    ) -> Result<ExecutionResult> {
        self.execute_with_cancel(plan, stack, graph, snapshot, &CancelFlag::new())
            .await
    }

    /// Executes a plan, honoring a cancellation flag.
    ///
    /// # Errors
    ///
    /// Returns an error only for internal faults; cancellation is not an
    /// error, the result simply reports which steps never started.
    pub async fn execute_with_cancel(
        &self,
        plan: &Plan,
        stack: &Stack,
        graph: &ResourceGraph,
        snapshot: &StateSnapshot,
        cancel: &CancelFlag,
    ) -> Result<ExecutionResult> {
        let total = plan.steps.len();
        info!(
            "Executing plan: {total} steps, concurrency {}",
            self.concurrency
        );

        if total == 0 {
            return Ok(ExecutionResult::from_results(
                Vec::new(),
                HashMap::new(),
                HashMap::new(),
                cancel.is_cancelled(),
            ));
        }

        let works = Self::prepare_work(plan, stack, graph, snapshot);

        // Per-run resource objects; created fresh from the declared specs
        // (or from the record for orphans) and discarded with the result.
        let mut resources: HashMap<String, Resource> = HashMap::new();
        for step in &plan.steps {
            if step.deposed {
                continue;
            }
            resources
                .entry(step.resource_id.clone())
                .or_insert_with(|| {
                    stack.resource(&step.resource_id).map_or_else(
                        || Resource::new(&step.resource_id, &step.type_name),
                        Resource::from_spec,
                    )
                });
        }

        let mut remaining: Vec<usize> = plan.steps.iter().map(|s| s.depends_on.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); total];
        for step in &plan.steps {
            for &dependency in &step.depends_on {
                dependents[dependency].push(step.index);
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = remaining
            .iter()
            .enumerate()
            .filter_map(|(i, &r)| (r == 0).then_some(Reverse(i)))
            .collect();
        let mut results: Vec<Option<StepResult>> = (0..total).map(|_| None).collect();
        let mut outputs: HashMap<String, Outputs> = HashMap::new();
        let mut join_set: JoinSet<(StepResult, Option<Outputs>)> = JoinSet::new();
        let mut in_flight = 0usize;
        let mut finished = 0usize;

        while finished < total {
            // Dispatch as much ready work as the pool allows.
            while !cancel.is_cancelled() && in_flight < self.concurrency {
                let Some(Reverse(index)) = ready.pop() else {
                    break;
                };
                if results[index].is_some() {
                    continue;
                }

                let work = &works[index];
                match work.step.operation {
                    Operation::NoOp => {
                        // Seed outputs from state so dependents can resolve
                        // references without a provider call.
                        if let Some(prior) = &work.prior {
                            outputs.insert(work.step.resource_id.clone(), prior.outputs.clone());
                            if let Some(resource) = resources.get_mut(&work.step.resource_id) {
                                resource.outputs = prior.outputs.clone();
                            }
                        }
                        debug!("Step {index}: {} unchanged", work.step.resource_id);
                        let result = step_result(&work.step, StepOutcome::Unchanged, None, 0);
                        complete(
                            result,
                            &plan.steps,
                            &mut results,
                            &mut resources,
                            &dependents,
                            &mut remaining,
                            &mut ready,
                            &mut finished,
                        );
                    }
                    Operation::Delete if work.step.physical_id.is_none() && !work.step.deposed => {
                        // Nothing was ever created; clearing the record is
                        // the whole job.
                        debug!(
                            "Step {index}: no physical id for {}, delete is trivial",
                            work.step.resource_id
                        );
                        let result = match self.store.remove(&work.step.resource_id).await {
                            Ok(()) => step_result(&work.step, StepOutcome::Deleted, None, 0),
                            Err(e) => step_result(
                                &work.step,
                                StepOutcome::Failed,
                                Some(format!("failed to clear state: {e}")),
                                0,
                            ),
                        };
                        complete(
                            result,
                            &plan.steps,
                            &mut results,
                            &mut resources,
                            &dependents,
                            &mut remaining,
                            &mut ready,
                            &mut finished,
                        );
                    }
                    _ => {
                        if !work.step.deposed
                            && let Some(resource) = resources.get_mut(&work.step.resource_id)
                        {
                            resource.set_lifecycle(LifecycleState::Applying);
                        }
                        let context = StepContext {
                            provider: Arc::clone(&self.provider),
                            store: Arc::clone(&self.store),
                            secrets: Arc::clone(&self.secrets),
                            context: self.context.clone(),
                            retry: self.retry,
                            cancel: cancel.clone(),
                            outputs: outputs.clone(),
                        };
                        join_set.spawn(run_step(work.clone(), context));
                        in_flight += 1;
                    }
                }
            }

            if finished >= total {
                break;
            }

            if in_flight == 0 {
                // Nothing running and nothing dispatchable: the run was
                // cancelled, or every remaining step sits behind a failure.
                break;
            }

            match join_set.join_next().await {
                Some(Ok((result, step_outputs))) => {
                    in_flight -= 1;
                    if let Some(step_outputs) = step_outputs {
                        if let Some(resource) = resources.get_mut(&result.resource_id) {
                            resource.outputs = step_outputs.clone();
                        }
                        outputs.insert(result.resource_id.clone(), step_outputs);
                    }
                    complete(
                        result,
                        &plan.steps,
                        &mut results,
                        &mut resources,
                        &dependents,
                        &mut remaining,
                        &mut ready,
                        &mut finished,
                    );
                }
                Some(Err(e)) => {
                    return Err(ConvergeError::internal(format!("worker task failed: {e}")));
                }
                None => break,
            }
        }

        // Whatever never got a result was cut off by cancellation (or is
        // unreachable behind it).
        let was_cancelled = cancel.is_cancelled();
        let results: Vec<StepResult> = results
            .into_iter()
            .enumerate()
            .map(|(index, result)| {
                result.unwrap_or_else(|| {
                    let step = &plan.steps[index];
                    let (outcome, message) = if was_cancelled {
                        (StepOutcome::Cancelled, "run cancelled before this step started")
                    } else {
                        (StepOutcome::Skipped, "dependency did not complete")
                    };
                    step_result(step, outcome, Some(message.to_string()), 0)
                })
            })
            .collect();

        let result = ExecutionResult::from_results(results, outputs, resources, was_cancelled);
        info!("{result}");
        Ok(result)
    }

    /// Clones out everything each step's worker will need.
    fn prepare_work(
        plan: &Plan,
        stack: &Stack,
        graph: &ResourceGraph,
        snapshot: &StateSnapshot,
    ) -> Vec<StepWork> {
        let hasher = SpecHasher::new();
        plan.steps
            .iter()
            .map(|step| {
                let spec = stack.resource(&step.resource_id);
                let prior = snapshot.get(&step.resource_id).cloned();

                let properties = if step.operation == Operation::Delete {
                    BTreeMap::new()
                } else {
                    spec.map(|s| s.properties.clone()).unwrap_or_default()
                };

                let dependencies = graph.index_of(&step.resource_id).map_or_else(
                    || {
                        prior
                            .as_ref()
                            .map(|r| r.dependencies.clone())
                            .unwrap_or_default()
                    },
                    |index| {
                        graph
                            .dependencies_of(index)
                            .into_iter()
                            .map(|d| graph.id_of(d).to_string())
                            .collect()
                    },
                );

                let spec_hash = spec.map_or_else(
                    || {
                        prior
                            .as_ref()
                            .map(|r| r.spec_hash.clone())
                            .unwrap_or_default()
                    },
                    |s| hasher.hash_spec(s),
                );

                StepWork {
                    step: step.clone(),
                    properties,
                    dependencies,
                    spec_hash,
                    prior,
                }
            })
            .collect()
    }
}

/// Builds a [`StepResult`] for a plan step.
fn step_result(
    step: &PlanStep,
    outcome: StepOutcome,
    error: Option<String>,
    attempts: u32,
) -> StepResult {
    StepResult {
        step: step.index,
        resource_id: step.resource_id.clone(),
        operation: step.operation,
        deposed: step.deposed,
        outcome,
        error,
        attempts,
    }
}

/// Maps a step outcome onto the resource's lifecycle state.
fn apply_lifecycle(resources: &mut HashMap<String, Resource>, result: &StepResult) {
    if result.deposed {
        // The logical resource already converged on its successor.
        return;
    }
    let Some(resource) = resources.get_mut(&result.resource_id) else {
        return;
    };
    match result.outcome {
        StepOutcome::Applied | StepOutcome::Unchanged => {
            resource.set_lifecycle(LifecycleState::Applied);
        }
        StepOutcome::Deleted => resource.set_lifecycle(LifecycleState::Deleted),
        // Cascading abort marks never-attempted dependents failed too.
        StepOutcome::Failed | StepOutcome::Skipped => {
            resource.set_lifecycle(LifecycleState::Failed);
        }
        StepOutcome::Cancelled => {}
    }
}

/// Records a completed step and unblocks or skips its dependents.
fn complete(
    result: StepResult,
    steps: &[PlanStep],
    results: &mut [Option<StepResult>],
    resources: &mut HashMap<String, Resource>,
    dependents: &[Vec<usize>],
    remaining: &mut [usize],
    ready: &mut BinaryHeap<Reverse<usize>>,
    finished: &mut usize,
) {
    let index = result.step;
    let success = result.outcome.is_success();
    let failed_id = result.resource_id.clone();
    apply_lifecycle(resources, &result);
    results[index] = Some(result);
    *finished += 1;

    if success {
        for &dependent in &dependents[index] {
            remaining[dependent] -= 1;
            if remaining[dependent] == 0 {
                ready.push(Reverse(dependent));
            }
        }
        return;
    }

    // Cascading abort: every transitive dependent is skipped without being
    // attempted. Independent branches are untouched.
    let mut frontier = vec![index];
    while let Some(current) = frontier.pop() {
        for &dependent in &dependents[current] {
            if results[dependent].is_none() {
                warn!(
                    "Skipping step {dependent} ({}) because '{failed_id}' did not complete",
                    steps[dependent].resource_id
                );
                let skipped = step_result(
                    &steps[dependent],
                    StepOutcome::Skipped,
                    Some(format!("dependency '{failed_id}' did not complete")),
                    0,
                );
                apply_lifecycle(resources, &skipped);
                results[dependent] = Some(skipped);
                *finished += 1;
                frontier.push(dependent);
            }
        }
    }
}

/// Runs a single step on a worker: resolve, call the provider with retries,
/// persist the outcome.
async fn run_step(work: StepWork, ctx: StepContext) -> (StepResult, Option<Outputs>) {
    info!("Executing step {}: {}", work.step.index, work.step.description());

    let resolved = match resolve_spec(&work, &ctx).await {
        Ok(resolved) => resolved,
        Err(e) => {
            error!("Failed to resolve spec for {}: {e}", work.step.resource_id);
            if !work.step.deposed {
                save_failure(&ctx, &work).await;
            }
            return (
                step_result(&work.step, StepOutcome::Failed, Some(e.to_string()), 0),
                None,
            );
        }
    };

    let mut attempts = 0u32;
    loop {
        attempts += 1;

        let call = match work.step.operation {
            Operation::Create => ctx.provider.create(&resolved, &ctx.context).await.map(Some),
            Operation::UpdateInPlace => match work.step.physical_id.as_deref() {
                Some(physical_id) => ctx
                    .provider
                    .update(physical_id, &resolved, &ctx.context)
                    .await
                    .map(Some),
                None => {
                    return (
                        step_result(
                            &work.step,
                            StepOutcome::Failed,
                            Some(String::from("no physical id recorded for update")),
                            attempts,
                        ),
                        None,
                    );
                }
            },
            Operation::Delete => {
                let physical_id = work.step.physical_id.as_deref().unwrap_or_default();
                match ctx
                    .provider
                    .delete(&work.step.type_name, physical_id, &ctx.context)
                    .await
                {
                    Ok(()) => Ok(None),
                    Err(ProviderError::NotFound { .. }) => {
                        info!("{} was already deleted", work.step.resource_id);
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            }
            // Expanded away at plan time; kept for exhaustiveness.
            Operation::Replace | Operation::NoOp => {
                return (
                    step_result(
                        &work.step,
                        StepOutcome::Failed,
                        Some(String::from("unexpected operation reached a worker")),
                        attempts,
                    ),
                    None,
                );
            }
        };

        match call {
            Ok(call_outputs) => {
                return finish_success(&work, &ctx, call_outputs, attempts).await;
            }
            Err(e)
                if e.is_transient()
                    && attempts < ctx.retry.max_attempts
                    && !ctx.cancel.is_cancelled() =>
            {
                let delay = ctx.retry.delay_for(attempts, e.retry_delay_secs());
                warn!(
                    "Step {} attempt {attempts}/{} failed transiently, retrying in {delay:?}: {e}",
                    work.step.index, ctx.retry.max_attempts
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!(
                    "Step {} failed ({}) after {attempts} attempt(s): {e}",
                    work.step.index,
                    e.class()
                );
                if !work.step.deposed {
                    save_failure(&ctx, &work).await;
                }
                // A transient error lands here only once the retry budget
                // is spent (or cancellation cut the retries short).
                let message = if e.is_transient() && attempts >= ctx.retry.max_attempts {
                    format!(
                        "{}: {e}",
                        ExecError::MaxRetriesExceeded {
                            attempts,
                            resource: work.step.resource_id.clone(),
                        }
                    )
                } else {
                    format!("{} error: {e}", e.class())
                };
                return (
                    step_result(&work.step, StepOutcome::Failed, Some(message), attempts),
                    None,
                );
            }
        }
    }
}

/// Persists the success and shapes the step result.
async fn finish_success(
    work: &StepWork,
    ctx: &StepContext,
    call_outputs: Option<Outputs>,
    attempts: u32,
) -> (StepResult, Option<Outputs>) {
    match work.step.operation {
        Operation::Delete => {
            if work.step.deposed {
                // The successor's record owns this logical id; removing it
                // here would erase the freshly applied state.
                debug!("Deposed instance of {} removed", work.step.resource_id);
                return (
                    step_result(&work.step, StepOutcome::Deleted, None, attempts),
                    None,
                );
            }
            if let Err(e) = ctx.store.remove(&work.step.resource_id).await {
                error!("Failed to clear state for {}: {e}", work.step.resource_id);
                return (
                    step_result(
                        &work.step,
                        StepOutcome::Failed,
                        Some(format!("deleted, but failed to clear state: {e}")),
                        attempts,
                    ),
                    None,
                );
            }
            info!("Deleted {}", work.step.resource_id);
            (
                step_result(&work.step, StepOutcome::Deleted, None, attempts),
                None,
            )
        }
        _ => {
            let outputs = call_outputs.unwrap_or_default();
            let physical_id = outputs
                .get("id")
                .and_then(Value::as_str)
                .map(ToString::to_string);

            let mut record = StateRecord::new(
                &work.step.resource_id,
                &work.step.type_name,
                &work.spec_hash,
            );
            if work.step.operation == Operation::UpdateInPlace
                && let Some(prior) = &work.prior
            {
                record.created_at = prior.created_at;
            }
            record.properties = work.properties.clone();
            record.dependencies = work.dependencies.clone();
            record.mark_applied(physical_id, outputs.clone());

            if let Err(e) = ctx.store.save(&record).await {
                error!("Failed to save state for {}: {e}", work.step.resource_id);
                return (
                    step_result(
                        &work.step,
                        StepOutcome::Failed,
                        Some(format!("applied, but failed to save state: {e}")),
                        attempts,
                    ),
                    None,
                );
            }

            info!(
                "Applied {} in {attempts} attempt(s)",
                work.step.resource_id
            );
            (
                step_result(&work.step, StepOutcome::Applied, None, attempts),
                Some(outputs),
            )
        }
    }
}

/// Resolves secrets, then references, into a concrete provider spec.
async fn resolve_spec(work: &StepWork, ctx: &StepContext) -> Result<ResolvedSpec> {
    let mut secrets: HashMap<String, SecretString> = HashMap::new();
    for value in work.properties.values() {
        for secret_ref in value.secret_refs() {
            if !secrets.contains_key(&secret_ref.key) {
                let resolved = ctx.secrets.resolve(secret_ref).await?;
                secrets.insert(secret_ref.key.clone(), resolved);
            }
        }
    }

    let mut properties = BTreeMap::new();
    for (name, value) in &work.properties {
        properties.insert(name.clone(), value.resolve(&ctx.outputs, &secrets)?);
    }

    Ok(ResolvedSpec {
        id: work.step.resource_id.clone(),
        type_name: work.step.type_name.clone(),
        properties,
    })
}

/// Records a failure so the next run knows this resource needs attention.
async fn save_failure(ctx: &StepContext, work: &StepWork) {
    let mut record = work.prior.clone().unwrap_or_else(|| {
        StateRecord::new(&work.step.resource_id, &work.step.type_name, &work.spec_hash)
    });
    record.mark_failed();
    if let Err(e) = ctx.store.save(&record).await {
        error!(
            "Failed to record failure for {}: {e}",
            work.step.resource_id
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{DependencyResolver, GraphBuilder};
    use crate::model::{PropertyValue, ResourceSpec, TypeRegistry};
    use crate::planner::DiffEngine;
    use crate::provider::MemoryProvider;
    use crate::secret::MemorySecretResolver;
    use crate::state::{MemoryStateStore, StateStore};

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    fn chain_stack() -> Stack {
        Stack::new("net")
            .with_resource(
                ResourceSpec::new("my-vpc", "network")
                    .with_property("cidr_block", PropertyValue::string("10.0.0.0/16")),
            )
            .with_resource(
                ResourceSpec::new("public-subnet", "subnet")
                    .with_property("network_id", PropertyValue::reference("my-vpc", "id"))
                    .with_property("cidr_block", PropertyValue::string("10.0.1.0/24"))
                    .with_property("availability_zone", PropertyValue::string("ap-southeast-1a")),
            )
            .with_resource(
                ResourceSpec::new("igw", "internet_gateway")
                    .with_property("network_id", PropertyValue::reference("my-vpc", "id")),
            )
    }

    async fn run(
        stack: &Stack,
        provider: Arc<MemoryProvider>,
        store: Arc<MemoryStateStore>,
        retry: RetryPolicy,
    ) -> ExecutionResult {
        let registry = TypeRegistry::builtin();
        let graph = GraphBuilder::new().build(stack).expect("graph");
        let resolution = DependencyResolver::new().resolve(&graph).expect("resolve");
        let snapshot = store.load().await.expect("snapshot");
        let diff =
            DiffEngine::new(&registry).compute_diff(stack, &graph, &resolution, &snapshot);
        let plan = Plan::from_diff(&diff, stack, &graph, &resolution, &snapshot);

        PlanExecutor::new(
            provider,
            store,
            Arc::new(MemorySecretResolver::new()),
            ProviderContext::new("123456789012", "ap-southeast-1"),
        )
        .with_retry(retry)
        .execute(&plan, stack, &graph, &snapshot)
        .await
        .expect("execution should not error internally")
    }

    #[tokio::test]
    async fn test_chain_applies_in_order() {
        let provider = Arc::new(MemoryProvider::new());
        let store = Arc::new(MemoryStateStore::new());

        let result = run(&chain_stack(), Arc::clone(&provider), Arc::clone(&store), fast_retry(3)).await;

        assert!(result.success);
        assert_eq!(result.applied, 3);
        assert_eq!(provider.live_count(), 3);

        // Per-run resource objects carry final lifecycle and outputs.
        let vpc = &result.resources["my-vpc"];
        assert_eq!(vpc.lifecycle, LifecycleState::Applied);
        assert!(vpc.outputs.contains_key("id"));

        // Outputs resolved through the chain: the subnet's record must hold
        // the vpc's real physical id.
        let snapshot = store.load().await.expect("snapshot");
        let vpc_id = snapshot.get("my-vpc").and_then(|r| r.physical_id.clone()).expect("vpc id");
        assert!(vpc_id.starts_with("vpc-"));
        assert!(snapshot.get("public-subnet").expect("subnet record").is_live());
    }

    #[tokio::test]
    async fn test_permanent_failure_cascades_to_dependents() {
        let provider = Arc::new(MemoryProvider::new());
        let store = Arc::new(MemoryStateStore::new());
        provider.fail_permanently("my-vpc");

        let result = run(&chain_stack(), Arc::clone(&provider), Arc::clone(&store), fast_retry(3)).await;

        assert!(!result.success);
        assert_eq!(result.failed, 1);
        assert_eq!(result.skipped, 2);
        assert_eq!(
            result.results_for("my-vpc")[0].outcome,
            StepOutcome::Failed
        );
        assert_eq!(
            result.results_for("public-subnet")[0].outcome,
            StepOutcome::Skipped
        );
        // Only the failing resource was ever attempted.
        assert_eq!(provider.call_count(), 1);

        // Cascading abort marks the dependents' resources failed too.
        assert_eq!(
            result.resources["public-subnet"].lifecycle,
            LifecycleState::Failed
        );

        // Failure was recorded for the next run.
        let snapshot = store.load().await.expect("snapshot");
        assert!(!snapshot.get("my-vpc").expect("vpc record").is_live());
    }

    #[tokio::test]
    async fn test_independent_branch_survives_failure() {
        let stack = Stack::new("islands")
            .with_resource(
                ResourceSpec::new("vpc-a", "network")
                    .with_property("cidr_block", PropertyValue::string("10.0.0.0/16")),
            )
            .with_resource(
                ResourceSpec::new("vpc-b", "network")
                    .with_property("cidr_block", PropertyValue::string("10.1.0.0/16")),
            );

        let provider = Arc::new(MemoryProvider::new());
        let store = Arc::new(MemoryStateStore::new());
        provider.fail_permanently("vpc-a");

        let result = run(&stack, Arc::clone(&provider), store, fast_retry(3)).await;

        assert_eq!(result.failed, 1);
        assert_eq!(result.applied, 1);
        assert_eq!(result.results_for("vpc-b")[0].outcome, StepOutcome::Applied);
    }

    #[tokio::test]
    async fn test_transient_failure_retried_until_success() {
        let stack = Stack::new("net").with_resource(
            ResourceSpec::new("my-vpc", "network")
                .with_property("cidr_block", PropertyValue::string("10.0.0.0/16")),
        );

        let provider = Arc::new(MemoryProvider::new());
        let store = Arc::new(MemoryStateStore::new());
        provider.fail_transiently("my-vpc", 2);

        let result = run(&stack, Arc::clone(&provider), store, fast_retry(3)).await;

        assert!(result.success);
        let vpc = result.results_for("my-vpc")[0];
        assert_eq!(vpc.outcome, StepOutcome::Applied);
        assert_eq!(vpc.attempts, 3);
    }

    #[tokio::test]
    async fn test_transient_failures_bounded_by_retry_policy() {
        let stack = Stack::new("net").with_resource(
            ResourceSpec::new("my-vpc", "network")
                .with_property("cidr_block", PropertyValue::string("10.0.0.0/16")),
        );

        let provider = Arc::new(MemoryProvider::new());
        let store = Arc::new(MemoryStateStore::new());
        provider.fail_transiently("my-vpc", 10);

        let result = run(&stack, Arc::clone(&provider), store, fast_retry(2)).await;

        assert!(!result.success);
        let vpc = result.results_for("my-vpc")[0];
        assert_eq!(vpc.outcome, StepOutcome::Failed);
        assert_eq!(vpc.attempts, 2);
    }

    #[tokio::test]
    async fn test_cancellation_stops_new_work() {
        let provider =
            Arc::new(MemoryProvider::new().with_latency(Duration::from_millis(50)));
        let store = Arc::new(MemoryStateStore::new());

        let stack = chain_stack();
        let registry = TypeRegistry::builtin();
        let graph = GraphBuilder::new().build(&stack).expect("graph");
        let resolution = DependencyResolver::new().resolve(&graph).expect("resolve");
        let snapshot = store.load().await.expect("snapshot");
        let diff =
            DiffEngine::new(&registry).compute_diff(&stack, &graph, &resolution, &snapshot);
        let plan = Plan::from_diff(&diff, &stack, &graph, &resolution, &snapshot);

        let cancel = CancelFlag::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let executor = PlanExecutor::new(
            Arc::clone(&provider) as Arc<dyn Provider>,
            Arc::clone(&store) as Arc<dyn StateStore>,
            Arc::new(MemorySecretResolver::new()),
            ProviderContext::default(),
        )
        .with_concurrency(1)
        .with_retry(fast_retry(1));

        let result = executor
            .execute_with_cancel(&plan, &stack, &graph, &snapshot, &cancel)
            .await
            .expect("execution should not error internally");

        assert!(result.cancelled);
        // The in-flight vpc create finished and was recorded; nothing new
        // started afterwards.
        assert_eq!(result.results_for("my-vpc")[0].outcome, StepOutcome::Applied);
        assert_eq!(result.cancelled_steps, 2);
        let snapshot = store.load().await.expect("snapshot");
        assert!(snapshot.get("my-vpc").expect("vpc record").is_live());
        assert!(!snapshot.contains("public-subnet"));
    }

    #[tokio::test]
    async fn test_secret_resolved_at_apply_time() {
        let stack = Stack::new("net").with_resource(
            ResourceSpec::new("db", "compute_instance")
                .with_property("instance_type", PropertyValue::string("t2.micro"))
                .with_property("ami", PropertyValue::string("ami-1"))
                .with_property("subnet_id", PropertyValue::string("subnet-1"))
                .with_property("user_data", PropertyValue::secret("db/appuser_password")),
        );

        let provider = Arc::new(MemoryProvider::new());
        let store = Arc::new(MemoryStateStore::new());

        let registry = TypeRegistry::builtin();
        let graph = GraphBuilder::new().build(&stack).expect("graph");
        let resolution = DependencyResolver::new().resolve(&graph).expect("resolve");
        let snapshot = store.load().await.expect("snapshot");
        let diff =
            DiffEngine::new(&registry).compute_diff(&stack, &graph, &resolution, &snapshot);
        let plan = Plan::from_diff(&diff, &stack, &graph, &resolution, &snapshot);

        let executor = PlanExecutor::new(
            Arc::clone(&provider) as Arc<dyn Provider>,
            Arc::clone(&store) as Arc<dyn StateStore>,
            Arc::new(
                MemorySecretResolver::new().with_secret("db/appuser_password", "s3cr3t"),
            ),
            ProviderContext::default(),
        )
        .with_retry(fast_retry(1));

        let result = executor
            .execute(&plan, &stack, &graph, &snapshot)
            .await
            .expect("execution should not error internally");
        assert!(result.success);

        // The record keeps the symbolic secret reference, never the value.
        let snapshot = store.load().await.expect("snapshot");
        let record = snapshot.get("db").expect("db record");
        assert_eq!(
            record.properties.get("user_data"),
            Some(&PropertyValue::secret("db/appuser_password"))
        );
        let encoded = serde_json::to_string(&record).expect("serialize record");
        assert!(!encoded.contains("s3cr3t"));
    }

    #[tokio::test]
    async fn test_missing_secret_fails_without_retry() {
        let stack = Stack::new("net").with_resource(
            ResourceSpec::new("db", "compute_instance")
                .with_property("instance_type", PropertyValue::string("t2.micro"))
                .with_property("ami", PropertyValue::string("ami-1"))
                .with_property("subnet_id", PropertyValue::string("subnet-1"))
                .with_property("user_data", PropertyValue::secret("db/missing")),
        );

        let provider = Arc::new(MemoryProvider::new());
        let store = Arc::new(MemoryStateStore::new());

        let result = run(&stack, Arc::clone(&provider), store, fast_retry(3)).await;

        assert!(!result.success);
        assert_eq!(result.results_for("db")[0].outcome, StepOutcome::Failed);
        // The provider was never called for an unresolvable spec.
        assert_eq!(provider.call_count(), 0);
    }

    #[test]
    fn test_backoff_doubles_and_respects_hint() {
        let retry = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        };

        assert_eq!(retry.delay_for(1, None), Duration::from_millis(100));
        assert_eq!(retry.delay_for(2, None), Duration::from_millis(200));
        assert_eq!(retry.delay_for(3, None), Duration::from_millis(400));
        assert_eq!(retry.delay_for(1, Some(3)), Duration::from_secs(3));
    }
}
