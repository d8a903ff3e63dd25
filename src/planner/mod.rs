//! Planning and execution for provisioning runs.
//!
//! This module turns a desired stack plus the last-known state into an
//! ordered plan of provider operations, and applies that plan with bounded
//! concurrency across independent branches of the dependency graph.

mod diff;
mod executor;
mod plan;

pub use diff::{DiffEngine, DiffResult, PropertyChange, ResourceDiff};
pub use executor::{
    CancelFlag, ExecutionResult, PlanExecutor, RetryPolicy, StepOutcome, StepResult,
    DEFAULT_CONCURRENCY,
};
pub use plan::{Plan, PlanStep};
