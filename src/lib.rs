// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Converge
//!
//! A dependency-graph resolver and execution scheduler for declarative
//! resource provisioning.
//!
//! ## Overview
//!
//! Converge turns a declared resource graph into an ordered set of provider
//! API calls, drives actual state toward desired state, and tolerates
//! partial failure:
//!
//! - Declare resources with properties that may reference other resources'
//!   outputs; references become dependency edges automatically
//! - Validate the graph is acyclic and compute a deterministic application
//!   order
//! - Diff the desired stack against last-known state to decide, per
//!   resource, between create, in-place update, replace, delete, and no-op
//! - Apply the plan with bounded concurrency across independent branches,
//!   retrying transient provider errors and skipping the dependents of
//!   failed resources
//!
//! The actual cloud API lives behind the [`provider::Provider`] trait and
//! durable state behind the [`state::StateStore`] trait; both are supplied
//! by the surrounding infrastructure.
//!
//! ## Modules
//!
//! - [`model`]: resource specs, property values, type metadata, validation
//! - [`graph`]: dependency graph construction and resolution
//! - [`planner`]: diff computation, plan construction, plan execution
//! - [`provider`]: the provider seam plus an in-memory implementation
//! - [`state`]: state records and storage backends
//! - [`secret`]: apply-time secret resolution
//! - [`engine`]: top-level plan/apply pipeline
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use converge::{Engine, MemoryProvider, MemoryStateStore, PropertyValue, ResourceSpec, Stack};
//!
//! # async fn demo() -> converge::Result<()> {
//! let stack = Stack::new("example")
//!     .with_resource(
//!         ResourceSpec::new("my-vpc", "network")
//!             .with_property("cidr_block", PropertyValue::string("10.0.0.0/16")),
//!     )
//!     .with_resource(
//!         ResourceSpec::new("public-subnet", "subnet")
//!             .with_property("network_id", PropertyValue::reference("my-vpc", "id"))
//!             .with_property("cidr_block", PropertyValue::string("10.0.1.0/24"))
//!             .with_property("availability_zone", PropertyValue::string("ap-southeast-1a")),
//!     )
//!     .with_export("vpc_id", "my-vpc", "id");
//!
//! let engine = Engine::new(
//!     Arc::new(MemoryProvider::new()),
//!     Arc::new(MemoryStateStore::new()),
//! );
//! let report = engine.apply(&stack).await?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod engine;
pub mod error;
pub mod graph;
pub mod model;
pub mod planner;
pub mod provider;
pub mod secret;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use engine::{Engine, EngineOptions, PlannedRun, ResourceReport, RunReport, RunStatus};
pub use error::{ConvergeError, ErrorClass, ProviderError, Result, ValidationError};
pub use graph::{DependencyResolver, GraphBuilder, Resolution, ResourceGraph};
pub use model::{
    LifecycleState, Operation, Outputs, PropertyValue, Reference, Resource, ResourceSpec,
    SpecHasher, Stack, StackValidator, TypeDef, TypeRegistry,
};
pub use planner::{
    CancelFlag, DiffEngine, DiffResult, ExecutionResult, Plan, PlanExecutor, PlanStep,
    RetryPolicy, StepOutcome,
};
pub use provider::{MemoryProvider, Provider, ProviderContext, ResolvedSpec};
pub use secret::{EnvSecretResolver, MemorySecretResolver, SecretRef, SecretResolver, SecretString};
pub use state::{LocalStateStore, MemoryStateStore, StateRecord, StateSnapshot, StateStore};
