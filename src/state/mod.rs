//! State persistence for the Converge engine.
//!
//! The state store is the only durable artifact of a run: one record per
//! resource, written immediately after that resource's apply succeeds or
//! fails so partial progress is never lost. The store itself is an opaque
//! keyed backend; this module provides the interface plus local-file and
//! in-memory implementations.

mod local;
mod memory;
mod record;
mod store;

pub use local::LocalStateStore;
pub use memory::MemoryStateStore;
pub use record::{StateRecord, StateSnapshot, STATE_VERSION};
pub use store::StateStore;
