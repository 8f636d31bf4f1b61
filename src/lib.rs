// ============================================================================
// FleetState Library
// ============================================================================
//
// Deferred-cleanup engine for an orchestrator control-plane state store.
// Destroying an entity marks it dying and enqueues durable cleanup tasks;
// draining the queue cascades destruction through dependents until
// everything the entity owned is detached, dead, and removed.

pub mod backend;
pub mod cleanup;
pub mod config;
pub mod core;
pub mod facade;

// Re-export main types for convenience
pub use backend::{
    DestroyApplicationParams, DestroyModelParams, DestroyUnitParams, InMemoryBackend, StateBackend,
};
pub use cleanup::{CleanupKind, CleanupRecord, CleanupRunner, CleanupStore, InMemoryCleanupStore};
pub use config::{CleanupConfig, Clock, ManualClock, SystemClock};
pub use core::{Diagnostics, Life, Result, StateError};
pub use facade::State;
