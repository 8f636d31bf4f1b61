//! High-level entry point tying a lifecycle backend, a cleanup store,
//! and the runner together.

use std::sync::Arc;

use serde_json::Value;

use crate::backend::StateBackend;
use crate::cleanup::{CleanupKind, CleanupRunner, CleanupStore};
use crate::config::{CleanupConfig, Clock, SystemClock};
use crate::core::Result;

/// Control-plane state handle. Destroy operations on the backend mark
/// entities dying and enqueue cleanup tasks; [`State::run_cleanup`]
/// drains whatever is due. Draining is idempotent and safe to repeat
/// until [`State::has_pending_cleanups`] reports false.
///
/// ```
/// use std::sync::Arc;
/// use fleetstate::backend::ApplicationOps;
/// use fleetstate::core::ApplicationName;
/// use fleetstate::{InMemoryBackend, InMemoryCleanupStore, State};
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() -> fleetstate::Result<()> {
///     let store = Arc::new(InMemoryCleanupStore::new());
///     let backend = Arc::new(InMemoryBackend::new(store.clone()));
///     backend.add_application("web").await?;
///     backend.add_unit("web", "web/0").await?;
///
///     let state = State::new(backend.clone(), store);
///     backend
///         .destroy_application(&ApplicationName::from("web"), Default::default())
///         .await?;
///     while state.has_pending_cleanups().await? {
///         state.run_cleanup().await?;
///     }
///     assert!(!backend.unit_exists("web/0").await);
///     Ok(())
/// }
/// ```
pub struct State {
    runner: CleanupRunner,
}

impl State {
    pub fn new(backend: Arc<dyn StateBackend>, store: Arc<dyn CleanupStore>) -> Self {
        Self::with_clock(backend, store, CleanupConfig::default(), Arc::new(SystemClock))
    }

    pub fn with_config(
        backend: Arc<dyn StateBackend>,
        store: Arc<dyn CleanupStore>,
        config: CleanupConfig,
    ) -> Self {
        Self::with_clock(backend, store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        backend: Arc<dyn StateBackend>,
        store: Arc<dyn CleanupStore>,
        config: CleanupConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            runner: CleanupRunner::new(backend, store, config, clock),
        }
    }

    pub fn backend(&self) -> &Arc<dyn StateBackend> {
        self.runner.backend()
    }

    /// Schedules a cleanup task for the next drain.
    pub async fn enqueue_cleanup(
        &self,
        kind: CleanupKind,
        prefix: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<()> {
        self.runner.enqueue(kind, prefix, args).await
    }

    /// Schedules a cleanup task that becomes due at `when`.
    pub async fn enqueue_cleanup_at(
        &self,
        when: chrono::DateTime<chrono::Utc>,
        kind: CleanupKind,
        prefix: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<()> {
        self.runner.enqueue_at(when, kind, prefix, args).await
    }

    /// Reports whether any cleanup tasks remain, due or deferred.
    pub async fn has_pending_cleanups(&self) -> Result<bool> {
        self.runner.has_pending().await
    }

    /// Runs a single drain pass over the due cleanup tasks. Handlers
    /// enqueue follow-up tasks, so callers loop until
    /// [`State::has_pending_cleanups`] settles.
    pub async fn run_cleanup(&self) -> Result<()> {
        self.runner.run().await
    }
}
