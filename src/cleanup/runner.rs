use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::record::{
    CleanupKind, CleanupRecord, decode_flag_pair, decode_force_flag, decode_model_params,
};
use super::store::CleanupStore;
use crate::backend::StateBackend;
use crate::config::{CleanupConfig, Clock};
use crate::core::{
    ApplicationName, CharmUrl, FilesystemId, MachineId, Result, StorageId, UnitName, VolumeId,
};

/// Drives the cleanup queue: looks up the handler for each due task,
/// executes it against the current entity graph, and deletes the task
/// record once — and only once — the handler succeeds.
pub struct CleanupRunner {
    pub(crate) store: Arc<dyn CleanupStore>,
    pub(crate) backend: Arc<dyn StateBackend>,
    pub(crate) config: CleanupConfig,
    pub(crate) clock: Arc<dyn Clock>,
}

impl CleanupRunner {
    pub fn new(
        backend: Arc<dyn StateBackend>,
        store: Arc<dyn CleanupStore>,
        config: CleanupConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            backend,
            config,
            clock,
        }
    }

    pub fn backend(&self) -> &Arc<dyn StateBackend> {
        &self.backend
    }

    pub async fn enqueue(
        &self,
        kind: CleanupKind,
        prefix: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<()> {
        self.store
            .insert(CleanupRecord::new(kind, prefix, args))
            .await
    }

    pub async fn enqueue_at(
        &self,
        when: chrono::DateTime<chrono::Utc>,
        kind: CleanupKind,
        prefix: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<()> {
        self.store
            .insert(CleanupRecord::at(when, kind, prefix, args))
            .await
    }

    pub async fn has_pending(&self) -> Result<bool> {
        Ok(self.store.count().await? > 0)
    }

    /// Single drain pass over the due tasks. A handler failure is
    /// logged and leaves its task pending for the next pass; only
    /// store-level failures surface to the caller. Safe to invoke
    /// concurrently from multiple processes: task deletion is
    /// delete-if-present, so of two drainers only one wins and the
    /// other's work was an idempotent no-op.
    pub async fn run(&self) -> Result<()> {
        let now = self.clock.now();
        for record in self.store.due(now).await? {
            let Some(kind) = record.kind_tag() else {
                // Corrupt or future-version record; leave it pending.
                warn!(kind = %record.kind, prefix = %record.prefix, "unknown cleanup kind");
                continue;
            };
            debug!(kind = %kind, prefix = %record.prefix, "cleanup");
            if let Err(err) = self.dispatch(kind, &record).await {
                warn!(
                    kind = %kind,
                    prefix = %record.prefix,
                    error = %err,
                    "cleanup failed",
                );
                continue;
            }
            if !self
                .store
                .delete(&record.id)
                .await
                .map_err(|err| err.annotate("cannot remove completed cleanup record"))?
            {
                debug!(id = %record.id, "cleanup record already removed by concurrent drain");
            }
        }
        Ok(())
    }

    async fn dispatch(&self, kind: CleanupKind, record: &CleanupRecord) -> Result<()> {
        let prefix = record.prefix.as_str();
        let args = record.args.as_slice();
        match kind {
            CleanupKind::UnitsForDyingApplication => {
                let (destroy_storage, force) = decode_flag_pair(args, (false, false))?;
                self.cleanup_units_for_dying_application(
                    &ApplicationName::from(prefix),
                    destroy_storage,
                    force,
                )
                .await
            }
            CleanupKind::Charm => self.cleanup_charm(&CharmUrl::from(prefix)).await,
            CleanupKind::DyingUnit => {
                let (destroy_storage, force) = decode_flag_pair(args, (false, false))?;
                self.cleanup_dying_unit(&UnitName::from(prefix), destroy_storage, force)
                    .await
            }
            CleanupKind::ForceDestroyedUnit => {
                self.cleanup_force_destroyed_unit(&UnitName::from(prefix))
                    .await
            }
            CleanupKind::ForceRemoveUnit => {
                self.cleanup_force_remove_unit(&UnitName::from(prefix))
                    .await
            }
            CleanupKind::ApplicationsForDyingModel => {
                self.cleanup_applications_for_dying_model().await
            }
            CleanupKind::DyingMachine => {
                let force = decode_force_flag(args)?;
                self.cleanup_dying_machine(&MachineId::from(prefix), force)
                    .await
            }
            CleanupKind::ForceDestroyedMachine => {
                self.cleanup_force_destroyed_machine(&MachineId::from(prefix))
                    .await
            }
            CleanupKind::AttachmentsForDyingStorage => {
                let force = decode_force_flag(args)?;
                self.cleanup_attachments_for_dying_storage(&StorageId::from(prefix), force)
                    .await
            }
            CleanupKind::AttachmentsForDyingVolume => {
                self.cleanup_attachments_for_dying_volume(&VolumeId::from(prefix))
                    .await
            }
            CleanupKind::AttachmentsForDyingFilesystem => {
                self.cleanup_attachments_for_dying_filesystem(&FilesystemId::from(prefix))
                    .await
            }
            CleanupKind::ModelsForDyingController => {
                let params = decode_model_params(args)?;
                self.cleanup_models_for_dying_controller(params).await
            }
            CleanupKind::MachinesForDyingModel => self.cleanup_machines_for_dying_model().await,
            CleanupKind::StorageForDyingModel => {
                // Old records destroyed storage unconditionally.
                let (destroy_storage, force) = decode_flag_pair(args, (true, false))?;
                self.cleanup_storage_for_dying_model(destroy_storage, force)
                    .await
            }
            CleanupKind::DyingUnitResources => {
                let force = decode_force_flag(args)?;
                self.cleanup_dying_unit_resources(&UnitName::from(prefix), force)
                    .await
            }
        }
    }

    /// Schedules a backstop task so that forced teardown still happens
    /// if the cooperating agents never complete the graceful path.
    /// Scheduling failure is a warning, not an error: the calling
    /// cleanup has already made its own progress.
    pub(crate) async fn schedule_force_cleanup(&self, kind: CleanupKind, prefix: &str) {
        let deadline = self.clock.now() + self.config.force_timeout;
        let record = CleanupRecord::at(deadline, kind, prefix, vec![]);
        if let Err(err) = self.store.insert(record).await {
            warn!(kind = %kind, prefix = %prefix, error = %err, "couldn't schedule cleanup");
        }
    }
}
