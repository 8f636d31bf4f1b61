//! Storage teardown handlers, and the shared host-storage release path
//! used by both dying machines and dying units.

use tracing::warn;

use super::runner::CleanupRunner;
use crate::core::{
    Diagnostics, FilesystemId, Host, Result, StorageId, UnitName, VolumeId, ok_if_missing,
};

impl CleanupRunner {
    /// Detaches every attachment of a dying storage instance. This
    /// won't miss attachments, because a Dying storage instance cannot
    /// have attachments added to it. Without force the last detach
    /// failure is returned so the task retries; under force failures
    /// are logged and the pass completes.
    pub(crate) async fn cleanup_attachments_for_dying_storage(
        &self,
        storage: &StorageId,
        force: bool,
    ) -> Result<()> {
        let units = ok_if_missing(self.backend.storage_attachments(storage).await)?
            .unwrap_or_default();
        let mut last_err = None;
        for unit in units {
            match self.backend.detach_storage(storage, &unit, force).await {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => {
                    let err = err.annotate(format!(
                        "detaching storage '{storage}' from unit '{unit}'"
                    ));
                    if force {
                        warn!(error = %err, "couldn't detach storage");
                    } else {
                        last_err = Some(err);
                    }
                }
            }
        }
        match last_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Detaches every attachment of a dying volume.
    pub(crate) async fn cleanup_attachments_for_dying_volume(
        &self,
        volume: &VolumeId,
    ) -> Result<()> {
        let hosts = ok_if_missing(self.backend.volume_attachments(volume).await)?
            .unwrap_or_default();
        for host in hosts {
            match self.backend.detach_volume(&host, volume).await {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => {
                    return Err(err.annotate(format!(
                        "detaching volume '{volume}' from '{host}'"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Detaches every attachment of a dying filesystem.
    pub(crate) async fn cleanup_attachments_for_dying_filesystem(
        &self,
        filesystem: &FilesystemId,
    ) -> Result<()> {
        let hosts = ok_if_missing(self.backend.filesystem_attachments(filesystem).await)?
            .unwrap_or_default();
        for host in hosts {
            match self.backend.detach_filesystem(&host, filesystem).await {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => {
                    return Err(err.annotate(format!(
                        "detaching filesystem '{filesystem}' from '{host}'"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Releases the filesystems and volumes held through a dying unit.
    /// Units are never manual hosts.
    pub(crate) async fn cleanup_dying_unit_resources(
        &self,
        unit: &UnitName,
        force: bool,
    ) -> Result<()> {
        self.cleanup_dying_entity_storage(&Host::Unit(unit.clone()), false, force)
            .await
    }

    /// Releases the storage held through a dying host, machine or unit.
    ///
    /// Non-detachable filesystems live and die with the host, so they
    /// are destroyed here; detachable attachments are detached. On
    /// non-manual hosts the attachments of non-detachable or
    /// volume-backed filesystems are removed outright, with the backing
    /// volume's attachment plan: no agent survives the host to do it,
    /// and a lingering volume-backed attachment would pin its volume.
    /// Detachable non-backed attachments are left to their own
    /// lifecycle, and a volume still containing a filesystem is
    /// skipped, to be freed transitively when the filesystem goes.
    pub(crate) async fn cleanup_dying_entity_storage(
        &self,
        host: &Host,
        manual: bool,
        force: bool,
    ) -> Result<()> {
        let mut diag = Diagnostics::new();
        let host_filesystems = self.backend.host_filesystems(host).await?;
        for filesystem in &host_filesystems {
            if let Err(err) = self.backend.destroy_filesystem(filesystem).await {
                diag.forced(
                    force,
                    err,
                    &format!("could not destroy filesystem '{filesystem}'"),
                )?;
            }
        }

        for filesystem in self.backend.filesystem_attachments_of_host(host).await? {
            let detachable =
                ok_if_missing(self.backend.is_detachable_filesystem(&filesystem).await)?
                    .unwrap_or(false);
            if detachable
                && let Err(err) = self.backend.detach_filesystem(host, &filesystem).await
            {
                diag.forced(
                    force,
                    err,
                    &format!("could not detach filesystem '{filesystem}' from {host}"),
                )?;
            }
            if manual {
                continue;
            }
            let (remove, backing) = if detachable {
                match ok_if_missing(self.backend.filesystem_volume(&filesystem).await)?.flatten()
                {
                    Some(volume) => (true, Some(volume)),
                    None => (false, None),
                }
            } else {
                (true, None)
            };
            if !remove {
                continue;
            }
            if let Err(err) = self
                .backend
                .remove_filesystem_attachment(host, &filesystem)
                .await
            {
                diag.forced(
                    force,
                    err,
                    &format!("could not remove attachment of filesystem '{filesystem}' from {host}"),
                )?;
            }
            if let Some(volume) = backing
                && let Err(err) = self.backend.remove_volume_attachment_plan(host, &volume).await
            {
                diag.forced(
                    force,
                    err,
                    &format!("could not remove attachment plan of volume '{volume}' for {host}"),
                )?;
            }
        }

        if !manual {
            for filesystem in &host_filesystems {
                if let Err(err) = self.backend.remove_filesystem(filesystem).await {
                    diag.forced(
                        force,
                        err,
                        &format!("could not remove filesystem '{filesystem}'"),
                    )?;
                }
            }
        }

        for volume in self.backend.volume_attachments_of_host(host).await? {
            let detachable = ok_if_missing(self.backend.is_detachable_volume(&volume).await)?
                .unwrap_or(false);
            if !detachable {
                // Non-detachable volumes go down with the host.
                continue;
            }
            match self.backend.detach_volume(host, &volume).await {
                Ok(()) => {}
                Err(err) if err.is_contains_filesystem() => {
                    // Freed transitively once the filesystem is removed.
                }
                Err(err) => {
                    diag.forced(
                        force,
                        err,
                        &format!("could not detach volume '{volume}' from {host}"),
                    )?;
                }
            }
        }
        Ok(())
    }
}
