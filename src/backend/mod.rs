//! Collaborator seam between the cleanup engine and the entity
//! lifecycle layer. The engine only observes and mutates entity state
//! through these operations; it never writes lifecycle fields directly.
//!
//! Every lookup returns a distinguishable not-found error
//! ([`crate::core::StateError::is_not_found`]) which handlers treat as
//! already-satisfied, never as failure. Force-capable operations return
//! [`Diagnostics`] describing what they overrode.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{
    ApplicationName, CharmUrl, Diagnostics, FilesystemId, Host, Life, MachineId, ModelUuid,
    RelationId, Result, StorageId, UnitName, VolumeId,
};

pub use memory::InMemoryBackend;

#[derive(Debug, Clone, Copy, Default)]
pub struct DestroyUnitParams {
    pub destroy_storage: bool,
    pub force: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DestroyApplicationParams {
    pub remove_offers: bool,
    pub destroy_storage: bool,
    pub force: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DestroyModelParams {
    /// None leaves the decision to each storage instance's owner;
    /// Some(false) releases storage to the provider instead of
    /// destroying it.
    #[serde(default)]
    pub destroy_storage: Option<bool>,
}

#[async_trait]
pub trait UnitOps {
    async fn unit_life(&self, unit: &UnitName) -> Result<Life>;
    async fn alive_units(&self, app: &ApplicationName) -> Result<Vec<UnitName>>;
    async fn unit_subordinates(&self, unit: &UnitName) -> Result<Vec<UnitName>>;
    async fn joined_relations(&self, unit: &UnitName) -> Result<Vec<RelationId>>;
    async fn relations_in_scope(&self, unit: &UnitName) -> Result<Vec<RelationId>>;

    /// Signals to peers that the unit is departing the relation,
    /// letting them converge without waiting for the unit agent.
    async fn prepare_leave_scope(&self, relation: &RelationId, unit: &UnitName) -> Result<()>;
    async fn leave_scope(&self, relation: &RelationId, unit: &UnitName) -> Result<()>;

    async fn destroy_unit(&self, unit: &UnitName, params: DestroyUnitParams) -> Result<()>;
    async fn destroy_unit_with_force(&self, unit: &UnitName, force: bool) -> Result<Diagnostics>;

    /// Transitions the unit to Dead. Fails with a retryable blocking
    /// error while subordinates or storage attachments remain.
    async fn ensure_unit_dead(&self, unit: &UnitName) -> Result<()>;
    async fn remove_unit_with_force(&self, unit: &UnitName, force: bool) -> Result<Diagnostics>;
}

#[async_trait]
pub trait MachineOps {
    async fn machine_life(&self, machine: &MachineId) -> Result<Life>;
    async fn all_machines(&self) -> Result<Vec<MachineId>>;
    async fn containers(&self, machine: &MachineId) -> Result<Vec<MachineId>>;
    async fn parent_machine(&self, machine: &MachineId) -> Result<Option<MachineId>>;
    async fn principal_units(&self, machine: &MachineId) -> Result<Vec<UnitName>>;
    async fn is_manager(&self, machine: &MachineId) -> Result<bool>;
    async fn is_manual(&self, machine: &MachineId) -> Result<bool>;
    async fn has_vote(&self, machine: &MachineId) -> Result<bool>;

    /// Guarded compare-and-swap: revoking an already-revoked vote is a
    /// no-op, so a concurrent refresh is tolerated.
    async fn revoke_vote(&self, machine: &MachineId) -> Result<()>;
    async fn remove_controller_machine(&self, machine: &MachineId) -> Result<()>;

    async fn destroy_machine(&self, machine: &MachineId) -> Result<()>;
    async fn force_destroy_machine(&self, machine: &MachineId) -> Result<()>;
    async fn ensure_machine_dead(&self, machine: &MachineId) -> Result<()>;
    async fn remove_machine(&self, machine: &MachineId) -> Result<()>;
}

#[async_trait]
pub trait ApplicationOps {
    async fn alive_applications(&self) -> Result<Vec<ApplicationName>>;
    async fn destroy_application(
        &self,
        app: &ApplicationName,
        params: DestroyApplicationParams,
    ) -> Result<()>;
}

#[async_trait]
pub trait ModelOps {
    async fn all_models(&self) -> Result<Vec<ModelUuid>>;
    async fn destroy_model(&self, model: &ModelUuid, params: DestroyModelParams) -> Result<()>;
}

#[async_trait]
pub trait CharmOps {
    /// May fail with a charm-in-use error while references remain.
    async fn destroy_charm(&self, charm: &CharmUrl) -> Result<()>;
    async fn remove_charm(&self, charm: &CharmUrl) -> Result<()>;
}

#[async_trait]
pub trait StorageOps {
    async fn unit_storage_attachments(&self, unit: &UnitName) -> Result<Vec<StorageId>>;
    async fn storage_attachments(&self, storage: &StorageId) -> Result<Vec<UnitName>>;
    async fn detach_storage(&self, storage: &StorageId, unit: &UnitName, force: bool)
    -> Result<()>;
    async fn remove_storage_attachment(
        &self,
        storage: &StorageId,
        unit: &UnitName,
        force: bool,
    ) -> Result<()>;
    async fn destroy_storage_instance(
        &self,
        storage: &StorageId,
        destroy_attached: bool,
        force: bool,
    ) -> Result<()>;
    async fn release_storage_instance(
        &self,
        storage: &StorageId,
        destroy_attached: bool,
        force: bool,
    ) -> Result<()>;
    async fn all_storage_instances(&self) -> Result<Vec<StorageId>>;

    /// Filesystems provisioned on the host itself, as opposed to
    /// filesystems merely attached to it.
    async fn host_filesystems(&self, host: &Host) -> Result<Vec<FilesystemId>>;
    async fn filesystem_attachments_of_host(&self, host: &Host) -> Result<Vec<FilesystemId>>;
    async fn volume_attachments_of_host(&self, host: &Host) -> Result<Vec<VolumeId>>;
    async fn filesystem_attachments(&self, filesystem: &FilesystemId) -> Result<Vec<Host>>;
    async fn volume_attachments(&self, volume: &VolumeId) -> Result<Vec<Host>>;
    async fn is_detachable_filesystem(&self, filesystem: &FilesystemId) -> Result<bool>;
    async fn is_detachable_volume(&self, volume: &VolumeId) -> Result<bool>;

    /// Backing volume of a volume-backed filesystem, if any.
    async fn filesystem_volume(&self, filesystem: &FilesystemId) -> Result<Option<VolumeId>>;

    async fn destroy_filesystem(&self, filesystem: &FilesystemId) -> Result<()>;
    async fn detach_filesystem(&self, host: &Host, filesystem: &FilesystemId) -> Result<()>;
    async fn remove_filesystem(&self, filesystem: &FilesystemId) -> Result<()>;
    async fn remove_filesystem_attachment(
        &self,
        host: &Host,
        filesystem: &FilesystemId,
    ) -> Result<()>;

    /// May fail with a contains-filesystem error; such volumes are
    /// freed transitively once their filesystem is removed.
    async fn detach_volume(&self, host: &Host, volume: &VolumeId) -> Result<()>;
    async fn remove_volume_attachment_plan(&self, host: &Host, volume: &VolumeId) -> Result<()>;
}

/// Umbrella bound for the full lifecycle collaborator surface.
pub trait StateBackend:
    UnitOps + MachineOps + ApplicationOps + ModelOps + CharmOps + StorageOps + Send + Sync
{
}

impl<T> StateBackend for T where
    T: UnitOps + MachineOps + ApplicationOps + ModelOps + CharmOps + StorageOps + Send + Sync
{
}
