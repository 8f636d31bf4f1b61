pub mod diag;
pub mod entity;
pub mod error;
pub mod life;

pub use diag::Diagnostics;
pub use entity::{
    ApplicationName, CharmUrl, FilesystemId, Host, MachineId, ModelUuid, RelationId, StorageId,
    UnitName, VolumeId,
};
pub use error::{Result, StateError, ok_if_missing};
pub use life::Life;
