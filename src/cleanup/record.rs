use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::backend::DestroyModelParams;
use crate::core::{Result, StateError};

/// Closed set of cleanup task kinds. The wire names are the tags found
/// in persisted records; a persisted tag outside this set is treated as
/// a corrupt or future-version record and left pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CleanupKind {
    UnitsForDyingApplication,
    Charm,
    DyingUnit,
    ForceDestroyedUnit,
    ForceRemoveUnit,
    ApplicationsForDyingModel,
    DyingMachine,
    ForceDestroyedMachine,
    AttachmentsForDyingStorage,
    AttachmentsForDyingVolume,
    AttachmentsForDyingFilesystem,
    ModelsForDyingController,
    MachinesForDyingModel,
    StorageForDyingModel,
    DyingUnitResources,
}

impl CleanupKind {
    // The names are expressive, the wire values not so much; they
    // predate this engine and must keep matching old records.
    pub fn as_str(self) -> &'static str {
        match self {
            CleanupKind::UnitsForDyingApplication => "units",
            CleanupKind::Charm => "charm",
            CleanupKind::DyingUnit => "dyingUnit",
            CleanupKind::ForceDestroyedUnit => "forceDestroyUnit",
            CleanupKind::ForceRemoveUnit => "forceRemoveUnit",
            CleanupKind::ApplicationsForDyingModel => "applications",
            CleanupKind::DyingMachine => "dyingMachine",
            CleanupKind::ForceDestroyedMachine => "machine",
            CleanupKind::AttachmentsForDyingStorage => "storageAttachments",
            CleanupKind::AttachmentsForDyingVolume => "volumeAttachments",
            CleanupKind::AttachmentsForDyingFilesystem => "filesystemAttachments",
            CleanupKind::ModelsForDyingController => "models",
            CleanupKind::MachinesForDyingModel => "modelMachines",
            CleanupKind::StorageForDyingModel => "modelStorage",
            CleanupKind::DyingUnitResources => "dyingUnitResources",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        let kind = match tag {
            "units" => CleanupKind::UnitsForDyingApplication,
            "charm" => CleanupKind::Charm,
            "dyingUnit" => CleanupKind::DyingUnit,
            "forceDestroyUnit" => CleanupKind::ForceDestroyedUnit,
            "forceRemoveUnit" => CleanupKind::ForceRemoveUnit,
            "applications" => CleanupKind::ApplicationsForDyingModel,
            "dyingMachine" => CleanupKind::DyingMachine,
            "machine" => CleanupKind::ForceDestroyedMachine,
            "storageAttachments" => CleanupKind::AttachmentsForDyingStorage,
            "volumeAttachments" => CleanupKind::AttachmentsForDyingVolume,
            "filesystemAttachments" => CleanupKind::AttachmentsForDyingFilesystem,
            "models" => CleanupKind::ModelsForDyingController,
            "modelMachines" => CleanupKind::MachinesForDyingModel,
            "modelStorage" => CleanupKind::StorageForDyingModel,
            "dyingUnitResources" => CleanupKind::DyingUnitResources,
            _ => return None,
        };
        Some(kind)
    }
}

impl std::fmt::Display for CleanupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted cleanup task. Records are inserted once and never mutated;
/// a record stays visible to the dispatcher until its handler succeeds
/// and the record is deleted in its own commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupRecord {
    pub id: String,
    /// Wire tag; see [`CleanupKind`]. Kept as a string so records with
    /// unknown tags survive a drain untouched.
    pub kind: String,
    /// Earliest execution time. Older records carry no deadline and are
    /// eligible immediately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<DateTime<Utc>>,
    /// Opaque identifier interpreted by the handler.
    pub prefix: String,
    /// Handler-specific values, versioned by count: zero args means the
    /// legacy default behaviour.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
}

impl CleanupRecord {
    pub fn new(kind: CleanupKind, prefix: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: kind.as_str().to_string(),
            when: None,
            prefix: prefix.into(),
            args,
        }
    }

    pub fn at(
        when: DateTime<Utc>,
        kind: CleanupKind,
        prefix: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            when: Some(when),
            ..Self::new(kind, prefix, args)
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.when.is_none_or(|when| when <= now)
    }

    pub fn kind_tag(&self) -> Option<CleanupKind> {
        CleanupKind::parse(&self.kind)
    }
}

fn decode_bool(value: &Value, name: &'static str) -> Result<bool> {
    serde_json::from_value(value.clone())
        .map_err(|source| StateError::ArgumentDecode { name, source })
}

/// Decodes the `(destroy_storage, force)` flag pair carried by unit and
/// application cleanups. Missing positions fall back to `legacy`, since
/// records written before an argument existed must still process.
pub fn decode_flag_pair(args: &[Value], legacy: (bool, bool)) -> Result<(bool, bool)> {
    let (mut destroy_storage, mut force) = legacy;
    match args.len() {
        0 => {}
        1 => {
            destroy_storage = decode_bool(&args[0], "destroyStorage")?;
        }
        2 => {
            destroy_storage = decode_bool(&args[0], "destroyStorage")?;
            force = decode_bool(&args[1], "force")?;
        }
        n => return Err(StateError::ArgumentCount { max: 2, got: n }),
    }
    Ok((destroy_storage, force))
}

/// Decodes a single optional `force` flag.
pub fn decode_force_flag(args: &[Value]) -> Result<bool> {
    match args.len() {
        0 => Ok(false),
        1 => decode_bool(&args[0], "force"),
        n => Err(StateError::ArgumentCount { max: 1, got: n }),
    }
}

/// Decodes the destroy-model parameters for controller teardown. Old
/// records carry no args and destroyed storage unconditionally.
pub fn decode_model_params(args: &[Value]) -> Result<DestroyModelParams> {
    match args.len() {
        0 => Ok(DestroyModelParams {
            destroy_storage: Some(true),
        }),
        1 => serde_json::from_value(args[0].clone()).map_err(|source| {
            StateError::ArgumentDecode {
                name: "params",
                source,
            }
        }),
        n => Err(StateError::ArgumentCount { max: 1, got: n }),
    }
}
