use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_type!(
    /// Unit identifier, e.g. `myapp/0`.
    UnitName
);
id_type!(
    /// Machine identifier; containers use nested ids, e.g. `0/lxd/2`.
    MachineId
);
id_type!(ApplicationName);
id_type!(ModelUuid);
id_type!(StorageId);
id_type!(VolumeId);
id_type!(FilesystemId);
id_type!(CharmUrl);
id_type!(RelationId);

/// Owner side of a storage attachment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Host {
    Machine(MachineId),
    Unit(UnitName),
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Machine(id) => write!(f, "machine {id}"),
            Host::Unit(name) => write!(f, "unit {name}"),
        }
    }
}
