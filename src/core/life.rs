use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state shared by every managed entity.
///
/// `Alive → Dying → Dead → (removed)`. Once an entity is Dying the
/// backend admits no new children under it, which is what lets a
/// cleanup handler enumerate "all current children" exactly once.
/// Dead is a precondition for final removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Life {
    Alive,
    Dying,
    Dead,
}

impl Life {
    pub fn is_alive(self) -> bool {
        self == Life::Alive
    }

    pub fn is_dying(self) -> bool {
        self == Life::Dying
    }

    pub fn is_dead(self) -> bool {
        self == Life::Dead
    }
}

impl fmt::Display for Life {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Life::Alive => write!(f, "alive"),
            Life::Dying => write!(f, "dying"),
            Life::Dead => write!(f, "dead"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_round_trip() {
        assert_eq!(serde_json::to_string(&Life::Dying).unwrap(), "\"dying\"");
        let life: Life = serde_json::from_str("\"dead\"").unwrap();
        assert_eq!(life, Life::Dead);
    }
}
