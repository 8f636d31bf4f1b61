use thiserror::Error;

use super::entity::{CharmUrl, MachineId, UnitName, VolumeId};

#[derive(Error, Debug)]
pub enum StateError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("unit '{0}' has subordinates")]
    UnitHasSubordinates(UnitName),

    #[error("unit '{0}' has storage attachments")]
    UnitHasStorageAttachments(UnitName),

    #[error("machine '{0}' has dependents")]
    MachineHasDependents(MachineId),

    #[error("volume '{0}' contains a filesystem")]
    ContainsFilesystem(VolumeId),

    #[error("charm '{0}' is still in use")]
    CharmInUse(CharmUrl),

    #[error("'{0}' is not alive")]
    NotAlive(String),

    #[error("cannot remove '{0}': not dead")]
    NotDead(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("expected 0-{max} arguments, got {got}")]
    ArgumentCount { max: usize, got: usize },

    #[error("unmarshalling cleanup arg '{name}': {source}")]
    ArgumentDecode {
        name: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown cleanup kind '{0}'")]
    UnknownKind(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("{context}: {source}")]
    Annotated {
        context: String,
        #[source]
        source: Box<StateError>,
    },
}

pub type Result<T> = std::result::Result<T, StateError>;

impl StateError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }

    /// Wraps the error with context, preserving the underlying variant
    /// for the `is_*` classifiers below.
    pub fn annotate(self, context: impl Into<String>) -> Self {
        Self::Annotated {
            context: context.into(),
            source: Box::new(self),
        }
    }

    fn root(&self) -> &StateError {
        let mut err = self;
        while let StateError::Annotated { source, .. } = err {
            err = source;
        }
        err
    }

    /// Entity already gone. Treated as success by convention throughout
    /// the cleanup engine.
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), StateError::NotFound(_))
    }

    /// Blocking condition that clears itself once dependents finish
    /// dying; the owning cleanup task stays pending and is retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root(),
            StateError::UnitHasSubordinates(_) | StateError::UnitHasStorageAttachments(_)
        )
    }

    pub fn is_contains_filesystem(&self) -> bool {
        matches!(self.root(), StateError::ContainsFilesystem(_))
    }

    pub fn is_charm_in_use(&self) -> bool {
        matches!(self.root(), StateError::CharmInUse(_))
    }
}

/// Collapses a not-found error into `None` so call sites can treat
/// already-removed entities as satisfied.
pub fn ok_if_missing<T>(res: Result<T>) -> Result<Option<T>> {
    match res {
        Ok(v) => Ok(Some(v)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifiers_see_through_annotations() {
        let err = StateError::not_found("unit 'myapp/0'")
            .annotate("reading unit")
            .annotate("dying unit cleanup");
        assert!(err.is_not_found());
        assert!(!err.is_retryable());

        let err = StateError::UnitHasSubordinates(UnitName::from("myapp/0")).annotate("ensure dead");
        assert!(err.is_retryable());
        assert!(!err.is_not_found());
    }

    #[test]
    fn ok_if_missing_passes_other_errors() {
        let missing: Result<()> = Err(StateError::not_found("volume '7'"));
        assert!(matches!(ok_if_missing(missing), Ok(None)));

        let store: Result<()> = Err(StateError::Store("commit failed".into()));
        assert!(ok_if_missing(store).is_err());
    }

    #[test]
    fn argument_count_message() {
        let err = StateError::ArgumentCount { max: 2, got: 3 };
        assert_eq!(err.to_string(), "expected 0-2 arguments, got 3");
    }
}
