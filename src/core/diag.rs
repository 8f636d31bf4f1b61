use tracing::warn;

use super::error::{Result, StateError};

/// Accumulating record of non-fatal trouble encountered while tearing
/// an entity down under force. Force mode trades strict correctness for
/// forward progress: instead of failing, an operation records what it
/// overrode here so callers can inspect it after the fact.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<String>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a warning and logs it. Logging happens here, once, so
    /// call sites never have to re-log absorbed diagnostics.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.warnings.push(message);
    }

    pub fn absorb(&mut self, other: Diagnostics) {
        self.warnings.extend(other.warnings);
    }

    /// Applies the shared force-mode error policy: a not-found error is
    /// always satisfied; under force anything else becomes a warning and
    /// execution continues; without force the error propagates.
    pub fn forced(&mut self, force: bool, err: StateError, context: &str) -> Result<()> {
        if err.is_not_found() {
            return Ok(());
        }
        if force {
            self.warn(format!("{context}: {err}"));
            return Ok(());
        }
        Err(err.annotate(context))
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.warnings.len()
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}
