use tracing::debug;

use super::runner::CleanupRunner;
use crate::core::{CharmUrl, Result};

impl CleanupRunner {
    /// Removes a charm whose last application reference may be gone.
    /// A charm picked up again while the task was pending is simply
    /// left alone.
    pub(crate) async fn cleanup_charm(&self, charm: &CharmUrl) -> Result<()> {
        match self.backend.destroy_charm(charm).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) if err.is_charm_in_use() => {
                debug!(charm = %charm, "charm is back in use, leaving it");
                return Ok(());
            }
            Err(err) => return Err(err.annotate("failed to destroy charm")),
        }
        self.backend
            .remove_charm(charm)
            .await
            .map_err(|err| err.annotate("failed to remove charm"))
    }
}
