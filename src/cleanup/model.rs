//! Model and controller teardown fan-out. These handlers enumerate
//! whole entity classes and destroy each member, which in turn enqueues
//! the per-entity cleanup chains.

use super::runner::CleanupRunner;
use crate::backend::{DestroyApplicationParams, DestroyModelParams};
use crate::core::Result;

impl CleanupRunner {
    /// Destroys every application still Alive in a dying model. Offers
    /// go too: nothing may keep a reference into a dying model.
    pub(crate) async fn cleanup_applications_for_dying_model(&self) -> Result<()> {
        for app in self.backend.alive_applications().await? {
            match self
                .backend
                .destroy_application(
                    &app,
                    DestroyApplicationParams {
                        remove_offers: true,
                        ..Default::default()
                    },
                )
                .await
            {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => {
                    return Err(err.annotate(format!("destroying application '{app}'")));
                }
            }
        }
        Ok(())
    }

    /// Destroys every machine in a dying model. Controller machines are
    /// skipped so the controller can finish the teardown, and containers
    /// are skipped because they go down with their host. A destroy
    /// failure propagates, leaving the task pending for retry.
    pub(crate) async fn cleanup_machines_for_dying_model(&self) -> Result<()> {
        for machine in self.backend.all_machines().await? {
            if self.backend.is_manager(&machine).await? {
                continue;
            }
            if self.backend.parent_machine(&machine).await?.is_some() {
                continue;
            }
            // Manually provisioned machines are someone else's host;
            // destroy them gracefully only.
            let result = if self.backend.is_manual(&machine).await? {
                self.backend.destroy_machine(&machine).await
            } else {
                self.backend.force_destroy_machine(&machine).await
            };
            match result {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => {
                    return Err(err.annotate(format!("destroying machine '{machine}'")));
                }
            }
        }
        Ok(())
    }

    /// Destroys or releases every storage instance in a dying model.
    pub(crate) async fn cleanup_storage_for_dying_model(
        &self,
        destroy_storage: bool,
        force: bool,
    ) -> Result<()> {
        for storage in self.backend.all_storage_instances().await? {
            let result = if destroy_storage {
                self.backend
                    .destroy_storage_instance(&storage, true, force)
                    .await
            } else {
                self.backend
                    .release_storage_instance(&storage, true, force)
                    .await
            };
            match result {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Destroys every model hosted by a dying controller, passing the
    /// controller-level storage decision down to each.
    pub(crate) async fn cleanup_models_for_dying_controller(
        &self,
        params: DestroyModelParams,
    ) -> Result<()> {
        for model in self.backend.all_models().await? {
            match self.backend.destroy_model(&model, params.clone()).await {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.annotate(format!("destroying model '{model}'"))),
            }
        }
        Ok(())
    }
}
