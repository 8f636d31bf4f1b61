//! Unit teardown handlers, including the force-escalation chain
//! `dyingUnit → forceDestroyUnit → forceRemoveUnit`.

use tracing::{debug, warn};

use super::record::CleanupKind;
use super::runner::CleanupRunner;
use crate::backend::DestroyUnitParams;
use crate::core::{ApplicationName, Diagnostics, Result, UnitName, ok_if_missing};

impl CleanupRunner {
    /// Marks everything owned by a dying unit as dying too, so the unit
    /// can terminate. Relations are told the unit is departing first,
    /// letting peers converge without waiting for its agent.
    pub(crate) async fn cleanup_dying_unit(
        &self,
        unit: &UnitName,
        destroy_storage: bool,
        force: bool,
    ) -> Result<()> {
        if ok_if_missing(self.backend.unit_life(unit).await)?.is_none() {
            return Ok(());
        }

        let mut diag = Diagnostics::new();
        let relations = match self.backend.joined_relations(unit).await {
            Ok(relations) => relations,
            Err(err) => {
                diag.forced(
                    force,
                    err,
                    &format!("could not get joined relations for unit '{unit}'"),
                )?;
                Vec::new()
            }
        };
        for relation in relations {
            if let Err(err) = self.backend.prepare_leave_scope(&relation, unit).await {
                diag.forced(
                    force,
                    err,
                    &format!("could not prepare to leave scope of relation '{relation}' for unit '{unit}'"),
                )?;
            }
        }

        // Backstop: if the unit and machine agents never finish the
        // graceful path, forced removal still happens.
        if force {
            self.schedule_force_cleanup(CleanupKind::ForceDestroyedUnit, unit.as_str())
                .await;
        }

        if destroy_storage {
            // Detach and mark storage instances as dying, allowing the
            // unit to terminate.
            self.cleanup_unit_storage_instances(unit, force).await
        } else {
            // Mark only the attachments as dying, leaving the instances
            // behind for reattachment.
            self.cleanup_unit_storage_attachments(unit, false, force)
                .await
        }
    }

    /// Backstop for a force-destroyed unit whose usual cleanup hasn't
    /// happened. Everything here is best-effort except the final
    /// transition to Dead: a blocking-dependents error is returned so
    /// the same task stays pending and retries until the dependents
    /// have gone.
    pub(crate) async fn cleanup_force_destroyed_unit(&self, unit: &UnitName) -> Result<()> {
        if ok_if_missing(self.backend.unit_life(unit).await)?.is_none() {
            debug!(unit = %unit, "no need to force unit to dead");
            return Ok(());
        }

        match self.backend.unit_subordinates(unit).await {
            Ok(subordinates) => {
                for subordinate in subordinates {
                    match self.backend.destroy_unit_with_force(&subordinate, true).await {
                        Ok(diag) if !diag.is_empty() => {
                            warn!(
                                subordinate = %subordinate,
                                warnings = diag.len(),
                                "errors while destroying subordinate",
                            );
                        }
                        Ok(_) => {}
                        Err(err) if err.is_not_found() => {}
                        Err(err) => {
                            warn!(subordinate = %subordinate, error = %err, "couldn't force destroy subordinate");
                        }
                    }
                }
            }
            Err(err) => warn!(unit = %unit, error = %err, "couldn't get subordinates to force destroy"),
        }

        match self.backend.relations_in_scope(unit).await {
            Ok(relations) => {
                for relation in relations {
                    if let Err(err) = self.backend.leave_scope(&relation, unit).await {
                        warn!(
                            unit = %unit,
                            relation = %relation,
                            error = %err,
                            "unit couldn't leave relation scope",
                        );
                    }
                }
            }
            Err(err) => warn!(unit = %unit, error = %err, "couldn't get in-scope relations"),
        }

        if let Err(err) = self.cleanup_unit_storage_attachments(unit, true, true).await {
            warn!(unit = %unit, error = %err, "couldn't remove storage attachments");
        }

        match self.backend.ensure_unit_dead(unit).await {
            // We do want to fail and try again here: the unit can't go
            // to Dead until its subordinates and storage are gone, so
            // give them time to be removed.
            Err(err) if err.is_retryable() => return Err(err),
            Err(err) => warn!(unit = %unit, error = %err, "couldn't set unit dead"),
            Ok(()) => {}
        }

        // One more backstop to remove the unit if the deployer doesn't.
        self.schedule_force_cleanup(CleanupKind::ForceRemoveUnit, unit.as_str())
            .await;
        Ok(())
    }

    pub(crate) async fn cleanup_force_remove_unit(&self, unit: &UnitName) -> Result<()> {
        if ok_if_missing(self.backend.unit_life(unit).await)?.is_none() {
            debug!(unit = %unit, "no need to force remove unit");
            return Ok(());
        }
        let diag = self.backend.remove_unit_with_force(unit, true).await?;
        if !diag.is_empty() {
            warn!(unit = %unit, warnings = diag.len(), "errors encountered force-removing unit");
        }
        Ok(())
    }

    /// Destroys every unit still Alive under a dying application. This
    /// won't miss units, because a Dying application cannot have units
    /// added to it; but each unit is destroyed in its own commit since
    /// they could be in any state at all.
    pub(crate) async fn cleanup_units_for_dying_application(
        &self,
        app: &ApplicationName,
        destroy_storage: bool,
        force: bool,
    ) -> Result<()> {
        let units = ok_if_missing(self.backend.alive_units(app).await)?.unwrap_or_default();
        for unit in units {
            self.backend
                .destroy_unit(
                    &unit,
                    DestroyUnitParams {
                        destroy_storage,
                        force,
                    },
                )
                .await?;
        }
        Ok(())
    }

    /// Detaches (and optionally removes) every storage attachment of
    /// the unit, leaving the storage instances behind.
    pub(crate) async fn cleanup_unit_storage_attachments(
        &self,
        unit: &UnitName,
        remove: bool,
        force: bool,
    ) -> Result<()> {
        let mut diag = Diagnostics::new();
        let attachments = self.backend.unit_storage_attachments(unit).await?;
        for storage in attachments {
            if let Err(err) = self.backend.detach_storage(&storage, unit, force).await {
                diag.forced(
                    force,
                    err,
                    &format!("could not detach storage '{storage}' for unit '{unit}'"),
                )?;
            }
            if !remove {
                continue;
            }
            if let Err(err) = self
                .backend
                .remove_storage_attachment(&storage, unit, force)
                .await
            {
                diag.forced(
                    force,
                    err,
                    &format!(
                        "could not remove storage attachment of '{storage}' for unit '{unit}'"
                    ),
                )?;
            }
        }
        Ok(())
    }

    /// Destroys the storage instances attached to the unit outright.
    pub(crate) async fn cleanup_unit_storage_instances(
        &self,
        unit: &UnitName,
        force: bool,
    ) -> Result<()> {
        let attachments = self.backend.unit_storage_attachments(unit).await?;
        for storage in attachments {
            match self
                .backend
                .destroy_storage_instance(&storage, true, force)
                .await
            {
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err),
                Ok(()) => {}
            }
        }
        Ok(())
    }

    /// Removes a unit and its whole subordinate tree from state. Only
    /// sane in the context of machine obliteration, where unclean unit
    /// shutdown can't leave the machine in a difficult state.
    ///
    /// Dependents are expanded through an explicit work-list rather
    /// than recursion: destruction runs principal-first, death and
    /// removal run dependents-first.
    pub(crate) async fn obliterate_unit(
        &self,
        unit: &UnitName,
        force: bool,
    ) -> Result<Diagnostics> {
        let mut diag = Diagnostics::new();
        let mut order: Vec<UnitName> = Vec::new();
        let mut pending = vec![unit.clone()];
        while let Some(name) = pending.pop() {
            if ok_if_missing(self.backend.unit_life(&name).await)?.is_none() {
                continue;
            }
            match self.backend.destroy_unit_with_force(&name, force).await {
                Ok(d) => diag.absorb(d),
                Err(err) => {
                    diag.forced(force, err, &format!("cannot destroy unit '{name}'"))?;
                }
            }
            // The destroy may have removed the unit outright.
            if ok_if_missing(self.backend.unit_life(&name).await)?.is_none() {
                continue;
            }
            if let Err(err) = self.cleanup_unit_storage_attachments(&name, true, force).await {
                diag.forced(
                    force,
                    err,
                    &format!("cannot destroy storage for unit '{name}'"),
                )?;
            }
            match self.backend.unit_subordinates(&name).await {
                Ok(subordinates) => pending.extend(subordinates),
                Err(err) => {
                    diag.forced(
                        force,
                        err,
                        &format!("cannot get subordinates of unit '{name}'"),
                    )?;
                }
            }
            order.push(name);
        }

        // Dependents must be dead and gone before their principals can
        // leave Dying.
        for name in order.into_iter().rev() {
            if ok_if_missing(self.backend.unit_life(&name).await)?.is_none() {
                continue;
            }
            if let Err(err) = self.backend.ensure_unit_dead(&name).await {
                diag.forced(force, err, &format!("cannot set unit '{name}' dead"))?;
            }
            match ok_if_missing(self.backend.remove_unit_with_force(&name, force).await)? {
                Some(d) => diag.absorb(d),
                None => continue,
            }
        }
        Ok(diag)
    }
}
