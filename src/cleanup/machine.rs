//! Machine teardown handlers. Container nesting is flattened into an
//! explicit work-list so forced teardown runs deepest-first.

use tracing::{debug, warn};

use super::runner::CleanupRunner;
use crate::core::{Host, MachineId, Result, ok_if_missing};

impl CleanupRunner {
    /// Releases the resources of a dying machine so its agent can shut
    /// down cleanly. Forced teardown is not scheduled here; a forced
    /// destroy enqueues its own machine cleanup directly.
    pub(crate) async fn cleanup_dying_machine(&self, machine: &MachineId, force: bool) -> Result<()> {
        if ok_if_missing(self.backend.machine_life(machine).await)?.is_none() {
            return Ok(());
        }
        self.cleanup_dying_machine_resources(machine, force).await
    }

    /// Tears a force-destroyed machine down: containers deepest-first,
    /// then the machine's own units, resources, and controller
    /// responsibilities. The machine record itself is left in place, at
    /// Dead, for the provisioner to decommission and remove.
    pub(crate) async fn cleanup_force_destroyed_machine(&self, machine: &MachineId) -> Result<()> {
        if ok_if_missing(self.backend.machine_life(machine).await)?.is_none() {
            debug!(machine = %machine, "no need to force destroy machine");
            return Ok(());
        }

        for container in self.container_teardown_order(machine).await? {
            if ok_if_missing(self.backend.machine_life(&container).await)?.is_none() {
                continue;
            }
            self.backend.force_destroy_machine(&container).await?;
            self.force_machine_teardown(&container).await?;
            if ok_if_missing(self.backend.machine_life(&container).await)?.is_none() {
                continue;
            }
            self.backend.remove_machine(&container).await?;
        }

        self.force_machine_teardown(machine).await
    }

    /// Flattens the container tree under `machine` into deepest-first
    /// order. A container can itself host containers, and a host cannot
    /// die while it still has any.
    async fn container_teardown_order(&self, machine: &MachineId) -> Result<Vec<MachineId>> {
        let mut order = Vec::new();
        let mut pending = ok_if_missing(self.backend.containers(machine).await)?.unwrap_or_default();
        while let Some(container) = pending.pop() {
            match ok_if_missing(self.backend.containers(&container).await)? {
                Some(nested) => pending.extend(nested),
                None => continue,
            }
            order.push(container);
        }
        order.reverse();
        Ok(order)
    }

    /// Shared teardown body for a machine or container under force:
    /// obliterate its units, release its storage, shed any controller
    /// duties, and push it to Dead.
    async fn force_machine_teardown(&self, machine: &MachineId) -> Result<()> {
        let principals = ok_if_missing(self.backend.principal_units(machine).await)?
            .unwrap_or_default();
        for unit in principals {
            let diag = self.obliterate_unit(&unit, true).await?;
            if !diag.is_empty() {
                warn!(
                    unit = %unit,
                    machine = %machine,
                    warnings = diag.len(),
                    "errors while obliterating unit",
                );
            }
        }

        self.cleanup_dying_machine_resources(machine, true).await?;

        if ok_if_missing(self.backend.is_manager(machine).await)? == Some(true) {
            // The vote must be gone before the controller reference,
            // or quorum accounting breaks.
            if self.backend.has_vote(machine).await? {
                self.backend.revoke_vote(machine).await?;
            }
            self.backend.remove_controller_machine(machine).await?;
        }

        // Re-read: the teardown above may have removed the machine.
        if ok_if_missing(self.backend.machine_life(machine).await)?.is_none() {
            return Ok(());
        }
        self.backend
            .ensure_machine_dead(machine)
            .await
            .map_err(|err| err.annotate(format!("cannot set machine '{machine}' dead")))
    }

    /// Releases the filesystems and volumes held through the machine.
    /// Manual machines keep their non-detachable filesystems: the
    /// underlying host survives, so its disks must too.
    pub(crate) async fn cleanup_dying_machine_resources(
        &self,
        machine: &MachineId,
        force: bool,
    ) -> Result<()> {
        let manual = self.backend.is_manual(machine).await?;
        self.cleanup_dying_entity_storage(&Host::Machine(machine.clone()), manual, force)
            .await
    }
}
