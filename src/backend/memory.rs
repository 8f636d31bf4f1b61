//! Reference lifecycle backend backed by an in-memory entity graph.
//!
//! The whole graph lives behind one write lock, so every operation is a
//! single atomic commit, and destroy operations enqueue their follow-up
//! cleanup tasks through the shared [`CleanupStore`] while the lock is
//! held: the lifecycle change and the enqueue land together or not at
//! all.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::RwLock;

use super::{
    ApplicationOps, CharmOps, DestroyApplicationParams, DestroyModelParams, DestroyUnitParams,
    MachineOps, ModelOps, StorageOps, UnitOps,
};
use crate::cleanup::{CleanupKind, CleanupRecord, CleanupStore};
use crate::core::{
    ApplicationName, CharmUrl, Diagnostics, FilesystemId, Host, Life, MachineId, ModelUuid,
    RelationId, Result, StateError, StorageId, UnitName, VolumeId,
};

#[derive(Debug)]
struct UnitDoc {
    life: Life,
    application: ApplicationName,
    machine: Option<MachineId>,
    principal: Option<UnitName>,
    subordinates: Vec<UnitName>,
}

#[derive(Debug)]
struct MachineDoc {
    life: Life,
    manager: bool,
    manual: bool,
    has_vote: bool,
    parent: Option<MachineId>,
    containers: Vec<MachineId>,
    principals: Vec<UnitName>,
}

#[derive(Debug)]
struct ApplicationDoc {
    life: Life,
    offers: Vec<String>,
}

#[derive(Debug)]
struct ModelDoc {
    life: Life,
}

#[derive(Debug)]
struct StorageDoc {
    life: Life,
    released: bool,
    attachments: HashMap<UnitName, Life>,
}

#[derive(Debug)]
struct VolumeDoc {
    life: Life,
    detachable: bool,
    /// Filesystem this volume backs, if any.
    backs: Option<FilesystemId>,
    attachments: HashMap<Host, Life>,
    plans: HashSet<Host>,
}

#[derive(Debug)]
struct FilesystemDoc {
    life: Life,
    detachable: bool,
    /// Host the filesystem is provisioned on, for non-detachable ones.
    host: Option<Host>,
    volume: Option<VolumeId>,
    attachments: HashMap<Host, Life>,
}

#[derive(Debug)]
struct CharmDoc {
    refcount: usize,
    dying: bool,
}

#[derive(Debug, Default)]
struct RelationDoc {
    members: HashSet<UnitName>,
    departing: HashSet<UnitName>,
}

#[derive(Default)]
struct Graph {
    units: HashMap<UnitName, UnitDoc>,
    machines: HashMap<MachineId, MachineDoc>,
    applications: HashMap<ApplicationName, ApplicationDoc>,
    models: HashMap<ModelUuid, ModelDoc>,
    storage: HashMap<StorageId, StorageDoc>,
    volumes: HashMap<VolumeId, VolumeDoc>,
    filesystems: HashMap<FilesystemId, FilesystemDoc>,
    charms: HashMap<CharmUrl, CharmDoc>,
    relations: HashMap<RelationId, RelationDoc>,
}

impl Graph {
    fn unit(&self, unit: &UnitName) -> Result<&UnitDoc> {
        self.units
            .get(unit)
            .ok_or_else(|| StateError::not_found(format!("unit '{unit}'")))
    }

    fn unit_mut(&mut self, unit: &UnitName) -> Result<&mut UnitDoc> {
        self.units
            .get_mut(unit)
            .ok_or_else(|| StateError::not_found(format!("unit '{unit}'")))
    }

    fn machine(&self, machine: &MachineId) -> Result<&MachineDoc> {
        self.machines
            .get(machine)
            .ok_or_else(|| StateError::not_found(format!("machine '{machine}'")))
    }

    fn machine_mut(&mut self, machine: &MachineId) -> Result<&mut MachineDoc> {
        self.machines
            .get_mut(machine)
            .ok_or_else(|| StateError::not_found(format!("machine '{machine}'")))
    }

    fn storage(&self, storage: &StorageId) -> Result<&StorageDoc> {
        self.storage
            .get(storage)
            .ok_or_else(|| StateError::not_found(format!("storage '{storage}'")))
    }

    fn storage_mut(&mut self, storage: &StorageId) -> Result<&mut StorageDoc> {
        self.storage
            .get_mut(storage)
            .ok_or_else(|| StateError::not_found(format!("storage '{storage}'")))
    }

    fn volume_mut(&mut self, volume: &VolumeId) -> Result<&mut VolumeDoc> {
        self.volumes
            .get_mut(volume)
            .ok_or_else(|| StateError::not_found(format!("volume '{volume}'")))
    }

    fn filesystem_mut(&mut self, filesystem: &FilesystemId) -> Result<&mut FilesystemDoc> {
        self.filesystems
            .get_mut(filesystem)
            .ok_or_else(|| StateError::not_found(format!("filesystem '{filesystem}'")))
    }

    /// A unit with no subordinates, no storage attachments and no
    /// relation scopes can be removed outright instead of going Dying.
    fn unit_is_unblocked(&self, unit: &UnitName) -> bool {
        let no_subordinates = self
            .units
            .get(unit)
            .map(|doc| doc.subordinates.is_empty())
            .unwrap_or(true);
        no_subordinates
            && !self
                .storage
                .values()
                .any(|s| s.attachments.contains_key(unit))
            && !self.relations.values().any(|r| r.members.contains(unit))
    }

    fn remove_unit(&mut self, unit: &UnitName) {
        let Some(doc) = self.units.remove(unit) else {
            return;
        };
        if let Some(principal) = &doc.principal
            && let Some(pdoc) = self.units.get_mut(principal)
        {
            pdoc.subordinates.retain(|s| s != unit);
        }
        if let Some(machine) = &doc.machine
            && let Some(mdoc) = self.machines.get_mut(machine)
        {
            mdoc.principals.retain(|p| p != unit);
        }
        for relation in self.relations.values_mut() {
            relation.members.remove(unit);
            relation.departing.remove(unit);
        }
    }
}

pub struct InMemoryBackend {
    graph: RwLock<Graph>,
    store: Arc<dyn CleanupStore>,
}

impl InMemoryBackend {
    pub fn new(store: Arc<dyn CleanupStore>) -> Self {
        Self {
            graph: RwLock::new(Graph::default()),
            store,
        }
    }

    /// Enqueue failure is fatal to the surrounding operation: cleanup
    /// must never be silently skipped.
    async fn enqueue(&self, kind: CleanupKind, prefix: &str, args: Vec<Value>) -> Result<()> {
        self.store
            .insert(CleanupRecord::new(kind, prefix, args))
            .await
    }
}

// ---------------------------------------------------------------------
// Graph seeding and inspection (test fixture surface)
// ---------------------------------------------------------------------

impl InMemoryBackend {
    pub async fn add_model(&self, uuid: &str) -> Result<()> {
        let mut graph = self.graph.write().await;
        graph
            .models
            .insert(ModelUuid::from(uuid), ModelDoc { life: Life::Alive });
        Ok(())
    }

    pub async fn add_application(&self, name: &str) -> Result<()> {
        self.add_application_with_offers(name, &[]).await
    }

    pub async fn add_application_with_offers(&self, name: &str, offers: &[&str]) -> Result<()> {
        let mut graph = self.graph.write().await;
        graph.applications.insert(
            ApplicationName::from(name),
            ApplicationDoc {
                life: Life::Alive,
                offers: offers.iter().map(|o| o.to_string()).collect(),
            },
        );
        Ok(())
    }

    pub async fn add_charm(&self, url: &str, refcount: usize) -> Result<()> {
        let mut graph = self.graph.write().await;
        graph.charms.insert(
            CharmUrl::from(url),
            CharmDoc {
                refcount,
                dying: false,
            },
        );
        Ok(())
    }

    pub async fn add_unit(&self, app: &str, name: &str) -> Result<()> {
        let mut graph = self.graph.write().await;
        let app = ApplicationName::from(app);
        let doc = graph
            .applications
            .get(&app)
            .ok_or_else(|| StateError::not_found(format!("application '{app}'")))?;
        if !doc.life.is_alive() {
            return Err(StateError::NotAlive(format!("application '{app}'")));
        }
        graph.units.insert(
            UnitName::from(name),
            UnitDoc {
                life: Life::Alive,
                application: app,
                machine: None,
                principal: None,
                subordinates: Vec::new(),
            },
        );
        Ok(())
    }

    pub async fn add_subordinate(&self, principal: &str, name: &str) -> Result<()> {
        let mut graph = self.graph.write().await;
        let principal = UnitName::from(principal);
        let pdoc = graph.unit(&principal)?;
        if !pdoc.life.is_alive() {
            return Err(StateError::NotAlive(format!("unit '{principal}'")));
        }
        let application = pdoc.application.clone();
        graph.units.insert(
            UnitName::from(name),
            UnitDoc {
                life: Life::Alive,
                application,
                machine: None,
                principal: Some(principal.clone()),
                subordinates: Vec::new(),
            },
        );
        graph
            .unit_mut(&principal)?
            .subordinates
            .push(UnitName::from(name));
        Ok(())
    }

    pub async fn add_machine(&self, id: &str) -> Result<()> {
        let mut graph = self.graph.write().await;
        graph.machines.insert(
            MachineId::from(id),
            MachineDoc {
                life: Life::Alive,
                manager: false,
                manual: false,
                has_vote: false,
                parent: None,
                containers: Vec::new(),
                principals: Vec::new(),
            },
        );
        Ok(())
    }

    pub async fn add_container(&self, parent: &str, id: &str) -> Result<()> {
        let mut graph = self.graph.write().await;
        let parent = MachineId::from(parent);
        let pdoc = graph.machine(&parent)?;
        if !pdoc.life.is_alive() {
            return Err(StateError::NotAlive(format!("machine '{parent}'")));
        }
        graph.machines.insert(
            MachineId::from(id),
            MachineDoc {
                life: Life::Alive,
                manager: false,
                manual: false,
                has_vote: false,
                parent: Some(parent.clone()),
                containers: Vec::new(),
                principals: Vec::new(),
            },
        );
        graph
            .machine_mut(&parent)?
            .containers
            .push(MachineId::from(id));
        Ok(())
    }

    pub async fn set_manager(&self, id: &str, has_vote: bool) -> Result<()> {
        let mut graph = self.graph.write().await;
        let doc = graph.machine_mut(&MachineId::from(id))?;
        doc.manager = true;
        doc.has_vote = has_vote;
        Ok(())
    }

    pub async fn set_manual(&self, id: &str) -> Result<()> {
        let mut graph = self.graph.write().await;
        graph.machine_mut(&MachineId::from(id))?.manual = true;
        Ok(())
    }

    pub async fn assign_unit(&self, unit: &str, machine: &str) -> Result<()> {
        let mut graph = self.graph.write().await;
        let unit = UnitName::from(unit);
        let machine = MachineId::from(machine);
        graph.machine(&machine)?;
        graph.unit_mut(&unit)?.machine = Some(machine.clone());
        graph.machine_mut(&machine)?.principals.push(unit);
        Ok(())
    }

    pub async fn add_relation(&self, id: &str, members: &[&str]) -> Result<()> {
        let mut graph = self.graph.write().await;
        let mut doc = RelationDoc::default();
        for member in members {
            let member = UnitName::from(*member);
            graph.unit(&member)?;
            doc.members.insert(member);
        }
        graph.relations.insert(RelationId::from(id), doc);
        Ok(())
    }

    pub async fn add_storage(&self, id: &str, owners: &[&str]) -> Result<()> {
        let mut graph = self.graph.write().await;
        let mut attachments = HashMap::new();
        for owner in owners {
            let owner = UnitName::from(*owner);
            let doc = graph.unit(&owner)?;
            if !doc.life.is_alive() {
                return Err(StateError::NotAlive(format!("unit '{owner}'")));
            }
            attachments.insert(owner, Life::Alive);
        }
        graph.storage.insert(
            StorageId::from(id),
            StorageDoc {
                life: Life::Alive,
                released: false,
                attachments,
            },
        );
        Ok(())
    }

    pub async fn add_volume(&self, id: &str, host: Host, detachable: bool) -> Result<()> {
        let mut graph = self.graph.write().await;
        let mut attachments = HashMap::new();
        attachments.insert(host.clone(), Life::Alive);
        let mut plans = HashSet::new();
        plans.insert(host);
        graph.volumes.insert(
            VolumeId::from(id),
            VolumeDoc {
                life: Life::Alive,
                detachable,
                backs: None,
                attachments,
                plans,
            },
        );
        Ok(())
    }

    pub async fn add_filesystem(
        &self,
        id: &str,
        host: Host,
        detachable: bool,
        volume: Option<&str>,
    ) -> Result<()> {
        let mut graph = self.graph.write().await;
        let id = FilesystemId::from(id);
        let backing = match volume {
            Some(volume) => {
                let volume = VolumeId::from(volume);
                graph.volume_mut(&volume)?.backs = Some(id.clone());
                Some(volume)
            }
            None => None,
        };
        let mut attachments = HashMap::new();
        attachments.insert(host.clone(), Life::Alive);
        graph.filesystems.insert(
            id,
            FilesystemDoc {
                life: Life::Alive,
                detachable,
                host: (!detachable).then_some(host),
                volume: backing,
                attachments,
            },
        );
        Ok(())
    }

    pub async fn unit_exists(&self, unit: &str) -> bool {
        let graph = self.graph.read().await;
        graph.units.contains_key(&UnitName::from(unit))
    }

    pub async fn machine_exists(&self, machine: &str) -> bool {
        let graph = self.graph.read().await;
        graph.machines.contains_key(&MachineId::from(machine))
    }

    pub async fn charm_exists(&self, url: &str) -> bool {
        let graph = self.graph.read().await;
        graph.charms.contains_key(&CharmUrl::from(url))
    }

    pub async fn filesystem_exists(&self, filesystem: &str) -> bool {
        let graph = self.graph.read().await;
        graph
            .filesystems
            .contains_key(&FilesystemId::from(filesystem))
    }

    pub async fn application_life(&self, app: &str) -> Result<Life> {
        let graph = self.graph.read().await;
        graph
            .applications
            .get(&ApplicationName::from(app))
            .map(|doc| doc.life)
            .ok_or_else(|| StateError::not_found(format!("application '{app}'")))
    }

    pub async fn application_offers(&self, app: &str) -> Result<Vec<String>> {
        let graph = self.graph.read().await;
        graph
            .applications
            .get(&ApplicationName::from(app))
            .map(|doc| doc.offers.clone())
            .ok_or_else(|| StateError::not_found(format!("application '{app}'")))
    }

    pub async fn model_life(&self, uuid: &str) -> Result<Life> {
        let graph = self.graph.read().await;
        graph
            .models
            .get(&ModelUuid::from(uuid))
            .map(|doc| doc.life)
            .ok_or_else(|| StateError::not_found(format!("model '{uuid}'")))
    }

    pub async fn storage_life(&self, storage: &str) -> Result<Life> {
        let graph = self.graph.read().await;
        Ok(graph.storage(&StorageId::from(storage))?.life)
    }

    pub async fn storage_released(&self, storage: &str) -> Result<bool> {
        let graph = self.graph.read().await;
        Ok(graph.storage(&StorageId::from(storage))?.released)
    }

    pub async fn attachment_life(&self, storage: &str, unit: &str) -> Result<Life> {
        let graph = self.graph.read().await;
        graph
            .storage(&StorageId::from(storage))?
            .attachments
            .get(&UnitName::from(unit))
            .copied()
            .ok_or_else(|| {
                StateError::not_found(format!("attachment of '{storage}' to '{unit}'"))
            })
    }

    pub async fn volume_attachment_life(&self, host: &Host, volume: &str) -> Result<Life> {
        let graph = self.graph.read().await;
        graph
            .volumes
            .get(&VolumeId::from(volume))
            .ok_or_else(|| StateError::not_found(format!("volume '{volume}'")))?
            .attachments
            .get(host)
            .copied()
            .ok_or_else(|| StateError::not_found(format!("attachment of volume '{volume}'")))
    }

    pub async fn filesystem_attachment_life(&self, host: &Host, filesystem: &str) -> Result<Life> {
        let graph = self.graph.read().await;
        graph
            .filesystems
            .get(&FilesystemId::from(filesystem))
            .ok_or_else(|| StateError::not_found(format!("filesystem '{filesystem}'")))?
            .attachments
            .get(host)
            .copied()
            .ok_or_else(|| {
                StateError::not_found(format!("attachment of filesystem '{filesystem}'"))
            })
    }

    pub async fn relation_departing(&self, relation: &str, unit: &str) -> Result<bool> {
        let graph = self.graph.read().await;
        graph
            .relations
            .get(&RelationId::from(relation))
            .map(|doc| doc.departing.contains(&UnitName::from(unit)))
            .ok_or_else(|| StateError::not_found(format!("relation '{relation}'")))
    }

    pub async fn relation_has_member(&self, relation: &str, unit: &str) -> Result<bool> {
        let graph = self.graph.read().await;
        graph
            .relations
            .get(&RelationId::from(relation))
            .map(|doc| doc.members.contains(&UnitName::from(unit)))
            .ok_or_else(|| StateError::not_found(format!("relation '{relation}'")))
    }
}

// ---------------------------------------------------------------------
// Lifecycle collaborator implementations
// ---------------------------------------------------------------------

#[async_trait]
impl UnitOps for InMemoryBackend {
    async fn unit_life(&self, unit: &UnitName) -> Result<Life> {
        let graph = self.graph.read().await;
        Ok(graph.unit(unit)?.life)
    }

    async fn alive_units(&self, app: &ApplicationName) -> Result<Vec<UnitName>> {
        let graph = self.graph.read().await;
        let mut units: Vec<UnitName> = graph
            .units
            .iter()
            .filter(|(_, doc)| doc.application == *app && doc.life.is_alive())
            .map(|(name, _)| name.clone())
            .collect();
        units.sort();
        Ok(units)
    }

    async fn unit_subordinates(&self, unit: &UnitName) -> Result<Vec<UnitName>> {
        let graph = self.graph.read().await;
        Ok(graph.unit(unit)?.subordinates.clone())
    }

    async fn joined_relations(&self, unit: &UnitName) -> Result<Vec<RelationId>> {
        let graph = self.graph.read().await;
        graph.unit(unit)?;
        let mut relations: Vec<RelationId> = graph
            .relations
            .iter()
            .filter(|(_, doc)| doc.members.contains(unit))
            .map(|(id, _)| id.clone())
            .collect();
        relations.sort();
        Ok(relations)
    }

    async fn relations_in_scope(&self, unit: &UnitName) -> Result<Vec<RelationId>> {
        self.joined_relations(unit).await
    }

    async fn prepare_leave_scope(&self, relation: &RelationId, unit: &UnitName) -> Result<()> {
        let mut graph = self.graph.write().await;
        let doc = graph
            .relations
            .get_mut(relation)
            .ok_or_else(|| StateError::not_found(format!("relation '{relation}'")))?;
        if !doc.members.contains(unit) {
            return Err(StateError::not_found(format!(
                "unit '{unit}' in relation '{relation}'"
            )));
        }
        doc.departing.insert(unit.clone());
        Ok(())
    }

    async fn leave_scope(&self, relation: &RelationId, unit: &UnitName) -> Result<()> {
        let mut graph = self.graph.write().await;
        let doc = graph
            .relations
            .get_mut(relation)
            .ok_or_else(|| StateError::not_found(format!("relation '{relation}'")))?;
        doc.members.remove(unit);
        doc.departing.remove(unit);
        Ok(())
    }

    async fn destroy_unit(&self, unit: &UnitName, params: DestroyUnitParams) -> Result<()> {
        let mut graph = self.graph.write().await;
        let doc = graph.unit(unit)?;
        if !doc.life.is_alive() {
            return Ok(());
        }
        if graph.unit_is_unblocked(unit) {
            // Nothing depends on the unit; remove it outright rather
            // than leaving a Dying record for the agents to negotiate.
            graph.remove_unit(unit);
            return Ok(());
        }
        graph.unit_mut(unit)?.life = Life::Dying;
        self.enqueue(
            CleanupKind::DyingUnit,
            unit.as_str(),
            vec![json!(params.destroy_storage), json!(params.force)],
        )
        .await
    }

    async fn destroy_unit_with_force(&self, unit: &UnitName, force: bool) -> Result<Diagnostics> {
        let mut graph = self.graph.write().await;
        graph.unit(unit)?;
        if graph.unit_is_unblocked(unit) {
            graph.remove_unit(unit);
            return Ok(Diagnostics::new());
        }
        if graph.unit(unit)?.life.is_alive() {
            graph.unit_mut(unit)?.life = Life::Dying;
            self.enqueue(
                CleanupKind::DyingUnit,
                unit.as_str(),
                vec![json!(false), json!(force)],
            )
            .await?;
        }
        Ok(Diagnostics::new())
    }

    async fn ensure_unit_dead(&self, unit: &UnitName) -> Result<()> {
        let mut graph = self.graph.write().await;
        let doc = graph.unit(unit)?;
        if !doc.subordinates.is_empty() {
            return Err(StateError::UnitHasSubordinates(unit.clone()));
        }
        if graph
            .storage
            .values()
            .any(|s| s.attachments.contains_key(unit))
        {
            return Err(StateError::UnitHasStorageAttachments(unit.clone()));
        }
        graph.unit_mut(unit)?.life = Life::Dead;
        Ok(())
    }

    async fn remove_unit_with_force(&self, unit: &UnitName, force: bool) -> Result<Diagnostics> {
        let mut diag = Diagnostics::new();
        let mut graph = self.graph.write().await;
        let doc = graph.unit(unit)?;
        if !doc.life.is_dead() {
            if !force {
                return Err(StateError::NotDead(format!("unit '{unit}'")));
            }
            diag.warn(format!(
                "force removing unit '{unit}' while {}",
                doc.life
            ));
        }
        for (id, storage) in graph.storage.iter_mut() {
            if storage.attachments.remove(unit).is_some() {
                diag.warn(format!(
                    "dropped attachment of storage '{id}' while removing unit '{unit}'"
                ));
            }
        }
        graph.remove_unit(unit);
        Ok(diag)
    }
}

#[async_trait]
impl MachineOps for InMemoryBackend {
    async fn machine_life(&self, machine: &MachineId) -> Result<Life> {
        let graph = self.graph.read().await;
        Ok(graph.machine(machine)?.life)
    }

    async fn all_machines(&self) -> Result<Vec<MachineId>> {
        let graph = self.graph.read().await;
        let mut machines: Vec<MachineId> = graph.machines.keys().cloned().collect();
        machines.sort();
        Ok(machines)
    }

    async fn containers(&self, machine: &MachineId) -> Result<Vec<MachineId>> {
        let graph = self.graph.read().await;
        Ok(graph.machine(machine)?.containers.clone())
    }

    async fn parent_machine(&self, machine: &MachineId) -> Result<Option<MachineId>> {
        let graph = self.graph.read().await;
        Ok(graph.machine(machine)?.parent.clone())
    }

    async fn principal_units(&self, machine: &MachineId) -> Result<Vec<UnitName>> {
        let graph = self.graph.read().await;
        Ok(graph.machine(machine)?.principals.clone())
    }

    async fn is_manager(&self, machine: &MachineId) -> Result<bool> {
        let graph = self.graph.read().await;
        Ok(graph.machine(machine)?.manager)
    }

    async fn is_manual(&self, machine: &MachineId) -> Result<bool> {
        let graph = self.graph.read().await;
        Ok(graph.machine(machine)?.manual)
    }

    async fn has_vote(&self, machine: &MachineId) -> Result<bool> {
        let graph = self.graph.read().await;
        Ok(graph.machine(machine)?.has_vote)
    }

    async fn revoke_vote(&self, machine: &MachineId) -> Result<()> {
        let mut graph = self.graph.write().await;
        let doc = graph.machine_mut(machine)?;
        // Already revoked by a concurrent pass: nothing to do.
        if doc.has_vote {
            doc.has_vote = false;
        }
        Ok(())
    }

    async fn remove_controller_machine(&self, machine: &MachineId) -> Result<()> {
        let mut graph = self.graph.write().await;
        let doc = graph.machine_mut(machine)?;
        if doc.has_vote {
            return Err(StateError::Backend(format!(
                "machine '{machine}' still has the vote"
            )));
        }
        doc.manager = false;
        Ok(())
    }

    async fn destroy_machine(&self, machine: &MachineId) -> Result<()> {
        let mut graph = self.graph.write().await;
        let doc = graph.machine_mut(machine)?;
        if !doc.life.is_alive() {
            return Ok(());
        }
        doc.life = Life::Dying;
        // Older records carried no args; keep writing the legacy shape
        // for the graceful path.
        self.enqueue(CleanupKind::DyingMachine, machine.as_str(), vec![])
            .await
    }

    async fn force_destroy_machine(&self, machine: &MachineId) -> Result<()> {
        let mut graph = self.graph.write().await;
        let doc = graph.machine_mut(machine)?;
        if doc.life.is_alive() {
            doc.life = Life::Dying;
        }
        self.enqueue(CleanupKind::ForceDestroyedMachine, machine.as_str(), vec![])
            .await
    }

    async fn ensure_machine_dead(&self, machine: &MachineId) -> Result<()> {
        let mut graph = self.graph.write().await;
        let doc = graph.machine(machine)?;
        if !doc.principals.is_empty() || !doc.containers.is_empty() {
            return Err(StateError::MachineHasDependents(machine.clone()));
        }
        graph.machine_mut(machine)?.life = Life::Dead;
        Ok(())
    }

    async fn remove_machine(&self, machine: &MachineId) -> Result<()> {
        let mut graph = self.graph.write().await;
        let doc = graph.machine(machine)?;
        if !doc.life.is_dead() {
            return Err(StateError::NotDead(format!("machine '{machine}'")));
        }
        let parent = doc.parent.clone();
        graph.machines.remove(machine);
        if let Some(parent) = parent
            && let Some(pdoc) = graph.machines.get_mut(&parent)
        {
            pdoc.containers.retain(|c| c != machine);
        }
        Ok(())
    }
}

#[async_trait]
impl ApplicationOps for InMemoryBackend {
    async fn alive_applications(&self) -> Result<Vec<ApplicationName>> {
        let graph = self.graph.read().await;
        let mut apps: Vec<ApplicationName> = graph
            .applications
            .iter()
            .filter(|(_, doc)| doc.life.is_alive())
            .map(|(name, _)| name.clone())
            .collect();
        apps.sort();
        Ok(apps)
    }

    async fn destroy_application(
        &self,
        app: &ApplicationName,
        params: DestroyApplicationParams,
    ) -> Result<()> {
        let mut graph = self.graph.write().await;
        let doc = graph
            .applications
            .get_mut(app)
            .ok_or_else(|| StateError::not_found(format!("application '{app}'")))?;
        if !doc.life.is_alive() {
            return Ok(());
        }
        doc.life = Life::Dying;
        if params.remove_offers {
            doc.offers.clear();
        }
        self.enqueue(
            CleanupKind::UnitsForDyingApplication,
            app.as_str(),
            vec![json!(params.destroy_storage), json!(params.force)],
        )
        .await
    }
}

#[async_trait]
impl ModelOps for InMemoryBackend {
    async fn all_models(&self) -> Result<Vec<ModelUuid>> {
        let graph = self.graph.read().await;
        let mut models: Vec<ModelUuid> = graph.models.keys().cloned().collect();
        models.sort();
        Ok(models)
    }

    async fn destroy_model(&self, model: &ModelUuid, params: DestroyModelParams) -> Result<()> {
        let mut graph = self.graph.write().await;
        let doc = graph
            .models
            .get_mut(model)
            .ok_or_else(|| StateError::not_found(format!("model '{model}'")))?;
        if !doc.life.is_alive() {
            return Ok(());
        }
        doc.life = Life::Dying;
        self.enqueue(CleanupKind::ApplicationsForDyingModel, model.as_str(), vec![])
            .await?;
        self.enqueue(CleanupKind::MachinesForDyingModel, model.as_str(), vec![])
            .await?;
        self.enqueue(
            CleanupKind::StorageForDyingModel,
            model.as_str(),
            vec![json!(params.destroy_storage.unwrap_or(true))],
        )
        .await
    }
}

#[async_trait]
impl CharmOps for InMemoryBackend {
    async fn destroy_charm(&self, charm: &CharmUrl) -> Result<()> {
        let mut graph = self.graph.write().await;
        let doc = graph
            .charms
            .get_mut(charm)
            .ok_or_else(|| StateError::not_found(format!("charm '{charm}'")))?;
        if doc.refcount > 0 {
            return Err(StateError::CharmInUse(charm.clone()));
        }
        doc.dying = true;
        Ok(())
    }

    async fn remove_charm(&self, charm: &CharmUrl) -> Result<()> {
        let mut graph = self.graph.write().await;
        graph
            .charms
            .remove(charm)
            .map(|_| ())
            .ok_or_else(|| StateError::not_found(format!("charm '{charm}'")))
    }
}

#[async_trait]
impl StorageOps for InMemoryBackend {
    async fn unit_storage_attachments(&self, unit: &UnitName) -> Result<Vec<StorageId>> {
        let graph = self.graph.read().await;
        let mut attachments: Vec<StorageId> = graph
            .storage
            .iter()
            .filter(|(_, doc)| doc.attachments.contains_key(unit))
            .map(|(id, _)| id.clone())
            .collect();
        attachments.sort();
        Ok(attachments)
    }

    async fn storage_attachments(&self, storage: &StorageId) -> Result<Vec<UnitName>> {
        let graph = self.graph.read().await;
        let mut units: Vec<UnitName> = graph.storage(storage)?.attachments.keys().cloned().collect();
        units.sort();
        Ok(units)
    }

    async fn detach_storage(
        &self,
        storage: &StorageId,
        unit: &UnitName,
        _force: bool,
    ) -> Result<()> {
        let mut graph = self.graph.write().await;
        let doc = graph.storage_mut(storage)?;
        let attachment = doc.attachments.get_mut(unit).ok_or_else(|| {
            StateError::not_found(format!("attachment of '{storage}' to '{unit}'"))
        })?;
        *attachment = Life::Dying;
        Ok(())
    }

    async fn remove_storage_attachment(
        &self,
        storage: &StorageId,
        unit: &UnitName,
        _force: bool,
    ) -> Result<()> {
        let mut graph = self.graph.write().await;
        let doc = graph.storage_mut(storage)?;
        doc.attachments.remove(unit).map(|_| ()).ok_or_else(|| {
            StateError::not_found(format!("attachment of '{storage}' to '{unit}'"))
        })
    }

    async fn destroy_storage_instance(
        &self,
        storage: &StorageId,
        destroy_attached: bool,
        force: bool,
    ) -> Result<()> {
        let mut graph = self.graph.write().await;
        let doc = graph.storage_mut(storage)?;
        if !destroy_attached && !doc.attachments.is_empty() {
            return Err(StateError::Backend(format!(
                "storage '{storage}' is attached"
            )));
        }
        if !doc.life.is_alive() {
            return Ok(());
        }
        doc.life = Life::Dying;
        self.enqueue(
            CleanupKind::AttachmentsForDyingStorage,
            storage.as_str(),
            vec![json!(force)],
        )
        .await
    }

    async fn release_storage_instance(
        &self,
        storage: &StorageId,
        destroy_attached: bool,
        force: bool,
    ) -> Result<()> {
        {
            let mut graph = self.graph.write().await;
            let doc = graph.storage_mut(storage)?;
            if !destroy_attached && !doc.attachments.is_empty() {
                return Err(StateError::Backend(format!(
                    "storage '{storage}' is attached"
                )));
            }
            doc.released = true;
        }
        self.destroy_storage_instance(storage, destroy_attached, force)
            .await
    }

    async fn all_storage_instances(&self) -> Result<Vec<StorageId>> {
        let graph = self.graph.read().await;
        let mut storage: Vec<StorageId> = graph.storage.keys().cloned().collect();
        storage.sort();
        Ok(storage)
    }

    async fn host_filesystems(&self, host: &Host) -> Result<Vec<FilesystemId>> {
        let graph = self.graph.read().await;
        let mut filesystems: Vec<FilesystemId> = graph
            .filesystems
            .iter()
            .filter(|(_, doc)| doc.host.as_ref() == Some(host))
            .map(|(id, _)| id.clone())
            .collect();
        filesystems.sort();
        Ok(filesystems)
    }

    async fn filesystem_attachments_of_host(&self, host: &Host) -> Result<Vec<FilesystemId>> {
        let graph = self.graph.read().await;
        let mut filesystems: Vec<FilesystemId> = graph
            .filesystems
            .iter()
            .filter(|(_, doc)| doc.attachments.contains_key(host))
            .map(|(id, _)| id.clone())
            .collect();
        filesystems.sort();
        Ok(filesystems)
    }

    async fn volume_attachments_of_host(&self, host: &Host) -> Result<Vec<VolumeId>> {
        let graph = self.graph.read().await;
        let mut volumes: Vec<VolumeId> = graph
            .volumes
            .iter()
            .filter(|(_, doc)| doc.attachments.contains_key(host))
            .map(|(id, _)| id.clone())
            .collect();
        volumes.sort();
        Ok(volumes)
    }

    async fn filesystem_attachments(&self, filesystem: &FilesystemId) -> Result<Vec<Host>> {
        let graph = self.graph.read().await;
        let doc = graph
            .filesystems
            .get(filesystem)
            .ok_or_else(|| StateError::not_found(format!("filesystem '{filesystem}'")))?;
        Ok(doc.attachments.keys().cloned().collect())
    }

    async fn volume_attachments(&self, volume: &VolumeId) -> Result<Vec<Host>> {
        let graph = self.graph.read().await;
        let doc = graph
            .volumes
            .get(volume)
            .ok_or_else(|| StateError::not_found(format!("volume '{volume}'")))?;
        Ok(doc.attachments.keys().cloned().collect())
    }

    async fn is_detachable_filesystem(&self, filesystem: &FilesystemId) -> Result<bool> {
        let graph = self.graph.read().await;
        graph
            .filesystems
            .get(filesystem)
            .map(|doc| doc.detachable)
            .ok_or_else(|| StateError::not_found(format!("filesystem '{filesystem}'")))
    }

    async fn is_detachable_volume(&self, volume: &VolumeId) -> Result<bool> {
        let graph = self.graph.read().await;
        graph
            .volumes
            .get(volume)
            .map(|doc| doc.detachable)
            .ok_or_else(|| StateError::not_found(format!("volume '{volume}'")))
    }

    async fn filesystem_volume(&self, filesystem: &FilesystemId) -> Result<Option<VolumeId>> {
        let graph = self.graph.read().await;
        graph
            .filesystems
            .get(filesystem)
            .map(|doc| doc.volume.clone())
            .ok_or_else(|| StateError::not_found(format!("filesystem '{filesystem}'")))
    }

    async fn destroy_filesystem(&self, filesystem: &FilesystemId) -> Result<()> {
        let mut graph = self.graph.write().await;
        graph.filesystem_mut(filesystem)?.life = Life::Dying;
        Ok(())
    }

    async fn detach_filesystem(&self, host: &Host, filesystem: &FilesystemId) -> Result<()> {
        let mut graph = self.graph.write().await;
        let doc = graph.filesystem_mut(filesystem)?;
        let attachment = doc.attachments.get_mut(host).ok_or_else(|| {
            StateError::not_found(format!("attachment of filesystem '{filesystem}'"))
        })?;
        *attachment = Life::Dying;
        Ok(())
    }

    async fn remove_filesystem(&self, filesystem: &FilesystemId) -> Result<()> {
        let mut graph = self.graph.write().await;
        let doc = graph
            .filesystems
            .remove(filesystem)
            .ok_or_else(|| StateError::not_found(format!("filesystem '{filesystem}'")))?;
        if let Some(volume) = doc.volume
            && let Some(vdoc) = graph.volumes.get_mut(&volume)
        {
            vdoc.backs = None;
        }
        Ok(())
    }

    async fn remove_filesystem_attachment(
        &self,
        host: &Host,
        filesystem: &FilesystemId,
    ) -> Result<()> {
        let mut graph = self.graph.write().await;
        let doc = graph.filesystem_mut(filesystem)?;
        doc.attachments.remove(host).map(|_| ()).ok_or_else(|| {
            StateError::not_found(format!("attachment of filesystem '{filesystem}'"))
        })
    }

    async fn detach_volume(&self, host: &Host, volume: &VolumeId) -> Result<()> {
        let mut graph = self.graph.write().await;
        let backs = graph
            .volumes
            .get(volume)
            .ok_or_else(|| StateError::not_found(format!("volume '{volume}'")))?
            .backs
            .clone();
        if let Some(filesystem) = backs
            && graph.filesystems.contains_key(&filesystem)
        {
            return Err(StateError::ContainsFilesystem(volume.clone()));
        }
        let doc = graph.volume_mut(volume)?;
        let attachment = doc
            .attachments
            .get_mut(host)
            .ok_or_else(|| StateError::not_found(format!("attachment of volume '{volume}'")))?;
        *attachment = Life::Dying;
        Ok(())
    }

    async fn remove_volume_attachment_plan(&self, host: &Host, volume: &VolumeId) -> Result<()> {
        let mut graph = self.graph.write().await;
        let doc = graph.volume_mut(volume)?;
        if doc.plans.remove(host) {
            Ok(())
        } else {
            Err(StateError::not_found(format!(
                "attachment plan of volume '{volume}'"
            )))
        }
    }
}
