//! The [`World`] is the top-level container of the runtime. It owns the
//! entity store, the families, the per-timeline system lists, the
//! main-thread completion queue and the worker pool.

use std::sync::Arc;
use std::time::Instant;

use crate::command::{self, ChildPolicy, ReconcileReport};
use crate::component::ComponentRegistry;
use crate::config::WorldConfig;
use crate::entity::{EntityId, EntityKey};
use crate::entity_ref::{EntityMut, EntityRef};
use crate::family::{Family, FamilyBinding, FamilyListener, FamilyQuery, FamilyRegistry};
use crate::main_thread::{MainThreadQueue, MainThreadSender};
use crate::message::Message;
use crate::pool::WorkerPool;
use crate::store::EntityStore;
use crate::system::{RegisteredSystem, StepContext, StepDiagnostics, System, Timeline};
use crate::uuid::Uuid;
use crate::EcsError;

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// Entities, families and systems of one simulation.
///
/// Structural changes made between steps (or by systems during a step) are
/// recorded and applied by [`reconcile`](Self::reconcile), which
/// [`step`](Self::step) calls after the timeline's systems have run.
pub struct World {
    store: EntityStore,
    families: FamilyRegistry,
    systems: [Vec<RegisteredSystem>; 3],
    main_thread: MainThreadQueue,
    pool: WorkerPool,
    config: WorldConfig,
    step_counter: u64,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("entity_count", &self.store.len())
            .field("family_count", &self.families.len())
            .field("step_counter", &self.step_counter)
            .finish()
    }
}

impl World {
    /// Create a world with the default configuration.
    pub fn new(registry: Arc<ComponentRegistry>) -> Self {
        Self::with_config(registry, WorldConfig::default())
    }

    pub fn with_config(registry: Arc<ComponentRegistry>, config: WorldConfig) -> Self {
        tracing::debug!(
            components = registry.len(),
            worker_threads = config.worker_threads,
            seeded = config.uuid_seed.is_some(),
            "world created"
        );
        Self {
            store: EntityStore::new(registry, &config),
            families: FamilyRegistry::new(),
            systems: Default::default(),
            main_thread: MainThreadQueue::new(),
            pool: WorkerPool::new(config.worker_threads),
            config,
            step_counter: 0,
        }
    }

    pub fn registry(&self) -> &ComponentRegistry {
        self.store.registry()
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &EntityStore {
        &self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut EntityStore {
        &mut self.store
    }

    // -- entity lifecycle ---------------------------------------------------

    /// Create a pending entity. Components can be attached right away; the
    /// entity becomes visible to families and id lookups at the next
    /// reconciliation.
    pub fn create_entity(&mut self) -> EntityMut<'_> {
        let key = self.store.allocate(String::new());
        EntityMut::new(&mut self.store, key)
    }

    pub fn create_entity_named(&mut self, name: impl Into<String>) -> EntityMut<'_> {
        let key = self.store.allocate(name.into());
        EntityMut::new(&mut self.store, key)
    }

    /// Request destruction of an entity and its subtree.
    ///
    /// Idempotent: destroying an entity that is already being destroyed, or
    /// that is already gone, succeeds.
    ///
    /// # Errors
    ///
    /// [`EcsError::DanglingEntity`] if `id` was never issued by this world.
    pub fn destroy_entity(&mut self, id: EntityId) -> Result<(), EcsError> {
        self.store.destroy_by_id(id, ChildPolicy::Destroy)
    }

    pub fn destroy_entity_with(&mut self, id: EntityId, policy: ChildPolicy) -> Result<(), EcsError> {
        self.store.destroy_by_id(id, policy)
    }

    /// Drop `msg` into the inbox of a spawned, alive entity.
    pub fn send_message<M: Message>(&mut self, id: EntityId, msg: M) -> Result<(), EcsError> {
        let key = self.store.key_of(id)?;
        self.store.send_message(key, msg)
    }

    // -- lookup -------------------------------------------------------------

    /// A spawned, alive entity.
    pub fn entity(&self, id: EntityId) -> Result<EntityRef<'_>, EcsError> {
        let key = self.store.key_of(id)?;
        EntityRef::new(&self.store, key)
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Result<EntityMut<'_>, EcsError> {
        let key = self.store.key_of(id)?;
        EntityMut::checked(&mut self.store, key)
    }

    pub fn try_entity(&self, id: EntityId) -> Option<EntityRef<'_>> {
        self.entity(id).ok()
    }

    /// Any occupied slot, pending and destroying entities included.
    pub fn entity_by_key(&self, key: EntityKey) -> Result<EntityRef<'_>, EcsError> {
        EntityRef::new(&self.store, key)
    }

    pub fn entity_mut_by_key(&mut self, key: EntityKey) -> Result<EntityMut<'_>, EcsError> {
        EntityMut::checked(&mut self.store, key)
    }

    pub fn is_alive(&self, id: EntityId) -> bool {
        self.store.key_of(id).is_ok()
    }

    /// Occupied slots, pending and destroying entities included.
    pub fn entity_count(&self) -> usize {
        self.store.len()
    }

    /// Entities waiting for their first reconciliation.
    pub fn pending_count(&self) -> usize {
        self.store.spawn_queue.len()
    }

    /// Ids of spawned, alive entities in slot order.
    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.store
            .iter()
            .filter(|(_, e)| e.spawned && e.alive)
            .map(|(_, e)| e.id)
            .collect()
    }

    pub fn find_by_instance_uuid(&self, uuid: Uuid) -> Option<EntityRef<'_>> {
        let key = self.store.find_by_instance_uuid(uuid)?;
        EntityRef::new(&self.store, key).ok()
    }

    // -- families -----------------------------------------------------------

    /// Bind to the family for `query`, creating it if needed.
    pub fn bind_family(&mut self, query: FamilyQuery) -> FamilyBinding {
        self.families.bind(query, None, &self.store)
    }

    /// Bind with a listener. If the family already has rows, the listener
    /// receives them immediately as one added batch.
    pub fn bind_family_with<L>(&mut self, query: FamilyQuery, listener: L) -> FamilyBinding
    where
        L: FamilyListener + 'static,
    {
        self.families.bind(query, Some(Box::new(listener)), &self.store)
    }

    /// Remove the binding's listener. Returns whether one was removed.
    pub fn unbind(&mut self, binding: FamilyBinding) -> bool {
        self.families.unbind(binding)
    }

    pub fn family(&self, binding: &FamilyBinding) -> &Family {
        self.families.get(binding.family)
    }

    pub fn family_count(&self) -> usize {
        self.families.len()
    }

    // -- systems ------------------------------------------------------------

    /// Register a system on `timeline`. Its `init` runs immediately.
    ///
    /// # Panics
    ///
    /// Panics if a system with the same name is already registered on any
    /// timeline.
    pub fn add_system<S>(&mut self, timeline: Timeline, name: &str, mut system: S) -> Result<(), EcsError>
    where
        S: System + 'static,
    {
        assert!(
            !self.systems.iter().flatten().any(|s| s.name == name),
            "duplicate system name: {name:?}"
        );
        system.init(self)?;
        self.systems[timeline.index()].push(RegisteredSystem {
            name: name.to_owned(),
            system: Box::new(system),
        });
        Ok(())
    }

    /// Names of the systems on `timeline`, in execution order.
    pub fn system_names(&self, timeline: Timeline) -> Vec<&str> {
        self.systems[timeline.index()]
            .iter()
            .map(|s| s.name.as_str())
            .collect()
    }

    // -- stepping -----------------------------------------------------------

    /// Process the spawn queue only. Returns how many entities went live.
    pub fn spawn_pending(&mut self) -> usize {
        let spawned = command::spawn_pass(&mut self.store, &mut self.families);
        self.families.flush(&self.store);
        spawned
    }

    /// Apply all recorded structural change: spawns, then dirty entities,
    /// then destroys, then family notifications.
    pub fn reconcile(&mut self) -> ReconcileReport {
        command::reconcile(&mut self.store, &mut self.families)
    }

    /// Run one step of `timeline`.
    ///
    /// 1. Completions posted through [`MainThreadSender`] run.
    /// 2. The timeline's systems run in registration order.
    /// 3. The world reconciles.
    pub fn step(&mut self, timeline: Timeline, dt: f64) -> StepDiagnostics {
        let step_start = Instant::now();
        let step_index = self.step_counter;

        let jobs = self.main_thread.take_pending();
        let main_thread_jobs = jobs.len();
        for job in jobs {
            job(self);
        }

        let systems = &mut self.systems[timeline.index()];
        let mut system_times = Vec::with_capacity(systems.len());
        for entry in systems.iter_mut() {
            let start = Instant::now();
            let mut ctx = StepContext {
                store: &mut self.store,
                families: &self.families,
                pool: &self.pool,
                timeline,
                dt,
                step_index,
            };
            entry.system.update(&mut ctx);
            system_times.push((entry.name.clone(), start.elapsed()));
        }

        let reconcile_start = Instant::now();
        let report = self.reconcile();
        let reconcile_time = reconcile_start.elapsed();
        self.step_counter += 1;

        let total_time = step_start.elapsed();
        tracing::debug!(
            ?timeline,
            step_index,
            dt,
            systems = system_times.len(),
            main_thread_jobs,
            reconcile_us = reconcile_time.as_micros() as u64,
            total_us = total_time.as_micros() as u64,
            "step complete"
        );

        StepDiagnostics {
            timeline,
            step_index,
            main_thread_jobs,
            system_times,
            reconcile_time,
            total_time,
            report,
        }
    }

    /// Steps run so far, across all timelines.
    pub fn step_count(&self) -> u64 {
        self.step_counter
    }

    // -- main thread --------------------------------------------------------

    /// Handle for background threads to post work to this world.
    pub fn main_thread_sender(&self) -> MainThreadSender {
        self.main_thread.sender()
    }

    pub fn pending_main_thread_jobs(&self) -> usize {
        self.main_thread.len()
    }

    pub fn worker_threads(&self) -> usize {
        self.pool.threads()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
