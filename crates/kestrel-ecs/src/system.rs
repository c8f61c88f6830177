//! Systems, timelines and the per-step context they run with.
//!
//! A system is registered on one [`Timeline`] and runs once per
//! [`World::step`] of that timeline, in registration order. It gets a
//! [`StepContext`]: mutable access to entities (create, destroy, edit
//! components) plus read-only access to family rows, which stay fixed until
//! the reconciliation that closes the step.
//!
//! [`World::step`]: crate::world::World::step

use std::time::Duration;

use rayon::prelude::*;

use crate::command::{ChildPolicy, ReconcileReport};
use crate::component::ComponentRegistry;
use crate::entity::{EntityId, EntityKey};
use crate::entity_ref::{EntityMut, EntityRef};
use crate::family::{Family, FamilyBinding, FamilyItem, FamilyRegistry, FamilyRow};
use crate::message::Message;
use crate::pool::WorkerPool;
use crate::store::EntityStore;
use crate::world::World;
use crate::EcsError;

// ---------------------------------------------------------------------------
// Timeline
// ---------------------------------------------------------------------------

/// Independent system schedules stepped by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Timeline {
    /// Fixed-rate simulation.
    #[default]
    FixedUpdate,
    /// Once per frame with the frame's delta.
    VariableUpdate,
    /// Once per frame, after the variable update.
    Render,
}

impl Timeline {
    pub const ALL: [Timeline; 3] = [
        Timeline::FixedUpdate,
        Timeline::VariableUpdate,
        Timeline::Render,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

/// Per-step logic bound to families.
///
/// `init` runs once at registration with full world access, which is where
/// families are bound. Closures taking a `&mut StepContext` are systems too.
pub trait System: Send {
    fn init(&mut self, _world: &mut World) -> Result<(), EcsError> {
        Ok(())
    }

    fn update(&mut self, ctx: &mut StepContext<'_>);
}

impl<F> System for F
where
    F: FnMut(&mut StepContext<'_>) + Send,
{
    fn update(&mut self, ctx: &mut StepContext<'_>) {
        self(ctx)
    }
}

pub(crate) struct RegisteredSystem {
    pub(crate) name: String,
    pub(crate) system: Box<dyn System>,
}

// ---------------------------------------------------------------------------
// StepDiagnostics
// ---------------------------------------------------------------------------

/// Timing and reconciliation summary of one step.
#[derive(Debug, Clone, Default)]
pub struct StepDiagnostics {
    pub timeline: Timeline,
    pub step_index: u64,
    /// Main-thread completions run before the systems.
    pub main_thread_jobs: usize,
    /// Wall-clock time per system (in order of execution).
    pub system_times: Vec<(String, Duration)>,
    pub reconcile_time: Duration,
    pub total_time: Duration,
    pub report: ReconcileReport,
}

// ---------------------------------------------------------------------------
// StepContext
// ---------------------------------------------------------------------------

pub struct StepContext<'w> {
    pub(crate) store: &'w mut EntityStore,
    pub(crate) families: &'w FamilyRegistry,
    pub(crate) pool: &'w WorkerPool,
    pub(crate) timeline: Timeline,
    pub(crate) dt: f64,
    pub(crate) step_index: u64,
}

impl<'w> StepContext<'w> {
    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn timeline(&self) -> Timeline {
        self.timeline
    }

    pub fn step_index(&self) -> u64 {
        self.step_index
    }

    pub fn registry(&self) -> &ComponentRegistry {
        self.store.registry()
    }

    pub fn family(&self, binding: &FamilyBinding) -> &Family {
        self.families.get(binding.family)
    }

    /// Visit every row of the bound family. Rows do not move during the
    /// visit, whatever the closure does to entities.
    pub fn for_each<F>(&mut self, binding: &FamilyBinding, mut f: F)
    where
        F: FnMut(FamilyItem<'_>),
    {
        let families = self.families;
        let rows = &families.get(binding.family).rows;
        for row in 0..rows.len() {
            f(FamilyItem {
                store: &mut *self.store,
                rows,
                row,
            });
        }
    }

    /// Run a read-only closure over every row on the worker pool and collect
    /// the results in row order.
    pub fn par_map<R, F>(&self, binding: &FamilyBinding, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(FamilyRow<'_>) -> R + Sync + Send,
    {
        let rows = &self.families.get(binding.family).rows;
        let store: &EntityStore = self.store;
        self.pool.install(|| {
            (0..rows.len())
                .into_par_iter()
                .map(|row| f(FamilyRow { store, rows, row }))
                .collect()
        })
    }

    // -- entities -----------------------------------------------------------

    /// Create a pending entity. It joins families at the end of this step.
    pub fn create_entity(&mut self) -> EntityMut<'_> {
        let key = self.store.allocate(String::new());
        EntityMut::new(self.store, key)
    }

    pub fn create_entity_named(&mut self, name: impl Into<String>) -> EntityMut<'_> {
        let key = self.store.allocate(name.into());
        EntityMut::new(self.store, key)
    }

    pub fn destroy_entity(&mut self, id: EntityId) -> Result<(), EcsError> {
        self.store.destroy_by_id(id, ChildPolicy::Destroy)
    }

    pub fn destroy_entity_with(&mut self, id: EntityId, policy: ChildPolicy) -> Result<(), EcsError> {
        self.store.destroy_by_id(id, policy)
    }

    /// Send `msg` to an entity. Systems later in this step and every system
    /// of the next step can read it.
    pub fn send_message<M: Message>(&mut self, id: EntityId, msg: M) -> Result<(), EcsError> {
        let key = self.store.key_of(id)?;
        self.store.send_message(key, msg)
    }

    pub fn entity(&self, id: EntityId) -> Result<EntityRef<'_>, EcsError> {
        let key = self.store.key_of(id)?;
        EntityRef::new(self.store, key)
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Result<EntityMut<'_>, EcsError> {
        let key = self.store.key_of(id)?;
        EntityMut::checked(self.store, key)
    }

    pub fn entity_by_key(&self, key: EntityKey) -> Result<EntityRef<'_>, EcsError> {
        EntityRef::new(self.store, key)
    }

    pub fn entity_mut_by_key(&mut self, key: EntityKey) -> Result<EntityMut<'_>, EcsError> {
        EntityMut::checked(self.store, key)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
