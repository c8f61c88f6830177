//! Entity arena, id table, pending queues and hierarchy maintenance.
//!
//! The store is the half of the [`World`](crate::world::World) that systems
//! may mutate while iterating families: it never touches family rows, it only
//! records what changed (spawn, dirty and destroy queues) for the next
//! reconciliation to apply.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::command::ChildPolicy;
use crate::component::{
    Component, ComponentBox, ComponentDeleterTable, ComponentRegistry, ComponentTypeId,
};
use crate::config::WorldConfig;
use crate::entity::{Entity, EntityId, EntityKey};
use crate::mask::FamilyMask;
use crate::message::{Message, MessageEntry};
use crate::uuid::{Uuid, UuidGenerator};
use crate::EcsError;

#[derive(Debug)]
struct Slot {
    generation: u32,
    entity: Option<Entity>,
}

/// Owner of every entity record in a world.
///
/// Free slot indices are kept in a FIFO queue so that generations are spread
/// out over time rather than concentrated on a hot index.
#[derive(Debug)]
pub struct EntityStore {
    registry: Arc<ComponentRegistry>,
    slots: Vec<Slot>,
    free: VecDeque<u32>,
    /// Every occupied slot, pending and destroying entities included.
    ids: HashMap<EntityId, EntityKey>,
    next_id: i64,

    pub(crate) spawn_queue: Vec<EntityKey>,
    pub(crate) dirty_queue: Vec<EntityKey>,
    pub(crate) destroy_queue: Vec<(EntityKey, ChildPolicy)>,
    /// Entities with a non-empty inbox, aged at each reconciliation.
    pub(crate) mailboxes: Vec<EntityKey>,

    pub(crate) deleters: ComponentDeleterTable,
    uuids: UuidGenerator,
}

impl EntityStore {
    pub(crate) fn new(registry: Arc<ComponentRegistry>, config: &WorldConfig) -> Self {
        Self {
            registry,
            slots: Vec::new(),
            free: VecDeque::new(),
            ids: HashMap::new(),
            next_id: 0,
            spawn_queue: Vec::new(),
            dirty_queue: Vec::new(),
            destroy_queue: Vec::new(),
            mailboxes: Vec::new(),
            deleters: ComponentDeleterTable::new(),
            uuids: UuidGenerator::new(config.uuid_seed),
        }
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub(crate) fn registry_arc(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    // -- allocation ---------------------------------------------------------

    /// Allocate a pending entity. It joins the spawn queue and stays
    /// invisible to id lookups and families until the next reconciliation.
    pub(crate) fn allocate(&mut self, name: String) -> EntityKey {
        let id = EntityId::from_raw(self.next_id);
        self.next_id += 1;
        let entity = Entity::new(id, self.uuids.next_uuid(), name);

        let key = if let Some(index) = self.free.pop_front() {
            let slot = &mut self.slots[index as usize];
            slot.entity = Some(entity);
            EntityKey::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                entity: Some(entity),
            });
            EntityKey::new(index, 0)
        };

        self.ids.insert(id, key);
        self.spawn_queue.push(key);
        tracing::trace!(%id, ?key, "entity allocated");
        key
    }

    /// Release a slot, bumping its generation so outstanding keys go stale.
    fn free_slot(&mut self, key: EntityKey) -> Option<Entity> {
        let slot = self.slots.get_mut(key.index() as usize)?;
        if slot.generation != key.generation() {
            return None;
        }
        let entity = slot.entity.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push_back(key.index());
        self.ids.remove(&entity.id);
        Some(entity)
    }

    // -- lookup -------------------------------------------------------------

    pub fn get(&self, key: EntityKey) -> Result<&Entity, EcsError> {
        self.slots
            .get(key.index() as usize)
            .filter(|slot| slot.generation == key.generation())
            .and_then(|slot| slot.entity.as_ref())
            .ok_or(EcsError::StaleKey { key })
    }

    fn occupied_mut(slots: &mut [Slot], key: EntityKey) -> Result<&mut Entity, EcsError> {
        slots
            .get_mut(key.index() as usize)
            .filter(|slot| slot.generation == key.generation())
            .and_then(|slot| slot.entity.as_mut())
            .ok_or(EcsError::StaleKey { key })
    }

    pub fn get_mut(&mut self, key: EntityKey) -> Result<&mut Entity, EcsError> {
        Self::occupied_mut(&mut self.slots, key)
    }

    /// Typed mutable access to a live component.
    pub(crate) fn component_mut<T: Component>(&mut self, key: EntityKey) -> Result<&mut T, EcsError> {
        let entity = Self::occupied_mut(&mut self.slots, key)?;
        let entity_id = entity.id;
        let found = self
            .registry
            .lookup::<T>()
            .and_then(|id| entity.try_get_mut(id))
            .and_then(|component| component.downcast_mut::<T>());
        match found {
            Some(component) => Ok(component),
            None => Err(EcsError::MissingComponent {
                entity: entity_id,
                component: self.registry.display_name::<T>(),
            }),
        }
    }

    /// Refresh one entity against the deleter table. Returns its previous
    /// mask alongside the record.
    pub(crate) fn refresh(&mut self, key: EntityKey) -> Result<(FamilyMask, &mut Entity), EcsError> {
        let entity = Self::occupied_mut(&mut self.slots, key)?;
        let previous = entity.refresh(&mut self.deleters);
        Ok((previous, entity))
    }

    pub fn contains_key(&self, key: EntityKey) -> bool {
        self.get(key).is_ok()
    }

    /// Resolve an id to a spawned, alive entity.
    pub fn key_of(&self, id: EntityId) -> Result<EntityKey, EcsError> {
        let key = *self
            .ids
            .get(&id)
            .ok_or(EcsError::DanglingEntity { entity: id })?;
        let entity = self.get(key)?;
        if !entity.alive {
            return Err(EcsError::DanglingEntity { entity: id });
        }
        if !entity.spawned {
            return Err(EcsError::NotSpawned { entity: id });
        }
        Ok(key)
    }

    /// Resolve an id to any occupied slot, pending or destroying included.
    pub fn key_of_any(&self, id: EntityId) -> Option<EntityKey> {
        self.ids.get(&id).copied()
    }

    /// Whether `id` was ever handed out by this store.
    pub(crate) fn was_issued(&self, id: EntityId) -> bool {
        id.to_raw() >= 0 && id.to_raw() < self.next_id
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityKey, &Entity)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.entity
                .as_ref()
                .map(|e| (EntityKey::new(index as u32, slot.generation), e))
        })
    }

    pub fn find_by_instance_uuid(&self, uuid: Uuid) -> Option<EntityKey> {
        if uuid.is_nil() {
            return None;
        }
        self.iter()
            .find(|(_, e)| e.alive && e.instance_uuid == uuid)
            .map(|(key, _)| key)
    }

    // -- dirty tracking -----------------------------------------------------

    /// Flag an entity for re-evaluation. Pending entities are re-evaluated by
    /// the spawn pass and do not need a dirty-queue entry.
    pub(crate) fn mark_dirty(&mut self, key: EntityKey) -> Result<(), EcsError> {
        let entity = self.get_mut(key)?;
        entity.dirty = true;
        if entity.spawned && !entity.queued {
            entity.queued = true;
            self.dirty_queue.push(key);
        }
        Ok(())
    }

    // -- messages -----------------------------------------------------------

    pub(crate) fn send_message<M: Message>(&mut self, key: EntityKey, msg: M) -> Result<(), EcsError> {
        let entity = self.get_mut(key)?;
        let first = entity.inbox.is_empty();
        entity.inbox.push(MessageEntry::new(msg));
        tracing::trace!(id = %entity.id, message = std::any::type_name::<M>(), "message sent");
        if first {
            self.mailboxes.push(key);
        }
        Ok(())
    }

    // -- components ---------------------------------------------------------

    pub(crate) fn add_component_boxed(
        &mut self,
        key: EntityKey,
        id: ComponentTypeId,
        component: ComponentBox,
    ) -> Result<(), EcsError> {
        if self.registry.get_info(id).is_none() {
            return Err(self.registry.unknown(&format!("{id:?}")));
        }
        self.deleters.initialize(id, &self.registry);
        let registry = Arc::clone(&self.registry);
        let entity = self.get_mut(key)?;
        if entity.add_component(id, component).is_err() {
            return Err(EcsError::DuplicateComponent {
                entity: entity.id,
                component: registry.name_of(id).to_owned(),
            });
        }
        self.mark_dirty(key)
    }

    pub(crate) fn remove_component(
        &mut self,
        key: EntityKey,
        id: ComponentTypeId,
    ) -> Result<bool, EcsError> {
        let removed = self.get_mut(key)?.remove_component_by_id(id);
        if removed {
            self.mark_dirty(key)?;
        }
        Ok(removed)
    }

    /// Swap a live component for a new value in place and flag the entity as
    /// reloaded. Families keep the row and report a reload.
    pub(crate) fn replace_component(
        &mut self,
        key: EntityKey,
        id: ComponentTypeId,
        component: ComponentBox,
    ) -> Result<(), EcsError> {
        let registry = Arc::clone(&self.registry);
        let entity = self.get_mut(key)?;
        let entity_id = entity.id;
        let Some(slot) = entity.try_get_mut(id) else {
            return Err(EcsError::MissingComponent {
                entity: entity_id,
                component: registry.name_of(id).to_owned(),
            });
        };
        let old = std::mem::replace(slot, component);
        entity.reloaded = true;
        self.deleters.destroy(id, old);
        self.mark_dirty(key)
    }

    pub(crate) fn set_reloaded(&mut self, key: EntityKey) -> Result<(), EcsError> {
        self.get_mut(key)?.reloaded = true;
        self.mark_dirty(key)
    }

    // -- hierarchy ----------------------------------------------------------

    fn is_ancestor_or_self(&self, ancestor: EntityKey, mut key: EntityKey) -> bool {
        loop {
            if key == ancestor {
                return true;
            }
            match self.get(key).ok().and_then(|e| e.parent) {
                Some(parent) => key = parent,
                None => return false,
            }
        }
    }

    /// Collect `root` and every descendant, depth first.
    pub(crate) fn subtree(&self, root: EntityKey) -> Vec<EntityKey> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(key) = stack.pop() {
            if let Ok(entity) = self.get(key) {
                out.push(key);
                stack.extend(entity.children.iter().rev().copied());
            }
        }
        out
    }

    fn bump_hierarchy_revision(&mut self, root: EntityKey) {
        for key in self.subtree(root) {
            if let Ok(entity) = self.get_mut(key) {
                entity.hierarchy_revision = entity.hierarchy_revision.wrapping_add(1);
            }
        }
    }

    fn bump_children_revision(&mut self, mut key: EntityKey) {
        loop {
            let Ok(entity) = self.get_mut(key) else {
                return;
            };
            entity.children_revision = entity.children_revision.wrapping_add(1);
            match entity.parent {
                Some(parent) => key = parent,
                None => return,
            }
        }
    }

    /// Re-parent `child`. `None` makes it a root; `index` positions it among
    /// its new siblings (clamped, appended when `None`).
    pub(crate) fn set_parent(
        &mut self,
        child: EntityKey,
        parent: Option<EntityKey>,
        index: Option<usize>,
    ) -> Result<(), EcsError> {
        let child_id = self.get(child)?.id;
        let old_parent = self.get(child)?.parent;

        if let Some(parent) = parent {
            let parent_entity = self.get(parent)?;
            let parent_id = parent_entity.id;
            if !parent_entity.alive {
                return Err(EcsError::InvalidHierarchy {
                    child: child_id,
                    parent: parent_id,
                    reason: "parent is being destroyed",
                });
            }
            if self.is_ancestor_or_self(child, parent) {
                return Err(EcsError::InvalidHierarchy {
                    child: child_id,
                    parent: parent_id,
                    reason: "an entity cannot be parented under itself or its descendants",
                });
            }
        }

        if old_parent == parent && index.is_none() {
            return Ok(());
        }

        if let Some(old) = old_parent {
            if let Ok(old_entity) = self.get_mut(old) {
                old_entity.children.retain(|k| *k != child);
            }
            self.bump_children_revision(old);
        }

        self.get_mut(child)?.parent = parent;
        if let Some(parent) = parent {
            let parent_entity = self.get_mut(parent)?;
            let partition = parent_entity.world_partition;
            let at = index
                .unwrap_or(parent_entity.children.len())
                .min(parent_entity.children.len());
            parent_entity.children.insert(at, child);
            self.bump_children_revision(parent);
            self.set_world_partition(child, partition)?;
        }
        self.bump_hierarchy_revision(child);
        Ok(())
    }

    pub(crate) fn detach_children(&mut self, key: EntityKey) -> Result<(), EcsError> {
        let children = std::mem::take(&mut self.get_mut(key)?.children);
        if children.is_empty() {
            return Ok(());
        }
        for child in children {
            if let Ok(entity) = self.get_mut(child) {
                entity.parent = None;
                self.bump_hierarchy_revision(child);
            }
        }
        self.bump_children_revision(key);
        Ok(())
    }

    /// Set the partition of `key` and its whole subtree.
    pub(crate) fn set_world_partition(
        &mut self,
        key: EntityKey,
        partition: u8,
    ) -> Result<(), EcsError> {
        self.get(key)?;
        for k in self.subtree(key) {
            if let Ok(entity) = self.get_mut(k) {
                entity.world_partition = partition;
            }
        }
        Ok(())
    }

    /// Reorder children to follow `uuids` (matched against each child's
    /// prefab UUID). Children not listed keep their relative order at the end.
    pub(crate) fn sort_children_by_prefab_uuids(
        &mut self,
        key: EntityKey,
        uuids: &[Uuid],
    ) -> Result<(), EcsError> {
        let children = self.get(key)?.children.clone();
        let mut ranked: Vec<(usize, EntityKey)> = children
            .iter()
            .map(|&child| {
                let rank = self
                    .get(child)
                    .ok()
                    .and_then(|e| uuids.iter().position(|u| *u == e.prefab_uuid))
                    .unwrap_or(usize::MAX);
                (rank, child)
            })
            .collect();
        ranked.sort_by_key(|(rank, _)| *rank);
        let sorted: Vec<EntityKey> = ranked.into_iter().map(|(_, k)| k).collect();
        if sorted != children {
            self.get_mut(key)?.children = sorted;
            self.bump_children_revision(key);
        }
        Ok(())
    }

    pub(crate) fn has_component_in_tree(&self, key: EntityKey, id: ComponentTypeId) -> bool {
        self.subtree(key)
            .into_iter()
            .filter_map(|k| self.get(k).ok())
            .any(|e| e.has_component(id))
    }

    // -- destruction --------------------------------------------------------

    /// Mark an entity for destruction at the next reconciliation.
    ///
    /// Idempotent: an entity that is already being destroyed is left alone.
    /// With [`ChildPolicy::Destroy`] the whole subtree is marked at once.
    pub(crate) fn mark_destroy(&mut self, key: EntityKey, policy: ChildPolicy) -> Result<(), EcsError> {
        if !self.get(key)?.alive {
            return Ok(());
        }
        let targets = match policy {
            ChildPolicy::Destroy => self.subtree(key),
            ChildPolicy::Reparent | ChildPolicy::Orphan => vec![key],
        };
        for target in targets {
            let Ok(entity) = self.get_mut(target) else {
                continue;
            };
            if !entity.alive {
                continue;
            }
            entity.alive = false;
            tracing::trace!(id = %entity.id, ?policy, "entity marked for destruction");
            self.destroy_queue.push((target, policy));
        }
        Ok(())
    }

    /// Destroy by id. Ids of entities already destroyed are accepted; ids
    /// this store never issued are dangling.
    pub(crate) fn destroy_by_id(&mut self, id: EntityId, policy: ChildPolicy) -> Result<(), EcsError> {
        match self.key_of_any(id) {
            Some(key) => self.mark_destroy(key, policy),
            None if self.was_issued(id) => Ok(()),
            None => Err(EcsError::DanglingEntity { entity: id }),
        }
    }

    /// Tear down a marked entity: destroy its components, unlink it from the
    /// hierarchy according to `policy` and free its slot.
    pub(crate) fn do_destroy(&mut self, key: EntityKey, policy: ChildPolicy) -> Option<EntityId> {
        let mut entity = self.free_slot(key)?;
        debug_assert!(!entity.alive, "destroying {:?} which was never marked", entity.id);
        entity.destroy_components(&mut self.deleters);

        let parent = entity.parent.filter(|p| self.contains_key(*p));
        if let Some(parent) = parent {
            if let Ok(parent_entity) = self.get_mut(parent) {
                parent_entity.children.retain(|k| *k != key);
            }
            self.bump_children_revision(parent);
        }

        let new_parent = match policy {
            ChildPolicy::Reparent => {
                parent.filter(|p| self.get(*p).map(|e| e.alive).unwrap_or(false))
            }
            ChildPolicy::Destroy | ChildPolicy::Orphan => None,
        };
        for child in entity.children.drain(..) {
            if !self.contains_key(child) {
                continue;
            }
            if let Ok(child_entity) = self.get_mut(child) {
                child_entity.parent = None;
            }
            match new_parent {
                Some(grandparent) => {
                    let reparented = self.set_parent(child, Some(grandparent), None);
                    debug_assert!(
                        reparented.is_ok(),
                        "reparenting onto a live grandparent failed: {reparented:?}"
                    );
                }
                None => self.bump_hierarchy_revision(child),
            }
        }

        tracing::trace!(id = %entity.id, "entity destroyed");
        Some(entity.id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
