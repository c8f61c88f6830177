//! Entity identifiers and the per-entity record.
//!
//! Two handles name an entity:
//!
//! - [`EntityId`] is the stable, opaque identity. It is issued once per world
//!   from a counter, survives anything that happens to the entity's storage,
//!   and is what long-lived data (scenes, save files, tooling selections)
//!   should hold.
//! - [`EntityKey`] is the arena handle: a slot index packed with a
//!   *generation* that is bumped whenever the slot is recycled, so a key to
//!   a freed entity is detected instead of aliasing its successor.
//!
//! [`Entity`] itself owns its components. Structural changes (attach,
//! detach) are visible immediately to direct component queries but only
//! reach the cached [`FamilyMask`] when the world refreshes the entity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::component::{ComponentBox, ComponentDeleterTable, ComponentTypeId};
use crate::mask::FamilyMask;
use crate::message::Inbox;
use crate::uuid::Uuid;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// Stable, opaque entity identity. `-1` is the invalid sentinel.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(i64);

impl EntityId {
    /// The invalid sentinel.
    pub const INVALID: EntityId = EntityId(-1);

    /// Reconstruct from a raw value.
    #[inline]
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// Raw `i64` representation.
    #[inline]
    pub const fn to_raw(self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != -1
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(EntityId)
    }
}

// ---------------------------------------------------------------------------
// EntityKey
// ---------------------------------------------------------------------------

/// A generational arena handle.
///
/// Layout: `[generation: u32 | index: u32]`
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey(u64);

impl EntityKey {
    /// Construct an `EntityKey` from an index and generation.
    #[inline]
    pub fn new(index: u32, generation: u32) -> Self {
        Self((generation as u64) << 32 | index as u64)
    }

    /// The index portion (low 32 bits).
    #[inline]
    pub fn index(self) -> u32 {
        self.0 as u32
    }

    /// The generation portion (high 32 bits).
    #[inline]
    pub fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Debug for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityKey({}v{})", self.index(), self.generation())
    }
}

// ---------------------------------------------------------------------------
// EntityState
// ---------------------------------------------------------------------------

/// Lifecycle of an entity record.
///
/// `Destroyed` is never observed on a record: reaching it frees the slot,
/// and any key still pointing there reports [`EcsError::StaleKey`].
///
/// [`EcsError::StaleKey`]: crate::EcsError::StaleKey
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityState {
    /// Created, not yet visible to families or id lookups.
    Pending,
    /// Spawned and eligible for family membership.
    Live,
    /// Destruction requested; torn down at the next reconciliation.
    Destroying,
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// The mutable entity record stored in the world's arena.
///
/// `components[..live_components]` are attached. Anything after that is a
/// detached component waiting for [`refresh`](Self::refresh) to run it
/// through the deleter table; family rows cached for the current step may
/// still resolve it until then.
pub struct Entity {
    pub(crate) components: Vec<(ComponentTypeId, ComponentBox)>,
    pub(crate) live_components: usize,
    pub(crate) mask: FamilyMask,

    pub(crate) dirty: bool,
    /// Already sitting in the world's dirty queue.
    pub(crate) queued: bool,
    pub(crate) alive: bool,
    pub(crate) spawned: bool,
    pub(crate) serializable: bool,
    pub(crate) reloaded: bool,

    pub(crate) children_revision: u8,
    pub(crate) hierarchy_revision: u8,
    pub(crate) world_partition: u8,

    pub(crate) parent: Option<EntityKey>,
    pub(crate) children: Vec<EntityKey>,

    pub(crate) id: EntityId,
    pub(crate) name: String,
    pub(crate) instance_uuid: Uuid,
    pub(crate) prefab_uuid: Uuid,
    pub(crate) prefab: Option<String>,

    pub(crate) inbox: Inbox,
}

impl Entity {
    pub(crate) fn new(id: EntityId, instance_uuid: Uuid, name: String) -> Self {
        Self {
            components: Vec::new(),
            live_components: 0,
            mask: FamilyMask::EMPTY,
            dirty: true,
            queued: false,
            alive: true,
            spawned: false,
            serializable: true,
            reloaded: false,
            children_revision: 0,
            hierarchy_revision: 0,
            world_partition: 0,
            parent: None,
            children: Vec::new(),
            id,
            name,
            instance_uuid,
            prefab_uuid: Uuid::nil(),
            prefab: None,
            inbox: Inbox::default(),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Cached mask. Only authoritative while [`is_dirty`](Self::is_dirty) is false.
    pub fn mask(&self) -> FamilyMask {
        self.mask
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn state(&self) -> EntityState {
        match (self.alive, self.spawned) {
            (false, _) => EntityState::Destroying,
            (true, false) => EntityState::Pending,
            (true, true) => EntityState::Live,
        }
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    // -- component access ---------------------------------------------------

    fn live_position(&self, id: ComponentTypeId) -> Option<usize> {
        self.components[..self.live_components]
            .iter()
            .position(|(tid, _)| *tid == id)
    }

    /// Linear scan over the attached components.
    pub fn try_get(&self, id: ComponentTypeId) -> Option<&ComponentBox> {
        self.live_position(id).map(|i| &self.components[i].1)
    }

    pub fn try_get_mut(&mut self, id: ComponentTypeId) -> Option<&mut ComponentBox> {
        self.live_position(id).map(move |i| &mut self.components[i].1)
    }

    /// Presence test that picks its strategy from the dirty flag: a scan of
    /// the live list while dirty, the cached mask once refreshed.
    pub fn has_component(&self, id: ComponentTypeId) -> bool {
        if self.dirty {
            self.live_position(id).is_some()
        } else {
            self.mask.contains(id)
        }
    }

    /// Position of `id` in the component list, for family row hints.
    pub(crate) fn component_index(&self, id: ComponentTypeId) -> Option<u8> {
        self.live_position(id).map(|i| i as u8)
    }

    fn hinted_position(&self, id: ComponentTypeId, hint: Option<u8>) -> Option<usize> {
        // A hint into the detached tail may name an old value of a type
        // that was re-attached since; only live slots are trusted.
        if let Some(h) = hint {
            let h = h as usize;
            if h < self.live_components && self.components[h].0 == id {
                return Some(h);
            }
        }
        self.live_position(id).or_else(|| {
            self.components[self.live_components..]
                .iter()
                .position(|(tid, _)| *tid == id)
                .map(|i| i + self.live_components)
        })
    }

    /// Resolve a component through a cached position, falling back to a scan
    /// of the live list and then the detached tail.
    pub(crate) fn component_with_hint(
        &self,
        id: ComponentTypeId,
        hint: Option<u8>,
    ) -> Option<&ComponentBox> {
        self.hinted_position(id, hint)
            .map(|i| &self.components[i].1)
    }

    pub(crate) fn component_with_hint_mut(
        &mut self,
        id: ComponentTypeId,
        hint: Option<u8>,
    ) -> Option<&mut ComponentBox> {
        self.hinted_position(id, hint)
            .map(move |i| &mut self.components[i].1)
    }

    /// The attached `(type, component)` pairs, in storage order.
    pub fn components(&self) -> &[(ComponentTypeId, ComponentBox)] {
        &self.components[..self.live_components]
    }

    pub fn component_count(&self) -> usize {
        self.live_components
    }

    // -- structural changes -------------------------------------------------

    /// Attach a component. Hands the value back if the type is already
    /// attached.
    pub(crate) fn add_component(
        &mut self,
        id: ComponentTypeId,
        component: ComponentBox,
    ) -> Result<(), ComponentBox> {
        if self.live_position(id).is_some() {
            return Err(component);
        }
        self.components.push((id, component));
        let last = self.components.len() - 1;
        self.components.swap(self.live_components, last);
        self.live_components += 1;
        self.mark_dirty();
        Ok(())
    }

    /// Detach a component. It stops being visible to [`try_get`] at once and
    /// is destroyed at the next refresh.
    ///
    /// [`try_get`]: Self::try_get
    pub(crate) fn remove_component_by_id(&mut self, id: ComponentTypeId) -> bool {
        let Some(pos) = self.live_position(id) else {
            return false;
        };
        self.remove_component_at(pos);
        true
    }

    fn remove_component_at(&mut self, pos: usize) {
        let last_live = self.live_components - 1;
        self.components.swap(pos, last_live);
        self.live_components -= 1;
        self.mark_dirty();
    }

    pub(crate) fn remove_all_components(&mut self) {
        if self.live_components > 0 {
            self.live_components = 0;
            self.mark_dirty();
        }
    }

    pub(crate) fn keep_only_components_with_ids(&mut self, ids: &[ComponentTypeId]) {
        let mut i = 0;
        while i < self.live_components {
            if ids.contains(&self.components[i].0) {
                i += 1;
            } else {
                self.remove_component_at(i);
            }
        }
    }

    /// Recompute the mask from the live list, destroy detached components
    /// and clear the dirty and reloaded flags. Returns the previous mask.
    pub(crate) fn refresh(&mut self, deleters: &mut ComponentDeleterTable) -> FamilyMask {
        for (tid, component) in self.components.drain(self.live_components..) {
            deleters.destroy(tid, component);
        }
        let previous = self.mask;
        self.mask = FamilyMask::from_ids(self.components.iter().map(|(tid, _)| *tid));
        self.dirty = false;
        self.reloaded = false;
        previous
    }

    /// Destroy every component, attached or detached.
    pub(crate) fn destroy_components(&mut self, deleters: &mut ComponentDeleterTable) {
        for (tid, component) in self.components.drain(..) {
            deleters.destroy(tid, component);
        }
        self.live_components = 0;
    }

    /// No components and no children.
    pub fn is_empty(&self) -> bool {
        self.live_components == 0 && self.children.is_empty()
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("dirty", &self.dirty)
            .field("mask", &self.mask)
            .field("components", &self.live_components)
            .field("children", &self.children.len())
            .field("inbox", &self.inbox.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentRegistry;

    struct A(u32);
    struct B(u32);
    struct C;

    fn setup() -> (ComponentRegistry, ComponentDeleterTable, [ComponentTypeId; 3]) {
        let mut reg = ComponentRegistry::new();
        let ids = [
            reg.register::<A>("a"),
            reg.register::<B>("b"),
            reg.register::<C>("c"),
        ];
        let mut deleters = ComponentDeleterTable::new();
        for id in ids {
            deleters.initialize(id, &reg);
        }
        (reg, deleters, ids)
    }

    fn live_types(entity: &Entity) -> Vec<ComponentTypeId> {
        entity.components().iter().map(|(t, _)| *t).collect()
    }

    #[test]
    fn entity_id_sentinel_and_parse() {
        assert!(!EntityId::INVALID.is_valid());
        assert_eq!(EntityId::default(), EntityId::INVALID);
        assert_eq!("42".parse::<EntityId>().unwrap(), EntityId::from_raw(42));
        assert!(EntityId::from_raw(1) < EntityId::from_raw(2));
    }

    #[test]
    fn entity_key_roundtrip() {
        let key = EntityKey::new(42, 7);
        assert_eq!(key.index(), 42);
        assert_eq!(key.generation(), 7);
    }

    #[test]
    fn duplicate_component_is_rejected() {
        let (_reg, _del, [a, _, _]) = setup();
        let mut e = Entity::new(EntityId::from_raw(0), Uuid::nil(), String::new());
        assert!(e.add_component(a, Box::new(A(1))).is_ok());
        assert!(e.add_component(a, Box::new(A(2))).is_err());
        assert_eq!(e.component_count(), 1);
    }

    #[test]
    fn has_component_uses_scan_while_dirty_and_mask_when_clean() {
        let (_reg, mut del, [a, b, _]) = setup();
        let mut e = Entity::new(EntityId::from_raw(0), Uuid::nil(), String::new());
        e.add_component(a, Box::new(A(1))).unwrap();

        // Dirty: mask is still empty, the scan is authoritative.
        assert!(e.is_dirty());
        assert!(e.mask().is_empty());
        assert!(e.has_component(a));

        e.refresh(&mut del);
        assert!(!e.is_dirty());
        assert!(e.has_component(a));
        assert!(!e.has_component(b));

        // Detach: dirty again, scan says gone even though the mask still has it.
        e.remove_component_by_id(a);
        assert!(e.is_dirty());
        assert!(e.mask().contains(a));
        assert!(!e.has_component(a));
    }

    #[test]
    fn detached_component_is_destroyed_on_refresh() {
        let (_reg, mut del, [a, b, _]) = setup();
        let mut e = Entity::new(EntityId::from_raw(0), Uuid::nil(), String::new());
        e.add_component(a, Box::new(A(1))).unwrap();
        e.add_component(b, Box::new(B(2))).unwrap();
        e.refresh(&mut del);

        assert!(e.remove_component_by_id(a));
        assert!(e.try_get(a).is_none());
        // Still reachable through a hint until the refresh.
        assert!(e.component_with_hint(a, Some(0)).is_some());
        assert_eq!(del.destroyed_count(a), 0);

        let previous = e.refresh(&mut del);
        assert!(previous.contains(a));
        assert!(!e.mask().contains(a));
        assert_eq!(del.destroyed_count(a), 1);
        assert!(e.component_with_hint(a, Some(0)).is_none());
    }

    #[test]
    fn attach_then_detach_restores_live_list() {
        let (_reg, mut del, [a, b, c]) = setup();
        let mut e = Entity::new(EntityId::from_raw(0), Uuid::nil(), String::new());
        e.add_component(b, Box::new(B(1))).unwrap();
        e.add_component(a, Box::new(A(1))).unwrap();
        e.refresh(&mut del);
        let before_types = live_types(&e);
        let before_mask = e.mask();

        e.add_component(c, Box::new(C)).unwrap();
        e.remove_component_by_id(c);
        e.refresh(&mut del);

        assert_eq!(live_types(&e), before_types);
        assert_eq!(e.mask(), before_mask);
    }

    #[test]
    fn stale_hint_falls_back_to_scan() {
        let (_reg, mut del, [a, b, c]) = setup();
        let mut e = Entity::new(EntityId::from_raw(0), Uuid::nil(), String::new());
        e.add_component(a, Box::new(A(1))).unwrap();
        e.add_component(b, Box::new(B(7))).unwrap();
        e.add_component(c, Box::new(C)).unwrap();
        e.refresh(&mut del);
        let hint = e.component_index(b);
        assert_eq!(hint, Some(1));

        // Removing A swaps C into slot 0 and moves things around.
        e.remove_component_by_id(a);
        let found = e.component_with_hint(b, hint).unwrap();
        assert_eq!(found.downcast_ref::<B>().unwrap().0, 7);
        let wrong_hint = e.component_with_hint(b, Some(0)).unwrap();
        assert_eq!(wrong_hint.downcast_ref::<B>().unwrap().0, 7);
    }

    #[test]
    fn hint_into_tail_prefers_reattached_value() {
        let (_reg, mut del, [a, b, c]) = setup();
        let mut e = Entity::new(EntityId::from_raw(0), Uuid::nil(), String::new());
        e.add_component(a, Box::new(A(1))).unwrap();
        e.add_component(c, Box::new(C)).unwrap();
        e.add_component(b, Box::new(B(1))).unwrap();
        e.refresh(&mut del);
        let hint = e.component_index(b);
        assert_eq!(hint, Some(2));

        e.remove_component_by_id(b);
        e.remove_component_by_id(c);
        e.add_component(b, Box::new(B(99))).unwrap();

        // Slot 2 now holds the detached B(1) in the tail.
        assert_eq!(e.component_count(), 2);
        let found = e.component_with_hint(b, hint).unwrap();
        assert_eq!(found.downcast_ref::<B>().unwrap().0, 99);

        e.component_with_hint_mut(b, hint)
            .unwrap()
            .downcast_mut::<B>()
            .unwrap()
            .0 += 1000;
        e.refresh(&mut del);
        let live = e.try_get(b).unwrap().downcast_ref::<B>().unwrap();
        assert_eq!(live.0, 1099);
        assert_eq!(del.destroyed_count(b), 1);
    }

    #[test]
    fn keep_only_components_with_ids_detaches_the_rest() {
        let (_reg, mut del, [a, b, c]) = setup();
        let mut e = Entity::new(EntityId::from_raw(0), Uuid::nil(), String::new());
        e.add_component(a, Box::new(A(1))).unwrap();
        e.add_component(b, Box::new(B(1))).unwrap();
        e.add_component(c, Box::new(C)).unwrap();
        e.keep_only_components_with_ids(&[b]);
        assert_eq!(live_types(&e), vec![b]);
        e.refresh(&mut del);
        assert_eq!(del.destroyed_count(a), 1);
        assert_eq!(del.destroyed_count(c), 1);
    }

    #[test]
    fn destroy_components_runs_every_deleter() {
        let (_reg, mut del, [a, b, _]) = setup();
        let mut e = Entity::new(EntityId::from_raw(0), Uuid::nil(), String::new());
        e.add_component(a, Box::new(A(1))).unwrap();
        e.add_component(b, Box::new(B(1))).unwrap();
        e.remove_component_by_id(b);
        e.destroy_components(&mut del);
        assert_eq!(del.destroyed_count(a), 1);
        assert_eq!(del.destroyed_count(b), 1);
        assert!(e.is_empty());
    }

    #[test]
    fn state_follows_flags() {
        let mut e = Entity::new(EntityId::from_raw(0), Uuid::nil(), String::new());
        assert_eq!(e.state(), EntityState::Pending);
        e.spawned = true;
        assert_eq!(e.state(), EntityState::Live);
        e.alive = false;
        assert_eq!(e.state(), EntityState::Destroying);
    }
}
