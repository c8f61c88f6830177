//! Families: live, incrementally maintained sets of entities matching a
//! component mask.
//!
//! A [`Family`] exists once per distinct [`FamilyQuery`] (required mask plus
//! optional mask) and is shared by every binding that asks for it. Its rows
//! are struct-of-arrays: entity ids, arena keys, and a flat table of
//! component position hints (`rows x columns`) so iteration resolves each
//! column without scanning the entity's component list.
//!
//! Rows change only when the world reconciles. Changes observed during a
//! step are *staged* on the family and applied in one flush:
//!
//! 1. removed listeners fire while the rows are still present,
//! 2. rows are swap-removed,
//! 3. new rows are pushed and added listeners fire,
//! 4. hints of surviving rows are refreshed and reloaded listeners fire.

use std::collections::HashMap;
use std::fmt;

use crate::component::{Component, ComponentRegistry, ComponentTypeId};
use crate::entity::{EntityId, EntityKey};
use crate::entity_ref::EntityMut;
use crate::mask::FamilyMask;
use crate::message::Message;
use crate::store::EntityStore;
use crate::EcsError;

// ---------------------------------------------------------------------------
// FamilyQuery
// ---------------------------------------------------------------------------

/// The identity of a family: which types an entity must have, and which
/// extra types to expose when present.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FamilyQuery {
    inclusion: FamilyMask,
    optional: FamilyMask,
}

impl FamilyQuery {
    pub fn new(inclusion: FamilyMask, optional: FamilyMask) -> Self {
        // A required type is never also optional.
        let optional = FamilyMask::from_ids(optional.iter().filter(|id| !inclusion.contains(*id)));
        Self {
            inclusion,
            optional,
        }
    }

    pub fn builder(registry: &ComponentRegistry) -> FamilyQueryBuilder<'_> {
        FamilyQueryBuilder {
            registry,
            inclusion: FamilyMask::EMPTY,
            optional: FamilyMask::EMPTY,
            error: None,
        }
    }

    pub fn inclusion(&self) -> FamilyMask {
        self.inclusion
    }

    pub fn optional(&self) -> FamilyMask {
        self.optional
    }

    /// Membership rule: every required type is present.
    #[inline]
    pub fn matches(&self, mask: &FamilyMask) -> bool {
        mask.contains_all(&self.inclusion)
    }

    /// Column layout: required types ascending, then optional types ascending.
    pub fn columns(&self) -> Vec<ComponentTypeId> {
        self.inclusion.iter().chain(self.optional.iter()).collect()
    }
}

impl fmt::Debug for FamilyQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FamilyQuery")
            .field("require", &self.inclusion)
            .field("optional", &self.optional)
            .finish()
    }
}

/// Builds a [`FamilyQuery`] from Rust types.
pub struct FamilyQueryBuilder<'r> {
    registry: &'r ComponentRegistry,
    inclusion: FamilyMask,
    optional: FamilyMask,
    error: Option<EcsError>,
}

impl FamilyQueryBuilder<'_> {
    fn resolve<T: Component>(&mut self) -> Option<ComponentTypeId> {
        match self.registry.id_of::<T>() {
            Ok(id) => Some(id),
            Err(err) => {
                self.error.get_or_insert(err);
                None
            }
        }
    }

    pub fn require<T: Component>(mut self) -> Self {
        if let Some(id) = self.resolve::<T>() {
            self.inclusion.set(id);
        }
        self
    }

    pub fn optional<T: Component>(mut self) -> Self {
        if let Some(id) = self.resolve::<T>() {
            self.optional.set(id);
        }
        self
    }

    /// Fails with the first unregistered type that was named.
    pub fn build(self) -> Result<FamilyQuery, EcsError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(FamilyQuery::new(self.inclusion, self.optional)),
        }
    }
}

// ---------------------------------------------------------------------------
// Ids, bindings, listeners
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FamilyId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u32);

/// A system's handle to a family, plus the listener it registered (if any).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FamilyBinding {
    pub(crate) family: FamilyId,
    pub(crate) listener: Option<ListenerId>,
}

impl FamilyBinding {
    pub fn family_id(&self) -> FamilyId {
        self.family
    }

    pub fn listener_id(&self) -> Option<ListenerId> {
        self.listener
    }
}

/// Membership notifications, delivered in batches at reconciliation.
pub trait FamilyListener: Send {
    fn on_entities_added(&mut self, _entities: &[EntityId]) {}
    fn on_entities_removed(&mut self, _entities: &[EntityId]) {}
    fn on_entities_reloaded(&mut self, _entities: &[EntityId]) {}
}

// ---------------------------------------------------------------------------
// FamilyRows
// ---------------------------------------------------------------------------

/// Struct-of-arrays row storage of one family.
#[derive(Debug, Default)]
pub struct FamilyRows {
    ids: Vec<EntityId>,
    keys: Vec<EntityKey>,
    /// `rows x columns` positions into each entity's component list.
    hints: Vec<Option<u8>>,
    columns: Vec<ComponentTypeId>,
    rows_by_key: HashMap<EntityKey, usize>,
}

impl FamilyRows {
    fn new(columns: Vec<ComponentTypeId>) -> Self {
        Self {
            columns,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[EntityId] {
        &self.ids
    }

    pub fn keys(&self) -> &[EntityKey] {
        &self.keys
    }

    pub fn columns(&self) -> &[ComponentTypeId] {
        &self.columns
    }

    pub fn contains(&self, key: EntityKey) -> bool {
        self.rows_by_key.contains_key(&key)
    }

    pub(crate) fn column_of(&self, id: ComponentTypeId) -> Option<usize> {
        self.columns.iter().position(|c| *c == id)
    }

    pub(crate) fn hint(&self, row: usize, column: usize) -> Option<u8> {
        self.hints[row * self.columns.len() + column]
    }

    fn write_hints(&mut self, row: usize, store: &EntityStore) {
        let width = self.columns.len();
        let Ok(entity) = store.get(self.keys[row]) else {
            return;
        };
        for (c, id) in self.columns.iter().enumerate() {
            self.hints[row * width + c] = entity.component_index(*id);
        }
    }

    fn push(&mut self, id: EntityId, key: EntityKey, store: &EntityStore) {
        let row = self.ids.len();
        self.ids.push(id);
        self.keys.push(key);
        self.hints
            .extend(std::iter::repeat(None).take(self.columns.len()));
        self.rows_by_key.insert(key, row);
        self.write_hints(row, store);
    }

    fn swap_remove(&mut self, key: EntityKey) -> Option<EntityId> {
        let row = self.rows_by_key.remove(&key)?;
        let last = self.ids.len() - 1;
        let width = self.columns.len();
        let id = self.ids.swap_remove(row);
        self.keys.swap_remove(row);
        if row != last {
            for c in 0..width {
                self.hints.swap(row * width + c, last * width + c);
            }
            self.rows_by_key.insert(self.keys[row], row);
        }
        self.hints.truncate(last * width);
        Some(id)
    }
}

// ---------------------------------------------------------------------------
// Family
// ---------------------------------------------------------------------------

/// Rows plus listeners plus the transitions staged for the next flush.
pub struct Family {
    query: FamilyQuery,
    pub(crate) rows: FamilyRows,
    listeners: Vec<(ListenerId, Box<dyn FamilyListener>)>,
    staged_adds: Vec<(EntityKey, EntityId)>,
    staged_removes: Vec<EntityKey>,
    staged_reloads: Vec<EntityKey>,
    staged_updates: Vec<EntityKey>,
}

impl Family {
    fn new(query: FamilyQuery) -> Self {
        Self {
            query,
            rows: FamilyRows::new(query.columns()),
            listeners: Vec::new(),
            staged_adds: Vec::new(),
            staged_removes: Vec::new(),
            staged_reloads: Vec::new(),
            staged_updates: Vec::new(),
        }
    }

    pub fn query(&self) -> &FamilyQuery {
        &self.query
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn ids(&self) -> &[EntityId] {
        self.rows.ids()
    }

    pub fn keys(&self) -> &[EntityKey] {
        self.rows.keys()
    }

    pub fn contains(&self, key: EntityKey) -> bool {
        self.rows.contains(key)
    }

    pub fn rows(&self) -> &FamilyRows {
        &self.rows
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn has_staged(&self) -> bool {
        !(self.staged_adds.is_empty()
            && self.staged_removes.is_empty()
            && self.staged_reloads.is_empty()
            && self.staged_updates.is_empty())
    }

    // -- staging ------------------------------------------------------------

    pub(crate) fn stage_add(&mut self, key: EntityKey, id: EntityId) {
        if let Some(pos) = self.staged_removes.iter().position(|k| *k == key) {
            // Left and came back within one pass: net effect is a hint refresh.
            self.staged_removes.swap_remove(pos);
            self.staged_updates.push(key);
            return;
        }
        if self.rows.contains(key) || self.staged_adds.iter().any(|(k, _)| *k == key) {
            return;
        }
        self.staged_adds.push((key, id));
    }

    /// Keys that are neither present nor staged are ignored; a staged add for
    /// the same key is cancelled instead.
    pub(crate) fn stage_remove(&mut self, key: EntityKey) {
        if let Some(pos) = self.staged_adds.iter().position(|(k, _)| *k == key) {
            self.staged_adds.swap_remove(pos);
            return;
        }
        if !self.rows.contains(key) || self.staged_removes.contains(&key) {
            return;
        }
        self.staged_reloads.retain(|k| *k != key);
        self.staged_updates.retain(|k| *k != key);
        self.staged_removes.push(key);
    }

    pub(crate) fn stage_reload(&mut self, key: EntityKey) {
        if self.rows.contains(key) && !self.staged_reloads.contains(&key) {
            self.staged_reloads.push(key);
        }
    }

    pub(crate) fn stage_update(&mut self, key: EntityKey) {
        if self.rows.contains(key) {
            self.staged_updates.push(key);
        }
    }

    /// Apply staged transitions. Returns `(added, removed, reloaded)`.
    pub(crate) fn flush(&mut self, store: &EntityStore) -> (usize, usize, usize) {
        if !self.has_staged() {
            return (0, 0, 0);
        }

        let removes = std::mem::take(&mut self.staged_removes);
        let removed_ids: Vec<EntityId> = removes
            .iter()
            .filter_map(|k| self.rows.rows_by_key.get(k).map(|&row| self.rows.ids[row]))
            .collect();
        if !removed_ids.is_empty() {
            for (_, listener) in &mut self.listeners {
                listener.on_entities_removed(&removed_ids);
            }
        }
        for key in &removes {
            self.rows.swap_remove(*key);
        }

        let adds = std::mem::take(&mut self.staged_adds);
        let added_ids: Vec<EntityId> = adds.iter().map(|(_, id)| *id).collect();
        for (key, id) in adds {
            self.rows.push(id, key, store);
        }
        if !added_ids.is_empty() {
            for (_, listener) in &mut self.listeners {
                listener.on_entities_added(&added_ids);
            }
        }

        for key in std::mem::take(&mut self.staged_updates) {
            if let Some(&row) = self.rows.rows_by_key.get(&key) {
                self.rows.write_hints(row, store);
            }
        }
        let reloads = std::mem::take(&mut self.staged_reloads);
        let mut reloaded_ids = Vec::with_capacity(reloads.len());
        for key in &reloads {
            if let Some(&row) = self.rows.rows_by_key.get(key) {
                self.rows.write_hints(row, store);
                reloaded_ids.push(self.rows.ids[row]);
            }
        }
        if !reloaded_ids.is_empty() {
            for (_, listener) in &mut self.listeners {
                listener.on_entities_reloaded(&reloaded_ids);
            }
        }

        (added_ids.len(), removed_ids.len(), reloaded_ids.len())
    }
}

impl fmt::Debug for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Family")
            .field("query", &self.query)
            .field("rows", &self.rows.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// FamilyRegistry
// ---------------------------------------------------------------------------

/// All families of a world, one per distinct query.
#[derive(Debug, Default)]
pub(crate) struct FamilyRegistry {
    families: Vec<Family>,
    by_query: HashMap<FamilyQuery, FamilyId>,
    next_listener: u32,
}

impl FamilyRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.families.len()
    }

    pub(crate) fn get(&self, id: FamilyId) -> &Family {
        &self.families[id.0 as usize]
    }

    /// Find the family for `query`, creating and populating it from the
    /// spawned, alive entities of `store` if it does not exist yet.
    pub(crate) fn get_or_create(&mut self, query: FamilyQuery, store: &EntityStore) -> FamilyId {
        if let Some(&id) = self.by_query.get(&query) {
            return id;
        }
        let id = FamilyId(self.families.len() as u32);
        let mut family = Family::new(query);
        for (key, entity) in store.iter() {
            if entity.spawned && entity.alive && query.matches(&entity.mask) {
                family.rows.push(entity.id, key, store);
            }
        }
        tracing::debug!(?query, rows = family.len(), "family created");
        self.families.push(family);
        self.by_query.insert(query, id);
        id
    }

    /// Bind to the family for `query`. A listener immediately receives the
    /// current rows as one added batch.
    pub(crate) fn bind(
        &mut self,
        query: FamilyQuery,
        listener: Option<Box<dyn FamilyListener>>,
        store: &EntityStore,
    ) -> FamilyBinding {
        let family_id = self.get_or_create(query, store);
        let listener = listener.map(|mut listener| {
            let id = ListenerId(self.next_listener);
            self.next_listener += 1;
            let family = &mut self.families[family_id.0 as usize];
            if !family.is_empty() {
                listener.on_entities_added(family.ids());
            }
            family.listeners.push((id, listener));
            id
        });
        FamilyBinding {
            family: family_id,
            listener,
        }
    }

    /// Drop the binding's listener. The family itself is kept.
    pub(crate) fn unbind(&mut self, binding: FamilyBinding) -> bool {
        let Some(listener) = binding.listener else {
            return false;
        };
        let Some(family) = self.families.get_mut(binding.family.0 as usize) else {
            return false;
        };
        let before = family.listeners.len();
        family.listeners.retain(|(id, _)| *id != listener);
        family.listeners.len() != before
    }

    // -- staging across families --------------------------------------------

    pub(crate) fn stage_spawn(&mut self, key: EntityKey, id: EntityId, mask: &FamilyMask) {
        for family in &mut self.families {
            if family.query.matches(mask) {
                family.stage_add(key, id);
            }
        }
    }

    pub(crate) fn stage_mask_change(
        &mut self,
        key: EntityKey,
        id: EntityId,
        old: &FamilyMask,
        new: &FamilyMask,
        reloaded: bool,
    ) {
        for family in &mut self.families {
            match (family.query.matches(old), family.query.matches(new)) {
                (false, true) => family.stage_add(key, id),
                (true, false) => family.stage_remove(key),
                (true, true) if reloaded => family.stage_reload(key),
                (true, true) => family.stage_update(key),
                (false, false) => {}
            }
        }
    }

    pub(crate) fn stage_destroy(&mut self, key: EntityKey, mask: &FamilyMask) {
        for family in &mut self.families {
            if family.query.matches(mask) {
                family.stage_remove(key);
            }
        }
    }

    pub(crate) fn flush(&mut self, store: &EntityStore) -> (usize, usize, usize) {
        let mut totals = (0, 0, 0);
        for family in &mut self.families {
            let (a, r, l) = family.flush(store);
            totals.0 += a;
            totals.1 += r;
            totals.2 += l;
        }
        totals
    }
}

// ---------------------------------------------------------------------------
// Row access
// ---------------------------------------------------------------------------

/// Mutable view of one family row during [`StepContext::for_each`].
///
/// Components named by the family's query resolve through the row's position
/// hints; any other type falls back to a scan of the live components.
///
/// [`StepContext::for_each`]: crate::system::StepContext::for_each
pub struct FamilyItem<'a> {
    pub(crate) store: &'a mut EntityStore,
    pub(crate) rows: &'a FamilyRows,
    pub(crate) row: usize,
}

impl<'a> FamilyItem<'a> {
    pub fn id(&self) -> EntityId {
        self.rows.ids[self.row]
    }

    pub fn key(&self) -> EntityKey {
        self.rows.keys[self.row]
    }

    pub fn get<T: Component>(&self) -> Option<&T> {
        let id = self.store.registry().lookup::<T>()?;
        let hint = self
            .rows
            .column_of(id)
            .and_then(|c| self.rows.hint(self.row, c));
        self.store
            .get(self.key())
            .ok()?
            .component_with_hint(id, hint)?
            .downcast_ref::<T>()
    }

    pub fn get_mut<T: Component>(&mut self) -> Option<&mut T> {
        let id = self.store.registry().lookup::<T>()?;
        let hint = self
            .rows
            .column_of(id)
            .and_then(|c| self.rows.hint(self.row, c));
        let key = self.key();
        self.store
            .get_mut(key)
            .ok()?
            .component_with_hint_mut(id, hint)?
            .downcast_mut::<T>()
    }

    /// Inbox messages of type `M` sent to the row's entity.
    pub fn messages<M: Message>(&self) -> impl Iterator<Item = &M> + '_ {
        self.store
            .get(self.key())
            .into_iter()
            .flat_map(|entity| entity.inbox.iter::<M>())
    }

    /// Structural access to the row's entity. Changes take effect on family
    /// rows at the next reconciliation.
    pub fn entity(&mut self) -> EntityMut<'_> {
        let key = self.key();
        EntityMut::new(self.store, key)
    }
}

/// Read-only view of one family row, handed to [`StepContext::par_map`].
///
/// [`StepContext::par_map`]: crate::system::StepContext::par_map
#[derive(Clone, Copy)]
pub struct FamilyRow<'a> {
    pub(crate) store: &'a EntityStore,
    pub(crate) rows: &'a FamilyRows,
    pub(crate) row: usize,
}

impl<'a> FamilyRow<'a> {
    pub fn id(&self) -> EntityId {
        self.rows.ids[self.row]
    }

    pub fn key(&self) -> EntityKey {
        self.rows.keys[self.row]
    }

    pub fn get<T: Component>(&self) -> Option<&'a T> {
        let id = self.store.registry().lookup::<T>()?;
        let hint = self
            .rows
            .column_of(id)
            .and_then(|c| self.rows.hint(self.row, c));
        self.store
            .get(self.key())
            .ok()?
            .component_with_hint(id, hint)?
            .downcast_ref::<T>()
    }

    pub fn messages<M: Message>(&self) -> impl Iterator<Item = &'a M> + 'a {
        self.store
            .get(self.key())
            .into_iter()
            .flat_map(|entity| entity.inbox.iter::<M>())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
