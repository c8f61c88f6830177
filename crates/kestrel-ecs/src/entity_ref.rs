//! Borrowed handles to one entity.
//!
//! [`EntityRef`] is the read-only view used by tooling and serialization:
//! components, metadata, hierarchy and revision counters. [`EntityMut`] adds
//! structural edits. Every edit is visible to direct component queries at
//! once and reaches families at the next reconciliation.

use std::any::Any;
use std::collections::BTreeMap;

use crate::command::ChildPolicy;
use crate::component::{Component, ComponentTypeId};
use crate::entity::{Entity, EntityId, EntityKey, EntityState};
use crate::mask::FamilyMask;
use crate::message::Message;
use crate::store::EntityStore;
use crate::uuid::Uuid;
use crate::EcsError;

// ---------------------------------------------------------------------------
// EntityRef
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
pub struct EntityRef<'w> {
    store: &'w EntityStore,
    key: EntityKey,
}

impl<'w> EntityRef<'w> {
    pub(crate) fn new(store: &'w EntityStore, key: EntityKey) -> Result<Self, EcsError> {
        store.get(key)?;
        Ok(Self { store, key })
    }

    fn entity(&self) -> &'w Entity {
        match self.store.get(self.key) {
            Ok(entity) => entity,
            Err(_) => panic!("{:?} freed while an EntityRef was held", self.key),
        }
    }

    pub fn id(&self) -> EntityId {
        self.entity().id
    }

    pub fn key(&self) -> EntityKey {
        self.key
    }

    pub fn state(&self) -> EntityState {
        self.entity().state()
    }

    pub fn is_alive(&self) -> bool {
        self.entity().alive
    }

    /// Cached mask. Only meaningful while [`is_dirty`](Self::is_dirty) is
    /// false.
    pub fn mask(&self) -> FamilyMask {
        self.entity().mask()
    }

    pub fn is_dirty(&self) -> bool {
        self.entity().is_dirty()
    }

    /// Live component of type `T`, if attached.
    pub fn try_get<T: Component>(&self) -> Option<&'w T> {
        let id = self.store.registry().lookup::<T>()?;
        self.entity().try_get(id)?.downcast_ref::<T>()
    }

    /// Like [`try_get`](Self::try_get), but a missing component is an error.
    pub fn get<T: Component>(&self) -> Result<&'w T, EcsError> {
        self.try_get::<T>().ok_or_else(|| self.missing::<T>())
    }

    fn missing<T: Component>(&self) -> EcsError {
        EcsError::MissingComponent {
            entity: self.id(),
            component: self.store.registry().display_name::<T>(),
        }
    }

    pub fn has<T: Component>(&self) -> bool {
        self.store
            .registry()
            .lookup::<T>()
            .is_some_and(|id| self.entity().has_component(id))
    }

    pub fn has_component(&self, id: ComponentTypeId) -> bool {
        self.entity().has_component(id)
    }

    /// Whether this entity or any descendant has a `T`.
    pub fn has_component_in_tree<T: Component>(&self) -> bool {
        self.store
            .registry()
            .lookup::<T>()
            .is_some_and(|id| self.store.has_component_in_tree(self.key, id))
    }

    /// Inbox messages of type `M`, oldest first.
    pub fn messages<M: Message>(&self) -> impl Iterator<Item = &'w M> + 'w {
        self.entity().inbox.iter::<M>()
    }

    /// Messages of any type waiting in the inbox.
    pub fn inbox_len(&self) -> usize {
        self.entity().inbox.len()
    }

    /// Raw enumeration of the attached components.
    pub fn components(
        &self,
    ) -> impl Iterator<Item = (ComponentTypeId, &'w (dyn Any + Send + Sync))> + 'w {
        self.entity()
            .components()
            .iter()
            .map(|(id, component)| (*id, &**component))
    }

    /// JSON values of every attached component that has serialization
    /// hooks, keyed by registered name. Components without hooks are skipped.
    pub fn serialize_components(&self) -> Result<BTreeMap<String, serde_json::Value>, EcsError> {
        let registry = self.store.registry();
        let mut out = BTreeMap::new();
        for (id, component) in self.components() {
            let Some(serialize) = registry.vtable(id).and_then(|v| v.serialize) else {
                continue;
            };
            let name = registry.name_of(id);
            let value = serialize(component).map_err(|details| {
                EcsError::ComponentSerializationError {
                    component: name.to_owned(),
                    details,
                }
            })?;
            out.insert(name.to_owned(), value);
        }
        Ok(out)
    }

    pub fn component_count(&self) -> usize {
        self.entity().component_count()
    }

    /// No components and no children.
    pub fn is_empty(&self) -> bool {
        self.entity().is_empty()
    }

    // -- metadata -----------------------------------------------------------

    pub fn name(&self) -> &'w str {
        &self.entity().name
    }

    pub fn instance_uuid(&self) -> Uuid {
        self.entity().instance_uuid
    }

    pub fn prefab_uuid(&self) -> Uuid {
        self.entity().prefab_uuid
    }

    pub fn prefab(&self) -> Option<&'w str> {
        self.entity().prefab.as_deref()
    }

    pub fn is_serializable(&self) -> bool {
        self.entity().serializable
    }

    pub fn was_reloaded(&self) -> bool {
        self.entity().reloaded
    }

    // -- hierarchy ----------------------------------------------------------

    pub fn parent(&self) -> Option<EntityRef<'w>> {
        let parent = self.entity().parent?;
        EntityRef::new(self.store, parent).ok()
    }

    pub fn children(&self) -> impl Iterator<Item = EntityRef<'w>> + 'w {
        let store = self.store;
        self.entity()
            .children
            .iter()
            .filter_map(move |key| EntityRef::new(store, *key).ok())
    }

    pub fn child_count(&self) -> usize {
        self.entity().children.len()
    }

    /// Bumped whenever this entity or any ancestor changes parent.
    pub fn hierarchy_revision(&self) -> u8 {
        self.entity().hierarchy_revision
    }

    /// Bumped whenever the child list of this entity or any descendant changes.
    pub fn children_revision(&self) -> u8 {
        self.entity().children_revision
    }

    pub fn world_partition(&self) -> u8 {
        self.entity().world_partition
    }
}

impl std::fmt::Debug for EntityRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self.entity(), f)
    }
}

// ---------------------------------------------------------------------------
// EntityMut
// ---------------------------------------------------------------------------

pub struct EntityMut<'w> {
    store: &'w mut EntityStore,
    key: EntityKey,
}

impl<'w> EntityMut<'w> {
    /// Callers guarantee `key` names an occupied slot.
    pub(crate) fn new(store: &'w mut EntityStore, key: EntityKey) -> Self {
        debug_assert!(store.contains_key(key), "EntityMut for stale {key:?}");
        Self { store, key }
    }

    pub(crate) fn checked(store: &'w mut EntityStore, key: EntityKey) -> Result<Self, EcsError> {
        store.get(key)?;
        Ok(Self { store, key })
    }

    pub fn as_ref(&self) -> EntityRef<'_> {
        EntityRef {
            store: &*self.store,
            key: self.key,
        }
    }

    pub fn id(&self) -> EntityId {
        self.as_ref().id()
    }

    pub fn key(&self) -> EntityKey {
        self.key
    }

    pub(crate) fn store(&self) -> &EntityStore {
        self.store
    }

    fn entity_mut(&mut self) -> &mut Entity {
        match self.store.get_mut(self.key) {
            Ok(entity) => entity,
            Err(_) => panic!("{:?} freed while an EntityMut was held", self.key),
        }
    }

    pub fn try_get<T: Component>(&self) -> Option<&T> {
        self.as_ref().try_get::<T>()
    }

    pub fn get<T: Component>(&self) -> Result<&T, EcsError> {
        self.as_ref().get::<T>()
    }

    pub fn try_get_mut<T: Component>(&mut self) -> Option<&mut T> {
        let id = self.store.registry().lookup::<T>()?;
        self.entity_mut().try_get_mut(id)?.downcast_mut::<T>()
    }

    pub fn get_mut<T: Component>(&mut self) -> Result<&mut T, EcsError> {
        self.store.component_mut::<T>(self.key)
    }

    pub fn has<T: Component>(&self) -> bool {
        self.as_ref().has::<T>()
    }

    // -- components ---------------------------------------------------------

    /// Attach a component.
    ///
    /// # Errors
    ///
    /// - [`EcsError::UnknownComponent`] if `T` is not registered.
    /// - [`EcsError::DuplicateComponent`] if a `T` is already attached.
    pub fn add_component<T: Component>(&mut self, component: T) -> Result<&mut Self, EcsError> {
        let id = self.store.registry().id_of::<T>()?;
        self.store
            .add_component_boxed(self.key, id, Box::new(component))?;
        Ok(self)
    }

    /// Detach the `T`. Returns whether one was attached.
    pub fn remove_component<T: Component>(&mut self) -> bool {
        match self.store.registry().lookup::<T>() {
            Some(id) => self.remove_component_by_id(id),
            None => false,
        }
    }

    pub fn remove_component_by_id(&mut self, id: ComponentTypeId) -> bool {
        self.store.remove_component(self.key, id).unwrap_or(false)
    }

    pub fn remove_all_components(&mut self) {
        self.entity_mut().remove_all_components();
        self.mark_dirty();
    }

    /// Detach every component whose type is not in `ids`.
    pub fn keep_only_components_with_ids(&mut self, ids: &[ComponentTypeId]) {
        self.entity_mut().keep_only_components_with_ids(ids);
        self.mark_dirty();
    }

    /// Replace an attached `T` in place. Families report a reload instead of
    /// a remove/add pair.
    pub fn replace_component<T: Component>(&mut self, component: T) -> Result<&mut Self, EcsError> {
        let id = self.store.registry().id_of::<T>()?;
        self.store
            .replace_component(self.key, id, Box::new(component))?;
        Ok(self)
    }

    pub fn send_message<M: Message>(&mut self, msg: M) -> Result<&mut Self, EcsError> {
        self.store.send_message(self.key, msg)?;
        Ok(self)
    }

    /// Flag the entity so families report it as reloaded at the next
    /// reconciliation.
    pub fn set_reloaded(&mut self) {
        // Key validity is an invariant of EntityMut.
        let _ = self.store.set_reloaded(self.key);
    }

    fn mark_dirty(&mut self) {
        let _ = self.store.mark_dirty(self.key);
    }

    // -- metadata -----------------------------------------------------------

    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.entity_mut().name = name.into();
        self
    }

    pub fn set_serializable(&mut self, serializable: bool) -> &mut Self {
        self.entity_mut().serializable = serializable;
        self
    }

    pub fn set_instance_uuid(&mut self, uuid: Uuid) -> &mut Self {
        self.entity_mut().instance_uuid = uuid;
        self
    }

    pub fn set_prefab(&mut self, prefab: Option<String>, prefab_uuid: Uuid) -> &mut Self {
        let entity = self.entity_mut();
        entity.prefab = prefab;
        entity.prefab_uuid = prefab_uuid;
        self
    }

    // -- hierarchy ----------------------------------------------------------

    /// Move under `parent` (or make a root with `None`), optionally at a
    /// given position among the new siblings.
    pub fn set_parent(
        &mut self,
        parent: Option<EntityKey>,
        child_index: Option<usize>,
    ) -> Result<&mut Self, EcsError> {
        self.store.set_parent(self.key, parent, child_index)?;
        Ok(self)
    }

    pub fn add_child(&mut self, child: EntityKey) -> Result<&mut Self, EcsError> {
        self.store.set_parent(child, Some(self.key), None)?;
        Ok(self)
    }

    pub fn detach_children(&mut self) -> Result<&mut Self, EcsError> {
        self.store.detach_children(self.key)?;
        Ok(self)
    }

    /// Set the partition of this entity and its whole subtree.
    pub fn set_world_partition(&mut self, partition: u8) -> Result<&mut Self, EcsError> {
        self.store.set_world_partition(self.key, partition)?;
        Ok(self)
    }

    pub fn sort_children_by_prefab_uuids(&mut self, uuids: &[Uuid]) -> Result<&mut Self, EcsError> {
        self.store.sort_children_by_prefab_uuids(self.key, uuids)?;
        Ok(self)
    }

    // -- lifecycle ----------------------------------------------------------

    /// Request destruction of this entity and its subtree.
    pub fn destroy(self) {
        self.destroy_with(ChildPolicy::Destroy);
    }

    pub fn destroy_with(self, policy: ChildPolicy) {
        let _ = self.store.mark_destroy(self.key, policy);
    }
}

impl std::fmt::Debug for EntityMut<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.as_ref(), f)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::component::ComponentRegistry;
    use crate::config::WorldConfig;

    #[derive(Debug, PartialEq)]
    struct Hp(u32);
    #[derive(Debug, PartialEq)]
    struct Armor(u32);

    fn store() -> EntityStore {
        let mut reg = ComponentRegistry::new();
        reg.register::<Hp>("hp");
        reg.register::<Armor>("armor");
        EntityStore::new(Arc::new(reg), &WorldConfig::default())
    }

    #[test]
    fn add_get_and_mutate() {
        let mut s = store();
        let key = s.allocate("hero".into());
        let mut e = EntityMut::new(&mut s, key);
        e.add_component(Hp(10)).unwrap();
        e.get_mut::<Hp>().unwrap().0 -= 3;
        assert_eq!(e.try_get::<Hp>(), Some(&Hp(7)));
        assert_eq!(e.as_ref().name(), "hero");
    }

    #[test]
    fn missing_component_error_names_type() {
        let mut s = store();
        let key = s.allocate(String::new());
        let e = EntityMut::new(&mut s, key);
        let err = e.get::<Armor>().unwrap_err();
        assert!(matches!(err, EcsError::MissingComponent { ref component, .. } if component == "armor"));
    }

    #[test]
    fn unregistered_component_is_rejected() {
        struct Nope;
        let mut s = store();
        let key = s.allocate(String::new());
        let mut e = EntityMut::new(&mut s, key);
        assert!(matches!(
            e.add_component(Nope),
            Err(EcsError::UnknownComponent { .. })
        ));
    }

    #[test]
    fn remove_is_immediately_invisible() {
        let mut s = store();
        let key = s.allocate(String::new());
        let mut e = EntityMut::new(&mut s, key);
        e.add_component(Hp(1)).unwrap();
        assert!(e.remove_component::<Hp>());
        assert!(!e.remove_component::<Hp>());
        assert!(e.try_get::<Hp>().is_none());
        assert!(!e.has::<Hp>());
    }

    #[test]
    fn tree_search_and_traversal() {
        let mut s = store();
        let root = s.allocate("root".into());
        let child = s.allocate("child".into());
        EntityMut::new(&mut s, root).add_child(child).unwrap();
        EntityMut::new(&mut s, child).add_component(Armor(2)).unwrap();

        let r = EntityRef::new(&s, root).unwrap();
        assert!(r.has_component_in_tree::<Armor>());
        assert!(!r.has_component_in_tree::<Hp>());
        let names: Vec<&str> = r.children().map(|c| c.name()).collect();
        assert_eq!(names, vec!["child"]);
        assert_eq!(
            EntityRef::new(&s, child).unwrap().parent().map(|p| p.key()),
            Some(root)
        );
        assert!(!r.is_empty());
    }

    #[test]
    fn hierarchy_edits_chain_through_results() {
        let mut s = store();
        let root = s.allocate("root".into());
        let a = s.allocate("a".into());
        let b = s.allocate("b".into());
        EntityMut::new(&mut s, root)
            .add_child(a)
            .unwrap()
            .add_child(b)
            .unwrap()
            .set_world_partition(2)
            .unwrap();
        assert_eq!(EntityRef::new(&s, b).unwrap().world_partition(), 2);

        let (ua, ub) = (Uuid::from_u128(1), Uuid::from_u128(2));
        EntityMut::new(&mut s, a).set_prefab(None, ua);
        EntityMut::new(&mut s, b).set_prefab(None, ub);
        let before = EntityRef::new(&s, root).unwrap().children_revision();
        EntityMut::new(&mut s, root)
            .sort_children_by_prefab_uuids(&[ub, ua])
            .unwrap();
        let r = EntityRef::new(&s, root).unwrap();
        let names: Vec<&str> = r.children().map(|c| c.name()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_ne!(r.children_revision(), before);

        EntityMut::new(&mut s, root).detach_children().unwrap();
        assert_eq!(EntityRef::new(&s, root).unwrap().child_count(), 0);
        assert!(EntityRef::new(&s, a).unwrap().parent().is_none());
    }

    #[test]
    fn components_enumerates_raw_values() {
        let mut s = store();
        let key = s.allocate(String::new());
        EntityMut::new(&mut s, key)
            .add_component(Hp(4))
            .unwrap()
            .add_component(Armor(1))
            .unwrap();
        let r = EntityRef::new(&s, key).unwrap();
        let hp = r
            .components()
            .find_map(|(_, c)| c.downcast_ref::<Hp>())
            .unwrap();
        assert_eq!(hp, &Hp(4));
        assert_eq!(r.component_count(), 2);
    }
}
