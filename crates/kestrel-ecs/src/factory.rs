//! JSON boundary for building, updating and serializing entity trees.
//!
//! Component data is keyed by registered component name and carried as
//! `serde_json::Value`. Creating a component that is already attached merges
//! the new data over the current value, so partial prefab overrides only
//! touch the fields they name. Values are deserialized before the entity is
//! touched: a malformed value leaves no partial state behind.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::command::ChildPolicy;
use crate::component::{Component, ComponentTypeId};
use crate::entity::EntityKey;
use crate::entity_ref::EntityMut;
use crate::uuid::Uuid;
use crate::world::World;
use crate::EcsError;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// Outcome of creating a component from JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateComponentResult {
    pub component_id: ComponentTypeId,
    /// `false` when an attached component was updated in place.
    pub created: bool,
}

/// How [`EntityFactory::update_entity`] treats state absent from the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UpdateMode {
    /// Merge the data in; keep components and children it does not mention.
    #[default]
    UpdateAll,
    /// Merge the data in, then drop components and serializable children it
    /// does not mention.
    UpdateAllDeleteOld,
}

/// Serialized form of one entity and its serializable descendants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityData {
    pub name: String,
    /// Nil means "generate one".
    pub instance_uuid: Uuid,
    pub prefab_uuid: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefab: Option<String>,
    /// Component values keyed by registered component name.
    pub components: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<EntityData>,
}

// ---------------------------------------------------------------------------
// Component creation
// ---------------------------------------------------------------------------

/// Create or update a `T` on `entity` from JSON.
///
/// This is the hook installed by
/// [`ComponentRegistry::register_serializable`](crate::component::ComponentRegistry::register_serializable).
pub fn create_component_from_json<T>(
    entity: &mut EntityMut<'_>,
    data: &Value,
) -> Result<CreateComponentResult, EcsError>
where
    T: Component + Serialize + DeserializeOwned,
{
    let registry = entity.store().registry();
    let component_id = registry.id_of::<T>()?;
    let component = registry.name_of(component_id).to_owned();
    let deserialize_error = |e: serde_json::Error| EcsError::ComponentDeserializationError {
        component: component.clone(),
        details: e.to_string(),
    };

    if let Some(current) = entity.try_get::<T>() {
        let mut merged = serde_json::to_value(current).map_err(deserialize_error)?;
        merge_json(&mut merged, data);
        let value: T = serde_json::from_value(merged).map_err(deserialize_error)?;
        *entity.get_mut::<T>()? = value;
        return Ok(CreateComponentResult {
            component_id,
            created: false,
        });
    }

    let value: T = serde_json::from_value(data.clone()).map_err(deserialize_error)?;
    entity.add_component(value)?;
    Ok(CreateComponentResult {
        component_id,
        created: true,
    })
}

/// Overlay `patch` onto `base`. Objects merge key by key; any other value
/// replaces what was there.
fn merge_json(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                match base.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

// ---------------------------------------------------------------------------
// EntityFactoryContext
// ---------------------------------------------------------------------------

/// State shared by the components of one factory operation: the prefab
/// being instantiated and the entities created so far, by instance UUID.
#[derive(Debug, Clone, Default)]
pub struct EntityFactoryContext {
    prefab: Option<String>,
    entities: Vec<(Uuid, EntityKey)>,
}

impl EntityFactoryContext {
    pub fn new(prefab: Option<String>) -> Self {
        Self {
            prefab,
            entities: Vec::new(),
        }
    }

    pub fn prefab(&self) -> Option<&str> {
        self.prefab.as_deref()
    }

    /// An entity created earlier in this operation.
    pub fn entity_for_uuid(&self, uuid: Uuid) -> Option<EntityKey> {
        self.entities
            .iter()
            .find(|(u, _)| *u == uuid)
            .map(|(_, key)| *key)
    }

    pub(crate) fn add_entity(&mut self, uuid: Uuid, key: EntityKey) {
        self.entities.push((uuid, key));
    }

    pub fn create_component<T>(
        &self,
        entity: &mut EntityMut<'_>,
        data: &Value,
    ) -> Result<CreateComponentResult, EcsError>
    where
        T: Component + Serialize + DeserializeOwned,
    {
        create_component_from_json::<T>(entity, data)
    }

    /// Create or update a component chosen by registered name.
    ///
    /// # Errors
    ///
    /// - [`EcsError::UnknownComponent`] if `name` is not registered.
    /// - [`EcsError::MissingSerializer`] if the type has no JSON hooks.
    /// - [`EcsError::ComponentDeserializationError`] if `data` does not fit.
    pub fn create_component_by_name(
        &self,
        entity: &mut EntityMut<'_>,
        name: &str,
        data: &Value,
    ) -> Result<CreateComponentResult, EcsError> {
        let registry = Arc::clone(entity.store().registry_arc());
        let id = registry
            .lookup_by_name(name)
            .ok_or_else(|| registry.unknown(name))?;
        let create = registry
            .vtable(id)
            .and_then(|v| v.create)
            .ok_or_else(|| EcsError::MissingSerializer {
                component: name.to_owned(),
            })?;
        create(entity, data)
    }
}

// ---------------------------------------------------------------------------
// EntityFactory
// ---------------------------------------------------------------------------

/// Builds entity trees from [`EntityData`] and serializes them back.
///
/// Created entities are pending until the world's next reconciliation, like
/// any other new entity.
pub struct EntityFactory<'w> {
    world: &'w mut World,
    context: EntityFactoryContext,
}

impl<'w> EntityFactory<'w> {
    pub fn new(world: &'w mut World) -> Self {
        Self {
            world,
            context: EntityFactoryContext::default(),
        }
    }

    /// A factory whose entities default to belonging to `prefab`.
    pub fn for_prefab(world: &'w mut World, prefab: impl Into<String>) -> Self {
        Self {
            world,
            context: EntityFactoryContext::new(Some(prefab.into())),
        }
    }

    pub fn context(&self) -> &EntityFactoryContext {
        &self.context
    }

    /// Create `data` and its children, optionally under `parent`.
    ///
    /// On error the partially built entity (and whatever children it already
    /// had) is marked for destruction.
    pub fn create_entity(
        &mut self,
        data: &EntityData,
        parent: Option<EntityKey>,
    ) -> Result<EntityKey, EcsError> {
        let key = self.world.store_mut().allocate(data.name.clone());
        match self.populate(key, data, parent) {
            Ok(()) => Ok(key),
            Err(err) => {
                tracing::debug!(?key, %err, "entity creation failed, discarding");
                let _ = self.world.store_mut().mark_destroy(key, ChildPolicy::Destroy);
                Err(err)
            }
        }
    }

    fn populate(
        &mut self,
        key: EntityKey,
        data: &EntityData,
        parent: Option<EntityKey>,
    ) -> Result<(), EcsError> {
        let instance_uuid = {
            let mut entity = EntityMut::checked(self.world.store_mut(), key)?;
            if !data.instance_uuid.is_nil() {
                entity.set_instance_uuid(data.instance_uuid);
            }
            let prefab = data.prefab.clone().or(self.context.prefab.clone());
            entity.set_prefab(prefab, data.prefab_uuid);
            if parent.is_some() {
                entity.set_parent(parent, None)?;
            }
            for (name, value) in &data.components {
                self.context.create_component_by_name(&mut entity, name, value)?;
            }
            entity.as_ref().instance_uuid()
        };
        self.context.add_entity(instance_uuid, key);

        for child in &data.children {
            self.create_entity(child, Some(key))?;
        }
        Ok(())
    }

    /// Apply `data` to an existing entity tree.
    ///
    /// Components are merged. Children are matched by instance UUID: matches
    /// are updated recursively, unmatched entries are created. With
    /// [`UpdateMode::UpdateAllDeleteOld`] components and serializable children
    /// absent from `data` are removed. The entity is flagged as reloaded.
    pub fn update_entity(
        &mut self,
        key: EntityKey,
        data: &EntityData,
        mode: UpdateMode,
    ) -> Result<(), EcsError> {
        let existing: Vec<(Uuid, EntityKey, bool)> = {
            let mut entity = self.world.entity_mut_by_key(key)?;
            entity.set_name(data.name.clone());
            if data.prefab.is_some() || !data.prefab_uuid.is_nil() {
                entity.set_prefab(data.prefab.clone(), data.prefab_uuid);
            }

            let mut touched = Vec::with_capacity(data.components.len());
            for (name, value) in &data.components {
                let result = self.context.create_component_by_name(&mut entity, name, value)?;
                touched.push(result.component_id);
            }
            if mode == UpdateMode::UpdateAllDeleteOld {
                entity.keep_only_components_with_ids(&touched);
            }

            entity
                .as_ref()
                .children()
                .map(|c| (c.instance_uuid(), c.key(), c.is_serializable()))
                .collect()
        };

        let mut matched = Vec::with_capacity(data.children.len());
        for child in &data.children {
            let found = existing
                .iter()
                .find(|(uuid, _, _)| !uuid.is_nil() && *uuid == child.instance_uuid);
            match found {
                Some(&(_, child_key, _)) => {
                    self.update_entity(child_key, child, mode)?;
                    matched.push(child_key);
                }
                None => {
                    self.create_entity(child, Some(key))?;
                }
            }
        }

        if mode == UpdateMode::UpdateAllDeleteOld {
            for &(_, child_key, serializable) in &existing {
                if serializable && !matched.contains(&child_key) {
                    self.world
                        .store_mut()
                        .mark_destroy(child_key, ChildPolicy::Destroy)?;
                }
            }
        }

        self.world.entity_mut_by_key(key)?.set_reloaded();
        Ok(())
    }

    /// Serialize an entity and its serializable descendants. Components
    /// without JSON hooks are left out.
    pub fn serialize_entity(&self, key: EntityKey) -> Result<EntityData, EcsError> {
        let entity = self.world.entity_by_key(key)?;
        let children = entity
            .children()
            .filter(|c| c.is_serializable())
            .map(|c| self.serialize_entity(c.key()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(EntityData {
            name: entity.name().to_owned(),
            instance_uuid: entity.instance_uuid(),
            prefab_uuid: entity.prefab_uuid(),
            prefab: entity.prefab().map(str::to_owned),
            components: entity.serialize_components()?,
            children,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
