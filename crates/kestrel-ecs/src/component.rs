//! Component type registration, type-erased destructors and JSON hooks.
//!
//! Every component type must be registered in a [`ComponentRegistry`] before
//! any [`World`](crate::world::World) is built. Registration assigns a dense
//! [`ComponentTypeId`] that doubles as the bit position in a
//! [`FamilyMask`](crate::mask::FamilyMask) and as the key into the
//! per-world [`ComponentDeleterTable`]. Once handed to a world (inside an
//! `Arc`) the registry is immutable for the rest of the process.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::entity_ref::EntityMut;
use crate::factory::{self, CreateComponentResult};
use crate::mask::MAX_COMPONENTS;
use crate::EcsError;

// ---------------------------------------------------------------------------
// Component
// ---------------------------------------------------------------------------

/// Marker for types that can be attached to an entity.
///
/// Blanket-implemented; components only need to be `'static`, `Send` and
/// `Sync` so that a world can move between threads and read-only batch work
/// can fan out over the worker pool.
pub trait Component: Any + Send + Sync {}

impl<T: Any + Send + Sync> Component for T {}

/// Owning, type-erased component storage. Exclusively owned by one entity.
pub type ComponentBox = Box<dyn Any + Send + Sync>;

// ---------------------------------------------------------------------------
// ComponentTypeId
// ---------------------------------------------------------------------------

/// Opaque, lightweight identifier for a registered component type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentTypeId(pub(crate) u32);

impl ComponentTypeId {
    /// Dense index of this type (also its bit in a family mask).
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentTypeId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// ComponentInfo / ComponentVtable
// ---------------------------------------------------------------------------

/// Metadata about a registered component type.
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    /// Unique ID assigned at registration time.
    pub id: ComponentTypeId,
    /// Human-readable name (supplied by the caller).
    pub name: String,
    /// `std::mem::size_of::<T>()`
    pub size: usize,
    /// `std::mem::align_of::<T>()`
    pub align: usize,
    /// Rust `TypeId` for runtime type checking.
    pub type_id: TypeId,
    /// `std::any::type_name::<T>()`, for diagnostics only.
    pub type_name: &'static str,
}

/// Destroys a boxed component without static type information.
pub type DestroyFn = fn(ComponentBox);

/// Creates or updates a component on an entity from JSON config data.
pub type CreateFn =
    fn(&mut EntityMut<'_>, &serde_json::Value) -> Result<CreateComponentResult, EcsError>;

/// Serializes a type-erased component into JSON.
pub type SerializeFn = fn(&(dyn Any + Send + Sync)) -> Result<serde_json::Value, String>;

/// Type-erased operations for one component type.
#[derive(Clone, Copy)]
pub struct ComponentVtable {
    /// Drops a boxed value of this type.
    pub destroy: DestroyFn,
    /// JSON create/update hook, present for serializable components.
    pub create: Option<CreateFn>,
    /// JSON serialize hook, present for serializable components.
    pub serialize: Option<SerializeFn>,
}

impl ComponentVtable {
    fn new<T: Component>() -> Self {
        Self {
            destroy: destroy_component::<T>,
            create: None,
            serialize: None,
        }
    }

    fn serializable<T: Component + Serialize + DeserializeOwned>() -> Self {
        Self {
            destroy: destroy_component::<T>,
            create: Some(factory::create_component_from_json::<T>),
            serialize: Some(serialize_component::<T>),
        }
    }
}

impl fmt::Debug for ComponentVtable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentVtable")
            .field("create", &self.create.is_some())
            .field("serialize", &self.serialize.is_some())
            .finish()
    }
}

fn destroy_component<T: Component>(component: ComponentBox) {
    match component.downcast::<T>() {
        Ok(typed) => drop(typed),
        Err(_) => panic!(
            "component deleter for '{}' received a value of another type",
            std::any::type_name::<T>()
        ),
    }
}

fn serialize_component<T: Component + Serialize>(
    component: &(dyn Any + Send + Sync),
) -> Result<serde_json::Value, String> {
    let typed = component
        .downcast_ref::<T>()
        .ok_or_else(|| format!("value is not a {}", std::any::type_name::<T>()))?;
    serde_json::to_value(typed).map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

/// Registry mapping Rust types to [`ComponentTypeId`]s and their metadata.
///
/// Append-only. A type can only be registered once; subsequent registrations
/// of the same Rust `TypeId` return the existing [`ComponentTypeId`].
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    /// TypeId -> ComponentTypeId for dedup.
    by_type: HashMap<TypeId, ComponentTypeId>,
    /// Name -> ComponentTypeId for lookup by string name (factory, tooling).
    by_name: HashMap<String, ComponentTypeId>,
    /// Indexed by ComponentTypeId.0.
    infos: Vec<ComponentInfo>,
    /// Indexed by ComponentTypeId.0.
    vtables: Vec<ComponentVtable>,
}

impl ComponentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component type under the given `name`.
    ///
    /// If the type has already been registered, the existing
    /// [`ComponentTypeId`] is returned and `name` is ignored.
    ///
    /// # Panics
    ///
    /// Panics if `name` is taken by a different type, or if more than
    /// [`MAX_COMPONENTS`] types are registered.
    pub fn register<T: Component>(&mut self, name: &str) -> ComponentTypeId {
        self.insert::<T>(name, ComponentVtable::new::<T>())
    }

    /// Register a component type that can be created from and serialized to
    /// JSON config data (prefabs, scenes, editor round-trips).
    ///
    /// Re-registering a type that was first registered with [`register`]
    /// upgrades its vtable with the JSON hooks.
    ///
    /// [`register`]: Self::register
    pub fn register_serializable<T>(&mut self, name: &str) -> ComponentTypeId
    where
        T: Component + Serialize + DeserializeOwned,
    {
        let id = self.insert::<T>(name, ComponentVtable::serializable::<T>());
        self.vtables[id.index()] = ComponentVtable::serializable::<T>();
        id
    }

    fn insert<T: Component>(&mut self, name: &str, vtable: ComponentVtable) -> ComponentTypeId {
        let rust_type_id = TypeId::of::<T>();
        if let Some(&existing) = self.by_type.get(&rust_type_id) {
            return existing;
        }
        if self.by_name.contains_key(name) {
            panic!(
                "component name '{}' is already registered for a different type",
                name
            );
        }
        assert!(
            self.infos.len() < MAX_COMPONENTS,
            "cannot register '{name}': at most {MAX_COMPONENTS} component types are supported"
        );

        let id = ComponentTypeId(self.infos.len() as u32);
        self.infos.push(ComponentInfo {
            id,
            name: name.to_owned(),
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            type_id: rust_type_id,
            type_name: std::any::type_name::<T>(),
        });
        self.vtables.push(vtable);
        self.by_type.insert(rust_type_id, id);
        self.by_name.insert(name.to_owned(), id);
        id
    }

    /// Look up a component type by its Rust `TypeId`.
    pub fn lookup<T: 'static>(&self) -> Option<ComponentTypeId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Like [`lookup`](Self::lookup) but reports unregistered types as an error.
    pub fn id_of<T: 'static>(&self) -> Result<ComponentTypeId, EcsError> {
        self.lookup::<T>()
            .ok_or_else(|| self.unknown(std::any::type_name::<T>()))
    }

    /// Look up a component type by its registered string name.
    pub fn lookup_by_name(&self, name: &str) -> Option<ComponentTypeId> {
        self.by_name.get(name).copied()
    }

    /// Get the [`ComponentInfo`] for a registered component type ID.
    pub fn get_info(&self, id: ComponentTypeId) -> Option<&ComponentInfo> {
        self.infos.get(id.index())
    }

    /// Registered name of a type, or `"<unregistered>"`.
    pub fn name_of(&self, id: ComponentTypeId) -> &str {
        self.get_info(id)
            .map(|info| info.name.as_str())
            .unwrap_or("<unregistered>")
    }

    /// Registered name of `T`, or its Rust type name when unregistered.
    pub fn display_name<T: 'static>(&self) -> String {
        match self.lookup::<T>() {
            Some(id) => self.name_of(id).to_owned(),
            None => std::any::type_name::<T>().to_owned(),
        }
    }

    /// Type-erased operations for a registered component type.
    pub fn vtable(&self, id: ComponentTypeId) -> Option<&ComponentVtable> {
        self.vtables.get(id.index())
    }

    /// Total number of registered component types.
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Whether any component types have been registered.
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Returns the names of all registered component types, sorted.
    pub fn registered_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }

    pub(crate) fn unknown(&self, name: &str) -> EcsError {
        EcsError::UnknownComponent {
            name: name.to_owned(),
            registered: self.registered_names().join(", "),
        }
    }
}

// ---------------------------------------------------------------------------
// ComponentDeleterTable
// ---------------------------------------------------------------------------

/// Per-world table of type-erased destructors, indexed by [`ComponentTypeId`].
///
/// A slot is installed the first time a component of that type is attached
/// in the world. Entities hand detached components to [`destroy`] instead of
/// dropping them in place, so destruction always goes through one audited
/// path (and is counted for diagnostics).
///
/// [`destroy`]: Self::destroy
#[derive(Debug, Default)]
pub struct ComponentDeleterTable {
    deleters: Vec<Option<DestroyFn>>,
    destroyed: Vec<u64>,
}

impl ComponentDeleterTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the destructor for `id` from the registry, if not known yet.
    pub fn initialize(&mut self, id: ComponentTypeId, registry: &ComponentRegistry) {
        let idx = id.index();
        if idx >= self.deleters.len() {
            self.deleters.resize(idx + 1, None);
            self.destroyed.resize(idx + 1, 0);
        }
        if self.deleters[idx].is_none() {
            self.deleters[idx] = registry.vtable(id).map(|vt| vt.destroy);
        }
    }

    /// Whether a destructor is installed for `id`.
    pub fn is_installed(&self, id: ComponentTypeId) -> bool {
        matches!(self.deleters.get(id.index()), Some(Some(_)))
    }

    /// Destroy a component through its registered destructor.
    ///
    /// # Panics
    ///
    /// Panics if no destructor was installed for `id`: every attach path
    /// installs one, so reaching this is a broken invariant.
    pub fn destroy(&mut self, id: ComponentTypeId, component: ComponentBox) {
        let Some(Some(destroy)) = self.deleters.get(id.index()).copied() else {
            panic!("no deleter installed for {id:?}; component was attached outside the world");
        };
        destroy(component);
        self.destroyed[id.index()] += 1;
    }

    /// Number of components of type `id` destroyed through this table.
    pub fn destroyed_count(&self, id: ComponentTypeId) -> u64 {
        self.destroyed.get(id.index()).copied().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
