//! Kestrel ECS -- entity runtime core with live families and deferred mutation.
//!
//! Entities live in a generation-checked arena owned by the [`World`]. Each
//! entity owns a small packed list of type-erased components plus a cached
//! [`FamilyMask`] that is refreshed lazily. Systems never query the world
//! directly: they bind to a [`Family`] (one per distinct required/optional
//! mask pair) whose struct-of-arrays rows are kept in sync with entity state
//! at a single reconciliation point per step. Between reconciliations a
//! family's rows never move, so systems can create, destroy and restructure
//! entities while iterating.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use kestrel_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Position { x: f32, y: f32 }
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Velocity { dx: f32, dy: f32 }
//!
//! let mut registry = ComponentRegistry::new();
//! registry.register::<Position>("position");
//! registry.register::<Velocity>("velocity");
//!
//! let mut world = World::new(Arc::new(registry));
//! let query = FamilyQuery::builder(world.registry())
//!     .require::<Position>()
//!     .require::<Velocity>()
//!     .build()
//!     .unwrap();
//! let movers = world.bind_family(query);
//!
//! let mut entity = world.create_entity();
//! entity.add_component(Position { x: 0.0, y: 0.0 }).unwrap();
//! entity.add_component(Velocity { dx: 1.0, dy: 0.0 }).unwrap();
//!
//! // Not visible to families until the reconciliation point.
//! assert_eq!(world.family(&movers).len(), 0);
//! world.reconcile();
//! assert_eq!(world.family(&movers).len(), 1);
//! ```

#![deny(unsafe_code)]

pub mod command;
pub mod component;
pub mod config;
pub mod entity;
pub mod entity_ref;
pub mod factory;
pub mod family;
pub mod main_thread;
pub mod mask;
pub mod message;
pub mod pool;
pub mod store;
pub mod system;
pub mod uuid;
pub mod world;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by ECS operations.
///
/// Missing components and empty families are not errors: they surface as
/// `Option`/`bool` results. Everything here is either caller misuse
/// (precondition violations) or a reference to an entity that no longer
/// exists.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// The entity was destroyed, or the id was never issued by this world.
    #[error("entity {entity} does not exist (destroyed or never issued)")]
    DanglingEntity {
        entity: entity::EntityId,
    },

    /// An arena key whose slot has been freed or recycled.
    #[error("entity key {key:?} is stale (slot freed or recycled)")]
    StaleKey {
        key: entity::EntityKey,
    },

    /// The entity exists but has not been spawned yet.
    #[error("entity {entity} has not been spawned yet (waiting for reconciliation)")]
    NotSpawned {
        entity: entity::EntityId,
    },

    /// A component of this type is already attached to the entity.
    #[error("entity {entity} already has a component of type '{component}'")]
    DuplicateComponent {
        entity: entity::EntityId,
        component: String,
    },

    /// The entity has no component of the requested type.
    #[error("entity {entity} has no component of type '{component}'")]
    MissingComponent {
        entity: entity::EntityId,
        component: String,
    },

    /// A component type was referenced that has not been registered.
    #[error("component type '{name}' not registered. Registered components: [{registered}]")]
    UnknownComponent {
        name: String,
        registered: String,
    },

    /// A parent/child change that would corrupt the hierarchy.
    #[error("cannot parent {child} under {parent}: {reason}")]
    InvalidHierarchy {
        child: entity::EntityId,
        parent: entity::EntityId,
        reason: &'static str,
    },

    /// Deserialization of a component value failed.
    #[error("failed to deserialize component '{component}': {details}")]
    ComponentDeserializationError {
        component: String,
        details: String,
    },

    /// Serialization of a component value failed.
    #[error("failed to serialize component '{component}': {details}")]
    ComponentSerializationError {
        component: String,
        details: String,
    },

    /// The component type was registered without JSON hooks.
    #[error("component type '{component}' has no serialization hooks (use register_serializable)")]
    MissingSerializer {
        component: String,
    },
}

impl EcsError {
    /// Whether the error means "the entity is gone" as opposed to misuse.
    ///
    /// Long-lived caches (selection state, prefab observers) use this to drop
    /// stale references instead of reporting them.
    pub fn is_dangling(&self) -> bool {
        matches!(
            self,
            EcsError::DanglingEntity { .. } | EcsError::StaleKey { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::command::{ChildPolicy, ReconcileReport};
    pub use crate::component::{Component, ComponentInfo, ComponentRegistry, ComponentTypeId};
    pub use crate::config::WorldConfig;
    pub use crate::entity::{EntityId, EntityKey, EntityState};
    pub use crate::entity_ref::{EntityMut, EntityRef};
    pub use crate::factory::{
        CreateComponentResult, EntityData, EntityFactory, EntityFactoryContext, UpdateMode,
    };
    pub use crate::family::{
        Family, FamilyBinding, FamilyId, FamilyItem, FamilyListener, FamilyQuery, FamilyRow,
    };
    pub use crate::main_thread::{promise, Completion, MainThreadSender, Promise};
    pub use crate::mask::{FamilyMask, MAX_COMPONENTS};
    pub use crate::message::{Message, MESSAGE_LIFETIME};
    pub use crate::system::{StepContext, StepDiagnostics, System, Timeline};
    pub use crate::uuid::Uuid;
    pub use crate::world::World;
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
