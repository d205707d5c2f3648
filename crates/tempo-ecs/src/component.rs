//! Component types and their registry.
//!
//! Components are plain data holders identified by their Rust type. Every
//! component type used in a world must be declared up front (through
//! [`Registration`](crate::registration::Registration)); declaration assigns
//! a stable small index used to build the bit-sets that drive archetype and
//! query matching.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use crate::bitset::ComponentMask;
use crate::{EcsError, EcsResult};

// ---------------------------------------------------------------------------
// Component
// ---------------------------------------------------------------------------

/// A plain data holder attached to entities.
///
/// Identity is the implementing Rust type; an entity holds at most one
/// component per type. No behavior is required -- [`cleanup`](Self::cleanup)
/// is an optional hook that runs when the owning entity is torn down.
pub trait Component: Any {
    /// Diagnostic name of the concrete component type.
    fn component_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Called once while the owning entity is being destroyed, before the
    /// component is dropped.
    fn cleanup(&mut self) {}
}

/// Concrete `TypeId` of a type-erased component.
///
/// The upcast to `dyn Any` is required: calling `type_id` on the
/// `dyn Component` directly would resolve to the erased trait-object type.
pub(crate) fn component_type_id(component: &dyn Component) -> TypeId {
    let any: &dyn Any = component;
    any.type_id()
}

/// Marker attached to an entity whose destruction has been requested.
///
/// Systems can require this component to react during the tick between the
/// destroy request and the actual teardown at the end of the tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destroying;

impl Component for Destroying {}

// ---------------------------------------------------------------------------
// ComponentTypeId
// ---------------------------------------------------------------------------

/// Small stable index of a registered component type.
///
/// Assigned on first registration in encounter order and valid for the
/// lifetime of the registry; used as the bit position in [`ComponentMask`]s.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentTypeId(pub(crate) u32);

impl ComponentTypeId {
    /// The bit position this component occupies in masks.
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
// ComponentRegistry
// ---------------------------------------------------------------------------

/// Metadata about a registered component type.
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    /// Index assigned at registration time.
    pub id: ComponentTypeId,
    /// Fully-qualified type name, for diagnostics.
    pub name: &'static str,
    /// Rust `TypeId` of the component type.
    pub type_id: TypeId,
}

/// Maps component types to their stable indices.
///
/// Registration is idempotent per Rust type. The built-in [`Destroying`]
/// marker is always registered first, so index 0 is reserved for it.
#[derive(Debug)]
pub struct ComponentRegistry {
    by_type: HashMap<TypeId, ComponentTypeId>,
    infos: Vec<ComponentInfo>,
}

impl ComponentRegistry {
    pub(crate) fn new() -> Self {
        let mut registry = Self {
            by_type: HashMap::new(),
            infos: Vec::new(),
        };
        registry.register::<Destroying>();
        registry
    }

    /// Register a component type, returning its index.
    ///
    /// Re-registering the same Rust type returns the existing index.
    pub fn register<T: Component>(&mut self) -> ComponentTypeId {
        self.register_raw(TypeId::of::<T>(), std::any::type_name::<T>())
    }

    pub(crate) fn register_raw(&mut self, type_id: TypeId, name: &'static str) -> ComponentTypeId {
        if let Some(&existing) = self.by_type.get(&type_id) {
            return existing;
        }
        let id = ComponentTypeId(self.infos.len() as u32);
        self.infos.push(ComponentInfo { id, name, type_id });
        self.by_type.insert(type_id, id);
        tracing::debug!(component = name, index = id.0, "registered component type");
        id
    }

    /// Look up the index of a component type.
    pub fn lookup<T: Component>(&self) -> Option<ComponentTypeId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Look up the index of a component type by its Rust `TypeId`.
    pub fn lookup_dyn(&self, type_id: TypeId) -> Option<ComponentTypeId> {
        self.by_type.get(&type_id).copied()
    }

    /// Metadata for a registered index.
    pub fn info(&self, id: ComponentTypeId) -> &ComponentInfo {
        &self.infos[id.0 as usize]
    }

    /// Number of registered component types.
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Whether the registry holds no component types. Never true in practice:
    /// the built-in marker is registered at construction.
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// OR together the bits of the given component indices.
    pub fn mask_of(&self, ids: impl IntoIterator<Item = ComponentTypeId>) -> ComponentMask {
        ComponentMask::from_indices(ids.into_iter().map(ComponentTypeId::index))
    }

    /// Resolve the index for a type that must already be registered.
    pub(crate) fn require_dyn(
        &self,
        type_id: TypeId,
        name: &'static str,
    ) -> EcsResult<ComponentTypeId> {
        self.lookup_dyn(type_id)
            .ok_or(EcsError::UnknownComponent { name })
    }
}
