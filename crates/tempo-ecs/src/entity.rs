//! Entities and the entity manager.
//!
//! An [`Entity`] is a stable index plus its current component map and
//! archetype membership. The [`EntityManager`] composes the component
//! registry, the archetype store, the query index and the entity-factory
//! table, and owns every structural mutation: creation, component add/remove
//! (with archetype migration) and teardown.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;

use crate::archetype::{ArchetypeId, ArchetypeStore};
use crate::bitset::ComponentMask;
use crate::component::{component_type_id, Component, ComponentRegistry};
use crate::filter::ComponentFilter;
use crate::query::{QueryId, QueryIndex};
use crate::{EcsError, EcsResult, LogicTime};

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// Stable entity index. Assigned from 1 upward and never reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub(crate) u32);

impl EntityId {
    /// The raw index value.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
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

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// One simulation object: an index, an opaque factory type id, the component
/// map and the current archetype.
///
/// Invariant: the entity's archetype mask always equals the mask of its
/// current component set; the manager migrates the entity whenever the set
/// changes.
pub struct Entity {
    id: EntityId,
    factory_type: i32,
    destroy_time: Option<LogicTime>,
    components: HashMap<TypeId, Box<dyn Component>>,
    archetype: ArchetypeId,
}

impl Entity {
    /// This entity's stable index.
    #[inline]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// The factory type id the entity was created with.
    #[inline]
    pub fn factory_type(&self) -> i32 {
        self.factory_type
    }

    /// The archetype the entity currently belongs to.
    #[inline]
    pub fn archetype(&self) -> ArchetypeId {
        self.archetype
    }

    /// The logical time at which destruction was requested, if any.
    #[inline]
    pub fn destroy_time(&self) -> Option<LogicTime> {
        self.destroy_time
    }

    /// Whether destruction has been requested.
    #[inline]
    pub fn is_destroying(&self) -> bool {
        self.destroy_time.is_some()
    }

    /// Whether the entity currently holds a `T`.
    pub fn has<T: Component>(&self) -> bool {
        self.components.contains_key(&TypeId::of::<T>())
    }

    /// Borrow the entity's `T`, if present.
    pub fn get<T: Component>(&self) -> Option<&T> {
        self.components.get(&TypeId::of::<T>()).and_then(|c| {
            let any: &dyn Any = c.as_ref();
            any.downcast_ref::<T>()
        })
    }

    /// Mutably borrow the entity's `T`, if present.
    ///
    /// In-place component writes go through here; structural changes (adding
    /// or removing components) go through the world so the archetype follows.
    pub fn get_mut<T: Component>(&mut self) -> Option<&mut T> {
        self.components.get_mut(&TypeId::of::<T>()).and_then(|c| {
            let any: &mut dyn Any = c.as_mut();
            any.downcast_mut::<T>()
        })
    }

    /// Number of components currently attached.
    pub fn component_count(&self) -> usize {
        self.components.len()
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self
            .components
            .values()
            .map(|c| c.component_name())
            .collect();
        names.sort_unstable();
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("factory_type", &self.factory_type)
            .field("archetype", &self.archetype)
            .field("components", &names)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// EntityManager
// ---------------------------------------------------------------------------

/// Builds the initial component set for a factory type id.
pub type ComponentSetFn = Box<dyn Fn() -> Vec<Box<dyn Component>>>;

/// Owns entity allocation, component mutation and archetype migration.
pub struct EntityManager {
    registry: ComponentRegistry,
    store: ArchetypeStore,
    queries: QueryIndex,
    entities: IndexMap<EntityId, Entity>,
    factories: HashMap<i32, ComponentSetFn>,
    next_index: u32,
}

impl EntityManager {
    pub(crate) fn new() -> Self {
        Self {
            registry: ComponentRegistry::new(),
            store: ArchetypeStore::new(),
            queries: QueryIndex::new(),
            entities: IndexMap::new(),
            factories: HashMap::new(),
            next_index: 1,
        }
    }

    /// The component registry.
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub(crate) fn registry_mut(&mut self) -> &mut ComponentRegistry {
        &mut self.registry
    }

    /// The archetype store.
    pub fn store(&self) -> &ArchetypeStore {
        &self.store
    }

    /// The query index.
    pub fn queries(&self) -> &QueryIndex {
        &self.queries
    }

    pub(crate) fn register_factory(&mut self, type_id: i32, build: ComponentSetFn) -> EcsResult<()> {
        if type_id == 0 {
            return Err(EcsError::InvalidFactory { type_id });
        }
        if self.factories.contains_key(&type_id) {
            tracing::warn!(type_id, "entity factory already registered, replacing");
        }
        self.factories.insert(type_id, build);
        Ok(())
    }

    /// Create an entity from the factory registered for `type_id`.
    pub fn create_entity(&mut self, type_id: i32) -> EcsResult<EntityId> {
        let components = {
            let build = self
                .factories
                .get(&type_id)
                .ok_or(EcsError::UnknownFactory { type_id })?;
            build()
        };
        self.create_entity_with(type_id, components)
    }

    /// Create an entity with an explicit initial component set.
    pub fn create_entity_with(
        &mut self,
        type_id: i32,
        components: Vec<Box<dyn Component>>,
    ) -> EcsResult<EntityId> {
        let mut map: HashMap<TypeId, Box<dyn Component>> = HashMap::new();
        for component in components {
            let tid = component_type_id(component.as_ref());
            if map.contains_key(&tid) {
                tracing::debug!(
                    component = component.component_name(),
                    "duplicate component in initial set, keeping the first"
                );
                continue;
            }
            map.insert(tid, component);
        }
        if map.is_empty() {
            return Err(EcsError::EmptyComponentSet { type_id });
        }

        let mut ids = Vec::with_capacity(map.len());
        for component in map.values() {
            let id = self
                .registry
                .require_dyn(component_type_id(component.as_ref()), component.component_name())?;
            ids.push(id);
        }
        let mask = self.registry.mask_of(ids.iter().copied());
        let archetype = self.intern_archetype(mask, ids);

        let id = EntityId(self.next_index);
        self.next_index += 1;
        self.store.add_entity(archetype, id);
        self.entities.insert(
            id,
            Entity {
                id,
                factory_type: type_id,
                destroy_time: None,
                components: map,
                archetype,
            },
        );
        Ok(id)
    }

    /// Attach a component, migrating the entity to the matching archetype.
    ///
    /// Returns `Ok(false)` without mutating anything when the component is
    /// already present or the entity does not exist.
    pub fn add_component(&mut self, id: EntityId, component: Box<dyn Component>) -> EcsResult<bool> {
        let name = component.component_name();
        let tid = component_type_id(component.as_ref());
        let cid = self.registry.require_dyn(tid, name)?;

        let Some(entity) = self.entities.get(&id) else {
            tracing::warn!(entity = %id, component = name, "add component skipped: no such entity");
            return Ok(false);
        };
        if entity.components.contains_key(&tid) {
            tracing::warn!(entity = %id, component = name, "add component skipped: already present");
            return Ok(false);
        }
        let old_archetype = entity.archetype;

        let new_mask = self.store.archetype(old_archetype).mask().with(cid.index());
        let new_archetype = match self.store.get(&new_mask) {
            Some(existing) => existing,
            None => {
                let mut types = self.store.archetype(old_archetype).component_types().to_vec();
                types.push(cid);
                self.intern_archetype(new_mask, types)
            }
        };
        self.store.add_entity(new_archetype, id);
        self.store.remove_entity(old_archetype, id);

        let entity = self.entities.get_mut(&id).expect("entity existence checked above");
        entity.archetype = new_archetype;
        entity.components.insert(tid, component);
        Ok(true)
    }

    /// Detach a `T`, migrating the entity to the matching archetype.
    ///
    /// Returns the removed component, or `None` (without mutating anything)
    /// when it is absent or the entity does not exist.
    pub fn remove_component<T: Component>(&mut self, id: EntityId) -> EcsResult<Option<Box<dyn Component>>> {
        self.remove_component_dyn(id, TypeId::of::<T>(), std::any::type_name::<T>())
    }

    pub(crate) fn remove_component_dyn(
        &mut self,
        id: EntityId,
        tid: TypeId,
        name: &'static str,
    ) -> EcsResult<Option<Box<dyn Component>>> {
        let cid = self.registry.require_dyn(tid, name)?;

        let Some(entity) = self.entities.get(&id) else {
            tracing::warn!(entity = %id, component = name, "remove component skipped: no such entity");
            return Ok(None);
        };
        if !entity.components.contains_key(&tid) {
            tracing::warn!(entity = %id, component = name, "remove component skipped: not present");
            return Ok(None);
        }
        let old_archetype = entity.archetype;

        let new_mask = self.store.archetype(old_archetype).mask().without(cid.index());
        let new_archetype = match self.store.get(&new_mask) {
            Some(existing) => existing,
            None => {
                let types: Vec<_> = self
                    .store
                    .archetype(old_archetype)
                    .component_types()
                    .iter()
                    .copied()
                    .filter(|&t| t != cid)
                    .collect();
                self.intern_archetype(new_mask, types)
            }
        };
        self.store.add_entity(new_archetype, id);
        self.store.remove_entity(old_archetype, id);

        let entity = self.entities.get_mut(&id).expect("entity existence checked above");
        entity.archetype = new_archetype;
        Ok(entity.components.remove(&tid))
    }

    /// Tear an entity down: run component cleanup hooks, leave its archetype
    /// and drop it from the index. Missing entities warn and no-op.
    pub(crate) fn teardown(&mut self, id: EntityId) {
        let Some(mut entity) = self.entities.shift_remove(&id) else {
            tracing::warn!(entity = %id, "destroy entity skipped: no such entity");
            return;
        };
        for component in entity.components.values_mut() {
            component.cleanup();
        }
        self.store.remove_entity(entity.archetype, id);
        tracing::debug!(entity = %id, "entity destroyed");
    }

    /// Borrow an entity by index.
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Mutably borrow an entity by index.
    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub(crate) fn mark_destroying(&mut self, id: EntityId, time: LogicTime) {
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.destroy_time = Some(time);
        }
    }

    /// Iterate all live entities in creation order.
    pub fn all_entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Find the query for `filter`, creating and seeding it on first use.
    pub(crate) fn find_or_create_query(&mut self, filter: ComponentFilter) -> QueryId {
        self.queries.find_or_create(filter, &self.store)
    }

    /// Snapshot of the entities matching a query.
    pub fn query_entities(&self, id: QueryId) -> Vec<EntityId> {
        self.queries.get(id).entities(&self.store)
    }

    /// Whether any entity currently matches the query.
    pub fn query_has_matches(&self, id: QueryId) -> bool {
        !self.queries.get(id).is_empty(&self.store)
    }

    fn intern_archetype(
        &mut self,
        mask: ComponentMask,
        types: Vec<crate::component::ComponentTypeId>,
    ) -> ArchetypeId {
        let (id, created) = self.store.get_or_create(mask, types);
        if created {
            self.queries.on_new_archetype(self.store.archetype(id));
        }
        id
    }

    /// Drop all entities, archetypes, queries and factories. The component
    /// registry and the index counter survive, so indices are never reused
    /// even across a teardown.
    pub(crate) fn clear(&mut self) {
        self.entities.clear();
        self.store.clear();
        self.queries.clear();
        self.factories.clear();
    }
}

impl fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityManager")
            .field("entities", &self.entities.len())
            .field("archetypes", &self.store.len())
            .field("queries", &self.queries.len())
            .field("factories", &self.factories.len())
            .finish()
    }
}
