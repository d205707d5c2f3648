//! Entity queries and their index.
//!
//! An [`EntityQuery`] binds one [`ComponentFilter`] to the list of archetypes
//! currently known to match it. The list grows as archetypes are created and
//! never shrinks. Queries with equal filters are deduplicated to one
//! instance, so systems sharing a filter share the incremental maintenance
//! work.

use crate::archetype::{Archetype, ArchetypeId, ArchetypeStore};
use crate::entity::EntityId;
use crate::filter::ComponentFilter;

/// Handle to a query owned by the [`QueryIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryId(pub(crate) u32);

/// One filter plus its growing list of matching archetypes.
#[derive(Debug)]
pub struct EntityQuery {
    filter: ComponentFilter,
    matching: Vec<ArchetypeId>,
}

impl EntityQuery {
    fn new(filter: ComponentFilter) -> Self {
        Self {
            filter,
            matching: Vec::new(),
        }
    }

    /// The filter this query was created with.
    pub fn filter(&self) -> &ComponentFilter {
        &self.filter
    }

    /// The archetypes known to match, in creation order.
    pub fn matching_archetypes(&self) -> &[ArchetypeId] {
        &self.matching
    }

    /// Whether no matching archetype currently holds an entity.
    pub fn is_empty(&self, store: &ArchetypeStore) -> bool {
        self.matching.iter().all(|&id| store.archetype(id).is_empty())
    }

    /// Total number of entities across matching archetypes.
    pub fn entity_count(&self, store: &ArchetypeStore) -> usize {
        self.matching.iter().map(|&id| store.archetype(id).len()).sum()
    }

    /// Snapshot of the matching entities.
    ///
    /// The returned list is detached from storage, so callers may mutate
    /// entities (including structurally) while iterating it.
    pub fn entities(&self, store: &ArchetypeStore) -> Vec<EntityId> {
        let mut result = Vec::new();
        for &id in &self.matching {
            result.extend_from_slice(store.archetype(id).entities());
        }
        result
    }

    fn try_add(&mut self, archetype: &Archetype) {
        if self.filter.matches(archetype) {
            self.matching.push(archetype.id());
        }
    }
}

/// Owns every live query and keeps them fed with new archetypes.
#[derive(Debug, Default)]
pub struct QueryIndex {
    queries: Vec<EntityQuery>,
}

impl QueryIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Find the query for `filter`, or create and seed one.
    ///
    /// The scan is linear: queries are few and created once at system init.
    pub(crate) fn find_or_create(
        &mut self,
        filter: ComponentFilter,
        store: &ArchetypeStore,
    ) -> QueryId {
        for (i, query) in self.queries.iter().enumerate() {
            if query.filter == filter {
                return QueryId(i as u32);
            }
        }
        let mut query = EntityQuery::new(filter);
        for archetype in store.iter() {
            query.try_add(archetype);
        }
        self.queries.push(query);
        QueryId(self.queries.len() as u32 - 1)
    }

    /// Offer a newly interned archetype to every live query.
    pub(crate) fn on_new_archetype(&mut self, archetype: &Archetype) {
        for query in &mut self.queries {
            query.try_add(archetype);
        }
    }

    /// The query behind `id`.
    pub fn get(&self, id: QueryId) -> &EntityQuery {
        &self.queries[id.0 as usize]
    }

    /// Number of live queries.
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    /// Whether no query has been created yet.
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.queries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitset::ComponentMask;
    use crate::component::{Component, ComponentRegistry, ComponentTypeId};
    use crate::filter::FilterSpec;

    struct A;
    impl Component for A {}
    struct B;
    impl Component for B {}

    fn setup() -> (ComponentRegistry, ArchetypeStore, QueryIndex) {
        let mut registry = ComponentRegistry::new();
        registry.register::<A>();
        registry.register::<B>();
        (registry, ArchetypeStore::new(), QueryIndex::new())
    }

    fn intern(
        store: &mut ArchetypeStore,
        queries: &mut QueryIndex,
        ids: &[ComponentTypeId],
    ) -> ArchetypeId {
        let mask = ComponentMask::from_indices(ids.iter().map(|id| id.index()));
        let (id, created) = store.get_or_create(mask, ids.to_vec());
        if created {
            queries.on_new_archetype(store.archetype(id));
        }
        id
    }

    #[test]
    fn equal_filters_deduplicate() {
        let (registry, store, mut queries) = setup();
        let first = queries.find_or_create(
            FilterSpec::new().require::<A>().compile(&registry).unwrap(),
            &store,
        );
        let second = queries.find_or_create(
            FilterSpec::new().require::<A>().compile(&registry).unwrap(),
            &store,
        );
        assert_eq!(first, second);
        assert_eq!(queries.len(), 1);
    }

    #[test]
    fn new_query_is_seeded_with_existing_archetypes() {
        let (registry, mut store, mut queries) = setup();
        let a = registry.lookup::<A>().unwrap();
        let b = registry.lookup::<B>().unwrap();
        let with_a = intern(&mut store, &mut queries, &[a]);
        let _without_a = intern(&mut store, &mut queries, &[b]);

        let query = queries.find_or_create(
            FilterSpec::new().require::<A>().compile(&registry).unwrap(),
            &store,
        );
        assert_eq!(queries.get(query).matching_archetypes(), &[with_a]);
    }

    #[test]
    fn queries_grow_with_new_archetypes() {
        let (registry, mut store, mut queries) = setup();
        let a = registry.lookup::<A>().unwrap();
        let b = registry.lookup::<B>().unwrap();

        let query = queries.find_or_create(
            FilterSpec::new().require::<A>().compile(&registry).unwrap(),
            &store,
        );
        assert!(queries.get(query).matching_archetypes().is_empty());

        let with_a = intern(&mut store, &mut queries, &[a]);
        let also_b = intern(&mut store, &mut queries, &[a, b]);
        let _only_b = intern(&mut store, &mut queries, &[b]);

        assert_eq!(
            queries.get(query).matching_archetypes(),
            &[with_a, also_b]
        );
    }

    #[test]
    fn entity_listing_flattens_matching_archetypes() {
        let (registry, mut store, mut queries) = setup();
        let a = registry.lookup::<A>().unwrap();
        let b = registry.lookup::<B>().unwrap();
        let first = intern(&mut store, &mut queries, &[a]);
        let second = intern(&mut store, &mut queries, &[a, b]);
        store.add_entity(first, EntityId(1));
        store.add_entity(second, EntityId(2));
        store.add_entity(first, EntityId(3));

        let query = queries.find_or_create(
            FilterSpec::new().require::<A>().compile(&registry).unwrap(),
            &store,
        );
        let listed = queries.get(query).entities(&store);
        assert_eq!(listed, vec![EntityId(1), EntityId(3), EntityId(2)]);
        assert_eq!(queries.get(query).entity_count(&store), 3);
        assert!(!queries.get(query).is_empty(&store));
    }
}
