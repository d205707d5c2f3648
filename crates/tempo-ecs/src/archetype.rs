//! Archetype storage.
//!
//! An [`Archetype`] is the set of entities sharing an exact component-type
//! composition, keyed by the composition's [`ComponentMask`]. Exactly one
//! archetype exists per distinct mask; the [`ArchetypeStore`] interns them
//! and hands out [`ArchetypeId`]s.
//!
//! Index 0 is the reserved empty archetype: the empty mask maps to it, and it
//! can never hold entities. A live entity always belongs to an archetype
//! whose mask equals the mask of its current component set.

use std::collections::HashMap;

use crate::bitset::ComponentMask;
use crate::component::ComponentTypeId;
use crate::entity::EntityId;

/// Identifies an archetype within its store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArchetypeId(pub(crate) u32);

impl ArchetypeId {
    /// The reserved empty archetype.
    pub const EMPTY: ArchetypeId = ArchetypeId(0);
}

/// All entities sharing one exact component composition.
#[derive(Debug)]
pub struct Archetype {
    id: ArchetypeId,
    mask: ComponentMask,
    /// Sorted list of the component types this archetype represents.
    component_types: Vec<ComponentTypeId>,
    /// Live member entities, in insertion order.
    entities: Vec<EntityId>,
}

impl Archetype {
    fn new(id: ArchetypeId, mask: ComponentMask, mut component_types: Vec<ComponentTypeId>) -> Self {
        component_types.sort();
        component_types.dedup();
        Self {
            id,
            mask,
            component_types,
            entities: Vec::new(),
        }
    }

    /// This archetype's id.
    #[inline]
    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    /// The identity mask. Immutable once interned; only shared borrows are
    /// ever handed out.
    #[inline]
    pub fn mask(&self) -> &ComponentMask {
        &self.mask
    }

    /// The sorted component types this archetype represents.
    #[inline]
    pub fn component_types(&self) -> &[ComponentTypeId] {
        &self.component_types
    }

    /// Whether the archetype's composition includes `id`.
    pub fn has_component(&self, id: ComponentTypeId) -> bool {
        self.component_types.binary_search(&id).is_ok()
    }

    /// The member entities, in insertion order.
    #[inline]
    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    /// Number of member entities.
    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the archetype currently has no members.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Interns archetypes by mask and owns their member lists.
#[derive(Debug)]
pub struct ArchetypeStore {
    archetypes: Vec<Archetype>,
    by_mask: HashMap<ComponentMask, ArchetypeId>,
}

impl ArchetypeStore {
    pub(crate) fn new() -> Self {
        let empty = Archetype::new(ArchetypeId::EMPTY, ComponentMask::new(), Vec::new());
        let mut by_mask = HashMap::new();
        by_mask.insert(ComponentMask::new(), ArchetypeId::EMPTY);
        Self {
            archetypes: vec![empty],
            by_mask,
        }
    }

    /// Look up the archetype for an exact mask.
    pub fn get(&self, mask: &ComponentMask) -> Option<ArchetypeId> {
        self.by_mask.get(mask).copied()
    }

    /// Look up an existing archetype or intern a new one.
    ///
    /// Returns the id and whether a new archetype was created; the caller is
    /// responsible for offering a newly created archetype to live queries.
    pub(crate) fn get_or_create(
        &mut self,
        mask: ComponentMask,
        component_types: Vec<ComponentTypeId>,
    ) -> (ArchetypeId, bool) {
        if let Some(&id) = self.by_mask.get(&mask) {
            return (id, false);
        }
        let id = ArchetypeId(self.archetypes.len() as u32);
        self.by_mask.insert(mask.clone(), id);
        self.archetypes.push(Archetype::new(id, mask, component_types));
        (id, true)
    }

    /// The archetype behind `id`.
    pub fn archetype(&self, id: ArchetypeId) -> &Archetype {
        &self.archetypes[id.0 as usize]
    }

    /// Number of interned archetypes, the reserved empty one included.
    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    /// Always false: the reserved empty archetype exists from construction.
    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    /// Iterate all interned archetypes.
    pub fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter()
    }

    /// Add `entity` to the member list of `id`.
    ///
    /// # Panics
    ///
    /// Panics on the reserved empty archetype; a live entity can never have
    /// an empty composition.
    pub(crate) fn add_entity(&mut self, id: ArchetypeId, entity: EntityId) {
        assert!(
            id != ArchetypeId::EMPTY,
            "the reserved empty archetype cannot hold entities"
        );
        self.archetypes[id.0 as usize].entities.push(entity);
    }

    /// Remove `entity` from the member list of `id`.
    ///
    /// # Panics
    ///
    /// Panics on the reserved empty archetype.
    pub(crate) fn remove_entity(&mut self, id: ArchetypeId, entity: EntityId) {
        assert!(
            id != ArchetypeId::EMPTY,
            "the reserved empty archetype cannot hold entities"
        );
        let entities = &mut self.archetypes[id.0 as usize].entities;
        if let Some(pos) = entities.iter().position(|&e| e == entity) {
            entities.remove(pos);
        }
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::new();
    }
}
