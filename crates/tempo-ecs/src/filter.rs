//! Component filters.
//!
//! A [`ComponentFilter`] is three disjoint bit-sets: `all` (the archetype
//! must contain every index), `any` (must intersect at least one, ignored
//! when empty) and `none` (must contain no index). Filters are described as
//! data through a [`FilterSpec`] and compiled against a
//! [`ComponentRegistry`]; compiling fails fast when one component is placed
//! in conflicting categories.

use std::any::TypeId;

use crate::archetype::Archetype;
use crate::bitset::ComponentMask;
use crate::component::{Component, ComponentRegistry};
use crate::{EcsError, EcsResult};

// ---------------------------------------------------------------------------
// FilterSpec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterMode {
    All,
    Any,
    None,
}

/// A data-only description of a filter, collected by component type.
#[derive(Default, Clone)]
pub struct FilterSpec {
    terms: Vec<(FilterMode, TypeId, &'static str)>,
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// The archetype must contain `T`.
    pub fn require<T: Component>(mut self) -> Self {
        self.terms
            .push((FilterMode::All, TypeId::of::<T>(), std::any::type_name::<T>()));
        self
    }

    /// The archetype must contain at least one of the `any_of` components.
    pub fn any_of<T: Component>(mut self) -> Self {
        self.terms
            .push((FilterMode::Any, TypeId::of::<T>(), std::any::type_name::<T>()));
        self
    }

    /// The archetype must not contain `T`.
    pub fn exclude<T: Component>(mut self) -> Self {
        self.terms
            .push((FilterMode::None, TypeId::of::<T>(), std::any::type_name::<T>()));
        self
    }

    /// Resolve the component types against `registry` and build the filter.
    ///
    /// Fails on unknown component types and on category conflicts: a
    /// component cannot be both required and excluded, or accepted-any and
    /// excluded.
    pub fn compile(&self, registry: &ComponentRegistry) -> EcsResult<ComponentFilter> {
        let mut filter = ComponentFilter::default();
        for &(mode, type_id, name) in &self.terms {
            let index = registry.require_dyn(type_id, name)?.index();
            match mode {
                FilterMode::All => {
                    if filter.none.contains(index) {
                        return Err(EcsError::FilterConflict {
                            component: name,
                            first: "all",
                            second: "none",
                        });
                    }
                    filter.all.set(index);
                }
                FilterMode::Any => {
                    if filter.none.contains(index) {
                        return Err(EcsError::FilterConflict {
                            component: name,
                            first: "any",
                            second: "none",
                        });
                    }
                    filter.any.set(index);
                }
                FilterMode::None => {
                    if filter.all.contains(index) {
                        return Err(EcsError::FilterConflict {
                            component: name,
                            first: "none",
                            second: "all",
                        });
                    }
                    if filter.any.contains(index) {
                        return Err(EcsError::FilterConflict {
                            component: name,
                            first: "none",
                            second: "any",
                        });
                    }
                    filter.none.set(index);
                }
            }
        }
        Ok(filter)
    }
}

// ---------------------------------------------------------------------------
// ComponentFilter
// ---------------------------------------------------------------------------

/// A compiled filter, matched against archetypes with pure bit-set tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ComponentFilter {
    all: ComponentMask,
    any: ComponentMask,
    none: ComponentMask,
}

impl ComponentFilter {
    /// Whether `archetype`'s composition satisfies this filter.
    pub fn matches(&self, archetype: &Archetype) -> bool {
        let mask = archetype.mask();
        if mask.intersects(&self.none) {
            return false;
        }
        if !mask.is_superset(&self.all) {
            return false;
        }
        if self.any.is_empty() {
            return true;
        }
        mask.intersects(&self.any)
    }
}
