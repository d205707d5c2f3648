//! Tempo ECS -- archetype-based Entity Component System runtime.
//!
//! Entities are plain component maps indexed by archetype (one archetype per
//! unique set of component types), systems run in a dependency-ordered,
//! deterministic schedule, and structural mutations can be deferred to
//! well-defined tick boundaries through scoped command buffers. One call to
//! [`World::update`](world::World::update) with a strictly increasing logical
//! timestamp advances the whole simulation by one tick.
//!
//! Everything a world contains is declared up front through a
//! [`Registration`](registration::Registration): the component types to
//! index, the system graph (ordering edges, grouping, tick intervals) and the
//! entity factories. The runtime never inspects type metadata beyond
//! `TypeId`; discovery of what to register is the caller's concern.
//!
//! # Quick Start
//!
//! ```
//! use tempo_ecs::prelude::*;
//!
//! struct Position { x: f32, y: f32 }
//! impl Component for Position {}
//!
//! struct Velocity { dx: f32, dy: f32 }
//! impl Component for Velocity {}
//!
//! struct Movement;
//! impl System for Movement {
//!     fn on_init(&mut self, ctx: &mut SystemContext<'_>) -> EcsResult<()> {
//!         ctx.register_filter(&FilterSpec::new().require::<Position>().require::<Velocity>())
//!     }
//!
//!     fn update(&mut self, ctx: &mut SystemContext<'_>) -> EcsResult<()> {
//!         for id in ctx.matching_entities() {
//!             if let Some(entity) = ctx.world_mut().entity_mut(id) {
//!                 let Some((dx, dy)) = entity.get::<Velocity>().map(|v| (v.dx, v.dy)) else {
//!                     continue;
//!                 };
//!                 if let Some(position) = entity.get_mut::<Position>() {
//!                     position.x += dx;
//!                     position.y += dy;
//!                 }
//!             }
//!         }
//!         Ok(())
//!     }
//! }
//!
//! let registration = Registration::new()
//!     .component::<Position>()
//!     .component::<Velocity>()
//!     .system(SystemRecord::new(|| Movement))
//!     .factory(1, || {
//!         vec![
//!             Box::new(Position { x: 0.0, y: 0.0 }) as Box<dyn Component>,
//!             Box::new(Velocity { dx: 1.0, dy: 0.0 }),
//!         ]
//!     });
//!
//! let mut world = World::new(registration)?;
//! let id = world.create_entity(1)?;
//! world.update(0)?;
//! world.update(33)?;
//!
//! let x = world.entity(id).and_then(|e| e.get::<Position>()).map(|p| p.x);
//! assert_eq!(x, Some(2.0));
//! # Ok::<(), tempo_ecs::EcsError>(())
//! ```

#![deny(unsafe_code)]

pub mod archetype;
pub mod bitset;
pub mod command;
pub mod component;
pub mod entity;
pub mod filter;
pub mod query;
pub mod registration;
pub mod schedule;
pub mod system;
pub mod world;

/// Logical clock value in simulation milliseconds.
///
/// The world starts at `-1`; every tick must carry a strictly greater value.
pub type LogicTime = i64;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by ECS operations.
///
/// Configuration and precondition violations surface as errors; the
/// recoverable cases (adding a component twice, destroying a gone entity and
/// the like) never do -- they log and leave state untouched.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// A component type was referenced that has not been registered.
    #[error("component type '{name}' is not registered")]
    UnknownComponent { name: &'static str },

    /// A filter placed one component in conflicting categories.
    #[error("component '{component}' cannot be in both '{first}' and '{second}' filter terms")]
    FilterConflict {
        component: &'static str,
        first: &'static str,
        second: &'static str,
    },

    /// No entity factory is registered for the requested type id.
    #[error("no entity factory registered for type id {type_id}")]
    UnknownFactory { type_id: i32 },

    /// The factory type id is reserved and cannot be registered.
    #[error("entity factory type id {type_id} is reserved")]
    InvalidFactory { type_id: i32 },

    /// An entity would have been created with no components at all.
    #[error("entity factory for type id {type_id} produced an empty component set")]
    EmptyComponentSet { type_id: i32 },

    /// A system declared an ordering edge against itself.
    #[error("system '{system}' orders itself relative to itself")]
    SelfOrdering { system: &'static str },

    /// A system declared an ordering edge against a type outside its group.
    #[error("system '{system}' orders against '{dependency}', but they are not in the same group")]
    OrderingOutsideGroup {
        system: &'static str,
        dependency: &'static str,
    },

    /// The ordering edges form a cycle; `path` walks it start to start.
    #[error("system ordering cycle: {}", .path.join(" -> "))]
    DependencyCycle { path: Vec<&'static str> },

    /// A system tried to register a second, different entity filter.
    #[error("system '{system}' already registered a different entity filter")]
    FilterAlreadyRegistered { system: &'static str },

    /// A group-scoped command was issued by a system outside any group.
    #[error("system '{system}' issued a group-scoped command outside any system group")]
    NoEnclosingGroup { system: &'static str },

    /// A system was driven before its init ran.
    #[error("system '{system}' cannot update before init")]
    SystemNotInitialized { system: &'static str },

    /// A lifecycle call reached a system that was already destroyed.
    #[error("system '{system}' was already destroyed")]
    SystemDestroyed { system: &'static str },

    /// A system record referenced a group that no record declares.
    #[error("system '{system}' belongs to group '{group}', which is not declared")]
    UnknownGroup {
        system: &'static str,
        group: &'static str,
    },

    /// The world clock only moves forward.
    #[error("world time must increase strictly: current {current}, requested {requested}")]
    NonMonotonicTime {
        current: LogicTime,
        requested: LogicTime,
    },
}

/// Shorthand result type for ECS operations.
pub type EcsResult<T> = Result<T, EcsError>;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::archetype::{Archetype, ArchetypeId};
    pub use crate::bitset::ComponentMask;
    pub use crate::command::{Command, CommandScope};
    pub use crate::component::{Component, ComponentRegistry, ComponentTypeId, Destroying};
    pub use crate::entity::{Entity, EntityId};
    pub use crate::filter::{ComponentFilter, FilterSpec};
    pub use crate::query::{EntityQuery, QueryId};
    pub use crate::registration::{Registration, SystemRecord};
    pub use crate::schedule::SystemKey;
    pub use crate::system::{System, SystemContext, SystemPhase};
    pub use crate::world::{World, WorldCore, WorldPhase};
    pub use crate::{EcsError, EcsResult, LogicTime};
}

// ---------------------------------------------------------------------------
// Integration tests
// ---------------------------------------------------------------------------
