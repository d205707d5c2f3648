//! The world: tick loop, logical clock and lifecycle.
//!
//! A [`World`] is built once from a [`Registration`] and then driven by
//! repeated calls to [`update`](World::update) with a strictly increasing
//! logical timestamp. Each tick runs the system schedule, drains the
//! entities whose destruction was requested since the last tick (in request
//! order), flushes world-scoped commands, and finally honors a deferred
//! close.
//!
//! The split between [`World`] and [`WorldCore`] mirrors who may touch what:
//! systems run *between* the two, so while the schedule executes they borrow
//! the core (entities, clock, destroy queue, world command buffer) but never
//! the schedule that is driving them.
//!
//! Everything here is single-threaded by design; "deferred" always means
//! ordered later in the same call stack of the current tick.

use std::any::Any;

use crate::command::{Command, CommandBuffer};
use crate::component::{Component, Destroying};
use crate::entity::{ComponentSetFn, Entity, EntityId, EntityManager};
use crate::registration::{Registration, SystemRecord};
use crate::schedule::{SystemKey, SystemManager};
use crate::system::System;
use crate::{EcsError, EcsResult, LogicTime};

const INIT_LOGIC_TIME: LogicTime = -1;

// ---------------------------------------------------------------------------
// WorldCore
// ---------------------------------------------------------------------------

/// Entity storage, logical clock, destroy queue and world command buffer.
///
/// This is the part of the world a running system can see and mutate.
pub struct WorldCore {
    entities: EntityManager,
    current_time: LogicTime,
    wait_destroy: Vec<EntityId>,
    commands: CommandBuffer,
    context: Option<Box<dyn Any>>,
    close_requested: bool,
}

impl WorldCore {
    pub(crate) fn new() -> Self {
        Self {
            entities: EntityManager::new(),
            current_time: INIT_LOGIC_TIME,
            wait_destroy: Vec::new(),
            commands: CommandBuffer::new(),
            context: None,
            close_requested: false,
        }
    }

    /// Current logical time. `-1` before the first tick.
    pub fn current_time(&self) -> LogicTime {
        self.current_time
    }

    pub(crate) fn set_time(&mut self, now: LogicTime) {
        self.current_time = now;
    }

    /// The entity manager, for reads (archetypes, queries, entity listing).
    pub fn entities(&self) -> &EntityManager {
        &self.entities
    }

    pub(crate) fn entities_mut(&mut self) -> &mut EntityManager {
        &mut self.entities
    }

    pub(crate) fn register_factory(&mut self, type_id: i32, build: ComponentSetFn) -> EcsResult<()> {
        self.entities.register_factory(type_id, build)
    }

    /// Create an entity from the factory registered for `type_id`.
    pub fn create_entity(&mut self, type_id: i32) -> EcsResult<EntityId> {
        self.entities.create_entity(type_id)
    }

    /// Attach a component to an entity, migrating its archetype.
    ///
    /// `Ok(false)` (logged, nothing mutated) when the component is already
    /// present or the entity does not exist.
    pub fn add_component<T: Component>(&mut self, id: EntityId, component: T) -> EcsResult<bool> {
        self.entities.add_component(id, Box::new(component))
    }

    /// Type-erased [`add_component`](Self::add_component).
    pub fn add_component_boxed(
        &mut self,
        id: EntityId,
        component: Box<dyn Component>,
    ) -> EcsResult<bool> {
        self.entities.add_component(id, component)
    }

    /// Detach a `T` from an entity, migrating its archetype.
    ///
    /// `Ok(None)` (logged, nothing mutated) when absent or the entity does
    /// not exist.
    pub fn remove_component<T: Component>(
        &mut self,
        id: EntityId,
    ) -> EcsResult<Option<Box<dyn Component>>> {
        self.entities.remove_component::<T>(id)
    }

    pub(crate) fn remove_component_dyn(
        &mut self,
        id: EntityId,
        type_id: std::any::TypeId,
        name: &'static str,
    ) -> EcsResult<Option<Box<dyn Component>>> {
        self.entities.remove_component_dyn(id, type_id, name)
    }

    /// Borrow an entity by id.
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.entity(id)
    }

    /// Mutably borrow an entity by id.
    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.entity_mut(id)
    }

    /// Borrow an entity by its raw index.
    pub fn get_entity(&self, index: u32) -> Option<&Entity> {
        self.entities.entity(EntityId(index))
    }

    /// Iterate all live entities in creation order.
    pub fn all_entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.all_entities()
    }

    /// Queue an entity for destruction at the end of the current tick.
    ///
    /// Idempotent: re-requesting a pending destruction is a logged no-op.
    /// The entity is stamped with its destroy time and tagged with the
    /// [`Destroying`] marker immediately, so systems matching the marker can
    /// react during the remainder of the tick; actual teardown happens at
    /// the tick's drain point, in request order.
    pub fn request_destroy_entity(&mut self, id: EntityId) {
        let Some(entity) = self.entities.entity(id) else {
            tracing::warn!(entity = %id, "destroy request skipped: no such entity");
            return;
        };
        if entity.is_destroying() {
            tracing::debug!(entity = %id, "destroy request skipped: already pending");
            return;
        }
        self.entities.mark_destroying(id, self.current_time);
        // The marker is registered at construction; failure is impossible,
        // but a duplicate marker would only warn inside add_component.
        if let Err(error) = self.add_component_boxed(id, Box::new(Destroying)) {
            tracing::warn!(entity = %id, %error, "failed to tag destroying entity");
        }
        self.wait_destroy.push(id);
    }

    /// Queue a world-scoped command; it flushes at the end of the tick,
    /// after deferred entity destruction.
    pub fn add_delay_command(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Ask the world to close at the end of the in-flight tick.
    pub fn request_close(&mut self) {
        self.close_requested = true;
    }

    /// Install an opaque user payload threaded through systems.
    pub fn set_context<T: 'static>(&mut self, context: T) {
        self.context = Some(Box::new(context));
    }

    /// Borrow the user payload, if one of type `T` is installed.
    pub fn context<T: 'static>(&self) -> Option<&T> {
        self.context.as_deref().and_then(|c| c.downcast_ref())
    }

    /// Mutably borrow the user payload.
    pub fn context_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.context.as_deref_mut().and_then(|c| c.downcast_mut())
    }

    /// Tear down every entity whose destruction is pending, in request
    /// order.
    pub(crate) fn drain_destroyed(&mut self) {
        if self.wait_destroy.is_empty() {
            return;
        }
        for id in std::mem::take(&mut self.wait_destroy) {
            self.entities.teardown(id);
        }
    }

    /// Apply world-scoped commands in FIFO order, including any enqueued
    /// while flushing.
    pub(crate) fn flush_world_commands(&mut self) -> EcsResult<()> {
        while let Some(command) = self.commands.pop() {
            command.execute(self)?;
        }
        Ok(())
    }

    pub(crate) fn take_close_request(&mut self) -> bool {
        std::mem::take(&mut self.close_requested)
    }

    /// Reset clock and indices. Entity indices are never reused, even
    /// across a teardown.
    pub(crate) fn reset(&mut self) {
        self.current_time = INIT_LOGIC_TIME;
        self.wait_destroy.clear();
        self.commands.clear();
        self.entities.clear();
    }
}

impl std::fmt::Debug for WorldCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldCore")
            .field("current_time", &self.current_time)
            .field("entities", &self.entities.entity_count())
            .field("wait_destroy", &self.wait_destroy.len())
            .field("queued_commands", &self.commands.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// Lifecycle phase of a [`World`]. `Destroyed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorldPhase {
    Init,
    WaitRunning,
    Running,
    WaitDestroy,
    Destroying,
    Destroyed,
}

/// The complete runtime: storage core plus the system schedule.
pub struct World {
    core: WorldCore,
    systems: SystemManager,
    phase: WorldPhase,
}

impl World {
    /// Build a world from its registration.
    ///
    /// Components are indexed in declaration order, factories installed,
    /// the system tree built and initialized, and every schedule pre-sorted
    /// so configuration errors surface here rather than on the first tick.
    pub fn new(registration: Registration) -> EcsResult<Self> {
        let Registration {
            components,
            systems,
            factories,
        } = registration;

        let mut core = WorldCore::new();
        for (type_id, name) in components {
            core.entities_mut().registry_mut().register_raw(type_id, name);
        }
        for (type_id, build) in factories {
            core.register_factory(type_id, build)?;
        }

        let mut manager = SystemManager::new();
        manager.install(systems, &mut core)?;

        Ok(Self {
            core,
            systems: manager,
            phase: WorldPhase::WaitRunning,
        })
    }

    /// Advance the world by one tick.
    ///
    /// `now` must be strictly greater than the current logical time; a
    /// non-increasing timestamp fails without mutating anything. Calls while
    /// the world is not ready (already closed, or mid-teardown) are logged
    /// and ignored.
    pub fn update(&mut self, now: LogicTime) -> EcsResult<()> {
        if now <= self.core.current_time() {
            return Err(EcsError::NonMonotonicTime {
                current: self.core.current_time(),
                requested: now,
            });
        }
        if self.phase != WorldPhase::WaitRunning {
            tracing::warn!(phase = ?self.phase, "world update ignored: not ready");
            return Ok(());
        }
        self.phase = WorldPhase::Running;
        self.core.set_time(now);
        self.systems.update(&mut self.core)?;
        self.core.drain_destroyed();
        self.core.flush_world_commands()?;
        if self.core.take_close_request() {
            self.phase = WorldPhase::WaitDestroy;
        }
        if self.phase == WorldPhase::WaitDestroy {
            self.teardown();
        } else {
            self.phase = WorldPhase::WaitRunning;
        }
        Ok(())
    }

    /// Close the world.
    ///
    /// Between ticks this tears down immediately; from inside a tick (via
    /// [`WorldCore::request_close`]) teardown waits for the tick to finish.
    /// Calling close again, or before the world ever ran, is a safe no-op.
    pub fn close(&mut self) {
        match self.phase {
            WorldPhase::Init | WorldPhase::Destroying | WorldPhase::Destroyed => {}
            WorldPhase::Running | WorldPhase::WaitDestroy => {
                self.phase = WorldPhase::WaitDestroy;
            }
            WorldPhase::WaitRunning => self.teardown(),
        }
    }

    fn teardown(&mut self) {
        tracing::info!(time = self.core.current_time(), "closing world");
        self.phase = WorldPhase::Destroying;
        self.systems.clean(&mut self.core);
        self.core.reset();
        self.phase = WorldPhase::Destroyed;
    }

    /// Whether the world has been torn down.
    pub fn is_closed(&self) -> bool {
        self.phase == WorldPhase::Destroyed
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> WorldPhase {
        self.phase
    }

    /// Current logical time.
    pub fn current_time(&self) -> LogicTime {
        self.core.current_time()
    }

    /// The storage core, for reads.
    pub fn core(&self) -> &WorldCore {
        &self.core
    }

    /// The storage core, for direct mutation between ticks.
    pub fn core_mut(&mut self) -> &mut WorldCore {
        &mut self.core
    }

    /// Create an entity from the factory registered for `type_id`.
    pub fn create_entity(&mut self, type_id: i32) -> EcsResult<EntityId> {
        self.core.create_entity(type_id)
    }

    /// Queue an entity for destruction at the end of the current tick.
    pub fn request_destroy_entity(&mut self, id: EntityId) {
        self.core.request_destroy_entity(id);
    }

    /// [`request_destroy_entity`](Self::request_destroy_entity) by raw
    /// index; unknown indices are a logged no-op.
    pub fn request_destroy_by_index(&mut self, index: u32) {
        self.core.request_destroy_entity(EntityId(index));
    }

    /// Borrow an entity by id.
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.core.entity(id)
    }

    /// Mutably borrow an entity by id.
    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.core.entity_mut(id)
    }

    /// Borrow an entity by its raw index.
    pub fn get_entity(&self, index: u32) -> Option<&Entity> {
        self.core.get_entity(index)
    }

    /// Iterate all live entities in creation order.
    pub fn all_entities(&self) -> impl Iterator<Item = &Entity> {
        self.core.all_entities()
    }

    /// Attach a component to an entity, migrating its archetype.
    pub fn add_component<T: Component>(&mut self, id: EntityId, component: T) -> EcsResult<bool> {
        self.core.add_component(id, component)
    }

    /// Detach a `T` from an entity, migrating its archetype.
    pub fn remove_component<T: Component>(
        &mut self,
        id: EntityId,
    ) -> EcsResult<Option<Box<dyn Component>>> {
        self.core.remove_component::<T>(id)
    }

    /// Queue a world-scoped command.
    pub fn add_delay_command(&mut self, command: Command) {
        self.core.add_delay_command(command);
    }

    /// Install an opaque user payload threaded through systems.
    pub fn set_context<T: 'static>(&mut self, context: T) {
        self.core.set_context(context);
    }

    /// Borrow the user payload, if one of type `T` is installed.
    pub fn context<T: 'static>(&self) -> Option<&T> {
        self.core.context()
    }

    /// Mutably borrow the user payload.
    pub fn context_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.core.context_mut()
    }

    /// Instantiate, initialize and schedule one system at runtime. The
    /// affected schedule re-sorts before its next run.
    pub fn add_system(&mut self, record: SystemRecord) -> EcsResult<()> {
        self.systems.add_system(record, &mut self.core)
    }

    /// Queue system `S` for removal at its scheduler's next boundary; it is
    /// removed from the schedule and destroyed there. Unknown systems are a
    /// logged no-op.
    pub fn request_remove_system<S: System>(&mut self) {
        self.systems.request_remove(SystemKey::of::<S>());
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("phase", &self.phase)
            .field("core", &self.core)
            .finish()
    }
}
