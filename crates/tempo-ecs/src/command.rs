//! Deferred structural mutations.
//!
//! Systems must not reshape storage that another container is iterating, so
//! structural changes can be expressed as [`Command`]s and applied at a
//! well-defined boundary instead: after the issuing system, after the
//! enclosing group, or after the whole tick, depending on [`CommandScope`].
//! "Deferred" means ordered later in the same tick's call stack -- nothing is
//! asynchronous.
//!
//! Commands execute unconditionally in FIFO order within their buffer. A
//! command whose target entity was destroyed before the flush performs its
//! existence check and becomes a logged no-op; it never fails the tick.

use std::any::TypeId;
use std::collections::VecDeque;
use std::fmt;

use crate::component::Component;
use crate::entity::EntityId;
use crate::world::WorldCore;
use crate::EcsResult;

// ---------------------------------------------------------------------------
// CommandScope
// ---------------------------------------------------------------------------

/// The boundary at which a deferred command is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandScope {
    /// Flush right after the issuing system's update, before the next system.
    System,
    /// Flush after the issuing system's enclosing group finishes.
    SystemGroup,
    /// Flush once per tick, after all systems ran and destructions drained.
    World,
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// Callback invoked with the id of an entity created by a deferred command.
pub type OnCreated = Box<dyn FnOnce(&mut WorldCore, EntityId)>;

/// One deferred structural mutation.
pub enum Command {
    /// Attach a component to an entity.
    AddComponent {
        entity: EntityId,
        component: Box<dyn Component>,
    },
    /// Detach a component from an entity.
    RemoveComponent {
        entity: EntityId,
        component_type: TypeId,
        component_name: &'static str,
    },
    /// Create an entity from a registered factory.
    CreateEntity {
        factory_type: i32,
        on_created: Option<OnCreated>,
    },
    /// Request destruction of an entity (drained at the end of the tick).
    DestroyEntity { entity: EntityId },
}

impl Command {
    /// Deferred [`WorldCore::add_component`].
    pub fn add_component<T: Component>(entity: EntityId, component: T) -> Self {
        Self::AddComponent {
            entity,
            component: Box::new(component),
        }
    }

    /// Deferred [`WorldCore::remove_component`].
    pub fn remove_component<T: Component>(entity: EntityId) -> Self {
        Self::RemoveComponent {
            entity,
            component_type: TypeId::of::<T>(),
            component_name: std::any::type_name::<T>(),
        }
    }

    /// Deferred [`WorldCore::create_entity`].
    pub fn create_entity(factory_type: i32) -> Self {
        Self::CreateEntity {
            factory_type,
            on_created: None,
        }
    }

    /// Deferred entity creation with a success callback.
    pub fn create_entity_with(
        factory_type: i32,
        on_created: impl FnOnce(&mut WorldCore, EntityId) + 'static,
    ) -> Self {
        Self::CreateEntity {
            factory_type,
            on_created: Some(Box::new(on_created)),
        }
    }

    /// Deferred [`WorldCore::request_destroy_entity`].
    pub fn destroy_entity(entity: EntityId) -> Self {
        Self::DestroyEntity { entity }
    }

    pub(crate) fn execute(self, world: &mut WorldCore) -> EcsResult<()> {
        match self {
            Command::AddComponent { entity, component } => {
                if world.entity(entity).is_none() {
                    tracing::warn!(
                        entity = %entity,
                        component = component.component_name(),
                        "deferred add component skipped: entity gone"
                    );
                    return Ok(());
                }
                world.add_component_boxed(entity, component)?;
                Ok(())
            }
            Command::RemoveComponent {
                entity,
                component_type,
                component_name,
            } => {
                if world.entity(entity).is_none() {
                    tracing::warn!(
                        entity = %entity,
                        component = component_name,
                        "deferred remove component skipped: entity gone"
                    );
                    return Ok(());
                }
                world.remove_component_dyn(entity, component_type, component_name)?;
                Ok(())
            }
            Command::CreateEntity {
                factory_type,
                on_created,
            } => {
                let id = world.create_entity(factory_type)?;
                tracing::debug!(entity = %id, factory_type, "deferred entity creation applied");
                if let Some(callback) = on_created {
                    callback(world, id);
                }
                Ok(())
            }
            Command::DestroyEntity { entity } => {
                // request_destroy_entity owns the existence check and the
                // idempotence guarantee.
                world.request_destroy_entity(entity);
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::AddComponent { entity, component } => f
                .debug_struct("AddComponent")
                .field("entity", entity)
                .field("component", &component.component_name())
                .finish(),
            Command::RemoveComponent {
                entity,
                component_name,
                ..
            } => f
                .debug_struct("RemoveComponent")
                .field("entity", entity)
                .field("component", component_name)
                .finish(),
            Command::CreateEntity { factory_type, .. } => f
                .debug_struct("CreateEntity")
                .field("factory_type", factory_type)
                .finish(),
            Command::DestroyEntity { entity } => f
                .debug_struct("DestroyEntity")
                .field("entity", entity)
                .finish(),
        }
    }
}

// ---------------------------------------------------------------------------
// CommandBuffer
// ---------------------------------------------------------------------------

/// A FIFO queue of deferred commands.
#[derive(Default)]
pub struct CommandBuffer {
    queue: VecDeque<Command>,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command; it will run at this buffer's flush boundary.
    pub fn push(&mut self, command: Command) {
        self.queue.push_back(command);
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the buffer holds no commands.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub(crate) fn pop(&mut self) -> Option<Command> {
        self.queue.pop_front()
    }

    /// Apply all queued commands in FIFO order.
    pub(crate) fn flush(&mut self, world: &mut WorldCore) -> EcsResult<()> {
        while let Some(command) = self.queue.pop_front() {
            command.execute(world)?;
        }
        Ok(())
    }

    pub(crate) fn clear(&mut self) {
        self.queue.clear();
    }
}

impl fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("queued", &self.queue.len())
            .finish()
    }
}
