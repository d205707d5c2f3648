//! Systems and their lifecycle.
//!
//! A [`System`] is a unit of per-tick logic with lifecycle hooks; everything
//! the engine knows about it (phase, standalone flag, tick interval,
//! registered query, its command buffer) lives in the engine-owned
//! [`SystemMeta`], declared through a
//! [`SystemRecord`](crate::registration::SystemRecord) rather than carried by
//! the user type.
//!
//! Lifecycle: `Uninitialized -> Stopped <-> Started -> Destroyed`. Each tick
//! the gate in [`SystemEntry::try_update`] decides whether the system runs:
//! first the interval check, then standalone-or-matching-entities. Crossing
//! from Stopped to Started fires `on_start` once, the reverse fires
//! `on_stop`; the system's own command buffer flushes right after its
//! `update` returns, before the next system runs.
//!
//! A group is a system whose entry owns a nested scheduler. Its members run
//! inside the group's update window, and group-scoped commands from members
//! are forwarded to the group's buffer, flushing when the whole group
//! finishes.

use crate::command::{Command, CommandBuffer, CommandScope};
use crate::entity::{Entity, EntityId};
use crate::filter::FilterSpec;
use crate::query::QueryId;
use crate::schedule::{Scheduler, SortNode, SystemKey, SystemOrderCache};
use crate::world::WorldCore;
use crate::{EcsError, EcsResult, LogicTime};

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

/// Per-tick simulation logic.
///
/// All hooks are optional; a typical system registers its entity filter in
/// [`on_init`](Self::on_init) and does its work in [`update`](Self::update).
/// Group behavior types usually implement no hooks at all -- their members
/// run in their stead.
pub trait System: 'static {
    /// Runs once before the first tick. Register entity filters here.
    fn on_init(&mut self, _ctx: &mut SystemContext<'_>) -> EcsResult<()> {
        Ok(())
    }

    /// Runs on the Stopped to Started transition, possibly many times over
    /// the system's life.
    fn on_start(&mut self, _ctx: &mut SystemContext<'_>) {}

    /// The per-tick work. Runs while the system is Started.
    fn update(&mut self, _ctx: &mut SystemContext<'_>) -> EcsResult<()> {
        Ok(())
    }

    /// Runs on the Started to Stopped transition, possibly many times over
    /// the system's life.
    fn on_stop(&mut self, _ctx: &mut SystemContext<'_>) {}

    /// Runs exactly once when the system is destroyed.
    fn on_destroy(&mut self, _ctx: &mut SystemContext<'_>) {}
}

/// Lifecycle state of a system. `Destroyed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemPhase {
    Uninitialized,
    Stopped,
    Started,
    Destroyed,
}

// ---------------------------------------------------------------------------
// SystemMeta
// ---------------------------------------------------------------------------

/// Engine-owned state of one scheduled system.
pub(crate) struct SystemMeta {
    pub(crate) key: SystemKey,
    pub(crate) phase: SystemPhase,
    pub(crate) standalone: bool,
    pub(crate) tick_interval: LogicTime,
    pub(crate) next_update_time: LogicTime,
    pub(crate) before: Vec<SystemKey>,
    pub(crate) after: Vec<SystemKey>,
    pub(crate) query: Option<QueryId>,
    pub(crate) buffer: CommandBuffer,
    pub(crate) is_group: bool,
}

// ---------------------------------------------------------------------------
// SystemContext
// ---------------------------------------------------------------------------

/// What a system sees while one of its hooks runs.
///
/// Grants direct world access for reads and in-place component writes, the
/// system's matched entities, and scoped command submission for structural
/// changes that must wait for a flush boundary.
pub struct SystemContext<'a> {
    world: &'a mut WorldCore,
    meta: &'a mut SystemMeta,
    group_buffer: Option<&'a mut CommandBuffer>,
}

impl<'a> SystemContext<'a> {
    pub(crate) fn new(
        world: &'a mut WorldCore,
        meta: &'a mut SystemMeta,
        group_buffer: Option<&'a mut CommandBuffer>,
    ) -> Self {
        Self {
            world,
            meta,
            group_buffer,
        }
    }

    /// The world, for reads.
    pub fn world(&self) -> &WorldCore {
        self.world
    }

    /// The world, for direct mutation (component writes, entity creation,
    /// destroy requests). Structural container iteration stays safe because
    /// matched entities are handed out as snapshots.
    pub fn world_mut(&mut self) -> &mut WorldCore {
        self.world
    }

    /// Current logical time.
    pub fn time(&self) -> LogicTime {
        self.world.current_time()
    }

    /// Borrow an entity by id.
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.world.entity(id)
    }

    /// Mutably borrow an entity by id.
    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.world.entity_mut(id)
    }

    /// Register this system's entity filter.
    ///
    /// A system owns at most one filter for its lifetime. Re-registering an
    /// equal filter is a no-op; a different one is a configuration error.
    pub fn register_filter(&mut self, spec: &FilterSpec) -> EcsResult<()> {
        let filter = spec.compile(self.world.entities().registry())?;
        match self.meta.query {
            None => {
                self.meta.query = Some(self.world.entities_mut().find_or_create_query(filter));
                Ok(())
            }
            Some(existing) => {
                if self.world.entities().queries().get(existing).filter() == &filter {
                    Ok(())
                } else {
                    Err(EcsError::FilterAlreadyRegistered {
                        system: self.meta.key.name(),
                    })
                }
            }
        }
    }

    /// Snapshot of the entities matching this system's filter.
    ///
    /// Detached from storage, so structural mutation while iterating is
    /// safe. Empty when no filter is registered.
    pub fn matching_entities(&self) -> Vec<EntityId> {
        self.meta
            .query
            .map(|query| self.world.entities().query_entities(query))
            .unwrap_or_default()
    }

    /// Whether any entity currently matches this system's filter.
    pub fn has_matches(&self) -> bool {
        self.meta
            .query
            .is_some_and(|query| self.world.entities().query_has_matches(query))
    }

    /// Queue a deferred command at the given scope.
    ///
    /// `System` scope flushes right after this system's update; `SystemGroup`
    /// forwards to the immediately enclosing group (an error when there is
    /// none); `World` flushes at the end of the tick.
    pub fn add_delay_command(&mut self, command: Command, scope: CommandScope) -> EcsResult<()> {
        match scope {
            CommandScope::System => {
                self.meta.buffer.push(command);
                Ok(())
            }
            CommandScope::SystemGroup => {
                if self.meta.is_group {
                    self.meta.buffer.push(command);
                    Ok(())
                } else if let Some(buffer) = self.group_buffer.as_deref_mut() {
                    buffer.push(command);
                    Ok(())
                } else {
                    Err(EcsError::NoEnclosingGroup {
                        system: self.meta.key.name(),
                    })
                }
            }
            CommandScope::World => {
                self.world.add_delay_command(command);
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// SystemEntry
// ---------------------------------------------------------------------------

/// One scheduled system: its engine state, its behavior, and -- for groups --
/// the nested scheduler over its members.
pub(crate) struct SystemEntry {
    meta: SystemMeta,
    behavior: Box<dyn System>,
    nested: Option<Scheduler>,
}

impl SystemEntry {
    pub(crate) fn new(
        meta: SystemMeta,
        behavior: Box<dyn System>,
        nested: Option<Scheduler>,
    ) -> Self {
        Self {
            meta,
            behavior,
            nested,
        }
    }

    pub(crate) fn key(&self) -> SystemKey {
        self.meta.key
    }

    pub(crate) fn nested_mut(&mut self) -> Option<&mut Scheduler> {
        self.nested.as_mut()
    }

    /// Whether `key` is this entry or any system scheduled below it.
    pub(crate) fn subtree_contains(&self, key: SystemKey) -> bool {
        self.meta.key == key
            || self
                .nested
                .as_ref()
                .is_some_and(|nested| nested.subtree_contains(key))
    }

    pub(crate) fn sort_node(&self) -> SortNode {
        SortNode {
            key: self.meta.key,
            before: self.meta.before.clone(),
            after: self.meta.after.clone(),
        }
    }

    /// Run `on_init` and enter Stopped; groups then initialize their members
    /// and resolve the nested order.
    pub(crate) fn init(
        &mut self,
        world: &mut WorldCore,
        cache: &mut SystemOrderCache,
    ) -> EcsResult<()> {
        {
            let mut ctx = SystemContext::new(&mut *world, &mut self.meta, None);
            self.behavior.on_init(&mut ctx)?;
        }
        self.meta.phase = SystemPhase::Stopped;
        if let Some(nested) = &mut self.nested {
            nested.init_systems(world, cache)?;
        }
        Ok(())
    }

    /// The per-tick gate: interval check, then standalone-or-matching with
    /// the Started/Stopped edge transitions, then the update itself and the
    /// flush of this system's own commands.
    pub(crate) fn try_update(
        &mut self,
        world: &mut WorldCore,
        cache: &mut SystemOrderCache,
        mut group_buffer: Option<&mut CommandBuffer>,
    ) -> EcsResult<()> {
        match self.meta.phase {
            SystemPhase::Uninitialized => {
                return Err(EcsError::SystemNotInitialized {
                    system: self.meta.key.name(),
                })
            }
            SystemPhase::Destroyed => {
                return Err(EcsError::SystemDestroyed {
                    system: self.meta.key.name(),
                })
            }
            SystemPhase::Stopped | SystemPhase::Started => {}
        }
        if world.current_time() < self.meta.next_update_time {
            return Ok(());
        }

        let runnable = self.meta.standalone
            || self
                .meta
                .query
                .is_some_and(|query| world.entities().query_has_matches(query));
        if runnable {
            if self.meta.phase == SystemPhase::Stopped {
                self.meta.phase = SystemPhase::Started;
                let mut ctx =
                    SystemContext::new(&mut *world, &mut self.meta, group_buffer.as_deref_mut());
                self.behavior.on_start(&mut ctx);
            }
            if let Some(nested) = &mut self.nested {
                nested.run(world, cache, Some(&mut self.meta.buffer))?;
                nested.process_removals(world);
            } else {
                let mut ctx =
                    SystemContext::new(&mut *world, &mut self.meta, group_buffer.as_deref_mut());
                self.behavior.update(&mut ctx)?;
            }
            self.meta.buffer.flush(world)?;
        } else if self.meta.phase == SystemPhase::Started {
            self.meta.phase = SystemPhase::Stopped;
            let mut ctx =
                SystemContext::new(&mut *world, &mut self.meta, group_buffer.as_deref_mut());
            self.behavior.on_stop(&mut ctx);
        }
        self.meta.next_update_time = world.current_time() + self.meta.tick_interval;
        Ok(())
    }

    /// Stop if needed, run `on_destroy` once, drop pending commands and any
    /// nested members, and enter the terminal phase. Idempotent.
    pub(crate) fn destroy(&mut self, world: &mut WorldCore) {
        if self.meta.phase == SystemPhase::Destroyed {
            return;
        }
        if self.meta.phase == SystemPhase::Started {
            self.meta.phase = SystemPhase::Stopped;
            let mut ctx = SystemContext::new(&mut *world, &mut self.meta, None);
            self.behavior.on_stop(&mut ctx);
        }
        if self.meta.phase != SystemPhase::Uninitialized {
            let mut ctx = SystemContext::new(&mut *world, &mut self.meta, None);
            self.behavior.on_destroy(&mut ctx);
        }
        if let Some(nested) = &mut self.nested {
            nested.clean(world);
        }
        self.meta.buffer.clear();
        self.meta.phase = SystemPhase::Destroyed;
        tracing::debug!(system = self.meta.key.name(), "system destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;
    use crate::registration::SystemRecord;

    struct Marker;
    impl Component for Marker {}

    #[derive(Default)]
    struct Recorder;

    impl System for Recorder {
        fn on_init(&mut self, ctx: &mut SystemContext<'_>) -> EcsResult<()> {
            ctx.register_filter(&FilterSpec::new().require::<Marker>())
        }

        fn on_start(&mut self, ctx: &mut SystemContext<'_>) {
            push(ctx, "start");
        }

        fn update(&mut self, ctx: &mut SystemContext<'_>) -> EcsResult<()> {
            push(ctx, "update");
            Ok(())
        }

        fn on_stop(&mut self, ctx: &mut SystemContext<'_>) {
            push(ctx, "stop");
        }

        fn on_destroy(&mut self, ctx: &mut SystemContext<'_>) {
            push(ctx, "destroy");
        }
    }

    fn push(ctx: &mut SystemContext<'_>, label: &'static str) {
        ctx.world_mut()
            .context_mut::<Vec<&'static str>>()
            .expect("test context installed")
            .push(label);
    }

    fn world() -> WorldCore {
        let mut world = WorldCore::new();
        world.entities_mut().registry_mut().register::<Marker>();
        world
            .entities_mut()
            .register_factory(1, Box::new(|| vec![Box::new(Marker) as Box<dyn Component>]))
            .unwrap();
        world.set_context(Vec::<&'static str>::new());
        world
    }

    fn entry() -> SystemEntry {
        SystemRecord::new(Recorder::default).instantiate()
    }

    fn taken(world: &mut WorldCore) -> Vec<&'static str> {
        std::mem::take(world.context_mut::<Vec<&'static str>>().unwrap())
    }

    #[test]
    fn update_before_init_is_a_precondition_violation() {
        let mut world = world();
        let mut cache = SystemOrderCache::new();
        let mut entry = entry();
        assert!(matches!(
            entry.try_update(&mut world, &mut cache, None),
            Err(EcsError::SystemNotInitialized { .. })
        ));
    }

    #[test]
    fn start_and_stop_fire_on_match_transitions() {
        let mut world = world();
        let mut cache = SystemOrderCache::new();
        let mut entry = entry();
        entry.init(&mut world, &mut cache).unwrap();

        // No matching entity: stays Stopped, nothing fires.
        world.set_time(0);
        entry.try_update(&mut world, &mut cache, None).unwrap();
        assert!(taken(&mut world).is_empty());

        let id = world.create_entity(1).unwrap();
        world.set_time(1);
        entry.try_update(&mut world, &mut cache, None).unwrap();
        assert_eq!(taken(&mut world), vec!["start", "update"]);

        world.set_time(2);
        entry.try_update(&mut world, &mut cache, None).unwrap();
        assert_eq!(taken(&mut world), vec!["update"]);

        world.entities_mut().teardown(id);
        world.set_time(3);
        entry.try_update(&mut world, &mut cache, None).unwrap();
        assert_eq!(taken(&mut world), vec!["stop"]);
    }

    #[test]
    fn interval_gates_updates_until_eligible() {
        let mut world = world();
        let mut cache = SystemOrderCache::new();
        let mut entry = SystemRecord::new(Recorder::default)
            .standalone()
            .tick_interval(66)
            .instantiate();
        entry.init(&mut world, &mut cache).unwrap();

        world.set_time(0);
        entry.try_update(&mut world, &mut cache, None).unwrap();
        assert_eq!(taken(&mut world), vec!["start", "update"]);

        world.set_time(33);
        entry.try_update(&mut world, &mut cache, None).unwrap();
        assert!(taken(&mut world).is_empty());

        world.set_time(66);
        entry.try_update(&mut world, &mut cache, None).unwrap();
        assert_eq!(taken(&mut world), vec!["update"]);
    }

    #[test]
    fn destroy_stops_first_and_is_idempotent() {
        let mut world = world();
        let mut cache = SystemOrderCache::new();
        let mut entry = SystemRecord::new(Recorder::default).standalone().instantiate();
        entry.init(&mut world, &mut cache).unwrap();

        world.set_time(0);
        entry.try_update(&mut world, &mut cache, None).unwrap();
        taken(&mut world);

        entry.destroy(&mut world);
        assert_eq!(taken(&mut world), vec!["stop", "destroy"]);

        entry.destroy(&mut world);
        assert!(taken(&mut world).is_empty());

        assert!(matches!(
            entry.try_update(&mut world, &mut cache, None),
            Err(EcsError::SystemDestroyed { .. })
        ));
    }

    #[test]
    fn second_incompatible_filter_is_rejected() {
        struct Other;
        impl Component for Other {}

        let mut world = world();
        world.entities_mut().registry_mut().register::<Other>();
        let mut cache = SystemOrderCache::new();
        let mut entry = entry();
        entry.init(&mut world, &mut cache).unwrap();

        let mut meta_ctx = SystemContext::new(&mut world, &mut entry.meta, None);
        // Same filter again: fine.
        meta_ctx
            .register_filter(&FilterSpec::new().require::<Marker>())
            .unwrap();
        // A different one: configuration error.
        assert!(matches!(
            meta_ctx.register_filter(&FilterSpec::new().require::<Other>()),
            Err(EcsError::FilterAlreadyRegistered { .. })
        ));
    }
}
