//! Up-front world configuration.
//!
//! A [`Registration`] carries the three data tables a [`World`] is built
//! from: the component types to index (in encounter order), the system graph
//! and the entity-factory table. The records are plain data -- how they were
//! discovered (hand-written, code-generated, loaded from a manifest) is the
//! caller's concern.
//!
//! [`World`]: crate::world::World

use std::any::TypeId;

use crate::command::CommandBuffer;
use crate::component::Component;
use crate::entity::ComponentSetFn;
use crate::schedule::{Scheduler, SystemKey};
use crate::system::{System, SystemEntry, SystemMeta, SystemPhase};
use crate::LogicTime;

// ---------------------------------------------------------------------------
// SystemRecord
// ---------------------------------------------------------------------------

/// Declares one system type: its constructor, ordering edges, grouping and
/// update cadence.
///
/// Ordering edges reference other system types in the same scheduler;
/// `before` and `after` express the same relation from either end and are
/// merged when the schedule is sorted.
pub struct SystemRecord {
    key: SystemKey,
    group: Option<SystemKey>,
    before: Vec<SystemKey>,
    after: Vec<SystemKey>,
    standalone: bool,
    tick_interval: LogicTime,
    is_group: bool,
    construct: Box<dyn Fn() -> Box<dyn System>>,
}

impl SystemRecord {
    /// Declare a system with its constructor.
    pub fn new<S: System>(construct: impl Fn() -> S + 'static) -> Self {
        Self {
            key: SystemKey::of::<S>(),
            group: None,
            before: Vec::new(),
            after: Vec::new(),
            standalone: false,
            tick_interval: 0,
            is_group: false,
            construct: Box::new(move || Box::new(construct())),
        }
    }

    /// Declare a system group. Groups are always standalone and own a nested
    /// scheduler over the systems declared [`in_group`](Self::in_group) of
    /// them.
    pub fn group<G: System>(construct: impl Fn() -> G + 'static) -> Self {
        let mut record = Self::new(construct);
        record.is_group = true;
        record.standalone = true;
        record
    }

    /// This system must run before `T`.
    pub fn before<T: System>(mut self) -> Self {
        self.before.push(SystemKey::of::<T>());
        self
    }

    /// This system must run after `T`.
    pub fn after<T: System>(mut self) -> Self {
        self.after.push(SystemKey::of::<T>());
        self
    }

    /// Run every eligible tick even when no entity matches the filter.
    pub fn standalone(mut self) -> Self {
        self.standalone = true;
        self
    }

    /// Minimum logical time between updates; `0` runs every tick.
    pub fn tick_interval(mut self, interval: LogicTime) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Schedule this system inside the group `G` instead of at the top level.
    pub fn in_group<G: System>(mut self) -> Self {
        self.group = Some(SystemKey::of::<G>());
        self
    }

    /// The system type this record declares.
    pub fn key(&self) -> SystemKey {
        self.key
    }

    /// The enclosing group, if any.
    pub fn group_key(&self) -> Option<SystemKey> {
        self.group
    }

    /// Whether this record declares a group.
    pub fn is_group(&self) -> bool {
        self.is_group
    }

    /// Construct the live scheduler entry for this record.
    pub(crate) fn instantiate(self) -> SystemEntry {
        let meta = SystemMeta {
            key: self.key,
            phase: SystemPhase::Uninitialized,
            standalone: self.standalone,
            tick_interval: self.tick_interval,
            next_update_time: LogicTime::MIN,
            before: self.before,
            after: self.after,
            query: None,
            buffer: CommandBuffer::new(),
            is_group: self.is_group,
        };
        let nested = self.is_group.then(Scheduler::new);
        SystemEntry::new(meta, (self.construct)(), nested)
    }
}

impl std::fmt::Debug for SystemRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemRecord")
            .field("key", &self.key)
            .field("group", &self.group)
            .field("before", &self.before)
            .field("after", &self.after)
            .field("standalone", &self.standalone)
            .field("tick_interval", &self.tick_interval)
            .field("is_group", &self.is_group)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// The full configuration a world is built from.
#[derive(Default)]
pub struct Registration {
    pub(crate) components: Vec<(TypeId, &'static str)>,
    pub(crate) systems: Vec<SystemRecord>,
    pub(crate) factories: Vec<(i32, ComponentSetFn)>,
}

impl Registration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a component type. Indices are assigned in declaration order;
    /// re-declaring a type keeps its first index.
    pub fn component<T: Component>(mut self) -> Self {
        self.components
            .push((TypeId::of::<T>(), std::any::type_name::<T>()));
        self
    }

    /// Declare a system (or group) record.
    pub fn system(mut self, record: SystemRecord) -> Self {
        self.systems.push(record);
        self
    }

    /// Register the initial component set built for entities of `type_id`.
    pub fn factory(
        mut self,
        type_id: i32,
        build: impl Fn() -> Vec<Box<dyn Component>> + 'static,
    ) -> Self {
        self.factories.push((type_id, Box::new(build)));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Alpha;
    impl System for Alpha {}

    struct Beta;
    impl System for Beta {}

    struct Logic;
    impl System for Logic {}

    #[test]
    fn record_collects_edges_and_flags() {
        let record = SystemRecord::new(|| Alpha)
            .before::<Beta>()
            .after::<Logic>()
            .standalone()
            .tick_interval(50)
            .in_group::<Logic>();

        assert_eq!(record.key(), SystemKey::of::<Alpha>());
        assert_eq!(record.group_key(), Some(SystemKey::of::<Logic>()));
        assert!(!record.is_group());

        let entry = record.instantiate();
        assert_eq!(entry.key(), SystemKey::of::<Alpha>());
    }

    #[test]
    fn group_records_are_standalone_with_nested_scheduler() {
        let record = SystemRecord::group(|| Logic);
        assert!(record.is_group());

        let mut entry = record.instantiate();
        assert!(entry.nested_mut().is_some());
    }

    #[test]
    fn plain_records_have_no_nested_scheduler() {
        let mut entry = SystemRecord::new(|| Alpha).instantiate();
        assert!(entry.nested_mut().is_none());
    }
}
