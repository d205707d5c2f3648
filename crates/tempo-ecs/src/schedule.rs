//! System ordering and scheduling.
//!
//! Execution order inside a scheduler is derived once per unique set of
//! system types: ordering edges (`before`/`after` declarations) are merged
//! into a directed graph and topologically sorted, with ties among runnable
//! nodes broken by ascending fully-qualified type name. The result is
//! memoized in a [`SystemOrderCache`] keyed by the name-sorted type set, so
//! schedulers with identical membership share one sort.
//!
//! A [`Scheduler`] holds live system entries in insertion order; adding or
//! removing an entry marks the resolved order stale, and the next run
//! re-resolves it through the cache before driving every entry once.

use std::any::TypeId;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::command::CommandBuffer;
use crate::registration::SystemRecord;
use crate::system::{System, SystemEntry};
use crate::world::WorldCore;
use crate::{EcsError, EcsResult};

// ---------------------------------------------------------------------------
// SystemKey
// ---------------------------------------------------------------------------

/// Identifies a system type.
///
/// Equality and hashing follow the Rust `TypeId`; the fully-qualified type
/// name is the lexicographic tie-break key during sorting.
#[derive(Clone, Copy, Eq)]
pub struct SystemKey {
    type_id: TypeId,
    name: &'static str,
}

impl SystemKey {
    /// The key of system type `S`.
    pub fn of<S: System>() -> Self {
        Self {
            type_id: TypeId::of::<S>(),
            name: std::any::type_name::<S>(),
        }
    }

    /// Fully-qualified name of the system type.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for SystemKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Hash for SystemKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl PartialOrd for SystemKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SystemKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.name
            .cmp(other.name)
            .then_with(|| self.type_id.cmp(&other.type_id))
    }
}

impl fmt::Debug for SystemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SystemKey({})", self.name)
    }
}

// ---------------------------------------------------------------------------
// Topological sort
// ---------------------------------------------------------------------------

/// One node of the ordering graph: a system type and its declared edges.
#[derive(Debug, Clone)]
pub(crate) struct SortNode {
    pub(crate) key: SystemKey,
    pub(crate) before: Vec<SystemKey>,
    pub(crate) after: Vec<SystemKey>,
}

/// Sort system types so every declared edge is satisfied.
///
/// Kahn's algorithm over the merged, deduplicated edge set; the ready queue
/// is a priority queue on the type name, so whenever several nodes are
/// runnable the lexicographically smallest name is emitted first. Self-edges
/// and edges leaving the node set fail fast; a cycle fails with its full
/// path.
pub(crate) fn sort_system_types(nodes: &[SortNode]) -> EcsResult<Vec<SystemKey>> {
    let n = nodes.len();
    let mut index_of: HashMap<SystemKey, usize> = HashMap::with_capacity(n);
    for (i, node) in nodes.iter().enumerate() {
        index_of.insert(node.key, i);
    }

    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut in_degree = vec![0usize; n];
    for (i, node) in nodes.iter().enumerate() {
        for target in &node.before {
            let j = resolve_edge(&index_of, node.key, *target)?;
            add_edge(&mut successors, &mut in_degree, i, j);
        }
        for source in &node.after {
            let j = resolve_edge(&index_of, node.key, *source)?;
            add_edge(&mut successors, &mut in_degree, j, i);
        }
    }

    let mut ready: BinaryHeap<Reverse<(&'static str, usize)>> = BinaryHeap::new();
    for (i, node) in nodes.iter().enumerate() {
        if in_degree[i] == 0 {
            ready.push(Reverse((node.key.name(), i)));
        }
    }

    let mut order = Vec::with_capacity(n);
    let mut emitted = vec![false; n];
    while let Some(Reverse((_, i))) = ready.pop() {
        if emitted[i] {
            continue;
        }
        emitted[i] = true;
        order.push(nodes[i].key);
        for &j in &successors[i] {
            in_degree[j] -= 1;
            if in_degree[j] == 0 && !emitted[j] {
                ready.push(Reverse((nodes[j].key.name(), j)));
            }
        }
    }

    if order.len() != n {
        return Err(EcsError::DependencyCycle {
            path: find_cycle(nodes, &successors),
        });
    }
    Ok(order)
}

fn resolve_edge(
    index_of: &HashMap<SystemKey, usize>,
    node: SystemKey,
    target: SystemKey,
) -> EcsResult<usize> {
    if target == node {
        return Err(EcsError::SelfOrdering {
            system: node.name(),
        });
    }
    index_of
        .get(&target)
        .copied()
        .ok_or(EcsError::OrderingOutsideGroup {
            system: node.name(),
            dependency: target.name(),
        })
}

fn add_edge(successors: &mut [Vec<usize>], in_degree: &mut [usize], from: usize, to: usize) {
    // Both edge directions can declare the same constraint; count it once.
    if !successors[from].contains(&to) {
        successors[from].push(to);
        in_degree[to] += 1;
    }
}

/// Locate one cycle and return its path, start node repeated at the end.
fn find_cycle(nodes: &[SortNode], successors: &[Vec<usize>]) -> Vec<&'static str> {
    fn dfs(
        current: usize,
        successors: &[Vec<usize>],
        visited: &mut [bool],
        in_stack: &mut [bool],
        path: &mut Vec<usize>,
    ) -> bool {
        visited[current] = true;
        in_stack[current] = true;
        path.push(current);
        for &next in &successors[current] {
            if !visited[next] {
                if dfs(next, successors, visited, in_stack, path) {
                    return true;
                }
            } else if in_stack[next] {
                if let Some(start) = path.iter().position(|&p| p == next) {
                    path.drain(..start);
                }
                path.push(next);
                return true;
            }
        }
        in_stack[current] = false;
        path.pop();
        false
    }

    let n = nodes.len();
    let mut visited = vec![false; n];
    let mut in_stack = vec![false; n];
    let mut path = Vec::new();
    for i in 0..n {
        if !visited[i] && dfs(i, successors, &mut visited, &mut in_stack, &mut path) {
            return path.into_iter().map(|i| nodes[i].key.name()).collect();
        }
    }
    Vec::new()
}

// ---------------------------------------------------------------------------
// SystemOrderCache
// ---------------------------------------------------------------------------

/// Memoizes sort results keyed by the name-sorted set of system types.
///
/// The key is order-independent, so schedulers whose membership happens to
/// match (a common case for groups instantiated per world region) reuse one
/// computed order.
#[derive(Default)]
pub(crate) struct SystemOrderCache {
    orders: HashMap<Vec<SystemKey>, Vec<SystemKey>>,
}

impl SystemOrderCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The resolved order for the given nodes, computed once per type set.
    pub(crate) fn order_for(&mut self, nodes: &[SortNode]) -> EcsResult<Vec<SystemKey>> {
        let mut key: Vec<SystemKey> = nodes.iter().map(|node| node.key).collect();
        key.sort();
        if let Some(order) = self.orders.get(&key) {
            return Ok(order.clone());
        }
        let order = sort_system_types(nodes)?;
        self.orders.insert(key, order.clone());
        Ok(order)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.orders.len()
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// A live, insertion-ordered set of system entries driven once per tick.
pub(crate) struct Scheduler {
    entries: Vec<SystemEntry>,
    pending_removal: Vec<SystemKey>,
    sorted: bool,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            pending_removal: Vec::new(),
            sorted: false,
        }
    }

    pub(crate) fn contains(&self, key: SystemKey) -> bool {
        self.entries.iter().any(|entry| entry.key() == key)
    }

    /// Whether `key` is scheduled here or in any nested group.
    pub(crate) fn subtree_contains(&self, key: SystemKey) -> bool {
        self.entries.iter().any(|entry| entry.subtree_contains(key))
    }

    /// Insert an entry, marking the resolved order stale.
    ///
    /// A duplicate system type warns and leaves the scheduler unchanged.
    pub(crate) fn add(&mut self, entry: SystemEntry) {
        if self.contains(entry.key()) {
            tracing::warn!(system = entry.key().name(), "add system skipped: already scheduled");
            return;
        }
        self.entries.push(entry);
        self.sorted = false;
    }

    /// Take an entry out, marking the resolved order stale.
    pub(crate) fn remove(&mut self, key: SystemKey) -> Option<SystemEntry> {
        let Some(pos) = self.entries.iter().position(|entry| entry.key() == key) else {
            tracing::warn!(system = key.name(), "remove system skipped: not scheduled");
            return None;
        };
        self.sorted = false;
        Some(self.entries.remove(pos))
    }

    /// Queue `key` for removal at this scheduler's next boundary.
    ///
    /// Searches this scheduler and every nested group; returns whether the
    /// system was found anywhere.
    pub(crate) fn request_remove(&mut self, key: SystemKey) -> bool {
        if self.contains(key) {
            self.pending_removal.push(key);
            return true;
        }
        let pos = self
            .entries
            .iter()
            .position(|entry| entry.subtree_contains(key));
        if let Some(pos) = pos {
            if let Some(nested) = self.entries[pos].nested_mut() {
                return nested.request_remove(key);
            }
        }
        false
    }

    /// The nested scheduler of the group `key`, searched recursively.
    pub(crate) fn find_scheduler_mut(&mut self, key: SystemKey) -> Option<&mut Scheduler> {
        let pos = self
            .entries
            .iter()
            .position(|entry| entry.key() == key || entry.subtree_contains(key))?;
        let entry = &mut self.entries[pos];
        if entry.key() == key {
            entry.nested_mut()
        } else {
            entry.nested_mut()?.find_scheduler_mut(key)
        }
    }

    /// Initialize every entry, then resolve the order. Used once at world
    /// construction so configuration errors surface before the first tick.
    pub(crate) fn init_systems(
        &mut self,
        world: &mut WorldCore,
        cache: &mut SystemOrderCache,
    ) -> EcsResult<()> {
        for entry in &mut self.entries {
            entry.init(world, cache)?;
        }
        self.ensure_sorted(cache)
    }

    /// Re-resolve the execution order if membership changed.
    pub(crate) fn ensure_sorted(&mut self, cache: &mut SystemOrderCache) -> EcsResult<()> {
        if self.sorted {
            return Ok(());
        }
        let nodes: Vec<SortNode> = self.entries.iter().map(SystemEntry::sort_node).collect();
        let order = cache.order_for(&nodes)?;
        for (target, key) in order.iter().enumerate() {
            let pos = self.entries[target..]
                .iter()
                .position(|entry| entry.key() == *key)
                .expect("sorter only emits keys it was given")
                + target;
            self.entries.swap(target, pos);
        }
        self.sorted = true;
        tracing::info!(
            order = ?self.entries.iter().map(|e| e.key().name()).collect::<Vec<_>>(),
            "system order resolved"
        );
        Ok(())
    }

    /// Drive every entry once, in the resolved order.
    ///
    /// `group_buffer` is the enclosing group's command buffer, if this
    /// scheduler is nested inside one; entries forward their group-scoped
    /// commands there.
    pub(crate) fn run(
        &mut self,
        world: &mut WorldCore,
        cache: &mut SystemOrderCache,
        mut group_buffer: Option<&mut CommandBuffer>,
    ) -> EcsResult<()> {
        self.ensure_sorted(cache)?;
        for entry in &mut self.entries {
            entry.try_update(world, cache, group_buffer.as_deref_mut())?;
        }
        Ok(())
    }

    /// Remove and destroy every system queued for removal.
    pub(crate) fn process_removals(&mut self, world: &mut WorldCore) {
        if self.pending_removal.is_empty() {
            return;
        }
        for key in std::mem::take(&mut self.pending_removal) {
            if let Some(mut entry) = self.remove(key) {
                entry.destroy(world);
                tracing::info!(system = key.name(), "system removed");
            }
        }
    }

    /// Destroy every entry and empty the scheduler.
    pub(crate) fn clean(&mut self, world: &mut WorldCore) {
        self.process_removals(world);
        for entry in &mut self.entries {
            entry.destroy(world);
        }
        self.entries.clear();
        self.sorted = true;
    }
}

// ---------------------------------------------------------------------------
// SystemManager
// ---------------------------------------------------------------------------

/// Owns the top-level scheduler and the order cache shared by every group.
pub(crate) struct SystemManager {
    scheduler: Scheduler,
    cache: SystemOrderCache,
}

impl SystemManager {
    pub(crate) fn new() -> Self {
        Self {
            scheduler: Scheduler::new(),
            cache: SystemOrderCache::new(),
        }
    }

    /// Build the system tree from records, initialize everything and resolve
    /// every order. Fails fast on unknown groups, filter conflicts and
    /// ordering errors.
    pub(crate) fn install(
        &mut self,
        records: Vec<SystemRecord>,
        world: &mut WorldCore,
    ) -> EcsResult<()> {
        let declared: HashSet<SystemKey> = records
            .iter()
            .filter(|record| record.is_group())
            .map(|record| record.key())
            .collect();

        let mut members: HashMap<SystemKey, Vec<SystemRecord>> = HashMap::new();
        let mut tops = Vec::new();
        for record in records {
            match record.group_key() {
                Some(group) => {
                    if !declared.contains(&group) {
                        return Err(EcsError::UnknownGroup {
                            system: record.key().name(),
                            group: group.name(),
                        });
                    }
                    members.entry(group).or_default().push(record);
                }
                None => tops.push(record),
            }
        }

        for record in tops {
            let entry = build_entry(record, &mut members);
            self.scheduler.add(entry);
        }
        // Leftover members mean their group is only reachable through itself.
        if let Some((group, children)) = members.iter().next() {
            return Err(EcsError::UnknownGroup {
                system: children[0].key().name(),
                group: group.name(),
            });
        }
        self.scheduler.init_systems(world, &mut self.cache)
    }

    /// One tick: run the top-level scheduler, then apply queued removals.
    pub(crate) fn update(&mut self, world: &mut WorldCore) -> EcsResult<()> {
        self.scheduler.run(world, &mut self.cache, None)?;
        self.scheduler.process_removals(world);
        Ok(())
    }

    /// Instantiate, initialize and schedule one system at runtime.
    pub(crate) fn add_system(
        &mut self,
        record: SystemRecord,
        world: &mut WorldCore,
    ) -> EcsResult<()> {
        let key = record.key();
        let target = match record.group_key() {
            None => &mut self.scheduler,
            Some(group) => {
                self.scheduler
                    .find_scheduler_mut(group)
                    .ok_or(EcsError::UnknownGroup {
                        system: key.name(),
                        group: group.name(),
                    })?
            }
        };
        if target.contains(key) {
            tracing::warn!(system = key.name(), "add system skipped: already scheduled");
            return Ok(());
        }
        let mut entry = record.instantiate();
        entry.init(world, &mut self.cache)?;
        target.add(entry);
        Ok(())
    }

    /// Queue a system for removal at its scheduler's next boundary.
    pub(crate) fn request_remove(&mut self, key: SystemKey) {
        if !self.scheduler.request_remove(key) {
            tracing::warn!(system = key.name(), "remove system skipped: not scheduled");
        }
    }

    /// Destroy every system, top level and nested.
    pub(crate) fn clean(&mut self, world: &mut WorldCore) {
        self.scheduler.clean(world);
    }
}

fn build_entry(
    record: SystemRecord,
    members: &mut HashMap<SystemKey, Vec<SystemRecord>>,
) -> SystemEntry {
    let key = record.key();
    let is_group = record.is_group();
    let mut entry = record.instantiate();
    if is_group {
        if let Some(children) = members.remove(&key) {
            let scheduler = entry
                .nested_mut()
                .expect("group entries own a nested scheduler");
            for child in children {
                let child_entry = build_entry(child, members);
                scheduler.add(child_entry);
            }
        }
    }
    entry
}
