//! Property tests for structural invariants.
//!
//! Random sequences of entity and component operations, interleaved with
//! ticks, must keep every entity's archetype in sync with its component set
//! and keep query results consistent with storage.

use std::collections::HashSet;

use proptest::prelude::*;
use tempo_ecs::prelude::*;

struct Pos {
    x: i32,
}
impl Component for Pos {}

struct Vel {
    dx: i32,
}
impl Component for Vel {}

struct Tag;
impl Component for Tag {}

#[derive(Debug, Clone)]
enum WorldOp {
    CreatePlain,
    CreateMoving,
    AddVel(usize),
    RemoveVel(usize),
    AddTag(usize),
    Destroy(usize),
    Tick,
}

fn op_strategy() -> impl Strategy<Value = WorldOp> {
    prop_oneof![
        Just(WorldOp::CreatePlain),
        Just(WorldOp::CreateMoving),
        (0..64usize).prop_map(WorldOp::AddVel),
        (0..64usize).prop_map(WorldOp::RemoveVel),
        (0..64usize).prop_map(WorldOp::AddTag),
        (0..64usize).prop_map(WorldOp::Destroy),
        Just(WorldOp::Tick),
    ]
}

fn build_world() -> World {
    World::new(
        Registration::new()
            .component::<Pos>()
            .component::<Vel>()
            .component::<Tag>()
            .factory(1, || vec![Box::new(Pos { x: 0 }) as Box<dyn Component>])
            .factory(2, || {
                vec![
                    Box::new(Pos { x: 0 }) as Box<dyn Component>,
                    Box::new(Vel { dx: 1 }),
                ]
            }),
    )
    .expect("registration is valid")
}

/// Every live entity sits in exactly the archetype its component set keys,
/// and that archetype's member list knows it.
fn assert_storage_consistent(world: &World) {
    let entities = world.core().entities();
    let store = entities.store();
    for entity in world.all_entities() {
        let archetype = store.archetype(entity.archetype());
        assert_eq!(
            archetype.component_types().len(),
            entity.component_count(),
            "archetype arity diverged for {}",
            entity.id()
        );
        assert!(
            archetype.entities().contains(&entity.id()),
            "archetype member list lost {}",
            entity.id()
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn random_ops_preserve_archetype_invariants(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let mut world = build_world();
        let mut alive: Vec<EntityId> = Vec::new();
        let mut doomed: Vec<EntityId> = Vec::new();
        let mut clock: LogicTime = -1;

        for op in ops {
            match op {
                WorldOp::CreatePlain => {
                    alive.push(world.create_entity(1).expect("factory 1 registered"));
                }
                WorldOp::CreateMoving => {
                    alive.push(world.create_entity(2).expect("factory 2 registered"));
                }
                WorldOp::AddVel(pick) => {
                    if !alive.is_empty() {
                        let id = alive[pick % alive.len()];
                        let had = world.entity(id).is_some_and(|e| e.has::<Vel>());
                        let added = world.add_component(id, Vel { dx: 2 }).unwrap();
                        prop_assert_eq!(added, !had);
                    }
                }
                WorldOp::RemoveVel(pick) => {
                    if !alive.is_empty() {
                        let id = alive[pick % alive.len()];
                        let had = world.entity(id).is_some_and(|e| e.has::<Vel>());
                        let removed = world.remove_component::<Vel>(id).unwrap();
                        prop_assert_eq!(removed.is_some(), had);
                    }
                }
                WorldOp::AddTag(pick) => {
                    if !alive.is_empty() {
                        let id = alive[pick % alive.len()];
                        let _ = world.add_component(id, Tag).unwrap();
                    }
                }
                WorldOp::Destroy(pick) => {
                    if !alive.is_empty() {
                        let id = alive.remove(pick % alive.len());
                        world.request_destroy_entity(id);
                        // A second request must change nothing.
                        world.request_destroy_entity(id);
                        doomed.push(id);
                    }
                }
                WorldOp::Tick => {
                    clock += 33;
                    world.update(clock).unwrap();
                    for id in doomed.drain(..) {
                        prop_assert!(world.entity(id).is_none());
                    }
                }
            }

            prop_assert_eq!(world.all_entities().count(), alive.len() + doomed.len());
            for &id in &alive {
                prop_assert!(world.entity(id).is_some());
            }
            assert_storage_consistent(&world);
        }
    }

    /// The mask operations driving filter matching agree with plain set
    /// semantics for arbitrary index sets.
    #[test]
    fn mask_ops_match_set_semantics(
        a in prop::collection::hash_set(0..192usize, 0..16),
        b in prop::collection::hash_set(0..192usize, 0..16),
    ) {
        let mask_a = ComponentMask::from_indices(a.iter().copied());
        let mask_b = ComponentMask::from_indices(b.iter().copied());

        prop_assert_eq!(mask_a.is_superset(&mask_b), b.is_subset(&a));
        prop_assert_eq!(mask_a.intersects(&mask_b), !a.is_disjoint(&b));
        prop_assert_eq!(mask_a.count(), a.len());
        prop_assert_eq!(mask_a.is_empty(), a.is_empty());
        let collected: HashSet<usize> = mask_a.ones().collect();
        prop_assert_eq!(collected, a);
    }

    /// Adding then removing a component restores the original
    /// component-type set, whatever else happened in between.
    #[test]
    fn migration_round_trip_restores_type_set(extra in 0..8usize) {
        let mut world = build_world();
        let id = world.create_entity(1).unwrap();
        for _ in 0..extra {
            world.create_entity(2).unwrap();
        }

        let original = world.entity(id).unwrap().archetype();
        let types_before: Vec<ComponentTypeId> = world
            .core()
            .entities()
            .store()
            .archetype(original)
            .component_types()
            .to_vec();

        world.add_component(id, Vel { dx: 5 }).unwrap();
        world.remove_component::<Vel>(id).unwrap();

        let restored = world.entity(id).unwrap().archetype();
        let types_after: Vec<ComponentTypeId> = world
            .core()
            .entities()
            .store()
            .archetype(restored)
            .component_types()
            .to_vec();
        prop_assert_eq!(types_before, types_after);
    }
}
