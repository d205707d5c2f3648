//! Command scope integration tests: flush timing per scope, group
//! forwarding, and the defensive no-op behavior at flush time.

use tempo_ecs::prelude::*;

struct First;
impl Component for First {}

struct Second;
impl Component for Second {}

struct Third;
impl Component for Third {}

fn witness(ctx: &mut SystemContext<'_>, label: &'static str) {
    ctx.world_mut()
        .context_mut::<Vec<&'static str>>()
        .expect("test context installed")
        .push(label);
}

/// Requires `Third` and records every tick in which it ran.
struct ThirdWitness;
impl System for ThirdWitness {
    fn on_init(&mut self, ctx: &mut SystemContext<'_>) -> EcsResult<()> {
        ctx.register_filter(&FilterSpec::new().require::<Third>())
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) -> EcsResult<()> {
        witness(ctx, "third-seen");
        Ok(())
    }
}

/// Attaches `Third` to every `First` entity that lacks it, at a fixed scope.
struct AttachThird(CommandScope);
impl System for AttachThird {
    fn on_init(&mut self, ctx: &mut SystemContext<'_>) -> EcsResult<()> {
        ctx.register_filter(&FilterSpec::new().require::<First>().exclude::<Third>())
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) -> EcsResult<()> {
        let scope = self.0;
        for id in ctx.matching_entities() {
            ctx.add_delay_command(Command::add_component(id, Third), scope)?;
        }
        Ok(())
    }
}

fn registration() -> Registration {
    Registration::new()
        .component::<First>()
        .component::<Second>()
        .component::<Third>()
        .factory(1, || {
            vec![
                Box::new(First) as Box<dyn Component>,
                Box::new(Second),
            ]
        })
}

fn seen(world: &World) -> Vec<&'static str> {
    world
        .context::<Vec<&'static str>>()
        .cloned()
        .unwrap_or_default()
}

fn clear_seen(world: &mut World) {
    if let Some(log) = world.context_mut::<Vec<&'static str>>() {
        log.clear();
    }
}

#[test]
fn system_scope_is_visible_within_the_same_tick() {
    // AttachThird sorts before ThirdWitness by name, and its buffer flushes
    // right after its own update, so the witness runs in the same tick.
    let mut world = World::new(
        registration()
            .system(SystemRecord::new(|| AttachThird(CommandScope::System)))
            .system(SystemRecord::new(|| ThirdWitness)),
    )
    .unwrap();
    world.set_context(Vec::<&'static str>::new());
    let id = world.create_entity(1).unwrap();

    world.update(0).unwrap();
    assert!(world.entity(id).unwrap().has::<Third>());
    assert_eq!(seen(&world), vec!["third-seen"]);
}

#[test]
fn world_scope_is_not_visible_until_the_next_tick() {
    let mut world = World::new(
        registration()
            .system(SystemRecord::new(|| AttachThird(CommandScope::World)))
            .system(SystemRecord::new(|| ThirdWitness)),
    )
    .unwrap();
    world.set_context(Vec::<&'static str>::new());
    let id = world.create_entity(1).unwrap();

    world.update(0).unwrap();
    // The world flush already ran, so the component is on the entity, but
    // no system saw it this tick.
    assert!(world.entity(id).unwrap().has::<Third>());
    assert_eq!(seen(&world), Vec::<&str>::new());

    world.update(33).unwrap();
    assert_eq!(seen(&world), vec!["third-seen"]);
}

#[test]
fn group_scope_flushes_after_the_whole_group() {
    struct Logic;
    impl System for Logic {}

    /// Runs inside the group, after the attaching member.
    struct InsideWitness;
    impl System for InsideWitness {
        fn on_init(&mut self, ctx: &mut SystemContext<'_>) -> EcsResult<()> {
            ctx.register_filter(&FilterSpec::new().require::<Third>())
        }

        fn update(&mut self, ctx: &mut SystemContext<'_>) -> EcsResult<()> {
            witness(ctx, "inside");
            Ok(())
        }
    }

    /// Runs at the top level, after the group.
    struct OutsideWitness;
    impl System for OutsideWitness {
        fn on_init(&mut self, ctx: &mut SystemContext<'_>) -> EcsResult<()> {
            ctx.register_filter(&FilterSpec::new().require::<Third>())
        }

        fn update(&mut self, ctx: &mut SystemContext<'_>) -> EcsResult<()> {
            witness(ctx, "outside");
            Ok(())
        }
    }

    let mut world = World::new(
        registration()
            .system(SystemRecord::group(|| Logic))
            .system(
                SystemRecord::new(|| AttachThird(CommandScope::SystemGroup)).in_group::<Logic>(),
            )
            .system(
                SystemRecord::new(|| InsideWitness)
                    .in_group::<Logic>()
                    .after::<AttachThird>(),
            )
            .system(SystemRecord::new(|| OutsideWitness).after::<Logic>()),
    )
    .unwrap();
    world.set_context(Vec::<&'static str>::new());
    let id = world.create_entity(1).unwrap();

    world.update(0).unwrap();
    // The group buffer flushed between the group and the outside witness:
    // invisible inside the group this tick, visible right after it.
    assert!(world.entity(id).unwrap().has::<Third>());
    assert_eq!(seen(&world), vec!["outside"]);

    clear_seen(&mut world);
    world.update(33).unwrap();
    assert_eq!(seen(&world), vec!["inside", "outside"]);
}

#[test]
fn nested_group_commands_flush_with_inner_group() {
    struct Outer;
    impl System for Outer {}
    struct Inner;
    impl System for Inner {}

    /// Member of the outer group, scheduled after the inner group.
    struct OuterMember;
    impl System for OuterMember {
        fn on_init(&mut self, ctx: &mut SystemContext<'_>) -> EcsResult<()> {
            ctx.register_filter(&FilterSpec::new().require::<Third>())
        }

        fn update(&mut self, ctx: &mut SystemContext<'_>) -> EcsResult<()> {
            witness(ctx, "outer-member");
            Ok(())
        }
    }

    // The attaching system sits in the inner group; its group-scoped command
    // forwards to the *immediately enclosing* group, so it flushes when the
    // inner group finishes and the outer member sees it in the same tick.
    let mut world = World::new(
        registration()
            .system(SystemRecord::group(|| Outer))
            .system(SystemRecord::group(|| Inner).in_group::<Outer>())
            .system(
                SystemRecord::new(|| AttachThird(CommandScope::SystemGroup)).in_group::<Inner>(),
            )
            .system(SystemRecord::new(|| OuterMember).in_group::<Outer>().after::<Inner>()),
    )
    .unwrap();
    world.set_context(Vec::<&'static str>::new());
    let id = world.create_entity(1).unwrap();

    world.update(0).unwrap();
    assert!(world.entity(id).unwrap().has::<Third>());
    assert_eq!(seen(&world), vec!["outer-member"]);
}

#[test]
fn group_scope_outside_any_group_is_a_fatal_usage_error() {
    let mut world = World::new(
        registration().system(SystemRecord::new(|| AttachThird(CommandScope::SystemGroup))),
    )
    .unwrap();
    world.set_context(Vec::<&'static str>::new());
    world.create_entity(1).unwrap();

    assert!(matches!(
        world.update(0),
        Err(EcsError::NoEnclosingGroup { .. })
    ));
}

#[test]
fn create_entity_commands_run_their_callback() {
    struct Spawner;
    impl System for Spawner {
        fn on_init(&mut self, ctx: &mut SystemContext<'_>) -> EcsResult<()> {
            ctx.register_filter(&FilterSpec::new().require::<First>().exclude::<Third>())
        }

        fn update(&mut self, ctx: &mut SystemContext<'_>) -> EcsResult<()> {
            for id in ctx.matching_entities() {
                ctx.add_delay_command(Command::add_component(id, Third), CommandScope::System)?;
            }
            ctx.add_delay_command(
                Command::create_entity_with(1, |world, id| {
                    world.add_component_boxed(id, Box::new(Third)).unwrap();
                }),
                CommandScope::System,
            )
        }
    }

    let mut world = World::new(registration().system(SystemRecord::new(|| Spawner))).unwrap();
    world.set_context(Vec::<&'static str>::new());
    world.create_entity(1).unwrap();

    world.update(0).unwrap();
    // Original entity gained Third; the spawned one was born with it, so the
    // spawner goes quiet afterwards.
    assert_eq!(world.all_entities().count(), 2);
    assert!(world.all_entities().all(|e| e.has::<Third>()));

    world.update(33).unwrap();
    assert_eq!(world.all_entities().count(), 2);
}

#[test]
fn commands_against_entities_destroyed_mid_tick_are_noops() {
    /// Requests destruction, then queues component changes against the same
    /// entity at world scope; they flush after the destroy drain.
    struct DoomedWriter;
    impl System for DoomedWriter {
        fn on_init(&mut self, ctx: &mut SystemContext<'_>) -> EcsResult<()> {
            ctx.register_filter(&FilterSpec::new().require::<First>())
        }

        fn update(&mut self, ctx: &mut SystemContext<'_>) -> EcsResult<()> {
            for id in ctx.matching_entities() {
                ctx.world_mut().request_destroy_entity(id);
                ctx.add_delay_command(Command::add_component(id, Third), CommandScope::World)?;
                ctx.add_delay_command(Command::remove_component::<Second>(id), CommandScope::World)?;
                ctx.add_delay_command(Command::destroy_entity(id), CommandScope::World)?;
            }
            Ok(())
        }
    }

    let mut world = World::new(registration().system(SystemRecord::new(|| DoomedWriter))).unwrap();
    world.create_entity(1).unwrap();

    world.update(0).unwrap();
    assert_eq!(world.all_entities().count(), 0);

    // Nothing left to match; the next tick is quiet.
    world.update(33).unwrap();
    assert_eq!(world.all_entities().count(), 0);
}
