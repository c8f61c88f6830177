//! Property tests for deferred mutation and family membership.
//!
//! These tests use `proptest` to generate random sequences of structural
//! operations and verify that masks, family rows and listener notifications
//! stay consistent across reconciliation passes.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use kestrel_ecs::prelude::*;
use proptest::prelude::*;

#[derive(Debug, Clone, PartialEq)]
struct A(u32);

#[derive(Debug, Clone, PartialEq)]
struct B(u32);

#[derive(Debug, Clone, PartialEq)]
struct C(u32);

fn setup_world() -> World {
    let mut registry = ComponentRegistry::new();
    registry.register::<A>("a");
    registry.register::<B>("b");
    registry.register::<C>("c");
    World::new(Arc::new(registry))
}

fn query(world: &World, with_b: bool) -> FamilyQuery {
    let builder = FamilyQuery::builder(world.registry()).require::<A>();
    let builder = if with_b { builder.require::<B>() } else { builder };
    builder.build().unwrap()
}

/// Operations we can perform on the world.
#[derive(Debug, Clone)]
enum Op {
    Create,
    Add(usize, u8),
    Remove(usize, u8),
    Replace(usize),
    Destroy(usize),
    Reconcile,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Create),
        (0..32usize, 0..3u8).prop_map(|(i, c)| Op::Add(i, c)),
        (0..32usize, 0..3u8).prop_map(|(i, c)| Op::Remove(i, c)),
        (0..32usize).prop_map(Op::Replace),
        (0..32usize).prop_map(Op::Destroy),
        Just(Op::Reconcile),
    ]
}

fn add(entity: &mut EntityMut<'_>, which: u8) {
    add_value(entity, which, 1);
}

fn add_value(entity: &mut EntityMut<'_>, which: u8, value: u32) {
    let _ = match which {
        0 => entity.add_component(A(value)).map(|_| ()),
        1 => entity.add_component(B(value)).map(|_| ()),
        _ => entity.add_component(C(value)).map(|_| ()),
    };
}

fn remove(entity: &mut EntityMut<'_>, which: u8) -> bool {
    match which {
        0 => entity.remove_component::<A>(),
        1 => entity.remove_component::<B>(),
        _ => entity.remove_component::<C>(),
    }
}

fn apply(world: &mut World, keys: &mut Vec<EntityKey>, op: &Op) {
    match *op {
        Op::Create => keys.push(world.create_entity().key()),
        Op::Add(i, c) if !keys.is_empty() => {
            if let Ok(mut e) = world.entity_mut_by_key(keys[i % keys.len()]) {
                add(&mut e, c);
            }
        }
        Op::Remove(i, c) if !keys.is_empty() => {
            if let Ok(mut e) = world.entity_mut_by_key(keys[i % keys.len()]) {
                remove(&mut e, c);
            }
        }
        Op::Replace(i) if !keys.is_empty() => {
            if let Ok(mut e) = world.entity_mut_by_key(keys[i % keys.len()]) {
                let _ = e.replace_component(A(2));
            }
        }
        Op::Destroy(i) if !keys.is_empty() => {
            let key = keys[i % keys.len()];
            if let Ok(e) = world.entity_mut_by_key(key) {
                e.destroy();
            }
        }
        Op::Reconcile => {
            world.reconcile();
        }
        _ => {}
    }
}

/// A row lookup agrees with a direct lookup whenever the component is
/// attached. Detached components may still resolve through the row.
fn row_agrees<T: Component + Clone + PartialEq + Debug>(item: &mut FamilyItem<'_>) -> bool {
    let via_row = item.get::<T>().cloned();
    let live = item.entity().try_get::<T>().cloned();
    live.is_none() || via_row == live
}

#[derive(Clone, Default)]
struct Transitions(Arc<Mutex<Vec<(char, EntityId)>>>);

impl FamilyListener for Transitions {
    fn on_entities_added(&mut self, entities: &[EntityId]) {
        let mut log = self.0.lock().unwrap();
        log.extend(entities.iter().map(|&e| ('+', e)));
    }

    fn on_entities_removed(&mut self, entities: &[EntityId]) {
        let mut log = self.0.lock().unwrap();
        log.extend(entities.iter().map(|&e| ('-', e)));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2_000))]

    /// After reconciliation every live entity is clean, its cached mask is
    /// the union of its live components, and each family holds exactly the
    /// entities whose mask matches.
    #[test]
    fn masks_and_rows_match_components(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let mut world = setup_world();
        let q = query(&world, false);
        let fam_a = world.bind_family(q);
        let q = query(&world, true);
        let fam_ab = world.bind_family(q);
        let id_a = world.registry().lookup::<A>().unwrap();
        let id_b = world.registry().lookup::<B>().unwrap();

        let mut keys = Vec::new();
        for op in &ops {
            apply(&mut world, &mut keys, op);
        }
        world.reconcile();

        let mut expect_a = BTreeSet::new();
        let mut expect_ab = BTreeSet::new();
        for id in world.entity_ids() {
            let e = world.entity(id).unwrap();
            prop_assert!(!e.is_dirty());
            let from_components = FamilyMask::from_ids(e.components().map(|(c, _)| c));
            prop_assert_eq!(e.mask(), from_components);
            if e.mask().contains(id_a) {
                expect_a.insert(e.key());
                if e.mask().contains(id_b) {
                    expect_ab.insert(e.key());
                }
            }
        }
        let rows_a: BTreeSet<EntityKey> = world.family(&fam_a).keys().iter().copied().collect();
        let rows_ab: BTreeSet<EntityKey> = world.family(&fam_ab).keys().iter().copied().collect();
        prop_assert_eq!(world.family(&fam_a).len(), rows_a.len());
        prop_assert_eq!(rows_a, expect_a);
        prop_assert_eq!(rows_ab, expect_ab);
    }

    /// Within one pass an entity is added to or removed from a family at
    /// most once, and only when its net membership changed.
    #[test]
    fn at_most_one_transition_per_pass(
        setup in prop::collection::vec(op_strategy(), 0..30),
        churn in prop::collection::vec(op_strategy(), 1..40),
    ) {
        let mut world = setup_world();
        let q = query(&world, true);
        let log = Transitions::default();
        let fam = world.bind_family_with(q, log.clone());

        let mut keys = Vec::new();
        for op in &setup {
            apply(&mut world, &mut keys, op);
        }
        world.reconcile();
        log.0.lock().unwrap().clear();
        let before: BTreeSet<EntityId> = world.family(&fam).ids().iter().copied().collect();

        for op in churn.iter().filter(|op| !matches!(op, Op::Reconcile)) {
            apply(&mut world, &mut keys, op);
        }
        world.reconcile();
        let after: BTreeSet<EntityId> = world.family(&fam).ids().iter().copied().collect();

        let events = log.0.lock().unwrap().clone();
        let mut per_entity: HashMap<EntityId, Vec<char>> = HashMap::new();
        for (kind, id) in events {
            per_entity.entry(id).or_default().push(kind);
        }
        for (id, kinds) in &per_entity {
            prop_assert_eq!(kinds.len(), 1, "{} flapped: {:?}", id, kinds);
            match kinds[0] {
                '+' => prop_assert!(!before.contains(id) && after.contains(id)),
                _ => prop_assert!(before.contains(id) && !after.contains(id)),
            }
        }
        let changed = before.symmetric_difference(&after).count();
        prop_assert_eq!(changed, per_entity.len());
    }

    /// Destroying an entity repeatedly ends in the same state as destroying
    /// it once, and never fails.
    #[test]
    fn destroy_is_idempotent(count in 1..20usize, victim in 0..20usize, repeats in 1..5usize) {
        let mut once = setup_world();
        let mut many = setup_world();
        let mut ids = Vec::new();
        for world in [&mut once, &mut many] {
            ids.clear();
            for i in 0..count {
                let mut e = world.create_entity();
                e.add_component(A(i as u32)).unwrap();
                ids.push(e.id());
            }
            world.reconcile();
        }
        let victim = ids[victim % ids.len()];

        once.destroy_entity(victim).unwrap();
        for _ in 0..repeats {
            prop_assert!(many.destroy_entity(victim).is_ok());
        }
        once.reconcile();
        many.reconcile();
        prop_assert!(many.destroy_entity(victim).is_ok());

        prop_assert_eq!(once.entity_ids(), many.entity_ids());
        prop_assert_eq!(once.entity_count(), count - 1);
        prop_assert!(!many.is_alive(victim));
    }

    /// Attaching then detaching a component restores the entity's mask and
    /// live component list.
    #[test]
    fn attach_detach_round_trip(initial in prop::collection::btree_set(0..3u8, 0..3), extra in 0..3u8) {
        prop_assume!(!initial.contains(&extra));
        let mut world = setup_world();
        let key = world.create_entity().key();
        {
            let mut e = world.entity_mut_by_key(key).unwrap();
            for &c in &initial {
                add(&mut e, c);
            }
        }
        world.reconcile();
        let snapshot = |world: &World| {
            let e = world.entity_by_key(key).unwrap();
            let ids: BTreeSet<ComponentTypeId> = e.components().map(|(c, _)| c).collect();
            (e.mask(), ids)
        };
        let before = snapshot(&world);

        {
            let mut e = world.entity_mut_by_key(key).unwrap();
            add(&mut e, extra);
            prop_assert!(remove(&mut e, extra));
        }
        let mid = world.entity_by_key(key).unwrap();
        let live: BTreeSet<ComponentTypeId> = mid.components().map(|(c, _)| c).collect();
        prop_assert_eq!(&live, &before.1);

        world.reconcile();
        prop_assert_eq!(snapshot(&world), before);
    }

    /// Rows seen at the start of a system's update keep their identity and
    /// position for the whole call, whatever the system enqueues.
    #[test]
    fn rows_are_stable_during_update(
        count in 1..40usize,
        edits in prop::collection::vec((0..40usize, 0..4u8), 0..40),
    ) {
        let mut world = setup_world();
        let q = query(&world, false);
        let fam = world.bind_family(q);
        for i in 0..count {
            world.create_entity().add_component(A(i as u32)).unwrap();
        }
        world.reconcile();

        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&failures);
        world
            .add_system(Timeline::FixedUpdate, "churn", move |ctx: &mut StepContext<'_>| {
                let start: Vec<EntityKey> = ctx.family(&fam).keys().to_vec();
                for &(row, action) in &edits {
                    let key = start[row % start.len()];
                    match action {
                        0 => {
                            ctx.create_entity().add_component(A(0)).unwrap();
                        }
                        1 => {
                            if let Ok(e) = ctx.entity_mut_by_key(key) {
                                e.destroy();
                            }
                        }
                        2 => {
                            if let Ok(mut e) = ctx.entity_mut_by_key(key) {
                                e.remove_component::<A>();
                            }
                        }
                        _ => {
                            if let Ok(mut e) = ctx.entity_mut_by_key(key) {
                                let _ = e.add_component(B(0));
                            }
                        }
                    }
                    if ctx.family(&fam).keys() != start.as_slice() {
                        sink.lock().unwrap().push(row);
                    }
                }
                let mut seen = Vec::new();
                ctx.for_each(&fam, |item| seen.push(item.key()));
                if seen != start {
                    sink.lock().unwrap().push(usize::MAX);
                }
            })
            .unwrap();
        world.step(Timeline::FixedUpdate, 0.1);

        prop_assert!(failures.lock().unwrap().is_empty());
    }

    /// Family rows resolve the attached value of every column after the
    /// entity detaches and re-attaches components within the same step,
    /// and writes through a row land on that value.
    #[test]
    fn rows_resolve_live_components_after_reattach(
        setup in prop::collection::vec(prop::collection::vec(0..3u8, 0..4), 1..12),
        edits in prop::collection::vec((0..12usize, 0..6u8), 0..30),
    ) {
        let mut world = setup_world();
        let q = FamilyQuery::builder(world.registry())
            .require::<A>()
            .optional::<B>()
            .optional::<C>()
            .build()
            .unwrap();
        let fam = world.bind_family(q);
        for order in &setup {
            let mut e = world.create_entity();
            add(&mut e, 0);
            for &c in order {
                add(&mut e, c);
            }
        }
        world.reconcile();

        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&failures);
        world
            .add_system(Timeline::FixedUpdate, "reattach", move |ctx: &mut StepContext<'_>| {
                let keys: Vec<EntityKey> = ctx.family(&fam).keys().to_vec();
                for (n, &(row, action)) in edits.iter().enumerate() {
                    let key = keys[row % keys.len()];
                    if let Ok(mut e) = ctx.entity_mut_by_key(key) {
                        if action < 3 {
                            add_value(&mut e, action, 100 + n as u32);
                        } else {
                            remove(&mut e, action - 3);
                        }
                    }
                }

                let parallel = ctx.par_map(&fam, |row| {
                    (row.get::<A>().cloned(), row.get::<B>().cloned(), row.get::<C>().cloned())
                });
                for (key, (a, b, c)) in keys.iter().zip(parallel) {
                    let e = ctx.entity_by_key(*key).unwrap();
                    let agrees = e.try_get::<A>().map_or(true, |v| a.as_ref() == Some(v))
                        && e.try_get::<B>().map_or(true, |v| b.as_ref() == Some(v))
                        && e.try_get::<C>().map_or(true, |v| c.as_ref() == Some(v));
                    if !agrees {
                        sink.lock().unwrap().push(format!("par_map {key:?}"));
                    }
                }

                ctx.for_each(&fam, |mut item| {
                    let mut ok = row_agrees::<A>(&mut item)
                        && row_agrees::<B>(&mut item)
                        && row_agrees::<C>(&mut item);
                    let live = item.entity().try_get::<B>().cloned();
                    if let Some(B(v)) = live {
                        if let Some(b) = item.get_mut::<B>() {
                            b.0 += 1000;
                        }
                        ok &= item.entity().try_get::<B>() == Some(&B(v + 1000));
                    }
                    if !ok {
                        sink.lock().unwrap().push(format!("for_each {:?}", item.key()));
                    }
                });
            })
            .unwrap();
        world.step(Timeline::FixedUpdate, 0.1);

        let failures = failures.lock().unwrap();
        prop_assert!(failures.is_empty(), "{:?}", *failures);
    }
}
