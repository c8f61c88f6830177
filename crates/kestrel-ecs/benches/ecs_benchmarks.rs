//! Family iteration and reconciliation benchmarks.
//!
//! - **Iteration:** a movement system over 1K / 10K entities through
//!   `StepContext::for_each` and `StepContext::par_map`.
//! - **Reconciliation:** spawning a batch, churning one component on 10% of
//!   the entities, and destroying a batch.
//!
//! Run with: `cargo bench --bench ecs_benchmarks`

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use kestrel_ecs::prelude::*;

// ---------------------------------------------------------------------------
// Benchmark component types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
struct Position {
    x: f64,
    y: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct Velocity {
    dx: f64,
    dy: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct Health(u32);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn registry() -> Arc<ComponentRegistry> {
    let mut registry = ComponentRegistry::new();
    registry.register::<Position>("position");
    registry.register::<Velocity>("velocity");
    registry.register::<Health>("health");
    Arc::new(registry)
}

fn movers(world: &World) -> FamilyQuery {
    FamilyQuery::builder(world.registry())
        .require::<Position>()
        .require::<Velocity>()
        .build()
        .expect("registered components")
}

/// A reconciled world with `entity_count` moving entities.
fn setup_world(entity_count: usize) -> (World, FamilyBinding, Vec<EntityId>) {
    let mut world = World::new(registry());
    let query = movers(&world);
    let binding = world.bind_family(query);
    let ids = spawn_batch(&mut world, entity_count);
    world.reconcile();
    (world, binding, ids)
}

fn spawn_batch(world: &mut World, count: usize) -> Vec<EntityId> {
    (0..count)
        .map(|i| {
            let mut e = world.create_entity();
            e.add_component(Position {
                x: i as f64,
                y: 0.0,
            })
            .expect("position");
            e.add_component(Velocity { dx: 1.0, dy: 0.5 })
                .expect("velocity");
            e.id()
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_for_each(c: &mut Criterion) {
    let mut group = c.benchmark_group("family_for_each");
    for count in [1_000usize, 10_000] {
        let (mut world, binding, _) = setup_world(count);
        world
            .add_system(Timeline::FixedUpdate, "move", move |ctx: &mut StepContext<'_>| {
                let dt = ctx.dt();
                ctx.for_each(&binding, |mut item| {
                    let Some(vel) = item.get::<Velocity>().cloned() else {
                        return;
                    };
                    if let Some(pos) = item.get_mut::<Position>() {
                        pos.x += vel.dx * dt;
                        pos.y += vel.dy * dt;
                    }
                });
            })
            .expect("system registration");

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| black_box(world.step(Timeline::FixedUpdate, 1.0 / 60.0)));
        });
    }
    group.finish();
}

fn bench_par_map(c: &mut Criterion) {
    let mut group = c.benchmark_group("family_par_map");
    for count in [1_000usize, 10_000] {
        let (mut world, binding, _) = setup_world(count);
        world
            .add_system(Timeline::Render, "speeds", move |ctx: &mut StepContext<'_>| {
                let speeds = ctx.par_map(&binding, |row| {
                    row.get::<Velocity>()
                        .map(|v| (v.dx * v.dx + v.dy * v.dy).sqrt())
                        .unwrap_or(0.0)
                });
                black_box(speeds);
            })
            .expect("system registration");

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| black_box(world.step(Timeline::Render, 1.0 / 60.0)));
        });
    }
    group.finish();
}

fn bench_reconcile(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile");

    group.bench_function("spawn_1k", |b| {
        b.iter_with_setup(
            || setup_world(0).0,
            |mut world| {
                spawn_batch(&mut world, 1_000);
                black_box(world.reconcile())
            },
        );
    });

    group.bench_function("churn_10pct_of_10k", |b| {
        let (mut world, _, ids) = setup_world(10_000);
        b.iter(|| {
            for id in ids.iter().step_by(10) {
                let mut e = world.entity_mut(*id).expect("alive");
                if !e.remove_component::<Health>() {
                    e.add_component(Health(100)).expect("health");
                }
            }
            black_box(world.reconcile())
        });
    });

    group.bench_function("destroy_1k", |b| {
        b.iter_with_setup(
            || setup_world(1_000),
            |(mut world, _, ids)| {
                for id in ids {
                    world.destroy_entity(id).expect("issued id");
                }
                black_box(world.reconcile())
            },
        );
    });

    group.finish();
}

criterion_group!(benches, bench_for_each, bench_par_map, bench_reconcile);
criterion_main!(benches);
