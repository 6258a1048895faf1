//! Per-entity container microbenchmarks using Criterion.
//!
//! These benchmarks compare [`AvlContainer`] against [`HashContainer`] on the operations the
//! spec calls out as the hot path: single/multi-component `add`, `get`, and `remove`, plus an
//! entity carrying many small component types (to show how each container's insertion cost
//! scales with component count per entity).

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rusty_ecs::{AvlContainer, Entity, HashContainer};
use rusty_ecs_bench::components::*;

// =============================================================================
// Entity construction + single/multi-component add
// =============================================================================

fn bench_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("add");

    for count in [100, 1_000, 10_000] {
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("avl/single_component", count), &count, |b, &n| {
            b.iter(|| {
                for _ in 0..n {
                    let mut entity: Entity<AvlContainer> = Entity::make_entity();
                    black_box(entity.add(Position::default()).unwrap());
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("hash/single_component", count), &count, |b, &n| {
            b.iter(|| {
                for _ in 0..n {
                    let mut entity: Entity<HashContainer> = Entity::make_entity();
                    black_box(entity.add(Position::default()).unwrap());
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("avl/four_components", count), &count, |b, &n| {
            b.iter(|| {
                for _ in 0..n {
                    let mut entity: Entity<AvlContainer> = Entity::make_entity();
                    black_box(
                        entity
                            .add((
                                Transform::default(),
                                Position::default(),
                                Velocity::default(),
                                Health::default(),
                            ))
                            .unwrap(),
                    );
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("hash/four_components", count), &count, |b, &n| {
            b.iter(|| {
                for _ in 0..n {
                    let mut entity: Entity<HashContainer> = Entity::make_entity();
                    black_box(
                        entity
                            .add((
                                Transform::default(),
                                Position::default(),
                                Velocity::default(),
                                Health::default(),
                            ))
                            .unwrap(),
                    );
                }
            });
        });
    }

    group.finish();
}

// =============================================================================
// Lookup benchmarks
// =============================================================================

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");

    for count in [1_000, 10_000, 100_000] {
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("avl/pos_vel", count), &count, |b, &n| {
            let mut entities: Vec<Entity<AvlContainer>> = (0..n)
                .map(|i| {
                    let mut e = Entity::make_entity();
                    e.add((
                        Position { x: i as f32, y: 0.0, z: 0.0 },
                        Velocity { x: 1.0, y: 0.0, z: 0.0 },
                    ))
                    .unwrap();
                    e
                })
                .collect();

            b.iter(|| {
                for entity in entities.iter_mut() {
                    let (pos, vel) = entity.get_mut::<(Position, Velocity)>().unwrap();
                    pos.x += vel.x;
                    pos.y += vel.y;
                    pos.z += vel.z;
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("hash/pos_vel", count), &count, |b, &n| {
            let mut entities: Vec<Entity<HashContainer>> = (0..n)
                .map(|i| {
                    let mut e = Entity::make_entity();
                    e.add((
                        Position { x: i as f32, y: 0.0, z: 0.0 },
                        Velocity { x: 1.0, y: 0.0, z: 0.0 },
                    ))
                    .unwrap();
                    e
                })
                .collect();

            b.iter(|| {
                for entity in entities.iter_mut() {
                    let (pos, vel) = entity.get_mut::<(Position, Velocity)>().unwrap();
                    pos.x += vel.x;
                    pos.y += vel.y;
                    pos.z += vel.z;
                }
            });
        });
    }

    group.finish();
}

// =============================================================================
// Many-components-per-entity benchmark (stresses AVL rotation depth / hash load factor)
// =============================================================================

fn bench_many_components(c: &mut Criterion) {
    let mut group = c.benchmark_group("many_components");
    let entity_count = 1_000;
    group.throughput(Throughput::Elements(entity_count as u64));

    group.bench_function("avl/twenty_markers", |b| {
        b.iter(|| {
            for _ in 0..entity_count {
                let mut entity: Entity<AvlContainer> = Entity::make_entity();
                entity.add(Data::default()).unwrap();
                entity
                    .add((
                        MarkerA, MarkerB, MarkerC, MarkerD, MarkerE, MarkerF, MarkerG, MarkerH, MarkerI, MarkerJ,
                        MarkerK, MarkerL, MarkerM, MarkerN, MarkerO, MarkerP,
                    ))
                    .unwrap();
                black_box(entity.get::<Data>().unwrap());
            }
        });
    });

    group.bench_function("hash/twenty_markers", |b| {
        b.iter(|| {
            for _ in 0..entity_count {
                let mut entity: Entity<HashContainer> = Entity::make_entity();
                entity.add(Data::default()).unwrap();
                entity
                    .add((
                        MarkerA, MarkerB, MarkerC, MarkerD, MarkerE, MarkerF, MarkerG, MarkerH, MarkerI, MarkerJ,
                        MarkerK, MarkerL, MarkerM, MarkerN, MarkerO, MarkerP,
                    ))
                    .unwrap();
                black_box(entity.get::<Data>().unwrap());
            }
        });
    });

    group.finish();
}

// =============================================================================
// Add-then-remove (component migration) benchmarks
// =============================================================================

fn bench_add_remove(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_remove");

    for count in [100, 1_000, 10_000] {
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("avl/add_then_remove", count), &count, |b, &n| {
            b.iter_batched(
                || {
                    (0..n)
                        .map(|_| {
                            let mut e: Entity<AvlContainer> = Entity::make_entity();
                            e.add(Position::default()).unwrap();
                            e
                        })
                        .collect::<Vec<_>>()
                },
                |entities| {
                    for mut entity in entities {
                        entity.add(Velocity::default()).unwrap();
                        entity.remove::<Velocity>().unwrap();
                    }
                },
                criterion::BatchSize::SmallInput,
            );
        });

        group.bench_with_input(BenchmarkId::new("hash/add_then_remove", count), &count, |b, &n| {
            b.iter_batched(
                || {
                    (0..n)
                        .map(|_| {
                            let mut e: Entity<HashContainer> = Entity::make_entity();
                            e.add(Position::default()).unwrap();
                            e
                        })
                        .collect::<Vec<_>>()
                },
                |entities| {
                    for mut entity in entities {
                        entity.add(Velocity::default()).unwrap();
                        entity.remove::<Velocity>().unwrap();
                    }
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_add, bench_get, bench_many_components, bench_add_remove);
criterion_main!(benches);
