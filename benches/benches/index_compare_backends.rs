// Copyright 2025 the Overstory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use criterion::{BatchSize, Criterion, Throughput, black_box, criterion_group, criterion_main};
use glam::Vec3A;
use overstory_geom::{Aabb, Ray};
use overstory_index::{IndexKind, QueryFilter, SpatialIndex};

const WORLD_EXTENT: f32 = 1000.0;
const KINDS: [IndexKind; 4] = [
    IndexKind::HashGrid,
    IndexKind::Octree,
    IndexKind::LooseOctree,
    IndexKind::Bvh,
];

#[derive(Clone)]
struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Self {
        Self(seed)
    }
    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
    fn next_f32(&mut self) -> f32 {
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }
    fn range(&mut self, lo: f32, hi: f32) -> f32 {
        lo + self.next_f32() * (hi - lo)
    }
}

fn gen_uniform_boxes(count: usize, half_extent: f32) -> Vec<Aabb> {
    let mut rng = Rng::new(0xCAFE_F00D_DEAD_BEEF);
    (0..count)
        .map(|_| {
            let center = Vec3A::new(
                rng.range(-WORLD_EXTENT, WORLD_EXTENT),
                rng.range(-WORLD_EXTENT, WORLD_EXTENT),
                rng.range(-WORLD_EXTENT, WORLD_EXTENT),
            );
            Aabb::from_center_half_extents(center, Vec3A::splat(half_extent))
        })
        .collect()
}

fn gen_clustered_boxes(clusters: usize, per_cluster: usize, spread: f32) -> Vec<Aabb> {
    let mut rng = Rng::new(0x0123_4567_89AB_CDEF);
    let mut out = Vec::with_capacity(clusters * per_cluster);
    for _ in 0..clusters {
        let center = Vec3A::new(
            rng.range(-WORLD_EXTENT, WORLD_EXTENT),
            rng.range(-WORLD_EXTENT, WORLD_EXTENT),
            rng.range(-WORLD_EXTENT, WORLD_EXTENT),
        );
        for _ in 0..per_cluster {
            let offset = Vec3A::new(
                rng.range(-spread, spread),
                rng.range(-spread, spread),
                rng.range(-spread, spread),
            );
            out.push(Aabb::from_center_half_extents(center + offset, Vec3A::splat(1.0)));
        }
    }
    out
}

fn world_bounds() -> Aabb {
    Aabb::new(Vec3A::splat(-WORLD_EXTENT), Vec3A::splat(WORLD_EXTENT))
}

fn build_index(kind: IndexKind, boxes: &[Aabb]) -> SpatialIndex {
    let mut index = SpatialIndex::with_kind(kind, world_bounds(), 25.0);
    for (i, b) in boxes.iter().enumerate() {
        index.insert(i as u64 + 1, *b, 0);
    }
    if index.needs_rebuild() {
        index.rebuild();
    }
    index
}

fn bench_insert(c: &mut Criterion) {
    let boxes = gen_uniform_boxes(4096, 2.0);

    let mut group = c.benchmark_group("insert_4k");
    group.throughput(Throughput::Elements(boxes.len() as u64));
    for kind in KINDS {
        group.bench_function(kind.name(), |b| {
            b.iter_batched(
                || boxes.clone(),
                |boxes| black_box(build_index(kind, &boxes)),
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_query_aabb(c: &mut Criterion) {
    let boxes = gen_clustered_boxes(64, 64, 40.0);
    let query = Aabb::from_center_half_extents(Vec3A::ZERO, Vec3A::splat(120.0));

    let mut group = c.benchmark_group("query_aabb");
    for kind in KINDS {
        let mut index = build_index(kind, &boxes);
        group.bench_function(kind.name(), |b| {
            b.iter(|| black_box(index.query_aabb(black_box(&query), &QueryFilter::ALL)));
        });
    }
    group.finish();
}

fn bench_query_ray(c: &mut Criterion) {
    let boxes = gen_uniform_boxes(4096, 3.0);
    let ray = Ray::new(
        Vec3A::new(-WORLD_EXTENT, 1.0, 2.0),
        Vec3A::new(1.0, 0.001, 0.002),
    );

    let mut group = c.benchmark_group("query_ray");
    for kind in KINDS {
        let mut index = build_index(kind, &boxes);
        group.bench_function(kind.name(), |b| {
            b.iter(|| {
                black_box(index.query_ray(black_box(&ray), 2.0 * WORLD_EXTENT, &QueryFilter::ALL))
            });
        });
    }
    group.finish();
}

fn bench_update_churn(c: &mut Criterion) {
    let boxes = gen_uniform_boxes(2048, 2.0);

    let mut group = c.benchmark_group("update_churn");
    group.throughput(Throughput::Elements(boxes.len() as u64));
    for kind in KINDS {
        group.bench_function(kind.name(), |b| {
            b.iter_batched(
                || build_index(kind, &boxes),
                |mut index| {
                    for (i, b) in boxes.iter().enumerate() {
                        let mut moved = *b;
                        moved.translate(Vec3A::new(1.5, 0.0, -1.5));
                        index.update(i as u64 + 1, moved);
                    }
                    // Queries absorb the rebuild cost for lazy backends.
                    black_box(index.query_aabb(
                        &Aabb::from_center_half_extents(Vec3A::ZERO, Vec3A::splat(50.0)),
                        &QueryFilter::ALL,
                    ))
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_k_nearest(c: &mut Criterion) {
    let boxes = gen_uniform_boxes(4096, 2.0);

    let mut group = c.benchmark_group("query_k_nearest_16");
    for kind in KINDS {
        let mut index = build_index(kind, &boxes);
        group.bench_function(kind.name(), |b| {
            b.iter(|| {
                black_box(index.query_k_nearest(
                    black_box(Vec3A::new(10.0, -5.0, 20.0)),
                    16,
                    300.0,
                    &QueryFilter::ALL,
                ))
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_insert,
    bench_query_aabb,
    bench_query_ray,
    bench_update_churn,
    bench_k_nearest
);
criterion_main!(benches);
