//! # Spatial Partition Benchmark
//!
//! Per-frame workloads of a busy world:
//! - Moving every entity a little (most moves stay inside the padding)
//! - Small box queries around each entity (collision broad phase)
//! - Long rays and swept boxes (line of sight, projectiles)
//!
//! Run with: `cargo bench --package spatia_core`

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use spatia_core::{Aabb, Collector, IterationControl, ListMask, Ray, SpatialHandle, SpatialPartition, Vec3};

const WORLD: f32 = 4096.0;
const LISTS: ListMask = ListMask(1);

fn populated(count: usize) -> (SpatialPartition<u32>, Vec<SpatialHandle>, Vec<Aabb>) {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let partition = SpatialPartition::new(Vec3::splat(-WORLD), Vec3::splat(WORLD)).unwrap();
    let mut handles = Vec::with_capacity(count);
    let mut boxes = Vec::with_capacity(count);
    for i in 0..count {
        let center = Vec3::new(
            rng.gen_range(-WORLD..WORLD),
            rng.gen_range(-WORLD..WORLD),
            rng.gen_range(-200.0f32..200.0),
        );
        let bounds = Aabb::from_center(center, Vec3::splat(rng.gen_range(0.5f32..20.0)));
        handles.push(partition.create_handle_in(i as u32, LISTS, &bounds).unwrap());
        boxes.push(bounds);
    }
    (partition, handles, boxes)
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    for count in [1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| black_box(populated(count).0.handle_count()));
        });
    }
    group.finish();
}

fn bench_move(c: &mut Criterion) {
    let (partition, handles, boxes) = populated(10_000);
    let mut frame = 0u32;
    c.bench_function("move_10k", |b| {
        b.iter(|| {
            frame += 1;
            let step = Vec3::splat((frame % 16) as f32 * 0.5);
            for (handle, bounds) in handles.iter().zip(&boxes) {
                partition.element_moved(*handle, &Aabb::new(bounds.min + step, bounds.max + step));
            }
        });
    });
}

fn bench_box_query(c: &mut Criterion) {
    let (partition, _, boxes) = populated(10_000);
    c.bench_function("box_query_10k", |b| {
        b.iter(|| {
            let mut total = 0usize;
            for bounds in boxes.iter().take(1_000) {
                let mut count = |_: u32| {
                    total += 1;
                    IterationControl::Continue
                };
                partition.enumerate_elements_in_box(LISTS, &bounds.bloated(8.0), &mut count);
            }
            black_box(total)
        });
    });
}

fn bench_rays(c: &mut Criterion) {
    let (partition, _, _) = populated(10_000);
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let rays: Vec<Ray> = (0..100)
        .map(|_| {
            let start = Vec3::new(rng.gen_range(-WORLD..WORLD), rng.gen_range(-WORLD..WORLD), 0.0);
            let end = Vec3::new(rng.gen_range(-WORLD..WORLD), rng.gen_range(-WORLD..WORLD), 0.0);
            Ray::segment(start, end)
        })
        .collect();

    c.bench_function("ray_100", |b| {
        b.iter(|| {
            let mut hits = Collector::new();
            for ray in &rays {
                partition.enumerate_elements_along_ray(LISTS, ray, &mut hits);
            }
            black_box(hits.elements.len())
        });
    });

    c.bench_function("swept_box_100", |b| {
        b.iter(|| {
            let mut hits = Collector::new();
            for ray in &rays {
                let swept = Ray::swept(ray.start, ray.start + ray.delta, Vec3::splat(16.0));
                partition.enumerate_elements_along_ray(LISTS, &swept, &mut hits);
            }
            black_box(hits.elements.len())
        });
    });
}

criterion_group!(benches, bench_insert, bench_move, bench_box_query, bench_rays);
criterion_main!(benches);
