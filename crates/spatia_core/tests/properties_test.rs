//! Randomized comparison of every query shape against a brute-force scan.
//!
//! The generator is seeded, so failures reproduce.

use std::collections::HashMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use spatia_core::{
    Aabb, IterationControl, ListMask, PartitionConfig, PartitionEnumerator, Ray, SpatialHandle,
    SpatialPartition, Sphere, Vec3,
};
use spatia_shared::BOUNDS_EPSILON;

const WORLD: f32 = 512.0;
const ENTITIES: usize = 600;
const QUERIES: usize = 200;

struct Fixture {
    partition: SpatialPartition<u32>,
    handles: Vec<SpatialHandle>,
    bounds: Vec<Aabb>,
    lists: Vec<ListMask>,
    hidden: Vec<bool>,
}

fn random_vec(rng: &mut ChaCha8Rng, extent: f32) -> Vec3 {
    Vec3::new(
        rng.gen_range(-extent..extent),
        rng.gen_range(-extent..extent),
        rng.gen_range(-extent..extent),
    )
}

fn random_box(rng: &mut ChaCha8Rng) -> Aabb {
    // Mostly small, some spanning several levels, a few larger than any cell.
    let half: f32 = match rng.gen_range(0..10) {
        0..=5 => rng.gen_range(0.1..12.0),
        6..=8 => rng.gen_range(12.0..100.0),
        _ => rng.gen_range(100.0..200.0),
    };
    let half = Vec3::new(half, half * rng.gen_range(0.2f32..1.0), half * rng.gen_range(0.2f32..1.0));
    // Some entities stick out of the world.
    Aabb::from_center(random_vec(rng, WORLD + 80.0), half)
}

fn fixture(seed: u64) -> Fixture {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let config = PartitionConfig::with_world(Vec3::splat(-WORLD), Vec3::splat(WORLD));
    let partition = SpatialPartition::with_config(config).unwrap();
    let mut fx = Fixture {
        partition,
        handles: Vec::new(),
        bounds: Vec::new(),
        lists: Vec::new(),
        hidden: Vec::new(),
    };
    for i in 0..ENTITIES {
        let bounds = random_box(&mut rng);
        let lists = ListMask(rng.gen_range(1..16));
        let handle = fx
            .partition
            .create_handle_in(i as u32, lists, &bounds)
            .unwrap();
        let hidden = rng.gen_bool(0.1);
        if hidden {
            let _ = fx.partition.hide_element(handle);
        }
        fx.handles.push(handle);
        fx.bounds.push(bounds);
        fx.lists.push(lists);
        fx.hidden.push(hidden);
    }
    fx
}

impl Fixture {
    /// Indices a correct index would report, by brute force.
    fn expected(&self, mask: ListMask, hits: impl Fn(&Aabb) -> bool) -> Vec<u32> {
        (0..self.handles.len())
            .filter(|&i| !self.hidden[i] && self.lists[i].intersects(mask))
            .filter(|&i| hits(&self.bounds[i].bloated(BOUNDS_EPSILON)))
            .map(|i| i as u32)
            .collect()
    }
}

/// Enumerator that counts how often each element is reported.
#[derive(Default)]
struct Seen(HashMap<u32, usize>);

impl PartitionEnumerator<u32> for Seen {
    fn on_element(&mut self, element: u32) -> IterationControl {
        *self.0.entry(element).or_default() += 1;
        IterationControl::Continue
    }
}

/// Runs a query and fails on a duplicate report.
fn run(query: impl FnOnce(&mut Seen)) -> Vec<u32> {
    let mut seen = Seen::default();
    query(&mut seen);
    for (element, count) in &seen.0 {
        assert_eq!(*count, 1, "element {element} reported {count} times");
    }
    let mut found: Vec<u32> = seen.0.into_keys().collect();
    found.sort_unstable();
    found
}

fn random_mask(rng: &mut ChaCha8Rng) -> ListMask {
    ListMask(rng.gen_range(1..16))
}

#[test]
fn test_box_queries_match_brute_force() {
    let fx = fixture(1);
    let mut rng = ChaCha8Rng::seed_from_u64(101);
    for _ in 0..QUERIES {
        let mask = random_mask(&mut rng);
        let query = Aabb::from_center(random_vec(&mut rng, WORLD + 50.0), random_vec(&mut rng, 120.0).abs());
        let found = run(|e| {
            fx.partition.enumerate_elements_in_box(mask, &query, e);
        });
        assert_eq!(found, fx.expected(mask, |b| b.intersects(&query)), "box {query:?}");
    }
}

#[test]
fn test_sphere_queries_match_brute_force() {
    let fx = fixture(2);
    let mut rng = ChaCha8Rng::seed_from_u64(202);
    for _ in 0..QUERIES {
        let mask = random_mask(&mut rng);
        let sphere = Sphere::new(random_vec(&mut rng, WORLD), rng.gen_range(1.0f32..150.0));
        let found = run(|e| {
            fx.partition.enumerate_elements_in_sphere(mask, &sphere, e);
        });
        assert_eq!(found, fx.expected(mask, |b| sphere.intersects_aabb(b)), "{sphere:?}");
    }
}

#[test]
fn test_point_queries_match_brute_force() {
    let fx = fixture(3);
    let mut rng = ChaCha8Rng::seed_from_u64(303);
    for _ in 0..QUERIES {
        let mask = random_mask(&mut rng);
        let point = random_vec(&mut rng, WORLD);
        let found = run(|e| {
            fx.partition.enumerate_elements_at_point(mask, point, e);
        });
        assert_eq!(found, fx.expected(mask, |b| b.contains_point(point)), "{point:?}");
    }
}

#[test]
fn test_ray_queries_match_brute_force() {
    let fx = fixture(4);
    let world = Aabb::new(Vec3::splat(-WORLD), Vec3::splat(WORLD));
    let mut rng = ChaCha8Rng::seed_from_u64(404);
    for i in 0..QUERIES {
        let mask = random_mask(&mut rng);
        let start = random_vec(&mut rng, WORLD + 200.0);
        let end = random_vec(&mut rng, WORLD + 200.0);
        let ray = if i % 2 == 0 {
            Ray::segment(start, end)
        } else {
            Ray::swept(start, end, random_vec(&mut rng, 40.0).abs())
        };
        let found = run(|e| {
            fx.partition.enumerate_elements_along_ray(mask, &ray, e);
        });
        let expected = match ray.clip(&world, 0.0, 1.0) {
            Some((t0, t1)) => fx.expected(mask, |b| ray.clip(b, t0, t1).is_some()),
            None => Vec::new(),
        };
        assert_eq!(found, expected, "{ray:?}");
    }
}

#[test]
fn test_every_entity_fits_its_level() {
    let fx = fixture(5);
    let tree = fx.partition.tree(0).unwrap();
    let grid = tree.grid();
    let coarsest = grid.level_count() - 1;
    for (handle, bounds) in fx.handles.iter().zip(&fx.bounds) {
        let level = tree.level_of(handle.index()).unwrap();
        let extent = bounds
            .bloated(BOUNDS_EPSILON)
            .clamped(grid.world())
            .size()
            .max_element();
        assert!(level == coarsest || extent < grid.cell_size(level));
        if level > 0 {
            // Nothing finer would have worked.
            assert!(extent >= grid.cell_size(level - 1));
        }
    }
}

#[test]
fn test_small_moves_are_idempotent() {
    let fx = fixture(6);
    let tree = fx.partition.tree(0).unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(606);
    for (handle, bounds) in fx.handles.iter().zip(&fx.bounds).take(100) {
        let before = (
            tree.level_of(handle.index()),
            tree.voxel_count(handle.index()),
            tree.cached_bounds(handle.index()),
        );
        let jitter = Vec3::splat(rng.gen_range(-0.01f32..0.01));
        let nudged = Aabb::new(bounds.min + jitter, bounds.max + jitter);
        fx.partition.element_moved(*handle, &nudged);
        let after = (
            tree.level_of(handle.index()),
            tree.voxel_count(handle.index()),
            tree.cached_bounds(handle.index()),
        );
        assert_eq!(before, after);
    }
}

#[test]
fn test_moves_then_queries_match_brute_force() {
    let mut fx = fixture(7);
    let mut rng = ChaCha8Rng::seed_from_u64(707);
    for i in 0..fx.handles.len() {
        if rng.gen_bool(0.5) {
            let bounds = random_box(&mut rng);
            fx.partition.element_moved(fx.handles[i], &bounds);
            fx.bounds[i] = bounds;
        }
    }
    for _ in 0..QUERIES / 2 {
        let mask = random_mask(&mut rng);
        let query = Aabb::from_center(random_vec(&mut rng, WORLD), random_vec(&mut rng, 80.0).abs());
        let found = run(|e| {
            fx.partition.enumerate_elements_in_box(mask, &query, e);
        });
        assert_eq!(found, fx.expected(mask, |b| b.intersects(&query)));
    }
}

#[test]
fn test_removed_entities_are_never_reported() {
    let fx = fixture(8);
    let everything = Aabb::new(Vec3::splat(-2.0 * WORLD), Vec3::splat(2.0 * WORLD));
    for (i, handle) in fx.handles.iter().enumerate() {
        if i % 3 == 0 {
            fx.partition.remove_from_tree(*handle);
        } else if i % 3 == 1 {
            fx.partition.destroy_handle(*handle);
        }
    }
    let found = run(|e| {
        fx.partition.enumerate_elements_in_box(ListMask(15), &everything, e);
    });
    assert!(found.iter().all(|&e| e % 3 == 2));
    let expected = fx.expected(ListMask(15), |_| true);
    let kept: Vec<u32> = expected.into_iter().filter(|e| e % 3 == 2).collect();
    assert_eq!(found, kept);
}
