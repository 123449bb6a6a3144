//! Concurrent readers, writers, and mutations issued from inside queries.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use spatia_core::{
    Aabb, Collector, IterationControl, ListMask, QueryCallback, QueryKind, SpatialError,
    SpatialHandle, SpatialPartition, Vec3,
};
use spatia_shared::MAX_QUERY_CALLBACKS;

const STATIC_LIST: ListMask = ListMask(1);
const MOVING_LIST: ListMask = ListMask(2);

fn world() -> SpatialPartition<u32> {
    SpatialPartition::new(Vec3::splat(-1024.0), Vec3::splat(1024.0)).unwrap()
}

fn cube(center: Vec3, half: f32) -> Aabb {
    Aabb::from_center(center, Vec3::splat(half))
}

fn grid_position(i: u32) -> Vec3 {
    Vec3::new((i % 20) as f32 * 40.0 - 400.0, (i / 20) as f32 * 40.0 - 400.0, 0.0)
}

#[test]
fn test_concurrent_readers_with_writer() {
    let partition = world();
    for i in 0..400 {
        partition
            .create_handle_in(i, STATIC_LIST, &cube(grid_position(i), 2.0))
            .unwrap();
    }
    let movers: Vec<SpatialHandle> = (0..200)
        .map(|i| {
            partition
                .create_handle_in(1000 + i, MOVING_LIST, &cube(grid_position(i), 3.0))
                .unwrap()
        })
        .collect();

    let query = cube(Vec3::ZERO, 200.0);
    let mut expected = Collector::new();
    partition.enumerate_elements_in_box(STATIC_LIST, &query, &mut expected);
    let expected_count = expected.elements.len();
    assert!(expected_count > 0);

    let queries_run = AtomicUsize::new(0);
    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..200 {
                    let mut found = Collector::new();
                    partition.enumerate_elements_in_box(STATIC_LIST, &query, &mut found);
                    assert_eq!(found.elements.len(), expected_count);
                    assert!(found.elements.iter().all(|&e| e < 1000));
                    queries_run.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
        s.spawn(|| {
            for step in 0..50 {
                for (i, handle) in movers.iter().enumerate() {
                    let offset = Vec3::splat((step % 7) as f32 * 13.0);
                    partition.element_moved(*handle, &cube(grid_position(i as u32) + offset, 3.0));
                }
            }
        });
    });
    assert_eq!(queries_run.load(Ordering::Relaxed), 800);
}

#[test]
fn test_readers_never_see_destroyed_handles() {
    let partition = world();
    let doomed: Vec<SpatialHandle> = (0..100)
        .map(|i| {
            partition
                .create_handle_in(i, STATIC_LIST, &cube(grid_position(i), 2.0))
                .unwrap()
        })
        .collect();
    for handle in &doomed {
        partition.destroy_handle(*handle);
    }
    let everything = cube(Vec3::ZERO, 1000.0);

    thread::scope(|s| {
        for t in 0..4u32 {
            let partition = &partition;
            s.spawn(move || {
                for i in 0..50 {
                    let id = 10_000 + t * 100 + i;
                    let h = partition
                        .create_handle_in(id, STATIC_LIST, &cube(grid_position(i), 1.0))
                        .unwrap();
                    let mut found = Collector::new();
                    partition.enumerate_elements_in_box(STATIC_LIST, &everything, &mut found);
                    assert!(found.elements.iter().all(|&e| e >= 10_000));
                    partition.destroy_handle(h);
                }
            });
        }
    });
    assert_eq!(partition.handle_count(), 0);
}

#[test]
fn test_destroy_from_inside_query() {
    let partition = world();
    for i in 0..10 {
        partition
            .create_handle_in(i, STATIC_LIST, &cube(Vec3::new(i as f32, 0.0, 0.0), 0.25))
            .unwrap();
    }
    let handles: Vec<SpatialHandle> = (0..10)
        .map(|i| {
            partition
                .create_handle_in(100 + i, MOVING_LIST, &cube(Vec3::new(i as f32, 0.0, 0.0), 0.25))
                .unwrap()
        })
        .collect();

    let mut reported = 0;
    let mut enumerator = |e: u32| {
        reported += 1;
        // Destroy the matching mover and run a nested query of our own.
        partition.destroy_handle(handles[e as usize]);
        let mut nested = Collector::new();
        partition.enumerate_elements_in_box(MOVING_LIST, &cube(Vec3::ZERO, 50.0), &mut nested);
        assert_eq!(nested.elements.len(), 10);
        IterationControl::Continue
    };
    partition.enumerate_elements_in_box(STATIC_LIST, &cube(Vec3::ZERO, 50.0), &mut enumerator);
    assert_eq!(reported, 10);
    assert_eq!(partition.pending_mutations(), 0);
    assert_eq!(partition.handle_count(), 10);

    let mut movers = Collector::new();
    partition.enumerate_elements_in_box(MOVING_LIST, &cube(Vec3::ZERO, 50.0), &mut movers);
    assert!(movers.elements.is_empty());
}

#[test]
fn test_stop_from_enumerator() {
    let partition = world();
    for i in 0..50 {
        partition
            .create_handle_in(i, STATIC_LIST, &cube(grid_position(i), 2.0))
            .unwrap();
    }
    let mut first_three = Collector::with_limit(3);
    let control =
        partition.enumerate_elements_in_box(STATIC_LIST, &cube(Vec3::ZERO, 1000.0), &mut first_three);
    assert!(control.is_stop());
    assert_eq!(first_three.elements.len(), 3);
}

#[derive(Default)]
struct QueryCounter {
    pre: AtomicUsize,
    post: AtomicUsize,
    rays: AtomicUsize,
}

impl QueryCallback for QueryCounter {
    fn pre_query(&self, kind: QueryKind, _: ListMask) {
        self.pre.fetch_add(1, Ordering::Relaxed);
        if kind == QueryKind::Ray {
            self.rays.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn post_query(&self, _: QueryKind, _: ListMask) {
        self.post.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn test_query_callbacks() {
    let partition = world();
    let counter = Arc::new(QueryCounter::default());
    let callback: Arc<dyn QueryCallback> = Arc::clone(&counter) as Arc<dyn QueryCallback>;
    partition.install_query_callback(Arc::clone(&callback)).unwrap();

    let mut sink = Collector::new();
    partition.enumerate_elements_in_box(STATIC_LIST, &cube(Vec3::ZERO, 1.0), &mut sink);
    partition.enumerate_elements_at_point(STATIC_LIST, Vec3::ZERO, &mut sink);
    let ray = spatia_core::Ray::segment(Vec3::ZERO, Vec3::splat(10.0));
    partition.enumerate_elements_along_ray(STATIC_LIST, &ray, &mut sink);
    assert_eq!(counter.pre.load(Ordering::Relaxed), 3);
    assert_eq!(counter.post.load(Ordering::Relaxed), 3);
    assert_eq!(counter.rays.load(Ordering::Relaxed), 1);

    assert!(partition.remove_query_callback(&callback));
    partition.enumerate_elements_at_point(STATIC_LIST, Vec3::ZERO, &mut sink);
    assert_eq!(counter.pre.load(Ordering::Relaxed), 3);

    for _ in 0..MAX_QUERY_CALLBACKS {
        partition
            .install_query_callback(Arc::new(QueryCounter::default()))
            .unwrap();
    }
    assert!(matches!(
        partition.install_query_callback(callback),
        Err(SpatialError::CallbackLimit { .. })
    ));
}
