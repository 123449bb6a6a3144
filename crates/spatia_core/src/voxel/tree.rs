//! # Multi-Level Voxel Tree
//!
//! A stack of [`VoxelHash`] levels, cell size growing geometrically from
//! the finest level. Each entity lives on exactly one level: the finest
//! one whose cells are larger than its padded box, so it never spans more
//! than two cells per axis.
//!
//! ## Locking
//!
//! ```text
//! query     -> read_recursive()   (nested queries never wait on a queued writer)
//! move      -> upgradable_read()  (unchanged boxes never block readers)
//! insert    -> write()
//! remove    -> write()
//! ```
//!
//! Mutating a tree while this thread is inside one of its queries would
//! deadlock; the partition facade defers such mutations instead.

use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use spatia_shared::{Aabb, ListMask, Ray, Sphere, Vec3};
use tracing::{debug, trace, warn};

use crate::config::PartitionConfig;
use crate::memory::{VisitBits, VisitPool};
use crate::query::{
    BoxTest, IntersectionTest, IterationControl, PartitionEnumerator, PointTest, RayTest,
    SphereTest,
};
use crate::sync::{self, QueryScope};
use crate::voxel::coord::{VoxelCoord, VoxelGrid, VoxelRange};
use crate::voxel::hash::{LevelStats, VoxelHash, VoxelVisitor};

/// Answers "may this handle be reported to a query with this mask?".
///
/// The tree only stores geometry; list membership and the hidden flag
/// live with the caller's records.
pub trait MembershipSource {
    /// True if the entity at `handle` is alive, visible and in a list of `mask`.
    fn accepts(&self, handle: u32, mask: ListMask) -> bool;
}

impl<F> MembershipSource for F
where
    F: Fn(u32, ListMask) -> bool,
{
    #[inline]
    fn accepts(&self, handle: u32, mask: ListMask) -> bool {
        self(handle, mask)
    }
}

/// What [`VoxelTree::element_moved`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The entity was not in the tree and has been inserted.
    Inserted,
    /// The padded box matched the cached one; nothing changed.
    Unchanged,
    /// The entity was unlinked and linked again with the new box.
    Reinserted,
}

/// Per-tree counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeStats {
    /// Tree name from the configuration.
    pub name: String,
    /// Entities currently linked.
    pub entities: usize,
    /// Counters for every level, finest first.
    pub levels: Vec<LevelStats>,
}

impl TreeStats {
    /// Total (entity, cell) links over all levels.
    #[must_use]
    pub fn links(&self) -> usize {
        self.levels.iter().map(|l| l.links).sum()
    }
}

#[derive(Clone, Copy, Debug)]
struct TreeEntry<E> {
    element: E,
    level: u32,
    leaf_head: u32,
    visit_bit: u32,
    /// Padded, unclamped box; what queries test against.
    bounds: Aabb,
}

#[derive(Debug)]
struct TreeState<E> {
    levels: Vec<VoxelHash>,
    /// Indexed by handle index.
    entries: Vec<Option<TreeEntry<E>>>,
    free_visit_bits: Vec<u32>,
    next_visit_bit: u32,
    element_count: usize,
}

impl<E> TreeState<E> {
    fn entry(&self, handle: u32) -> Option<&TreeEntry<E>> {
        self.entries.get(handle as usize).and_then(Option::as_ref)
    }
}

/// Multi-resolution spatial hash for one group of lists.
#[derive(Debug)]
pub struct VoxelTree<E> {
    id: u64,
    name: String,
    grid: VoxelGrid,
    epsilon: f32,
    state: RwLock<TreeState<E>>,
    visits: VisitPool,
}

impl<E: Copy> VoxelTree<E> {
    /// Builds an empty tree with the level layout of `config`.
    ///
    /// `config` must already be validated.
    pub fn new(name: impl Into<String>, config: &PartitionConfig) -> Self {
        let name = name.into();
        let grid = VoxelGrid::new(config);
        let levels = (0..grid.level_count()).map(VoxelHash::new).collect();
        debug!(
            tree = %name,
            levels = grid.level_count(),
            finest = grid.cell_size(0),
            coarsest = grid.cell_size(grid.level_count() - 1),
            "voxel tree created"
        );
        Self {
            id: sync::next_owner_id(),
            name,
            grid,
            epsilon: config.epsilon,
            state: RwLock::new(TreeState {
                levels,
                entries: Vec::new(),
                free_visit_bits: Vec::new(),
                next_visit_bit: 0,
                element_count: 0,
            }),
            visits: VisitPool::new(),
        }
    }

    /// Tree name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Grid shared by every level.
    #[must_use]
    pub const fn grid(&self) -> &VoxelGrid {
        &self.grid
    }

    /// Number of linked entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read_recursive().element_count
    }

    /// True if no entity is linked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The finest level whose cells are strictly larger than `padded` on
    /// every axis, or the coarsest level.
    #[must_use]
    pub fn choose_level(&self, padded: &Aabb) -> u32 {
        let extent = padded.clamped(self.grid.world()).size().max_element();
        let levels = self.grid.level_count();
        for level in 0..levels {
            if self.grid.cell_size(level) > extent {
                trace!(tree = %self.name, level, extent, "level selected");
                return level;
            }
        }
        warn!(
            tree = %self.name,
            extent,
            coarsest = self.grid.cell_size(levels - 1),
            "entity larger than the coarsest cell"
        );
        levels - 1
    }

    /// Links the entity at `handle` with `bounds`.
    ///
    /// An entity that is already linked is relinked with the new box.
    pub fn insert(&self, handle: u32, element: E, bounds: &Aabb) {
        self.assert_not_querying();
        let mut state = self.state.write();
        if state.entry(handle).is_some() {
            debug_assert!(false, "handle {handle} inserted twice into tree '{}'", self.name);
            self.unlink(&mut state, handle);
        }
        self.link(&mut state, handle, element, bounds);
    }

    /// Unlinks the entity at `handle`. Returns false if it was not linked.
    pub fn remove(&self, handle: u32) -> bool {
        self.assert_not_querying();
        let mut state = self.state.write();
        self.unlink(&mut state, handle)
    }

    /// Updates the box of the entity at `handle`, linking it if absent.
    ///
    /// A padded box within epsilon of the cached one is left alone, so
    /// jitter below the padding never touches the hash.
    pub fn element_moved(&self, handle: u32, element: E, bounds: &Aabb) -> MoveOutcome {
        self.assert_not_querying();
        let padded = bounds.bloated(self.epsilon);
        let state = self.state.upgradable_read();
        let outcome = match state.entry(handle) {
            Some(entry) if entry.bounds.approx_eq(&padded, self.epsilon) => {
                return MoveOutcome::Unchanged;
            }
            Some(_) => MoveOutcome::Reinserted,
            None => MoveOutcome::Inserted,
        };
        let mut state = RwLockUpgradableReadGuard::upgrade(state);
        if outcome == MoveOutcome::Reinserted {
            self.unlink(&mut state, handle);
        }
        self.link(&mut state, handle, element, bounds);
        outcome
    }

    fn link(&self, state: &mut TreeState<E>, handle: u32, element: E, bounds: &Aabb) {
        debug_assert!(!bounds.is_empty(), "inserting inverted bounds {bounds:?}");
        let padded = bounds.bloated(self.epsilon);
        let level = self.choose_level(&padded);
        let range = self.grid.range_of(&padded.clamped(self.grid.world()), level);
        let leaf_head = state.levels[level as usize].insert(handle, range);

        let visit_bit = state.free_visit_bits.pop().unwrap_or_else(|| {
            let bit = state.next_visit_bit;
            state.next_visit_bit += 1;
            bit
        });

        let slot = handle as usize;
        if state.entries.len() <= slot {
            state.entries.resize_with(slot + 1, || None);
        }
        state.entries[slot] = Some(TreeEntry {
            element,
            level,
            leaf_head,
            visit_bit,
            bounds: padded,
        });
        state.element_count += 1;
    }

    fn unlink(&self, state: &mut TreeState<E>, handle: u32) -> bool {
        let Some(entry) = state.entries.get_mut(handle as usize).and_then(Option::take) else {
            return false;
        };
        state.levels[entry.level as usize].remove(entry.leaf_head);
        state.free_visit_bits.push(entry.visit_bit);
        state.element_count -= 1;
        true
    }

    fn assert_not_querying(&self) {
        debug_assert!(
            !sync::is_active(self.id),
            "tree '{}' mutated from inside one of its own queries",
            self.name
        );
    }

    /// Level the entity at `handle` is linked on.
    #[must_use]
    pub fn level_of(&self, handle: u32) -> Option<u32> {
        self.state.read_recursive().entry(handle).map(|e| e.level)
    }

    /// Number of cells the entity at `handle` occupies.
    #[must_use]
    pub fn voxel_count(&self, handle: u32) -> Option<usize> {
        let state = self.state.read_recursive();
        let entry = state.entry(handle)?;
        Some(state.levels[entry.level as usize].leaf_len(entry.leaf_head))
    }

    /// Padded box the entity at `handle` was linked with.
    #[must_use]
    pub fn cached_bounds(&self, handle: u32) -> Option<Aabb> {
        self.state.read_recursive().entry(handle).map(|e| e.bounds)
    }

    /// True if the entity at `handle` is linked.
    #[must_use]
    pub fn contains(&self, handle: u32) -> bool {
        self.state.read_recursive().entry(handle).is_some()
    }

    /// Reports every accepted entity whose padded box touches `aabb`.
    pub fn enumerate_in_box<S, N>(
        &self,
        source: &S,
        mask: ListMask,
        aabb: &Aabb,
        enumerator: &mut N,
    ) -> IterationControl
    where
        S: MembershipSource,
        N: PartitionEnumerator<E>,
    {
        self.enumerate_overlapping(source, mask, aabb, &BoxTest(*aabb), enumerator)
    }

    /// Reports every accepted entity whose padded box touches `sphere`.
    pub fn enumerate_in_sphere<S, N>(
        &self,
        source: &S,
        mask: ListMask,
        sphere: &Sphere,
        enumerator: &mut N,
    ) -> IterationControl
    where
        S: MembershipSource,
        N: PartitionEnumerator<E>,
    {
        self.enumerate_overlapping(source, mask, &sphere.bounds(), &SphereTest(*sphere), enumerator)
    }

    /// Reports every accepted entity whose padded box contains `point`.
    pub fn enumerate_at_point<S, N>(
        &self,
        source: &S,
        mask: ListMask,
        point: Vec3,
        enumerator: &mut N,
    ) -> IterationControl
    where
        S: MembershipSource,
        N: PartitionEnumerator<E>,
    {
        let cell = self.grid.voxel_of(point, 0);
        self.run_query(source, mask, &PointTest(point), enumerator, Traversal::Cell(cell))
    }

    /// Reports every accepted entity touched by `ray` inside the world.
    ///
    /// Swept boxes (non-zero `ray.extents`) report everything the moving
    /// box overlaps at some point of the segment.
    pub fn enumerate_along_ray<S, N>(
        &self,
        source: &S,
        mask: ListMask,
        ray: &Ray,
        enumerator: &mut N,
    ) -> IterationControl
    where
        S: MembershipSource,
        N: PartitionEnumerator<E>,
    {
        let Some((t_min, t_max)) = ray.clip(self.grid.world(), 0.0, 1.0) else {
            return IterationControl::Continue;
        };
        let test = RayTest {
            ray: *ray,
            t_min,
            t_max,
        };
        self.run_query(source, mask, &test, enumerator, Traversal::Sweep { ray, t_min, t_max })
    }

    fn enumerate_overlapping<S, T, N>(
        &self,
        source: &S,
        mask: ListMask,
        volume: &Aabb,
        test: &T,
        enumerator: &mut N,
    ) -> IterationControl
    where
        S: MembershipSource,
        T: IntersectionTest,
        N: PartitionEnumerator<E>,
    {
        let range = self.grid.range_of(&volume.clamped(self.grid.world()), 0);
        self.run_query(source, mask, test, enumerator, Traversal::Range(range))
    }

    /// Runs `traversal` on every occupied level, finest first.
    fn run_query<S, T, N>(
        &self,
        source: &S,
        mask: ListMask,
        test: &T,
        enumerator: &mut N,
        traversal: Traversal<'_>,
    ) -> IterationControl
    where
        S: MembershipSource,
        T: IntersectionTest,
        N: PartitionEnumerator<E>,
    {
        if mask.is_empty() {
            return IterationControl::Continue;
        }
        let _scope = QueryScope::enter(self.id);
        let state = self.state.read_recursive();
        if state.element_count == 0 {
            return IterationControl::Continue;
        }
        let mut visited = self.visits.begin_visit(state.next_visit_bit);
        let mut visitor = QueryVisitor {
            entries: &state.entries,
            visited: &mut visited,
            source,
            mask,
            test,
            enumerator,
        };
        let shift = self.grid.level_shift();
        for hash in state.levels.iter().filter(|h| !h.is_empty()) {
            let up = hash.level() * shift;
            let control = match traversal {
                Traversal::Range(range) => hash.enumerate_range(range.next_level(up), &mut visitor),
                Traversal::Cell(cell) => hash.enumerate_voxel(cell.next_level(up).key(), &mut visitor),
                Traversal::Sweep { ray, t_min, t_max } => {
                    hash.walk_sweep(&self.grid, ray, t_min, t_max, &mut visitor)
                }
            };
            if control.is_stop() {
                return IterationControl::Stop;
            }
        }
        IterationControl::Continue
    }

    /// Per-level occupancy.
    #[must_use]
    pub fn stats(&self) -> TreeStats {
        let state = self.state.read_recursive();
        TreeStats {
            name: self.name.clone(),
            entities: state.element_count,
            levels: state.levels.iter().map(|l| l.stats(&self.grid)).collect(),
        }
    }

    /// Unlinks every entity and forgets all visit bits.
    pub fn shutdown(&self) {
        self.assert_not_querying();
        let mut state = self.state.write();
        for level in &mut state.levels {
            level.clear();
        }
        state.entries.clear();
        state.free_visit_bits.clear();
        state.next_visit_bit = 0;
        state.element_count = 0;
        debug!(tree = %self.name, "voxel tree cleared");
    }
}

/// Cells a query looks at, expressed on the finest level.
#[derive(Clone, Copy)]
enum Traversal<'r> {
    Range(VoxelRange),
    Cell(VoxelCoord),
    Sweep { ray: &'r Ray, t_min: f32, t_max: f32 },
}

/// Filters raw cell hits down to what the enumerator should see.
struct QueryVisitor<'a, E, S, T, N> {
    entries: &'a [Option<TreeEntry<E>>],
    visited: &'a mut VisitBits,
    source: &'a S,
    mask: ListMask,
    test: &'a T,
    enumerator: &'a mut N,
}

impl<E, S, T, N> VoxelVisitor for QueryVisitor<'_, E, S, T, N>
where
    E: Copy,
    S: MembershipSource,
    T: IntersectionTest,
    N: PartitionEnumerator<E>,
{
    #[inline]
    fn visit(&mut self, handle: u32) -> IterationControl {
        let Some(Some(entry)) = self.entries.get(handle as usize) else {
            return IterationControl::Continue;
        };
        if self.visited.test_and_set(entry.visit_bit) {
            return IterationControl::Continue;
        }
        if !self.source.accepts(handle, self.mask) || !self.test.intersects(&entry.bounds) {
            return IterationControl::Continue;
        }
        self.enumerator.on_element(entry.element)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Collector;

    fn tree() -> VoxelTree<u32> {
        let config = PartitionConfig::with_world(Vec3::splat(-512.0), Vec3::splat(512.0));
        VoxelTree::new("test", &config)
    }

    fn everyone(_: u32, _: ListMask) -> bool {
        true
    }

    fn cube(center: Vec3, half: f32) -> Aabb {
        Aabb::from_center(center, Vec3::splat(half))
    }

    fn in_box(tree: &VoxelTree<u32>, aabb: &Aabb) -> Vec<u32> {
        let mut found = Collector::new();
        tree.enumerate_in_box(&everyone, ListMask::ALL, aabb, &mut found);
        found.elements.sort_unstable();
        found.elements
    }

    #[test]
    fn test_level_choice() {
        let tree = tree();
        assert_eq!(tree.choose_level(&cube(Vec3::ZERO, 1.0)), 0);
        // 32 wide does not fit strictly inside a 32 cell.
        assert_eq!(tree.choose_level(&cube(Vec3::ZERO, 16.0)), 1);
        assert_eq!(tree.choose_level(&cube(Vec3::ZERO, 100.0)), 3);
        assert_eq!(tree.choose_level(&cube(Vec3::ZERO, 400.0)), 3);
    }

    #[test]
    fn test_insert_query_remove() {
        let tree = tree();
        tree.insert(0, 100, &cube(Vec3::ZERO, 5.0));
        tree.insert(1, 101, &cube(Vec3::splat(200.0), 5.0));
        assert_eq!(tree.len(), 2);

        assert_eq!(in_box(&tree, &cube(Vec3::ZERO, 10.0)), vec![100]);
        assert_eq!(in_box(&tree, &cube(Vec3::ZERO, 300.0)), vec![100, 101]);

        assert!(tree.remove(0));
        assert!(!tree.remove(0));
        assert_eq!(in_box(&tree, &cube(Vec3::ZERO, 300.0)), vec![101]);
    }

    #[test]
    fn test_spanning_entity_reported_once() {
        let tree = tree();
        // Straddles the level-0 boundary at x = y = z = 0 (world min is -512).
        tree.insert(7, 7, &cube(Vec3::ZERO, 4.0));
        assert_eq!(tree.level_of(7), Some(0));
        assert_eq!(tree.voxel_count(7), Some(8));
        assert_eq!(in_box(&tree, &cube(Vec3::ZERO, 50.0)), vec![7]);
    }

    #[test]
    fn test_move_within_epsilon_is_noop() {
        let tree = tree();
        let bounds = cube(Vec3::new(10.0, 10.0, 10.0), 3.0);
        assert_eq!(tree.element_moved(3, 3, &bounds), MoveOutcome::Inserted);
        let cells = tree.voxel_count(3);
        let nudged = cube(Vec3::new(10.01, 10.0, 10.0), 3.0);
        assert_eq!(tree.element_moved(3, 3, &nudged), MoveOutcome::Unchanged);
        assert_eq!(tree.voxel_count(3), cells);
        assert_eq!(tree.cached_bounds(3), Some(bounds.bloated(tree.epsilon)));

        let far = cube(Vec3::new(-300.0, 0.0, 0.0), 60.0);
        assert_eq!(tree.element_moved(3, 3, &far), MoveOutcome::Reinserted);
        assert_eq!(tree.level_of(3), Some(2));
        assert!(in_box(&tree, &cube(Vec3::new(10.0, 10.0, 10.0), 1.0)).is_empty());
    }

    #[test]
    fn test_membership_filter() {
        let tree = tree();
        tree.insert(0, 0, &cube(Vec3::ZERO, 1.0));
        tree.insert(1, 1, &cube(Vec3::ZERO, 1.0));
        let only_odd = |handle: u32, _: ListMask| handle % 2 == 1;
        let mut found = Collector::new();
        tree.enumerate_at_point(&only_odd, ListMask::ALL, Vec3::ZERO, &mut found);
        assert_eq!(found.elements, vec![1]);
    }

    #[test]
    fn test_stop_aborts_all_levels() {
        let tree = tree();
        tree.insert(0, 0, &cube(Vec3::ZERO, 1.0));
        tree.insert(1, 1, &cube(Vec3::ZERO, 100.0));
        let mut found = Collector::with_limit(1);
        let control = tree.enumerate_in_box(&everyone, ListMask::ALL, &cube(Vec3::ZERO, 2.0), &mut found);
        assert!(control.is_stop());
        assert_eq!(found.elements.len(), 1);
    }

    #[test]
    fn test_ray_and_sphere() {
        let tree = tree();
        tree.insert(0, 0, &cube(Vec3::new(100.0, 0.0, 0.0), 2.0));
        tree.insert(1, 1, &cube(Vec3::new(100.0, 50.0, 0.0), 2.0));

        let mut hits = Collector::new();
        let ray = Ray::segment(Vec3::new(-400.0, 0.0, 0.0), Vec3::new(400.0, 0.0, 0.0));
        tree.enumerate_along_ray(&everyone, ListMask::ALL, &ray, &mut hits);
        assert_eq!(hits.elements, vec![0]);

        let mut swept = Collector::new();
        let sweep = Ray::swept(ray.start, Vec3::new(400.0, 0.0, 0.0), Vec3::splat(50.0));
        tree.enumerate_along_ray(&everyone, ListMask::ALL, &sweep, &mut swept);
        swept.elements.sort_unstable();
        assert_eq!(swept.elements, vec![0, 1]);

        let mut near = Collector::new();
        let sphere = Sphere::new(Vec3::new(100.0, 30.0, 0.0), 10.0);
        tree.enumerate_in_sphere(&everyone, ListMask::ALL, &sphere, &mut near);
        assert!(near.elements.is_empty());
    }

    #[test]
    fn test_visit_bits_recycled() {
        let tree = tree();
        for handle in 0..4 {
            tree.insert(handle, handle, &cube(Vec3::ZERO, 1.0));
        }
        for handle in 0..4 {
            tree.remove(handle);
        }
        tree.insert(9, 9, &cube(Vec3::ZERO, 1.0));
        assert_eq!(tree.state.read().next_visit_bit, 4);
        assert_eq!(in_box(&tree, &cube(Vec3::ZERO, 1.0)), vec![9]);
    }

    #[test]
    fn test_nested_query_gets_own_bits() {
        let tree = tree();
        tree.insert(0, 0, &cube(Vec3::ZERO, 1.0));
        tree.insert(1, 1, &cube(Vec3::splat(3.0), 1.0));
        let mut outer = Vec::new();
        let mut enumerator = |e: u32| {
            // The inner query must see both entities even though the
            // outer one has already marked some of them.
            assert_eq!(in_box(&tree, &cube(Vec3::ZERO, 10.0)), vec![0, 1]);
            outer.push(e);
            IterationControl::Continue
        };
        tree.enumerate_in_box(&everyone, ListMask::ALL, &cube(Vec3::ZERO, 10.0), &mut enumerator);
        outer.sort_unstable();
        assert_eq!(outer, vec![0, 1]);
        assert_eq!(tree.visits.idle_count(), 2);
    }

    #[test]
    fn test_stats_and_shutdown() {
        let tree = tree();
        tree.insert(0, 0, &cube(Vec3::ZERO, 4.0));
        let stats = tree.stats();
        assert_eq!(stats.entities, 1);
        assert_eq!(stats.levels.len(), 4);
        assert_eq!(stats.links(), 8);
        tree.shutdown();
        assert!(tree.is_empty());
        assert_eq!(tree.stats().links(), 0);
    }
}
