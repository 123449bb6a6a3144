//! # Single-Level Voxel Hash
//!
//! Maps each occupied cell of one level to the chain of entities linked
//! into it.
//!
//! ```text
//!   buckets: key ──► bucket node ⇄ bucket node ⇄ bucket node   (one per entity in the cell)
//!                        ▲
//!   leaf chain:  entity ─┴─► leaf node ──► leaf node ──► ...   (one per cell of the entity)
//! ```
//!
//! Every (entity, cell) pair owns exactly one bucket node and one leaf
//! node. The leaf chain lets removal visit only the cells an entity
//! actually occupies; the doubly linked bucket chain makes each unlink
//! O(1).

use std::collections::HashMap;

use spatia_shared::{Aabb, Ray};

use crate::memory::{NodePool, NIL};
use crate::query::IterationControl;
use crate::voxel::coord::{VoxelGrid, VoxelKey, VoxelRange};

/// Receives the handle index of every entity linked into a visited cell.
///
/// The visitor owns all filtering (membership, hidden flag, duplicates,
/// exact shape test); the hash only walks chains.
pub trait VoxelVisitor {
    /// Called once per (entity, visited cell) pair.
    fn visit(&mut self, handle: u32) -> IterationControl;
}

/// Link of one entity into one cell's chain.
#[derive(Clone, Copy, Debug)]
struct BucketNode {
    handle: u32,
    prev: u32,
    next: u32,
}

/// Link of one cell into one entity's leaf chain.
#[derive(Clone, Copy, Debug)]
struct LeafNode {
    key: VoxelKey,
    bucket_node: u32,
    next: u32,
}

/// Occupancy counters for one level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LevelStats {
    /// Level number, 0 is finest.
    pub level: u32,
    /// Edge length of a cell in world units.
    pub cell_size: u32,
    /// Number of cells holding at least one entity.
    pub occupied_voxels: usize,
    /// Number of (entity, cell) links.
    pub links: usize,
}

/// Spatial hash of one resolution level.
#[derive(Debug)]
pub struct VoxelHash {
    level: u32,
    buckets: HashMap<VoxelKey, u32>,
    bucket_nodes: NodePool<BucketNode>,
    leaf_nodes: NodePool<LeafNode>,
}

impl VoxelHash {
    /// Creates an empty level.
    #[must_use]
    pub fn new(level: u32) -> Self {
        Self {
            level,
            buckets: HashMap::new(),
            bucket_nodes: NodePool::new(),
            leaf_nodes: NodePool::new(),
        }
    }

    /// Level number.
    #[inline]
    #[must_use]
    pub const fn level(&self) -> u32 {
        self.level
    }

    /// True if no entity is linked into this level.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Links `handle` into every cell of `range`.
    ///
    /// Returns the head of the new leaf chain, which the caller keeps to
    /// remove the entity later.
    pub fn insert(&mut self, handle: u32, range: VoxelRange) -> u32 {
        debug_assert!(!range.is_empty(), "inserting into an empty voxel range");
        let mut leaf_head = NIL;
        for coord in range.iter() {
            let key = coord.key();
            let head = self.buckets.entry(key).or_insert(NIL);
            let node = self.bucket_nodes.allocate(BucketNode {
                handle,
                prev: NIL,
                next: *head,
            });
            if let Some(old_head) = self.bucket_nodes.get_mut(*head) {
                old_head.prev = node;
            }
            *head = node;
            leaf_head = self.leaf_nodes.allocate(LeafNode {
                key,
                bucket_node: node,
                next: leaf_head,
            });
        }
        leaf_head
    }

    /// Unlinks an entity from every cell of its leaf chain.
    ///
    /// Returns the number of cells it occupied.
    pub fn remove(&mut self, leaf_head: u32) -> usize {
        let mut removed = 0;
        let mut cursor = leaf_head;
        while cursor != NIL {
            let Some(leaf) = self.leaf_nodes.free(cursor) else {
                debug_assert!(false, "broken leaf chain at node {cursor}");
                break;
            };
            self.unlink(leaf.key, leaf.bucket_node);
            removed += 1;
            cursor = leaf.next;
        }
        removed
    }

    fn unlink(&mut self, key: VoxelKey, index: u32) {
        let Some(node) = self.bucket_nodes.free(index) else {
            debug_assert!(false, "leaf references free bucket node {index}");
            return;
        };
        if let Some(prev) = self.bucket_nodes.get_mut(node.prev) {
            prev.next = node.next;
        } else if node.next == NIL {
            // Last entity in the cell.
            self.buckets.remove(&key);
        } else {
            self.buckets.insert(key, node.next);
        }
        if let Some(next) = self.bucket_nodes.get_mut(node.next) {
            next.prev = node.prev;
        }
    }

    /// Number of cells in a leaf chain.
    #[must_use]
    pub fn leaf_len(&self, leaf_head: u32) -> usize {
        self.leaf_keys(leaf_head).count()
    }

    /// Keys of every cell in a leaf chain, most recently linked first.
    pub fn leaf_keys(&self, leaf_head: u32) -> impl Iterator<Item = VoxelKey> + '_ {
        let mut cursor = leaf_head;
        std::iter::from_fn(move || {
            let leaf = self.leaf_nodes.get(cursor)?;
            cursor = leaf.next;
            Some(leaf.key)
        })
    }

    /// Walks the chain of one cell.
    #[inline]
    pub fn enumerate_voxel<V: VoxelVisitor>(&self, key: VoxelKey, visitor: &mut V) -> IterationControl {
        let Some(&head) = self.buckets.get(&key) else {
            return IterationControl::Continue;
        };
        let mut cursor = head;
        while let Some(node) = self.bucket_nodes.get(cursor) {
            if visitor.visit(node.handle).is_stop() {
                return IterationControl::Stop;
            }
            cursor = node.next;
        }
        IterationControl::Continue
    }

    /// Walks the chains of every cell in `range`.
    ///
    /// When the range covers more cells than are occupied, the occupied
    /// cells are scanned instead.
    pub fn enumerate_range<V: VoxelVisitor>(&self, range: VoxelRange, visitor: &mut V) -> IterationControl {
        if self.buckets.len() < range.len() {
            for &key in self.buckets.keys() {
                if range.contains(key.coord()) && self.enumerate_voxel(key, visitor).is_stop() {
                    return IterationControl::Stop;
                }
            }
            return IterationControl::Continue;
        }
        for coord in range.iter() {
            if self.enumerate_voxel(coord.key(), visitor).is_stop() {
                return IterationControl::Stop;
            }
        }
        IterationControl::Continue
    }

    /// Visits every cell touched by a ray or swept box between `t_min` and
    /// `t_max`.
    ///
    /// The walk keeps a window of cells covering the swept box at the
    /// current parameter. Each time the leading face crosses a cell
    /// boundary on some axis, only the newly entered slice on that axis is
    /// enumerated; the trailing side of the window is pulled in behind the
    /// box so the window never grows past the box extents. A plain ray is
    /// the one-cell window special case.
    pub fn walk_sweep<V: VoxelVisitor>(
        &self,
        grid: &VoxelGrid,
        ray: &Ray,
        t_min: f32,
        t_max: f32,
        visitor: &mut V,
    ) -> IterationControl {
        let level = self.level;
        let cell_size = grid.cell_size(level);
        let max_cell = grid.max_coord(level);

        let center = ray.point_at(t_min);
        let start_box = Aabb::from_center(center, ray.extents).clamped(grid.world());
        let mut window = grid.range_of(&start_box, level);
        if self.enumerate_range(window, visitor).is_stop() {
            return IterationControl::Stop;
        }

        let mut step = [0i32; 3];
        let mut next_t = [f32::INFINITY; 3];
        let mut t_delta = [f32::INFINITY; 3];
        for axis in 0..3 {
            let delta = ray.delta[axis];
            if delta == 0.0 {
                continue;
            }
            let (dir, lead, boundary) = if delta > 0.0 {
                let cell = window.max.axis(axis);
                (1, center[axis] + ray.extents[axis], grid.cell_boundary(axis, cell + 1, level))
            } else {
                let cell = window.min.axis(axis);
                (-1, center[axis] - ray.extents[axis], grid.cell_boundary(axis, cell, level))
            };
            step[axis] = dir;
            next_t[axis] = t_min + (boundary - lead) / delta;
            t_delta[axis] = cell_size / delta.abs();
        }

        loop {
            let axis = min_axis(&next_t);
            let t = next_t[axis];
            if t > t_max {
                return IterationControl::Continue;
            }
            next_t[axis] += t_delta[axis];

            let dir = step[axis];
            let (leading, limit) = if dir > 0 {
                (window.max.axis(axis) + 1, max_cell.axis(axis))
            } else {
                (window.min.axis(axis) - 1, 0)
            };
            if (dir > 0 && leading > limit) || (dir < 0 && leading < limit) {
                // The box left the grid on this axis; later crossings add nothing.
                next_t[axis] = f32::INFINITY;
                continue;
            }

            // A plain ray occupies exactly one cell per axis.
            let trailing = if ray.is_ray() {
                leading
            } else {
                self.trailing_cell(grid, ray, axis, t)
            };
            if dir > 0 {
                *window.max.axis_mut(axis) = leading;
                let lo = window.min.axis_mut(axis);
                *lo = (*lo).max(trailing).min(leading);
            } else {
                *window.min.axis_mut(axis) = leading;
                let hi = window.max.axis_mut(axis);
                *hi = (*hi).min(trailing).max(leading);
            }

            let mut slice = window;
            *slice.min.axis_mut(axis) = leading;
            *slice.max.axis_mut(axis) = leading;
            if self.enumerate_range(slice, visitor).is_stop() {
                return IterationControl::Stop;
            }
        }
    }

    /// Cell of the swept box's trailing face on `axis` at parameter `t`.
    ///
    /// The face is pulled back by a small slack so rounding at the crossing
    /// parameter can never drop a cell the box still overlaps.
    fn trailing_cell(&self, grid: &VoxelGrid, ray: &Ray, axis: usize, t: f32) -> i32 {
        let delta = ray.delta[axis];
        let extent = ray.extents[axis];
        let cell_size = grid.cell_size(self.level);
        let slack = cell_size * 1.0e-3;
        let face = if delta > 0.0 {
            ray.start[axis] + delta * t - extent - slack
        } else {
            ray.start[axis] + delta * t + extent + slack
        };
        let rel = face - grid.world().min[axis];
        let cell = (rel / cell_size).floor() as i32;
        cell.clamp(0, grid.max_coord(self.level).axis(axis))
    }

    /// Unlinks everything, keeping allocations.
    pub fn clear(&mut self) {
        self.buckets.clear();
        self.bucket_nodes.clear();
        self.leaf_nodes.clear();
    }

    /// Occupancy counters.
    #[must_use]
    pub fn stats(&self, grid: &VoxelGrid) -> LevelStats {
        LevelStats {
            level: self.level,
            cell_size: grid.cell_size(self.level) as u32,
            occupied_voxels: self.buckets.len(),
            links: self.bucket_nodes.allocated_count(),
        }
    }
}

#[inline]
fn min_axis(t: &[f32; 3]) -> usize {
    if t[0] <= t[1] {
        if t[0] <= t[2] {
            0
        } else {
            2
        }
    } else if t[1] <= t[2] {
        1
    } else {
        2
    }
}
