//! # Voxel Coordinate Codec
//!
//! Converts world positions to per-level cell indices and packs those
//! indices into hashable keys.
//!
//! Cell indices are measured from the world minimum corner, so they are
//! never negative. At level `L` a cell is `2^(base + L * level_shift)`
//! world units wide; going one level coarser is a right shift of every
//! axis by `level_shift`, independent of the level itself.

use spatia_shared::constants::{VOXEL_KEY_AXIS_BITS, VOXEL_KEY_AXIS_MAX};
use spatia_shared::{Aabb, Vec3};

use crate::config::PartitionConfig;

/// Cell index on one level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoxelCoord {
    /// X cell
    pub x: i32,
    /// Y cell
    pub y: i32,
    /// Z cell
    pub z: i32,
}

impl VoxelCoord {
    /// Creates a new coordinate.
    #[inline]
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The coordinate of the cell containing this one, `shift` levels up in
    /// cell-size exponent.
    #[inline]
    #[must_use]
    pub const fn next_level(self, shift: u32) -> Self {
        Self::new(self.x >> shift, self.y >> shift, self.z >> shift)
    }

    /// Component on `axis` (0 = x, 1 = y, 2 = z).
    #[inline]
    #[must_use]
    pub const fn axis(self, axis: usize) -> i32 {
        match axis {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }

    /// Mutable component on `axis`.
    #[inline]
    pub fn axis_mut(&mut self, axis: usize) -> &mut i32 {
        match axis {
            0 => &mut self.x,
            1 => &mut self.y,
            _ => &mut self.z,
        }
    }

    /// Packs the coordinate into a single key.
    #[inline]
    #[must_use]
    pub fn key(self) -> VoxelKey {
        debug_assert!(
            [self.x, self.y, self.z]
                .iter()
                .all(|&c| c >= 0 && c as u32 <= VOXEL_KEY_AXIS_MAX),
            "voxel coordinate {self:?} outside the key range"
        );
        let mask = u64::from(VOXEL_KEY_AXIS_MAX);
        VoxelKey(
            (self.x as u64 & mask)
                | ((self.y as u64 & mask) << VOXEL_KEY_AXIS_BITS)
                | ((self.z as u64 & mask) << (2 * VOXEL_KEY_AXIS_BITS)),
        )
    }
}

/// Packed voxel coordinate, the hash key of one cell on one level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoxelKey(pub u64);

impl VoxelKey {
    /// Unpacks the coordinate.
    #[inline]
    #[must_use]
    pub const fn coord(self) -> VoxelCoord {
        let mask = VOXEL_KEY_AXIS_MAX as u64;
        VoxelCoord::new(
            (self.0 & mask) as i32,
            ((self.0 >> VOXEL_KEY_AXIS_BITS) & mask) as i32,
            ((self.0 >> (2 * VOXEL_KEY_AXIS_BITS)) & mask) as i32,
        )
    }
}

/// Inclusive block of cells on one level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VoxelRange {
    /// Minimum cell (inclusive).
    pub min: VoxelCoord,
    /// Maximum cell (inclusive).
    pub max: VoxelCoord,
}

impl VoxelRange {
    /// Creates a range from its corner cells.
    #[must_use]
    pub const fn new(min: VoxelCoord, max: VoxelCoord) -> Self {
        Self { min, max }
    }

    /// The range covering the same space one step coarser.
    #[must_use]
    pub const fn next_level(self, shift: u32) -> Self {
        Self::new(self.min.next_level(shift), self.max.next_level(shift))
    }

    /// Number of cells covered.
    #[must_use]
    pub fn len(&self) -> usize {
        let span = |lo: i32, hi: i32| (hi - lo + 1).max(0) as usize;
        span(self.min.x, self.max.x) * span(self.min.y, self.max.y) * span(self.min.z, self.max.z)
    }

    /// True if the range covers no cells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if `coord` lies inside the range.
    #[must_use]
    pub fn contains(&self, coord: VoxelCoord) -> bool {
        (0..3).all(|a| coord.axis(a) >= self.min.axis(a) && coord.axis(a) <= self.max.axis(a))
    }

    /// Iterates every cell, x fastest.
    pub fn iter(&self) -> impl Iterator<Item = VoxelCoord> {
        let Self { min, max } = *self;
        (min.z..=max.z).flat_map(move |z| {
            (min.y..=max.y).flat_map(move |y| (min.x..=max.x).map(move |x| VoxelCoord::new(x, y, z)))
        })
    }
}

/// World-to-cell mapping shared by every level of a tree.
#[derive(Clone, Debug)]
pub struct VoxelGrid {
    world: Aabb,
    base_cell_shift: u32,
    level_shift: u32,
    level_count: u32,
    /// Highest valid cell on each level.
    max_coord: Vec<VoxelCoord>,
}

impl VoxelGrid {
    /// Builds the grid described by an already validated config.
    #[must_use]
    pub fn new(config: &PartitionConfig) -> Self {
        let world = Aabb::new(config.world_min, config.world_max);
        let mut grid = Self {
            world,
            base_cell_shift: config.base_cell_shift,
            level_shift: config.level_shift,
            level_count: config.level_count,
            max_coord: Vec::with_capacity(config.level_count as usize),
        };
        for level in 0..config.level_count {
            let coord = grid.raw_voxel_of(world.max, level);
            grid.max_coord.push(coord);
        }
        grid
    }

    /// World bounds.
    #[inline]
    #[must_use]
    pub const fn world(&self) -> &Aabb {
        &self.world
    }

    /// Number of levels.
    #[inline]
    #[must_use]
    pub const fn level_count(&self) -> u32 {
        self.level_count
    }

    /// Exponent difference between adjacent levels.
    #[inline]
    #[must_use]
    pub const fn level_shift(&self) -> u32 {
        self.level_shift
    }

    /// World-space edge length of a cell at `level`.
    #[inline]
    #[must_use]
    pub fn cell_size(&self, level: u32) -> f32 {
        debug_assert!(level < self.level_count, "level {level} out of range");
        (1u32 << (self.base_cell_shift + level * self.level_shift)) as f32
    }

    /// Highest valid cell on `level`.
    #[inline]
    #[must_use]
    pub fn max_coord(&self, level: u32) -> VoxelCoord {
        self.max_coord[level as usize]
    }

    /// Cell containing `point` on `level`, clamped into the grid.
    #[inline]
    #[must_use]
    pub fn voxel_of(&self, point: Vec3, level: u32) -> VoxelCoord {
        let raw = self.raw_voxel_of(point, level);
        let max = self.max_coord(level);
        VoxelCoord::new(
            raw.x.clamp(0, max.x),
            raw.y.clamp(0, max.y),
            raw.z.clamp(0, max.z),
        )
    }

    /// Cells overlapped by `aabb` on `level`.
    #[inline]
    #[must_use]
    pub fn range_of(&self, aabb: &Aabb, level: u32) -> VoxelRange {
        VoxelRange::new(self.voxel_of(aabb.min, level), self.voxel_of(aabb.max, level))
    }

    /// Lower world-space boundary of cell `index` on `axis` at `level`.
    #[inline]
    #[must_use]
    pub fn cell_boundary(&self, axis: usize, index: i32, level: u32) -> f32 {
        self.world.min[axis] + index as f32 * self.cell_size(level)
    }

    fn raw_voxel_of(&self, point: Vec3, level: u32) -> VoxelCoord {
        let inv = 1.0 / self.cell_size(level);
        let rel = point - self.world.min;
        let cell = |v: f32| (v * inv).floor() as i32;
        VoxelCoord::new(cell(rel.x), cell(rel.y), cell(rel.z))
    }
}
