//! # Partition Configuration
//!
//! Loaded once at world load, either built in code or parsed from TOML:
//!
//! ```toml
//! world_min = { x = -4096.0, y = -4096.0, z = -1024.0 }
//! world_max = { x = 4096.0, y = 4096.0, z = 1024.0 }
//! base_cell_shift = 6
//! level_count = 4
//!
//! [[trees]]
//! name = "server"
//! lists = 15
//!
//! [[trees]]
//! name = "client"
//! lists = 240
//! ```

use serde::{Deserialize, Serialize};
use spatia_shared::constants::VOXEL_KEY_AXIS_MAX;
use spatia_shared::{ListMask, Vec3, BOUNDS_EPSILON};

use crate::error::{SpatialError, SpatialResult};

/// Most levels a tree may have.
pub const MAX_LEVELS: u32 = 8;

/// Most trees a partition may have; each needs a presence flag per record.
pub const MAX_TREES: usize = 16;

/// Largest cell size exponent; keeps every cell boundary exactly
/// representable as an `f32`.
const MAX_CELL_SHIFT: u32 = 24;

/// Lists handled by the default "server" tree.
pub const SERVER_LISTS: ListMask = ListMask(0x0000_0000_FFFF_FFFF);

/// Lists handled by the default "client" tree.
pub const CLIENT_LISTS: ListMask = ListMask(0xFFFF_FFFF_0000_0000);

/// One tree and the group of lists routed to it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TreeGroupConfig {
    /// Name used in logs and stats.
    pub name: String,
    /// Lists whose members are stored in this tree.
    pub lists: ListMask,
}

impl TreeGroupConfig {
    /// Creates a tree group.
    #[must_use]
    pub fn new(name: impl Into<String>, lists: ListMask) -> Self {
        Self {
            name: name.into(),
            lists,
        }
    }
}

/// Shape of a spatial partition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PartitionConfig {
    /// Minimum world corner; everything is clamped inside the world box.
    pub world_min: Vec3,
    /// Maximum world corner.
    pub world_max: Vec3,
    /// log2 of the finest cell size.
    pub base_cell_shift: u32,
    /// log2 of the size ratio between adjacent levels.
    pub level_shift: u32,
    /// Number of levels per tree.
    pub level_count: u32,
    /// Padding added to every entity box.
    pub epsilon: f32,
    /// Most handles that may exist at once.
    pub max_handles: usize,
    /// Trees and their list groups.
    pub trees: Vec<TreeGroupConfig>,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            world_min: Vec3::splat(-16384.0),
            world_max: Vec3::splat(16384.0),
            base_cell_shift: 5,
            level_shift: 1,
            level_count: 4,
            epsilon: BOUNDS_EPSILON,
            max_handles: 1 << 20,
            trees: vec![
                TreeGroupConfig::new("server", SERVER_LISTS),
                TreeGroupConfig::new("client", CLIENT_LISTS),
            ],
        }
    }
}

impl PartitionConfig {
    /// Default configuration over the given world box.
    #[must_use]
    pub fn with_world(world_min: Vec3, world_max: Vec3) -> Self {
        Self {
            world_min,
            world_max,
            ..Self::default()
        }
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`SpatialError::InvalidConfig`] on malformed TOML, otherwise whatever
    /// [`validate`](Self::validate) reports.
    pub fn from_toml_str(text: &str) -> SpatialResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| SpatialError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// log2 of the cell size at `level`.
    #[inline]
    #[must_use]
    pub const fn cell_shift(&self, level: u32) -> u32 {
        self.base_cell_shift + level * self.level_shift
    }

    /// Checks that the configuration describes a usable partition.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> SpatialResult<()> {
        let (min, max) = (self.world_min, self.world_max);
        if !min.is_finite() || !max.is_finite() || min.x >= max.x || min.y >= max.y || min.z >= max.z
        {
            return Err(SpatialError::InvalidWorldBounds { min, max });
        }

        let layout_ok = self.level_count >= 1
            && self.level_count <= MAX_LEVELS
            && self.level_shift >= 1
            && self.cell_shift(self.level_count - 1) <= MAX_CELL_SHIFT;
        if !layout_ok {
            return Err(SpatialError::InvalidLevelLayout {
                level_count: self.level_count,
                base_cell_shift: self.base_cell_shift,
                level_shift: self.level_shift,
            });
        }

        let base_cell = f64::from(1u32 << self.base_cell_shift);
        let widest = f64::from((max - min).max_element());
        // The cell holding `world_max` is the last one and must still fit a key.
        let cells = (widest / base_cell).floor() as u64 + 1;
        let limit = u64::from(VOXEL_KEY_AXIS_MAX) + 1;
        if cells > limit {
            return Err(SpatialError::GridTooLarge { cells, limit });
        }

        if !self.epsilon.is_finite() || self.epsilon < 0.0 {
            return Err(SpatialError::InvalidEpsilon(self.epsilon));
        }

        if self.max_handles == 0 || self.max_handles > u32::MAX as usize {
            return Err(SpatialError::InvalidHandleCapacity(self.max_handles));
        }

        if self.trees.is_empty() {
            return Err(SpatialError::InvalidTreeGroups("no trees configured".into()));
        }
        if self.trees.len() > MAX_TREES {
            return Err(SpatialError::InvalidTreeGroups(format!(
                "{} trees configured, at most {MAX_TREES} supported",
                self.trees.len()
            )));
        }
        let mut claimed = ListMask::NONE;
        for group in &self.trees {
            if group.lists.is_empty() {
                return Err(SpatialError::InvalidTreeGroups(format!(
                    "tree '{}' has no lists",
                    group.name
                )));
            }
            if claimed.intersects(group.lists) {
                return Err(SpatialError::InvalidTreeGroups(format!(
                    "tree '{}' shares lists with an earlier tree",
                    group.name
                )));
            }
            claimed |= group.lists;
        }
        Ok(())
    }
}
