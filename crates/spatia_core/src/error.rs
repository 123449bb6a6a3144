//! # Partition Error Types
//!
//! Only setup can fail. Queries and mutations on a constructed partition
//! treat misuse as a contract violation (`debug_assert!`) instead of
//! returning errors, because they sit on the per-frame hot path.

use spatia_shared::Vec3;
use thiserror::Error;

/// Errors reported while configuring a partition.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum SpatialError {
    /// World bounds are not finite or are inverted on some axis.
    #[error("invalid world bounds: min {min:?}, max {max:?}")]
    InvalidWorldBounds {
        /// Requested minimum corner.
        min: Vec3,
        /// Requested maximum corner.
        max: Vec3,
    },

    /// Level count or shifts do not describe a usable level stack.
    #[error("invalid level layout: {level_count} levels, base shift {base_cell_shift}, level shift {level_shift}")]
    InvalidLevelLayout {
        /// Number of levels requested.
        level_count: u32,
        /// log2 of the finest cell size.
        base_cell_shift: u32,
        /// log2 of the size ratio between adjacent levels.
        level_shift: u32,
    },

    /// The finest level has more cells per axis than a voxel key can encode.
    #[error("world spans {cells} cells per axis at the finest level, limit is {limit}")]
    GridTooLarge {
        /// Cells needed on the widest axis.
        cells: u64,
        /// Largest encodable cell count.
        limit: u64,
    },

    /// Bounds padding must be finite and non-negative.
    #[error("invalid bounds epsilon: {0}")]
    InvalidEpsilon(f32),

    /// Tree list groups are empty or overlap.
    #[error("invalid tree groups: {0}")]
    InvalidTreeGroups(String),

    /// Handle capacity is zero or beyond the index space.
    #[error("invalid handle capacity: {0}")]
    InvalidHandleCapacity(usize),

    /// Configuration text could not be parsed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Every handle slot is in use.
    #[error("handle capacity exhausted ({max})")]
    HandlesExhausted {
        /// Configured handle capacity.
        max: usize,
    },

    /// All query callback slots are in use.
    #[error("query callback limit reached ({max})")]
    CallbackLimit {
        /// Number of callbacks allowed.
        max: usize,
    },
}

/// Result type for partition setup.
pub type SpatialResult<T> = Result<T, SpatialError>;
