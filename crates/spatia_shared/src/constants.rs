//! # Partition Constants
//!
//! Values baked into every partition regardless of its configuration.

/// Default padding applied to every entity box before it is hashed.
///
/// Moves smaller than this are absorbed without touching the hash.
pub const BOUNDS_EPSILON: f32 = 0.031_25;

/// Maximum number of query observers a partition accepts.
pub const MAX_QUERY_CALLBACKS: usize = 8;

/// Bits per axis in a packed voxel key.
pub const VOXEL_KEY_AXIS_BITS: u32 = 21;

/// Largest voxel index representable on one axis of a packed key.
pub const VOXEL_KEY_AXIS_MAX: u32 = (1 << VOXEL_KEY_AXIS_BITS) - 1;
