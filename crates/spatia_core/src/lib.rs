//! # SPATIA Core
//!
//! Multi-resolution spatial partition for simulation entities:
//! - Box, sphere, ray, swept-box and point queries
//! - Many concurrent readers, incremental insert/move/remove
//! - Entities may be moved from inside a running query
//!
//! ## Architecture Rules
//!
//! 1. **No pointers between structures** - everything links by `u32` index
//! 2. **One level per entity** - the finest level its padded box fits in
//! 3. **Queries never fail** - misuse is a `debug_assert!`, only setup returns errors
//!
//! ## Example
//!
//! ```rust,ignore
//! use spatia_core::{Aabb, Collector, ListMask, SpatialPartition, Vec3};
//!
//! let partition = SpatialPartition::new(Vec3::splat(-4096.0), Vec3::splat(4096.0))?;
//! let bounds = Aabb::new(Vec3::ZERO, Vec3::splat(2.0));
//! let handle = partition.create_handle_in(entity, ListMask::bit(0), &bounds)?;
//!
//! let mut near = Collector::new();
//! partition.enumerate_elements_in_box(ListMask::bit(0), &bounds.bloated(10.0), &mut near);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod error;
pub mod memory;
pub mod partition;
pub mod query;
pub mod sync;
pub mod voxel;

pub use config::{PartitionConfig, TreeGroupConfig, CLIENT_LISTS, SERVER_LISTS};
pub use error::{SpatialError, SpatialResult};
pub use partition::{
    HideToken, PartitionStats, QueryCallback, QueryKind, SpatialHandle, SpatialPartition,
};
pub use query::{Collector, IterationControl, PartitionEnumerator};
pub use voxel::{LevelStats, MoveOutcome, TreeStats, VoxelGrid, VoxelTree};

pub use spatia_shared::{Aabb, ListMask, Ray, Sphere, Vec3};
