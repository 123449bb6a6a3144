//! # Voxel Structures
//!
//! ```text
//! coord  world point -> cell index -> packed key
//! hash   one level: key -> chain of entities
//! tree   every level of one list group, behind one RwLock
//! ```

pub mod coord;
pub mod hash;
pub mod tree;

pub use coord::{VoxelCoord, VoxelGrid, VoxelKey, VoxelRange};
pub use hash::{LevelStats, VoxelHash, VoxelVisitor};
pub use tree::{MembershipSource, MoveOutcome, TreeStats, VoxelTree};
