//! # SPATIA Shared
//!
//! Geometry value types used by the spatial partition and by the systems
//! that call into it.
//!
//! ## CRITICAL RULE
//!
//! Everything here is `Copy` plain data. Nothing in this crate may lock,
//! allocate or know about the partition's internals.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod constants;
pub mod lists;
pub mod math;

pub use constants::{BOUNDS_EPSILON, MAX_QUERY_CALLBACKS};
pub use lists::ListMask;
pub use math::{Aabb, Ray, Sphere, Vec3};
