//! # Memory Management
//!
//! Index-addressed pools backing the partition.
//!
//! ## Design Philosophy
//!
//! Nothing in the partition holds a pointer into another structure:
//! - Intrusive list links are `u32` indices into a [`NodePool`]
//! - Entity records live in [`StableSlots`] and never move
//! - Query scratch memory ([`VisitBits`]) is recycled, not reallocated

mod bits;
mod pool;
mod slots;

pub use bits::{VisitBits, VisitPool, VisitScope};
pub use pool::{NodePool, NIL};
pub use slots::StableSlots;
