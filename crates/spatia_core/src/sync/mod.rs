//! # Synchronization for Re-entrant Queries
//!
//! ## The Problem
//!
//! ```text
//! query(tree)            -> holds tree read lock
//!   enumerator(entity)   -> caller moves the entity
//!     element_moved      -> wants tree write lock   => DEADLOCK
//! ```
//!
//! ## The Solution: Deferred Mutation
//!
//! ```text
//! query(tree)            -> enters a QueryScope for the partition
//!   enumerator(entity)
//!     element_moved      -> scope is active on this thread: queue it
//! <- read lock released, scope left
//! drain queue            -> write lock taken, mutations applied in order
//! ```
//!
//! No lock is ever released and re-acquired behind a caller's back, so no
//! other writer can slip in while a query is half done.

mod deferred;
mod scope;

pub use deferred::DeferredQueue;
pub use scope::{is_active, next_owner_id, QueryScope};
