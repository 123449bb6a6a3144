//! Per-thread record of which partitions and trees are mid-query.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

thread_local! {
    /// Owners with a query running on this thread, innermost last.
    static ACTIVE: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// Hands out a process-unique id for a partition or tree.
pub fn next_owner_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// True if this thread is inside a query of `owner`.
#[must_use]
pub fn is_active(owner: u64) -> bool {
    ACTIVE.with(|active| active.borrow().contains(&owner))
}

/// Marks `owner` as mid-query on this thread until dropped.
///
/// Scopes nest; the guard is tied to the thread that created it.
#[must_use = "the scope ends as soon as the guard is dropped"]
pub struct QueryScope {
    owner: u64,
    _thread_bound: PhantomData<*const ()>,
}

impl QueryScope {
    /// Enters a query of `owner`.
    pub fn enter(owner: u64) -> Self {
        ACTIVE.with(|active| active.borrow_mut().push(owner));
        Self {
            owner,
            _thread_bound: PhantomData,
        }
    }
}

impl Drop for QueryScope {
    fn drop(&mut self) {
        ACTIVE.with(|active| {
            let mut active = active.borrow_mut();
            if let Some(pos) = active.iter().rposition(|&o| o == self.owner) {
                active.remove(pos);
            }
        });
    }
}
