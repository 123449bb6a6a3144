//! # Spatial Handles
//!
//! Handles are lightweight identifiers consisting of:
//! - An index into the record table
//! - A generation counter for detecting stale handles
//!
//! Records live in [`StableSlots`], so queries read membership and the
//! hidden flag through atomics without ever touching the allocation lock.
//! Those reads are individually atomic but not synchronized with each
//! other: a query racing a membership edit sees either the old or the new
//! mask, never a torn one.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;
use spatia_shared::{Aabb, ListMask};

use crate::error::{SpatialError, SpatialResult};
use crate::memory::StableSlots;
use crate::voxel::MembershipSource;

/// Record flag: the slot holds a live handle.
const ALIVE: u32 = 1 << 0;
/// Record flag: skipped by every query.
const HIDDEN: u32 = 1 << 1;
/// First per-tree presence flag.
const IN_TREE_SHIFT: u32 = 8;

/// Stable identifier of one entity in a partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SpatialHandle {
    index: u32,
    generation: u32,
}

impl SpatialHandle {
    /// Null/invalid handle.
    pub const NULL: Self = Self {
        index: u32::MAX,
        generation: u32::MAX,
    };

    /// Creates a handle from index and generation.
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation of the slot when the handle was created.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Checks if this handle is null.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.index == u32::MAX
    }
}

impl Default for SpatialHandle {
    fn default() -> Self {
        Self::NULL
    }
}

/// Query-visible part of an entity record.
#[derive(Debug, Default)]
pub struct HandleRecord {
    generation: AtomicU32,
    lists: AtomicU64,
    flags: AtomicU32,
}

impl HandleRecord {
    /// Current list membership.
    #[inline]
    #[must_use]
    pub fn lists(&self) -> ListMask {
        ListMask(self.lists.load(Ordering::Relaxed))
    }

    /// Clears `remove` and then sets `insert`, as one atomic edit.
    ///
    /// Returns the previous membership.
    pub fn edit_lists(&self, remove: ListMask, insert: ListMask) -> ListMask {
        let update = |bits: u64| Some((bits & !remove.bits()) | insert.bits());
        let previous = self
            .lists
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, update)
            .unwrap_or_else(|bits| bits);
        ListMask(previous)
    }

    #[inline]
    fn flags(&self) -> u32 {
        self.flags.load(Ordering::Relaxed)
    }

    /// True while the slot holds a live handle.
    #[inline]
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.flags() & ALIVE != 0
    }

    /// True if hidden from queries.
    #[inline]
    #[must_use]
    pub fn is_hidden(&self) -> bool {
        self.flags() & HIDDEN != 0
    }

    /// Sets or clears the hidden flag, returning the previous state.
    pub fn set_hidden(&self, hidden: bool) -> bool {
        self.set_flag(HIDDEN, hidden)
    }

    /// True if flagged as linked into tree `tree`.
    #[inline]
    #[must_use]
    pub fn in_tree(&self, tree: usize) -> bool {
        self.flags() & tree_flag(tree) != 0
    }

    /// Sets or clears the presence flag of tree `tree`, returning the previous state.
    pub fn set_in_tree(&self, tree: usize, present: bool) -> bool {
        self.set_flag(tree_flag(tree), present)
    }

    fn set_flag(&self, flag: u32, on: bool) -> bool {
        let previous = if on {
            self.flags.fetch_or(flag, Ordering::Relaxed)
        } else {
            self.flags.fetch_and(!flag, Ordering::Relaxed)
        };
        previous & flag != 0
    }
}

#[inline]
const fn tree_flag(tree: usize) -> u32 {
    1 << (IN_TREE_SHIFT + tree as u32)
}

/// Caller data kept next to a record; only touched under the allocation lock.
#[derive(Clone, Copy, Debug)]
struct SlotData<E> {
    element: E,
    bounds: Aabb,
}

#[derive(Debug)]
struct Allocator<E> {
    free_list: Vec<u32>,
    next_index: u32,
    slots: Vec<Option<SlotData<E>>>,
}

/// Table of entity records with stable indices.
pub struct HandleTable<E> {
    records: StableSlots<HandleRecord>,
    max_handles: usize,
    allocator: Mutex<Allocator<E>>,
}

impl<E: Copy> HandleTable<E> {
    /// Creates a table for up to `max_handles` live handles.
    #[must_use]
    pub fn new(max_handles: usize) -> Self {
        Self {
            records: StableSlots::new(max_handles),
            max_handles,
            allocator: Mutex::new(Allocator {
                free_list: Vec::new(),
                next_index: 0,
                slots: Vec::new(),
            }),
        }
    }

    /// Allocates a record with no lists and [`Aabb::EMPTY`] bounds.
    ///
    /// # Errors
    ///
    /// [`SpatialError::HandlesExhausted`] when every slot is live.
    pub fn create(&self, element: E) -> SpatialResult<SpatialHandle> {
        let mut alloc = self.allocator.lock();
        let index = match alloc.free_list.pop() {
            Some(index) => index,
            None if (alloc.next_index as usize) < self.max_handles => {
                alloc.next_index += 1;
                alloc.next_index - 1
            }
            None => {
                return Err(SpatialError::HandlesExhausted {
                    max: self.max_handles,
                })
            }
        };
        let Some(record) = self.records.get_or_alloc(index as usize) else {
            return Err(SpatialError::HandlesExhausted {
                max: self.max_handles,
            });
        };
        record.lists.store(0, Ordering::Relaxed);
        record.flags.store(ALIVE, Ordering::Relaxed);

        let slot = index as usize;
        if alloc.slots.len() <= slot {
            alloc.slots.resize_with(slot + 1, || None);
        }
        alloc.slots[slot] = Some(SlotData {
            element,
            bounds: Aabb::EMPTY,
        });
        Ok(SpatialHandle::new(index, record.generation.load(Ordering::Relaxed)))
    }

    /// Frees the record of `handle` and returns its element.
    ///
    /// The caller unlinks the handle from every tree first.
    pub fn destroy(&self, handle: SpatialHandle) -> Option<E> {
        let mut alloc = self.allocator.lock();
        let record = self.live_record(handle)?;
        debug_assert!(
            record.flags() >> IN_TREE_SHIFT == 0,
            "handle {handle:?} destroyed while still linked into a tree"
        );
        record.flags.store(0, Ordering::Relaxed);
        record.lists.store(0, Ordering::Relaxed);
        record.generation.fetch_add(1, Ordering::Relaxed);
        let data = alloc.slots.get_mut(handle.index as usize).and_then(Option::take);
        alloc.free_list.push(handle.index);
        data.map(|d| d.element)
    }

    /// Record of a live handle.
    ///
    /// Stale or null handles are a contract violation.
    #[inline]
    #[must_use]
    pub fn record(&self, handle: SpatialHandle) -> Option<&HandleRecord> {
        let record = self.live_record(handle);
        debug_assert!(record.is_some(), "stale or invalid handle {handle:?}");
        record
    }

    /// Record of `handle` if it is still live; never asserts.
    #[inline]
    #[must_use]
    pub fn live_record(&self, handle: SpatialHandle) -> Option<&HandleRecord> {
        let record = self.records.get(handle.index as usize)?;
        (record.is_alive() && record.generation.load(Ordering::Relaxed) == handle.generation)
            .then_some(record)
    }

    /// True if `handle` refers to a live record.
    #[must_use]
    pub fn is_live(&self, handle: SpatialHandle) -> bool {
        self.live_record(handle).is_some()
    }

    /// The caller's element for `handle`.
    #[must_use]
    pub fn element(&self, handle: SpatialHandle) -> Option<E> {
        let alloc = self.allocator.lock();
        self.live_record(handle)?;
        alloc.slots.get(handle.index as usize)?.map(|d| d.element)
    }

    /// Remembers the last bounds given for `handle`.
    pub fn set_bounds(&self, handle: SpatialHandle, bounds: Aabb) {
        let mut alloc = self.allocator.lock();
        if self.live_record(handle).is_none() {
            return;
        }
        if let Some(Some(data)) = alloc.slots.get_mut(handle.index as usize) {
            data.bounds = bounds;
        }
    }

    /// Last bounds given for `handle`.
    #[must_use]
    pub fn bounds(&self, handle: SpatialHandle) -> Option<Aabb> {
        let alloc = self.allocator.lock();
        self.live_record(handle)?;
        alloc.slots.get(handle.index as usize)?.map(|d| d.bounds)
    }

    /// Number of live handles.
    #[must_use]
    pub fn len(&self) -> usize {
        let alloc = self.allocator.lock();
        alloc.next_index as usize - alloc.free_list.len()
    }

    /// True if no handle is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every live handle.
    #[must_use]
    pub fn live_handles(&self) -> Vec<SpatialHandle> {
        let alloc = self.allocator.lock();
        (0..alloc.next_index)
            .filter_map(|index| {
                let record = self.records.get(index as usize)?;
                record
                    .is_alive()
                    .then(|| SpatialHandle::new(index, record.generation.load(Ordering::Relaxed)))
            })
            .collect()
    }
}

impl<E> MembershipSource for HandleTable<E> {
    #[inline]
    fn accepts(&self, handle: u32, mask: ListMask) -> bool {
        let Some(record) = self.records.get(handle as usize) else {
            return false;
        };
        record.flags() & (ALIVE | HIDDEN) == ALIVE && record.lists().intersects(mask)
    }
}
