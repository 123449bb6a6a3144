//! # Spatial Partition
//!
//! The facade the rest of the engine talks to. It owns the handle table,
//! one [`VoxelTree`] per configured list group, the query callbacks and
//! the queue of mutations deferred out of running queries.
//!
//! ## Handle Lifecycle
//!
//! ```text
//! create_handle ──► insert(mask) ──► insert_into_tree ──► element_moved ...
//!                                          │                   │
//!                                          ▼                   ▼
//!                                   hide / unhide       remove_from_tree ──► destroy_handle
//! ```
//!
//! Hiding is orthogonal to tree presence: a hidden entity stays linked and
//! is only skipped by the query filter.
//!
//! ## Mutating From Inside a Query
//!
//! Enumerators may call [`SpatialPartition::element_moved`] and friends on
//! the partition they are enumerating. Those calls are queued and applied,
//! in order, as soon as the outermost query on that thread returns.
//! Membership edits and hide/unhide are atomic flag updates and always take
//! effect immediately.

mod callbacks;
mod handles;
mod stats;

pub use callbacks::{QueryCallback, QueryKind};
pub use handles::{HandleRecord, HandleTable, SpatialHandle};
pub use stats::PartitionStats;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use spatia_shared::{Aabb, ListMask, Ray, Sphere, Vec3};
use tracing::{debug, info, trace};

use crate::config::PartitionConfig;
use crate::error::SpatialResult;
use crate::query::{IterationControl, PartitionEnumerator};
use crate::sync::{self, DeferredQueue, QueryScope};
use crate::voxel::{MoveOutcome, VoxelTree};
use callbacks::CallbackRegistry;

/// Proof of a [`SpatialPartition::hide_element`] call.
///
/// Hiding nests: only the token of the call that actually hid the entity
/// makes it visible again.
#[must_use = "pass the token to unhide_element"]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HideToken {
    was_hidden: bool,
}

impl HideToken {
    /// True if the entity was already hidden when this token was issued.
    #[must_use]
    pub const fn was_hidden(self) -> bool {
        self.was_hidden
    }
}

/// A tree mutation waiting for the outermost query to finish.
#[derive(Clone, Copy, Debug)]
enum DeferredOp {
    InsertIntoTree(SpatialHandle, Aabb),
    RemoveFromTree(SpatialHandle),
    Moved(SpatialHandle, Aabb),
    Destroy(SpatialHandle),
}

struct TreeSlot<E> {
    lists: ListMask,
    tree: VoxelTree<E>,
}

/// Multi-resolution spatial index over caller elements of type `E`.
///
/// `E` is whatever the caller wants handed back by queries, typically an
/// entity id. Every method takes `&self`; share the partition between
/// threads by reference or `Arc`.
pub struct SpatialPartition<E> {
    id: u64,
    config: PartitionConfig,
    handles: HandleTable<E>,
    trees: Vec<TreeSlot<E>>,
    deferred: DeferredQueue<DeferredOp>,
    callbacks: CallbackRegistry,
    suppressed: AtomicU64,
}

impl<E: Copy> SpatialPartition<E> {
    /// Creates a partition with the default layout over the given world box.
    ///
    /// # Errors
    ///
    /// Returns an error if the world box is inverted, not finite, or too
    /// large for the default cell size.
    pub fn new(world_min: Vec3, world_max: Vec3) -> SpatialResult<Self> {
        Self::with_config(PartitionConfig::with_world(world_min, world_max))
    }

    /// Creates a partition from an explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns whatever [`PartitionConfig::validate`] reports.
    pub fn with_config(config: PartitionConfig) -> SpatialResult<Self> {
        config.validate()?;
        let trees = config
            .trees
            .iter()
            .map(|group| TreeSlot {
                lists: group.lists,
                tree: VoxelTree::new(group.name.clone(), &config),
            })
            .collect();
        info!(
            world_min = ?config.world_min,
            world_max = ?config.world_max,
            levels = config.level_count,
            trees = config.trees.len(),
            "spatial partition initialized"
        );
        Ok(Self {
            id: sync::next_owner_id(),
            handles: HandleTable::new(config.max_handles),
            trees,
            deferred: DeferredQueue::new(),
            callbacks: CallbackRegistry::new(),
            suppressed: AtomicU64::new(0),
            config,
        })
    }

    /// Configuration the partition was built with.
    #[must_use]
    pub const fn config(&self) -> &PartitionConfig {
        &self.config
    }

    /// Destroys every handle, empties every tree and uninstalls callbacks.
    ///
    /// The partition stays usable afterwards.
    pub fn shutdown(&self) {
        debug_assert!(!sync::is_active(self.id), "shutdown from inside a query");
        let dropped = std::iter::from_fn(|| self.deferred.pop()).count();
        for slot in &self.trees {
            slot.tree.shutdown();
        }
        let handles = self.handles.live_handles();
        for &handle in &handles {
            if let Some(record) = self.handles.live_record(handle) {
                for tree in 0..self.trees.len() {
                    record.set_in_tree(tree, false);
                }
            }
            self.handles.destroy(handle);
        }
        self.callbacks.clear();
        self.suppressed.store(0, Ordering::Relaxed);
        info!(handles = handles.len(), dropped, "spatial partition shut down");
    }

    // ----- handles --------------------------------------------------------

    /// Allocates a handle with no lists and no bounds.
    ///
    /// # Errors
    ///
    /// [`SpatialError::HandlesExhausted`](crate::SpatialError::HandlesExhausted)
    /// when `max_handles` handles are live.
    pub fn create_handle(&self, element: E) -> SpatialResult<SpatialHandle> {
        self.handles.create(element)
    }

    /// Allocates a handle, assigns `lists` and links it with `bounds`.
    ///
    /// # Errors
    ///
    /// Same as [`create_handle`](Self::create_handle).
    pub fn create_handle_in(
        &self,
        element: E,
        lists: ListMask,
        bounds: &Aabb,
    ) -> SpatialResult<SpatialHandle> {
        let handle = self.handles.create(element)?;
        self.insert(lists, handle);
        self.insert_into_tree(handle, bounds);
        Ok(handle)
    }

    /// Unlinks `handle` from every tree and frees it.
    pub fn destroy_handle(&self, handle: SpatialHandle) {
        if self.handles.record(handle).is_some() {
            self.mutate(DeferredOp::Destroy(handle));
        }
    }

    /// Number of live handles.
    #[must_use]
    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    /// The element stored with `handle`.
    #[must_use]
    pub fn element(&self, handle: SpatialHandle) -> Option<E> {
        self.handles.element(handle)
    }

    // ----- membership -----------------------------------------------------

    /// Adds `handle` to `lists`.
    pub fn insert(&self, lists: ListMask, handle: SpatialHandle) {
        self.remove_and_insert(ListMask::NONE, lists, handle);
    }

    /// Removes `handle` from `lists`.
    pub fn remove(&self, lists: ListMask, handle: SpatialHandle) {
        self.remove_and_insert(lists, ListMask::NONE, handle);
    }

    /// Removes `handle` from `remove` and adds it to `insert` in one step.
    ///
    /// Only the membership mask changes; tree links are untouched until the
    /// next [`insert_into_tree`](Self::insert_into_tree) or
    /// [`remove_from_tree`](Self::remove_from_tree).
    pub fn remove_and_insert(&self, remove: ListMask, insert: ListMask, handle: SpatialHandle) {
        if let Some(record) = self.handles.record(handle) {
            record.edit_lists(remove, insert);
        }
    }

    /// Current list membership of `handle`.
    #[must_use]
    pub fn list_mask(&self, handle: SpatialHandle) -> ListMask {
        self.handles
            .record(handle)
            .map_or(ListMask::NONE, HandleRecord::lists)
    }

    // ----- geometry -------------------------------------------------------

    /// Links `handle` with `bounds` into every tree its lists belong to.
    ///
    /// Trees the handle is already linked into are left alone, and so is
    /// its recorded [`bounds`](Self::bounds) when no tree was linked.
    pub fn insert_into_tree(&self, handle: SpatialHandle, bounds: &Aabb) {
        if self.handles.record(handle).is_some() {
            self.mutate(DeferredOp::InsertIntoTree(handle, *bounds));
        }
    }

    /// Unlinks `handle` from every tree it is linked into.
    pub fn remove_from_tree(&self, handle: SpatialHandle) {
        if self.handles.record(handle).is_some() {
            self.mutate(DeferredOp::RemoveFromTree(handle));
        }
    }

    /// Tells the partition `handle` now occupies `bounds`.
    ///
    /// Links the handle into trees of its lists it is not linked into yet.
    pub fn element_moved(&self, handle: SpatialHandle, bounds: &Aabb) {
        if self.handles.record(handle).is_some() {
            self.mutate(DeferredOp::Moved(handle, *bounds));
        }
    }

    /// Bounds the trees hold for `handle`, [`Aabb::EMPTY`] before it was
    /// first linked.
    #[must_use]
    pub fn bounds(&self, handle: SpatialHandle) -> Option<Aabb> {
        self.handles.bounds(handle)
    }

    /// Hides `handle` from every query without unlinking it.
    pub fn hide_element(&self, handle: SpatialHandle) -> HideToken {
        let was_hidden = self
            .handles
            .record(handle)
            .is_some_and(|record| record.set_hidden(true));
        HideToken { was_hidden }
    }

    /// Undoes the [`hide_element`](Self::hide_element) call that issued `token`.
    pub fn unhide_element(&self, handle: SpatialHandle, token: HideToken) {
        if token.was_hidden {
            return;
        }
        if let Some(record) = self.handles.record(handle) {
            record.set_hidden(false);
        }
    }

    /// True if `handle` is hidden.
    #[must_use]
    pub fn is_hidden(&self, handle: SpatialHandle) -> bool {
        self.handles.record(handle).is_some_and(HandleRecord::is_hidden)
    }

    // ----- queries --------------------------------------------------------

    /// Reports every element in `lists` whose padded bounds touch `aabb`.
    pub fn enumerate_elements_in_box<N>(
        &self,
        lists: ListMask,
        aabb: &Aabb,
        enumerator: &mut N,
    ) -> IterationControl
    where
        N: PartitionEnumerator<E>,
    {
        self.run_query(QueryKind::Box, lists, |tree, mask| {
            tree.enumerate_in_box(&self.handles, mask, aabb, enumerator)
        })
    }

    /// Reports every element in `lists` whose padded bounds touch `sphere`.
    pub fn enumerate_elements_in_sphere<N>(
        &self,
        lists: ListMask,
        sphere: &Sphere,
        enumerator: &mut N,
    ) -> IterationControl
    where
        N: PartitionEnumerator<E>,
    {
        self.run_query(QueryKind::Sphere, lists, |tree, mask| {
            tree.enumerate_in_sphere(&self.handles, mask, sphere, enumerator)
        })
    }

    /// Reports every element in `lists` touched by `ray` (or the box it
    /// sweeps) within the world bounds.
    pub fn enumerate_elements_along_ray<N>(
        &self,
        lists: ListMask,
        ray: &Ray,
        enumerator: &mut N,
    ) -> IterationControl
    where
        N: PartitionEnumerator<E>,
    {
        self.run_query(QueryKind::Ray, lists, |tree, mask| {
            tree.enumerate_along_ray(&self.handles, mask, ray, enumerator)
        })
    }

    /// Reports every element in `lists` whose padded bounds contain `point`.
    pub fn enumerate_elements_at_point<N>(
        &self,
        lists: ListMask,
        point: Vec3,
        enumerator: &mut N,
    ) -> IterationControl
    where
        N: PartitionEnumerator<E>,
    {
        self.run_query(QueryKind::Point, lists, |tree, mask| {
            tree.enumerate_at_point(&self.handles, mask, point, enumerator)
        })
    }

    fn run_query<F>(&self, kind: QueryKind, lists: ListMask, query: F) -> IterationControl
    where
        F: FnOnce(&VoxelTree<E>, ListMask) -> IterationControl,
    {
        let mask = lists & !self.suppressed_lists();
        let callbacks = self.callbacks.snapshot();
        for callback in callbacks.iter() {
            callback.pre_query(kind, mask);
        }

        let control = match self.route(mask) {
            Some(tree) => {
                let _scope = QueryScope::enter(self.id);
                query(tree, mask)
            }
            None => IterationControl::Continue,
        };

        for callback in callbacks.iter() {
            callback.post_query(kind, mask);
        }
        self.flush_deferred();
        control
    }

    /// The tree whose list group `mask` names.
    fn route(&self, mask: ListMask) -> Option<&VoxelTree<E>> {
        if mask.is_empty() {
            return None;
        }
        let mut matching = self.trees.iter().filter(|slot| slot.lists.intersects(mask));
        let first = matching.next()?;
        debug_assert!(
            matching.next().is_none(),
            "query mask {mask:?} spans more than one tree"
        );
        Some(&first.tree)
    }

    // ----- observers ------------------------------------------------------

    /// Adds an observer called around every query.
    ///
    /// Takes effect for queries that start after the call.
    ///
    /// # Errors
    ///
    /// [`SpatialError::CallbackLimit`](crate::SpatialError::CallbackLimit)
    /// when [`MAX_QUERY_CALLBACKS`](spatia_shared::MAX_QUERY_CALLBACKS)
    /// observers are installed.
    pub fn install_query_callback(&self, callback: Arc<dyn QueryCallback>) -> SpatialResult<()> {
        self.callbacks.install(callback)
    }

    /// Removes an observer. Returns false if it was not installed.
    pub fn remove_query_callback(&self, callback: &Arc<dyn QueryCallback>) -> bool {
        self.callbacks.remove(callback)
    }

    /// Masks `lists` out of every subsequent query.
    pub fn suppress_lists(&self, lists: ListMask) {
        self.suppressed.store(lists.bits(), Ordering::Relaxed);
    }

    /// Lists currently masked out of queries.
    #[must_use]
    pub fn suppressed_lists(&self) -> ListMask {
        ListMask(self.suppressed.load(Ordering::Relaxed))
    }

    /// Tree number `index` in configuration order.
    #[must_use]
    pub fn tree(&self, index: usize) -> Option<&VoxelTree<E>> {
        self.trees.get(index).map(|slot| &slot.tree)
    }

    /// Snapshot of handle and per-level counts, also written to the log.
    pub fn report_stats(&self) -> PartitionStats {
        let stats = PartitionStats {
            handles: self.handles.len(),
            pending_mutations: self.deferred.len(),
            trees: self.trees.iter().map(|slot| slot.tree.stats()).collect(),
        };
        stats.log();
        stats
    }

    // ----- mutation plumbing ----------------------------------------------

    /// Applies every queued mutation. Returns how many were applied.
    ///
    /// Does nothing while this thread is inside a query of this partition;
    /// the outermost query drains the queue when it returns.
    pub fn flush_deferred(&self) -> usize {
        if self.deferred.is_empty() || sync::is_active(self.id) {
            return 0;
        }
        let mut applied = 0;
        while let Some(op) = self.deferred.pop() {
            self.apply(op);
            applied += 1;
        }
        if applied > 0 {
            debug!(applied, "deferred mutations applied");
        }
        applied
    }

    /// Mutations waiting for a query to finish.
    #[must_use]
    pub fn pending_mutations(&self) -> usize {
        self.deferred.len()
    }

    fn mutate(&self, op: DeferredOp) {
        if sync::is_active(self.id) {
            trace!(?op, "mutation deferred until the query returns");
            self.deferred.push(op);
            return;
        }
        self.flush_deferred();
        self.apply(op);
    }

    /// Applies one mutation. Handles destroyed since it was queued are skipped.
    fn apply(&self, op: DeferredOp) {
        match op {
            DeferredOp::InsertIntoTree(handle, bounds) => self.link(handle, &bounds),
            DeferredOp::RemoveFromTree(handle) => self.unlink(handle),
            DeferredOp::Moved(handle, bounds) => self.moved(handle, &bounds),
            DeferredOp::Destroy(handle) => {
                self.unlink(handle);
                self.handles.destroy(handle);
            }
        }
    }

    fn link(&self, handle: SpatialHandle, bounds: &Aabb) {
        let Some(record) = self.handles.live_record(handle) else {
            return;
        };
        let Some(element) = self.handles.element(handle) else {
            return;
        };
        let lists = record.lists();
        let mut linked = false;
        for (index, slot) in self.trees.iter().enumerate() {
            if slot.lists.intersects(lists) && !record.set_in_tree(index, true) {
                slot.tree.insert(handle.index(), element, bounds);
                linked = true;
            }
        }
        if linked {
            self.handles.set_bounds(handle, *bounds);
        }
    }

    fn unlink(&self, handle: SpatialHandle) {
        let Some(record) = self.handles.live_record(handle) else {
            return;
        };
        for (index, slot) in self.trees.iter().enumerate() {
            if record.set_in_tree(index, false) {
                slot.tree.remove(handle.index());
            }
        }
    }

    fn moved(&self, handle: SpatialHandle, bounds: &Aabb) {
        let Some(record) = self.handles.live_record(handle) else {
            return;
        };
        let Some(element) = self.handles.element(handle) else {
            return;
        };
        let lists = record.lists();
        let mut tracked = false;
        for (index, slot) in self.trees.iter().enumerate() {
            if record.in_tree(index) || slot.lists.intersects(lists) {
                tracked = true;
                record.set_in_tree(index, true);
                let outcome = slot.tree.element_moved(handle.index(), element, bounds);
                if outcome == MoveOutcome::Reinserted {
                    trace!(?handle, tree = slot.tree.name(), "element relinked");
                }
            }
        }
        if tracked {
            self.handles.set_bounds(handle, *bounds);
        }
    }
}
