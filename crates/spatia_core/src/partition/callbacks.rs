//! Observers notified around every partition query.

use std::sync::Arc;

use parking_lot::RwLock;
use spatia_shared::{ListMask, MAX_QUERY_CALLBACKS};

use crate::error::{SpatialError, SpatialResult};

/// Shape of a query, as seen by [`QueryCallback`]s.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryKind {
    /// `enumerate_elements_in_box`
    Box,
    /// `enumerate_elements_in_sphere`
    Sphere,
    /// `enumerate_elements_along_ray`
    Ray,
    /// `enumerate_elements_at_point`
    Point,
}

/// Observer of partition queries (profiling, debug overlays).
///
/// Both hooks run on the querying thread, outside every tree lock.
pub trait QueryCallback: Send + Sync {
    /// Called before the query runs, with the mask after suppression.
    fn pre_query(&self, kind: QueryKind, mask: ListMask);

    /// Called after the query finished or was stopped.
    fn post_query(&self, kind: QueryKind, mask: ListMask);
}

type CallbackList = Arc<[Arc<dyn QueryCallback>]>;

/// Bounded set of installed callbacks.
///
/// Queries clone the current list once and iterate it without holding the
/// lock, so installing or removing a callback while queries are in flight
/// only affects queries that start afterwards.
pub(crate) struct CallbackRegistry {
    installed: RwLock<CallbackList>,
}

impl CallbackRegistry {
    pub(crate) fn new() -> Self {
        Self {
            installed: RwLock::new(Arc::from(Vec::new())),
        }
    }

    pub(crate) fn install(&self, callback: Arc<dyn QueryCallback>) -> SpatialResult<()> {
        let mut installed = self.installed.write();
        if installed.len() >= MAX_QUERY_CALLBACKS {
            return Err(SpatialError::CallbackLimit {
                max: MAX_QUERY_CALLBACKS,
            });
        }
        let mut list = installed.to_vec();
        list.push(callback);
        *installed = Arc::from(list);
        Ok(())
    }

    /// Removes `callback` (by identity). Returns false if it was not installed.
    pub(crate) fn remove(&self, callback: &Arc<dyn QueryCallback>) -> bool {
        let mut installed = self.installed.write();
        let before = installed.len();
        let list: Vec<_> = installed
            .iter()
            .filter(|c| !Arc::ptr_eq(c, callback))
            .cloned()
            .collect();
        let removed = list.len() != before;
        *installed = Arc::from(list);
        removed
    }

    pub(crate) fn snapshot(&self) -> CallbackList {
        Arc::clone(&self.installed.read())
    }

    pub(crate) fn clear(&self) {
        *self.installed.write() = Arc::from(Vec::new());
    }
}
