//! # Query Shapes and Enumerators
//!
//! One voxel traversal serves every query shape: the traversal decides
//! which cells to look at, an [`IntersectionTest`] decides whether a
//! candidate's box really touches the query volume, and a
//! [`PartitionEnumerator`] receives the survivors.

use spatia_shared::{Aabb, Ray, Sphere, Vec3};

/// Whether a traversal should keep going.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IterationControl {
    /// Keep enumerating.
    Continue,
    /// Abort the whole query; nothing else is reported.
    Stop,
}

impl IterationControl {
    /// True for [`IterationControl::Stop`].
    #[inline]
    #[must_use]
    pub const fn is_stop(self) -> bool {
        matches!(self, Self::Stop)
    }
}

/// Receives every element a query finds.
///
/// Any `FnMut(E) -> IterationControl` closure is an enumerator.
pub trait PartitionEnumerator<E> {
    /// Called once per matching element.
    fn on_element(&mut self, element: E) -> IterationControl;
}

impl<E, F> PartitionEnumerator<E> for F
where
    F: FnMut(E) -> IterationControl,
{
    #[inline]
    fn on_element(&mut self, element: E) -> IterationControl {
        self(element)
    }
}

/// Enumerator that gathers results, optionally stopping after `limit`.
#[derive(Debug, Clone)]
pub struct Collector<E> {
    /// Elements received so far, in report order.
    pub elements: Vec<E>,
    limit: Option<usize>,
}

impl<E> Collector<E> {
    /// Collects everything.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            elements: Vec::new(),
            limit: None,
        }
    }

    /// Stops the query once `limit` elements were received.
    #[must_use]
    pub const fn with_limit(limit: usize) -> Self {
        Self {
            elements: Vec::new(),
            limit: Some(limit),
        }
    }
}

impl<E> Default for Collector<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> PartitionEnumerator<E> for Collector<E> {
    fn on_element(&mut self, element: E) -> IterationControl {
        self.elements.push(element);
        match self.limit {
            Some(limit) if self.elements.len() >= limit => IterationControl::Stop,
            _ => IterationControl::Continue,
        }
    }
}

/// "Does this entity box touch my query volume?"
pub trait IntersectionTest {
    /// Exact test against a candidate's padded bounds.
    fn intersects(&self, bounds: &Aabb) -> bool;
}

/// Box query volume.
#[derive(Clone, Copy, Debug)]
pub struct BoxTest(pub Aabb);

impl IntersectionTest for BoxTest {
    #[inline]
    fn intersects(&self, bounds: &Aabb) -> bool {
        self.0.intersects(bounds)
    }
}

/// Sphere query volume.
#[derive(Clone, Copy, Debug)]
pub struct SphereTest(pub Sphere);

impl IntersectionTest for SphereTest {
    #[inline]
    fn intersects(&self, bounds: &Aabb) -> bool {
        self.0.intersects_aabb(bounds)
    }
}

/// Point query.
#[derive(Clone, Copy, Debug)]
pub struct PointTest(pub Vec3);

impl IntersectionTest for PointTest {
    #[inline]
    fn intersects(&self, bounds: &Aabb) -> bool {
        bounds.contains_point(self.0)
    }
}

/// Ray or swept box, limited to the part of the segment inside the world.
#[derive(Clone, Copy, Debug)]
pub struct RayTest {
    /// The query segment.
    pub ray: Ray,
    /// First parameter inside the world.
    pub t_min: f32,
    /// Last parameter inside the world.
    pub t_max: f32,
}

impl IntersectionTest for RayTest {
    #[inline]
    fn intersects(&self, bounds: &Aabb) -> bool {
        self.ray.clip(bounds, self.t_min, self.t_max).is_some()
    }
}
