//! # Stable Slots
//!
//! A growable array whose elements never move.
//!
//! Storage is split into fixed-size chunks that are allocated on first use
//! and never reallocated. A reader holding only `&StableSlots` can address
//! any slot by index while another thread grows the array, which is what
//! lets queries read entity records without taking the allocation lock.

use std::sync::OnceLock;

/// Slots per chunk (power of two).
const CHUNK_SHIFT: u32 = 10;
const CHUNK_LEN: usize = 1 << CHUNK_SHIFT;
const CHUNK_MASK: usize = CHUNK_LEN - 1;

/// Chunked array of `T` with stable element addresses.
///
/// `T` must provide its own interior mutability; this type only hands out
/// shared references.
pub struct StableSlots<T> {
    chunks: Box<[OnceLock<Box<[T]>>]>,
}

impl<T: Default> StableSlots<T> {
    /// Creates a table able to hold up to `max_slots` elements.
    ///
    /// Only the chunk directory is allocated up front.
    #[must_use]
    pub fn new(max_slots: usize) -> Self {
        let chunk_count = max_slots.div_ceil(CHUNK_LEN).max(1);
        Self {
            chunks: (0..chunk_count).map(|_| OnceLock::new()).collect(),
        }
    }

    /// Maximum number of slots.
    #[must_use]
    pub fn max_slots(&self) -> usize {
        self.chunks.len() * CHUNK_LEN
    }

    /// Number of chunks that have been allocated.
    #[must_use]
    pub fn allocated_chunks(&self) -> usize {
        self.chunks.iter().filter(|c| c.get().is_some()).count()
    }

    /// Returns the slot at `index`, allocating its chunk if needed.
    ///
    /// Returns `None` past [`max_slots`](Self::max_slots).
    pub fn get_or_alloc(&self, index: usize) -> Option<&T> {
        let chunk = self.chunks.get(index >> CHUNK_SHIFT)?;
        let slots = chunk.get_or_init(|| (0..CHUNK_LEN).map(|_| T::default()).collect());
        slots.get(index & CHUNK_MASK)
    }

    /// Returns the slot at `index` if its chunk exists.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.chunks
            .get(index >> CHUNK_SHIFT)?
            .get()?
            .get(index & CHUNK_MASK)
    }
}
