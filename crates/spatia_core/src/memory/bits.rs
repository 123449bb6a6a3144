//! # Visit Bits
//!
//! Per-query "already reported" bitvectors, pooled per tree.
//!
//! Every entity inserted into a tree is given a small dense visit index.
//! A query checks out a bitvector, sets the bit of each entity it reports
//! and hands the vector back when it finishes. Only the words actually
//! touched are cleared on return, so the cost of a query stays
//! proportional to what it visited rather than to the tree size.

use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;

/// A clear-on-return bitvector.
#[derive(Debug, Default)]
pub struct VisitBits {
    words: Vec<u64>,
    /// Indices of words with at least one bit set.
    touched: Vec<u32>,
}

impl VisitBits {
    /// Makes room for at least `bit_count` bits.
    pub fn ensure_len(&mut self, bit_count: u32) {
        let words = (bit_count as usize).div_ceil(64);
        if self.words.len() < words {
            self.words.resize(words, 0);
        }
    }

    /// Sets `bit` and returns whether it was already set.
    ///
    /// The vector grows on demand, so an index allocated after the vector
    /// was checked out is still handled.
    #[inline]
    pub fn test_and_set(&mut self, bit: u32) -> bool {
        let word = (bit / 64) as usize;
        let mask = 1u64 << (bit % 64);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let slot = &mut self.words[word];
        if *slot & mask != 0 {
            return true;
        }
        if *slot == 0 {
            self.touched.push(word as u32);
        }
        *slot |= mask;
        false
    }

    /// True if `bit` is set.
    #[inline]
    #[must_use]
    pub fn is_set(&self, bit: u32) -> bool {
        self.words
            .get((bit / 64) as usize)
            .is_some_and(|w| w & (1u64 << (bit % 64)) != 0)
    }

    /// Clears every bit that was set since the last reset.
    pub fn reset(&mut self) {
        for word in self.touched.drain(..) {
            self.words[word as usize] = 0;
        }
    }
}

/// Stack of idle bitvectors belonging to one tree.
///
/// Queries that nest (a query issued from inside another query's callback)
/// each get their own vector, so the inner query can never disturb the
/// outer one's visit state.
#[derive(Debug, Default)]
pub struct VisitPool {
    idle: Mutex<Vec<VisitBits>>,
}

impl VisitPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks out a cleared bitvector sized for `bit_count` bits.
    ///
    /// The vector goes back to the pool when the returned scope is dropped.
    pub fn begin_visit(&self, bit_count: u32) -> VisitScope<'_> {
        let mut bits = self.idle.lock().pop().unwrap_or_default();
        bits.ensure_len(bit_count);
        VisitScope {
            pool: self,
            bits: Some(bits),
        }
    }

    fn end_visit(&self, mut bits: VisitBits) {
        bits.reset();
        self.idle.lock().push(bits);
    }

    /// Number of idle vectors.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }
}

/// A checked-out bitvector; returns itself to the pool on drop.
pub struct VisitScope<'a> {
    pool: &'a VisitPool,
    bits: Option<VisitBits>,
}

impl Deref for VisitScope<'_> {
    type Target = VisitBits;

    fn deref(&self) -> &VisitBits {
        self.bits.as_ref().unwrap_or_else(|| unreachable!("visit bits taken before drop"))
    }
}

impl DerefMut for VisitScope<'_> {
    fn deref_mut(&mut self) -> &mut VisitBits {
        self.bits.as_mut().unwrap_or_else(|| unreachable!("visit bits taken before drop"))
    }
}

impl Drop for VisitScope<'_> {
    fn drop(&mut self) {
        if let Some(bits) = self.bits.take() {
            self.pool.end_visit(bits);
        }
    }
}
