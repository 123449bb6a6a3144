//! # List Masks
//!
//! Every entity in the partition belongs to zero or more named lists
//! ("solid", "trigger", "client static props" ...). The partition never
//! interprets the bits; the only contract is that a zero intersection
//! means "no match".

use serde::{Deserialize, Serialize};

/// Bitmask of list memberships (up to 64 lists).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct ListMask(pub u64);

impl ListMask {
    /// No lists.
    pub const NONE: Self = Self(0);

    /// Every list.
    pub const ALL: Self = Self(u64::MAX);

    /// The mask with only bit `index` set.
    ///
    /// # Arguments
    ///
    /// * `index` - List number (0-63)
    #[inline]
    #[must_use]
    pub const fn bit(index: u32) -> Self {
        Self(1 << index)
    }

    /// Raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// True if no list is named.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if the two masks share at least one list.
    #[inline]
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// True if every list in `other` is also in `self`.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ListMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for ListMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl std::ops::BitAnd for ListMask {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl std::ops::Not for ListMask {
    type Output = Self;
    fn not(self) -> Self {
        Self(!self.0)
    }
}

impl From<u64> for ListMask {
    fn from(bits: u64) -> Self {
        Self(bits)
    }
}
