//! Fixed-width component bitsets used for family matching.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use crate::component::ComponentTypeId;

/// Maximum number of component types a registry can hold.
pub const MAX_COMPONENTS: usize = 256;

const WORDS: usize = MAX_COMPONENTS / 64;

/// A set of component types, one bit per [`ComponentTypeId`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FamilyMask {
    bits: [u64; WORDS],
}

impl FamilyMask {
    /// The empty mask.
    pub const EMPTY: FamilyMask = FamilyMask { bits: [0; WORDS] };

    /// Create an empty mask.
    pub fn new() -> Self {
        Self::EMPTY
    }

    /// Build a mask from a list of type ids.
    pub fn from_ids<I: IntoIterator<Item = ComponentTypeId>>(ids: I) -> Self {
        let mut mask = Self::EMPTY;
        for id in ids {
            mask.set(id);
        }
        mask
    }

    #[inline]
    fn split(id: ComponentTypeId) -> (usize, u64) {
        let idx = id.index();
        debug_assert!(idx < MAX_COMPONENTS, "{id:?} out of mask range");
        (idx / 64, 1u64 << (idx % 64))
    }

    #[inline]
    pub fn set(&mut self, id: ComponentTypeId) {
        let (word, bit) = Self::split(id);
        self.bits[word] |= bit;
    }

    #[inline]
    pub fn clear(&mut self, id: ComponentTypeId) {
        let (word, bit) = Self::split(id);
        self.bits[word] &= !bit;
    }

    #[inline]
    pub fn contains(&self, id: ComponentTypeId) -> bool {
        let (word, bit) = Self::split(id);
        self.bits[word] & bit != 0
    }

    /// Superset test: every bit of `required` is also set in `self`.
    #[inline]
    pub fn contains_all(&self, required: &FamilyMask) -> bool {
        self.bits
            .iter()
            .zip(required.bits.iter())
            .all(|(have, need)| have & need == *need)
    }

    /// Whether the two masks share at least one type.
    pub fn intersects(&self, other: &FamilyMask) -> bool {
        self.bits
            .iter()
            .zip(other.bits.iter())
            .any(|(a, b)| a & b != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|w| *w == 0)
    }

    /// Number of types in the mask.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Iterate over the set type ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = ComponentTypeId> + '_ {
        self.bits.iter().enumerate().flat_map(|(word, &bits)| {
            (0..64u32)
                .filter(move |bit| bits & (1u64 << bit) != 0)
                .map(move |bit| ComponentTypeId((word * 64) as u32 + bit))
        })
    }
}

impl BitOr for FamilyMask {
    type Output = FamilyMask;

    fn bitor(mut self, rhs: FamilyMask) -> FamilyMask {
        self |= rhs;
        self
    }
}

impl BitOrAssign for FamilyMask {
    fn bitor_assign(&mut self, rhs: FamilyMask) {
        for (a, b) in self.bits.iter_mut().zip(rhs.bits.iter()) {
            *a |= *b;
        }
    }
}

impl BitAnd for FamilyMask {
    type Output = FamilyMask;

    fn bitand(mut self, rhs: FamilyMask) -> FamilyMask {
        for (a, b) in self.bits.iter_mut().zip(rhs.bits.iter()) {
            *a &= *b;
        }
        self
    }
}

impl fmt::Debug for FamilyMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(|id| id.0)).finish()
    }
}
