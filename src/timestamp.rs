//! Hybrid (physical, logical) timestamps.
//!
//! A timestamp pairs a wall-clock millisecond with a logical counter that
//! orders timestamps issued within the same millisecond. The pair is totally
//! ordered: physical first, then logical.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of bits reserved for the logical counter in a composed timestamp.
pub const LOGICAL_BITS: u32 = 18;

/// Exclusive ceiling of the logical counter for one physical millisecond.
pub const MAX_LOGICAL: i64 = 1 << LOGICAL_BITS;

/// Exclusive ceiling of the physical part; larger values do not compose.
pub const MAX_PHYSICAL: i64 = 1 << (64 - LOGICAL_BITS);

/// A hybrid timestamp.
///
/// Field order matters: the derived `Ord` compares `physical` before
/// `logical`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Milliseconds since the Unix epoch.
    pub physical: i64,
    /// Sequence number within `physical`, always below [`MAX_LOGICAL`].
    pub logical: i64,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp {
        physical: 0,
        logical: 0,
    };

    #[must_use]
    pub const fn new(physical: i64, logical: i64) -> Self {
        Self { physical, logical }
    }

    /// The `n`-th timestamp of a block whose base is `self`.
    ///
    /// Allocation returns only the base of a reserved block; callers derive
    /// the rest with this helper.
    #[must_use]
    pub const fn next_logical(self, n: i64) -> Self {
        Self {
            physical: self.physical,
            logical: self.logical + n,
        }
    }

    /// Pack into a single `u64`: physical in the high bits, logical in the
    /// low [`LOGICAL_BITS`] bits.
    ///
    /// Composed values preserve the ordering of the pair as long as the
    /// logical part stays below [`MAX_LOGICAL`].
    #[must_use]
    pub fn compose(self) -> u64 {
        ((self.physical as u64) << LOGICAL_BITS) | (self.logical as u64 & (MAX_LOGICAL as u64 - 1))
    }

    /// Inverse of [`Timestamp::compose`].
    #[must_use]
    pub fn from_composed(value: u64) -> Self {
        Self {
            physical: (value >> LOGICAL_BITS) as i64,
            logical: (value & (MAX_LOGICAL as u64 - 1)) as i64,
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.physical, self.logical)
    }
}

impl From<Timestamp> for meridian_proto::meridian::v1::Timestamp {
    fn from(ts: Timestamp) -> Self {
        Self {
            physical: ts.physical,
            logical: ts.logical,
        }
    }
}

impl From<meridian_proto::meridian::v1::Timestamp> for Timestamp {
    fn from(ts: meridian_proto::meridian::v1::Timestamp) -> Self {
        Self {
            physical: ts.physical,
            logical: ts.logical,
        }
    }
}
