//! In-memory allocation cursor.
//!
//! Pure state: every method is plain arithmetic so it can run under the
//! engine's lock. Anything needing I/O is reported back to the caller
//! (for instance [`Advance::NeedsWatermark`]) and handled outside the lock.

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::timestamp::{Timestamp, MAX_LOGICAL};

/// Outcome of moving the cursor forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Advance {
    /// The cursor was already at or past the target.
    Unchanged,
    Advanced,
    /// The target physical is not covered by the persisted watermark.
    NeedsWatermark(i64),
}

#[derive(Debug)]
pub(crate) struct Cursor {
    pub physical: i64,
    /// Next unreserved logical value for `physical`.
    pub logical: i64,
    /// Persisted watermark; every issued physical is strictly below it.
    pub saved_physical: i64,
    /// Checkpoint version the watermark was saved under.
    pub version: u64,
    /// Leadership epoch the cursor was initialized under.
    pub epoch: u64,
    pub ready: bool,
    /// Last time the physical part moved.
    pub updated_at: Option<Instant>,
    /// Last successful checkpoint save.
    pub last_saved_at: Option<Instant>,
    /// Cancelled when the cursor is invalidated; waits select on it.
    pub term: CancellationToken,
}

impl Default for Cursor {
    fn default() -> Self {
        let term = CancellationToken::new();
        term.cancel();
        Self {
            physical: 0,
            logical: 0,
            saved_physical: 0,
            version: 0,
            epoch: 0,
            ready: false,
            updated_at: None,
            last_saved_at: None,
            term,
        }
    }
}

impl Cursor {
    pub fn current(&self) -> Timestamp {
        Timestamp::new(self.physical, self.logical)
    }

    /// Reserve `count` consecutive logical values, returning the first.
    ///
    /// Returns `None` when the block would cross [`MAX_LOGICAL`].
    pub fn reserve(&mut self, count: i64) -> Option<Timestamp> {
        if self.logical + count > MAX_LOGICAL {
            return None;
        }
        let base = self.current();
        self.logical += count;
        Some(base)
    }

    /// Move the physical part to `next`, resetting logical.
    pub fn advance_physical(&mut self, next: i64) -> Advance {
        self.advance_to(Timestamp::new(next, 0))
    }

    /// Raise the cursor to `target` (never lowers it).
    pub fn advance_to(&mut self, target: Timestamp) -> Advance {
        if target <= self.current() {
            return Advance::Unchanged;
        }
        if target.physical >= self.saved_physical {
            return Advance::NeedsWatermark(target.physical);
        }
        if target.physical != self.physical {
            self.updated_at = Some(Instant::now());
        }
        self.physical = target.physical;
        self.logical = target.logical;
        Advance::Advanced
    }

    /// Drop all state and cancel the current term.
    pub fn invalidate(&mut self) {
        self.term.cancel();
        *self = Self::default();
    }

    /// Start a new term, cancelling the previous one.
    pub fn begin_term(&mut self) -> CancellationToken {
        self.invalidate();
        self.term = CancellationToken::new();
        self.term.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_cursor(physical: i64, saved: i64) -> Cursor {
        Cursor {
            physical,
            saved_physical: saved,
            ready: true,
            ..Cursor::default()
        }
    }

    #[test]
    fn test_reserve_consecutive_blocks() {
        let mut cursor = ready_cursor(1000, 4000);
        assert_eq!(cursor.reserve(1), Some(Timestamp::new(1000, 0)));
        assert_eq!(cursor.reserve(10), Some(Timestamp::new(1000, 1)));
        assert_eq!(cursor.reserve(1), Some(Timestamp::new(1000, 11)));
    }

    #[test]
    fn test_reserve_stops_at_ceiling() {
        let mut cursor = ready_cursor(1000, 4000);
        cursor.logical = MAX_LOGICAL - 2;
        assert_eq!(cursor.reserve(3), None);
        assert_eq!(cursor.reserve(2), Some(Timestamp::new(1000, MAX_LOGICAL - 2)));
        assert_eq!(cursor.reserve(1), None);
    }

    #[test]
    fn test_physical_advance_resets_logical() {
        let mut cursor = ready_cursor(1000, 4000);
        cursor.reserve(5);
        assert_eq!(cursor.advance_physical(1001), Advance::Advanced);
        assert_eq!(cursor.current(), Timestamp::new(1001, 0));
    }

    #[test]
    fn test_never_moves_backward() {
        let mut cursor = ready_cursor(1000, 4000);
        assert_eq!(cursor.advance_physical(999), Advance::Unchanged);
        assert_eq!(cursor.advance_to(Timestamp::new(1000, 0)), Advance::Unchanged);
        assert_eq!(cursor.current(), Timestamp::new(1000, 0));
    }

    #[test]
    fn test_watermark_blocks_advance() {
        let mut cursor = ready_cursor(1000, 4000);
        assert_eq!(cursor.advance_physical(4000), Advance::NeedsWatermark(4000));
        assert_eq!(cursor.advance_physical(3999), Advance::Advanced);
    }

    #[test]
    fn test_invalidate_cancels_term() {
        let mut cursor = Cursor::default();
        let token = cursor.begin_term();
        assert!(!token.is_cancelled());

        cursor.invalidate();
        assert!(token.is_cancelled());
        assert!(!cursor.ready);
    }
}
