//! Leadership guard and the election capability it wraps.
//!
//! At most one member of a cluster may serve timestamps. Leadership is held
//! through a lease identified by a strictly increasing epoch; engines tag
//! their cursors with the epoch they were initialized under and refuse to
//! allocate once it changes.

pub mod guard;
pub mod manual;
pub mod sqlite_lease;

pub use guard::{LeaderState, LeadershipGuard};
pub use manual::ManualElection;
pub use sqlite_lease::SqliteLeaseElection;

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

use crate::storage::StoreError;

/// A leadership term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub leader_id: String,
    /// Strictly increasing across terms; never 0.
    pub epoch: u64,
    pub ttl: Duration,
}

/// Error type for election backends.
#[derive(Debug, Error)]
pub enum ElectionError {
    #[error("election store error: {0}")]
    Store(#[from] StoreError),

    #[error("election backend error: {0}")]
    Backend(String),
}

/// External leader-election capability.
#[async_trait]
pub trait Election: Send + Sync {
    /// Try once to acquire leadership for `member_id`.
    ///
    /// Returns `None` while another member holds an unexpired lease.
    async fn try_acquire(
        &self,
        member_id: &str,
        ttl: Duration,
    ) -> Result<Option<Lease>, ElectionError>;

    /// Extend `lease`. `Ok(false)` means the lease is no longer ours.
    async fn keep_alive(&self, lease: &Lease) -> Result<bool, ElectionError>;

    /// Give up `lease` so another member can take over without waiting for
    /// expiry.
    async fn resign(&self, lease: &Lease) -> Result<(), ElectionError>;
}

/// Notified synchronously when leadership ends, before the guard publishes
/// the new state.
pub trait ElectionObserver: Send + Sync {
    fn on_leadership_lost(&self, epoch: u64);
}

/// Read side of leadership that engines consult on every allocation.
pub trait LeadershipView: Send + Sync {
    /// The epoch currently held by this process, if it is the leader.
    fn current_epoch(&self) -> Option<u64>;
}

/// A leadership view set by hand.
#[derive(Debug, Default)]
pub struct StaticLeadership {
    epoch: AtomicU64,
}

impl StaticLeadership {
    /// Start as leader of `epoch`.
    pub fn leader(epoch: u64) -> Self {
        Self {
            epoch: AtomicU64::new(epoch),
        }
    }

    pub fn set_epoch(&self, epoch: u64) {
        self.epoch.store(epoch, Ordering::SeqCst);
    }

    pub fn revoke(&self) {
        self.epoch.store(0, Ordering::SeqCst);
    }
}

impl LeadershipView for StaticLeadership {
    fn current_epoch(&self) -> Option<u64> {
        match self.epoch.load(Ordering::SeqCst) {
            0 => None,
            epoch => Some(epoch),
        }
    }
}
