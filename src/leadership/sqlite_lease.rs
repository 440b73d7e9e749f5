//! Lease-based election over the shared SQLite metadata database.
//!
//! One row per election holds `(leader_id, epoch, expires_at)`. A member may
//! take the row when it is absent, expired, or already its own; every
//! acquisition bumps the epoch. All checks run inside immediate
//! transactions, so acquisition is a compare-and-swap on the row.

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use std::sync::Arc;
use std::time::Duration;

use super::{Election, ElectionError, Lease};
use crate::clock::{Clock, SystemClock};
use crate::storage::sqlite::SqliteBackend;

/// Election name used by the timestamp allocator.
pub const DEFAULT_ELECTION: &str = "tso/leader";

pub struct SqliteLeaseElection {
    backend: SqliteBackend,
    election: String,
    clock: Arc<dyn Clock>,
}

impl SqliteLeaseElection {
    pub fn new(backend: SqliteBackend) -> Self {
        Self::with_clock(backend, DEFAULT_ELECTION, Arc::new(SystemClock))
    }

    pub fn with_clock(
        backend: SqliteBackend,
        election: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend,
            election: election.into(),
            clock,
        }
    }
}

#[async_trait]
impl Election for SqliteLeaseElection {
    async fn try_acquire(
        &self,
        member_id: &str,
        ttl: Duration,
    ) -> Result<Option<Lease>, ElectionError> {
        let election = self.election.clone();
        let member = member_id.to_string();
        let now = self.clock.now_millis();
        let expires_at = now + ttl.as_millis() as i64;

        let epoch = self
            .backend
            .with_conn(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let current: Option<(String, i64, i64)> = tx
                    .query_row(
                        "SELECT leader_id, epoch, expires_at FROM leader_leases WHERE election = ?1",
                        [&election],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .optional()?;

                let epoch = match current {
                    None => 1,
                    Some((_, epoch, expiry)) if expiry <= now => epoch + 1,
                    // Re-acquiring our own live lease still opens a new term:
                    // the previous term's cursors must not be reused.
                    Some((leader, epoch, _)) if leader == member => epoch + 1,
                    Some(_) => return Ok(None),
                };

                tx.execute(
                    "INSERT INTO leader_leases (election, leader_id, epoch, expires_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(election) DO UPDATE
                     SET leader_id = excluded.leader_id,
                         epoch = excluded.epoch,
                         expires_at = excluded.expires_at",
                    params![election, member, epoch, expires_at],
                )?;
                tx.commit()?;
                Ok(Some(epoch))
            })
            .await?;

        Ok(epoch.map(|epoch| Lease {
            leader_id: member_id.to_string(),
            epoch: epoch as u64,
            ttl,
        }))
    }

    async fn keep_alive(&self, lease: &Lease) -> Result<bool, ElectionError> {
        let election = self.election.clone();
        let leader = lease.leader_id.clone();
        let epoch = lease.epoch as i64;
        let now = self.clock.now_millis();
        let expires_at = now + lease.ttl.as_millis() as i64;

        let renewed = self
            .backend
            .with_conn(move |conn| {
                let changed = conn.execute(
                    "UPDATE leader_leases SET expires_at = ?4
                     WHERE election = ?1 AND leader_id = ?2 AND epoch = ?3 AND expires_at > ?5",
                    params![election, leader, epoch, expires_at, now],
                )?;
                Ok(changed == 1)
            })
            .await?;
        Ok(renewed)
    }

    async fn resign(&self, lease: &Lease) -> Result<(), ElectionError> {
        let election = self.election.clone();
        let leader = lease.leader_id.clone();
        let epoch = lease.epoch as i64;

        self.backend
            .with_conn(move |conn| {
                conn.execute(
                    "UPDATE leader_leases SET expires_at = 0
                     WHERE election = ?1 AND leader_id = ?2 AND epoch = ?3",
                    params![election, leader, epoch],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use tempfile::TempDir;

    const TTL: Duration = Duration::from_millis(3000);

    fn election(dir: &TempDir, clock: Arc<ManualClock>) -> SqliteLeaseElection {
        let backend = SqliteBackend::open(dir.path().join("meta.db"), 2).unwrap();
        SqliteLeaseElection::with_clock(backend, DEFAULT_ELECTION, clock)
    }

    #[tokio::test]
    async fn test_first_member_wins() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(10_000));
        let election = election(&dir, clock);

        let lease = election.try_acquire("a", TTL).await.unwrap().unwrap();
        assert_eq!(lease.epoch, 1);
        assert!(election.try_acquire("b", TTL).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_lease_is_taken_with_higher_epoch() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(10_000));
        let election = election(&dir, clock.clone());

        let a = election.try_acquire("a", TTL).await.unwrap().unwrap();
        clock.advance(3001);

        let b = election.try_acquire("b", TTL).await.unwrap().unwrap();
        assert!(b.epoch > a.epoch);
        assert!(!election.keep_alive(&a).await.unwrap());
        assert!(election.keep_alive(&b).await.unwrap());
    }

    #[tokio::test]
    async fn test_keep_alive_extends_lease() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(10_000));
        let election = election(&dir, clock.clone());

        let a = election.try_acquire("a", TTL).await.unwrap().unwrap();
        clock.advance(2000);
        assert!(election.keep_alive(&a).await.unwrap());
        clock.advance(2000);
        // Renewed at 12_000, so still valid at 14_000.
        assert!(election.try_acquire("b", TTL).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resign_frees_lease() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(10_000));
        let election = election(&dir, clock);

        let a = election.try_acquire("a", TTL).await.unwrap().unwrap();
        election.resign(&a).await.unwrap();

        let b = election.try_acquire("b", TTL).await.unwrap().unwrap();
        assert_eq!(b.epoch, a.epoch + 1);
    }
}
