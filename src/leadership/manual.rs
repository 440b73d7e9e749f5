//! Election driven by hand.
//!
//! Leadership is granted to a named member with [`ManualElection::grant`]
//! and taken away with [`ManualElection::revoke`]. Each grant opens a new
//! epoch. Several guards may share one instance to simulate a cluster.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;

use super::{Election, ElectionError, Lease};

#[derive(Debug, Default)]
struct Holder {
    member_id: Option<String>,
    epoch: u64,
}

#[derive(Debug, Default)]
pub struct ManualElection {
    holder: Mutex<Holder>,
}

impl ManualElection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand leadership to `member_id` under a fresh epoch and return it.
    pub fn grant(&self, member_id: &str) -> u64 {
        let mut holder = self.holder.lock();
        holder.epoch += 1;
        holder.member_id = Some(member_id.to_string());
        holder.epoch
    }

    /// Take leadership away from whoever holds it.
    pub fn revoke(&self) {
        self.holder.lock().member_id = None;
    }

    /// Current holder, if any.
    pub fn holder(&self) -> Option<(String, u64)> {
        let holder = self.holder.lock();
        holder.member_id.clone().map(|id| (id, holder.epoch))
    }
}

#[async_trait]
impl Election for ManualElection {
    async fn try_acquire(
        &self,
        member_id: &str,
        ttl: Duration,
    ) -> Result<Option<Lease>, ElectionError> {
        let holder = self.holder.lock();
        match &holder.member_id {
            Some(id) if id == member_id => Ok(Some(Lease {
                leader_id: id.clone(),
                epoch: holder.epoch,
                ttl,
            })),
            _ => Ok(None),
        }
    }

    async fn keep_alive(&self, lease: &Lease) -> Result<bool, ElectionError> {
        let holder = self.holder.lock();
        Ok(holder.member_id.as_deref() == Some(lease.leader_id.as_str())
            && holder.epoch == lease.epoch)
    }

    async fn resign(&self, lease: &Lease) -> Result<(), ElectionError> {
        let mut holder = self.holder.lock();
        if holder.epoch == lease.epoch {
            holder.member_id = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_only_granted_member_acquires() {
        let election = ManualElection::new();
        assert!(election.try_acquire("a", TTL).await.unwrap().is_none());

        let epoch = election.grant("a");
        let lease = election.try_acquire("a", TTL).await.unwrap().unwrap();
        assert_eq!(lease.epoch, epoch);
        assert!(election.try_acquire("b", TTL).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoke_fails_keep_alive() {
        let election = ManualElection::new();
        election.grant("a");
        let lease = election.try_acquire("a", TTL).await.unwrap().unwrap();
        assert!(election.keep_alive(&lease).await.unwrap());

        election.revoke();
        assert!(!election.keep_alive(&lease).await.unwrap());
    }

    #[tokio::test]
    async fn test_regrant_opens_new_epoch() {
        let election = ManualElection::new();
        let first = election.grant("a");
        let lease = election.try_acquire("a", TTL).await.unwrap().unwrap();

        let second = election.grant("a");
        assert!(second > first);
        assert!(!election.keep_alive(&lease).await.unwrap());
    }
}
