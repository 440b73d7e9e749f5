//! Leadership guard.
//!
//! Runs the campaign / keep-alive loop against an [`Election`] backend and
//! publishes the outcome. Loss of leadership is propagated in two steps:
//! the held epoch is cleared and every [`ElectionObserver`] runs
//! synchronously, then the new state is broadcast on a watch channel.
//! Engines therefore stop serving before anyone observes the transition.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{Election, ElectionObserver, Lease, LeadershipView};
use crate::observability::metrics::record_leader;

/// Published leadership state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaderState {
    Follower,
    Leader(Lease),
}

impl LeaderState {
    pub fn epoch(&self) -> Option<u64> {
        match self {
            Self::Follower => None,
            Self::Leader(lease) => Some(lease.epoch),
        }
    }
}

pub struct LeadershipGuard {
    member_id: String,
    election: Arc<dyn Election>,
    lease_ttl: Duration,
    /// Epoch held right now; 0 while following.
    epoch: AtomicU64,
    state_tx: watch::Sender<LeaderState>,
    observers: Mutex<Vec<Weak<dyn ElectionObserver>>>,
    resign_request: Mutex<Option<(u64, String)>>,
    resign_notify: Notify,
}

impl LeadershipGuard {
    pub fn new(member_id: impl Into<String>, election: Arc<dyn Election>, lease_ttl: Duration) -> Self {
        let (state_tx, _) = watch::channel(LeaderState::Follower);
        Self {
            member_id: member_id.into(),
            election,
            lease_ttl,
            epoch: AtomicU64::new(0),
            state_tx,
            observers: Mutex::new(Vec::new()),
            resign_request: Mutex::new(None),
            resign_notify: Notify::new(),
        }
    }

    pub fn member_id(&self) -> &str {
        &self.member_id
    }

    pub fn is_leader(&self) -> bool {
        self.epoch.load(Ordering::SeqCst) != 0
    }

    /// Subscribe to leadership transitions.
    pub fn subscribe(&self) -> watch::Receiver<LeaderState> {
        self.state_tx.subscribe()
    }

    /// Current published state.
    pub fn state(&self) -> LeaderState {
        self.state_tx.borrow().clone()
    }

    /// Register an observer for synchronous loss notification.
    ///
    /// Only a weak reference is kept.
    pub fn add_observer(&self, observer: &Arc<dyn ElectionObserver>) {
        self.observers.lock().push(Arc::downgrade(observer));
    }

    /// Ask the guard to give up the term identified by `epoch`.
    ///
    /// Requests naming an epoch that is no longer held are ignored.
    pub fn request_resign(&self, epoch: u64, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(epoch, reason = %reason, "Resignation requested");
        *self.resign_request.lock() = Some((epoch, reason));
        self.resign_notify.notify_one();
    }

    /// Re-verify the current lease with the backend.
    ///
    /// Steps down and returns `false` when the backend says the lease is
    /// gone. A backend error leaves the state unchanged; the keep-alive loop
    /// enforces the lease deadline.
    pub async fn check_leadership(&self) -> bool {
        let LeaderState::Leader(lease) = self.state() else {
            return false;
        };

        match self.election.keep_alive(&lease).await {
            Ok(true) => self.epoch.load(Ordering::SeqCst) == lease.epoch,
            Ok(false) => {
                self.step_down(&lease, "lease lost on re-verification");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, epoch = lease.epoch, "Leadership re-verification failed");
                self.is_leader()
            }
        }
    }

    /// Campaign, hold, and re-campaign until `cancel` fires.
    ///
    /// A lease held at cancellation is resigned so another member can take
    /// over without waiting for expiry.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let lease = tokio::select! {
                _ = cancel.cancelled() => return,
                lease = self.campaign() => lease,
            };

            self.become_leader(&lease);

            let outcome = tokio::select! {
                _ = cancel.cancelled() => None,
                outcome = self.hold(&lease) => Some(outcome),
            };

            match outcome {
                None => {
                    self.step_down(&lease, "shutdown");
                    self.resign_lease(&lease).await;
                    return;
                }
                Some(HoldOutcome::Lost(reason)) => {
                    self.step_down(&lease, &reason);
                }
                Some(HoldOutcome::Resigned(reason)) => {
                    self.step_down(&lease, &reason);
                    self.resign_lease(&lease).await;
                    // Give the rest of the cluster a chance to take over.
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(self.lease_ttl) => {}
                    }
                }
            }
        }
    }

    async fn campaign(&self) -> Lease {
        let retry = self.keep_alive_period();
        loop {
            match self
                .election
                .try_acquire(&self.member_id, self.lease_ttl)
                .await
            {
                Ok(Some(lease)) => return lease,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, member_id = %self.member_id, "Campaign attempt failed");
                }
            }
            tokio::time::sleep(retry).await;
        }
    }

    async fn hold(&self, lease: &Lease) -> HoldOutcome {
        let mut deadline = Instant::now() + lease.ttl;
        let mut ticker = tokio::time::interval(self.keep_alive_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the lease was just granted.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.resign_notify.notified() => {
                    let request = self.resign_request.lock().take();
                    if let Some((epoch, reason)) = request {
                        if epoch == lease.epoch {
                            return HoldOutcome::Resigned(reason);
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return HoldOutcome::Lost("lease expired".into());
                }
                _ = ticker.tick() => {
                    if self.epoch.load(Ordering::SeqCst) != lease.epoch {
                        return HoldOutcome::Lost("stepped down".into());
                    }

                    let sent_at = Instant::now();
                    let remaining = deadline.saturating_duration_since(sent_at);
                    if remaining.is_zero() {
                        return HoldOutcome::Lost("lease expired".into());
                    }

                    match tokio::time::timeout(remaining, self.election.keep_alive(lease)).await {
                        Ok(Ok(true)) => deadline = sent_at + lease.ttl,
                        Ok(Ok(false)) => return HoldOutcome::Lost("lease lost".into()),
                        Ok(Err(e)) => {
                            tracing::warn!(error = %e, epoch = lease.epoch, "Lease keep-alive failed");
                        }
                        Err(_) => return HoldOutcome::Lost("lease expired".into()),
                    }
                }
            }
        }
    }

    fn become_leader(&self, lease: &Lease) {
        self.epoch.store(lease.epoch, Ordering::SeqCst);
        self.state_tx.send_replace(LeaderState::Leader(lease.clone()));
        record_leader(true);
        tracing::info!(
            member_id = %self.member_id,
            epoch = lease.epoch,
            "Became leader"
        );
    }

    fn step_down(&self, lease: &Lease, reason: &str) {
        if self
            .epoch
            .compare_exchange(lease.epoch, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let observers: Vec<_> = {
            let mut observers = self.observers.lock();
            observers.retain(|o| o.strong_count() > 0);
            observers.clone()
        };
        for observer in observers.iter().filter_map(Weak::upgrade) {
            observer.on_leadership_lost(lease.epoch);
        }

        self.state_tx.send_replace(LeaderState::Follower);
        record_leader(false);
        tracing::info!(
            member_id = %self.member_id,
            epoch = lease.epoch,
            reason,
            "Lost leadership"
        );
    }

    async fn resign_lease(&self, lease: &Lease) {
        if let Err(e) = self.election.resign(lease).await {
            tracing::warn!(error = %e, epoch = lease.epoch, "Failed to resign lease");
        }
    }

    fn keep_alive_period(&self) -> Duration {
        (self.lease_ttl / 3).max(Duration::from_millis(1))
    }
}

impl LeadershipView for LeadershipGuard {
    fn current_epoch(&self) -> Option<u64> {
        match self.epoch.load(Ordering::SeqCst) {
            0 => None,
            epoch => Some(epoch),
        }
    }
}

enum HoldOutcome {
    Lost(String),
    Resigned(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leadership::{ElectionError, ManualElection};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    const TTL: Duration = Duration::from_millis(30);

    #[derive(Default)]
    struct CountingObserver {
        lost: AtomicUsize,
    }

    impl ElectionObserver for CountingObserver {
        fn on_leadership_lost(&self, _epoch: u64) {
            self.lost.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Manual election whose keep-alives can be made to fail.
    #[derive(Default)]
    struct FlakyElection {
        inner: ManualElection,
        failing: AtomicBool,
        last_renewed: Mutex<Option<Instant>>,
    }

    #[async_trait]
    impl Election for FlakyElection {
        async fn try_acquire(
            &self,
            member_id: &str,
            ttl: Duration,
        ) -> Result<Option<Lease>, ElectionError> {
            self.inner.try_acquire(member_id, ttl).await
        }

        async fn keep_alive(&self, lease: &Lease) -> Result<bool, ElectionError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(ElectionError::Backend("unreachable".into()));
            }
            let renewed = self.inner.keep_alive(lease).await?;
            if renewed {
                *self.last_renewed.lock() = Some(Instant::now());
            }
            Ok(renewed)
        }

        async fn resign(&self, lease: &Lease) -> Result<(), ElectionError> {
            self.inner.resign(lease).await
        }
    }

    async fn wait_for_state<F>(rx: &mut watch::Receiver<LeaderState>, mut f: F)
    where
        F: FnMut(&LeaderState) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| f(s)))
            .await
            .expect("timed out waiting for leadership state")
            .expect("guard dropped");
    }

    #[tokio::test]
    async fn test_guard_follows_manual_election() {
        let election = Arc::new(ManualElection::new());
        let guard = Arc::new(LeadershipGuard::new("a", election.clone(), TTL));
        let observer = Arc::new(CountingObserver::default());
        let dyn_observer: Arc<dyn ElectionObserver> = observer.clone();
        guard.add_observer(&dyn_observer);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(guard.clone().run(cancel.clone()));
        let mut rx = guard.subscribe();

        let epoch = election.grant("a");
        wait_for_state(&mut rx, |s| s.epoch() == Some(epoch)).await;
        assert!(guard.is_leader());
        assert_eq!(guard.current_epoch(), Some(epoch));

        election.revoke();
        wait_for_state(&mut rx, |s| *s == LeaderState::Follower).await;
        assert!(!guard.is_leader());
        assert_eq!(observer.lost.load(Ordering::SeqCst), 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_requested_resign_releases_lease() {
        let election = Arc::new(ManualElection::new());
        let guard = Arc::new(LeadershipGuard::new("a", election.clone(), TTL));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(guard.clone().run(cancel.clone()));
        let mut rx = guard.subscribe();

        let epoch = election.grant("a");
        wait_for_state(&mut rx, |s| s.epoch() == Some(epoch)).await;

        // A request for a stale epoch is ignored.
        guard.request_resign(epoch + 100, "stale");
        tokio::time::sleep(TTL).await;
        assert!(guard.is_leader());

        guard.request_resign(epoch, "clock anomaly");
        wait_for_state(&mut rx, |s| *s == LeaderState::Follower).await;
        assert!(election.holder().is_none());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_check_leadership_detects_loss() {
        let election = Arc::new(ManualElection::new());
        let guard = Arc::new(LeadershipGuard::new("a", election.clone(), Duration::from_secs(60)));
        // Granted up front: with a long lease the campaign retry is slow.
        let epoch = election.grant("a");
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(guard.clone().run(cancel.clone()));
        let mut rx = guard.subscribe();

        wait_for_state(&mut rx, |s| s.epoch() == Some(epoch)).await;
        assert!(guard.check_leadership().await);

        election.revoke();
        assert!(!guard.check_leadership().await);
        assert!(!guard.is_leader());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_steps_down_at_lease_deadline() {
        let ttl = Duration::from_millis(600);
        let election = Arc::new(FlakyElection::default());
        let guard = Arc::new(LeadershipGuard::new("a", election.clone(), ttl));
        let epoch = election.inner.grant("a");
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(guard.clone().run(cancel.clone()));
        let mut rx = guard.subscribe();
        wait_for_state(&mut rx, |s| s.epoch() == Some(epoch)).await;

        // Wait for one renewal, then make every further keep-alive fail.
        tokio::time::sleep(ttl / 2).await;
        election.failing.store(true, Ordering::SeqCst);
        wait_for_state(&mut rx, |s| *s == LeaderState::Follower).await;
        let stepped_down = Instant::now();

        let last_renewed = (*election.last_renewed.lock()).expect("lease never renewed");
        let held_for = stepped_down - last_renewed;
        assert!(
            held_for <= ttl + Duration::from_millis(100),
            "served {held_for:?} after the last renewal"
        );

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_resigns() {
        let election = Arc::new(ManualElection::new());
        let guard = Arc::new(LeadershipGuard::new("a", election.clone(), TTL));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(guard.clone().run(cancel.clone()));
        let mut rx = guard.subscribe();

        let epoch = election.grant("a");
        wait_for_state(&mut rx, |s| s.epoch() == Some(epoch)).await;

        cancel.cancel();
        handle.await.unwrap();
        assert!(!guard.is_leader());
        assert!(election.holder().is_none());
    }
}
