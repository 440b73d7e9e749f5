//! Timestamp allocation engine.
//!
//! One [`TsoAllocator`] serves one stream. The global engine and every
//! local engine are instances with different [`StreamKey`]s.
//!
//! The cursor lives behind a `parking_lot` mutex that is never held across
//! an await. Checkpoint saves run outside it, serialized by `persist_lock`.
//! Every issued physical value stays strictly below the persisted
//! watermark, so a successor that starts from the watermark can never
//! reissue a timestamp.

mod cursor;
pub mod settings;

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub use settings::{
    clamp_update_physical_interval, AllocatorSettings, RetryPolicy, MAX_ALLOCATE_COUNT,
};

use self::cursor::{Advance, Cursor};
use self::settings::{JET_LAG_WARNING_FACTOR, UPDATE_TIMESTAMP_GUARD_MS};
use crate::clock::Clock;
use crate::error::TsoError;
use crate::leadership::LeadershipView;
use crate::observability::metrics::record_event;
use crate::storage::{Checkpoint, CheckpointStore, StoreError};
use crate::stream::StreamKey;
use crate::timestamp::{Timestamp, MAX_LOGICAL, MAX_PHYSICAL};

/// First pause when the logical counter is exhausted and the clock stalls.
const ALLOCATE_BACKOFF_START: Duration = Duration::from_millis(1);
/// Pauses tried before the physical part is bumped synthetically.
const MAX_STALL_RETRIES: u32 = 4;

/// Point-in-time view of one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamSnapshot {
    pub stream: StreamKey,
    pub ready: bool,
    pub epoch: u64,
    /// Next timestamp the cursor would hand out.
    pub current: Timestamp,
    pub saved_physical: i64,
}

/// First timestamp of a reserved block and the leadership epoch the cursor
/// was initialized under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub timestamp: Timestamp,
    pub epoch: u64,
}

pub struct TsoAllocator {
    stream: StreamKey,
    label: String,
    settings: AllocatorSettings,
    store: Arc<dyn CheckpointStore>,
    clock: Arc<dyn Clock>,
    leadership: Arc<dyn LeadershipView>,
    cursor: Mutex<Cursor>,
    persist_lock: tokio::sync::Mutex<()>,
}

impl TsoAllocator {
    pub fn new(
        stream: StreamKey,
        settings: AllocatorSettings,
        store: Arc<dyn CheckpointStore>,
        clock: Arc<dyn Clock>,
        leadership: Arc<dyn LeadershipView>,
    ) -> Self {
        Self {
            label: stream.to_string(),
            stream,
            settings,
            store,
            clock,
            leadership,
            cursor: Mutex::new(Cursor::default()),
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn stream(&self) -> &StreamKey {
        &self.stream
    }

    /// Load the checkpoint and seed the cursor for leadership term `epoch`.
    ///
    /// Waits for the wall clock to reach the persisted watermark, bounded
    /// by the max reset gap, then persists a fresh watermark ahead of the
    /// cursor. Allocation is accepted only after that save succeeds.
    ///
    /// # Errors
    ///
    /// - `NotLeader` if `epoch` is not (or no longer) held
    /// - `ClockAnomaly` if the clock stays behind the watermark too long
    /// - `VersionConflict` if another process saved the checkpoint meanwhile
    /// - `Unavailable` if the store cannot be reached
    pub async fn initialize(&self, epoch: u64) -> Result<(), TsoError> {
        if self.leadership.current_epoch() != Some(epoch) {
            return Err(self.not_leader());
        }
        let term = self.cursor.lock().begin_term();
        let _persist = self.persist_lock.lock().await;

        let checkpoint = self.load_checkpoint(&term).await?;
        let (saved, version) = checkpoint.map_or((0, 0), |c: Checkpoint| {
            (c.saved_physical, c.version)
        });

        let now = self.wait_for_clock(saved, &term).await?;
        let physical = now.max(saved);
        let new_saved = physical + self.settings.save_interval_ms();
        let new_version = self.save_checkpoint(new_saved, version, &term, None).await?;

        {
            let mut cursor = self.cursor.lock();
            if term.is_cancelled() || self.leadership.current_epoch() != Some(epoch) {
                return Err(self.not_leader());
            }
            let at = Instant::now();
            cursor.physical = physical;
            cursor.logical = 0;
            cursor.saved_physical = new_saved;
            cursor.version = new_version;
            cursor.epoch = epoch;
            cursor.ready = true;
            cursor.updated_at = Some(at);
            cursor.last_saved_at = Some(at);
        }

        tracing::info!(
            stream = %self.stream,
            epoch,
            physical,
            saved_physical = new_saved,
            "Allocator initialized"
        );
        Ok(())
    }

    /// Reserve `count` consecutive timestamps and return the first.
    ///
    /// The remaining ones are derived with [`Timestamp::next_logical`].
    /// A wait cut short by invalidation fails with `NotLeader`.
    pub async fn allocate(&self, count: u32) -> Result<Allocation, TsoError> {
        if count == 0 || count > MAX_ALLOCATE_COUNT {
            return Err(TsoError::InvalidCount {
                count,
                max: MAX_ALLOCATE_COUNT,
            });
        }
        let count = i64::from(count);
        let deadline = Instant::now() + self.settings.max_reset_ts_gap;
        let mut backoff = ALLOCATE_BACKOFF_START;
        let mut stalled = 0u32;

        loop {
            let (pending, term) = {
                let mut cursor = self.cursor.lock();
                self.check_serving(&mut cursor)?;
                if let Some(timestamp) = cursor.reserve(count) {
                    return Ok(Allocation {
                        timestamp,
                        epoch: cursor.epoch,
                    });
                }

                let now = self.clock.now_millis();
                let pending = if now <= cursor.physical && stalled < MAX_STALL_RETRIES {
                    None
                } else {
                    let next = now.max(cursor.physical + 1);
                    match cursor.advance_physical(next) {
                        Advance::NeedsWatermark(physical) => Some(physical),
                        Advance::Advanced | Advance::Unchanged => {
                            if next > now {
                                record_event(&self.label, "synthetic_bump");
                                tracing::debug!(stream = %self.stream, physical = next, "Synthetic physical bump");
                            }
                            continue;
                        }
                    }
                };
                (pending, cursor.term.clone())
            };

            if Instant::now() >= deadline {
                record_event(&self.label, "clock_anomaly");
                return Err(TsoError::ClockAnomaly {
                    stream: self.stream.clone(),
                    reason: "logical counter exhausted and physical time could not advance".into(),
                });
            }

            match pending {
                None => {
                    if stalled == 0 {
                        record_event(&self.label, "logical_exhausted");
                        tracing::warn!(stream = %self.stream, "Logical counter exhausted, waiting for physical time");
                    }
                    stalled += 1;
                    self.pause(backoff, &term)
                        .await
                        .map_err(|e| self.term_ended(e))?;
                    backoff = (backoff * 2).min(self.settings.update_physical_interval);
                }
                Some(physical) => self
                    .ensure_watermark(physical)
                    .await
                    .map_err(|e| self.term_ended(e))?,
            }
        }
    }

    /// Periodic maintenance: move physical time forward and keep the
    /// watermark ahead of it. A no-op while the cursor is not ready.
    pub async fn update_physical(&self) -> Result<(), TsoError> {
        let (physical, logical, saved) = {
            let mut cursor = self.cursor.lock();
            if !cursor.ready {
                return Ok(());
            }
            self.check_serving(&mut cursor)?;
            (cursor.physical, cursor.logical, cursor.saved_physical)
        };

        let now = self.clock.now_millis();
        let jet_lag = now - physical;
        if jet_lag > i64::from(JET_LAG_WARNING_FACTOR) * self.settings.update_interval_ms() {
            record_event(&self.label, "jet_lag");
            tracing::warn!(stream = %self.stream, jet_lag_ms = jet_lag, "Clock offset detected");
        }

        let next = if now > physical {
            now
        } else if logical > MAX_LOGICAL / 2 {
            tracing::warn!(
                stream = %self.stream,
                physical,
                logical,
                "Logical counter past half with a stalled clock, advancing physical"
            );
            physical + 1
        } else {
            return Ok(());
        };

        if next + UPDATE_TIMESTAMP_GUARD_MS >= saved {
            self.ensure_watermark(next).await?;
        }

        let mut cursor = self.cursor.lock();
        self.check_serving(&mut cursor)?;
        if let Advance::NeedsWatermark(_) = cursor.advance_physical(next) {
            tracing::debug!(stream = %self.stream, next, "Watermark moved concurrently, retrying next tick");
        }
        Ok(())
    }

    /// Raise the cursor to at least `target`; never lowers it.
    ///
    /// Returns whether the cursor moved.
    pub async fn advance_to(&self, target: Timestamp) -> Result<bool, TsoError> {
        loop {
            let pending = {
                let mut cursor = self.cursor.lock();
                self.check_serving(&mut cursor)?;
                match cursor.advance_to(target) {
                    Advance::Unchanged => return Ok(false),
                    Advance::Advanced => return Ok(true),
                    Advance::NeedsWatermark(physical) => physical,
                }
            };
            self.ensure_watermark(pending).await?;
        }
    }

    /// Move the cursor forward to an operator supplied timestamp.
    pub async fn reset_timestamp(
        &self,
        target: Timestamp,
        ignore_smaller: bool,
        skip_upper_bound_check: bool,
    ) -> Result<(), TsoError> {
        let composable = target
            .physical
            .checked_add(self.settings.save_interval_ms())
            .is_some_and(|saved| saved < MAX_PHYSICAL);
        if target.physical <= 0
            || !composable
            || target.logical < 0
            || target.logical >= MAX_LOGICAL
        {
            return Err(TsoError::InvalidReset(format!(
                "timestamp {target} is out of range"
            )));
        }
        if !skip_upper_bound_check {
            let now = self.clock.now_millis();
            let gap = self.settings.max_reset_ts_gap;
            if target.physical - now > gap.as_millis() as i64 {
                return Err(TsoError::InvalidReset(format!(
                    "timestamp {target} is more than {} ahead of the wall clock",
                    humantime::format_duration(gap)
                )));
            }
        }

        let current = {
            let mut cursor = self.cursor.lock();
            self.check_serving(&mut cursor)?;
            cursor.current()
        };
        let moved = target > current && self.advance_to(target).await?;
        if !moved {
            if ignore_smaller {
                tracing::debug!(stream = %self.stream, requested = %target, %current, "Ignoring reset to a smaller timestamp");
                return Ok(());
            }
            return Err(TsoError::InvalidReset(format!(
                "timestamp {target} is not ahead of the current timestamp {current}"
            )));
        }

        record_event(&self.label, "reset");
        tracing::info!(stream = %self.stream, reset_to = %target, previous = %current, "Timestamp reset");
        Ok(())
    }

    /// Invalidate the cursor. Pending waits of the current term abort.
    pub fn reset(&self) {
        let mut cursor = self.cursor.lock();
        if cursor.ready {
            tracing::info!(stream = %self.stream, epoch = cursor.epoch, "Allocator cursor invalidated");
        }
        cursor.invalidate();
    }

    /// Whether the engine serves allocations under the current epoch.
    pub fn is_ready(&self) -> bool {
        let cursor = self.cursor.lock();
        cursor.ready && self.leadership.current_epoch() == Some(cursor.epoch)
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        let cursor = self.cursor.lock();
        StreamSnapshot {
            stream: self.stream.clone(),
            ready: cursor.ready && self.leadership.current_epoch() == Some(cursor.epoch),
            epoch: cursor.epoch,
            current: cursor.current(),
            saved_physical: cursor.saved_physical,
        }
    }

    fn not_leader(&self) -> TsoError {
        TsoError::NotLeader {
            stream: self.stream.clone(),
        }
    }

    /// Waits interrupted by invalidation mean this member no longer serves.
    fn term_ended(&self, err: TsoError) -> TsoError {
        match err {
            TsoError::Cancelled { .. } => self.not_leader(),
            other => other,
        }
    }

    fn check_serving(&self, cursor: &mut Cursor) -> Result<(), TsoError> {
        if !cursor.ready {
            return Err(self.not_leader());
        }
        if self.leadership.current_epoch() != Some(cursor.epoch) {
            tracing::warn!(stream = %self.stream, epoch = cursor.epoch, "Leadership epoch moved, invalidating cursor");
            cursor.invalidate();
            return Err(self.not_leader());
        }
        Ok(())
    }

    /// Persist a watermark above `physical` unless one is already in place.
    async fn ensure_watermark(&self, physical: i64) -> Result<(), TsoError> {
        let _persist = self.persist_lock.lock().await;
        let (saved, version, epoch, last_saved_at, term) = {
            let mut cursor = self.cursor.lock();
            self.check_serving(&mut cursor)?;
            (
                cursor.saved_physical,
                cursor.version,
                cursor.epoch,
                cursor.last_saved_at,
                cursor.term.clone(),
            )
        };
        if physical.saturating_add(UPDATE_TIMESTAMP_GUARD_MS) < saved {
            return Ok(());
        }

        let new_saved = physical
            .checked_add(self.settings.save_interval_ms())
            .filter(|saved| *saved < MAX_PHYSICAL)
            .ok_or_else(|| TsoError::InvalidReset(format!("physical {physical} is out of range")))?;
        let new_version = self
            .save_checkpoint(new_saved, version, &term, last_saved_at)
            .await?;

        let mut cursor = self.cursor.lock();
        if !cursor.ready || cursor.epoch != epoch || cursor.version != version {
            return Err(self.not_leader());
        }
        cursor.saved_physical = new_saved;
        cursor.version = new_version;
        cursor.last_saved_at = Some(Instant::now());
        Ok(())
    }

    async fn load_checkpoint(
        &self,
        term: &CancellationToken,
    ) -> Result<Option<Checkpoint>, TsoError> {
        let policy = self.settings.save_retry;
        let mut attempt = 0;
        loop {
            match self.store.load(&self.stream).await {
                Ok(checkpoint) => return Ok(checkpoint),
                Err(e) if e.is_transient() && attempt + 1 < policy.attempts => {
                    tracing::warn!(stream = %self.stream, attempt, error = %e, "Checkpoint load failed, retrying");
                    self.pause(policy.delay(attempt), term).await?;
                    attempt += 1;
                }
                Err(e) => return Err(TsoError::from_store(&self.stream, e)),
            }
        }
    }

    /// Compare-and-swap the checkpoint with bounded retries.
    ///
    /// A conflict invalidates the cursor immediately. When every attempt
    /// fails and the last good save is older than the save interval, the
    /// failure escalates to `ClockAnomaly`.
    async fn save_checkpoint(
        &self,
        saved_physical: i64,
        expected_version: u64,
        term: &CancellationToken,
        last_saved_at: Option<Instant>,
    ) -> Result<u64, TsoError> {
        let policy = self.settings.save_retry;
        let mut attempt = 0;
        loop {
            match self
                .store
                .save(&self.stream, saved_physical, expected_version)
                .await
            {
                Ok(version) => {
                    record_event(&self.label, "save");
                    tracing::debug!(stream = %self.stream, saved_physical, version, "Checkpoint saved");
                    return Ok(version);
                }
                Err(e @ StoreError::VersionConflict { .. }) => {
                    record_event(&self.label, "version_conflict");
                    tracing::warn!(stream = %self.stream, error = %e, "Checkpoint taken over, invalidating cursor");
                    self.reset();
                    return Err(TsoError::from_store(&self.stream, e));
                }
                Err(e) if e.is_transient() && attempt + 1 < policy.attempts => {
                    tracing::warn!(stream = %self.stream, attempt, error = %e, "Checkpoint save failed, retrying");
                    self.pause(policy.delay(attempt), term).await?;
                    attempt += 1;
                }
                Err(e) => {
                    record_event(&self.label, "save_failed");
                    let stale = last_saved_at
                        .is_some_and(|at| at.elapsed() > self.settings.save_interval);
                    if stale {
                        record_event(&self.label, "clock_anomaly");
                        return Err(TsoError::ClockAnomaly {
                            stream: self.stream.clone(),
                            reason: format!("watermark not persisted within the save interval: {e}"),
                        });
                    }
                    return Err(TsoError::from_store(&self.stream, e));
                }
            }
        }
    }

    /// Block until the wall clock reaches `saved`, bounded by the max reset
    /// gap. Returns the clock reading that passed.
    async fn wait_for_clock(&self, saved: i64, term: &CancellationToken) -> Result<i64, TsoError> {
        let mut now = self.clock.now_millis();
        if now >= saved {
            return Ok(now);
        }

        tracing::warn!(
            stream = %self.stream,
            now,
            saved_physical = saved,
            "Wall clock behind the persisted watermark, waiting"
        );
        let deadline = Instant::now() + self.settings.max_reset_ts_gap;
        while now < saved {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                record_event(&self.label, "clock_anomaly");
                return Err(TsoError::ClockAnomaly {
                    stream: self.stream.clone(),
                    reason: format!(
                        "wall clock {now} still behind watermark {saved} after {}",
                        humantime::format_duration(self.settings.max_reset_ts_gap)
                    ),
                });
            }
            let behind = Duration::from_millis((saved - now) as u64);
            let step = behind
                .min(left)
                .min(self.settings.update_physical_interval);
            self.pause(step, term).await?;
            now = self.clock.now_millis();
        }
        Ok(now)
    }

    async fn pause(&self, duration: Duration, term: &CancellationToken) -> Result<(), TsoError> {
        tokio::select! {
            _ = term.cancelled() => Err(TsoError::Cancelled { stream: self.stream.clone() }),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
