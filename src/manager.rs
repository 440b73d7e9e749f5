//! Allocator manager.
//!
//! Owns the global engine and the local engines, binds their lifetime to
//! leadership terms, runs the tick scheduler and keeps local streams ordered
//! against the global one.

use parking_lot::Mutex;
use serde::Serialize;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::allocator::{Allocation, AllocatorSettings, StreamSnapshot, TsoAllocator};
use crate::clock::Clock;
use crate::error::TsoError;
use crate::leadership::{ElectionObserver, LeaderState, LeadershipGuard, LeadershipView};
use crate::observability::http::Readiness;
use crate::observability::metrics::{record_allocation, record_event};
use crate::storage::CheckpointStore;
use crate::stream::StreamKey;
use crate::timestamp::Timestamp;

/// Initialization attempts per engine after checkpoint conflicts.
const INIT_CONFLICT_RETRIES: u32 = 3;

/// Status of this member and all of its streams.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub member_id: String,
    pub is_leader: bool,
    pub epoch: Option<u64>,
    pub streams: Vec<StreamSnapshot>,
}

pub struct AllocatorManager {
    guard: Arc<LeadershipGuard>,
    settings: AllocatorSettings,
    global: Arc<TsoAllocator>,
    locals: Vec<Arc<TsoAllocator>>,
    term: Mutex<CancellationToken>,
    sync_lock: tokio::sync::Mutex<()>,
}

impl AllocatorManager {
    /// Build the engines and register for leadership loss notification.
    pub fn new(
        guard: Arc<LeadershipGuard>,
        store: Arc<dyn CheckpointStore>,
        clock: Arc<dyn Clock>,
        settings: AllocatorSettings,
        local_streams: Vec<StreamKey>,
    ) -> Arc<Self> {
        let leadership: Arc<dyn LeadershipView> = guard.clone();
        let engine = |stream: StreamKey| {
            Arc::new(TsoAllocator::new(
                stream,
                settings,
                store.clone(),
                clock.clone(),
                leadership.clone(),
            ))
        };

        let global = engine(StreamKey::Global);
        let locals: Vec<_> = local_streams
            .into_iter()
            .filter(|stream| !stream.is_global())
            .map(engine)
            .collect();

        tracing::info!(
            member_id = %guard.member_id(),
            local_streams = locals.len(),
            update_interval = ?settings.update_physical_interval,
            save_interval = ?settings.save_interval,
            "Allocator manager created"
        );

        let term = CancellationToken::new();
        term.cancel();
        let manager = Arc::new(Self {
            guard,
            settings,
            global,
            locals,
            term: Mutex::new(term),
            sync_lock: tokio::sync::Mutex::new(()),
        });
        let observer: Arc<dyn ElectionObserver> = manager.clone();
        manager.guard.add_observer(&observer);
        manager
    }

    pub fn guard(&self) -> &Arc<LeadershipGuard> {
        &self.guard
    }

    /// Follow leadership transitions until `cancel` fires.
    ///
    /// Every leadership term initializes all engines and then drives the
    /// tick loop until the term ends.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut rx = self.guard.subscribe();
        loop {
            let state = rx.borrow_and_update().clone();
            if let LeaderState::Leader(lease) = state {
                let term = self.begin_term(&cancel);
                self.serve_term(lease.epoch, &term).await;
                term.cancel();
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        self.end_term();
        tracing::info!("Allocator manager stopped");
    }

    /// Allocate `count` timestamps on `stream`, tagged with the epoch the
    /// engine was initialized under.
    ///
    /// A global allocation runs the cross-stream sync first when local
    /// streams exist, so every local timestamp issued before the call is
    /// smaller than the returned one.
    pub async fn allocate(&self, stream: &StreamKey, count: u32) -> Result<Allocation, TsoError> {
        let started = Instant::now();
        let engine = self.engine(stream)?;

        let result = async {
            if stream.is_global() && !self.locals.is_empty() {
                self.sync_streams().await?;
            }
            engine.allocate(count).await
        }
        .await;

        let label = stream.to_string();
        match &result {
            Ok(_) => record_allocation(&label, count, started.elapsed()),
            Err(e) => {
                record_event(&label, e.kind());
                if let TsoError::ClockAnomaly { reason, .. } = e {
                    if let Some(epoch) = self.guard.current_epoch() {
                        self.guard.request_resign(epoch, reason.clone());
                    }
                }
            }
        }
        result
    }

    /// Cross-stream handshake.
    ///
    /// Raises the global cursor to the largest local cursor, then raises
    /// every local cursor whose physical part is behind the global one to
    /// `(global.physical, 0)`. Cursors are never lowered.
    pub async fn sync_streams(&self) -> Result<(), TsoError> {
        if self.locals.is_empty() {
            return Ok(());
        }
        let _sync = self.sync_lock.lock().await;

        let mut max_local = Timestamp::ZERO;
        for local in &self.locals {
            let snapshot = local.snapshot();
            if !snapshot.ready {
                return Err(TsoError::NotLeader {
                    stream: snapshot.stream,
                });
            }
            max_local = max_local.max(snapshot.current);
        }

        if self.global.advance_to(max_local).await? {
            record_event("global", "sync");
            tracing::debug!(target_ts = %max_local, "Raised global stream to local maximum");
        }

        let global = self.global.snapshot().current;
        let floor = Timestamp::new(global.physical, 0);
        for local in &self.locals {
            if local.advance_to(floor).await? {
                record_event(&local.stream().to_string(), "sync");
                tracing::debug!(stream = %local.stream(), physical = global.physical, "Raised local stream to global physical");
            }
        }
        Ok(())
    }

    /// Move `stream` forward to an operator supplied timestamp.
    pub async fn reset_timestamp(
        &self,
        stream: &StreamKey,
        target: Timestamp,
        ignore_smaller: bool,
        skip_upper_bound_check: bool,
    ) -> Result<(), TsoError> {
        self.engine(stream)?
            .reset_timestamp(target, ignore_smaller, skip_upper_bound_check)
            .await
    }

    pub fn is_ready(&self, stream: &StreamKey) -> bool {
        self.engine(stream).is_ok_and(|engine| engine.is_ready())
    }

    pub fn status(&self) -> ManagerStatus {
        ManagerStatus {
            member_id: self.guard.member_id().to_string(),
            is_leader: self.guard.is_leader(),
            epoch: self.guard.current_epoch(),
            streams: self.engines().map(|engine| engine.snapshot()).collect(),
        }
    }

    /// Every configured stream, global first.
    pub fn streams(&self) -> Vec<StreamKey> {
        self.engines().map(|engine| engine.stream().clone()).collect()
    }

    fn engine(&self, stream: &StreamKey) -> Result<&Arc<TsoAllocator>, TsoError> {
        match stream {
            StreamKey::Global => Ok(&self.global),
            StreamKey::Local(_) => self
                .locals
                .iter()
                .find(|engine| engine.stream() == stream)
                .ok_or_else(|| TsoError::UnknownStream(stream.clone())),
        }
    }

    fn engines(&self) -> impl Iterator<Item = &Arc<TsoAllocator>> {
        std::iter::once(&self.global).chain(self.locals.iter())
    }

    fn begin_term(&self, cancel: &CancellationToken) -> CancellationToken {
        let token = cancel.child_token();
        let previous = std::mem::replace(&mut *self.term.lock(), token.clone());
        previous.cancel();
        token
    }

    fn end_term(&self) {
        self.term.lock().cancel();
        for engine in self.engines() {
            engine.reset();
        }
    }

    async fn serve_term(&self, epoch: u64, term: &CancellationToken) {
        tracing::info!(epoch, streams = self.locals.len() + 1, "Starting allocator term");

        let init = futures::future::try_join_all(
            self.engines()
                .map(|engine| self.initialize_engine(engine, epoch)),
        );
        let result = tokio::select! {
            _ = term.cancelled() => return,
            result = init => result,
        };
        if let Err(e) = result {
            self.on_init_failure(epoch, term, e);
            return;
        }
        tracing::info!(epoch, "All streams ready");

        let mut ticker = tokio::time::interval(self.settings.update_physical_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = term.cancelled() => return,
                _ = ticker.tick() => {}
            }
            if self.tick(epoch, term).await.is_break() {
                return;
            }
        }
    }

    async fn tick(&self, epoch: u64, term: &CancellationToken) -> ControlFlow<()> {
        for engine in self.engines() {
            if let Err(e) = engine.update_physical().await {
                self.handle_error(epoch, term, e).await?;
            }
        }
        if let Err(e) = self.sync_streams().await {
            self.handle_error(epoch, term, e).await?;
        }
        ControlFlow::Continue(())
    }

    async fn handle_error(
        &self,
        epoch: u64,
        term: &CancellationToken,
        err: TsoError,
    ) -> ControlFlow<()> {
        if term.is_cancelled() {
            return ControlFlow::Break(());
        }
        match err {
            TsoError::ClockAnomaly { stream, reason } => {
                tracing::error!(%stream, epoch, reason = %reason, "Clock anomaly, resigning leadership");
                self.guard.request_resign(epoch, reason);
                ControlFlow::Break(())
            }
            TsoError::VersionConflict { .. } | TsoError::NotLeader { .. } => {
                tracing::warn!(epoch, error = %err, "Re-verifying leadership");
                if !self.guard.check_leadership().await || self.guard.current_epoch() != Some(epoch) {
                    return ControlFlow::Break(());
                }
                self.recover_engines(epoch, term).await
            }
            other => {
                tracing::warn!(epoch, error = %other, "Allocator tick failed");
                ControlFlow::Continue(())
            }
        }
    }

    /// Re-initialize every engine that lost its cursor during the term.
    async fn recover_engines(&self, epoch: u64, term: &CancellationToken) -> ControlFlow<()> {
        for engine in self.engines().filter(|engine| !engine.is_ready()) {
            if let Err(e) = self.initialize_engine(engine, epoch).await {
                self.on_init_failure(epoch, term, e);
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn initialize_engine(&self, engine: &TsoAllocator, epoch: u64) -> Result<(), TsoError> {
        let mut attempt = 0;
        loop {
            match engine.initialize(epoch).await {
                Err(TsoError::VersionConflict { .. }) if attempt + 1 < INIT_CONFLICT_RETRIES => {
                    attempt += 1;
                    if !self.guard.check_leadership().await {
                        return Err(TsoError::NotLeader {
                            stream: engine.stream().clone(),
                        });
                    }
                    tracing::warn!(stream = %engine.stream(), attempt, "Checkpoint conflict during initialization, retrying");
                }
                result => return result,
            }
        }
    }

    fn on_init_failure(&self, epoch: u64, term: &CancellationToken, err: TsoError) {
        if term.is_cancelled() || matches!(err, TsoError::NotLeader { .. } | TsoError::Cancelled { .. }) {
            tracing::info!(epoch, error = %err, "Allocator initialization abandoned");
            return;
        }
        tracing::error!(epoch, error = %err, "Allocator initialization failed, resigning leadership");
        self.guard.request_resign(epoch, format!("initialization failed: {err}"));
    }
}

impl ElectionObserver for AllocatorManager {
    fn on_leadership_lost(&self, epoch: u64) {
        self.term.lock().cancel();
        for engine in self.engines() {
            engine.reset();
        }
        tracing::info!(epoch, "Allocator engines invalidated");
    }
}

impl Readiness for AllocatorManager {
    fn is_ready(&self) -> bool {
        self.global.is_ready()
    }
}
