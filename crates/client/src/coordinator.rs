//! Shared polling loop for conversions that are still in flight.
//!
//! One coordinator owns one timer task for its whole active set. The task
//! exists only while there is something to poll: it is spawned on
//! [`ReconciliationCoordinator::start`] or [`ReconciliationCoordinator::track`]
//! and exits once every tracked conversion is terminal, after
//! [`MAX_SILENT_FAILURES`] consecutive fetch errors, or on
//! [`ReconciliationCoordinator::stop`].
//!
//! The published [`StatusView`] only ever contains snapshots returned by the
//! server.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt, Shared};
use sheetflow_core::conversion::ConversionSnapshot;
use sheetflow_core::status::ConversionStatus;
use sheetflow_core::types::ConversionId;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cache::{SnapshotCache, DEFAULT_TTL};
use crate::fetcher::{FetchError, StatusFetcher};

/// Largest id set sent in one batch request.
pub const MAX_BATCH_IDS: usize = 50;

/// Consecutive fetch failures after which polling pauses.
///
/// With the default threshold the last wait before pausing is 4x the base
/// interval; the [`MAX_BACKOFF_FACTOR`] cap only matters for coordinators
/// configured with a higher `max_silent_failures`.
pub const MAX_SILENT_FAILURES: u32 = 3;

/// Cap on the backoff multiplier.
pub const MAX_BACKOFF_FACTOR: u32 = 8;

/// Time source for cache expiry.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// [`Clock`] backed by the tokio timer, so paused test time applies.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Base interval while any tracked conversion is `processing`.
    pub processing_interval: Duration,
    /// Base interval otherwise.
    pub pending_interval: Duration,
    pub cache_ttl: Duration,
    pub max_silent_failures: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            processing_interval: Duration::from_secs(2),
            pending_interval: Duration::from_secs(5),
            cache_ttl: DEFAULT_TTL,
            max_silent_failures: MAX_SILENT_FAILURES,
        }
    }
}

/// What observers of the coordinator see.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusView {
    /// Last snapshot fetched for each tracked conversion.
    pub snapshots: BTreeMap<ConversionId, ConversionSnapshot>,
    /// Whether the timer task is running.
    pub polling: bool,
    pub consecutive_failures: u32,
    /// Polling gave up; call [`ReconciliationCoordinator::retry_now`].
    pub needs_manual_retry: bool,
    pub last_error: Option<String>,
}

/// `base * min(2^failures, 8)`.
pub fn poll_interval(base: Duration, failures: u32) -> Duration {
    let factor = 2u32
        .checked_pow(failures)
        .unwrap_or(MAX_BACKOFF_FACTOR)
        .min(MAX_BACKOFF_FACTOR);
    base * factor
}

type BatchResult = Result<Vec<ConversionSnapshot>, FetchError>;
type SharedFetch = Shared<BoxFuture<'static, BatchResult>>;

struct Timer {
    generation: u64,
    cancel: CancellationToken,
}

struct State {
    running: bool,
    paused: bool,
    failures: u32,
    active: BTreeSet<ConversionId>,
    latest: HashMap<ConversionId, ConversionStatus>,
    cache: SnapshotCache,
    timer: Option<Timer>,
    generation: u64,
}

impl State {
    fn can_poll(&self) -> bool {
        self.running && !self.paused && !self.active.is_empty()
    }
}

struct Inner {
    fetcher: Arc<dyn StatusFetcher>,
    clock: Arc<dyn Clock>,
    config: CoordinatorConfig,
    state: Mutex<State>,
    in_flight: Mutex<HashMap<String, SharedFetch>>,
    view: watch::Sender<StatusView>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    fn next_interval(&self) -> Duration {
        let state = self.state();
        let any_processing = state
            .active
            .iter()
            .any(|id| state.latest.get(id) == Some(&ConversionStatus::Processing));
        let base = if any_processing {
            self.config.processing_interval
        } else {
            self.config.pending_interval
        };
        poll_interval(base, state.failures)
    }

    /// Sorted, de-duplicated, chunked fetch. Identical chunks already in
    /// flight are awaited rather than re-sent.
    async fn fetch_batch(&self, ids: &[ConversionId]) -> BatchResult {
        let unique: Vec<ConversionId> = ids
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if unique.is_empty() {
            return Ok(Vec::new());
        }

        let chunks = unique
            .chunks(MAX_BATCH_IDS)
            .map(|chunk| self.fetch_chunk(chunk.to_vec()));
        let snapshots: Vec<ConversionSnapshot> = future::try_join_all(chunks)
            .await?
            .into_iter()
            .flatten()
            .collect();

        self.absorb(&snapshots);
        Ok(snapshots)
    }

    /// Cache every fetched snapshot and publish the ones still tracked.
    /// Tracked ids that came back terminal leave the active set here, so
    /// every fetch path prunes them, not only the timer.
    fn absorb(&self, snapshots: &[ConversionSnapshot]) {
        let now = self.clock.now();
        let mut state = self.state();
        let mut tracked = Vec::new();
        for snapshot in snapshots {
            state.cache.insert(snapshot.clone(), now);
            if !state.active.contains(&snapshot.id) {
                continue;
            }
            if snapshot.status.is_terminal() {
                state.active.remove(&snapshot.id);
                state.latest.remove(&snapshot.id);
            } else {
                state.latest.insert(snapshot.id, snapshot.status);
            }
            tracked.push(snapshot.clone());
        }
        if tracked.is_empty() {
            return;
        }
        self.view.send_modify(|view| {
            for snapshot in tracked {
                view.snapshots.insert(snapshot.id, snapshot);
            }
        });
    }

    async fn fetch_chunk(&self, chunk: Vec<ConversionId>) -> BatchResult {
        let key = chunk
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");

        let shared = {
            let mut in_flight = lock(&self.in_flight);
            if let Some(existing) = in_flight.get(&key).cloned() {
                existing
            } else {
                let fetcher = Arc::clone(&self.fetcher);
                let request = async move { fetcher.fetch_batch(&chunk).await }
                    .boxed()
                    .shared();
                in_flight.insert(key.clone(), request.clone());
                request
            }
        };

        let result = shared.clone().await;

        let mut in_flight = lock(&self.in_flight);
        if in_flight.get(&key).is_some_and(|f| f.ptr_eq(&shared)) {
            in_flight.remove(&key);
        }
        result
    }

    /// One polling round. Returns whether polling should continue.
    async fn reconcile(&self) -> bool {
        let ids: Vec<ConversionId> = {
            let state = self.state();
            if state.paused {
                return false;
            }
            state.active.iter().copied().collect()
        };
        if ids.is_empty() {
            return false;
        }

        match self.fetch_batch(&ids).await {
            Ok(snapshots) => self.record_success(&ids, &snapshots),
            Err(e) => self.record_failure(e),
        }
    }

    /// Snapshots were already absorbed by the fetch; this drops requested
    /// ids the server no longer returns and clears the failure streak.
    fn record_success(&self, requested: &[ConversionId], snapshots: &[ConversionSnapshot]) -> bool {
        let mut state = self.state();
        state.failures = 0;

        let returned: HashSet<ConversionId> = snapshots.iter().map(|s| s.id).collect();
        let missing: Vec<ConversionId> = requested
            .iter()
            .filter(|id| !returned.contains(id) && state.active.contains(id))
            .copied()
            .collect();
        for id in &missing {
            tracing::debug!(conversion_id = %id, "Conversion no longer visible, untracking");
            state.active.remove(id);
            state.latest.remove(id);
        }
        let keep_polling = state.can_poll();

        self.view.send_modify(|view| {
            for id in &missing {
                view.snapshots.remove(id);
            }
            view.consecutive_failures = 0;
            view.needs_manual_retry = false;
            view.last_error = None;
        });
        keep_polling
    }

    fn record_failure(&self, error: FetchError) -> bool {
        let mut state = self.state();
        state.failures += 1;
        let failures = state.failures;
        let exhausted = failures >= self.config.max_silent_failures;
        if exhausted {
            state.paused = true;
            tracing::warn!(failures, error = %error, "Status polling paused after repeated failures");
        } else {
            tracing::debug!(failures, error = %error, "Status poll failed");
        }

        self.view.send_modify(|view| {
            view.consecutive_failures = failures;
            view.needs_manual_retry = exhausted;
            view.last_error = Some(error.to_string());
        });
        !exhausted
    }

    fn ensure_timer(self: &Arc<Self>, state: &mut State) {
        if !state.can_poll() || state.timer.is_some() {
            return;
        }
        state.generation += 1;
        let generation = state.generation;
        let cancel = CancellationToken::new();
        state.timer = Some(Timer {
            generation,
            cancel: cancel.clone(),
        });

        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.run_timer(generation, cancel).await });
        self.view.send_modify(|view| view.polling = true);
    }

    async fn run_timer(self: Arc<Self>, generation: u64, cancel: CancellationToken) {
        loop {
            let delay = self.next_interval();
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            if self.reconcile().await {
                continue;
            }
            if self.release_timer(generation) {
                return;
            }
        }
    }

    /// Clear the timer slot unless new work arrived meanwhile. Returns
    /// `true` when the task should exit.
    fn release_timer(&self, generation: u64) -> bool {
        let mut state = self.state();
        if state.can_poll() {
            return false;
        }
        if state.timer.as_ref().is_some_and(|t| t.generation == generation) {
            state.timer = None;
        }
        self.view.send_modify(|view| view.polling = false);
        true
    }

    fn cancel_timer(&self, state: &mut State) {
        if let Some(timer) = state.timer.take() {
            timer.cancel.cancel();
            self.view.send_modify(|view| view.polling = false);
        }
    }
}

/// Keeps tracked conversions in sync with the server. See the module docs.
pub struct ReconciliationCoordinator {
    inner: Arc<Inner>,
}

impl ReconciliationCoordinator {
    pub fn new(
        fetcher: Arc<dyn StatusFetcher>,
        clock: Arc<dyn Clock>,
        config: CoordinatorConfig,
    ) -> Self {
        let (view, _) = watch::channel(StatusView::default());
        let state = State {
            running: false,
            paused: false,
            failures: 0,
            active: BTreeSet::new(),
            latest: HashMap::new(),
            cache: SnapshotCache::new(config.cache_ttl),
            timer: None,
            generation: 0,
        };
        Self {
            inner: Arc::new(Inner {
                fetcher,
                clock,
                config,
                state: Mutex::new(state),
                in_flight: Mutex::new(HashMap::new()),
                view,
            }),
        }
    }

    /// Begin polling. Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut state = self.inner.state();
        state.running = true;
        self.inner.ensure_timer(&mut state);
    }

    /// Stop polling and cancel the timer task. Tracked ids are kept.
    pub fn stop(&self) {
        let mut state = self.inner.state();
        state.running = false;
        self.inner.cancel_timer(&mut state);
    }

    /// Add conversions to the active set.
    pub fn track(&self, ids: impl IntoIterator<Item = ConversionId>) {
        let mut state = self.inner.state();
        state.active.extend(ids);
        self.inner.ensure_timer(&mut state);
    }

    pub fn untrack(&self, id: ConversionId) {
        let mut state = self.inner.state();
        state.active.remove(&id);
        state.latest.remove(&id);
        state.cache.remove(&id);
        if state.active.is_empty() {
            self.inner.cancel_timer(&mut state);
        }
        drop(state);
        self.inner.view.send_modify(|view| {
            view.snapshots.remove(&id);
        });
    }

    /// A single snapshot, served from cache while fresh.
    pub async fn get(
        &self,
        id: ConversionId,
    ) -> Result<Option<ConversionSnapshot>, FetchError> {
        let now = self.inner.clock.now();
        let cached = self.inner.state().cache.get(&id, now);
        if cached.is_some() {
            return Ok(cached);
        }
        let mut fetched = self.inner.fetch_batch(&[id]).await?;
        Ok(fetched.pop())
    }

    /// Fetch snapshots for `ids`, bypassing the cache. Concurrent calls for
    /// the same id set share one request.
    pub async fn fetch_batch(
        &self,
        ids: &[ConversionId],
    ) -> Result<Vec<ConversionSnapshot>, FetchError> {
        self.inner.fetch_batch(ids).await
    }

    /// Poll immediately and resume the timer if polling had paused.
    pub async fn retry_now(&self) {
        {
            let mut state = self.inner.state();
            state.paused = false;
        }
        self.inner.view.send_modify(|view| view.needs_manual_retry = false);

        self.inner.reconcile().await;

        let mut state = self.inner.state();
        self.inner.ensure_timer(&mut state);
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusView> {
        self.inner.view.subscribe()
    }

    pub fn view(&self) -> StatusView {
        self.inner.view.borrow().clone()
    }

    /// Whether a timer task currently exists.
    pub fn is_polling(&self) -> bool {
        self.inner.state().timer.is_some()
    }

    pub fn active_ids(&self) -> Vec<ConversionId> {
        self.inner.state().active.iter().copied().collect()
    }
}

impl Drop for ReconciliationCoordinator {
    fn drop(&mut self) {
        self.stop();
    }
}
