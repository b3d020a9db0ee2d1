//! Poll cycle controller.
//!
//! One sweep walks the roster × mode grid in order:
//! 1. Re-validate the destination channel (skip the tick if it is gone)
//! 2. Fetch recent results for each (player, mode)
//! 3. For each unseen result: record it, normalize, render, deliver
//! 4. Prune the (player, mode) partition to the retention window
//!
//! Iteration is strictly sequential; it is what keeps upstream traffic inside
//! the request budget the cadence was computed for.

mod context;
mod ticker;

pub use context::*;
pub use ticker::*;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::calculate::{normalize, NormalizeError};
use crate::fetch::{FetchError, ScoreSource};
use crate::models::{GameMode, Player, RawResult};
use crate::notify::{ChannelHandle, NotificationSink, NotifyError};
use crate::render::{RenderError, Renderer};
use crate::storage::{DedupStore, StorageError};

/// Errors that can occur during a sweep.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Normalize error: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Delivery error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Destination check failed, tick skipped: {0}")]
    Destination(NotifyError),

    #[error("A sweep is already in progress")]
    SweepInProgress,

    #[error("Sweep cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SweepStatus {
    #[default]
    Idle,
    Polling,
}

/// Shared view of the controller, updated at the start and end of each sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepState {
    pub status: SweepStatus,
    pub last_sweep_started: Option<DateTime<Utc>>,
    pub last_sweep_completed: Option<DateTime<Utc>>,

    /// Completed sweeps since startup
    pub sweeps_completed: u64,

    /// Ticks skipped because the destination was unavailable or a sweep
    /// was still running
    pub ticks_skipped: u64,

    pub notifications_sent: u64,

    /// Errors from the most recent sweep
    pub errors: Vec<String>,
}

/// Outcome of ingesting one result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Recorded now and delivered
    Notified,
    /// Recorded by an earlier sweep (or a concurrent insert)
    AlreadySeen,
}

/// Report of one sweep.
#[derive(Debug, Clone, Default)]
pub struct SweepResult {
    pub pairs_polled: u32,
    pub pairs_failed: u32,
    pub results_seen: u32,
    pub already_seen: u32,
    pub notifications_sent: u32,
    pub records_pruned: u32,
    pub errors: Vec<String>,
    pub duration: Duration,
}

/// Clears the in-flight flag when a sweep ends, however it ends.
struct SweepGuard<'a>(&'a AtomicBool);

impl<'a> SweepGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Poll cycle controller.
pub struct PollController {
    context: Arc<PollContext>,
    source: Arc<dyn ScoreSource>,
    store: DedupStore,
    renderer: Renderer,
    sink: Arc<dyn NotificationSink>,
    state: Arc<RwLock<SweepState>>,
    in_flight: AtomicBool,
    cancel_token: Arc<RwLock<bool>>,
}

impl PollController {
    pub fn new(
        context: PollContext,
        source: Arc<dyn ScoreSource>,
        store: DedupStore,
        renderer: Renderer,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            context: Arc::new(context),
            source,
            store,
            renderer,
            sink,
            state: Arc::new(RwLock::new(SweepState::default())),
            in_flight: AtomicBool::new(false),
            cancel_token: Arc::new(RwLock::new(false)),
        }
    }

    pub fn context(&self) -> &PollContext {
        &self.context
    }

    /// Get current sweep state.
    pub async fn state(&self) -> SweepState {
        self.state.read().await.clone()
    }

    /// Whether a sweep is in flight.
    pub fn is_polling(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Request cancellation; the current sweep stops before its next pair.
    pub async fn cancel(&self) {
        *self.cancel_token.write().await = true;
    }

    async fn is_cancelled(&self) -> bool {
        *self.cancel_token.read().await
    }

    async fn record_skip(&self, reason: String) {
        let mut state = self.state.write().await;
        state.ticks_skipped += 1;
        state.errors = vec![reason];
    }

    /// Run one full sweep. Fails without polling anything if a sweep is
    /// already in flight or the destination cannot be checked or posted to.
    pub async fn sweep_once(&self) -> Result<SweepResult, SyncError> {
        let Some(_guard) = SweepGuard::acquire(&self.in_flight) else {
            self.record_skip(SyncError::SweepInProgress.to_string()).await;
            return Err(SyncError::SweepInProgress);
        };

        {
            let mut state = self.state.write().await;
            state.status = SweepStatus::Polling;
            state.last_sweep_started = Some(Utc::now());
        }

        let result = self.sweep_inner().await;

        let mut state = self.state.write().await;
        state.status = SweepStatus::Idle;
        match &result {
            Ok(report) => {
                state.last_sweep_completed = Some(Utc::now());
                state.sweeps_completed += 1;
                state.notifications_sent += report.notifications_sent as u64;
                state.errors = report.errors.clone();
            }
            Err(e) => {
                if matches!(e, SyncError::Destination(_) | SyncError::Notify(_)) {
                    state.ticks_skipped += 1;
                }
                state.errors = vec![e.to_string()];
            }
        }

        result
    }

    async fn sweep_inner(&self) -> Result<SweepResult, SyncError> {
        let start = std::time::Instant::now();

        let channel = self
            .sink
            .resolve_destination(&self.context.channel_id)
            .await
            .map_err(|e| {
                warn!("Skipping tick: {}", e);
                if e.is_destination_error() {
                    SyncError::Destination(e)
                } else {
                    SyncError::Notify(e)
                }
            })?;

        info!(
            "Starting sweep over {} players ({} requests)",
            self.context.roster.len(),
            self.context.requests_per_sweep()
        );

        let mut report = SweepResult::default();

        for player in &self.context.roster {
            for &mode in &self.context.modes {
                if self.is_cancelled().await {
                    warn!("Sweep cancelled");
                    return Err(SyncError::Cancelled);
                }

                report.pairs_polled += 1;
                if let Err(e) = self.poll_pair(&channel, player, mode, &mut report).await {
                    warn!("Failed to poll {} ({}): {}", player.name, mode, e);
                    report.pairs_failed += 1;
                    report
                        .errors
                        .push(format!("{} ({}): {}", player.name, mode, e));
                }
            }
        }

        report.duration = start.elapsed();
        info!(
            "Sweep completed: {} results seen, {} notified, {} pruned, {} errors in {:?}",
            report.results_seen,
            report.notifications_sent,
            report.records_pruned,
            report.errors.len(),
            report.duration
        );

        Ok(report)
    }

    /// Fetch and ingest one (player, mode) pair, pruning the partition after
    /// every result. Only the fetch itself can fail the pair; per-result
    /// errors are collected into the report.
    async fn poll_pair(
        &self,
        channel: &ChannelHandle,
        player: &Player,
        mode: GameMode,
        report: &mut SweepResult,
    ) -> Result<(), FetchError> {
        let results = self.source.fetch_recent(player, mode).await?;
        debug!(
            "{} recent {} results for {}",
            results.len(),
            mode,
            player.name
        );

        for raw in &results {
            report.results_seen += 1;

            match self.ingest(channel, raw, mode).await {
                Ok(IngestOutcome::Notified) => report.notifications_sent += 1,
                Ok(IngestOutcome::AlreadySeen) => report.already_seen += 1,
                Err(e) => {
                    warn!("Score {} for {} not delivered: {}", raw.id, player.name, e);
                    report.errors.push(format!("score {}: {}", raw.id, e));
                }
            }

            match self
                .store
                .prune(player.id, mode, self.context.retention)
                .await
            {
                Ok(removed) => report.records_pruned += removed as u32,
                Err(e) => {
                    error!("Failed to prune {} ({}): {}", player.name, mode, e);
                    report
                        .errors
                        .push(format!("prune {} ({}): {}", player.name, mode, e));
                }
            }
        }

        Ok(())
    }

    /// Ingest one result: record it, then render and deliver it if it was not
    /// seen before. The record is written before delivery, so a failed
    /// delivery is not retried on the next sweep.
    pub async fn ingest(
        &self,
        channel: &ChannelHandle,
        raw: &RawResult,
        mode: GameMode,
    ) -> Result<IngestOutcome, SyncError> {
        if self.store.exists(raw.user_id, mode, raw.id).await? {
            return Ok(IngestOutcome::AlreadySeen);
        }

        match self.store.insert(raw.user_id, mode, raw.id).await {
            Ok(_) => {}
            Err(e) if e.is_conflict() => {
                debug!("Score {} recorded concurrently, skipping", raw.id);
                return Ok(IngestOutcome::AlreadySeen);
            }
            Err(e) => return Err(e.into()),
        }

        let normalized = normalize(raw)?;
        let payload = self.renderer.render(&normalized)?;
        self.sink.send(channel, &payload).await?;

        info!("Notified new score {}: {}", raw.id, payload.title);
        Ok(IngestOutcome::Notified)
    }

    /// Run sweeps until the ticker is exhausted or the controller is cancelled.
    /// Errors never end the loop.
    pub async fn run_periodic<T: Ticker>(self: Arc<Self>, mut ticker: T) {
        info!(
            "Starting periodic polling for {} players",
            self.context.roster.len()
        );

        loop {
            if !ticker.tick().await {
                info!("Ticker exhausted, periodic polling stopped");
                break;
            }

            if self.is_cancelled().await {
                info!("Periodic polling stopped");
                break;
            }

            match self.sweep_once().await {
                Ok(result) => {
                    debug!(
                        "Periodic sweep completed: {} notifications",
                        result.notifications_sent
                    );
                }
                Err(SyncError::Cancelled) => {
                    info!("Periodic polling cancelled");
                    break;
                }
                Err(SyncError::SweepInProgress) => {
                    warn!("Previous sweep still running, skipping tick");
                }
                Err(e) => {
                    error!("Sweep failed: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use tokio::sync::{mpsc, Notify};
    use tokio_test::assert_ok;

    use crate::models::{fixtures, PlayerRef, RawStatistics};
    use crate::render::NotificationPayload;

    /// Score source backed by a map; can fail chosen pairs or block on a gate.
    #[derive(Default)]
    struct MockSource {
        results: Mutex<HashMap<(u64, GameMode), Vec<RawResult>>>,
        failing: Mutex<HashSet<(u64, GameMode)>>,
        calls: AtomicUsize,
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    impl MockSource {
        fn set(&self, player_id: u64, mode: GameMode, results: Vec<RawResult>) {
            self.results
                .lock()
                .unwrap()
                .insert((player_id, mode), results);
        }

        fn fail(&self, player_id: u64, mode: GameMode) {
            self.failing.lock().unwrap().insert((player_id, mode));
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ScoreSource for MockSource {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn fetch_player(&self, player: &PlayerRef) -> Result<Player, FetchError> {
            match player {
                PlayerRef::Id(id) => Ok(Player::new(*id, format!("player{}", id))),
                PlayerRef::Name(name) => Err(FetchError::PlayerNotFound(name.clone())),
            }
        }

        async fn fetch_recent(
            &self,
            player: &Player,
            mode: GameMode,
        ) -> Result<Vec<RawResult>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if let Some((entered, release)) = &self.gate {
                entered.notify_one();
                release.notified().await;
            }

            if self.failing.lock().unwrap().contains(&(player.id, mode)) {
                return Err(FetchError::HttpStatus {
                    status: 503,
                    message: "Service Unavailable".to_string(),
                });
            }

            Ok(self
                .results
                .lock()
                .unwrap()
                .get(&(player.id, mode))
                .cloned()
                .unwrap_or_default())
        }
    }

    /// Sink that records deliveries; destination and delivery can be broken.
    #[derive(Default)]
    struct MockSink {
        sent: Mutex<Vec<NotificationPayload>>,
        unavailable: AtomicBool,
        flaky_lookup: AtomicBool,
        failing_sends: AtomicBool,
    }

    impl MockSink {
        fn sent(&self) -> Vec<NotificationPayload> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NotificationSink for MockSink {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn resolve_destination(
            &self,
            channel_id: &str,
        ) -> Result<ChannelHandle, NotifyError> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(NotifyError::DestinationUnavailable {
                    channel_id: channel_id.to_string(),
                    reason: "HTTP 404".to_string(),
                });
            }
            if self.flaky_lookup.load(Ordering::SeqCst) {
                return Err(NotifyError::HttpStatus {
                    status: 502,
                    message: "Bad Gateway".to_string(),
                });
            }
            Ok(ChannelHandle {
                id: channel_id.to_string(),
                name: None,
            })
        }

        async fn send(
            &self,
            _channel: &ChannelHandle,
            payload: &NotificationPayload,
        ) -> Result<(), NotifyError> {
            if self.failing_sends.load(Ordering::SeqCst) {
                return Err(NotifyError::HttpStatus {
                    status: 500,
                    message: "Internal Server Error".to_string(),
                });
            }
            self.sent.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }

    /// Ticker fed by a channel; ends when the sender is dropped.
    struct ChannelTicker(mpsc::Receiver<()>);

    #[async_trait]
    impl Ticker for ChannelTicker {
        async fn tick(&mut self) -> bool {
            self.0.recv().await.is_some()
        }
    }

    fn roster() -> Vec<Player> {
        vec![Player::new(1, "alice"), Player::new(2, "bob")]
    }

    async fn controller(
        source: Arc<MockSource>,
        sink: Arc<MockSink>,
        store: DedupStore,
    ) -> PollController {
        PollController::new(
            PollContext::new(roster(), "channel"),
            source,
            store,
            Renderer::default(),
            sink,
        )
    }

    fn channel() -> ChannelHandle {
        ChannelHandle {
            id: "channel".to_string(),
            name: None,
        }
    }

    #[tokio::test]
    async fn test_sweep_notifies_new_results_once() {
        let source = Arc::new(MockSource::default());
        let sink = Arc::new(MockSink::default());
        source.set(
            1,
            GameMode::Osu,
            vec![
                fixtures::raw_result(11, 1, GameMode::Osu),
                fixtures::raw_result(10, 1, GameMode::Osu),
            ],
        );
        source.set(2, GameMode::Mania, vec![fixtures::raw_result(20, 2, GameMode::Mania)]);

        let store = DedupStore::in_memory().await.unwrap();
        let controller = controller(source.clone(), sink.clone(), store).await;

        let first = controller.sweep_once().await.unwrap();
        assert_eq!(first.pairs_polled, 8);
        assert_eq!(first.results_seen, 3);
        assert_eq!(first.notifications_sent, 3);
        assert!(first.errors.is_empty());
        assert_eq!(source.calls(), 8);

        let second = controller.sweep_once().await.unwrap();
        assert_eq!(second.results_seen, 3);
        assert_eq!(second.already_seen, 3);
        assert_eq!(second.notifications_sent, 0);
        assert_eq!(sink.sent().len(), 3);

        let state = controller.state().await;
        assert_eq!(state.status, SweepStatus::Idle);
        assert_eq!(state.sweeps_completed, 2);
        assert_eq!(state.notifications_sent, 3);
    }

    #[tokio::test]
    async fn test_ingest_is_idempotent() {
        let source = Arc::new(MockSource::default());
        let sink = Arc::new(MockSink::default());
        let store = DedupStore::in_memory().await.unwrap();
        let controller = controller(source, sink.clone(), store).await;

        let raw = fixtures::raw_result(500, 1, GameMode::Taiko);
        let first = controller.ingest(&channel(), &raw, GameMode::Taiko).await;
        let second = controller.ingest(&channel(), &raw, GameMode::Taiko).await;

        assert_eq!(assert_ok!(first), IngestOutcome::Notified);
        assert_eq!(assert_ok!(second), IngestOutcome::AlreadySeen);
        assert_eq!(sink.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_scoped_to_pair() {
        let source = Arc::new(MockSource::default());
        let sink = Arc::new(MockSink::default());
        source.fail(1, GameMode::Taiko);
        source.set(1, GameMode::Mania, vec![fixtures::raw_result(3, 1, GameMode::Mania)]);
        source.set(2, GameMode::Osu, vec![fixtures::raw_result(4, 2, GameMode::Osu)]);

        let store = DedupStore::in_memory().await.unwrap();
        let controller = controller(source.clone(), sink.clone(), store).await;

        let result = controller.sweep_once().await.unwrap();
        assert_eq!(result.pairs_polled, 8);
        assert_eq!(result.pairs_failed, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("alice (taiko)"));
        assert_eq!(result.notifications_sent, 2);
    }

    #[tokio::test]
    async fn test_unavailable_destination_skips_tick() {
        let source = Arc::new(MockSource::default());
        let sink = Arc::new(MockSink::default());
        source.set(1, GameMode::Osu, vec![fixtures::raw_result(1, 1, GameMode::Osu)]);
        sink.unavailable.store(true, Ordering::SeqCst);

        let store = DedupStore::in_memory().await.unwrap();
        let controller = controller(source.clone(), sink.clone(), store.clone()).await;

        let err = controller.sweep_once().await.unwrap_err();
        assert!(matches!(err, SyncError::Destination(_)));
        assert_eq!(source.calls(), 0);
        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(controller.state().await.ticks_skipped, 1);

        // Re-checked on the next tick
        sink.unavailable.store(false, Ordering::SeqCst);
        let result = controller.sweep_once().await.unwrap();
        assert_eq!(result.notifications_sent, 1);
    }

    #[tokio::test]
    async fn test_failed_destination_lookup_is_not_a_destination_error() {
        let source = Arc::new(MockSource::default());
        let sink = Arc::new(MockSink::default());
        sink.flaky_lookup.store(true, Ordering::SeqCst);

        let store = DedupStore::in_memory().await.unwrap();
        let controller = controller(source.clone(), sink, store).await;

        let err = controller.sweep_once().await.unwrap_err();
        assert!(matches!(err, SyncError::Notify(NotifyError::HttpStatus { status: 502, .. })));
        assert_eq!(source.calls(), 0);
        assert_eq!(controller.state().await.ticks_skipped, 1);
    }

    #[tokio::test]
    async fn test_undefined_accuracy_suppresses_notification() {
        let source = Arc::new(MockSource::default());
        let sink = Arc::new(MockSink::default());

        let mut broken = fixtures::raw_result(7, 1, GameMode::Osu);
        broken.accuracy = None;
        broken.statistics = RawStatistics::default();
        source.set(
            1,
            GameMode::Osu,
            vec![broken, fixtures::raw_result(6, 1, GameMode::Osu)],
        );

        let store = DedupStore::in_memory().await.unwrap();
        let controller = controller(source, sink.clone(), store.clone()).await;

        let result = controller.sweep_once().await.unwrap();
        assert_eq!(result.notifications_sent, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("score 7"));
        assert_eq!(sink.sent().len(), 1);

        // Recorded anyway, so it is not retried every tick
        assert!(store.exists(1, GameMode::Osu, 7).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_grade_suppresses_only_that_result() {
        let source = Arc::new(MockSource::default());
        let sink = Arc::new(MockSink::default());

        let mut failed = fixtures::raw_result(9, 2, GameMode::Taiko);
        failed.rank = "F".to_string();
        source.set(
            2,
            GameMode::Taiko,
            vec![failed, fixtures::raw_result(8, 2, GameMode::Taiko)],
        );

        let store = DedupStore::in_memory().await.unwrap();
        let controller = controller(source, sink.clone(), store).await;

        let result = controller.sweep_once().await.unwrap();
        assert_eq!(result.notifications_sent, 1);
        assert!(result.errors[0].contains("Unknown grade"));
    }

    #[tokio::test]
    async fn test_failed_delivery_is_not_retried() {
        let source = Arc::new(MockSource::default());
        let sink = Arc::new(MockSink::default());
        source.set(1, GameMode::Osu, vec![fixtures::raw_result(1, 1, GameMode::Osu)]);
        sink.failing_sends.store(true, Ordering::SeqCst);

        let store = DedupStore::in_memory().await.unwrap();
        let controller = controller(source, sink.clone(), store).await;

        let first = controller.sweep_once().await.unwrap();
        assert_eq!(first.notifications_sent, 0);
        assert_eq!(first.errors.len(), 1);

        sink.failing_sends.store(false, Ordering::SeqCst);
        let second = controller.sweep_once().await.unwrap();
        assert_eq!(second.already_seen, 1);
        assert!(sink.sent().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_prunes_to_retention() {
        let source = Arc::new(MockSource::default());
        let sink = Arc::new(MockSink::default());
        let results: Vec<RawResult> = (1..=15u64)
            .rev()
            .map(|id| fixtures::raw_result(id, 1, GameMode::Fruits))
            .collect();
        source.set(1, GameMode::Fruits, results);

        let store = DedupStore::in_memory().await.unwrap();
        let controller = controller(source, sink.clone(), store.clone()).await;

        let result = controller.sweep_once().await.unwrap();
        assert_eq!(result.notifications_sent, 15);
        assert_eq!(result.records_pruned, 5);

        let partition = store.list_partition(1, GameMode::Fruits).await.unwrap();
        assert_eq!(partition.len(), 10);
    }

    #[tokio::test]
    async fn test_restart_does_not_renotify() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("dedup.db");
        let source = Arc::new(MockSource::default());
        source.set(
            2,
            GameMode::Osu,
            vec![
                fixtures::raw_result(31, 2, GameMode::Osu),
                fixtures::raw_result(30, 2, GameMode::Osu),
            ],
        );

        let first_sink = Arc::new(MockSink::default());
        {
            let store = DedupStore::open(&path).await.unwrap();
            let controller = controller(source.clone(), first_sink.clone(), store.clone()).await;
            controller.sweep_once().await.unwrap();
            store.close().await;
        }
        assert_eq!(first_sink.sent().len(), 2);

        let second_sink = Arc::new(MockSink::default());
        let store = DedupStore::open(&path).await.unwrap();
        let controller = controller(source, second_sink.clone(), store).await;
        let result = controller.sweep_once().await.unwrap();

        assert_eq!(result.already_seen, 2);
        assert!(second_sink.sent().is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_sweep_is_rejected() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let source = Arc::new(MockSource {
            gate: Some((entered.clone(), release.clone())),
            ..Default::default()
        });
        let sink = Arc::new(MockSink::default());
        let store = DedupStore::in_memory().await.unwrap();

        let controller = Arc::new(PollController::new(
            PollContext::new(vec![Player::new(1, "alice")], "channel"),
            source,
            store,
            Renderer::default(),
            sink,
        ));

        let running = tokio::spawn({
            let controller = controller.clone();
            async move { controller.sweep_once().await }
        });

        entered.notified().await;
        assert!(controller.is_polling());
        assert!(matches!(
            controller.sweep_once().await,
            Err(SyncError::SweepInProgress)
        ));

        // Let the four gated fetches of the first sweep through
        for _ in 0..GameMode::COUNT {
            release.notify_one();
            tokio::task::yield_now().await;
        }
        let first = running.await.unwrap().unwrap();
        assert_eq!(first.pairs_polled, 4);
        assert!(!controller.is_polling());
        assert_eq!(controller.state().await.ticks_skipped, 1);
    }

    #[tokio::test]
    async fn test_run_periodic_with_manual_ticker() {
        let source = Arc::new(MockSource::default());
        let sink = Arc::new(MockSink::default());
        source.set(1, GameMode::Osu, vec![fixtures::raw_result(1, 1, GameMode::Osu)]);

        let store = DedupStore::in_memory().await.unwrap();
        let controller = Arc::new(controller(source.clone(), sink.clone(), store).await);

        let (tx, rx) = mpsc::channel(4);
        tx.send(()).await.unwrap();
        tx.send(()).await.unwrap();
        drop(tx);

        controller.clone().run_periodic(ChannelTicker(rx)).await;

        assert_eq!(source.calls(), 16);
        assert_eq!(sink.sent().len(), 1);
        assert_eq!(controller.state().await.sweeps_completed, 2);
    }

    #[tokio::test]
    async fn test_cancel_stops_periodic_loop() {
        let source = Arc::new(MockSource::default());
        let sink = Arc::new(MockSink::default());
        let store = DedupStore::in_memory().await.unwrap();
        let controller = Arc::new(controller(source.clone(), sink, store).await);

        controller.cancel().await;
        let (tx, rx) = mpsc::channel(1);
        tx.send(()).await.unwrap();

        controller.clone().run_periodic(ChannelTicker(rx)).await;
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_context_resolution() {
        let source = MockSource::default();
        let context = PollContext::resolve(&[PlayerRef::Id(5), PlayerRef::Id(6)], &source, "c")
            .await
            .unwrap();
        assert_eq!(context.roster.len(), 2);
        assert_eq!(context.roster[1].name, "player6");

        let err = PollContext::resolve(&[PlayerRef::Name("ghost".to_string())], &source, "c")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::PlayerNotFound(_)));
    }

    #[test]
    fn test_sweep_status_serialization() {
        let json = serde_json::to_string(&SweepStatus::Polling).unwrap();
        assert_eq!(json, "\"polling\"");
    }
}
