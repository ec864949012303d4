//! Feed orchestration
//!
//! Glues the book, the flow aggregator and the output channel together and
//! runs the snapshot/diff sequencing protocol:
//!
//! - Buffering: depth diffs queue up (bounded, oldest dropped first) until
//!   a snapshot arrives; trades are folded into the flow window right away
//! - Snapshot load: seed the book, replay the queued diffs in arrival order,
//!   go Live
//! - Live: every diff is applied on arrival; a sequence gap sends the feed
//!   back to Buffering until a fresh snapshot is loaded
//!
//! Views are published at most once per publish interval and only while
//! Live, so a consumer never sees a half-seeded book.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, trace, warn};
use types::ids::Symbol;
use types::trade::Trade;

use crate::backpressure::{PublishOutcome, SnapshotSender};
use crate::config::FeedConfig;
use crate::error::FeedError;
use crate::events::{decode_frame, DepthDiff, DepthSnapshot, FeedMessage};
use crate::flow::FlowAggregator;
use crate::metrics::{FeedMetrics, UpdateRate};
use crate::order_book::{BookStore, UpdateOutcome};
use crate::snapshot::{DepthView, SnapshotBuilder};

/// Where the orchestrator is in the sequencing protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    /// Waiting for a snapshot; diffs are queued.
    Buffering,
    /// Book seeded; diffs apply on arrival.
    Live,
}

/// What happened to one depth diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthOutcome {
    /// Queued until the next snapshot.
    Buffered,
    /// Applied to the book.
    Applied,
    /// Already covered by the book; ignored.
    Stale,
}

/// Counts from replaying queued diffs after a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplaySummary {
    pub applied: usize,
    pub stale: usize,
}

/// Single-writer owner of the book and the flow window.
pub struct FeedOrchestrator {
    symbol: Symbol,
    state: FeedState,
    book: BookStore,
    flow: FlowAggregator,
    /// Diffs received while Buffering, in arrival order.
    pending: VecDeque<DepthDiff>,
    max_pending: usize,
    /// Set once the pending queue has overflowed since the last snapshot.
    pending_overflowed: bool,
    builder: SnapshotBuilder,
    rate: UpdateRate,
    publish_interval: Duration,
    last_publish: Option<Instant>,
    output: SnapshotSender<DepthView>,
    metrics: Arc<FeedMetrics>,
}

impl FeedOrchestrator {
    /// Create an orchestrator in the Buffering state.
    pub fn new(
        config: &FeedConfig,
        output: SnapshotSender<DepthView>,
        metrics: Arc<FeedMetrics>,
    ) -> Self {
        info!(
            symbol = %config.symbol,
            bin_size = %config.bin_size,
            levels = config.levels,
            publish_interval_ms = config.publish_interval.as_millis() as u64,
            max_pending_diffs = config.max_pending_diffs,
            "FeedOrchestrator initialized"
        );

        Self {
            symbol: config.symbol.clone(),
            state: FeedState::Buffering,
            book: BookStore::new(),
            flow: FlowAggregator::with_cleanup_interval(
                config.bin_size,
                config.flow_window,
                config.cleanup_interval,
            ),
            pending: VecDeque::new(),
            max_pending: config.max_pending_diffs.max(1),
            pending_overflowed: false,
            builder: SnapshotBuilder::new(config.symbol.clone(), config.bin_size, config.levels),
            rate: UpdateRate::new(),
            publish_interval: config.publish_interval,
            last_publish: None,
            output,
            metrics,
        }
    }

    /// Decode and handle one raw stream frame.
    pub fn handle_frame(&mut self, raw: &str) -> Result<(), FeedError> {
        self.metrics.record_frame();

        let message = match decode_frame(raw) {
            Ok(message) => message,
            Err(err) => {
                self.metrics.record_malformed();
                warn!(symbol = %self.symbol, error = %err, "Skipping malformed frame");
                return Err(err);
            }
        };

        self.handle_message(message)
    }

    /// Route a decoded message.
    pub fn handle_message(&mut self, message: FeedMessage) -> Result<(), FeedError> {
        trace!(kind = message.label(), "Handling feed message");
        match message {
            FeedMessage::Depth(diff) => self.process_depth(diff).map(|_| ()),
            FeedMessage::Trade(trade) => {
                self.process_trade(&trade);
                Ok(())
            }
            FeedMessage::Other => {
                Ok(())
            }
        }
    }

    /// Offer one depth diff.
    ///
    /// A gap while Live returns `FeedError::SequenceGap` after switching
    /// back to Buffering; the diff that exposed the gap is kept for replay.
    pub fn process_depth(&mut self, diff: DepthDiff) -> Result<DepthOutcome, FeedError> {
        if self.state == FeedState::Buffering {
            self.buffer_diff(diff);
            return Ok(DepthOutcome::Buffered);
        }

        let outcome =
            self.book
                .apply_update(diff.first_update_id, diff.final_update_id, &diff.bids, &diff.asks);

        match outcome {
            UpdateOutcome::Applied => {
                self.rate.record();
                self.metrics.record_diff_applied();
                trace!(last_update_id = diff.final_update_id, "Depth diff applied");
                Ok(DepthOutcome::Applied)
            }
            UpdateOutcome::Stale => {
                self.metrics.record_diff_stale();
                debug!(
                    first_id = diff.first_update_id,
                    last_id = diff.final_update_id,
                    book_last = self.book.last_update_id(),
                    "Stale depth diff ignored"
                );
                Ok(DepthOutcome::Stale)
            }
            UpdateOutcome::Gap { expected, first_id } => {
                self.metrics.record_gap();
                warn!(
                    symbol = %self.symbol,
                    expected,
                    first_id,
                    "Sequence gap while live, resyncing from a fresh snapshot"
                );
                self.resync();
                self.buffer_diff(diff);
                Err(FeedError::SequenceGap { expected, first_id })
            }
        }
    }

    /// Fold a trade into the flow window. Trades never wait for a snapshot.
    pub fn process_trade(&mut self, trade: &Trade) {
        self.flow.process_trade(trade);
        self.metrics.record_trade();
    }

    /// Seed the book and replay queued diffs.
    ///
    /// If replay hits a gap the snapshot is older than the queued stream
    /// can bridge; the feed stays in Buffering with the unreplayed diffs
    /// kept, and a newer snapshot is needed.
    pub fn load_snapshot(&mut self, snapshot: DepthSnapshot) -> Result<ReplaySummary, FeedError> {
        let started = Instant::now();

        self.book
            .load_snapshot(snapshot.last_update_id, &snapshot.bids, &snapshot.asks);
        self.metrics
            .record_snapshot_loaded(started.elapsed().as_nanos() as u64);

        let mut summary = ReplaySummary::default();
        while let Some(diff) = self.pending.pop_front() {
            match self.book.apply_update(
                diff.first_update_id,
                diff.final_update_id,
                &diff.bids,
                &diff.asks,
            ) {
                UpdateOutcome::Applied => {
                    summary.applied += 1;
                    self.rate.record();
                    self.metrics.record_diff_applied();
                }
                UpdateOutcome::Stale => {
                    summary.stale += 1;
                    self.metrics.record_diff_stale();
                }
                UpdateOutcome::Gap { expected, first_id } => {
                    self.metrics.record_gap();
                    warn!(
                        symbol = %self.symbol,
                        snapshot_id = snapshot.last_update_id,
                        expected,
                        first_id,
                        pending = self.pending.len() + 1,
                        "Snapshot too old for buffered diffs, requesting another"
                    );
                    self.pending.push_front(diff);
                    self.state = FeedState::Buffering;
                    return Err(FeedError::SequenceGap { expected, first_id });
                }
            }
        }

        self.state = FeedState::Live;
        self.pending_overflowed = false;

        info!(
            symbol = %self.symbol,
            snapshot_id = snapshot.last_update_id,
            last_update_id = self.book.last_update_id(),
            replayed = summary.applied,
            skipped = summary.stale,
            "Book live"
        );
        Ok(summary)
    }

    /// Publish a view if Live and the publish interval has elapsed.
    pub fn maybe_publish(&mut self, now: Instant, timestamp_ms: i64) -> Option<PublishOutcome> {
        if self.state != FeedState::Live {
            return None;
        }
        if let Some(last) = self.last_publish {
            if now.saturating_duration_since(last) < self.publish_interval {
                return None;
            }
        }
        self.last_publish = Some(now);

        let updates_per_sec = self.rate.refresh(now);
        let started = Instant::now();
        let view = self
            .builder
            .build(&mut self.book, &self.flow, timestamp_ms, updates_per_sec);
        let build_ns = started.elapsed().as_nanos() as u64;

        let outcome = self.output.publish(view);
        self.metrics
            .record_view(build_ns, outcome == PublishOutcome::DroppedOldest);
        Some(outcome)
    }

    /// `maybe_publish` against the current clocks.
    pub fn maybe_publish_now(&mut self) -> Option<PublishOutcome> {
        self.maybe_publish(Instant::now(), Utc::now().timestamp_millis())
    }

    /// Drop back to Buffering and discard queued diffs.
    ///
    /// Called on a live gap and whenever the stream is reconnected, since
    /// frames missed in between cannot be recovered from the stream. The
    /// flow window is kept.
    pub fn resync(&mut self) {
        if self.state == FeedState::Live {
            self.metrics.record_resync();
            info!(
                symbol = %self.symbol,
                last_update_id = self.book.last_update_id(),
                "Book resync requested"
            );
        }
        self.state = FeedState::Buffering;
        self.pending.clear();
        self.pending_overflowed = false;
    }

    /// Clear the flow window (user action).
    pub fn reset_flow(&mut self) {
        self.flow.reset();
    }

    pub fn state(&self) -> FeedState {
        self.state
    }

    /// Whether a snapshot must be fetched before the book is usable.
    pub fn needs_snapshot(&self) -> bool {
        self.state == FeedState::Buffering
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn book(&self) -> &BookStore {
        &self.book
    }

    /// Mutable book access for queries that re-sort.
    pub fn book_mut(&mut self) -> &mut BookStore {
        &mut self.book
    }

    pub fn flow(&self) -> &FlowAggregator {
        &self.flow
    }

    /// Number of views built so far.
    pub fn views_built(&self) -> u64 {
        self.builder.current_version()
    }

    /// Diffs applied since the orchestrator was created.
    pub fn diffs_applied_total(&self) -> u64 {
        self.rate.total()
    }

    /// Number of diffs waiting for a snapshot.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Most recently computed updates-per-second.
    pub fn updates_per_sec(&self) -> f64 {
        self.rate.rate()
    }

    pub fn metrics(&self) -> &Arc<FeedMetrics> {
        &self.metrics
    }

    fn buffer_diff(&mut self, diff: DepthDiff) {
        if self.pending.len() >= self.max_pending {
            self.pending.pop_front();
            self.metrics.record_pending_dropped();
            if !self.pending_overflowed {
                self.pending_overflowed = true;
                warn!(
                    symbol = %self.symbol,
                    capacity = self.max_pending,
                    "Pending diff buffer full, dropping oldest diffs until a snapshot arrives"
                );
            }
        }
        self.pending.push_back(diff);
        self.metrics.record_diff_buffered();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backpressure::{snapshot_channel, SnapshotReceiver};
    use crate::order_book::LevelUpdate;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn lvl(price: &str, qty: &str) -> LevelUpdate {
        LevelUpdate::new(price.parse().unwrap(), qty.parse().unwrap())
    }

    fn make_diff(first: u64, last: u64, bids: Vec<LevelUpdate>, asks: Vec<LevelUpdate>) -> DepthDiff {
        DepthDiff {
            first_update_id: first,
            final_update_id: last,
            event_time_ms: 0,
            bids,
            asks,
        }
    }

    fn make_snapshot(id: u64) -> DepthSnapshot {
        DepthSnapshot {
            last_update_id: id,
            bids: vec![lvl("100.00", "5"), lvl("99.50", "2")],
            asks: vec![lvl("100.50", "3"), lvl("101.00", "4")],
        }
    }

    fn orchestrator_with(config: FeedConfig) -> (FeedOrchestrator, SnapshotReceiver<DepthView>) {
        let (tx, rx) = snapshot_channel(config.channel_capacity);
        let orch = FeedOrchestrator::new(&config, tx, Arc::new(FeedMetrics::new()));
        (orch, rx)
    }

    fn orchestrator() -> (FeedOrchestrator, SnapshotReceiver<DepthView>) {
        orchestrator_with(FeedConfig::default())
    }

    #[test]
    fn test_starts_buffering() {
        let (orch, _rx) = orchestrator();
        assert_eq!(orch.state(), FeedState::Buffering);
        assert!(orch.needs_snapshot());
        assert!(!orch.book().is_loaded());
    }

    #[test]
    fn test_diffs_buffer_until_snapshot() {
        let (mut orch, _rx) = orchestrator();
        let outcome = orch
            .process_depth(make_diff(1001, 1001, vec![lvl("99.50", "0")], vec![]))
            .unwrap();
        assert_eq!(outcome, DepthOutcome::Buffered);
        assert_eq!(orch.pending_len(), 1);
        assert_eq!(orch.book().bid_depth(), 0);
    }

    #[test]
    fn test_snapshot_replays_buffered_diffs() {
        let (mut orch, _rx) = orchestrator();
        // Older than the snapshot: must be skipped.
        orch.process_depth(make_diff(990, 995, vec![lvl("42", "1")], vec![]))
            .unwrap();
        // Straddles the snapshot id.
        orch.process_depth(make_diff(998, 1001, vec![lvl("99.50", "0")], vec![]))
            .unwrap();
        orch.process_depth(make_diff(1002, 1003, vec![lvl("100.00", "6")], vec![]))
            .unwrap();

        let summary = orch.load_snapshot(make_snapshot(1000)).unwrap();
        assert_eq!(summary, ReplaySummary { applied: 2, stale: 1 });
        assert_eq!(orch.state(), FeedState::Live);
        assert_eq!(orch.pending_len(), 0);
        assert_eq!(orch.book().last_update_id(), 1003);
        assert!(orch.book().bid_quantity(dec("99.5")).is_none());
        assert!(orch.book().bid_quantity(dec("42")).is_none());
        assert_eq!(orch.book().bid_quantity(dec("100")), Some(dec("6")));
    }

    #[test]
    fn test_replay_gap_keeps_buffering() {
        let (mut orch, _rx) = orchestrator();
        orch.process_depth(make_diff(1010, 1012, vec![], vec![])).unwrap();

        let err = orch.load_snapshot(make_snapshot(1000)).unwrap_err();
        assert_eq!(
            err,
            FeedError::SequenceGap {
                expected: 1001,
                first_id: 1010
            }
        );
        assert!(orch.needs_snapshot());
        assert_eq!(orch.pending_len(), 1);

        // A newer snapshot bridges the queued diff.
        let summary = orch.load_snapshot(make_snapshot(1011)).unwrap();
        assert_eq!(summary.applied, 1);
        assert_eq!(orch.state(), FeedState::Live);
        assert_eq!(orch.book().last_update_id(), 1012);
    }

    #[test]
    fn test_live_gap_triggers_resync() {
        let (mut orch, _rx) = orchestrator();
        orch.load_snapshot(make_snapshot(1000)).unwrap();

        assert_eq!(
            orch.process_depth(make_diff(1001, 1001, vec![], vec![])).unwrap(),
            DepthOutcome::Applied
        );
        assert_eq!(
            orch.process_depth(make_diff(1001, 1001, vec![], vec![])).unwrap(),
            DepthOutcome::Stale
        );

        let err = orch
            .process_depth(make_diff(1005, 1006, vec![lvl("100.00", "1")], vec![]))
            .unwrap_err();
        assert!(matches!(err, FeedError::SequenceGap { expected: 1002, first_id: 1005 }));
        assert!(orch.needs_snapshot());
        assert_eq!(orch.pending_len(), 1);
        // Book untouched by the rejected diff.
        assert_eq!(orch.book().bid_quantity(dec("100")), Some(dec("5")));
        assert_eq!(orch.metrics().export()["resyncs"], 1);
    }

    #[test]
    fn test_resync_after_reconnect() {
        let (mut orch, rx) = orchestrator();
        orch.load_snapshot(make_snapshot(1000)).unwrap();
        orch.process_trade(&Trade::new("99.50".parse().unwrap(), "1".parse().unwrap(), false, 0));

        orch.resync();
        assert!(orch.needs_snapshot());
        assert!(orch.maybe_publish(Instant::now(), 0).is_none());
        assert!(rx.is_empty());
        // Flow survives a resync.
        assert_eq!(orch.flow().bid_volume(dec("99.5")), Some(dec("1")));

        // Resync while already buffering is not counted twice.
        orch.resync();
        assert_eq!(orch.metrics().export()["resyncs"], 1);
    }

    #[test]
    fn test_pending_overflow_drops_oldest() {
        let config = FeedConfig {
            max_pending_diffs: 2,
            ..FeedConfig::default()
        };
        let (mut orch, _rx) = orchestrator_with(config);
        for id in [1, 2, 3] {
            orch.process_depth(make_diff(id, id, vec![], vec![])).unwrap();
        }
        assert_eq!(orch.pending_len(), 2);
        assert_eq!(orch.metrics().export()["pending_dropped"], 1);

        // Remaining diffs (2, 3) replay cleanly onto snapshot 1.
        let summary = orch.load_snapshot(make_snapshot(1)).unwrap();
        assert_eq!(summary.applied, 2);
    }

    #[test]
    fn test_trades_apply_while_buffering() {
        let (mut orch, _rx) = orchestrator();
        let trade = Trade::new("99.50".parse().unwrap(), "1".parse().unwrap(), false, 0);
        orch.handle_message(FeedMessage::Trade(trade)).unwrap();

        assert!(orch.needs_snapshot());
        assert_eq!(orch.flow().bid_volume(dec("99.5")), Some(dec("1")));
    }

    #[test]
    fn test_publish_only_when_live() {
        let (mut orch, rx) = orchestrator();
        let now = Instant::now();
        assert!(orch.maybe_publish(now, 0).is_none());
        assert!(rx.is_empty());

        orch.load_snapshot(make_snapshot(1000)).unwrap();
        assert_eq!(orch.maybe_publish(now, 0), Some(PublishOutcome::Queued));
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn test_publish_is_throttled() {
        let (mut orch, rx) = orchestrator();
        orch.load_snapshot(make_snapshot(1000)).unwrap();
        let t0 = Instant::now();

        assert!(orch.maybe_publish(t0, 0).is_some());
        assert!(orch.maybe_publish(t0 + Duration::from_millis(50), 50).is_none());
        assert!(orch.maybe_publish(t0 + Duration::from_millis(100), 100).is_some());
        assert_eq!(rx.len(), 2);

        let views: Vec<u64> = std::iter::from_fn(|| rx.try_recv()).map(|v| v.version).collect();
        assert_eq!(views, vec![1, 2]);
    }

    #[test]
    fn test_published_view_contents() {
        let (mut orch, rx) = orchestrator();
        orch.load_snapshot(make_snapshot(1000)).unwrap();
        orch.process_trade(&Trade::new("99.50".parse().unwrap(), "1".parse().unwrap(), false, 0));

        orch.maybe_publish(Instant::now(), 1_700_000_000_000);
        let view = rx.try_recv().unwrap();

        assert_eq!(view.best_bid, dec("100"));
        assert_eq!(view.best_ask, dec("100.5"));
        assert_eq!(view.mid_price, dec("100.25"));
        assert_eq!(view.timestamp_ms, 1_700_000_000_000);
        assert_eq!(view.levels.len(), 51);
        let bin = view.levels.iter().find(|l| l.price == dec("99.5")).unwrap();
        assert_eq!(bin.bid_traded_qty, dec("1"));
        assert_eq!(bin.delta_qty, dec("1"));
    }

    #[test]
    fn test_channel_drops_oldest_views() {
        let config = FeedConfig {
            channel_capacity: 2,
            ..FeedConfig::default()
        };
        let (mut orch, rx) = orchestrator_with(config);
        orch.load_snapshot(make_snapshot(1000)).unwrap();

        let t0 = Instant::now();
        for i in 0..4u64 {
            orch.maybe_publish(t0 + Duration::from_millis(100 * i), 0);
        }
        assert_eq!(rx.len(), 2);
        assert_eq!(rx.try_recv().unwrap().version, 3);
        assert_eq!(orch.metrics().export()["views_dropped"], 2);
    }

    #[test]
    fn test_malformed_frame_is_counted() {
        let (mut orch, _rx) = orchestrator();
        assert!(orch.handle_frame("{not json").is_err());
        assert!(orch.handle_frame(r#"{"result":null,"id":1}"#).is_ok());

        let exported = orch.metrics().export();
        assert_eq!(exported["frames_received"], 2);
        assert_eq!(exported["malformed_frames"], 1);
    }

    #[test]
    fn test_reset_flow() {
        let (mut orch, _rx) = orchestrator();
        orch.process_trade(&Trade::new("99.50".parse().unwrap(), "1".parse().unwrap(), true, 0));
        orch.reset_flow();
        assert!(orch.flow().is_empty());
    }

    #[test]
    fn test_lifetime_totals() {
        let (mut orch, _rx) = orchestrator();
        orch.process_depth(make_diff(1001, 1001, vec![], vec![])).unwrap();
        orch.load_snapshot(make_snapshot(1000)).unwrap();
        orch.process_depth(make_diff(1002, 1002, vec![], vec![])).unwrap();
        orch.process_depth(make_diff(1002, 1002, vec![], vec![])).unwrap();

        assert_eq!(orch.diffs_applied_total(), 2);
        assert_eq!(orch.views_built(), 0);
        orch.maybe_publish(Instant::now(), 0);
        assert_eq!(orch.views_built(), 1);
    }
}
