//! Feed diagnostics
//!
//! Instance-scoped counters shared between the feed task and whoever wants
//! to read them (a status line, a health probe). Counters are relaxed
//! atomics; the two latency trackers sit behind a mutex and are touched once
//! per view or snapshot, never per diff.
//!
//! `UpdateRate` is the rolling updates-per-second figure carried in every
//! published view.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Counters for one feed instance.
#[derive(Debug)]
pub struct FeedMetrics {
    // Inbound
    pub frames_received: AtomicU64,
    pub malformed_frames: AtomicU64,
    pub trades_processed: AtomicU64,

    // Book sequencing
    pub diffs_applied: AtomicU64,
    pub diffs_stale: AtomicU64,
    pub diffs_buffered: AtomicU64,
    pub pending_dropped: AtomicU64,
    pub gaps_detected: AtomicU64,
    pub resyncs: AtomicU64,

    // Snapshots
    pub snapshots_loaded: AtomicU64,
    pub snapshot_failures: AtomicU64,
    pub snapshot_load_ns: Mutex<LatencyTracker>,

    // Output
    pub views_published: AtomicU64,
    pub views_dropped: AtomicU64,
    pub view_build_ns: Mutex<LatencyTracker>,
}

impl FeedMetrics {
    pub fn new() -> Self {
        Self {
            frames_received: AtomicU64::new(0),
            malformed_frames: AtomicU64::new(0),
            trades_processed: AtomicU64::new(0),
            diffs_applied: AtomicU64::new(0),
            diffs_stale: AtomicU64::new(0),
            diffs_buffered: AtomicU64::new(0),
            pending_dropped: AtomicU64::new(0),
            gaps_detected: AtomicU64::new(0),
            resyncs: AtomicU64::new(0),
            snapshots_loaded: AtomicU64::new(0),
            snapshot_failures: AtomicU64::new(0),
            snapshot_load_ns: Mutex::new(LatencyTracker::new(100)),
            views_published: AtomicU64::new(0),
            views_dropped: AtomicU64::new(0),
            view_build_ns: Mutex::new(LatencyTracker::new(1000)),
        }
    }

    pub fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_trade(&self) {
        self.trades_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_diff_applied(&self) {
        self.diffs_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_diff_stale(&self) {
        self.diffs_stale.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_diff_buffered(&self) {
        self.diffs_buffered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pending_dropped(&self) {
        self.pending_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gap(&self) {
        self.gaps_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resync(&self) {
        self.resyncs.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a snapshot loaded into the book.
    pub fn record_snapshot_loaded(&self, load_ns: u64) {
        self.snapshots_loaded.fetch_add(1, Ordering::Relaxed);
        self.snapshot_load_ns.lock().record(load_ns);
    }

    pub fn record_snapshot_failure(&self) {
        self.snapshot_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a view handed to the output channel.
    pub fn record_view(&self, build_ns: u64, dropped_oldest: bool) {
        self.views_published.fetch_add(1, Ordering::Relaxed);
        if dropped_oldest {
            self.views_dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.view_build_ns.lock().record(build_ns);
    }

    /// Export counters as a name → value map.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let counters = [
            ("frames_received", &self.frames_received),
            ("malformed_frames", &self.malformed_frames),
            ("trades_processed", &self.trades_processed),
            ("diffs_applied", &self.diffs_applied),
            ("diffs_stale", &self.diffs_stale),
            ("diffs_buffered", &self.diffs_buffered),
            ("pending_dropped", &self.pending_dropped),
            ("gaps_detected", &self.gaps_detected),
            ("resyncs", &self.resyncs),
            ("snapshots_loaded", &self.snapshots_loaded),
            ("snapshot_failures", &self.snapshot_failures),
            ("views_published", &self.views_published),
            ("views_dropped", &self.views_dropped),
        ];

        let mut m: BTreeMap<String, u64> = counters
            .iter()
            .map(|(name, counter)| (name.to_string(), counter.load(Ordering::Relaxed)))
            .collect();

        if let Some(p99) = self.view_build_ns.lock().percentile(99) {
            m.insert("view_build_p99_ns".to_string(), p99);
        }
        if let Some(avg) = self.snapshot_load_ns.lock().average() {
            m.insert("snapshot_load_avg_ns".to_string(), avg);
        }
        m
    }
}

impl Default for FeedMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded window of latency samples.
#[derive(Debug)]
pub struct LatencyTracker {
    samples: VecDeque<u64>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples: max_samples.max(1),
        }
    }

    /// Record a sample, evicting the oldest when full.
    pub fn record(&mut self, value: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Get a percentile value (0-100).
    pub fn percentile(&self, p: usize) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }

        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (p.min(100) as f64 / 100.0 * (sorted.len() - 1) as f64) as usize;
        sorted.get(idx.min(sorted.len() - 1)).copied()
    }

    pub fn average(&self) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: u64 = self.samples.iter().sum();
        Some(sum / self.samples.len() as u64)
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }
}

/// Rolling updates-per-second, recomputed at most once per second.
#[derive(Debug, Clone)]
pub struct UpdateRate {
    count: u64,
    count_at_last_calc: u64,
    last_calc: Instant,
    rate: f64,
}

impl UpdateRate {
    const PERIOD: Duration = Duration::from_secs(1);

    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// Start measuring from `now`.
    pub fn starting_at(now: Instant) -> Self {
        Self {
            count: 0,
            count_at_last_calc: 0,
            last_calc: now,
            rate: 0.0,
        }
    }

    /// Count one applied update.
    pub fn record(&mut self) {
        self.count += 1;
    }

    /// Recompute the rate if a full period has passed; returns the current
    /// rate either way.
    pub fn refresh(&mut self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_calc);
        if elapsed >= Self::PERIOD {
            let delta = self.count - self.count_at_last_calc;
            self.rate = delta as f64 / elapsed.as_secs_f64();
            self.count_at_last_calc = self.count;
            self.last_calc = now;
        }
        self.rate
    }

    /// Rate from the most recent recomputation.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Updates counted since creation.
    pub fn total(&self) -> u64 {
        self.count
    }
}

impl Default for UpdateRate {
    fn default() -> Self {
        Self::new()
    }
}
