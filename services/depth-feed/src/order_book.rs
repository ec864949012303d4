//! In-memory order book replica
//!
//! Mirrors the exchange book from a REST snapshot plus incremental depth
//! diffs. Levels are stored in hash maps keyed by exact `Decimal` price so
//! the per-diff hot path is O(1) per change; sorted price vectors are cached
//! and rebuilt lazily (dirty flag) on the first query after a mutation, so
//! the O(n log n) sort is paid once per read rather than once per diff.
//!
//! Sequencing follows the exchange's diff-depth contract:
//! - `first_id > last_update_id + 1` → gap, nothing applied
//! - `last_id <= last_update_id` → already applied, nothing to do
//! - otherwise apply every change and advance `last_update_id`
//!
//! The book never repairs a gap on its own; the owner re-seeds it.

use std::collections::HashMap;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use types::numeric::{BinSize, Price, Quantity};

/// One `[price, quantity]` pair from a snapshot or diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelUpdate {
    pub price: Price,
    /// New total at this price; zero removes the level.
    pub quantity: Quantity,
}

impl LevelUpdate {
    pub fn new(price: Price, quantity: Quantity) -> Self {
        Self { price, quantity }
    }
}

/// A single row of the raw (unbinned) ladder. One side is always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub bid_qty: Decimal,
    pub ask_qty: Decimal,
}

/// Resting quantity aggregated into one fixed-width price bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinnedLevel {
    /// Center of the bin.
    pub bin_center: Decimal,
    pub bid_qty: Decimal,
    pub ask_qty: Decimal,
}

/// Result of offering a depth diff to the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Changes applied and `last_update_id` advanced.
    Applied,
    /// Diff was already covered by the current state; nothing changed.
    Stale,
    /// Diff starts past the next expected id; nothing changed.
    Gap { expected: u64, first_id: u64 },
}

impl UpdateOutcome {
    /// True for `Applied` and `Stale`, false for `Gap`.
    pub fn is_applied(&self) -> bool {
        !matches!(self, UpdateOutcome::Gap { .. })
    }
}

/// Authoritative replica of resting bid/ask quantity for one symbol.
#[derive(Debug, Clone)]
pub struct BookStore {
    /// Bid levels: price → quantity (never stores quantity <= 0).
    bids: HashMap<Decimal, Decimal>,
    /// Ask levels: price → quantity (never stores quantity <= 0).
    asks: HashMap<Decimal, Decimal>,
    /// Last diff id folded into the book (snapshot id right after a load).
    last_update_id: u64,
    /// Whether a snapshot has been loaded.
    loaded: bool,
    /// Cached bid prices, descending (best bid first).
    bid_prices_sorted: Vec<Decimal>,
    /// Cached ask prices, ascending (best ask first).
    ask_prices_sorted: Vec<Decimal>,
    /// Set on every mutation; cleared by `ensure_sorted`.
    dirty: bool,
}

impl BookStore {
    /// Create an empty, not-yet-loaded book.
    pub fn new() -> Self {
        Self {
            bids: HashMap::new(),
            asks: HashMap::new(),
            last_update_id: 0,
            loaded: false,
            bid_prices_sorted: Vec::new(),
            ask_prices_sorted: Vec::new(),
            dirty: false,
        }
    }

    /// Replace the whole book with a snapshot.
    ///
    /// Levels with zero quantity are discarded.
    pub fn load_snapshot(&mut self, snapshot_id: u64, bids: &[LevelUpdate], asks: &[LevelUpdate]) {
        self.bids.clear();
        self.asks.clear();

        for level in bids {
            if !level.quantity.is_zero() {
                self.bids
                    .insert(level.price.as_decimal(), level.quantity.as_decimal());
            }
        }
        for level in asks {
            if !level.quantity.is_zero() {
                self.asks
                    .insert(level.price.as_decimal(), level.quantity.as_decimal());
            }
        }

        self.last_update_id = snapshot_id;
        self.loaded = true;
        self.dirty = true;

        info!(
            snapshot_id,
            bid_levels = self.bids.len(),
            ask_levels = self.asks.len(),
            "Book snapshot loaded"
        );
    }

    /// Offer one depth diff covering ids `first_id..=last_id`.
    ///
    /// The sequencing decision is made before anything is touched, so a
    /// rejected diff leaves the book exactly as it was.
    pub fn apply_update(
        &mut self,
        first_id: u64,
        last_id: u64,
        bid_changes: &[LevelUpdate],
        ask_changes: &[LevelUpdate],
    ) -> UpdateOutcome {
        let expected = self.last_update_id.saturating_add(1);

        if first_id > expected {
            debug!(
                first_id,
                last_id,
                expected,
                "Depth diff rejected: sequence gap"
            );
            return UpdateOutcome::Gap { expected, first_id };
        }

        if last_id <= self.last_update_id {
            return UpdateOutcome::Stale;
        }

        apply_changes(&mut self.bids, bid_changes);
        apply_changes(&mut self.asks, ask_changes);

        self.last_update_id = last_id;
        self.dirty = true;
        UpdateOutcome::Applied
    }

    /// Best (highest) bid price.
    pub fn best_bid(&mut self) -> Option<Decimal> {
        self.ensure_sorted();
        self.bid_prices_sorted.first().copied()
    }

    /// Best (lowest) ask price.
    pub fn best_ask(&mut self) -> Option<Decimal> {
        self.ensure_sorted();
        self.ask_prices_sorted.first().copied()
    }

    /// Average of best bid and best ask; the non-empty side alone if only
    /// one side has levels; zero for an empty book.
    pub fn mid_price(&mut self) -> Decimal {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => (bid + ask) / Decimal::TWO,
            (Some(bid), None) => bid,
            (None, Some(ask)) => ask,
            (None, None) => Decimal::ZERO,
        }
    }

    /// Raw ladder: up to `levels` asks nearest the spread above up to
    /// `levels` bids, in descending price order.
    pub fn ladder(&mut self, levels: usize) -> Vec<PriceLevel> {
        self.ensure_sorted();

        let ask_count = levels.min(self.ask_prices_sorted.len());
        let bid_count = levels.min(self.bid_prices_sorted.len());
        let mut result = Vec::with_capacity(ask_count + bid_count);

        for price in self.ask_prices_sorted[..ask_count].iter().rev() {
            result.push(PriceLevel {
                price: *price,
                bid_qty: Decimal::ZERO,
                ask_qty: self.asks.get(price).copied().unwrap_or_default(),
            });
        }
        for price in &self.bid_prices_sorted[..bid_count] {
            result.push(PriceLevel {
                price: *price,
                bid_qty: self.bids.get(price).copied().unwrap_or_default(),
                ask_qty: Decimal::ZERO,
            });
        }

        result
    }

    /// Ladder aggregated into `2 * levels + 1` bins centered on the bin
    /// containing the mid price, in descending price order.
    ///
    /// Every resting level that maps into an allocated bin is counted, not
    /// just the top of book. Levels outside the window are left out.
    /// Returns an empty vector for an empty book.
    pub fn binned_ladder(&mut self, bin_size: BinSize, levels: usize) -> Vec<BinnedLevel> {
        let mid = self.mid_price();
        if mid.is_zero() {
            return Vec::new();
        }

        let size = bin_size.as_decimal();
        let span = levels as i64;
        let center = bin_size.bin_center(mid);
        let lowest_center = bin_size.offset(center, -span);
        // Allocated window is [low, high): bins are half-open.
        let low = lowest_center - size / Decimal::TWO;
        let high = low + size * Decimal::from(2 * span + 1);

        let mut bins: Vec<BinnedLevel> = (0..=2 * span)
            .map(|i| BinnedLevel {
                bin_center: bin_size.offset(lowest_center, i),
                bid_qty: Decimal::ZERO,
                ask_qty: Decimal::ZERO,
            })
            .collect();

        let bin_index = |price: Decimal| ((price - low) / size).floor().to_usize();

        // Bids are cached descending: skip everything at or above `high`.
        let bid_start = self.bid_prices_sorted.partition_point(|p| *p >= high);
        for price in self.bid_prices_sorted[bid_start..]
            .iter()
            .take_while(|p| **p >= low)
        {
            if let Some(bin) = bin_index(*price).and_then(|i| bins.get_mut(i)) {
                bin.bid_qty += self.bids.get(price).copied().unwrap_or_default();
            }
        }

        // Asks are cached ascending: skip everything below `low`.
        let ask_start = self.ask_prices_sorted.partition_point(|p| *p < low);
        for price in self.ask_prices_sorted[ask_start..]
            .iter()
            .take_while(|p| **p < high)
        {
            if let Some(bin) = bin_index(*price).and_then(|i| bins.get_mut(i)) {
                bin.ask_qty += self.asks.get(price).copied().unwrap_or_default();
            }
        }

        bins.reverse();
        bins
    }

    /// Last diff id folded into the book.
    pub fn last_update_id(&self) -> u64 {
        self.last_update_id
    }

    /// Whether a snapshot has been loaded.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Number of bid price levels.
    pub fn bid_depth(&self) -> usize {
        self.bids.len()
    }

    /// Number of ask price levels.
    pub fn ask_depth(&self) -> usize {
        self.asks.len()
    }

    /// Resting quantity at an exact bid price.
    pub fn bid_quantity(&self, price: Decimal) -> Option<Decimal> {
        self.bids.get(&price).copied()
    }

    /// Resting quantity at an exact ask price.
    pub fn ask_quantity(&self, price: Decimal) -> Option<Decimal> {
        self.asks.get(&price).copied()
    }

    /// Sum of all resting bid quantity.
    pub fn total_bid_quantity(&self) -> Decimal {
        self.bids.values().copied().sum()
    }

    /// Sum of all resting ask quantity.
    pub fn total_ask_quantity(&self) -> Decimal {
        self.asks.values().copied().sum()
    }

    /// Rebuild the cached sorted price vectors if the book changed.
    fn ensure_sorted(&mut self) {
        if !self.dirty {
            return;
        }

        self.bid_prices_sorted.clear();
        self.bid_prices_sorted.extend(self.bids.keys().copied());
        self.bid_prices_sorted.sort_unstable_by(|a, b| b.cmp(a));

        self.ask_prices_sorted.clear();
        self.ask_prices_sorted.extend(self.asks.keys().copied());
        self.ask_prices_sorted.sort_unstable();

        self.dirty = false;
    }
}

impl Default for BookStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Upsert positive quantities, remove zero quantities.
fn apply_changes(levels: &mut HashMap<Decimal, Decimal>, changes: &[LevelUpdate]) {
    for change in changes {
        let price = change.price.as_decimal();
        if change.quantity.is_zero() {
            levels.remove(&price);
        } else {
            levels.insert(price, change.quantity.as_decimal());
        }
    }
}
