//! Depth view artifact
//!
//! The combined, read-only picture handed to renderers: binned resting depth
//! joined with rolling traded volume, plus top-of-book figures. Views are
//! versioned so a consumer can tell when it skipped some.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::ids::Symbol;
use types::numeric::BinSize;

use crate::flow::{FlowAggregator, FlowLevel};
use crate::order_book::BookStore;

const BPS: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);

/// One published view of the book and recent flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthView {
    /// Monotonic per builder, starting at 1.
    pub version: u64,
    pub symbol: Symbol,
    /// Zero when the bid side is empty.
    pub best_bid: Decimal,
    /// Zero when the ask side is empty.
    pub best_ask: Decimal,
    pub mid_price: Decimal,
    /// `(best_ask - best_bid) / mid * 10_000`, an empty side counting as zero;
    /// zero for an empty book.
    pub spread_bps: Decimal,
    /// Descending by price, asks above bids.
    pub levels: Vec<FlowLevel>,
    /// Wall-clock build time, Unix milliseconds.
    pub timestamp_ms: i64,
    pub updates_per_sec: f64,
    /// Book sequence point the view was built from.
    pub last_update_id: u64,
}

impl DepthView {
    /// Largest resting quantity on either side, for bar scaling.
    pub fn max_resting_qty(&self) -> Decimal {
        self.levels
            .iter()
            .map(|l| l.bid_resting_qty.max(l.ask_resting_qty))
            .max()
            .unwrap_or_default()
    }

    /// Largest absolute delta, for bar scaling.
    pub fn max_abs_delta(&self) -> Decimal {
        self.levels
            .iter()
            .map(|l| l.delta_qty.abs())
            .max()
            .unwrap_or_default()
    }
}

/// Builds versioned views from the book and the flow aggregator.
#[derive(Debug)]
pub struct SnapshotBuilder {
    symbol: Symbol,
    bin_size: BinSize,
    levels: usize,
    /// Current view version counter.
    version_counter: u64,
}

impl SnapshotBuilder {
    pub fn new(symbol: Symbol, bin_size: BinSize, levels: usize) -> Self {
        Self {
            symbol,
            bin_size,
            levels,
            version_counter: 0,
        }
    }

    /// Build the next view.
    ///
    /// Takes the book mutably only because its queries may re-sort the
    /// cached price order; no level is changed.
    pub fn build(
        &mut self,
        book: &mut BookStore,
        flow: &FlowAggregator,
        timestamp_ms: i64,
        updates_per_sec: f64,
    ) -> DepthView {
        self.version_counter += 1;

        let binned = book.binned_ladder(self.bin_size, self.levels);
        let levels = flow.merge_with_book(&binned);

        let best_bid = book.best_bid().unwrap_or_default();
        let best_ask = book.best_ask().unwrap_or_default();
        let mid_price = book.mid_price();

        DepthView {
            version: self.version_counter,
            symbol: self.symbol.clone(),
            best_bid,
            best_ask,
            mid_price,
            spread_bps: spread_bps(best_bid, best_ask, mid_price),
            levels,
            timestamp_ms,
            updates_per_sec,
            last_update_id: book.last_update_id(),
        }
    }

    /// Version of the most recent view.
    pub fn current_version(&self) -> u64 {
        self.version_counter
    }
}

/// Spread in basis points of the mid. An empty side counts as zero; an
/// empty book (zero mid) gives zero.
pub fn spread_bps(best_bid: Decimal, best_ask: Decimal, mid: Decimal) -> Decimal {
    if mid.is_zero() {
        return Decimal::ZERO;
    }
    (best_ask - best_bid) / mid * BPS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order_book::LevelUpdate;
    use std::str::FromStr;
    use std::time::Duration;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn lvl(price: &str, qty: &str) -> LevelUpdate {
        LevelUpdate::new(price.parse().unwrap(), qty.parse().unwrap())
    }

    fn builder() -> SnapshotBuilder {
        SnapshotBuilder::new(Symbol::try_new("BNBUSDT").unwrap(), "1".parse().unwrap(), 2)
    }

    #[test]
    fn test_spread_bps() {
        assert_eq!(spread_bps(dec("99"), dec("101"), dec("100")), dec("200"));
        assert_eq!(spread_bps(Decimal::ZERO, Decimal::ZERO, Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_build_versions_and_fields() {
        let mut book = BookStore::new();
        book.load_snapshot(7, &[lvl("99.00", "5")], &[lvl("101.00", "3")]);
        let flow = FlowAggregator::new("1".parse().unwrap(), Duration::from_secs(60));
        let mut builder = builder();

        let view = builder.build(&mut book, &flow, 1_700_000_000_000, 12.5);
        assert_eq!(view.version, 1);
        assert_eq!(view.symbol.as_str(), "BNBUSDT");
        assert_eq!(view.best_bid, dec("99"));
        assert_eq!(view.best_ask, dec("101"));
        assert_eq!(view.mid_price, dec("100"));
        assert_eq!(view.spread_bps, dec("200"));
        assert_eq!(view.levels.len(), 5);
        assert_eq!(view.last_update_id, 7);
        assert_eq!(view.updates_per_sec, 12.5);
        assert_eq!(view.max_resting_qty(), dec("5"));

        let next = builder.build(&mut book, &flow, 1_700_000_000_100, 12.5);
        assert_eq!(next.version, 2);
        assert_eq!(builder.current_version(), 2);
    }

    #[test]
    fn test_empty_book_view() {
        let mut book = BookStore::new();
        let flow = FlowAggregator::new("1".parse().unwrap(), Duration::from_secs(60));
        let view = builder().build(&mut book, &flow, 0, 0.0);

        assert!(view.levels.is_empty());
        assert_eq!(view.mid_price, Decimal::ZERO);
        assert_eq!(view.spread_bps, Decimal::ZERO);
        assert_eq!(view.max_abs_delta(), Decimal::ZERO);
    }

    #[test]
    fn test_one_sided_book_spread() {
        let flow = FlowAggregator::new("1".parse().unwrap(), Duration::from_secs(60));

        let mut asks_only = BookStore::new();
        asks_only.load_snapshot(1, &[], &[lvl("101.00", "3")]);
        let view = builder().build(&mut asks_only, &flow, 0, 0.0);
        assert_eq!(view.best_bid, Decimal::ZERO);
        assert_eq!(view.mid_price, dec("101"));
        assert_eq!(view.spread_bps, dec("10000"));

        let mut bids_only = BookStore::new();
        bids_only.load_snapshot(1, &[lvl("99.00", "5")], &[]);
        let view = builder().build(&mut bids_only, &flow, 0, 0.0);
        assert_eq!(view.best_ask, Decimal::ZERO);
        assert_eq!(view.spread_bps, dec("-10000"));
    }
}
