//! Rolling-window trade flow
//!
//! Accumulates traded volume per price bin, split by the column the print
//! is counted on, over a sliding time window. Every trade is O(1): it bumps
//! a running total and appends to an ordered history. Expired history is
//! evicted at most once per cleanup interval, so the cost of trimming the
//! window is amortized across many trades.
//!
//! Eviction walks the history oldest-first and stops at the first entry
//! still inside the window, which relies on trade timestamps being
//! non-decreasing (true for a single exchange trade stream).

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use types::numeric::BinSize;
use types::side::Side;
use types::trade::Trade;

use crate::order_book::BinnedLevel;

/// One ladder row: resting depth joined with recent traded volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowLevel {
    /// Bin center.
    pub price: Decimal,
    pub bid_resting_qty: Decimal,
    pub ask_resting_qty: Decimal,
    pub bid_traded_qty: Decimal,
    pub ask_traded_qty: Decimal,
    /// `bid_traded_qty - ask_traded_qty`.
    pub delta_qty: Decimal,
}

/// Traded volume for one bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BinFlow {
    pub bid_traded: Decimal,
    pub ask_traded: Decimal,
    pub delta: Decimal,
}

/// A trade contribution still inside the window.
#[derive(Debug, Clone, Copy)]
struct FlowEntry {
    timestamp_ms: i64,
    bin_center: Decimal,
    quantity: Decimal,
    side: Side,
}

/// Rolling traded-volume accumulator keyed by bin center.
#[derive(Debug)]
pub struct FlowAggregator {
    bin_size: BinSize,
    window_ms: i64,
    cleanup_interval: Duration,
    /// Contributions in arrival order.
    history: VecDeque<FlowEntry>,
    /// Bin center → traded quantity counted on the bid column.
    bid_volume: HashMap<Decimal, Decimal>,
    /// Bin center → traded quantity counted on the ask column.
    ask_volume: HashMap<Decimal, Decimal>,
    /// Wall-clock time of the last eviction pass.
    last_cleanup: Option<Instant>,
}

impl FlowAggregator {
    /// Create an empty aggregator with the default 1 s cleanup interval.
    pub fn new(bin_size: BinSize, window: Duration) -> Self {
        Self::with_cleanup_interval(bin_size, window, Duration::from_secs(1))
    }

    pub fn with_cleanup_interval(
        bin_size: BinSize,
        window: Duration,
        cleanup_interval: Duration,
    ) -> Self {
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);

        info!(
            bin_size = %bin_size,
            window_ms,
            cleanup_interval_ms = cleanup_interval.as_millis() as u64,
            "FlowAggregator initialized"
        );

        Self {
            bin_size,
            window_ms,
            cleanup_interval,
            history: VecDeque::new(),
            bid_volume: HashMap::new(),
            ask_volume: HashMap::new(),
            last_cleanup: None,
        }
    }

    /// Fold one trade into the window using the monotonic clock.
    pub fn process_trade(&mut self, trade: &Trade) {
        self.process_trade_at(trade, Instant::now());
    }

    /// Fold one trade into the window, treating `now` as the current
    /// wall-clock instant for the cleanup throttle.
    pub fn process_trade_at(&mut self, trade: &Trade, now: Instant) {
        let bin_center = self.bin_size.bin_center(trade.price.as_decimal());
        let quantity = trade.quantity.as_decimal();
        let side = trade.traded_side();

        *self.volume_mut(side).entry(bin_center).or_insert(Decimal::ZERO) += quantity;

        self.history.push_back(FlowEntry {
            timestamp_ms: trade.timestamp_ms,
            bin_center,
            quantity,
            side,
        });

        let due = self
            .last_cleanup
            .map_or(true, |last| now.saturating_duration_since(last) >= self.cleanup_interval);
        if due {
            self.evict_expired(trade.timestamp_ms);
            self.last_cleanup = Some(now);
        }
    }

    /// Drop every contribution older than `now_ms - window`.
    ///
    /// Returns the number of history entries evicted.
    pub fn evict_expired(&mut self, now_ms: i64) -> usize {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        let mut evicted = 0;

        while let Some(entry) = self.history.front().copied() {
            if entry.timestamp_ms >= cutoff {
                break;
            }
            self.history.pop_front();
            evicted += 1;

            let volume = self.volume_mut(entry.side);
            if let Some(total) = volume.get_mut(&entry.bin_center) {
                *total -= entry.quantity;
                if *total <= Decimal::ZERO {
                    volume.remove(&entry.bin_center);
                }
            }
        }

        if evicted > 0 {
            debug!(evicted, cutoff_ms = cutoff, remaining = self.history.len(), "Flow window trimmed");
        }
        evicted
    }

    /// Traded volume at one bin center; zeros when nothing traded there.
    pub fn flow_at_bin(&self, bin_center: Decimal) -> BinFlow {
        let bid_traded = self.bid_volume(bin_center).unwrap_or_default();
        let ask_traded = self.ask_volume(bin_center).unwrap_or_default();
        BinFlow {
            bid_traded,
            ask_traded,
            delta: bid_traded - ask_traded,
        }
    }

    /// Bid-column volume at a bin, `None` if the bin has no live entry.
    pub fn bid_volume(&self, bin_center: Decimal) -> Option<Decimal> {
        self.bid_volume.get(&bin_center).copied()
    }

    /// Ask-column volume at a bin, `None` if the bin has no live entry.
    pub fn ask_volume(&self, bin_center: Decimal) -> Option<Decimal> {
        self.ask_volume.get(&bin_center).copied()
    }

    /// Join binned resting depth with traded volume at the same centers.
    pub fn merge_with_book(&self, binned: &[BinnedLevel]) -> Vec<FlowLevel> {
        binned
            .iter()
            .map(|level| {
                let flow = self.flow_at_bin(level.bin_center);
                FlowLevel {
                    price: level.bin_center,
                    bid_resting_qty: level.bid_qty,
                    ask_resting_qty: level.ask_qty,
                    bid_traded_qty: flow.bid_traded,
                    ask_traded_qty: flow.ask_traded,
                    delta_qty: flow.delta,
                }
            })
            .collect()
    }

    /// Forget all traded volume.
    pub fn reset(&mut self) {
        self.history.clear();
        self.bid_volume.clear();
        self.ask_volume.clear();
        info!("Flow aggregator reset");
    }

    /// Number of trades currently inside the window.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn bin_size(&self) -> BinSize {
        self.bin_size
    }

    fn volume_mut(&mut self, side: Side) -> &mut HashMap<Decimal, Decimal> {
        match side {
            Side::Bid => &mut self.bid_volume,
            Side::Ask => &mut self.ask_volume,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn make_trade(price: &str, qty: &str, is_buyer_maker: bool, ts: i64) -> Trade {
        Trade::new(price.parse().unwrap(), qty.parse().unwrap(), is_buyer_maker, ts)
    }

    fn aggregator() -> FlowAggregator {
        FlowAggregator::new("1".parse().unwrap(), Duration::from_secs(60))
    }

    #[test]
    fn test_side_from_maker_flag() {
        let mut flow = aggregator();
        let t0 = Instant::now();
        flow.process_trade_at(&make_trade("99.50", "1", false, 0), t0);
        flow.process_trade_at(&make_trade("99.20", "3", true, 1), t0);

        let bin = flow.flow_at_bin(dec("99.5"));
        assert_eq!(bin.bid_traded, dec("1"));
        assert_eq!(bin.ask_traded, dec("3"));
        assert_eq!(bin.delta, dec("-2"));
    }

    #[test]
    fn test_absent_bin_is_zero() {
        let flow = aggregator();
        assert_eq!(flow.flow_at_bin(dec("100.5")), BinFlow::default());
        assert!(flow.bid_volume(dec("100.5")).is_none());
        assert!(flow.ask_volume(dec("100.5")).is_none());
    }

    #[test]
    fn test_window_eviction_boundaries() {
        let mut flow = aggregator();
        let t0 = Instant::now();

        flow.process_trade_at(&make_trade("99.50", "5", false, 0), t0);

        // 59.9 s later the print is still inside the window.
        flow.process_trade_at(&make_trade("200", "1", false, 59_900), t0 + Duration::from_secs(2));
        assert_eq!(flow.bid_volume(dec("99.5")), Some(dec("5")));

        // 60.1 s later it has expired and the bin entry is gone.
        flow.process_trade_at(&make_trade("200", "1", false, 60_100), t0 + Duration::from_secs(4));
        assert!(flow.bid_volume(dec("99.5")).is_none());
        assert_eq!(flow.bid_volume(dec("200.5")), Some(dec("2")));
        assert_eq!(flow.len(), 2);
    }

    #[test]
    fn test_cleanup_is_throttled() {
        let mut flow = aggregator();
        let t0 = Instant::now();

        flow.process_trade_at(&make_trade("99.50", "5", false, 0), t0);
        // Far past the window, but inside the same cleanup interval.
        flow.process_trade_at(&make_trade("99.50", "1", false, 120_000), t0 + Duration::from_millis(500));
        assert_eq!(flow.bid_volume(dec("99.5")), Some(dec("6")));

        // A forced pass evicts regardless of the throttle.
        assert_eq!(flow.evict_expired(120_000), 1);
        assert_eq!(flow.bid_volume(dec("99.5")), Some(dec("1")));
    }

    #[test]
    fn test_totals_reach_exact_zero() {
        let mut flow = aggregator();
        let t0 = Instant::now();
        for (i, qty) in ["0.1", "0.2", "0.3"].iter().enumerate() {
            flow.process_trade_at(&make_trade("50", qty, true, i as i64), t0);
        }
        assert_eq!(flow.ask_volume(dec("50.5")), Some(dec("0.6")));

        flow.evict_expired(1_000_000);
        assert!(flow.ask_volume(dec("50.5")).is_none());
        assert!(flow.is_empty());
    }

    #[test]
    fn test_merge_with_book() {
        let mut flow = aggregator();
        flow.process_trade_at(&make_trade("99.50", "1", false, 0), Instant::now());

        let binned = [
            BinnedLevel {
                bin_center: dec("100.5"),
                bid_qty: Decimal::ZERO,
                ask_qty: dec("3"),
            },
            BinnedLevel {
                bin_center: dec("99.5"),
                bid_qty: dec("5"),
                ask_qty: Decimal::ZERO,
            },
        ];
        let merged = flow.merge_with_book(&binned);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].price, dec("100.5"));
        assert_eq!(merged[0].ask_resting_qty, dec("3"));
        assert_eq!(merged[0].delta_qty, Decimal::ZERO);
        assert_eq!(merged[1].bid_resting_qty, dec("5"));
        assert_eq!(merged[1].bid_traded_qty, dec("1"));
        assert_eq!(merged[1].delta_qty, dec("1"));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut flow = aggregator();
        flow.process_trade_at(&make_trade("99.50", "1", false, 0), Instant::now());
        flow.reset();
        assert!(flow.is_empty());
        assert!(flow.bid_volume(dec("99.5")).is_none());
    }
}
