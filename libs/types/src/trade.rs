//! Public trade prints
//!
//! A trade carries no side field of its own. The exchange reports whether the
//! buyer was the resting (maker) order, and the flow column the print is
//! counted in follows from that flag.

use crate::numeric::{Price, Quantity};
use crate::side::Side;
use serde::{Deserialize, Serialize};

/// A single executed trade from the public trade stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub price: Price,
    pub quantity: Quantity,
    /// True when the buyer was the maker, i.e. a seller crossed the spread.
    pub is_buyer_maker: bool,
    /// Exchange trade time, Unix milliseconds
    pub timestamp_ms: i64,
}

impl Trade {
    pub fn new(price: Price, quantity: Quantity, is_buyer_maker: bool, timestamp_ms: i64) -> Self {
        Self {
            price,
            quantity,
            is_buyer_maker,
            timestamp_ms,
        }
    }

    /// Flow column this print is accumulated in.
    ///
    /// Buyer-maker prints lifted resting interest on the ask column; the rest
    /// were buyer-aggressed and count on the bid column.
    pub fn traded_side(&self) -> Side {
        if self.is_buyer_maker {
            Side::Ask
        } else {
            Side::Bid
        }
    }
}
