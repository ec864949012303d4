//! Exchange wire decoding
//!
//! Turns raw JSON from the snapshot endpoint and the combined depth/trade
//! stream into typed messages. Prices and quantities arrive as decimal
//! strings and are validated here, so nothing malformed ever reaches the
//! book or the flow aggregator.
//!
//! Stream frames come wrapped as `{"stream": "<symbol>@depth", "data": {..}}`.
//! Bare payloads are routed by their `e` field instead.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use types::numeric::{parse_decimal, Price, Quantity};
use types::trade::Trade;

use crate::error::FeedError;
use crate::order_book::LevelUpdate;

/// `[price, quantity]` pair as sent on the wire.
#[derive(Debug, Deserialize)]
struct RawLevel(String, String);

#[derive(Debug, Deserialize)]
struct RawSnapshot {
    #[serde(rename = "lastUpdateId")]
    last_update_id: u64,
    #[serde(default)]
    bids: Vec<RawLevel>,
    #[serde(default)]
    asks: Vec<RawLevel>,
}

#[derive(Debug, Deserialize)]
struct RawDepthUpdate {
    #[serde(rename = "U")]
    first_update_id: u64,
    #[serde(rename = "u")]
    final_update_id: u64,
    #[serde(rename = "E", default)]
    event_time: i64,
    #[serde(rename = "b", default)]
    bids: Vec<RawLevel>,
    #[serde(rename = "a", default)]
    asks: Vec<RawLevel>,
}

#[derive(Debug, Deserialize)]
struct RawTrade {
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "m")]
    is_buyer_maker: bool,
    #[serde(rename = "T")]
    trade_time: i64,
}

/// REST depth snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthSnapshot {
    pub last_update_id: u64,
    pub bids: Vec<LevelUpdate>,
    pub asks: Vec<LevelUpdate>,
}

impl DepthSnapshot {
    /// Decode the body of a depth snapshot response.
    pub fn from_json(body: &str) -> Result<Self, FeedError> {
        let raw: RawSnapshot = serde_json::from_str(body)?;
        raw.validate()
    }
}

impl RawSnapshot {
    fn validate(self) -> Result<DepthSnapshot, FeedError> {
        Ok(DepthSnapshot {
            last_update_id: self.last_update_id,
            bids: parse_resting_levels(self.bids)?,
            asks: parse_resting_levels(self.asks)?,
        })
    }
}

/// Incremental depth diff covering ids `first_update_id..=final_update_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthDiff {
    pub first_update_id: u64,
    pub final_update_id: u64,
    /// Exchange event time, Unix milliseconds (0 when absent).
    pub event_time_ms: i64,
    pub bids: Vec<LevelUpdate>,
    pub asks: Vec<LevelUpdate>,
}

impl RawDepthUpdate {
    fn validate(self) -> Result<DepthDiff, FeedError> {
        if self.final_update_id < self.first_update_id {
            return Err(FeedError::Malformed(format!(
                "depth update ids out of order: U={} u={}",
                self.first_update_id, self.final_update_id
            )));
        }
        Ok(DepthDiff {
            first_update_id: self.first_update_id,
            final_update_id: self.final_update_id,
            event_time_ms: self.event_time,
            bids: parse_levels(self.bids)?,
            asks: parse_levels(self.asks)?,
        })
    }
}

impl RawTrade {
    fn validate(self) -> Result<Trade, FeedError> {
        let price: Price = self.price.parse()?;
        let quantity: Quantity = self.quantity.parse()?;
        Ok(Trade::new(price, quantity, self.is_buyer_maker, self.trade_time))
    }
}

/// One decoded stream frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMessage {
    Depth(DepthDiff),
    Trade(Trade),
    /// Subscription acks, other streams and unknown events.
    Other,
}

impl FeedMessage {
    /// Message kind label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            FeedMessage::Depth(_) => "depth",
            FeedMessage::Trade(_) => "trade",
            FeedMessage::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayloadKind {
    Depth,
    Trade,
    Other,
}

/// Decode one text frame from the combined stream.
pub fn decode_frame(raw: &str) -> Result<FeedMessage, FeedError> {
    let mut frame: Value = serde_json::from_str(raw)?;

    let stream = frame.get("stream").and_then(Value::as_str).map(str::to_owned);
    let (kind, payload) = match stream {
        Some(stream) => {
            let kind = kind_from_stream(&stream);
            let payload = frame
                .get_mut("data")
                .map(Value::take)
                .ok_or_else(|| FeedError::Malformed(format!("frame for {stream} has no data")))?;
            (kind, payload)
        }
        None => (kind_from_event(&frame), frame),
    };

    match kind {
        PayloadKind::Depth => {
            let update: RawDepthUpdate = serde_json::from_value(payload)?;
            Ok(FeedMessage::Depth(update.validate()?))
        }
        PayloadKind::Trade => {
            let trade: RawTrade = serde_json::from_value(payload)?;
            Ok(FeedMessage::Trade(trade.validate()?))
        }
        PayloadKind::Other => Ok(FeedMessage::Other),
    }
}

fn kind_from_stream(stream: &str) -> PayloadKind {
    if stream.contains("@depth") {
        PayloadKind::Depth
    } else if stream.ends_with("@trade") {
        PayloadKind::Trade
    } else {
        PayloadKind::Other
    }
}

fn kind_from_event(payload: &Value) -> PayloadKind {
    match payload.get("e").and_then(Value::as_str) {
        Some("depthUpdate") => PayloadKind::Depth,
        Some("trade") => PayloadKind::Trade,
        _ => PayloadKind::Other,
    }
}

fn parse_levels(raw: Vec<RawLevel>) -> Result<Vec<LevelUpdate>, FeedError> {
    raw.into_iter()
        .map(|RawLevel(price, quantity)| -> Result<LevelUpdate, FeedError> {
            Ok(LevelUpdate::new(price.parse()?, quantity.parse()?))
        })
        .collect()
}

/// Snapshot levels: entries with quantity <= 0 carry no resting size and
/// are dropped rather than failing the whole snapshot.
fn parse_resting_levels(raw: Vec<RawLevel>) -> Result<Vec<LevelUpdate>, FeedError> {
    let mut levels = Vec::with_capacity(raw.len());
    for RawLevel(price, quantity) in raw {
        let quantity = parse_decimal(&quantity)?;
        if quantity <= Decimal::ZERO {
            continue;
        }
        levels.push(LevelUpdate::new(price.parse()?, Quantity::try_new(quantity)?));
    }
    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_snapshot_decoding() {
        let body = r#"{"lastUpdateId":1000,"E":1,"T":1,
            "bids":[["100.00","5.000"],["99.50","0"]],
            "asks":[["100.50","3"]]}"#;
        let snapshot = DepthSnapshot::from_json(body).unwrap();

        assert_eq!(snapshot.last_update_id, 1000);
        // The zero-quantity level is dropped.
        assert_eq!(snapshot.bids.len(), 1);
        assert_eq!(snapshot.bids[0].price.as_decimal(), dec("100"));
        assert_eq!(snapshot.bids[0].quantity.as_decimal(), dec("5"));
        assert_eq!(snapshot.asks[0].price.as_decimal(), dec("100.5"));
    }

    #[test]
    fn test_snapshot_rejects_bad_numbers() {
        let body = r#"{"lastUpdateId":1,"bids":[["abc","1"]],"asks":[]}"#;
        assert!(matches!(DepthSnapshot::from_json(body), Err(FeedError::Malformed(_))));

        let body = r#"{"lastUpdateId":1,"bids":[["100","x"]],"asks":[]}"#;
        assert!(matches!(DepthSnapshot::from_json(body), Err(FeedError::Malformed(_))));

        assert!(DepthSnapshot::from_json("not json").is_err());
    }

    #[test]
    fn test_snapshot_skips_non_positive_quantities() {
        let body = r#"{"lastUpdateId":7,
            "bids":[["99.00","5"],["98.00","-1"]],
            "asks":[["101.00","0.000"],["102.00","2"]]}"#;
        let snapshot = DepthSnapshot::from_json(body).unwrap();

        assert_eq!(snapshot.bids.len(), 1);
        assert_eq!(snapshot.bids[0].price.as_decimal(), dec("99"));
        assert_eq!(snapshot.asks.len(), 1);
        assert_eq!(snapshot.asks[0].price.as_decimal(), dec("102"));
    }

    #[test]
    fn test_diff_still_rejects_negative_quantity() {
        let frame = r#"{"e":"depthUpdate","U":1,"u":1,"b":[["100","-1"]],"a":[]}"#;
        assert!(matches!(decode_frame(frame), Err(FeedError::Malformed(_))));
    }

    #[test]
    fn test_decode_wrapped_depth() {
        let frame = r#"{"stream":"bnbusdt@depth","data":{"e":"depthUpdate","E":1700000000000,
            "s":"BNBUSDT","U":1001,"u":1003,"pu":1000,
            "b":[["100.00","0"]],"a":[["100.50","2"]]}}"#;

        match decode_frame(frame).unwrap() {
            FeedMessage::Depth(diff) => {
                assert_eq!(diff.first_update_id, 1001);
                assert_eq!(diff.final_update_id, 1003);
                assert_eq!(diff.event_time_ms, 1_700_000_000_000);
                assert!(diff.bids[0].quantity.is_zero());
                assert_eq!(diff.asks[0].quantity.as_decimal(), dec("2"));
            }
            other => panic!("expected depth, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_wrapped_trade() {
        let frame = r#"{"stream":"bnbusdt@trade","data":{"e":"trade","E":1,"T":1700000000123,
            "s":"BNBUSDT","t":42,"p":"99.50","q":"1.000","X":"MARKET","m":false}}"#;

        match decode_frame(frame).unwrap() {
            FeedMessage::Trade(trade) => {
                assert_eq!(trade.price.as_decimal(), dec("99.5"));
                assert_eq!(trade.quantity.as_decimal(), dec("1"));
                assert!(!trade.is_buyer_maker);
                assert_eq!(trade.timestamp_ms, 1_700_000_000_123);
            }
            other => panic!("expected trade, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_bare_payloads() {
        let depth = r#"{"e":"depthUpdate","U":5,"u":6,"b":[],"a":[]}"#;
        assert_eq!(decode_frame(depth).unwrap().label(), "depth");

        let trade = r#"{"e":"trade","p":"1","q":"1","m":true,"T":0}"#;
        assert_eq!(decode_frame(trade).unwrap().label(), "trade");
    }

    #[test]
    fn test_unknown_frames_are_other() {
        assert_eq!(decode_frame(r#"{"result":null,"id":1}"#).unwrap(), FeedMessage::Other);
        assert_eq!(
            decode_frame(r#"{"stream":"bnbusdt@markPrice","data":{"e":"markPriceUpdate"}}"#).unwrap(),
            FeedMessage::Other
        );
    }

    #[test]
    fn test_malformed_frames() {
        assert!(matches!(decode_frame("{"), Err(FeedError::Malformed(_))));
        // Missing data
        assert!(matches!(
            decode_frame(r#"{"stream":"bnbusdt@depth"}"#),
            Err(FeedError::Malformed(_))
        ));
        // Non-positive trade price
        assert!(matches!(
            decode_frame(r#"{"e":"trade","p":"0","q":"1","m":true,"T":0}"#),
            Err(FeedError::Malformed(_))
        ));
        // Reversed id range
        assert!(matches!(
            decode_frame(r#"{"e":"depthUpdate","U":9,"u":8,"b":[],"a":[]}"#),
            Err(FeedError::Malformed(_))
        ));
    }
}
