//! Depth Feed Service
//!
//! Replicates one exchange order book from a REST snapshot plus the
//! incremental depth stream, keeps a rolling window of traded volume, and
//! publishes a combined, binned depth view for renderers:
//! - Order book replica with snapshot/diff sequencing and gap detection
//! - Rolling-window trade flow per price bin
//! - Buffering/Live orchestration with resync on gaps
//! - Throttled view publishing over a drop-oldest channel
//! - Async driver over pluggable transport ports
//!
//! # Architecture
//!
//! ```text
//!   REST snapshot          combined stream (depth + trade)
//!        │                          │
//!        │                   ┌──────▼──────┐
//!        │                   │   Decode    │  ← events::decode_frame
//!        │                   └──────┬──────┘
//!        │                          │
//!   ┌────▼──────────────────────────▼─────┐
//!   │          FeedOrchestrator           │  ← Buffering / Live
//!   └────┬──────────────────────────┬─────┘
//!        │                          │
//!   ┌────▼─────┐              ┌─────▼──────┐
//!   │BookStore │              │    Flow    │
//!   └────┬─────┘              └─────┬──────┘
//!        │   binned ladder + flow   │
//!   ┌────▼──────────────────────────▼─────┐
//!   │   DepthView → drop-oldest channel   │
//!   └─────────────────────────────────────┘
//! ```

pub mod backpressure;
pub mod config;
pub mod error;
pub mod events;
pub mod flow;
pub mod ingestion;
pub mod metrics;
pub mod order_book;
pub mod service;
pub mod snapshot;
pub mod source;

pub use backpressure::{snapshot_channel, PublishOutcome, SnapshotReceiver, SnapshotSender};
pub use config::{ConfigError, FeedConfig};
pub use error::FeedError;
pub use ingestion::{FeedOrchestrator, FeedState};
pub use service::FeedService;
pub use snapshot::DepthView;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
