//! Transport ports
//!
//! The feed never opens sockets itself. A transport adapter implements these
//! traits (REST client for snapshots, WebSocket client for the combined
//! stream) and hands them to `FeedService`.

use async_trait::async_trait;
use types::ids::Symbol;

use crate::error::FeedError;
use crate::events::DepthSnapshot;

/// Point-in-time depth snapshot provider.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetch up to `limit` levels per side.
    async fn fetch_snapshot(&self, symbol: &Symbol, limit: u32) -> Result<DepthSnapshot, FeedError>;
}

/// Opens the combined depth + trade stream for a symbol.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    async fn connect(&self, symbol: &Symbol) -> Result<Box<dyn FeedStream>, FeedError>;
}

/// An open stream of raw text frames.
#[async_trait]
pub trait FeedStream: Send {
    /// Next text frame; `None` once the stream has closed.
    ///
    /// Must be cancel safe: the driver drops the pending call whenever
    /// another event wins the select, and no frame may be lost by that.
    async fn next_frame(&mut self) -> Option<Result<String, FeedError>>;
}
