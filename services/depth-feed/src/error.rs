//! Error types for the depth feed

use std::time::Duration;

use types::errors::TypesError;

/// Errors surfaced by decoding, the orchestrator and the async driver.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    #[error("sequence gap detected: expected first id <= {expected}, got {first_id}")]
    SequenceGap { expected: u64, first_id: u64 },

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("feed stream closed")]
    StreamClosed,

    #[error("stream connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("snapshot request timed out after {0:?}")]
    SnapshotTimeout(Duration),

    #[error("no frame received for {0:?}")]
    Stale(Duration),
}

impl FeedError {
    /// Whether the error concerns a single message and the feed can go on.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FeedError::SequenceGap { .. } | FeedError::Malformed(_) | FeedError::SnapshotTimeout(_)
        )
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Malformed(err.to_string())
    }
}

impl From<TypesError> for FeedError {
    fn from(err: TypesError) -> Self {
        FeedError::Malformed(err.to_string())
    }
}
