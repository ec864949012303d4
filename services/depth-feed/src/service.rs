//! Async feed driver
//!
//! One task owns the orchestrator and does every mutation itself, in the
//! order frames arrive. It suspends only on the next frame, an in-flight
//! snapshot request, the publish ticker, the liveness deadline or
//! cancellation.
//!
//! The stream is connected before the snapshot is requested, so every diff
//! published after the snapshot's sequence point is already being buffered
//! when the snapshot lands.

use std::future::{pending, Future};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backpressure::{snapshot_channel, SnapshotReceiver};
use crate::config::{ConfigError, FeedConfig};
use crate::error::FeedError;
use crate::events::DepthSnapshot;
use crate::ingestion::FeedOrchestrator;
use crate::metrics::FeedMetrics;
use crate::snapshot::DepthView;
use crate::source::{FeedTransport, SnapshotSource};

type SnapshotFuture = Pin<Box<dyn Future<Output = Result<DepthSnapshot, FeedError>> + Send>>;

/// Drives one symbol's feed from a transport and a snapshot source.
pub struct FeedService {
    config: FeedConfig,
    orchestrator: FeedOrchestrator,
    snapshots: Arc<dyn SnapshotSource>,
    transport: Arc<dyn FeedTransport>,
}

impl FeedService {
    /// Build the service and the receiving end of its view channel.
    pub fn new(
        config: FeedConfig,
        snapshots: Arc<dyn SnapshotSource>,
        transport: Arc<dyn FeedTransport>,
        metrics: Arc<FeedMetrics>,
    ) -> Result<(Self, SnapshotReceiver<DepthView>), ConfigError> {
        config.validate()?;

        let (output, views) = snapshot_channel(config.channel_capacity);
        let orchestrator = FeedOrchestrator::new(&config, output, metrics);

        Ok((
            Self {
                config,
                orchestrator,
                snapshots,
                transport,
            },
            views,
        ))
    }

    /// Connect and run until cancelled or the stream fails.
    ///
    /// Returns `Ok(())` on cancellation. Transport failures, stream close
    /// and liveness expiry are returned so the caller can decide whether to
    /// reconnect by calling `run` again; the book is re-seeded on every run.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), FeedError> {
        let symbol = self.config.symbol.clone();
        let connect_timeout = self.config.connect_timeout;

        info!(
            symbol = %symbol,
            depth_stream = %symbol.depth_stream(),
            trade_stream = %symbol.trade_stream(),
            "Connecting feed stream"
        );

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(symbol = %symbol, "Feed cancelled before connect");
                return Ok(());
            }
            connected = time::timeout(connect_timeout, self.transport.connect(&symbol)) => {
                match connected {
                    Ok(result) => result?,
                    Err(_) => {
                        error!(symbol = %symbol, timeout_ms = connect_timeout.as_millis() as u64, "Stream connect timed out");
                        return Err(FeedError::ConnectTimeout(connect_timeout));
                    }
                }
            }
        };

        // Anything missed while disconnected is unrecoverable from the stream.
        self.orchestrator.resync();

        let mut publish_tick = time::interval(self.config.publish_interval);
        publish_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let liveness_timeout = self.config.liveness_timeout;
        let mut liveness_deadline = liveness_timeout.map(|t| Instant::now() + t);
        let mut snapshot_request: Option<SnapshotFuture> = None;
        let mut retry_delay = Duration::ZERO;

        loop {
            if snapshot_request.is_none() && self.orchestrator.needs_snapshot() {
                snapshot_request = Some(self.request_snapshot(retry_delay));
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!(
                        symbol = %symbol,
                        views_built = self.orchestrator.views_built(),
                        diffs_applied = self.orchestrator.diffs_applied_total(),
                        "Feed cancelled"
                    );
                    return Ok(());
                }

                result = async {
                    match snapshot_request.as_mut() {
                        Some(request) => request.await,
                        None => pending().await,
                    }
                }, if snapshot_request.is_some() => {
                    snapshot_request = None;
                    retry_delay = self.on_snapshot(result);
                }

                frame = stream.next_frame() => {
                    match frame {
                        Some(Ok(text)) => {
                            if let Some(timeout) = liveness_timeout {
                                liveness_deadline = Some(Instant::now() + timeout);
                            }
                            if let Err(err) = self.orchestrator.handle_frame(&text) {
                                if !err.is_recoverable() {
                                    return Err(err);
                                }
                            }
                            self.orchestrator.maybe_publish_now();
                        }
                        Some(Err(err)) => {
                            warn!(symbol = %symbol, error = %err, "Feed stream error");
                            return Err(err);
                        }
                        None => {
                            warn!(symbol = %symbol, "Feed stream closed");
                            return Err(FeedError::StreamClosed);
                        }
                    }
                }

                _ = publish_tick.tick() => {
                    self.orchestrator.maybe_publish_now();
                }

                _ = wait_until(liveness_deadline) => {
                    let timeout = liveness_timeout.unwrap_or_default();
                    warn!(symbol = %symbol, timeout_ms = timeout.as_millis() as u64, "No frames within liveness timeout");
                    return Err(FeedError::Stale(timeout));
                }
            }
        }
    }

    /// Handle a finished snapshot request; returns the delay before the
    /// next request, if one is needed.
    fn on_snapshot(&mut self, result: Result<DepthSnapshot, FeedError>) -> Duration {
        match result {
            Ok(snapshot) => match self.orchestrator.load_snapshot(snapshot) {
                Ok(_) => Duration::ZERO,
                Err(err) => {
                    debug!(error = %err, "Snapshot could not bridge buffered diffs");
                    self.config.snapshot_retry_delay
                }
            },
            Err(err) => {
                self.orchestrator.metrics().record_snapshot_failure();
                warn!(
                    symbol = %self.config.symbol,
                    error = %err,
                    retry_ms = self.config.snapshot_retry_delay.as_millis() as u64,
                    "Snapshot request failed, retrying"
                );
                self.config.snapshot_retry_delay
            }
        }
    }

    /// Start a snapshot request after `delay`, bounded by the snapshot
    /// timeout. Dropping the future abandons the request.
    fn request_snapshot(&self, delay: Duration) -> SnapshotFuture {
        let source = Arc::clone(&self.snapshots);
        let symbol = self.config.symbol.clone();
        let limit = self.config.snapshot_limit;
        let snapshot_timeout = self.config.snapshot_timeout;

        debug!(symbol = %symbol, limit, delay_ms = delay.as_millis() as u64, "Requesting depth snapshot");

        Box::pin(async move {
            if !delay.is_zero() {
                time::sleep(delay).await;
            }
            match time::timeout(snapshot_timeout, source.fetch_snapshot(&symbol, limit)).await {
                Ok(result) => result,
                Err(_) => Err(FeedError::SnapshotTimeout(snapshot_timeout)),
            }
        })
    }

    pub fn orchestrator(&self) -> &FeedOrchestrator {
        &self.orchestrator
    }

    /// Mutable access between runs, e.g. to reset the flow window.
    pub fn orchestrator_mut(&mut self) -> &mut FeedOrchestrator {
        &mut self.orchestrator
    }

    pub fn metrics(&self) -> &Arc<FeedMetrics> {
        self.orchestrator.metrics()
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }
}

/// Sleep until `deadline`, or forever when there is none.
async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => pending().await,
    }
}
