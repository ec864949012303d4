//! Feed configuration
//!
//! Plain struct with defaults, two publish-rate presets and an environment
//! loader. Every `DEPTH_FEED_*` variable is optional; a variable that is set
//! but cannot be parsed is an error rather than a silent fallback.

use std::str::FromStr;
use std::time::Duration;

use types::ids::Symbol;
use types::numeric::BinSize;

/// Upper bound on bins per side of the mid bin.
pub const MAX_LEVELS: usize = 10_000;

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable is set but could not be parsed.
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnvVar { key: String, value: String },

    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("invalid bin size: {0}")]
    InvalidBinSize(String),

    #[error("levels must be greater than zero")]
    ZeroLevels,

    #[error("levels must be at most {MAX_LEVELS}, got {0}")]
    TooManyLevels(usize),

    #[error("channel capacity must be greater than zero")]
    ZeroCapacity,

    #[error("pending diff buffer must hold at least one diff")]
    ZeroPendingDiffs,

    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
}

/// Runtime settings for one replicated symbol.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Instrument to replicate.
    pub symbol: Symbol,
    /// Width of a ladder bin.
    pub bin_size: BinSize,
    /// Bins on each side of the mid bin.
    pub levels: usize,
    /// Rolling window for traded volume.
    pub flow_window: Duration,
    /// Minimum spacing between published views.
    pub publish_interval: Duration,
    /// Views held by the output channel before the oldest is dropped.
    pub channel_capacity: usize,
    /// Diffs held while waiting for a snapshot.
    pub max_pending_diffs: usize,
    /// Depth requested from the snapshot endpoint.
    pub snapshot_limit: u32,
    /// Minimum wall-clock spacing between flow evictions.
    pub cleanup_interval: Duration,
    pub connect_timeout: Duration,
    pub snapshot_timeout: Duration,
    /// Delay before re-requesting a failed snapshot.
    pub snapshot_retry_delay: Duration,
    /// Return `FeedError::Stale` when no frame arrives for this long.
    pub liveness_timeout: Option<Duration>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            bin_size: BinSize::ONE,
            levels: 25,
            flow_window: Duration::from_secs(60),
            publish_interval: Duration::from_millis(100),
            channel_capacity: 5,
            max_pending_diffs: 10_000,
            snapshot_limit: 1000,
            cleanup_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
            snapshot_timeout: Duration::from_secs(10),
            snapshot_retry_delay: Duration::from_secs(1),
            liveness_timeout: None,
        }
    }
}

impl FeedConfig {
    /// Preset for the terminal renderer (~10 views per second).
    pub fn terminal() -> Self {
        Self {
            publish_interval: Duration::from_millis(100),
            ..Self::default()
        }
    }

    /// Preset for the windowed renderer (~60 views per second).
    pub fn windowed() -> Self {
        Self {
            publish_interval: Duration::from_millis(16),
            ..Self::default()
        }
    }

    /// Same settings for another symbol.
    pub fn with_symbol(mut self, symbol: Symbol) -> Self {
        self.symbol = symbol;
        self
    }

    /// Check values that cannot be expressed in the field types.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.levels == 0 {
            return Err(ConfigError::ZeroLevels);
        }
        if self.levels > MAX_LEVELS {
            return Err(ConfigError::TooManyLevels(self.levels));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.max_pending_diffs == 0 {
            return Err(ConfigError::ZeroPendingDiffs);
        }

        let intervals = [
            ("flow_window", self.flow_window),
            ("publish_interval", self.publish_interval),
            ("cleanup_interval", self.cleanup_interval),
            ("connect_timeout", self.connect_timeout),
            ("snapshot_timeout", self.snapshot_timeout),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                return Err(ConfigError::ZeroInterval(name));
            }
        }
        if matches!(self.liveness_timeout, Some(t) if t.is_zero()) {
            return Err(ConfigError::ZeroInterval("liveness_timeout"));
        }

        Ok(())
    }

    /// Load from `DEPTH_FEED_*` environment variables on top of the
    /// terminal preset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::terminal();

        let symbol = match lookup("DEPTH_FEED_SYMBOL") {
            Some(raw) => {
                Symbol::try_new(&raw).map_err(|_| ConfigError::InvalidSymbol(raw.clone()))?
            }
            None => defaults.symbol.clone(),
        };
        let bin_size = match lookup("DEPTH_FEED_BIN_SIZE") {
            Some(raw) => raw
                .parse::<BinSize>()
                .map_err(|_| ConfigError::InvalidBinSize(raw.clone()))?,
            None => defaults.bin_size,
        };

        let liveness_timeout = match lookup("DEPTH_FEED_LIVENESS_TIMEOUT_MS") {
            Some(raw) => {
                let ms: u64 = parse_value("DEPTH_FEED_LIVENESS_TIMEOUT_MS", &raw)?;
                (ms > 0).then(|| Duration::from_millis(ms))
            }
            None => defaults.liveness_timeout,
        };

        let config = Self {
            symbol,
            bin_size,
            levels: parse_env(&lookup, "DEPTH_FEED_LEVELS", defaults.levels)?,
            flow_window: parse_env_millis(&lookup, "DEPTH_FEED_FLOW_WINDOW_MS", defaults.flow_window)?,
            publish_interval: parse_env_millis(
                &lookup,
                "DEPTH_FEED_PUBLISH_INTERVAL_MS",
                defaults.publish_interval,
            )?,
            channel_capacity: parse_env(
                &lookup,
                "DEPTH_FEED_CHANNEL_CAPACITY",
                defaults.channel_capacity,
            )?,
            max_pending_diffs: parse_env(
                &lookup,
                "DEPTH_FEED_MAX_PENDING_DIFFS",
                defaults.max_pending_diffs,
            )?,
            snapshot_limit: parse_env(&lookup, "DEPTH_FEED_SNAPSHOT_LIMIT", defaults.snapshot_limit)?,
            cleanup_interval: parse_env_millis(
                &lookup,
                "DEPTH_FEED_CLEANUP_INTERVAL_MS",
                defaults.cleanup_interval,
            )?,
            connect_timeout: parse_env_millis(
                &lookup,
                "DEPTH_FEED_CONNECT_TIMEOUT_MS",
                defaults.connect_timeout,
            )?,
            snapshot_timeout: parse_env_millis(
                &lookup,
                "DEPTH_FEED_SNAPSHOT_TIMEOUT_MS",
                defaults.snapshot_timeout,
            )?,
            snapshot_retry_delay: parse_env_millis(
                &lookup,
                "DEPTH_FEED_SNAPSHOT_RETRY_MS",
                defaults.snapshot_retry_delay,
            )?,
            liveness_timeout,
        };

        config.validate()?;
        Ok(config)
    }
}

fn default_symbol() -> Symbol {
    Symbol::try_new("BNBUSDT").expect("default symbol literal must be valid")
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidEnvVar {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

fn parse_env<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_env_millis<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => parse_value::<u64>(key, &raw).map(Duration::from_millis),
        None => Ok(default),
    }
}
