//! Configuration loader and feed settings.

use crate::errors::{AppError, Result};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Public CoinCap price stream for bitcoin.
pub const DEFAULT_FEED_URL: &str = "wss://ws.coincap.io/prices?assets=bitcoin";

const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 5;
const DEFAULT_PING_THRESHOLD: u32 = 2;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 1_000;
const DEFAULT_MAX_RECONNECT_DELAY_MS: u64 = 30_000;

/// Settings for one feed session.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// WebSocket endpoint of the price feed.
    pub feed_url: Url,
    /// Time between heartbeat probes.
    pub heartbeat_interval: Duration,
    /// Unanswered pings tolerated before the connection is declared dead.
    pub ping_threshold: u32,
    /// Base delay before a reconnect attempt.
    pub reconnect_delay: Duration,
    /// Upper bound for the reconnect backoff.
    pub max_reconnect_delay: Duration,
}

impl FeedConfig {
    /// Config for `feed_url` with default timings.
    pub fn new(feed_url: Url) -> Self {
        Self {
            feed_url,
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            ping_threshold: DEFAULT_PING_THRESHOLD,
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            max_reconnect_delay: Duration::from_millis(DEFAULT_MAX_RECONNECT_DELAY_MS),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup, falling back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let feed_url = lookup("FEED_URL").unwrap_or_else(|| DEFAULT_FEED_URL.into());
        let feed_url = Url::parse(&feed_url)?;
        if !matches!(feed_url.scheme(), "ws" | "wss") {
            return Err(AppError::Config(format!(
                "FEED_URL must use ws:// or wss://, got {}",
                feed_url.scheme()
            )));
        }

        let heartbeat_secs: u64 = parse_var(
            &lookup,
            "HEARTBEAT_INTERVAL_SECS",
            DEFAULT_HEARTBEAT_INTERVAL_SECS,
        )?;
        if heartbeat_secs == 0 {
            return Err(AppError::Config(
                "HEARTBEAT_INTERVAL_SECS must be greater than zero".into(),
            ));
        }

        let ping_threshold: u32 = parse_var(&lookup, "PING_THRESHOLD", DEFAULT_PING_THRESHOLD)?;
        if ping_threshold == 0 {
            return Err(AppError::Config("PING_THRESHOLD must be at least 1".into()));
        }

        let reconnect_ms: u64 =
            parse_var(&lookup, "RECONNECT_DELAY_MS", DEFAULT_RECONNECT_DELAY_MS)?;
        let max_reconnect_ms: u64 = parse_var(
            &lookup,
            "MAX_RECONNECT_DELAY_MS",
            DEFAULT_MAX_RECONNECT_DELAY_MS,
        )?;

        Ok(Self {
            feed_url,
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
            ping_threshold,
            reconnect_delay: Duration::from_millis(reconnect_ms),
            max_reconnect_delay: Duration::from_millis(max_reconnect_ms.max(reconnect_ms)),
        })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{key}={raw:?}: {e}"))),
        None => Ok(default),
    }
}
