//! Configuration for the [`FeedMultiplexer`](crate::feed::FeedMultiplexer).
//!
//! Build a [`FeedConfig`] with [`FeedConfigBuilder`], deserialize it from any
//! serde format (every field has a default), or load it from `LIVEFEED_*`
//! environment variables with [`FeedConfig::from_env`].

use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::constants::{WS_MARKET_FEED_URL, defaults};
use crate::error::{FeedError, Result};
use crate::types::enums::FeedMode;

/// Wire protocol spoken by the upstream endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    /// JSON text frames (`{"action": "subscribe", "keys": [...]}`).
    Json,
    /// DhanHQ v2 binary market feed.
    #[default]
    Dhan,
}

impl FromStr for ProtocolKind {
    type Err = FeedError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "dhan" => Ok(Self::Dhan),
            other => Err(FeedError::Config(format!("unknown protocol '{other}'"))),
        }
    }
}

/// Configuration for the feed multiplexer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Upstream WebSocket endpoint (without credentials).
    pub url: String,
    /// Wire protocol of the endpoint.
    pub protocol: ProtocolKind,
    /// Data mode requested from a Dhan endpoint.
    pub feed_mode: FeedMode,
    /// First reconnect delay (milliseconds).
    pub reconnect_base_delay_ms: u64,
    /// Cap on any reconnect delay (milliseconds).
    pub reconnect_max_delay_ms: u64,
    /// Consecutive delivery failures before a consumer is detached.
    pub consumer_failure_threshold: u32,
    /// Handshake timeout (milliseconds).
    pub connect_timeout_ms: u64,
    /// Capacity of the feed event broadcast channel.
    pub event_channel_capacity: usize,
    /// Per-client tick buffer for SSE streams.
    pub sse_buffer: usize,
    /// Segment used to qualify bare symbols on the HTTP boundary.
    pub default_segment: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: WS_MARKET_FEED_URL.to_owned(),
            protocol: ProtocolKind::default(),
            feed_mode: FeedMode::default(),
            reconnect_base_delay_ms: defaults::RECONNECT_BASE_DELAY_MS,
            reconnect_max_delay_ms: defaults::RECONNECT_MAX_DELAY_MS,
            consumer_failure_threshold: defaults::CONSUMER_FAILURE_THRESHOLD,
            connect_timeout_ms: defaults::CONNECT_TIMEOUT_MS,
            event_channel_capacity: defaults::EVENT_CHANNEL_CAPACITY,
            sse_buffer: defaults::SSE_BUFFER,
            default_segment: defaults::DEFAULT_SEGMENT.to_owned(),
        }
    }
}

impl FeedConfig {
    /// Start a builder from the defaults.
    pub fn builder() -> FeedConfigBuilder {
        FeedConfigBuilder::default()
    }

    /// Load overrides from `LIVEFEED_*` environment variables.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `LIVEFEED_URL` | `url` |
    /// | `LIVEFEED_PROTOCOL` | `protocol` (`json` / `dhan`) |
    /// | `LIVEFEED_FEED_MODE` | `feed_mode` (`ticker` / `quote` / `full`) |
    /// | `LIVEFEED_RECONNECT_BASE_MS` | `reconnect_base_delay_ms` |
    /// | `LIVEFEED_RECONNECT_MAX_MS` | `reconnect_max_delay_ms` |
    /// | `LIVEFEED_FAILURE_THRESHOLD` | `consumer_failure_threshold` |
    /// | `LIVEFEED_CONNECT_TIMEOUT_MS` | `connect_timeout_ms` |
    /// | `LIVEFEED_SSE_BUFFER` | `sse_buffer` |
    /// | `LIVEFEED_DEFAULT_SEGMENT` | `default_segment` |
    pub fn from_env() -> Result<Self> {
        let mut builder = Self::builder();
        if let Some(url) = env_var("LIVEFEED_URL") {
            builder = builder.url(url);
        }
        if let Some(v) = env_var("LIVEFEED_PROTOCOL") {
            builder = builder.protocol(v.parse()?);
        }
        if let Some(v) = env_var("LIVEFEED_FEED_MODE") {
            builder = builder.feed_mode(v.parse()?);
        }
        if let Some(v) = env_parse("LIVEFEED_RECONNECT_BASE_MS")? {
            builder = builder.reconnect_base_delay_ms(v);
        }
        if let Some(v) = env_parse("LIVEFEED_RECONNECT_MAX_MS")? {
            builder = builder.reconnect_max_delay_ms(v);
        }
        if let Some(v) = env_parse("LIVEFEED_FAILURE_THRESHOLD")? {
            builder = builder.consumer_failure_threshold(v);
        }
        if let Some(v) = env_parse("LIVEFEED_CONNECT_TIMEOUT_MS")? {
            builder = builder.connect_timeout_ms(v);
        }
        if let Some(v) = env_parse("LIVEFEED_SSE_BUFFER")? {
            builder = builder.sse_buffer(v);
        }
        if let Some(v) = env_var("LIVEFEED_DEFAULT_SEGMENT") {
            builder = builder.default_segment(v);
        }
        builder.try_build()
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(FeedError::Config("url must not be empty".into()));
        }
        if self.protocol == ProtocolKind::Json && self.url.starts_with(WS_MARKET_FEED_URL) {
            return Err(FeedError::Config(format!(
                "{WS_MARKET_FEED_URL} speaks the dhan protocol, not json"
            )));
        }
        if self.reconnect_base_delay_ms == 0 {
            return Err(FeedError::Config(
                "reconnect_base_delay_ms must be positive".into(),
            ));
        }
        if self.reconnect_max_delay_ms < self.reconnect_base_delay_ms {
            return Err(FeedError::Config(format!(
                "reconnect_max_delay_ms ({}) is below reconnect_base_delay_ms ({})",
                self.reconnect_max_delay_ms, self.reconnect_base_delay_ms
            )));
        }
        if self.consumer_failure_threshold == 0 {
            return Err(FeedError::Config(
                "consumer_failure_threshold must be at least 1".into(),
            ));
        }
        if self.event_channel_capacity == 0 || self.sse_buffer == 0 {
            return Err(FeedError::Config("channel capacities must be positive".into()));
        }
        Ok(())
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    env_var(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| FeedError::Config(format!("{name}={raw}: {e}")))
        })
        .transpose()
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for [`FeedConfig`].
///
/// # Example
///
/// ```
/// use dhan_livefeed::config::{FeedConfig, ProtocolKind};
///
/// let config = FeedConfig::builder()
///     .url("ws://127.0.0.1:9001")
///     .protocol(ProtocolKind::Json)
///     .reconnect_base_delay_ms(500)
///     .build();
/// assert_eq!(config.reconnect_base_delay_ms, 500);
/// ```
#[derive(Debug, Clone, Default)]
pub struct FeedConfigBuilder {
    config: FeedConfig,
}

impl FeedConfigBuilder {
    /// Set the upstream endpoint. Default: the Dhan market feed URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = url.into();
        self
    }

    /// Set the wire protocol. Default: JSON.
    pub fn protocol(mut self, protocol: ProtocolKind) -> Self {
        self.config.protocol = protocol;
        self
    }

    /// Set the Dhan data mode. Default: ticker.
    pub fn feed_mode(mut self, mode: FeedMode) -> Self {
        self.config.feed_mode = mode;
        self
    }

    /// Set the first reconnect delay in milliseconds. Default: 1,000.
    pub fn reconnect_base_delay_ms(mut self, ms: u64) -> Self {
        self.config.reconnect_base_delay_ms = ms;
        self
    }

    /// Set the reconnect delay cap in milliseconds. Default: 30,000.
    pub fn reconnect_max_delay_ms(mut self, ms: u64) -> Self {
        self.config.reconnect_max_delay_ms = ms;
        self
    }

    /// Set the consumer failure threshold (at least 1). Default: 3.
    pub fn consumer_failure_threshold(mut self, n: u32) -> Self {
        self.config.consumer_failure_threshold = n.max(1);
        self
    }

    /// Set the handshake timeout in milliseconds. Default: 10,000.
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    /// Set the feed event channel capacity. Default: 1,024.
    pub fn event_channel_capacity(mut self, cap: usize) -> Self {
        self.config.event_channel_capacity = cap.max(1);
        self
    }

    /// Set the per-client SSE buffer. Default: 256.
    pub fn sse_buffer(mut self, cap: usize) -> Self {
        self.config.sse_buffer = cap.max(1);
        self
    }

    /// Set the segment used for bare symbols. Default: `NSE_EQ`.
    pub fn default_segment(mut self, segment: impl Into<String>) -> Self {
        self.config.default_segment = segment.into();
        self
    }

    /// Build without validation.
    pub fn build(self) -> FeedConfig {
        self.config
    }

    /// Build and validate.
    pub fn try_build(self) -> Result<FeedConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
