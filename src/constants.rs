//! Constants for the live feed multiplexer.
//!
//! Contains upstream endpoints, configuration defaults, and the provider
//! limits the Dhan protocol adapter has to respect. Used internally by
//! [`FeedConfig`](crate::config::FeedConfig) and the protocol types, but also
//! exported for advanced usage.

// ---------------------------------------------------------------------------
// WebSocket URLs
// ---------------------------------------------------------------------------

/// WebSocket endpoint for the DhanHQ live market feed (binary).
pub const WS_MARKET_FEED_URL: &str = "wss://api-feed.dhan.co";

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Configuration defaults used by [`FeedConfig::default`](crate::config::FeedConfig).
pub mod defaults {
    /// First reconnect delay in milliseconds.
    pub const RECONNECT_BASE_DELAY_MS: u64 = 1_000;
    /// Upper bound for any reconnect delay in milliseconds.
    pub const RECONNECT_MAX_DELAY_MS: u64 = 30_000;
    /// Consecutive delivery failures before a consumer is detached.
    pub const CONSUMER_FAILURE_THRESHOLD: u32 = 3;
    /// WebSocket handshake timeout in milliseconds.
    pub const CONNECT_TIMEOUT_MS: u64 = 10_000;
    /// Capacity of the [`FeedEvent`](crate::feed::FeedEvent) broadcast channel.
    pub const EVENT_CHANNEL_CAPACITY: usize = 1_024;
    /// Per-client tick buffer for SSE streams.
    pub const SSE_BUFFER: usize = 256;
    /// Segment used to qualify bare symbols on the HTTP boundary.
    pub const DEFAULT_SEGMENT: &str = "NSE_EQ";
    /// Address the `livefeed` binary listens on.
    pub const BIND_ADDR: &str = "127.0.0.1:8080";
}

// ---------------------------------------------------------------------------
// Provider limits
// ---------------------------------------------------------------------------

/// DhanHQ market feed constraints.
pub mod limits {
    /// Maximum instruments per single connection.
    pub const MAX_INSTRUMENTS_PER_CONNECTION: usize = 5_000;
    /// Maximum instruments per single subscribe/unsubscribe message.
    pub const MAX_INSTRUMENTS_PER_SUBSCRIBE: usize = 100;
}

/// Reason codes carried by the Dhan feed disconnect packet.
pub mod disconnect_codes {
    /// Too many active WebSocket connections.
    pub const TOO_MANY_CONNECTIONS: i16 = 805;
    /// Data APIs are not subscribed on the account.
    pub const DATA_APIS_NOT_SUBSCRIBED: i16 = 806;
    /// Access token has expired.
    pub const ACCESS_TOKEN_EXPIRED: i16 = 807;
    /// Client ID or access token rejected.
    pub const AUTHENTICATION_FAILED: i16 = 808;
    /// Access token is invalid.
    pub const ACCESS_TOKEN_INVALID: i16 = 809;
    /// Client ID is invalid.
    pub const CLIENT_ID_INVALID: i16 = 810;

    /// Whether a reason code means the credentials need intervention.
    pub fn is_authentication(code: i16) -> bool {
        (DATA_APIS_NOT_SUBSCRIBED..=CLIENT_ID_INVALID).contains(&code)
    }
}
