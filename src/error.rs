//! Error types for the `dhan-livefeed` crate.
//!
//! All fallible operations in this crate return [`Result<T>`], which is an
//! alias for `std::result::Result<T, FeedError>`.
//!
//! [`FeedError`] covers:
//! - **Connection state** — sending while the upstream is not connected
//! - **Authentication** — explicit rejection of the credentials by the provider
//! - **Transport errors** — WebSocket, I/O and handshake timeouts
//! - **Protocol errors** — malformed inbound frames, JSON and URL failures
//! - **Configuration errors** — invalid environment or builder values
//!
//! Failures inside a consumer are reported separately as [`ConsumerError`];
//! they never escape the dispatch loop.

use std::time::Duration;

use crate::types::enums::ConnectionState;

/// All possible errors produced by the feed multiplexer.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// A wire message was sent while the upstream connection was not usable.
    #[error("upstream not connected (state: {0})")]
    NotConnected(ConnectionState),

    /// The provider rejected the supplied credentials. Not retried.
    #[error("authentication rejected by upstream: {0}")]
    Authentication(String),

    /// A WebSocket-level error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// Failed to serialize or deserialize JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An error building or parsing a URL.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// An I/O error (binding the HTTP listener, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The upstream handshake did not complete in time.
    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),

    /// An inbound frame could not be decoded.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// The caller provided an invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// `start()` was called while the connection task is still running.
    #[error("feed already started")]
    AlreadyStarted,
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

impl FeedError {
    /// Whether the error is an explicit credential rejection.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }
}

/// Failure of a single consumer to accept a tick.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsumerError {
    /// The consumer's receiving side is gone.
    #[error("consumer closed")]
    Closed,

    /// The consumer's buffer is full.
    #[error("consumer lagging: buffer full")]
    Lagging,

    /// The consumer callback panicked.
    #[error("consumer panicked: {0}")]
    Panicked(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FeedError>;
