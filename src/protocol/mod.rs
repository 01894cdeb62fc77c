//! Upstream wire protocols.
//!
//! A [`FeedProtocol`] knows how to authenticate through the endpoint URL,
//! encode subscribe/unsubscribe batches, and decode inbound frames into
//! [`Inbound`] values. The connection manager is protocol-agnostic.
//!
//! ## [`json`] — JSON text protocol
//!
//! `{"action": "subscribe", "keys": [...]}` / `{"action": "unsubscribe", ...}`
//! outbound, tick objects (or arrays of them) inbound.
//!
//! ## [`dhan`] — DhanHQ v2 market feed
//!
//! JSON subscribe requests in chunks of 100 instruments outbound, little-endian
//! binary packets inbound (Ticker, Quote, Full, disconnect, ...).

use std::sync::Arc;

use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::config::{FeedConfig, ProtocolKind};
use crate::credentials::Credentials;
use crate::error::Result;
use crate::types::tick::{SymbolKey, Tick};

pub mod dhan;
pub mod json;

pub use dhan::DhanProtocol;
pub use json::JsonProtocol;

/// What a decoded inbound frame means for the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Market data to dispatch.
    Ticks(Vec<Tick>),
    /// Acknowledgements, heartbeats, packets we do not fan out.
    Ignored,
    /// The provider explicitly rejected the credentials. Fatal.
    Rejected(String),
    /// The provider or the transport ended the session. Transient.
    Disconnected(String),
}

/// Encoding and decoding rules of an upstream feed.
pub trait FeedProtocol: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Full connection URL, credentials included.
    fn endpoint(&self, base_url: &str, credentials: &Credentials) -> Result<Url>;

    /// Frames that subscribe `keys`. One logical batch; may be chunked.
    fn subscribe_messages(&self, keys: &[SymbolKey]) -> Result<Vec<Message>>;

    /// Frames that unsubscribe `keys`.
    fn unsubscribe_messages(&self, keys: &[SymbolKey]) -> Result<Vec<Message>>;

    /// Decode a text or binary frame. `Err` means the frame is malformed.
    fn decode(&self, message: &Message) -> Result<Inbound>;

    /// Frame sent before closing the socket, if the provider expects one.
    fn disconnect_message(&self) -> Option<Message> {
        None
    }
}

/// Instantiate the protocol selected in `config`.
pub fn from_config(config: &FeedConfig) -> Arc<dyn FeedProtocol> {
    match config.protocol {
        ProtocolKind::Json => Arc::new(JsonProtocol),
        ProtocolKind::Dhan => Arc::new(DhanProtocol::new(config.feed_mode)),
    }
}
