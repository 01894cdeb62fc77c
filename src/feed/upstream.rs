//! Upstream connection manager.
//!
//! Owns the one physical WebSocket to the provider and its
//! [`ConnectionState`]. Nothing else touches the socket: the coordinator
//! talks to it through [`UpstreamSink`], the connection task reads it through
//! [`UpstreamConnection::next_inbound`].

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::config::FeedConfig;
use crate::credentials::Credentials;
use crate::error::{FeedError, Result};
use crate::feed::FeedEvent;
use crate::feed::coordinator::UpstreamSink;
use crate::protocol::{FeedProtocol, Inbound};
use crate::types::enums::ConnectionState;
use crate::types::tick::SymbolKey;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WriterHalf = SplitSink<WsStream, Message>;
type ReaderHalf = SplitStream<WsStream>;

/// The single upstream WebSocket connection.
pub struct UpstreamConnection {
    url: String,
    connect_timeout: Duration,
    protocol: Arc<dyn FeedProtocol>,
    writer: Option<WriterHalf>,
    reader: Option<ReaderHalf>,
    state: Arc<watch::Sender<ConnectionState>>,
    events: broadcast::Sender<FeedEvent>,
}

impl UpstreamConnection {
    /// Create a standalone, disconnected connection.
    pub fn new(config: &FeedConfig, protocol: Arc<dyn FeedProtocol>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self::with_channels(config, protocol, Arc::new(state), events)
    }

    /// Create a connection that publishes its state on existing channels.
    pub(crate) fn with_channels(
        config: &FeedConfig,
        protocol: Arc<dyn FeedProtocol>,
        state: Arc<watch::Sender<ConnectionState>>,
        events: broadcast::Sender<FeedEvent>,
    ) -> Self {
        Self {
            url: config.url.clone(),
            connect_timeout: config.connect_timeout(),
            protocol,
            writer: None,
            reader: None,
            state,
            events,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn transition(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::info!(from = %prev, to = %next, "Upstream connection state changed");
            let _ = self.events.send(FeedEvent::StateChanged(next));
        }
    }

    /// Open the WebSocket and move to `Connected`.
    ///
    /// An HTTP 401/403 answer to the handshake is reported as
    /// [`FeedError::Authentication`]; everything else is transient.
    pub async fn connect(&mut self, credentials: &Credentials) -> Result<()> {
        self.drop_socket();
        self.transition(ConnectionState::Connecting);

        let url = self.protocol.endpoint(&self.url, credentials)?;
        let attempt = tokio::time::timeout(self.connect_timeout, connect_async(url.as_str())).await;

        let ws = match attempt {
            Err(_) => return Err(FeedError::Timeout(self.connect_timeout)),
            Ok(Err(WsError::Http(resp))) if matches!(resp.status().as_u16(), 401 | 403) => {
                return Err(FeedError::Authentication(format!(
                    "handshake answered with HTTP {}",
                    resp.status()
                )));
            }
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok((ws, _resp))) => ws,
        };

        let (write, read) = ws.split();
        self.writer = Some(write);
        self.reader = Some(read);
        self.transition(ConnectionState::Connected);

        tracing::info!(
            endpoint = %self.url,
            protocol = self.protocol.name(),
            client_id = %credentials.client_id,
            "Connected to upstream feed"
        );
        Ok(())
    }

    /// Send one frame. Fails with [`FeedError::NotConnected`] unless connected,
    /// and with [`FeedError::Timeout`] when the peer stops draining the socket
    /// for longer than the connect timeout.
    pub async fn send(&mut self, message: Message) -> Result<()> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(FeedError::NotConnected(state));
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or(FeedError::NotConnected(state))?;
        match tokio::time::timeout(self.connect_timeout, writer.send(message)).await {
            Ok(sent) => sent.map_err(FeedError::from),
            Err(_) => Err(FeedError::Timeout(self.connect_timeout)),
        }
    }

    /// Wait for the next meaningful inbound frame and decode it.
    ///
    /// Transport errors, close frames and end-of-stream come back as
    /// [`Inbound::Disconnected`]; `Err` is reserved for malformed frames,
    /// which the caller drops. Pends forever when not connected.
    pub async fn next_inbound(&mut self) -> Result<Inbound> {
        let Some(reader) = self.reader.as_mut() else {
            return std::future::pending().await;
        };

        loop {
            match reader.next().await {
                Some(Ok(msg)) => match msg {
                    Message::Text(_) | Message::Binary(_) => return self.protocol.decode(&msg),
                    Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
                    Message::Close(frame) => {
                        let reason = frame
                            .map(|f| format!("closed by server ({}: {})", f.code, f.reason.as_str()))
                            .unwrap_or_else(|| "closed by server".to_owned());
                        return Ok(Inbound::Disconnected(reason));
                    }
                },
                Some(Err(e)) => return Ok(Inbound::Disconnected(format!("WebSocket error: {e}"))),
                None => return Ok(Inbound::Disconnected("stream ended".to_owned())),
            }
        }
    }

    /// Forget the socket after a failure and move to `Reconnecting`.
    pub fn mark_reconnecting(&mut self) {
        self.drop_socket();
        self.transition(ConnectionState::Reconnecting);
    }

    /// Forget the socket after a fatal failure and move to `Disconnected`.
    pub fn mark_disconnected(&mut self) {
        self.drop_socket();
        self.transition(ConnectionState::Disconnected);
    }

    /// Close the socket politely (if open) and move to `Disconnected`.
    pub async fn close(&mut self) {
        if self.state() == ConnectionState::Connected {
            if let Some(msg) = self.protocol.disconnect_message() {
                let _ = self.send(msg).await;
            }
            let _ = self.send(Message::Close(None)).await;
        }
        self.mark_disconnected();
        tracing::info!("Upstream connection closed");
    }

    fn drop_socket(&mut self) {
        self.writer = None;
        self.reader = None;
    }

    async fn send_all(&mut self, messages: Vec<Message>) -> Result<()> {
        for message in messages {
            self.send(message).await?;
        }
        Ok(())
    }
}

impl UpstreamSink for UpstreamConnection {
    async fn send_subscribe(&mut self, keys: &[SymbolKey]) -> Result<()> {
        let messages = self.protocol.subscribe_messages(keys)?;
        self.send_all(messages).await
    }

    async fn send_unsubscribe(&mut self, keys: &[SymbolKey]) -> Result<()> {
        let messages = self.protocol.unsubscribe_messages(keys)?;
        self.send_all(messages).await
    }
}

impl std::fmt::Debug for UpstreamConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConnection")
            .field("url", &self.url)
            .field("protocol", &self.protocol.name())
            .field("state", &self.state())
            .finish()
    }
}
