//! The public multiplexer handle and the connection task behind it.
//!
//! A started [`FeedMultiplexer`] runs exactly one tokio task. That task owns
//! the [`UpstreamConnection`], the [`ResubscriptionCoordinator`] and the
//! [`Dispatcher`], and `select!`s over three things:
//!
//! - a stop request,
//! - a change of the registry's key set (→ reconcile),
//! - the next inbound frame (→ dispatch).
//!
//! Subscribing and unsubscribing never touch the socket; they update the
//! registry, which wakes the task.
//!
//! # Example
//!
//! ```no_run
//! use dhan_livefeed::config::FeedConfig;
//! use dhan_livefeed::credentials::StaticCredentials;
//! use dhan_livefeed::feed::FeedMultiplexer;
//! use dhan_livefeed::protocol::JsonProtocol;
//!
//! #[tokio::main]
//! async fn main() -> dhan_livefeed::Result<()> {
//!     let config = FeedConfig::builder().url("wss://feed.example.com/ws").try_build()?;
//!     let feed = FeedMultiplexer::new(
//!         config,
//!         JsonProtocol,
//!         StaticCredentials::new("client-id", "token"),
//!     );
//!     feed.start()?;
//!
//!     let _sub = feed.subscribe_callback("NSE_EQ|RELIANCE", |tick| {
//!         println!("{} @ {}", tick.symbol_key, tick.price);
//!     });
//!
//!     tokio::signal::ctrl_c().await?;
//!     feed.stop().await;
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::FeedConfig;
use crate::credentials::CredentialSource;
use crate::error::{FeedError, Result};
use crate::feed::FeedEvent;
use crate::feed::backoff::Backoff;
use crate::feed::consumer::ConsumerHandle;
use crate::feed::coordinator::ResubscriptionCoordinator;
use crate::feed::dispatch::Dispatcher;
use crate::feed::registry::SubscriptionRegistry;
use crate::feed::upstream::UpstreamConnection;
use crate::protocol::{FeedProtocol, Inbound};
use crate::types::enums::ConnectionState;
use crate::types::tick::{SymbolKey, Tick};

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cheaply cloneable handle to one multiplexed upstream feed.
///
/// All clones share the registry, the state and the connection task.
#[derive(Clone)]
pub struct FeedMultiplexer {
    shared: Arc<Shared>,
}

struct Shared {
    config: FeedConfig,
    protocol: Arc<dyn FeedProtocol>,
    credentials: Arc<dyn CredentialSource>,
    registry: Arc<SubscriptionRegistry>,
    state: Arc<watch::Sender<ConnectionState>>,
    events: broadcast::Sender<FeedEvent>,
    reconnects: Arc<AtomicU64>,
    running: Mutex<Option<Running>>,
}

struct Running {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Point-in-time view of the multiplexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedHealth {
    pub state: ConnectionState,
    pub running: bool,
    /// Subscribed symbol keys.
    pub symbols: usize,
    /// Consumer attachments across all keys.
    pub consumers: usize,
    /// Reconnect attempts scheduled since the handle was created, after
    /// failed handshakes as well as lost sessions.
    pub reconnect_count: u64,
}

impl FeedMultiplexer {
    /// Create a stopped multiplexer.
    pub fn new(
        config: FeedConfig,
        protocol: impl FeedProtocol,
        credentials: impl CredentialSource,
    ) -> Self {
        Self::with_protocol(config, Arc::new(protocol), Arc::new(credentials))
    }

    /// Create a stopped multiplexer from already shared collaborators.
    pub fn with_protocol(
        config: FeedConfig,
        protocol: Arc<dyn FeedProtocol>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                config,
                protocol,
                credentials,
                registry: Arc::new(SubscriptionRegistry::new()),
                state: Arc::new(state),
                events,
                reconnects: Arc::new(AtomicU64::new(0)),
                running: Mutex::new(None),
            }),
        }
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.shared
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the connection task. Must be called inside a tokio runtime.
    ///
    /// Fails with [`FeedError::AlreadyStarted`] while a task is running. A
    /// task that ended on an authentication failure can be restarted.
    pub fn start(&self) -> Result<()> {
        let mut running = self.running();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return Err(FeedError::AlreadyStarted);
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = ConnectionTask {
            config: self.shared.config.clone(),
            protocol: Arc::clone(&self.shared.protocol),
            credentials: Arc::clone(&self.shared.credentials),
            registry: Arc::clone(&self.shared.registry),
            state: Arc::clone(&self.shared.state),
            events: self.shared.events.clone(),
            reconnects: Arc::clone(&self.shared.reconnects),
        };
        let handle = tokio::spawn(task.run(stop_rx));
        *running = Some(Running { stop_tx, handle });

        tracing::info!(
            endpoint = %self.shared.config.url,
            protocol = self.shared.protocol.name(),
            "Feed multiplexer started"
        );
        Ok(())
    }

    /// Close the upstream connection and wait for the task to end.
    ///
    /// The registry is kept; a later [`start`](Self::start) replays it.
    pub async fn stop(&self) {
        let running = self.running().take();
        let Some(Running { stop_tx, handle }) = running else {
            return;
        };
        let _ = stop_tx.send(());
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Connection task ended abnormally");
        }
        tracing::info!("Feed multiplexer stopped");
    }

    /// Whether a connection task is alive.
    pub fn is_running(&self) -> bool {
        self.running()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Attach `consumer` to `key`. Effective immediately, even while
    /// disconnected; the wire catches up on the next reconcile or replay.
    ///
    /// Returns `true` when `key` is newly subscribed.
    pub fn subscribe(&self, key: impl Into<SymbolKey>, consumer: &ConsumerHandle) -> bool {
        let key = key.into();
        let created = self.shared.registry.subscribe(key.clone(), consumer);
        tracing::debug!(symbol = %key, consumer = %consumer.id(), created, "Subscribed consumer");
        created
    }

    /// Detach `consumer` from `key`. Returns `true` when `key` was removed.
    pub fn unsubscribe(&self, key: &SymbolKey, consumer: &ConsumerHandle) -> bool {
        let removed = self.shared.registry.unsubscribe(key, consumer);
        tracing::debug!(symbol = %key, consumer = %consumer.id(), removed, "Unsubscribed consumer");
        removed
    }

    /// Subscribe a callback for as long as the returned guard lives.
    pub fn subscribe_callback<F>(&self, key: impl Into<SymbolKey>, callback: F) -> Subscription
    where
        F: Fn(&Tick) + Send + Sync + 'static,
    {
        self.attach(key.into(), ConsumerHandle::callback(callback))
    }

    /// Subscribe a bounded channel for as long as the returned guard lives.
    ///
    /// The receiver ends when the guard is dropped or the consumer is
    /// detached for lagging behind.
    pub fn subscribe_channel(
        &self,
        key: impl Into<SymbolKey>,
        capacity: usize,
    ) -> (Subscription, mpsc::Receiver<Tick>) {
        let (handle, rx) = ConsumerHandle::channel(capacity);
        (self.attach(key.into(), handle), rx)
    }

    fn attach(&self, key: SymbolKey, handle: ConsumerHandle) -> Subscription {
        self.subscribe(key.clone(), &handle);
        Subscription {
            registry: Arc::clone(&self.shared.registry),
            key,
            handle,
        }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.shared.registry
    }

    pub fn config(&self) -> &FeedConfig {
        &self.shared.config
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Subscribe to [`FeedEvent`] notifications.
    pub fn events(&self) -> broadcast::Receiver<FeedEvent> {
        self.shared.events.subscribe()
    }

    /// Reconnect attempts scheduled so far. Counts failed handshakes as well
    /// as lost sessions.
    pub fn reconnect_count(&self) -> u64 {
        self.shared.reconnects.load(Ordering::Relaxed)
    }

    pub fn health(&self) -> FeedHealth {
        FeedHealth {
            state: self.state(),
            running: self.is_running(),
            symbols: self.shared.registry.len(),
            consumers: self.shared.registry.total_consumers(),
            reconnect_count: self.reconnect_count(),
        }
    }
}

impl std::fmt::Debug for FeedMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedMultiplexer")
            .field("endpoint", &self.shared.config.url)
            .field("protocol", &self.shared.protocol.name())
            .field("state", &self.state())
            .field("symbols", &self.shared.registry.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Subscription guard
// ---------------------------------------------------------------------------

/// Keeps one consumer attached to one key. Dropping it unsubscribes and
/// closes the consumer.
#[must_use = "dropping a Subscription unsubscribes immediately"]
#[derive(Debug)]
pub struct Subscription {
    registry: Arc<SubscriptionRegistry>,
    key: SymbolKey,
    handle: ConsumerHandle,
}

impl Subscription {
    pub fn key(&self) -> &SymbolKey {
        &self.key
    }

    pub fn handle(&self) -> &ConsumerHandle {
        &self.handle
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.unsubscribe(&self.key, &self.handle);
        self.handle.close();
    }
}

// ---------------------------------------------------------------------------
// Connection task
// ---------------------------------------------------------------------------

/// Everything the task needs. Holds no reference to the stop sender, so
/// dropping every handle ends the task.
struct ConnectionTask {
    config: FeedConfig,
    protocol: Arc<dyn FeedProtocol>,
    credentials: Arc<dyn CredentialSource>,
    registry: Arc<SubscriptionRegistry>,
    state: Arc<watch::Sender<ConnectionState>>,
    events: broadcast::Sender<FeedEvent>,
    reconnects: Arc<AtomicU64>,
}

/// Why a connected session ended.
enum SessionEnd {
    Stopped,
    Lost,
    Rejected(String),
}

impl ConnectionTask {
    async fn run(self, mut stop_rx: oneshot::Receiver<()>) {
        let mut upstream = UpstreamConnection::with_channels(
            &self.config,
            Arc::clone(&self.protocol),
            Arc::clone(&self.state),
            self.events.clone(),
        );
        let mut coordinator = ResubscriptionCoordinator::new();
        let dispatcher = Dispatcher::new(
            Arc::clone(&self.registry),
            self.config.consumer_failure_threshold,
        )
        .with_events(self.events.clone());
        let mut backoff = Backoff::new(
            self.config.reconnect_base_delay(),
            self.config.reconnect_max_delay(),
        );

        loop {
            let credentials = self.credentials.credentials();
            let connected = tokio::select! {
                _ = &mut stop_rx => {
                    upstream.close().await;
                    return;
                }
                res = upstream.connect(&credentials) => res,
            };

            let end = match connected {
                Ok(()) => {
                    backoff.reset();
                    self.serve(&mut upstream, &mut coordinator, &dispatcher, &mut stop_rx)
                        .await
                }
                Err(e) if e.is_authentication() => SessionEnd::Rejected(e.to_string()),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to connect to upstream feed");
                    SessionEnd::Lost
                }
            };

            match end {
                SessionEnd::Stopped => {
                    upstream.close().await;
                    return;
                }
                SessionEnd::Rejected(reason) => {
                    tracing::error!(reason = %reason, "Upstream rejected credentials; not retrying");
                    upstream.mark_disconnected();
                    let _ = self.events.send(FeedEvent::AuthenticationFailed(reason.clone()));
                    self.credentials.authentication_failed(&reason);
                    return;
                }
                SessionEnd::Lost => {}
            }

            coordinator.reset();
            upstream.mark_reconnecting();
            self.reconnects.fetch_add(1, Ordering::Relaxed);

            let delay = backoff.next_delay();
            tracing::info!(
                attempt = backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "Reconnecting to upstream feed"
            );
            tokio::select! {
                _ = &mut stop_rx => {
                    upstream.close().await;
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Replay, then serve registry changes and inbound frames until the
    /// session ends.
    async fn serve(
        &self,
        upstream: &mut UpstreamConnection,
        coordinator: &mut ResubscriptionCoordinator,
        dispatcher: &Dispatcher,
        stop_rx: &mut oneshot::Receiver<()>,
    ) -> SessionEnd {
        match coordinator.replay(upstream, &self.registry).await {
            Ok(symbols) => {
                tracing::info!(symbols, "Replayed subscriptions after connect");
                let _ = self.events.send(FeedEvent::ReplayCompleted { symbols });
            }
            Err(e) => {
                tracing::warn!(error = %e, "Replay failed");
                return SessionEnd::Lost;
            }
        }
        if let Err(e) = coordinator.reconcile(upstream, &self.registry).await {
            tracing::warn!(error = %e, "Reconcile after replay failed");
            return SessionEnd::Lost;
        }

        loop {
            tokio::select! {
                _ = &mut *stop_rx => return SessionEnd::Stopped,
                _ = self.registry.changed() => {
                    if let Err(e) = coordinator.reconcile(upstream, &self.registry).await {
                        tracing::warn!(error = %e, "Reconcile failed");
                        return SessionEnd::Lost;
                    }
                }
                inbound = upstream.next_inbound() => match inbound {
                    Ok(Inbound::Ticks(ticks)) => {
                        for tick in &ticks {
                            dispatcher.dispatch(tick);
                        }
                    }
                    Ok(Inbound::Ignored) => tracing::trace!("Ignored control frame"),
                    Ok(Inbound::Rejected(reason)) => return SessionEnd::Rejected(reason),
                    Ok(Inbound::Disconnected(reason)) => {
                        tracing::warn!(reason = %reason, "Upstream connection lost");
                        return SessionEnd::Lost;
                    }
                    Err(e) => tracing::warn!(error = %e, "Dropping malformed frame"),
                },
            }
        }
    }
}
