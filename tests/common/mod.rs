//! Shared helpers: a local mock upstream speaking the JSON protocol.
#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;

use dhan_livefeed::config::FeedConfig;
use dhan_livefeed::credentials::StaticCredentials;
use dhan_livefeed::feed::FeedMultiplexer;
use dhan_livefeed::protocol::JsonProtocol;

pub const TIMEOUT: Duration = Duration::from_secs(5);

enum Command {
    Send(Message),
    Kick,
}

#[derive(Default)]
struct MockState {
    /// `(connection index, decoded frame)` for every text frame received.
    received: StdMutex<Vec<(usize, Value)>>,
    /// Query strings of accepted handshakes.
    queries: StdMutex<Vec<String>>,
    clients: StdMutex<Vec<mpsc::UnboundedSender<Command>>>,
    handshakes: AtomicUsize,
    reject_auth: AtomicBool,
}

/// WebSocket server that records what the feed sends and lets a test push
/// frames or drop the connection.
pub struct MockUpstream {
    addr: SocketAddr,
    state: Arc<MockState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl MockUpstream {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .expect("bind mock upstream");
        let addr = listener.local_addr().expect("local addr");
        let state = Arc::new(MockState::default());
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let accept_state = Arc::clone(&state);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _)) => {
                            let state = Arc::clone(&accept_state);
                            tokio::spawn(handle_socket(state, stream));
                        }
                        Err(err) => {
                            tracing::error!(error = %err, "mock upstream accept failed");
                            break;
                        }
                    },
                }
            }
        });

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/feed", self.addr)
    }

    /// Answer every following handshake with HTTP 401.
    pub fn set_reject_auth(&self, reject: bool) {
        self.state.reject_auth.store(reject, Ordering::SeqCst);
    }

    /// Accepted WebSocket handshakes so far.
    pub fn connections(&self) -> usize {
        self.state.handshakes.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.state.queries.lock().expect("queries lock").clone()
    }

    pub fn received(&self) -> Vec<(usize, Value)> {
        self.state.received.lock().expect("received lock").clone()
    }

    /// Frames received on the given connection (0-based).
    pub fn received_on(&self, connection: usize) -> Vec<Value> {
        self.received()
            .into_iter()
            .filter(|(idx, _)| *idx == connection)
            .map(|(_, v)| v)
            .collect()
    }

    fn latest_client(&self) -> Option<mpsc::UnboundedSender<Command>> {
        self.state.clients.lock().expect("clients lock").last().cloned()
    }

    /// Send a frame on the most recent connection.
    pub fn push_message(&self, message: Message) {
        if let Some(tx) = self.latest_client() {
            let _ = tx.send(Command::Send(message));
        }
    }

    pub fn push(&self, value: Value) {
        self.push_message(Message::Text(value.to_string().into()));
    }

    /// Drop the most recent connection without a close handshake.
    pub fn kick(&self) {
        if let Some(tx) = self.latest_client() {
            let _ = tx.send(Command::Kick);
        }
    }

    pub async fn wait_for_connections(&self, n: usize) {
        wait_until(|| self.connections() >= n, "upstream connections").await;
    }

    /// Wait until connection `connection` has received at least `n` frames.
    pub async fn wait_for_frames(&self, connection: usize, n: usize) {
        wait_until(|| self.received_on(connection).len() >= n, "upstream frames").await;
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}

async fn handle_socket(state: Arc<MockState>, stream: TcpStream) {
    let reject = state.reject_auth.load(Ordering::SeqCst);
    let query_state = Arc::clone(&state);
    let accepted = accept_hdr_async(stream, move |req: &Request, resp: Response| {
        if reject {
            let mut err = ErrorResponse::new(Some("unauthorized".to_owned()));
            *err.status_mut() = StatusCode::UNAUTHORIZED;
            return Err(err);
        }
        if let Ok(mut queries) = query_state.queries.lock() {
            queries.push(req.uri().query().unwrap_or_default().to_owned());
        }
        Ok(resp)
    })
    .await;

    let Ok(ws) = accepted else {
        return;
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let index = {
        let mut clients = state.clients.lock().expect("clients lock");
        clients.push(tx);
        clients.len() - 1
    };
    state.handshakes.fetch_add(1, Ordering::SeqCst);

    let (mut sink, mut source) = ws.split();
    loop {
        tokio::select! {
            msg = source.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(value) = serde_json::from_str::<Value>(text.as_str()) {
                        state.received.lock().expect("received lock").push((index, value));
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            cmd = rx.recv() => match cmd {
                Some(Command::Send(message)) => {
                    if sink.send(message).await.is_err() {
                        break;
                    }
                }
                Some(Command::Kick) | None => break,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Poll `cond` until it holds or [`TIMEOUT`] elapses.
pub async fn wait_until(mut cond: impl FnMut() -> bool, what: &str) {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Await `fut` with [`TIMEOUT`].
pub async fn within<T>(fut: impl Future<Output = T>, what: &str) -> T {
    tokio::time::timeout(TIMEOUT, fut)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

pub fn tick_json(key: &str, price: f64) -> Value {
    json!({
        "symbolKey": key,
        "price": price,
        "volume": 10,
        "ts": 1_718_000_000_000i64,
    })
}

pub fn test_config(url: &str) -> FeedConfig {
    FeedConfig::builder()
        .url(url)
        .reconnect_base_delay_ms(50)
        .reconnect_max_delay_ms(400)
        .connect_timeout_ms(2_000)
        .build()
}

pub fn json_feed(url: &str) -> FeedMultiplexer {
    FeedMultiplexer::new(
        test_config(url),
        JsonProtocol,
        StaticCredentials::new("1000000001", "test-token"),
    )
}

/// Keys of every `subscribe` / `unsubscribe` frame, in order.
pub fn actions(frames: &[Value], action: &str) -> Vec<Vec<String>> {
    frames
        .iter()
        .filter(|f| f["action"] == action)
        .map(|f| {
            f["keys"]
                .as_array()
                .map(|keys| {
                    keys.iter()
                        .filter_map(|k| k.as_str().map(str::to_owned))
                        .collect()
                })
                .unwrap_or_default()
        })
        .collect()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
