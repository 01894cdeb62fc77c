//! Server-Sent Events adapter.
//!
//! ```text
//! GET /live-price-stream/{symbol}   text/event-stream, one `data: <tick json>` per tick
//! GET /feed/health                  multiplexer health as JSON
//! ```
//!
//! Each SSE response owns its [`Subscription`](crate::feed::Subscription)
//! inside the body stream. When the client goes away the body is dropped, the
//! guard with it, and the consumer is unsubscribed.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::Stream;
use futures_util::stream;

use crate::feed::{FeedHealth, FeedMultiplexer};
use crate::types::tick::SymbolKey;

/// State shared by the SSE routes.
#[derive(Debug, Clone)]
pub struct LiveStreamState {
    pub feed: FeedMultiplexer,
    /// Per-client tick buffer. A client that falls this far behind is dropped.
    pub buffer: usize,
    /// Segment used for path symbols without a `|`.
    pub default_segment: String,
}

impl LiveStreamState {
    /// Take the buffer size and default segment from the feed's config.
    pub fn new(feed: FeedMultiplexer) -> Self {
        let buffer = feed.config().sse_buffer;
        let default_segment = feed.config().default_segment.clone();
        Self {
            feed,
            buffer,
            default_segment,
        }
    }
}

/// Router with the live stream and health routes.
pub fn router(state: LiveStreamState) -> Router {
    Router::new()
        .route("/live-price-stream/{symbol}", get(live_price_stream))
        .route("/feed/health", get(feed_health))
        .with_state(state)
}

async fn live_price_stream(
    State(state): State<LiveStreamState>,
    Path(symbol): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, String)> {
    let key = SymbolKey::qualify(&symbol, &state.default_segment)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let (subscription, rx) = state.feed.subscribe_channel(key, state.buffer);
    tracing::info!(
        symbol = %subscription.key(),
        consumer = %subscription.handle().id(),
        "SSE client subscribed"
    );

    let events = stream::unfold((rx, subscription), |(mut rx, subscription)| async move {
        let tick = rx.recv().await?;
        let event = Event::default().json_data(&tick).unwrap_or_else(|e| {
            tracing::warn!(symbol = %tick.symbol_key, error = %e, "Failed to encode tick");
            Event::default().comment("encode error")
        });
        Some((Ok::<_, Infallible>(event), (rx, subscription)))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn feed_health(State(state): State<LiveStreamState>) -> Json<FeedHealth> {
    Json(state.feed.health())
}
