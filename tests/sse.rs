//! SSE adapter over a running multiplexer.

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;

use dhan_livefeed::feed::FeedMultiplexer;
use dhan_livefeed::sse::{LiveStreamState, router};
use dhan_livefeed::types::{ConnectionState, SymbolKey, Tick};

use common::{MockUpstream, json_feed, tick_json, wait_until, within};

async fn serve(feed: &FeedMultiplexer) -> SocketAddr {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = router(LiveStreamState::new(feed.clone()));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// Read from the body until a full `data:` event has arrived.
async fn next_data(response: &mut reqwest::Response, buffer: &mut String) -> String {
    loop {
        if let Some(end) = buffer.find("\n\n") {
            let event: String = buffer.drain(..end + 2).collect();
            if let Some(data) = event.lines().find_map(|l| l.strip_prefix("data:")) {
                return data.trim().to_owned();
            }
            continue;
        }
        let chunk = within(response.chunk(), "SSE chunk")
            .await
            .expect("body error")
            .expect("stream ended");
        buffer.push_str(std::str::from_utf8(&chunk).expect("utf-8"));
    }
}

#[tokio::test]
async fn test_stream_delivers_ticks_and_detaches_on_disconnect() {
    let upstream = MockUpstream::spawn().await;
    let feed = json_feed(&upstream.url());
    feed.start().expect("start");
    let addr = serve(&feed).await;

    let mut response = reqwest::get(format!("http://{addr}/live-price-stream/RELIANCE"))
        .await
        .expect("request");
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"].to_str().expect("header"),
        "text/event-stream"
    );

    let key = SymbolKey::from("NSE_EQ|RELIANCE");
    wait_until(|| feed.registry().contains(&key), "SSE subscription").await;
    upstream.wait_for_frames(0, 1).await;

    upstream.push(tick_json("NSE_EQ|RELIANCE", 2450.5));
    let mut buffer = String::new();
    let data = next_data(&mut response, &mut buffer).await;
    let tick: Tick = serde_json::from_str(&data).expect("tick json");
    assert_eq!(tick.symbol_key, key);
    assert_eq!(tick.price, 2450.5);

    drop(response);

    // The server notices the closed socket on its next write.
    let registry = feed.registry().clone();
    within(
        async {
            while registry.contains(&key) {
                upstream.push(tick_json("NSE_EQ|RELIANCE", 2451.0));
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        },
        "SSE detach",
    )
    .await;

    upstream.wait_for_frames(0, 2).await;
    let frames = upstream.received_on(0);
    assert_eq!(frames[1]["action"], "unsubscribe");

    feed.stop().await;
}

#[tokio::test]
async fn test_qualified_symbol_in_path() {
    let upstream = MockUpstream::spawn().await;
    let feed = json_feed(&upstream.url());
    let addr = serve(&feed).await;

    let _response = reqwest::get(format!("http://{addr}/live-price-stream/BSE_EQ%7C500325"))
        .await
        .expect("request");

    let key = SymbolKey::from("BSE_EQ|500325");
    wait_until(|| feed.registry().contains(&key), "SSE subscription").await;
}

#[tokio::test]
async fn test_invalid_symbol_is_bad_request() {
    let upstream = MockUpstream::spawn().await;
    let feed = json_feed(&upstream.url());
    let addr = serve(&feed).await;

    let response = reqwest::get(format!("http://{addr}/live-price-stream/NSE_EQ%7C"))
        .await
        .expect("request");

    assert_eq!(response.status(), 400);
    assert!(feed.registry().is_empty());
}

#[tokio::test]
async fn test_health_route() {
    let upstream = MockUpstream::spawn().await;
    let feed = json_feed(&upstream.url());
    let (_sub, _rx) = feed.subscribe_channel("NSE_EQ|TCS", 4);
    feed.start().expect("start");
    let mut states = feed.watch_state();
    within(states.wait_for(|s| *s == ConnectionState::Connected), "Connected")
        .await
        .expect("state channel");
    let addr = serve(&feed).await;

    let health: serde_json::Value = reqwest::get(format!("http://{addr}/feed/health"))
        .await
        .expect("request")
        .json()
        .await
        .expect("json body");

    assert_eq!(health["state"], "connected");
    assert_eq!(health["symbols"], 1);
    assert_eq!(health["consumers"], 1);
    assert_eq!(health["running"], true);

    feed.stop().await;
}
