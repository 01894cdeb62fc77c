//! Live feed server: one upstream connection, many SSE clients.
//!
//! # Usage
//!
//! ```sh
//! export DHAN_CLIENT_ID="your-client-id"
//! export DHAN_ACCESS_TOKEN="your-access-token"
//! export LIVEFEED_PROTOCOL=dhan LIVEFEED_FEED_MODE=quote
//! cargo run --bin livefeed --features cli
//!
//! curl -N http://127.0.0.1:8080/live-price-stream/1333
//! ```

use std::env;

use dhan_livefeed::config::FeedConfig;
use dhan_livefeed::constants::defaults;
use dhan_livefeed::credentials::{Credentials, SharedCredentials};
use dhan_livefeed::feed::FeedMultiplexer;
use dhan_livefeed::protocol;
use dhan_livefeed::sse::{self, LiveStreamState};

#[tokio::main]
async fn main() -> dhan_livefeed::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = FeedConfig::from_env()?;
    let credentials = SharedCredentials::new(Credentials::from_env()?);
    let feed = FeedMultiplexer::with_protocol(
        config.clone(),
        protocol::from_config(&config),
        std::sync::Arc::new(credentials),
    );
    feed.start()?;

    let bind_addr = env::var("LIVEFEED_BIND_ADDR").unwrap_or_else(|_| defaults::BIND_ADDR.to_owned());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "Serving live price streams");

    let app = sse::router(LiveStreamState::new(feed.clone()));
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Ctrl-C received, shutting down");
        })
        .await?;

    feed.stop().await;
    Ok(())
}
