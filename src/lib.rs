//! # dhan-livefeed
//!
//! A live market feed multiplexer: one upstream WebSocket connection shared
//! by any number of per-symbol consumers.
//!
//! - Subscriptions are reference counted per symbol; the upstream sees one
//!   subscribe when the first consumer arrives and one unsubscribe when the
//!   last one leaves.
//! - Lost connections are re-established with capped exponential backoff and
//!   the full subscription set is replayed as one batch.
//! - A slow, failing or panicking consumer never affects the others.
//! - Consumers can be callbacks, bounded channels or SSE clients
//!   (see [`sse`]).
//!
//! ## Quick Start
//!
//! ```no_run
//! use dhan_livefeed::config::{FeedConfig, ProtocolKind};
//! use dhan_livefeed::credentials::Credentials;
//! use dhan_livefeed::{FeedMultiplexer, StaticCredentials, protocol};
//!
//! #[tokio::main]
//! async fn main() -> dhan_livefeed::Result<()> {
//!     let config = FeedConfig::builder().protocol(ProtocolKind::Dhan).try_build()?;
//!     let feed = FeedMultiplexer::with_protocol(
//!         config.clone(),
//!         protocol::from_config(&config),
//!         std::sync::Arc::new(StaticCredentials::from(Credentials::from_env()?)),
//!     );
//!     feed.start()?;
//!
//!     let (_sub, mut ticks) = feed.subscribe_channel("NSE_EQ|1333", 64);
//!     while let Some(tick) = ticks.recv().await {
//!         println!("{} {} {}", tick.symbol_key, tick.price, tick.timestamp);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod feed;
pub mod protocol;
pub mod sse;
pub mod types;

pub use config::FeedConfig;
pub use credentials::{CredentialSource, Credentials, SharedCredentials, StaticCredentials};
/// Re-export the error types and Result alias.
pub use error::{ConsumerError, FeedError, Result};
pub use feed::{ConsumerHandle, FeedEvent, FeedHealth, FeedMultiplexer, Subscription};
pub use types::{ConnectionState, SymbolKey, Tick};
