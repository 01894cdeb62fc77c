//! The live feed multiplexer and its parts.
//!
//! | Module | Role |
//! |---|---|
//! | [`registry`] | symbol → consumers, the source of truth for subscriptions |
//! | [`upstream`] | the single WebSocket and its [`ConnectionState`] |
//! | [`backoff`] | reconnect delay schedule |
//! | [`coordinator`] | replay after connect, delta reconcile afterwards |
//! | [`dispatch`] | isolated tick fan-out |
//! | [`consumer`] | consumer sinks and handles |
//! | [`multiplexer`] | the public handle and the connection task |

use crate::types::enums::ConnectionState;
use crate::types::tick::SymbolKey;

pub mod backoff;
pub mod consumer;
pub mod coordinator;
pub mod dispatch;
pub mod multiplexer;
pub mod registry;
pub mod upstream;

pub use backoff::Backoff;
pub use consumer::{ConsumerHandle, ConsumerId};
pub use coordinator::{ResubscriptionCoordinator, UpstreamSink};
pub use dispatch::{DispatchReport, Dispatcher};
pub use multiplexer::{FeedHealth, FeedMultiplexer, Subscription};
pub use registry::SubscriptionRegistry;
pub use upstream::UpstreamConnection;

/// Notifications published by a running multiplexer.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// The upstream connection moved to a new state.
    StateChanged(ConnectionState),
    /// The registry snapshot was replayed after a (re)connect.
    ReplayCompleted { symbols: usize },
    /// The provider rejected the credentials; the task has stopped.
    AuthenticationFailed(String),
    /// A consumer was dropped after repeated delivery failures.
    ConsumerDetached {
        symbol_key: SymbolKey,
        consumer: ConsumerId,
    },
}
