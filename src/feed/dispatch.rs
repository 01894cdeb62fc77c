//! Tick fan-out with per-consumer isolation.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::error::ConsumerError;
use crate::feed::FeedEvent;
use crate::feed::consumer::ConsumerHandle;
use crate::feed::registry::SubscriptionRegistry;
use crate::types::tick::Tick;

/// Result of dispatching one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Consumers that accepted the tick.
    pub delivered: usize,
    /// Consumers that failed on this tick.
    pub failed: usize,
    /// Consumers detached because they reached the failure threshold.
    pub detached: usize,
}

/// Delivers ticks to the consumers registered for their symbol.
///
/// Each delivery is isolated: a panicking or failing consumer is counted,
/// logged, and after `failure_threshold` consecutive failures closed and
/// removed from the registry. Other consumers are never affected.
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<SubscriptionRegistry>,
    failure_threshold: u32,
    events: Option<broadcast::Sender<FeedEvent>>,
}

impl Dispatcher {
    pub fn new(registry: Arc<SubscriptionRegistry>, failure_threshold: u32) -> Self {
        Self {
            registry,
            failure_threshold: failure_threshold.max(1),
            events: None,
        }
    }

    /// Publish [`FeedEvent::ConsumerDetached`] on `events`.
    pub fn with_events(mut self, events: broadcast::Sender<FeedEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Deliver `tick` to every live consumer of its symbol, in order.
    pub fn dispatch(&self, tick: &Tick) -> DispatchReport {
        let mut report = DispatchReport::default();

        for consumer in self.registry.consumers_for(&tick.symbol_key) {
            if !consumer.is_live() {
                continue;
            }
            match deliver_isolated(&consumer, tick) {
                Ok(()) => {
                    consumer.record_success();
                    report.delivered += 1;
                }
                Err(err) => {
                    report.failed += 1;
                    let failures = consumer.record_failure();
                    tracing::warn!(
                        consumer = %consumer.id(),
                        symbol = %tick.symbol_key,
                        failures,
                        error = %err,
                        "Consumer failed to accept tick"
                    );
                    if failures >= self.failure_threshold {
                        self.detach(&consumer, tick);
                        report.detached += 1;
                    }
                }
            }
        }

        report
    }

    fn detach(&self, consumer: &ConsumerHandle, tick: &Tick) {
        consumer.close();
        self.registry.remove_consumer(consumer);

        tracing::warn!(
            consumer = %consumer.id(),
            symbol = %tick.symbol_key,
            threshold = self.failure_threshold,
            "Detached consumer after repeated failures"
        );

        if let Some(events) = &self.events {
            let _ = events.send(FeedEvent::ConsumerDetached {
                symbol_key: tick.symbol_key.clone(),
                consumer: consumer.id(),
            });
        }
    }
}

fn deliver_isolated(consumer: &ConsumerHandle, tick: &Tick) -> Result<(), ConsumerError> {
    catch_unwind(AssertUnwindSafe(|| consumer.deliver(tick)))
        .unwrap_or_else(|payload| Err(ConsumerError::Panicked(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
