//! Resubscription coordinator.
//!
//! Keeps a mirror of what the upstream connection is subscribed to and brings
//! it in line with the [`SubscriptionRegistry`]:
//!
//! - [`replay`](ResubscriptionCoordinator::replay) after every successful
//!   (re)connect sends the whole registry snapshot as one subscribe batch;
//! - [`reconcile`](ResubscriptionCoordinator::reconcile) afterwards sends only
//!   the difference, unsubscribes first.
//!
//! Both run on the connection task, one at a time, so registry changes that
//! land while a replay is on the wire are applied by the reconcile pass that
//! follows it and never interleave with the replay batch.

use std::collections::BTreeSet;
use std::future::Future;

use crate::error::Result;
use crate::feed::registry::SubscriptionRegistry;
use crate::types::tick::SymbolKey;

/// Destination of subscription batches.
pub trait UpstreamSink {
    /// Send one subscribe batch for `keys`.
    fn send_subscribe(&mut self, keys: &[SymbolKey]) -> impl Future<Output = Result<()>> + Send;

    /// Send one unsubscribe batch for `keys`.
    fn send_unsubscribe(&mut self, keys: &[SymbolKey])
    -> impl Future<Output = Result<()>> + Send;
}

/// Tracks the wire-level subscription set.
#[derive(Debug, Default)]
pub struct ResubscriptionCoordinator {
    wire: BTreeSet<SymbolKey>,
}

impl ResubscriptionCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys believed to be subscribed upstream.
    pub fn wire_symbols(&self) -> &BTreeSet<SymbolKey> {
        &self.wire
    }

    /// Forget the wire state. Called when the connection is lost.
    pub fn reset(&mut self) {
        self.wire.clear();
    }

    /// Subscribe the full registry snapshot in a single batch.
    ///
    /// Returns the number of keys replayed. On error the mirror is left empty
    /// and the caller treats the connection as lost.
    pub async fn replay<S: UpstreamSink>(
        &mut self,
        sink: &mut S,
        registry: &SubscriptionRegistry,
    ) -> Result<usize> {
        self.wire.clear();
        let snapshot = registry.all_symbols();
        if snapshot.is_empty() {
            return Ok(0);
        }

        let keys: Vec<SymbolKey> = snapshot.iter().cloned().collect();
        sink.send_subscribe(&keys).await?;

        tracing::debug!(count = keys.len(), "Replayed subscriptions");
        self.wire = snapshot;
        Ok(keys.len())
    }

    /// Send the delta between the registry and the wire mirror.
    pub async fn reconcile<S: UpstreamSink>(
        &mut self,
        sink: &mut S,
        registry: &SubscriptionRegistry,
    ) -> Result<()> {
        let desired = registry.all_symbols();

        let removed: Vec<SymbolKey> = self.wire.difference(&desired).cloned().collect();
        if !removed.is_empty() {
            sink.send_unsubscribe(&removed).await?;
            for key in &removed {
                self.wire.remove(key);
            }
            tracing::debug!(count = removed.len(), "Unsubscribed instruments");
        }

        let added: Vec<SymbolKey> = desired.difference(&self.wire).cloned().collect();
        if !added.is_empty() {
            sink.send_subscribe(&added).await?;
            self.wire.extend(added.iter().cloned());
            tracing::debug!(count = added.len(), "Subscribed instruments");
        }

        Ok(())
    }
}
