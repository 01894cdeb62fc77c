//! Subscription registry: symbol → consumers.
//!
//! The registry is the single source of truth for what should be subscribed
//! upstream. A key is present if and only if it has at least one consumer.
//! Operations never suspend; every change to the *set of keys* is signalled
//! through [`SubscriptionRegistry::changed`] so the connection task can bring
//! the wire in line.

use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::Notify;
use tokio::sync::futures::Notified;

use crate::feed::consumer::ConsumerHandle;
use crate::types::tick::SymbolKey;

/// In-memory subscription state shared by the handle and the connection task.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: RwLock<HashMap<SymbolKey, Vec<ConsumerHandle>>>,
    changed: Notify,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<SymbolKey, Vec<ConsumerHandle>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SymbolKey, Vec<ConsumerHandle>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach `consumer` to `key`. Idempotent.
    ///
    /// Returns `true` when `key` was not subscribed before. Closed consumers
    /// are not attached.
    pub fn subscribe(&self, key: SymbolKey, consumer: &ConsumerHandle) -> bool {
        if !consumer.is_live() {
            return false;
        }
        let created = {
            let mut entries = self.write();
            let created = !entries.contains_key(&key);
            let consumers = entries.entry(key).or_default();
            if !consumers.iter().any(|c| c.id() == consumer.id()) {
                consumers.push(consumer.clone());
            }
            created
        };
        if created {
            self.changed.notify_one();
        }
        created
    }

    /// Detach `consumer` from `key`. Unknown pairings are ignored.
    ///
    /// Returns `true` when `key` lost its last consumer and was removed.
    pub fn unsubscribe(&self, key: &SymbolKey, consumer: &ConsumerHandle) -> bool {
        let removed = {
            let mut entries = self.write();
            match entries.get_mut(key) {
                Some(consumers) => {
                    consumers.retain(|c| c.id() != consumer.id());
                    if consumers.is_empty() {
                        entries.remove(key);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };
        if removed {
            self.changed.notify_one();
        }
        removed
    }

    /// Detach `consumer` from every key it is attached to.
    ///
    /// Returns the keys that lost their last consumer.
    pub fn remove_consumer(&self, consumer: &ConsumerHandle) -> Vec<SymbolKey> {
        let removed: Vec<SymbolKey> = {
            let mut entries = self.write();
            for consumers in entries.values_mut() {
                consumers.retain(|c| c.id() != consumer.id());
            }
            let emptied: Vec<SymbolKey> = entries
                .iter()
                .filter(|(_, consumers)| consumers.is_empty())
                .map(|(key, _)| key.clone())
                .collect();
            for key in &emptied {
                entries.remove(key);
            }
            emptied
        };
        if !removed.is_empty() {
            self.changed.notify_one();
        }
        removed
    }

    /// Snapshot of the consumers of `key`, in subscription order.
    pub fn consumers_for(&self, key: &SymbolKey) -> Vec<ConsumerHandle> {
        self.read().get(key).cloned().unwrap_or_default()
    }

    /// Snapshot of every subscribed key.
    pub fn all_symbols(&self) -> BTreeSet<SymbolKey> {
        self.read().keys().cloned().collect()
    }

    pub fn contains(&self, key: &SymbolKey) -> bool {
        self.read().contains_key(key)
    }

    pub fn consumer_count(&self, key: &SymbolKey) -> usize {
        self.read().get(key).map_or(0, Vec::len)
    }

    pub fn total_consumers(&self) -> usize {
        self.read().values().map(Vec::len).sum()
    }

    /// Number of subscribed keys.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Resolves after the set of keys has changed.
    ///
    /// Signals coalesce: several changes before the future is polled wake it
    /// once, and a change made while nobody waits is remembered.
    pub fn changed(&self) -> Notified<'_> {
        self.changed.notified()
    }
}
