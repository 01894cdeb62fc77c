//! Tick fan-out and consumer isolation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use tokio::sync::broadcast;

use dhan_livefeed::error::ConsumerError;
use dhan_livefeed::feed::consumer::Consumer;
use dhan_livefeed::feed::{ConsumerHandle, Dispatcher, FeedEvent, SubscriptionRegistry};
use dhan_livefeed::types::{SymbolKey, Tick};

fn tick(key: &str, price: f64) -> Tick {
    let ts = Utc
        .timestamp_millis_opt(1_718_000_000_000)
        .single()
        .expect("valid timestamp");
    Tick::new(SymbolKey::from(key), price, 1, ts)
}

fn counting() -> (ConsumerHandle, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    let handle = ConsumerHandle::callback(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    (handle, count)
}

/// Fails every delivery.
struct Broken;

impl Consumer for Broken {
    fn deliver(&self, _tick: &Tick) -> Result<(), ConsumerError> {
        Err(ConsumerError::Closed)
    }
}

// ===================================================================
// Isolation
// ===================================================================

#[test]
fn test_panicking_consumer_does_not_block_healthy_one() {
    let registry = Arc::new(SubscriptionRegistry::new());
    let dispatcher = Dispatcher::new(Arc::clone(&registry), u32::MAX);
    let key = SymbolKey::from("NSE_EQ|RELIANCE");

    let bad = ConsumerHandle::callback(|_| panic!("consumer bug"));
    let (good, count) = counting();
    registry.subscribe(key.clone(), &bad);
    registry.subscribe(key.clone(), &good);

    for _ in 0..10 {
        let report = dispatcher.dispatch(&tick("NSE_EQ|RELIANCE", 2450.5));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
    }

    assert_eq!(count.load(Ordering::SeqCst), 10);
    assert_eq!(bad.failures(), 10);
}

#[test]
fn test_failing_consumer_is_detached_at_threshold() {
    let registry = Arc::new(SubscriptionRegistry::new());
    let (events_tx, mut events_rx) = broadcast::channel(16);
    let dispatcher = Dispatcher::new(Arc::clone(&registry), 3).with_events(events_tx);
    let key = SymbolKey::from("NSE_EQ|TCS");

    let bad = ConsumerHandle::new(Broken);
    let (good, count) = counting();
    registry.subscribe(key.clone(), &bad);
    registry.subscribe(key.clone(), &good);
    registry.subscribe(SymbolKey::from("NSE_EQ|INFY"), &bad);

    dispatcher.dispatch(&tick("NSE_EQ|TCS", 1.0));
    dispatcher.dispatch(&tick("NSE_EQ|TCS", 2.0));
    assert!(bad.is_live());

    let report = dispatcher.dispatch(&tick("NSE_EQ|TCS", 3.0));
    assert_eq!(report.detached, 1);
    assert!(!bad.is_live());
    assert_eq!(registry.consumers_for(&key), vec![good.clone()]);
    // The detached consumer no longer holds its other symbol either.
    assert!(!registry.contains(&SymbolKey::from("NSE_EQ|INFY")));

    match events_rx.try_recv().expect("detach event") {
        FeedEvent::ConsumerDetached {
            symbol_key,
            consumer,
        } => {
            assert_eq!(symbol_key, key);
            assert_eq!(consumer, bad.id());
        }
        other => panic!("unexpected event {other:?}"),
    }

    dispatcher.dispatch(&tick("NSE_EQ|TCS", 4.0));
    assert_eq!(count.load(Ordering::SeqCst), 4);
}

#[test]
fn test_success_resets_failure_count() {
    let registry = Arc::new(SubscriptionRegistry::new());
    let dispatcher = Dispatcher::new(Arc::clone(&registry), 3);
    let fail_next = Arc::new(AtomicUsize::new(0));

    let flag = Arc::clone(&fail_next);
    let flaky = ConsumerHandle::callback(move |_| {
        if flag.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
            panic!("every other tick");
        }
    });
    registry.subscribe(SymbolKey::from("NSE_EQ|A"), &flaky);

    for i in 0..20 {
        dispatcher.dispatch(&tick("NSE_EQ|A", f64::from(i)));
    }

    assert!(flaky.is_live());
    assert!(flaky.failures() <= 1);
}

#[test]
fn test_full_channel_counts_as_failure() {
    let registry = Arc::new(SubscriptionRegistry::new());
    let dispatcher = Dispatcher::new(Arc::clone(&registry), 2);
    let (slow, mut rx) = ConsumerHandle::channel(1);
    registry.subscribe(SymbolKey::from("NSE_EQ|A"), &slow);

    assert_eq!(dispatcher.dispatch(&tick("NSE_EQ|A", 1.0)).delivered, 1);
    assert_eq!(dispatcher.dispatch(&tick("NSE_EQ|A", 2.0)).failed, 1);
    assert_eq!(dispatcher.dispatch(&tick("NSE_EQ|A", 3.0)).detached, 1);

    // The buffered tick is still readable, then the channel ends.
    assert_eq!(rx.try_recv().expect("buffered tick").price, 1.0);
    assert!(matches!(
        rx.try_recv(),
        Err(tokio::sync::mpsc::error::TryRecvError::Disconnected)
    ));
    assert!(registry.is_empty());
}

// ===================================================================
// Ordering and routing
// ===================================================================

#[test]
fn test_same_symbol_ticks_arrive_in_order() {
    let registry = Arc::new(SubscriptionRegistry::new());
    let dispatcher = Dispatcher::new(Arc::clone(&registry), 3);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&seen);
    let consumer = ConsumerHandle::callback(move |t: &Tick| {
        sink.lock().expect("lock").push(t.price);
    });
    registry.subscribe(SymbolKey::from("NSE_EQ|A"), &consumer);

    for i in 0..100 {
        dispatcher.dispatch(&tick("NSE_EQ|A", f64::from(i)));
    }

    let seen = seen.lock().expect("lock");
    let expected: Vec<f64> = (0..100).map(f64::from).collect();
    assert_eq!(*seen, expected);
}

#[test]
fn test_ticks_for_unsubscribed_symbols_are_dropped() {
    let registry = Arc::new(SubscriptionRegistry::new());
    let dispatcher = Dispatcher::new(Arc::clone(&registry), 3);
    let (consumer, count) = counting();
    registry.subscribe(SymbolKey::from("NSE_EQ|A"), &consumer);

    let report = dispatcher.dispatch(&tick("NSE_EQ|B", 1.0));

    assert_eq!(report.delivered, 0);
    assert_eq!(count.load(Ordering::SeqCst), 0);
}
