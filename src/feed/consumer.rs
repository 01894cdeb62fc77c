//! Consumer sinks and the handles the registry stores for them.
//!
//! A [`ConsumerHandle`] wraps a [`Consumer`] with a process-unique
//! [`ConsumerId`], a liveness flag and a consecutive-failure counter. Handles
//! are cheap to clone; all clones refer to the same consumer, and identity for
//! subscribe/unsubscribe is the id.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::error::ConsumerError;
use crate::types::tick::Tick;

static NEXT_CONSUMER_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one consumer for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(pub u64);

impl ConsumerId {
    fn next() -> Self {
        Self(NEXT_CONSUMER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Consumer({})", self.0)
    }
}

/// A delivery sink for ticks.
///
/// `deliver` runs on the connection task and must not block: slow consumers
/// should buffer and report [`ConsumerError::Lagging`] instead of waiting.
pub trait Consumer: Send + Sync + 'static {
    fn deliver(&self, tick: &Tick) -> Result<(), ConsumerError>;

    /// Release the sink after it has been detached. Default: nothing.
    fn close(&self) {}
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Invokes a closure for every tick. A panic counts as a delivery failure.
pub struct CallbackConsumer<F> {
    callback: F,
}

impl<F> CallbackConsumer<F>
where
    F: Fn(&Tick) + Send + Sync + 'static,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> Consumer for CallbackConsumer<F>
where
    F: Fn(&Tick) + Send + Sync + 'static,
{
    fn deliver(&self, tick: &Tick) -> Result<(), ConsumerError> {
        (self.callback)(tick);
        Ok(())
    }
}

/// Forwards ticks into a bounded channel without waiting.
///
/// A full buffer is reported as [`ConsumerError::Lagging`]; closing the sink
/// drops the sender so the receiving side observes end-of-stream.
pub struct ChannelConsumer {
    tx: Mutex<Option<mpsc::Sender<Tick>>>,
}

impl ChannelConsumer {
    pub fn new(tx: mpsc::Sender<Tick>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }
}

impl Consumer for ChannelConsumer {
    fn deliver(&self, tick: &Tick) -> Result<(), ConsumerError> {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = guard.as_ref().ok_or(ConsumerError::Closed)?;
        tx.try_send(tick.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ConsumerError::Lagging,
            mpsc::error::TrySendError::Closed(_) => ConsumerError::Closed,
        })
    }

    fn close(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

struct HandleInner {
    id: ConsumerId,
    sink: Box<dyn Consumer>,
    live: AtomicBool,
    failures: AtomicU32,
}

/// Shared reference to a consumer, as stored in the subscription registry.
#[derive(Clone)]
pub struct ConsumerHandle {
    inner: Arc<HandleInner>,
}

impl ConsumerHandle {
    /// Wrap a sink in a new handle with a fresh id.
    pub fn new(sink: impl Consumer) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id: ConsumerId::next(),
                sink: Box::new(sink),
                live: AtomicBool::new(true),
                failures: AtomicU32::new(0),
            }),
        }
    }

    /// Handle around a [`CallbackConsumer`].
    pub fn callback<F>(callback: F) -> Self
    where
        F: Fn(&Tick) + Send + Sync + 'static,
    {
        Self::new(CallbackConsumer::new(callback))
    }

    /// Handle around a [`ChannelConsumer`] with the given buffer.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Tick>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(ChannelConsumer::new(tx)), rx)
    }

    pub fn id(&self) -> ConsumerId {
        self.inner.id
    }

    /// Whether the consumer still accepts ticks.
    pub fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::Acquire)
    }

    /// Consecutive failed deliveries so far.
    pub fn failures(&self) -> u32 {
        self.inner.failures.load(Ordering::Acquire)
    }

    /// Mark the consumer dead and release its sink. Idempotent.
    pub fn close(&self) {
        if self.inner.live.swap(false, Ordering::AcqRel) {
            self.inner.sink.close();
        }
    }

    pub(crate) fn deliver(&self, tick: &Tick) -> Result<(), ConsumerError> {
        self.inner.sink.deliver(tick)
    }

    pub(crate) fn record_success(&self) {
        self.inner.failures.store(0, Ordering::Release);
    }

    /// Returns the new consecutive failure count.
    pub(crate) fn record_failure(&self) -> u32 {
        self.inner.failures.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }
}

impl fmt::Debug for ConsumerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerHandle")
            .field("id", &self.inner.id)
            .field("live", &self.is_live())
            .field("failures", &self.failures())
            .finish()
    }
}

impl PartialEq for ConsumerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ConsumerHandle {}
