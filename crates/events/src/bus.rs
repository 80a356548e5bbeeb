// crates/events/src/bus.rs
//! Generic typed event bus with pluggable sinks.
//!
//! A sink is anything implementing [`EventSink`]: either a direct callback
//! ([`CallbackSink`]) or a bounded queue ([`QueueSink`]) drained by an
//! async consumer. The bus never blocks on a subscriber — full queues drop
//! the event, closed queues are pruned on the next publish.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

/// Identifies one subscription for later removal.
pub type SinkId = u64;

/// Outcome of offering an event to a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The sink accepted the event.
    Delivered,
    /// The sink was full; the event was discarded for this sink.
    Dropped,
    /// The sink's consumer is gone; the subscription should be removed.
    Closed,
}

/// A destination for published events.
pub trait EventSink<E>: Send + Sync {
    fn accept(&self, event: &E) -> Delivery;
}

/// Sink that invokes a callback synchronously on publish.
pub struct CallbackSink<E> {
    callback: Box<dyn Fn(&E) + Send + Sync>,
}

impl<E> CallbackSink<E> {
    pub fn new(callback: impl Fn(&E) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }
}

impl<E> EventSink<E> for CallbackSink<E> {
    fn accept(&self, event: &E) -> Delivery {
        (self.callback)(event);
        Delivery::Delivered
    }
}

/// Sink backed by a bounded mpsc channel.
///
/// `accept` uses `try_send`: a full channel yields [`Delivery::Dropped`],
/// a dropped receiver yields [`Delivery::Closed`].
pub struct QueueSink<E> {
    tx: mpsc::Sender<E>,
}

impl<E: Clone + Send + 'static> QueueSink<E> {
    /// Create a sink together with the receiver its consumer will drain.
    pub fn bounded(capacity: usize) -> (Arc<Self>, mpsc::Receiver<E>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(Self { tx }), rx)
    }
}

impl<E: Clone + Send + 'static> EventSink<E> for QueueSink<E> {
    fn accept(&self, event: &E) -> Delivery {
        match self.tx.try_send(event.clone()) {
            Ok(()) => Delivery::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Dropped,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

/// Register of sinks for one event type.
pub struct EventBus<E> {
    sinks: Mutex<Vec<(SinkId, Arc<dyn EventSink<E>>)>>,
    next_id: AtomicU64,
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self {
            sinks: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a sink; the returned id can be passed to [`unsubscribe`].
    ///
    /// [`unsubscribe`]: EventBus::unsubscribe
    pub fn subscribe(&self, sink: Arc<dyn EventSink<E>>) -> SinkId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.sinks
            .lock()
            .expect("event bus lock poisoned")
            .push((id, sink));
        id
    }

    /// Remove a subscription. Safe to call twice; the second call is a no-op.
    pub fn unsubscribe(&self, id: SinkId) {
        self.sinks
            .lock()
            .expect("event bus lock poisoned")
            .retain(|(sink_id, _)| *sink_id != id);
    }

    /// Number of registered sinks.
    pub fn subscriber_count(&self) -> usize {
        self.sinks.lock().expect("event bus lock poisoned").len()
    }

    /// Offer `event` to every registered sink.
    ///
    /// Returns the number of sinks that accepted it. Sinks reporting
    /// [`Delivery::Closed`] are removed.
    pub fn publish(&self, event: &E) -> usize {
        let mut sinks = self.sinks.lock().expect("event bus lock poisoned");
        let mut delivered = 0;
        sinks.retain(|(id, sink)| match sink.accept(event) {
            Delivery::Delivered => {
                delivered += 1;
                true
            }
            Delivery::Dropped => {
                tracing::warn!(sink_id = id, "subscriber queue full, event dropped");
                true
            }
            Delivery::Closed => false,
        });
        delivered
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}
