//! External event sources
//!
//! [`EventWaitNode`](crate::control::EventWaitNode) rendezvous with events
//! published from outside the pipeline through an [`EventSource`]. The
//! in-memory [`EventBus`] is enough for a single process; other transports
//! only need to implement subscribe and unsubscribe.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Handle identifying one registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Callback invoked for each published event
pub type Listener<E> = Arc<dyn Fn(E) + Send + Sync>;

/// A publish/subscribe capability
///
/// Every subscribed listener receives at least one callback per published
/// event until it is unsubscribed.
pub trait EventSource<E>: Send + Sync {
    /// Register a listener
    fn subscribe(&self, listener: Listener<E>) -> SubscriptionId;

    /// Remove a listener; unknown ids are ignored
    fn unsubscribe(&self, id: SubscriptionId);
}

/// Unsubscribes when dropped
///
/// Holding one of these for the lifetime of a wait guarantees the listener
/// is removed exactly once on every exit path, including cancellation.
pub struct Subscription<E: 'static> {
    source: Arc<dyn EventSource<E>>,
    id: SubscriptionId,
}

impl<E: 'static> Subscription<E> {
    /// Subscribe `listener` to `source`
    pub fn new(source: Arc<dyn EventSource<E>>, listener: Listener<E>) -> Self {
        let id = source.subscribe(listener);
        Self { source, id }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl<E: 'static> Drop for Subscription<E> {
    fn drop(&mut self) {
        self.source.unsubscribe(self.id);
    }
}

/// In-process event source delivering each event to every listener
pub struct EventBus<E> {
    listeners: Mutex<Vec<(SubscriptionId, Listener<E>)>>,
    next_id: AtomicU64,
}

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Deliver `event` to every current listener; returns how many received it
    pub fn publish(&self, event: E) -> usize {
        // Listeners run outside the lock so they may unsubscribe themselves.
        let listeners: Vec<Listener<E>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in &listeners {
            listener(event.clone());
        }
        listeners.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventSource<E> for EventBus<E>
where
    E: Clone + Send + 'static,
{
    fn subscribe(&self, listener: Listener<E>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, listener));
        log::trace!("Event listener {:?} subscribed", id);
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.lock().retain(|(existing, _)| *existing != id);
        log::trace!("Event listener {:?} unsubscribed", id);
    }
}
