use std::sync::{Arc, Mutex, Weak};

use tracing::debug;

/// Named same-tab signals. Payload-free by design: any payload a future
/// signal might carry is advisory only, never authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// The favorites sequence changed in this context.
    FavoritesChanged,
    /// One of the stats source sequences changed in this context.
    StatsChanged,
}

impl Signal {
    /// Wire name of the signal, matching the event names used by the
    /// web front end.
    pub fn name(&self) -> &'static str {
        match self {
            Signal::FavoritesChanged => "favoritesChanged",
            Signal::StatsChanged => "statsChanged",
        }
    }
}

/// A durable store change observed from another context.
#[derive(Debug, Clone)]
pub struct StorageEvent {
    pub key: String,
    pub new_value: Option<String>,
}

type Handler = Arc<dyn Fn() + Send + Sync>;
type StorageHandler = Arc<dyn Fn(&StorageEvent) + Send + Sync>;

struct BusInner {
    next_id: u64,
    named: Vec<(u64, Signal, Handler)>,
    storage: Vec<(u64, StorageHandler)>,
}

/// Process-wide publish/subscribe bus.
///
/// Handlers run synchronously inside `emit`, in subscription order.
/// There is no queueing and no delivery guarantee beyond "all handlers
/// subscribed at emit time are invoked within the same call". Nothing is
/// guaranteed about ordering *across* the two channels.
///
/// Clone is cheap; clones share the same subscriber lists.
#[derive(Clone)]
pub struct SignalBus {
    inner: Arc<Mutex<BusInner>>,
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                next_id: 0,
                named: Vec::new(),
                storage: Vec::new(),
            })),
        }
    }

    /// Subscribe to a same-tab signal. The handler runs until the
    /// returned `Subscription` is dropped; a consumer that forgets the
    /// handle keeps re-running its handler after the consumer is gone.
    pub fn subscribe<F>(&self, signal: Signal, handler: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        let id = inner.next_id;
        inner.next_id += 1;
        inner.named.push((id, signal, Arc::new(handler)));
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Subscribe to cross-tab storage change events. Handlers receive
    /// every event and must filter on the key they care about.
    pub fn subscribe_storage<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&StorageEvent) + Send + Sync + 'static,
    {
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        let id = inner.next_id;
        inner.next_id += 1;
        inner.storage.push((id, Arc::new(handler)));
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Emit a same-tab signal, invoking matching handlers synchronously
    /// in subscription order.
    pub fn emit(&self, signal: Signal) {
        // Snapshot the handlers, then run them outside the lock so a
        // handler may subscribe or emit without deadlocking.
        let handlers: Vec<Handler> = {
            let inner = match self.inner.lock() {
                Ok(inner) => inner,
                Err(poisoned) => poisoned.into_inner(),
            };
            inner
                .named
                .iter()
                .filter(|(_, s, _)| *s == signal)
                .map(|(_, _, h)| Arc::clone(h))
                .collect()
        };
        debug!(signal = signal.name(), listeners = handlers.len(), "emit");
        for handler in handlers {
            handler();
        }
    }

    /// Deliver a cross-tab storage change to every storage listener.
    pub fn emit_storage(&self, event: StorageEvent) {
        let handlers: Vec<StorageHandler> = {
            let inner = match self.inner.lock() {
                Ok(inner) => inner,
                Err(poisoned) => poisoned.into_inner(),
            };
            inner.storage.iter().map(|(_, h)| Arc::clone(h)).collect()
        };
        debug!(key = %event.key, listeners = handlers.len(), "storage event");
        for handler in handlers {
            handler(&event);
        }
    }
}

/// Registration handle for a bus subscription.
///
/// Dropping the handle deregisters the handler; hold it for as long as
/// the owning consumer is mounted.
pub struct Subscription {
    id: u64,
    bus: Weak<Mutex<BusInner>>,
}

impl Subscription {
    /// Explicitly deregister. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            let mut inner = match bus.lock() {
                Ok(inner) => inner,
                Err(poisoned) => poisoned.into_inner(),
            };
            inner.named.retain(|(id, _, _)| *id != self.id);
            inner.storage.retain(|(id, _)| *id != self.id);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
