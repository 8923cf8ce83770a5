use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};

use parking_lot::Mutex;
use tracing::trace;

use crate::key::QueryKey;

type Listener = Arc<dyn Fn(&QueryKey) + Send + Sync + 'static>;

/// Global listeners, told about every store mutation.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    // Ids grow monotonically, so map order is registration order.
    listeners: Mutex<BTreeMap<u64, Listener>>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&QueryKey) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().insert(id, Arc::new(listener));
        trace!(id, "Listener subscribed");

        Subscription {
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Calls every listener with `key`, synchronously, in registration order.
    ///
    /// Iterates over the listener set as it was when the broadcast started, and
    /// no lock is held while a listener runs. Listeners may therefore subscribe,
    /// unsubscribe or read the store from inside the callback. Whether a
    /// listener added or removed mid-broadcast sees this broadcast is
    /// unspecified.
    pub fn broadcast(&self, key: &QueryKey) {
        let listeners: Vec<Listener> = self.inner.listeners.lock().values().cloned().collect();
        trace!(%key, listeners = listeners.len(), "Broadcasting");

        for listener in listeners {
            listener(key);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

/// Registered listener. Unsubscribes when dropped.
#[derive(Debug)]
#[must_use = "dropping a Subscription unsubscribes its listener"]
pub struct Subscription {
    id: u64,
    registry: Weak<RegistryInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Removes exactly this listener.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };

        // Released before the listener is dropped, its captures may
        // unsubscribe from this registry too.
        let removed = registry.listeners.lock().remove(&self.id);
        if removed.is_some() {
            trace!(id = self.id, "Listener unsubscribed");
        }
        drop(removed);
    }
}
