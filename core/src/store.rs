use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use dashmap::{mapref::entry::Entry, DashMap};
use tokio::sync::watch;
use tracing::debug;

use crate::{
    key::{CanonicalKey, QueryKey},
    registry::{Subscription, SubscriptionRegistry},
    state::{InFlight, QueryPatch, QueryState, QueryStatus},
};

/// Canonical key -> [`QueryState`].
///
/// Entries are created lazily and live as long as the store. Every mutation,
/// including the implicit initialization done by [`read_or_init`], is
/// broadcast through the store's [`SubscriptionRegistry`] after the entry lock
/// is released.
///
/// [`read_or_init`]: QueryStore::read_or_init
pub struct QueryStore<T> {
    entries: DashMap<CanonicalKey, QueryState<T>>,
    registry: SubscriptionRegistry,
    fetch_ids: AtomicU64,
}

/// What [`QueryStore::begin_fetch`] found under the entry lock.
pub(crate) enum BeginFetch {
    /// The caller owns the new invocation and must settle it.
    Started(InFlight, watch::Sender<bool>),
    Joined(InFlight),
    Settled(QueryStatus),
}

impl<T> QueryStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            registry: SubscriptionRegistry::new(),
            fetch_ids: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&QueryKey) + Send + Sync + 'static,
    {
        self.registry.subscribe(listener)
    }

    /// Returns the state for `key`, creating a pending entry first if there is
    /// none.
    ///
    /// Creating the entry counts as a mutation and is broadcast, so the first
    /// read of an unseen key notifies every listener once. Reading an existing
    /// key never broadcasts.
    pub fn read_or_init(&self, key: &QueryKey) -> QueryState<T> {
        let (state, created) = match self.entries.entry(key.canonical().clone()) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let state = QueryState::default();
                entry.insert(state.clone());
                (state, true)
            }
        };

        if created {
            debug!(%key, "Initialized query entry");
            self.registry.broadcast(key);
        }

        state
    }

    /// Same as [`read_or_init`](Self::read_or_init).
    pub fn read(&self, key: &QueryKey) -> QueryState<T> {
        self.read_or_init(key)
    }

    /// Looks `key` up without creating it.
    pub fn peek(&self, key: &QueryKey) -> Option<QueryState<T>> {
        self.entries.get(key.canonical()).map(|entry| entry.value().clone())
    }

    /// Merges `patch` into the entry for `key` (pending if it did not exist)
    /// and broadcasts `key`.
    pub fn write(&self, key: &QueryKey, patch: QueryPatch<T>) {
        {
            let mut entry = self.entries.entry(key.canonical().clone()).or_default();
            patch.apply(entry.value_mut());
        }

        self.registry.broadcast(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<CanonicalKey> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Checks for an outstanding or finished fetch and, if there is neither,
    /// marks a new one in flight. Check and mark happen under the same entry
    /// lock, so at most one caller per key gets [`BeginFetch::Started`].
    ///
    /// Broadcasts the initialization (if the entry was new) and the mark, in
    /// that order. Both are committed before either broadcast, so listeners
    /// never see a new entry without its in-flight mark.
    pub(crate) fn begin_fetch(&self, key: &QueryKey) -> BeginFetch {
        let mut created = false;

        let outcome = match self.entries.entry(key.canonical().clone()) {
            Entry::Occupied(mut entry) => self.try_mark(entry.get_mut()),
            Entry::Vacant(entry) => {
                created = true;
                let mut state = QueryState::default();
                let outcome = self.try_mark(&mut state);
                entry.insert(state);
                outcome
            }
        };

        if created {
            debug!(%key, "Initialized query entry");
            self.registry.broadcast(key);
        }
        if let BeginFetch::Started(..) = outcome {
            self.registry.broadcast(key);
        }

        outcome
    }

    fn try_mark(&self, state: &mut QueryState<T>) -> BeginFetch {
        if let Some(in_flight) = state.in_flight() {
            return BeginFetch::Joined(in_flight.clone());
        }
        if state.is_settled() {
            return BeginFetch::Settled(state.status());
        }

        let id = self.fetch_ids.fetch_add(1, Ordering::Relaxed);
        let (handle, tx) = InFlight::start(id);
        QueryPatch::new().in_flight(handle.clone()).apply(state);
        BeginFetch::Started(handle, tx)
    }
}

impl<T> Default for QueryStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for QueryStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryStore")
            .field("entries", &self.entries.len())
            .field("registry", &self.registry)
            .finish()
    }
}
