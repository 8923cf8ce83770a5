use std::{
    any::Any,
    fmt,
    future::Future,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::{
    error::ProducerFailure,
    key::QueryKey,
    observer::{QueryObserver, QueryOptions},
    registry::Subscription,
    state::{InFlight, QueryPatch, QueryState},
    store::{BeginFetch, QueryStore},
};

/// Handle to one explicitly owned [`QueryStore`], plus the fetch logic on
/// top of it.
///
/// Cloning is cheap and every clone talks to the same store. The store goes
/// away with the last handle.
pub struct QueryClient<T> {
    store: Arc<QueryStore<T>>,
}

impl<T> Clone for QueryClient<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<T> QueryClient<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            store: Arc::new(QueryStore::new()),
        }
    }

    pub fn store(&self) -> &QueryStore<T> {
        &self.store
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&QueryKey) + Send + Sync + 'static,
    {
        self.store.subscribe(listener)
    }

    pub fn read(&self, key: &QueryKey) -> QueryState<T> {
        self.store.read_or_init(key)
    }

    pub fn observer(&self, options: QueryOptions<T>) -> QueryObserver<T> {
        QueryObserver::new(self.clone(), options)
    }

    /// Makes sure `producer` has run, or is running, for `key`.
    ///
    /// Does nothing if a fetch for `key` is already in flight or the key has
    /// already settled. Otherwise marks the key in flight, calls `producer` and
    /// drives the returned future on a spawned task, writing `Success` or
    /// `Error` when it completes. Producer errors and panics end up in the
    /// cached state and are never returned from here.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime.
    pub fn ensure_fetched<F, Fut, E>(&self, key: &QueryKey, producer: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let _ = self.begin(key, producer);
    }

    /// [`ensure_fetched`](Self::ensure_fetched), then waits for `key` to
    /// settle and returns the cached outcome.
    ///
    /// Never invokes `producer` when a fetch is already in flight or the key
    /// has settled.
    pub async fn fetch<F, Fut, E>(&self, key: &QueryKey, producer: F) -> Result<T, ProducerFailure>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        if let Some(in_flight) = self.begin(key, producer) {
            in_flight.wait().await;
        }

        self.read(key)
            .outcome()
            .unwrap_or_else(|| Err(ProducerFailure::new("in-flight fetch died before settling")))
    }

    /// Returns the invocation to wait on, or `None` if `key` already settled.
    fn begin<F, Fut, E>(&self, key: &QueryKey, producer: F) -> Option<InFlight>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let (in_flight, settled) = match self.store.begin_fetch(key) {
            BeginFetch::Settled(status) => {
                trace!(%key, %status, "Query already settled, not refetching");
                return None;
            }
            BeginFetch::Joined(in_flight) => {
                trace!(%key, fetch = in_flight.id(), "Joining in-flight fetch");
                return Some(in_flight);
            }
            BeginFetch::Started(in_flight, settled) => (in_flight, settled),
        };

        debug!(%key, fetch = in_flight.id(), "Starting fetch");

        let pending = PendingFetch {
            store: self.store.clone(),
            key: key.clone(),
            in_flight: in_flight.clone(),
            settled: Some(settled),
        };

        // The key is already marked, so the producer may take as long as it
        // likes (even block) before handing back its future.
        let fut = match panic::catch_unwind(AssertUnwindSafe(producer)) {
            Ok(fut) => fut,
            Err(payload) => {
                pending.settle(Err(ProducerFailure::new(panic_message(payload.as_ref()))));
                return Some(in_flight);
            }
        };

        tokio::spawn(async move {
            let res = match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(res) => res.map_err(ProducerFailure::new),
                Err(payload) => Err(ProducerFailure::new(panic_message(payload.as_ref()))),
            };
            pending.settle(res);
        });

        Some(in_flight)
    }
}

/// Owns the obligation to settle one in-flight mark.
///
/// Dropped unsettled (the fetch task was torn down, e.g. by runtime
/// shutdown) it records an `Error`, so the key never stays in flight.
struct PendingFetch<T>
where
    T: Clone + Send + Sync + 'static,
{
    store: Arc<QueryStore<T>>,
    key: QueryKey,
    in_flight: InFlight,
    settled: Option<watch::Sender<bool>>,
}

impl<T> PendingFetch<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn settle(mut self, res: Result<T, ProducerFailure>) {
        self.write(res);
    }

    fn write(&mut self, res: Result<T, ProducerFailure>) {
        let Some(settled) = self.settled.take() else {
            return;
        };

        let key = &self.key;
        let fetch = self.in_flight.id();
        let elapsed = self.in_flight.started_at().elapsed();
        let patch = match res {
            Ok(data) => {
                debug!(%key, fetch, ?elapsed, "Fetch succeeded");
                QueryPatch::success(data)
            }
            Err(failure) => {
                warn!(%key, fetch, ?elapsed, error = %failure, "Fetch failed");
                QueryPatch::failure(failure)
            }
        };

        self.store.write(key, patch);
        let _ = settled.send(true);
    }
}

impl<T> Drop for PendingFetch<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.write(Err(ProducerFailure::new(
            "fetch task dropped before settling",
        )));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let msg = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic");
    format!("producer panicked: {msg}")
}

impl<T> Default for QueryClient<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for QueryClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryClient")
            .field("store", &self.store)
            .finish()
    }
}
