use std::{fmt, future::Future, pin::Pin, sync::Arc};

use tokio::sync::Notify;

use crate::{
    client::QueryClient,
    error::ProducerFailure,
    key::QueryKey,
    registry::Subscription,
    state::QueryState,
};

pub type BoxFut<'a, O> = Pin<Box<dyn Future<Output = O> + Send + 'a>>;

type Producer<T> = Arc<dyn Fn() -> BoxFut<'static, Result<T, ProducerFailure>> + Send + Sync>;

/// What to fetch, and how.
pub struct QueryOptions<T> {
    key: QueryKey,
    producer: Producer<T>,
}

impl<T> QueryOptions<T>
where
    T: Send + 'static,
{
    pub fn new<K, F, Fut, E>(key: K, producer: F) -> Self
    where
        K: Into<QueryKey>,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        Self {
            key: key.into(),
            producer: Arc::new(move || -> BoxFut<'static, Result<T, ProducerFailure>> {
                let fut = producer();
                Box::pin(async move { fut.await.map_err(ProducerFailure::new) })
            }),
        }
    }
}

impl<T> QueryOptions<T> {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }
}

impl<T> Clone for QueryOptions<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            producer: self.producer.clone(),
        }
    }
}

impl<T> fmt::Debug for QueryOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// One use-site's view of a single key.
///
/// Holds no state of its own; everything lives in the client's store.
pub struct QueryObserver<T> {
    client: QueryClient<T>,
    options: QueryOptions<T>,
}

impl<T> QueryObserver<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(client: QueryClient<T>, options: QueryOptions<T>) -> Self {
        Self { client, options }
    }

    pub fn key(&self) -> &QueryKey {
        &self.options.key
    }

    /// Calls `notify` whenever this observer's key changes, then starts (or
    /// joins) the fetch for it.
    ///
    /// Mutations of other keys are filtered out. Dropping the returned
    /// [`Subscription`] stops notifications but leaves an outstanding fetch
    /// running.
    pub fn subscribe<F>(&self, notify: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let own = self.options.key.canonical().clone();
        let subscription = self.client.subscribe(move |key| {
            if *key.canonical() == own {
                notify();
            }
        });

        let producer = self.options.producer.clone();
        self.client
            .ensure_fetched(&self.options.key, move || producer());

        subscription
    }

    pub fn get_snapshot(&self) -> QueryState<T> {
        self.client.read(&self.options.key)
    }

    /// Waits until the key is `Success` or `Error`, subscribing (and so
    /// fetching) for as long as it takes.
    pub async fn settled(&self) -> QueryState<T> {
        let changed = Arc::new(Notify::new());
        let _subscription = {
            let changed = changed.clone();
            self.subscribe(move || changed.notify_one())
        };

        loop {
            let snapshot = self.get_snapshot();
            if snapshot.is_settled() {
                return snapshot;
            }
            changed.notified().await;
        }
    }
}

impl<T> Clone for QueryObserver<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            options: self.options.clone(),
        }
    }
}

impl<T> fmt::Debug for QueryObserver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryObserver")
            .field("key", &self.options.key)
            .finish()
    }
}
