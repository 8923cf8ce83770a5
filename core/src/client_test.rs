use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;

use crate::{
    client::QueryClient,
    error::ProducerFailure,
    key::QueryKey,
    state::QueryStatus,
};

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

/// Producer that counts its invocations, yields once and returns `value`.
fn counted(
    calls: &Arc<AtomicUsize>,
    value: i32,
) -> impl FnOnce() -> futures::future::BoxFuture<'static, Result<i32, ProducerFailure>> {
    let calls = calls.clone();
    move || -> futures::future::BoxFuture<'static, Result<i32, ProducerFailure>> {
        calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            tokio::task::yield_now().await;
            Ok(value)
        })
    }
}

#[tokio::test]
async fn success_is_cached() {
    let client = QueryClient::<i32>::new();
    let key = QueryKey::from("x");

    let value = client
        .fetch(&key, || async {
            tokio::task::yield_now().await;
            Ok::<_, ProducerFailure>(42)
        })
        .await;
    assert_eq!(value, Ok(42));

    let state = client.read(&key);
    assert_eq!(state.status(), QueryStatus::Success);
    assert_eq!(state.data(), Some(&42));
    assert!(!state.is_fetching());
}

#[tokio::test]
async fn failure_is_recorded_not_returned() {
    let client = QueryClient::<i32>::new();
    let key = QueryKey::from("y");

    client.ensure_fetched(&key, || async { Err::<i32, _>("boom") });
    let state = client.read(&key);
    assert_eq!(state.status(), QueryStatus::Pending);
    let in_flight = state.in_flight().expect("fetch is outstanding").clone();

    in_flight.wait().await;

    let state = client.read(&key);
    assert_eq!(state.status(), QueryStatus::Error);
    assert_eq!(state.error().map(|e| e.message()), Some("boom"));
    assert_eq!(state.data(), None);
    assert!(!state.is_fetching());
}

#[tokio::test]
async fn overlapping_calls_invoke_producer_once() {
    let client = QueryClient::<i32>::new();
    let key = QueryKey::from("x");
    let calls = counter();

    client.ensure_fetched(&key, counted(&calls, 42));
    client.ensure_fetched(&key, counted(&calls, 1));
    client.ensure_fetched(&key, counted(&calls, 2));

    let value = client.fetch(&key, counted(&calls, 3)).await;

    assert_eq!(value, Ok(42));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn settled_keys_are_never_refetched() {
    let client = QueryClient::<i32>::new();
    let ok = QueryKey::from("x");
    let failed = QueryKey::from("y");
    let calls = counter();

    assert_eq!(client.fetch(&ok, counted(&calls, 42)).await, Ok(42));
    assert_eq!(
        client
            .fetch(&failed, || async { Err::<i32, _>("boom") })
            .await,
        Err(ProducerFailure::new("boom"))
    );

    client.ensure_fetched(&ok, counted(&calls, 0));
    client.ensure_fetched(&failed, counted(&calls, 0));
    tokio::task::yield_now().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.read(&ok).data(), Some(&42));
    assert_eq!(client.read(&failed).status(), QueryStatus::Error);
}

#[tokio::test]
async fn status_moves_forward_only() {
    let client = QueryClient::<i32>::new();
    let key = QueryKey::from("x");
    let seen = Arc::new(Mutex::new(Vec::new()));

    let subscription = {
        let client = client.clone();
        let seen = seen.clone();
        client.clone().subscribe(move |key| {
            let state = client.store().peek(key).expect("broadcast after write");
            seen.lock().push((state.status(), state.is_fetching()));
        })
    };

    assert_eq!(client.fetch(&key, counted(&counter(), 42)).await, Ok(42));
    subscription.unsubscribe();

    // Initialization and the in-flight mark share one critical section, so
    // both broadcasts already observe the mark.
    assert_eq!(
        *seen.lock(),
        vec![
            (QueryStatus::Pending, true),
            (QueryStatus::Pending, true),
            (QueryStatus::Success, false),
        ]
    );
}

#[tokio::test]
async fn panicking_producer_becomes_error() {
    let client = QueryClient::<i32>::new();

    let in_future = client
        .fetch(&QueryKey::from("a"), || async {
            tokio::task::yield_now().await;
            if true {
                panic!("kaboom");
            }
            Ok::<i32, ProducerFailure>(1)
        })
        .await;
    assert_eq!(
        in_future,
        Err(ProducerFailure::new("producer panicked: kaboom"))
    );

    let in_call = client
        .fetch(&QueryKey::from("b"), || -> futures::future::Ready<Result<i32, ProducerFailure>> {
            panic!("eager kaboom")
        })
        .await;
    assert_eq!(
        in_call,
        Err(ProducerFailure::new("producer panicked: eager kaboom"))
    );

    assert!(!client.read(&QueryKey::from("b")).is_fetching());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deduplicates_across_threads() {
    let client = QueryClient::<i32>::new();
    let calls = counter();

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let client = client.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                let key = QueryKey::from("x");
                client
                    .fetch(&key, move || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        async {
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok::<_, ProducerFailure>(42)
                        }
                    })
                    .await
            })
        })
        .collect();

    for task in futures::future::join_all(tasks).await {
        assert_eq!(task.expect("task panicked"), Ok(42));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn fetch_torn_down_with_its_runtime_becomes_error() {
    let client = QueryClient::<i32>::new();
    let key = QueryKey::from("x");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    let in_flight = runtime.block_on(async {
        client.ensure_fetched(&key, || futures::future::pending::<Result<i32, ProducerFailure>>());
        client.read(&key).in_flight().cloned().expect("fetch is outstanding")
    });
    drop(runtime);

    let state = client.read(&key);
    assert_eq!(state.status(), QueryStatus::Error);
    assert!(!state.is_fetching());
    assert_eq!(
        state.error().map(ProducerFailure::message),
        Some("fetch task dropped before settling")
    );

    // Settled, so waiting returns at once and nothing is refetched.
    let calls = counter();
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime")
        .block_on(async {
            in_flight.wait().await;
            client.ensure_fetched(&key, counted(&calls, 42));
        });
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
