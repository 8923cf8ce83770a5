#![warn(clippy::complexity)]
#![warn(clippy::correctness)]
#![warn(clippy::perf)]
#![warn(clippy::style)]
#![warn(clippy::suspicious)]
#![warn(clippy::print_stdout)]
#![warn(clippy::print_stderr)]

//! Deduplicating async query cache.
//!
//! A [`QueryClient`] owns a [`QueryStore`] mapping [`QueryKey`]s to
//! [`QueryState`]s. [`QueryClient::ensure_fetched`] runs a producer at most
//! once per key, and every state change is broadcast to the store's
//! listeners. [`QueryObserver`] narrows that down to a single key.
//!
//! ```no_run
//! use miniquery_core::{QueryClient, QueryOptions, QueryStatus};
//!
//! # async fn demo() {
//! let client = QueryClient::<usize>::new();
//! let observer = client.observer(QueryOptions::new("mediaDevices", || async {
//!     Ok::<_, std::io::Error>(3)
//! }));
//!
//! let _subscription = observer.subscribe(|| { /* re-render */ });
//! let state = observer.settled().await;
//! assert_eq!(state.status(), QueryStatus::Success);
//! # }
//! ```

pub mod client;
pub mod error;
pub mod key;
pub mod observer;
pub mod registry;
pub mod state;
pub mod store;

#[cfg(test)]
mod client_test;
#[cfg(test)]
mod registry_test;

pub use client::QueryClient;
pub use error::{KeyError, ProducerFailure};
pub use key::{canonicalize, CanonicalKey, QueryKey};
pub use observer::{BoxFut, QueryObserver, QueryOptions};
pub use registry::{Subscription, SubscriptionRegistry};
pub use state::{InFlight, QueryPatch, QueryState, QueryStatus};
pub use store::QueryStore;
