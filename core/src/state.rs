use std::fmt;

use tokio::{sync::watch, time::Instant};

use crate::error::ProducerFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueryStatus {
    #[default]
    Pending,
    Success,
    Error,
}

impl QueryStatus {
    pub fn is_settled(self) -> bool {
        !matches!(self, QueryStatus::Pending)
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QueryStatus::Pending => "pending",
            QueryStatus::Success => "success",
            QueryStatus::Error => "error",
        })
    }
}

/// Handle to the producer invocation currently running for a key.
///
/// Compared by fetch id only.
#[derive(Debug, Clone)]
pub struct InFlight {
    id: u64,
    started_at: Instant,
    settled: watch::Receiver<bool>,
}

impl InFlight {
    pub(crate) fn start(id: u64) -> (Self, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let handle = Self {
            id,
            started_at: Instant::now(),
            settled: rx,
        };
        (handle, tx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Resolves once the invocation has written its outcome to the store.
    ///
    /// A fetch task torn down before finishing (e.g. by runtime shutdown)
    /// settles the key as `Error` on its way out, so this resolves then too.
    pub async fn wait(&self) {
        let mut rx = self.settled.clone();
        let _ = rx.wait_for(|done| *done).await;
    }
}

impl PartialEq for InFlight {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// Snapshot of one cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<T> {
    status: QueryStatus,
    data: Option<T>,
    error: Option<ProducerFailure>,
    in_flight: Option<InFlight>,
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self {
            status: QueryStatus::Pending,
            data: None,
            error: None,
            in_flight: None,
        }
    }
}

impl<T> QueryState<T> {
    pub fn status(&self) -> QueryStatus {
        self.status
    }

    /// Only meaningful when [`status`](Self::status) is `Success`.
    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn error(&self) -> Option<&ProducerFailure> {
        self.error.as_ref()
    }

    pub fn in_flight(&self) -> Option<&InFlight> {
        self.in_flight.as_ref()
    }

    pub fn is_fetching(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn is_settled(&self) -> bool {
        self.status.is_settled()
    }

    /// The terminal outcome, or `None` while pending.
    pub fn outcome(&self) -> Option<Result<T, ProducerFailure>>
    where
        T: Clone,
    {
        match self.status {
            QueryStatus::Pending => None,
            QueryStatus::Success => self.data.clone().map(Ok),
            QueryStatus::Error => self.error.clone().map(Err),
        }
    }
}

/// Partial [`QueryState`]; fields left unset keep their current value on write.
pub struct QueryPatch<T> {
    status: Option<QueryStatus>,
    data: Option<T>,
    error: Option<ProducerFailure>,
    in_flight: Option<Option<InFlight>>,
}

impl<T> Default for QueryPatch<T> {
    fn default() -> Self {
        Self {
            status: None,
            data: None,
            error: None,
            in_flight: None,
        }
    }
}

impl<T> QueryPatch<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: QueryStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn data(mut self, data: T) -> Self {
        self.data = Some(data);
        self
    }

    pub fn error(mut self, error: ProducerFailure) -> Self {
        self.error = Some(error);
        self
    }

    pub fn in_flight(mut self, handle: InFlight) -> Self {
        self.in_flight = Some(Some(handle));
        self
    }

    pub fn clear_in_flight(mut self) -> Self {
        self.in_flight = Some(None);
        self
    }

    /// `{status: success, data, in_flight: cleared}`
    pub fn success(data: T) -> Self {
        Self::new()
            .status(QueryStatus::Success)
            .data(data)
            .clear_in_flight()
    }

    /// `{status: error, error, in_flight: cleared}`
    pub fn failure(error: ProducerFailure) -> Self {
        Self::new()
            .status(QueryStatus::Error)
            .error(error)
            .clear_in_flight()
    }

    pub(crate) fn apply(self, state: &mut QueryState<T>) {
        if let Some(status) = self.status {
            state.status = status;
        }
        if let Some(data) = self.data {
            state.data = Some(data);
        }
        if let Some(error) = self.error {
            state.error = Some(error);
        }
        if let Some(in_flight) = self.in_flight {
            state.in_flight = in_flight;
        }
    }
}

impl<T> fmt::Debug for QueryPatch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryPatch")
            .field("status", &self.status)
            .field("data", &self.data.as_ref().map(|_| ".."))
            .field("error", &self.error)
            .field("in_flight", &self.in_flight.as_ref().map(|h| h.as_ref().map(InFlight::id)))
            .finish()
    }
}
