use thiserror::Error;

/// Failure raised by a producer invocation.
///
/// Stringified on capture so the cached state stays `Clone` and `Send`
/// regardless of the producer's own error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProducerFailure {
    message: String,
}

impl ProducerFailure {
    pub fn new<E: std::fmt::Display>(e: E) -> Self {
        Self {
            message: e.to_string(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A query key part could not be represented as JSON.
#[derive(Debug, Error)]
#[error("query key is not serializable: {0}")]
pub struct KeyError(#[from] serde_json::Error);
