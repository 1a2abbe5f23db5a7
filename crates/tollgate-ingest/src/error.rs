//! Error types for ingestion, handler dispatch, and notifications.

use std::time::Duration;

use thiserror::Error;
use tollgate_core::{CoreError, TollgateError};

/// Result type alias for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestError>;

/// Failures of the ingestion pipeline itself.
///
/// Handler failures are not here: they are recorded on the event and
/// reported to the observer, never returned to the caller.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The event log could not be read or written.
    #[error("event log unavailable: {0}")]
    Storage(#[from] CoreError),

    /// Dispatch workers did not finish within the shutdown timeout.
    #[error("dispatch pool shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// The timeout that was exceeded
        timeout: Duration,
    },

    /// A dispatch worker task panicked.
    #[error("dispatch worker {worker_id} panicked: {error}")]
    WorkerPanic {
        /// Index of the worker
        worker_id: usize,
        /// Join error description
        error: String,
    },
}

impl IngestError {
    /// Whether the sender should redeliver.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl From<IngestError> for TollgateError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Storage(core) => Self::Storage(core),
            other => Self::Other(anyhow::Error::new(other)),
        }
    }
}

/// Failure of a single event handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// A datastore write failed.
    #[error("datastore error: {0}")]
    Datastore(#[from] CoreError),

    /// An outbound notification failed.
    #[error("notification failed: {0}")]
    Notify(#[from] NotifyError),

    /// The payload lacks a field the handler needs.
    #[error("payload missing required field '{0}'")]
    MissingField(String),

    /// The handler did not finish in time.
    #[error("handler timed out after {0:?}")]
    Timeout(Duration),

    /// Anything else, including a panicking handler.
    #[error("{0}")]
    Other(String),
}

impl HandlerError {
    /// Creates a missing field error.
    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingField(field.into())
    }
}

/// Failure to deliver an outbound notification.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Destination is not a usable phone number.
    #[error("invalid destination '{0}'")]
    InvalidDestination(String),

    /// The gateway could not be reached.
    #[error("gateway request failed: {0}")]
    Transport(String),

    /// The gateway answered with a non-success status.
    #[error("gateway rejected message: HTTP {status}: {body}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body, truncated
        body: String,
    },

    /// The notifier could not be constructed.
    #[error("notifier misconfigured: {0}")]
    Configuration(String),
}
