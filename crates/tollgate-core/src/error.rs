//! Error types and result handling for ingestion operations.
//!
//! `CoreError` covers datastore failures. `TollgateError` is the taxonomy
//! surfaced at the HTTP boundary, with stable codes so senders and operators
//! can tell authentication, payload, handler, and storage failures apart.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for datastore and model operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// The datastore is unreachable.
    #[error("Datastore unavailable: {0}")]
    Unavailable(String),

    /// Entity not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Constraint violation.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A record could not be converted to or from its stored form.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("requested record not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::ConstraintViolation(format!("unique constraint violation: {db_err}"))
            },
            sqlx::Error::Database(db_err) if db_err.is_check_violation() => {
                Self::ConstraintViolation(format!("check constraint violation: {db_err}"))
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Unavailable(err.to_string())
            },
            _ => Self::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Tollgate error taxonomy with codes used in HTTP error bodies.
#[derive(Debug, Error)]
pub enum TollgateError {
    /// Signature missing or invalid (E1001).
    #[error("[E1001] Authentication failed: {reason}")]
    Authentication {
        /// Why the signature was rejected
        reason: String,
    },

    /// Required field absent or body not a JSON object (E1002).
    #[error("[E1002] Malformed payload: {reason}")]
    MalformedPayload {
        /// What was wrong with the payload
        reason: String,
    },

    /// No trusted sender is configured under this name (E1003).
    #[error("[E1003] Unknown sender: {name}")]
    UnknownSender {
        /// The sender name from the request path
        name: String,
    },

    /// Body exceeds the configured limit (E1004).
    #[error("[E1004] Payload too large: limit is {limit_bytes} bytes")]
    PayloadTooLarge {
        /// Configured body limit
        limit_bytes: usize,
    },

    /// A registered handler failed (E2001).
    #[error("[E2001] Handler failed for {event_type} event {event_id}: {message}")]
    Handler {
        /// Event identifier
        event_id: String,
        /// Event type tag
        event_type: String,
        /// Handler failure description
        message: String,
    },

    /// The durable event log is unreachable (E3001).
    #[error("[E3001] Storage error: {0}")]
    Storage(#[from] CoreError),

    /// Generic error for wrapping other errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TollgateError {
    /// Returns the error code (E1001-E3001, E9999 for unclassified).
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Authentication { .. } => "E1001",
            Self::MalformedPayload { .. } => "E1002",
            Self::UnknownSender { .. } => "E1003",
            Self::PayloadTooLarge { .. } => "E1004",
            Self::Handler { .. } => "E2001",
            Self::Storage(_) => "E3001",
            Self::Other(_) => "E9999",
        }
    }

    /// Returns whether the sender should redeliver after this error.
    ///
    /// Only storage failures qualify: the event was never durably recorded.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Creates an authentication error.
    pub fn authentication(reason: impl Into<String>) -> Self {
        Self::Authentication { reason: reason.into() }
    }

    /// Creates a malformed payload error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedPayload { reason: reason.into() }
    }
}
