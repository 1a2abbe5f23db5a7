//! HTTP error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tollgate_core::TollgateError;

/// Error response with code and message.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Always `false`.
    pub success: bool,
    /// Error details including code and message
    pub error: ErrorDetail,
}

/// Detailed error information.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Error code from the taxonomy (E1001-E3001, E9999)
    pub code: String,
    /// Human-readable error description
    pub message: String,
}

/// A `TollgateError` on its way to the client.
#[derive(Debug)]
pub struct ApiError(pub TollgateError);

impl ApiError {
    /// HTTP status for the wrapped error.
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            TollgateError::Authentication { .. } => StatusCode::UNAUTHORIZED,
            TollgateError::MalformedPayload { .. } => StatusCode::BAD_REQUEST,
            TollgateError::UnknownSender { .. } => StatusCode::NOT_FOUND,
            TollgateError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            TollgateError::Handler { .. }
            | TollgateError::Storage(_)
            | TollgateError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<TollgateError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self.0 {
            // Storage details stay in the logs.
            TollgateError::Storage(_) | TollgateError::Other(_) => {
                "internal error, retry later".to_string()
            },
            other => other.to_string(),
        };
        let body = ErrorResponse {
            success: false,
            error: ErrorDetail { code: self.0.code().to_string(), message },
        };

        (status, Json(body)).into_response()
    }
}
