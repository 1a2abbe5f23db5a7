//! Signed webhook receiver.
//!
//! Verifies the sender's HMAC over the raw body before anything else looks
//! at the payload, then hands the parsed event to the ingestor.

use axum::{
    extract::{rejection::BytesRejection, Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use tollgate_core::{CoreError, DispatchStatus, TollgateError};
use tracing::{error, info, instrument, warn, Span};

use crate::{error::ApiError, server::AppState};

/// Response for an accepted event.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Always `true`.
    pub success: bool,
    /// `processed` or `duplicate`.
    pub status: DispatchStatus,
    /// Event id as recorded, possibly derived from the conversation id.
    pub event_id: String,
}

/// `POST /webhooks/{sender}`.
///
/// # Errors
///
/// - 404: no sender configured under that name
/// - 413: body exceeds the configured limit
/// - 401: signature missing or invalid
/// - 400: body is not a JSON object, or lacks an event id or type
/// - 500: the event log is unavailable; the sender should redeliver
#[instrument(
    name = "receive_webhook",
    skip(state, headers, body),
    fields(sender = %sender_name, event_id = tracing::field::Empty)
)]
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(sender_name): Path<String>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<WebhookResponse>, ApiError> {
    let sender = state
        .senders
        .get(&sender_name)
        .ok_or_else(|| TollgateError::UnknownSender { name: sender_name.clone() })?;

    let body = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            warn!(limit = state.max_body_bytes, "webhook body over limit");
            TollgateError::PayloadTooLarge { limit_bytes: state.max_body_bytes }
        } else {
            TollgateError::malformed(rejection.body_text())
        }
    })?;

    let verification = sender.verify_request(&headers, &body);
    if !verification.is_valid {
        let reason = verification.error_message.unwrap_or_else(|| "invalid signature".into());
        warn!(reason = %reason, body_len = body.len(), "webhook signature rejected");
        return Err(TollgateError::authentication(reason).into());
    }

    let event = state.ingestor.parse_event(sender.name(), body).map_err(|e| match e {
        CoreError::InvalidInput(reason) => TollgateError::malformed(reason),
        other => TollgateError::Storage(other),
    })?;
    Span::current().record("event_id", event.event_id.as_str());
    let event_id = event.event_id.clone();

    let result = state.ingestor.ingest(event).await.map_err(|e| {
        error!(error = %e, "failed to record webhook event");
        e
    })?;

    match result.status {
        DispatchStatus::Rejected => {
            let reason = result.reason.unwrap_or_else(|| "malformed event".into());
            Err(TollgateError::malformed(reason).into())
        },
        status => {
            info!(status = %status, "webhook accepted");
            Ok(Json(WebhookResponse { success: true, status, event_id }))
        },
    }
}
