//! Audit listing of recorded webhook events.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tollgate_core::{DispatchOutcome, EventRecord, Filter, Page, TollgateError};
use tracing::{debug, instrument};

use crate::{error::ApiError, server::AppState};

/// Default page size.
pub const DEFAULT_LIMIT: usize = 100;
/// Largest page a caller may request.
pub const MAX_LIMIT: usize = 1000;

/// Query string for `GET /events`.
#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    /// Only events from this sender.
    pub sender: Option<String>,
    /// Only events of this type.
    pub event_type: Option<String>,
    /// Only events in this dispatch state.
    pub outcome: Option<String>,
    /// Maximum number of events, capped at `MAX_LIMIT`.
    pub limit: Option<usize>,
    /// Matching events to skip before the page starts.
    pub offset: Option<usize>,
}

impl EventsQuery {
    fn filter(&self) -> Result<Filter, TollgateError> {
        let mut filter = Filter::new();
        if let Some(sender) = &self.sender {
            filter.insert("sender".into(), Value::String(sender.clone()));
        }
        if let Some(event_type) = &self.event_type {
            filter.insert("event_type".into(), Value::String(event_type.clone()));
        }
        if let Some(outcome) = &self.outcome {
            let outcome: DispatchOutcome =
                outcome.parse().map_err(|e| TollgateError::malformed(format!("{e}")))?;
            filter.insert("outcome".into(), Value::String(outcome.as_str().to_string()));
        }
        Ok(filter)
    }

    fn page(&self) -> Page {
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        Page::new(self.offset.unwrap_or(0), limit)
    }
}

/// Page of recorded events, oldest first.
#[derive(Debug, Serialize)]
pub struct EventsResponse {
    /// Number of events returned.
    pub count: usize,
    /// Offset of the first returned event.
    pub offset: usize,
    /// Offset to request the following page with, absent on a short page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_offset: Option<usize>,
    /// The events.
    pub events: Vec<EventRecord>,
}

/// `GET /events`.
///
/// # Errors
///
/// - 400: unknown `outcome` value
/// - 500: the event log is unavailable
#[instrument(name = "list_events", skip(state))]
pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, ApiError> {
    let filter = query.filter()?;
    let page = query.page();

    let events = state.ingestor.event_log().list(&filter, page).await?;
    debug!(count = events.len(), offset = page.offset, "listed recorded events");

    let next_offset = (events.len() == page.limit).then_some(page.offset + events.len());
    Ok(Json(EventsResponse { count: events.len(), offset: page.offset, next_offset, events }))
}
