//! Core domain models for inbound webhook events.
//!
//! Defines the received event, its idempotency key, the event-type tag used
//! for handler dispatch, the per-delivery dispatch result, and the durable
//! record written to the event log.

use std::{convert::Infallible, fmt, str::FromStr};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, Result};

/// Idempotency key of an inbound event.
///
/// Provider event ids are only unique per provider, so the key is scoped by
/// the trusted sender that delivered the event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKey {
    /// Configured name of the trusted sender.
    pub sender: String,
    /// Provider-assigned event identifier.
    pub event_id: String,
    /// Where `event_id` came from.
    #[serde(default)]
    pub id_source: IdSource,
}

impl EventKey {
    /// Creates a key for a provider-assigned event id.
    pub fn new(sender: impl Into<String>, event_id: impl Into<String>) -> Self {
        Self::with_source(sender, event_id, IdSource::Provider)
    }

    /// Creates a key whose id came from `id_source`.
    pub fn with_source(
        sender: impl Into<String>,
        event_id: impl Into<String>,
        id_source: IdSource,
    ) -> Self {
        Self { sender: sender.into(), event_id: event_id.into(), id_source }
    }

    /// Returns the flat key used as the datastore record key.
    ///
    /// Layout is `{sender byte length}:{sender}:{source tag}:{event_id}`. The
    /// length prefix keeps the sender boundary unambiguous whatever either
    /// part contains.
    pub fn storage_key(&self) -> String {
        format!("{}:{}:{}:{}", self.sender.len(), self.sender, self.id_source.tag(), self.event_id)
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.sender, self.event_id)
    }
}

/// Origin of an event id.
///
/// Derived ids live in their own namespace, so a provider id that happens
/// to read `conv_1:conversation_started` is not a redelivery of the event
/// derived from `conv_1`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdSource {
    /// Taken from the payload's `event_id` or `id` field.
    #[default]
    Provider,
    /// Derived from `conversation_id` and `event_type`.
    Conversation,
}

impl IdSource {
    fn tag(self) -> char {
        match self {
            Self::Provider => 'p',
            Self::Conversation => 'c',
        }
    }

    /// Returns true for provider-assigned ids.
    pub fn is_provider(&self) -> bool {
        *self == Self::Provider
    }
}

/// Event type tag carried in the payload's `event_type` field.
///
/// Known tags get their own variant; anything else is preserved in `Other`
/// so new upstream event types pass through without a code change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    /// A voice or chat conversation began.
    ConversationStarted,
    /// A conversation finished.
    ConversationEnded,
    /// The agent produced a response turn.
    AgentResponseGenerated,
    /// The agent completed a financial calculation for the caller.
    FinancialCalculationCompleted,
    /// The agent took an order.
    OrderProcessed,
    /// The agent booked an appointment.
    AppointmentScheduled,
    /// The agent logged a customer complaint.
    CustomerComplaintLogged,
    /// A business accepted the free trial during onboarding.
    TrialStarted,
    /// Any tag without a dedicated variant.
    Other(String),
}

impl EventType {
    /// Parses a tag. Never fails; unknown tags become `Other`.
    pub fn parse(tag: &str) -> Self {
        match tag {
            "conversation_started" => Self::ConversationStarted,
            "conversation_ended" => Self::ConversationEnded,
            "agent_response_generated" => Self::AgentResponseGenerated,
            "financial_calculation_completed" => Self::FinancialCalculationCompleted,
            "order_processed" => Self::OrderProcessed,
            "appointment_scheduled" => Self::AppointmentScheduled,
            "customer_complaint_logged" => Self::CustomerComplaintLogged,
            "trial_started" => Self::TrialStarted,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns the wire tag.
    pub fn as_str(&self) -> &str {
        match self {
            Self::ConversationStarted => "conversation_started",
            Self::ConversationEnded => "conversation_ended",
            Self::AgentResponseGenerated => "agent_response_generated",
            Self::FinancialCalculationCompleted => "financial_calculation_completed",
            Self::OrderProcessed => "order_processed",
            Self::AppointmentScheduled => "appointment_scheduled",
            Self::CustomerComplaintLogged => "customer_complaint_logged",
            Self::TrialStarted => "trial_started",
            Self::Other(tag) => tag,
        }
    }

    /// True when the tag is empty or whitespace.
    pub fn is_blank(&self) -> bool {
        self.as_str().trim().is_empty()
    }
}

impl FromStr for EventType {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<String> for EventType {
    fn from(tag: String) -> Self {
        Self::parse(&tag)
    }
}

impl From<EventType> for String {
    fn from(event_type: EventType) -> Self {
        event_type.as_str().to_string()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A received webhook payload.
///
/// Created once per HTTP delivery and never mutated. `raw_body` holds the
/// exact bytes the sender signed.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    /// Configured name of the sender that delivered the event.
    pub sender: String,
    /// Provider-assigned identifier, the idempotency key.
    pub event_id: String,
    /// Where `event_id` came from.
    pub id_source: IdSource,
    /// Event type tag used to select a handler.
    pub event_type: EventType,
    /// Arrival time assigned by the ingestor.
    pub received_at: DateTime<Utc>,
    /// Body bytes as received.
    pub raw_body: Bytes,
    /// Parsed JSON body.
    pub payload: Value,
}

impl InboundEvent {
    /// Creates an event from already-parsed parts.
    ///
    /// The raw body is the compact serialization of `payload`.
    pub fn new(
        sender: impl Into<String>,
        event_id: impl Into<String>,
        event_type: EventType,
        payload: Value,
        received_at: DateTime<Utc>,
    ) -> Self {
        let raw_body = Bytes::from(payload.to_string());
        Self {
            sender: sender.into(),
            event_id: event_id.into(),
            id_source: IdSource::Provider,
            event_type,
            received_at,
            raw_body,
            payload,
        }
    }

    /// Parses a received body into an event.
    ///
    /// The event type comes from `event_type` (or `type`). The event id comes
    /// from `event_id` (or `id`); when both are absent it is derived as
    /// `{conversation_id}:{event_type}` because one conversation emits
    /// several event types. Missing fields are left empty for the ingestor
    /// to reject.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` when the body is not a JSON object.
    pub fn from_raw(
        sender: impl Into<String>,
        raw_body: Bytes,
        received_at: DateTime<Utc>,
    ) -> Result<Self> {
        let payload: Value = serde_json::from_slice(&raw_body)
            .map_err(|e| CoreError::InvalidInput(format!("body is not valid JSON: {e}")))?;

        let Some(object) = payload.as_object() else {
            return Err(CoreError::InvalidInput("body must be a JSON object".to_string()));
        };

        let event_type = string_field(object, &["event_type", "type"]).unwrap_or_default();
        let (event_id, id_source) = match string_field(object, &["event_id", "id"]) {
            Some(id) => (id, IdSource::Provider),
            None => string_field(object, &["conversation_id"])
                .filter(|_| !event_type.is_empty())
                .map(|conversation_id| {
                    (format!("{conversation_id}:{event_type}"), IdSource::Conversation)
                })
                .unwrap_or_default(),
        };

        Ok(Self {
            sender: sender.into(),
            event_id,
            id_source,
            event_type: EventType::parse(&event_type),
            received_at,
            raw_body,
            payload,
        })
    }

    /// Returns the idempotency key.
    pub fn key(&self) -> EventKey {
        EventKey::with_source(self.sender.clone(), self.event_id.clone(), self.id_source)
    }

    /// Checks the fields the ingestor needs.
    ///
    /// # Errors
    ///
    /// Returns the rejection reason when `event_id` or `event_type` is blank.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.event_id.trim().is_empty() {
            return Err("missing event_id".to_string());
        }
        if self.event_type.is_blank() {
            return Err("missing event_type".to_string());
        }
        Ok(())
    }
}

/// Reads the first non-blank string or number among `names`.
fn string_field(object: &Map<String, Value>, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| match object.get(*name)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Status of a single ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    /// First delivery, recorded.
    Processed,
    /// Redelivery of an already recorded event.
    Duplicate,
    /// Malformed input, not recorded.
    Rejected,
}

impl fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Processed => write!(f, "processed"),
            Self::Duplicate => write!(f, "duplicate"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// Outcome of ingesting one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchResult {
    /// Ingestion status.
    pub status: DispatchStatus,
    /// Rejection reason, present only when `status` is `Rejected`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DispatchResult {
    /// The event was recorded for the first time.
    pub fn processed() -> Self {
        Self { status: DispatchStatus::Processed, reason: None }
    }

    /// The event had already been recorded.
    pub fn duplicate() -> Self {
        Self { status: DispatchStatus::Duplicate, reason: None }
    }

    /// The event was malformed.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self { status: DispatchStatus::Rejected, reason: Some(reason.into()) }
    }

    /// True for outcomes the sender should see as success.
    pub fn is_accepted(&self) -> bool {
        matches!(self.status, DispatchStatus::Processed | DispatchStatus::Duplicate)
    }
}

/// Dispatch state of a recorded event.
///
/// `Pending` moves to `DispatchedOk` or `DispatchedError` once the handler
/// has run. `NoHandler` is terminal from the start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Recorded, handler not yet finished.
    Pending,
    /// Recorded, no handler registered for the type.
    NoHandler,
    /// Handler completed.
    DispatchedOk,
    /// Handler failed or timed out.
    DispatchedError,
}

impl DispatchOutcome {
    /// Returns the stored tag.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::NoHandler => "no_handler",
            Self::DispatchedOk => "dispatched_ok",
            Self::DispatchedError => "dispatched_error",
        }
    }

    /// True once no further transition can happen.
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DispatchOutcome {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "no_handler" => Ok(Self::NoHandler),
            "dispatched_ok" => Ok(Self::DispatchedOk),
            "dispatched_error" => Ok(Self::DispatchedError),
            other => Err(CoreError::InvalidInput(format!("unknown dispatch outcome: {other}"))),
        }
    }
}

/// Durable event-log entry.
///
/// Serves both as the dedup index entry and as the audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Sender that delivered the event.
    pub sender: String,
    /// Provider-assigned identifier.
    pub event_id: String,
    /// Where `event_id` came from.
    #[serde(default, skip_serializing_if = "IdSource::is_provider")]
    pub id_source: IdSource,
    /// Event type tag.
    pub event_type: EventType,
    /// Arrival time.
    pub received_at: DateTime<Utc>,
    /// Body bytes as received, base64 in the stored document.
    #[serde(with = "base64_bytes")]
    pub raw_body: Bytes,
    /// Parsed JSON body.
    pub payload: Value,
    /// Dispatch state.
    pub outcome: DispatchOutcome,
    /// Handler error message for `DispatchedError`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome_detail: Option<String>,
    /// When the handler finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatched_at: Option<DateTime<Utc>>,
}

impl EventRecord {
    /// Builds the record written on first delivery.
    pub fn received(event: &InboundEvent, outcome: DispatchOutcome) -> Self {
        Self {
            sender: event.sender.clone(),
            event_id: event.event_id.clone(),
            id_source: event.id_source,
            event_type: event.event_type.clone(),
            received_at: event.received_at,
            raw_body: event.raw_body.clone(),
            payload: event.payload.clone(),
            outcome,
            outcome_detail: None,
            dispatched_at: None,
        }
    }

    /// Returns the idempotency key.
    pub fn key(&self) -> EventKey {
        EventKey::with_source(self.sender.clone(), self.event_id.clone(), self.id_source)
    }

    /// Converts the record into a datastore document.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Serialization` if the record cannot be encoded.
    pub fn to_document(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Reads a record back from a datastore document.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Serialization` if the document is not a record.
    pub fn from_document(document: Value) -> Result<Self> {
        Ok(serde_json::from_value(document)?)
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map(Bytes::from).map_err(serde::de::Error::custom)
    }
}
