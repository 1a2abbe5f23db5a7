//! Product event handlers.
//!
//! Each handler turns one event type into datastore writes and, for
//! customer-facing events, a confirmation message. `default_registry` wires
//! the full catalogue.

use std::sync::Arc;

use serde_json::{Map, Value};
use tollgate_core::{Datastore, EventType};

use crate::{error::HandlerError, notifier::Notifier, registry::HandlerRegistry};

pub mod commerce;
pub mod conversations;
pub mod onboarding;

pub use commerce::{
    AppointmentScheduledHandler, CustomerComplaintHandler, FinancialCalculationHandler,
    OrderProcessedHandler,
};
pub use conversations::{
    AgentResponseHandler, ConversationEndedHandler, ConversationStartedHandler,
};
pub use onboarding::TrialStartedHandler;

/// Conversation records keyed by `conversation_id`.
pub const CONVERSATIONS: &str = "conversations";
/// Agent response turns keyed by event.
pub const AGENT_RESPONSES: &str = "agent_responses";
/// Financial calculations keyed by event.
pub const FINANCIAL_CALCULATIONS: &str = "financial_calculations";
/// Orders keyed by `order_id`.
pub const ORDERS: &str = "orders";
/// Appointments keyed by `appointment_id`, or by event when absent.
pub const APPOINTMENTS: &str = "appointments";
/// Complaints keyed by `complaint_id`, or by event when absent.
pub const COMPLAINTS: &str = "complaints";
/// Trial customers keyed by normalized phone number.
pub const CUSTOMERS: &str = "customers";
/// Scheduled follow-ups keyed by `{phone}:{follow_up_type}`.
pub const FOLLOW_UPS: &str = "follow_ups";

/// Builds the registry with every product handler.
pub fn default_registry(store: Arc<dyn Datastore>, notifier: Arc<dyn Notifier>) -> HandlerRegistry {
    let conversations_started = ConversationStartedHandler::new(store.clone());
    let conversations_ended = ConversationEndedHandler::new(store.clone());
    let agent_responses = AgentResponseHandler::new(store.clone());
    let calculations = FinancialCalculationHandler::new(store.clone());
    let orders = OrderProcessedHandler::new(store.clone(), notifier.clone());
    let appointments = AppointmentScheduledHandler::new(store.clone(), notifier.clone());
    let complaints = CustomerComplaintHandler::new(store.clone());
    let trials = TrialStartedHandler::new(store, notifier);

    HandlerRegistry::new()
        .with(EventType::ConversationStarted, Arc::new(conversations_started))
        .with(EventType::ConversationEnded, Arc::new(conversations_ended))
        .with(EventType::AgentResponseGenerated, Arc::new(agent_responses))
        .with(EventType::FinancialCalculationCompleted, Arc::new(calculations))
        .with(EventType::OrderProcessed, Arc::new(orders))
        .with(EventType::AppointmentScheduled, Arc::new(appointments))
        .with(EventType::CustomerComplaintLogged, Arc::new(complaints))
        .with(EventType::TrialStarted, Arc::new(trials))
}

/// Non-blank string at `field`.
pub(crate) fn str_field<'a>(object: &'a Value, field: &str) -> Option<&'a str> {
    object.get(field).and_then(Value::as_str).filter(|s| !s.trim().is_empty())
}

/// Non-blank string at `field`, or `MissingField` naming `path`.
pub(crate) fn require_str<'a>(
    object: &'a Value,
    field: &str,
    path: &str,
) -> Result<&'a str, HandlerError> {
    str_field(object, field).ok_or_else(|| HandlerError::missing(path))
}

/// Object at `field`, or `MissingField`.
pub(crate) fn require_object<'a>(
    payload: &'a Value,
    field: &str,
) -> Result<&'a Value, HandlerError> {
    payload.get(field).filter(|v| v.is_object()).ok_or_else(|| HandlerError::missing(field))
}

/// The payload's `metadata` object, or an empty one.
pub(crate) fn metadata(payload: &Value) -> Map<String, Value> {
    payload.get("metadata").and_then(Value::as_object).cloned().unwrap_or_default()
}

/// Value at `field` unless null or absent.
pub(crate) fn present<'a>(object: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    object.get(field).filter(|v| !v.is_null())
}
