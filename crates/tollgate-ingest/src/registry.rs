//! Event-type to handler registry.
//!
//! Built once at startup and shared read-only. Unregistered types take the
//! no-op path in the ingestor.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tollgate_core::{EventKey, EventType};

use crate::error::HandlerError;

/// What a handler knows about the event it is running for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchContext {
    /// Idempotency key of the event.
    pub key: EventKey,
    /// Event type tag.
    pub event_type: EventType,
    /// Arrival time.
    pub received_at: DateTime<Utc>,
}

/// Side effect for one event type.
///
/// Called at most once per recorded event. Returning an error marks the
/// event `dispatched_error`; the event stays recorded.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync + std::fmt::Debug {
    /// Runs the side effect.
    async fn handle(&self, ctx: &DispatchContext, payload: &Value) -> Result<(), HandlerError>;
}

/// Handlers keyed by event type.
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<EventType, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `event_type`, replacing any previous one.
    #[must_use]
    pub fn with(mut self, event_type: EventType, handler: Arc<dyn EventHandler>) -> Self {
        self.register(event_type, handler);
        self
    }

    /// Registers `handler` for `event_type`, replacing any previous one.
    pub fn register(&mut self, event_type: EventType, handler: Arc<dyn EventHandler>) {
        if self.handlers.insert(event_type.clone(), handler).is_some() {
            tracing::warn!(event_type = %event_type, "replacing registered handler");
        }
    }

    /// Returns the handler for `event_type`.
    pub fn get(&self, event_type: &EventType) -> Option<Arc<dyn EventHandler>> {
        self.handlers.get(event_type).cloned()
    }

    /// Whether a handler is registered for `event_type`.
    pub fn contains(&self, event_type: &EventType) -> bool {
        self.handlers.contains_key(event_type)
    }

    /// Registered event types, sorted by tag.
    pub fn event_types(&self) -> Vec<EventType> {
        let mut types: Vec<_> = self.handlers.keys().cloned().collect();
        types.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        types
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Nothing;

    #[async_trait::async_trait]
    impl EventHandler for Nothing {
        async fn handle(&self, _ctx: &DispatchContext, _payload: &Value) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[test]
    fn lookup_by_type() {
        let registry = HandlerRegistry::new()
            .with(EventType::OrderProcessed, Arc::new(Nothing))
            .with(EventType::ConversationStarted, Arc::new(Nothing));

        assert_eq!(registry.len(), 2);
        assert!(registry.get(&EventType::OrderProcessed).is_some());
        assert!(registry.get(&EventType::parse("future_event_v2")).is_none());
        assert_eq!(
            registry.event_types(),
            vec![EventType::ConversationStarted, EventType::OrderProcessed]
        );
    }

    #[test]
    fn other_tags_can_be_registered() {
        let custom = EventType::parse("payment_received");
        let registry = HandlerRegistry::new().with(custom.clone(), Arc::new(Nothing));

        assert!(registry.contains(&EventType::parse("payment_received")));
        assert!(!HandlerRegistry::new().contains(&custom));
    }
}
