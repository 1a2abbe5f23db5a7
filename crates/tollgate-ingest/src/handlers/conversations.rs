//! Conversation lifecycle handlers.

use std::sync::Arc;

use serde_json::{json, Value};
use tollgate_core::Datastore;
use tracing::debug;

use super::{metadata, present, require_str, str_field, AGENT_RESPONSES, CONVERSATIONS};
use crate::{
    error::HandlerError,
    registry::{DispatchContext, EventHandler},
};

/// `conversation_started`: opens an `active` conversation record.
#[derive(Debug, Clone)]
pub struct ConversationStartedHandler {
    store: Arc<dyn Datastore>,
}

impl ConversationStartedHandler {
    /// Creates the handler.
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl EventHandler for ConversationStartedHandler {
    async fn handle(&self, ctx: &DispatchContext, payload: &Value) -> Result<(), HandlerError> {
        let conversation_id = require_str(payload, "conversation_id", "conversation_id")?;
        let meta = metadata(payload);
        let text_or = |field: &str, default: &str| {
            meta.get(field).and_then(Value::as_str).unwrap_or(default).to_string()
        };

        let mut record = json!({
            "conversation_id": conversation_id,
            "sender": ctx.key.sender,
            "user_id": str_field(payload, "user_id"),
            "agent_id": str_field(payload, "agent_id"),
            "agent_type": text_or("agent_type", "unknown"),
            "language": text_or("user_language", "en-NG"),
            "location": present(&meta, "user_location"),
            "session_type": text_or("session_type", "general"),
            "platform": text_or("platform", "web"),
            "status": "active",
            "started_at": ctx.received_at,
        });

        let outcome =
            self.store.insert_if_absent(CONVERSATIONS, conversation_id, record.clone()).await?;
        if !outcome.is_inserted() {
            // The end event got here first; keep its status.
            if let Value::Object(fields) = &mut record {
                fields.remove("status");
            }
            self.store.update(CONVERSATIONS, conversation_id, record).await?;
            debug!(conversation_id, "merged start into existing conversation");
        }

        Ok(())
    }
}

/// `conversation_ended`: marks the conversation `completed`.
///
/// Creates the record when the start event was never seen.
#[derive(Debug, Clone)]
pub struct ConversationEndedHandler {
    store: Arc<dyn Datastore>,
}

impl ConversationEndedHandler {
    /// Creates the handler.
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl EventHandler for ConversationEndedHandler {
    async fn handle(&self, ctx: &DispatchContext, payload: &Value) -> Result<(), HandlerError> {
        let conversation_id = require_str(payload, "conversation_id", "conversation_id")?;
        let meta = metadata(payload);

        let patch = json!({
            "status": "completed",
            "ended_at": ctx.received_at,
            "duration_seconds": present(&meta, "duration_seconds").cloned().unwrap_or(json!(0)),
            "total_exchanges": present(&meta, "total_exchanges").cloned().unwrap_or(json!(0)),
            "user_satisfaction": present(&meta, "user_satisfaction"),
            "outcome": present(&meta, "outcome"),
        });

        if self.store.update(CONVERSATIONS, conversation_id, patch.clone()).await? {
            return Ok(());
        }

        let mut record = patch.clone();
        if let Value::Object(fields) = &mut record {
            fields.insert("conversation_id".into(), json!(conversation_id));
            fields.insert("sender".into(), json!(ctx.key.sender));
        }
        let outcome = self.store.insert_if_absent(CONVERSATIONS, conversation_id, record).await?;
        if !outcome.is_inserted() {
            // A start landed between the update and the insert.
            self.store.update(CONVERSATIONS, conversation_id, patch).await?;
        }
        debug!(conversation_id, "conversation ended without a recorded start");

        Ok(())
    }
}

/// `agent_response_generated`: stores the response turn.
#[derive(Debug, Clone)]
pub struct AgentResponseHandler {
    store: Arc<dyn Datastore>,
}

impl AgentResponseHandler {
    /// Creates the handler.
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl EventHandler for AgentResponseHandler {
    async fn handle(&self, ctx: &DispatchContext, payload: &Value) -> Result<(), HandlerError> {
        let record = json!({
            "event_id": ctx.key.event_id,
            "sender": ctx.key.sender,
            "conversation_id": str_field(payload, "conversation_id"),
            "agent_id": str_field(payload, "agent_id"),
            "response": payload.get("response").cloned().unwrap_or(Value::Null),
            "metadata": Value::Object(metadata(payload)),
            "generated_at": ctx.received_at,
        });

        self.store.insert_if_absent(AGENT_RESPONSES, &ctx.key.storage_key(), record).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use tollgate_core::{EventKey, EventType, MemoryDatastore};

    use super::*;

    fn ctx(event_type: EventType, event_id: &str) -> DispatchContext {
        DispatchContext {
            key: EventKey::new("atlas", event_id),
            event_type,
            received_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn start_applies_defaults() {
        let store = MemoryDatastore::new();
        let handler = ConversationStartedHandler::new(Arc::new(store.clone()));

        handler
            .handle(
                &ctx(EventType::ConversationStarted, "evt_1"),
                &json!({"conversation_id": "conv_1", "user_id": "u1", "metadata": {"agent_type": "atlas"}}),
            )
            .await
            .unwrap();

        let record = store.get(CONVERSATIONS, "conv_1").await.unwrap().unwrap();
        assert_eq!(record["status"], "active");
        assert_eq!(record["agent_type"], "atlas");
        assert_eq!(record["language"], "en-NG");
        assert_eq!(record["session_type"], "general");
        assert_eq!(record["platform"], "web");
        assert_eq!(record["location"], Value::Null);
        assert_eq!(record["user_id"], "u1");
    }

    #[tokio::test]
    async fn end_updates_started_conversation() {
        let store = MemoryDatastore::new();
        let started = ConversationStartedHandler::new(Arc::new(store.clone()));
        let ended = ConversationEndedHandler::new(Arc::new(store.clone()));

        started
            .handle(&ctx(EventType::ConversationStarted, "s"), &json!({"conversation_id": "conv_2"}))
            .await
            .unwrap();
        ended
            .handle(
                &ctx(EventType::ConversationEnded, "e"),
                &json!({"conversation_id": "conv_2", "metadata": {"duration_seconds": 95, "outcome": "order"}}),
            )
            .await
            .unwrap();

        let record = store.get(CONVERSATIONS, "conv_2").await.unwrap().unwrap();
        assert_eq!(record["status"], "completed");
        assert_eq!(record["duration_seconds"], 95);
        assert_eq!(record["total_exchanges"], 0);
        assert_eq!(record["outcome"], "order");
        assert_eq!(record["platform"], "web");
    }

    #[tokio::test]
    async fn end_without_start_creates_record_and_late_start_keeps_status() {
        let store = MemoryDatastore::new();
        let started = ConversationStartedHandler::new(Arc::new(store.clone()));
        let ended = ConversationEndedHandler::new(Arc::new(store.clone()));

        ended
            .handle(&ctx(EventType::ConversationEnded, "e"), &json!({"conversation_id": "conv_3"}))
            .await
            .unwrap();
        started
            .handle(&ctx(EventType::ConversationStarted, "s"), &json!({"conversation_id": "conv_3"}))
            .await
            .unwrap();

        let record = store.get(CONVERSATIONS, "conv_3").await.unwrap().unwrap();
        assert_eq!(record["status"], "completed");
        assert_eq!(record["agent_type"], "unknown");
    }

    #[tokio::test]
    async fn missing_conversation_id_fails() {
        let handler = ConversationEndedHandler::new(Arc::new(MemoryDatastore::new()));
        let err =
            handler.handle(&ctx(EventType::ConversationEnded, "e"), &json!({})).await.unwrap_err();

        assert!(matches!(err, HandlerError::MissingField(field) if field == "conversation_id"));
    }

    #[tokio::test]
    async fn agent_responses_are_keyed_by_event() {
        let store = MemoryDatastore::new();
        let handler = AgentResponseHandler::new(Arc::new(store.clone()));

        handler
            .handle(
                &ctx(EventType::AgentResponseGenerated, "evt_9"),
                &json!({"conversation_id": "conv_1", "response": {"text": "Hello"}}),
            )
            .await
            .unwrap();

        let record = store.get(AGENT_RESPONSES, "atlas:evt_9").await.unwrap().unwrap();
        assert_eq!(record["response"]["text"], "Hello");
    }
}
