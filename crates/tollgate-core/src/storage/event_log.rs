//! Event log over a `Datastore`.
//!
//! Records live in the `webhook_events` collection under
//! `EventKey::storage_key`, so the datastore's atomic insert doubles as the
//! duplicate check.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use super::{Datastore, EventLog, Filter, InsertOutcome, Page};
use crate::{
    error::{CoreError, Result},
    models::{DispatchOutcome, EventKey, EventRecord},
};

/// Collection holding webhook event records.
pub const EVENTS_COLLECTION: &str = "webhook_events";

/// `EventLog` stored in a datastore collection.
#[derive(Debug, Clone)]
pub struct DatastoreEventLog {
    store: Arc<dyn Datastore>,
}

impl DatastoreEventLog {
    /// Creates an event log writing to `store`.
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Self { store }
    }

    /// Returns the backing datastore.
    pub fn datastore(&self) -> &Arc<dyn Datastore> {
        &self.store
    }
}

#[async_trait::async_trait]
impl EventLog for DatastoreEventLog {
    async fn insert_if_absent(&self, record: &EventRecord) -> Result<InsertOutcome> {
        let key = record.key().storage_key();
        self.store.insert_if_absent(EVENTS_COLLECTION, &key, record.to_document()?).await
    }

    async fn record_outcome(
        &self,
        key: &EventKey,
        outcome: DispatchOutcome,
        detail: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut patch = json!({ "outcome": outcome, "dispatched_at": at });
        if let (Some(detail), Value::Object(fields)) = (detail, &mut patch) {
            fields.insert("outcome_detail".to_string(), Value::String(detail));
        }

        if self.store.update(EVENTS_COLLECTION, &key.storage_key(), patch).await? {
            Ok(())
        } else {
            Err(CoreError::NotFound(format!("event {key} is not recorded")))
        }
    }

    async fn find(&self, key: &EventKey) -> Result<Option<EventRecord>> {
        self.store
            .get(EVENTS_COLLECTION, &key.storage_key())
            .await?
            .map(EventRecord::from_document)
            .transpose()
    }

    async fn list(&self, filter: &Filter, page: Page) -> Result<Vec<EventRecord>> {
        self.store
            .query(EVENTS_COLLECTION, filter, page)
            .await?
            .into_iter()
            .map(EventRecord::from_document)
            .collect()
    }

    async fn health_check(&self) -> Result<()> {
        self.store.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde_json::json;

    use super::*;
    use crate::{
        models::{EventType, InboundEvent},
        storage::MemoryDatastore,
    };

    fn record(sender: &str, event_id: &str, event_type: &str) -> EventRecord {
        let event = InboundEvent::new(
            sender,
            event_id,
            EventType::parse(event_type),
            json!({"event_id": event_id, "event_type": event_type}),
            Utc::now(),
        );
        EventRecord::received(&event, DispatchOutcome::Pending)
    }

    fn log() -> (DatastoreEventLog, MemoryDatastore) {
        let store = MemoryDatastore::new();
        (DatastoreEventLog::new(Arc::new(store.clone())), store)
    }

    #[tokio::test]
    async fn duplicate_insert_is_detected_per_sender() {
        let (log, store) = log();

        let first = log.insert_if_absent(&record("atlas", "evt_1", "conversation_started")).await;
        let again = log.insert_if_absent(&record("atlas", "evt_1", "conversation_started")).await;
        let other = log.insert_if_absent(&record("lexi", "evt_1", "conversation_started")).await;

        assert_eq!(first.unwrap(), InsertOutcome::Inserted);
        assert_eq!(again.unwrap(), InsertOutcome::AlreadyExists);
        assert_eq!(other.unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.count(EVENTS_COLLECTION).await, 2);
    }

    #[tokio::test]
    async fn outcome_is_recorded_with_detail() {
        let (log, _) = log();
        let record = record("lexi", "evt_5", "order_processed");
        log.insert_if_absent(&record).await.unwrap();

        let at = Utc::now();
        log.record_outcome(
            &record.key(),
            DispatchOutcome::DispatchedError,
            Some("gateway down".into()),
            at,
        )
        .await
        .unwrap();

        let stored = log.find(&record.key()).await.unwrap().unwrap();
        assert_eq!(stored.outcome, DispatchOutcome::DispatchedError);
        assert_eq!(stored.outcome_detail.as_deref(), Some("gateway down"));
        assert_eq!(stored.dispatched_at, Some(at));
        assert_eq!(stored.raw_body, record.raw_body);
    }

    #[tokio::test]
    async fn outcome_for_unknown_event_is_not_found() {
        let (log, _) = log();
        let err = log
            .record_outcome(
                &EventKey::new("atlas", "ghost"),
                DispatchOutcome::DispatchedOk,
                None,
                Utc::now(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_filters_and_limits() {
        let (log, _) = log();
        for (sender, id, ty) in [
            ("atlas", "e1", "conversation_started"),
            ("lexi", "e2", "order_processed"),
            ("atlas", "e3", "order_processed"),
            ("atlas", "e4", "order_processed"),
        ] {
            log.insert_if_absent(&record(sender, id, ty)).await.unwrap();
        }

        let mut filter = Filter::new();
        filter.insert("sender".into(), json!("atlas"));
        filter.insert("event_type".into(), json!("order_processed"));

        let listed = log.list(&filter, Page::first(1)).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].event_id, "e3");

        let next = log.list(&filter, Page::new(1, 1)).await.unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].event_id, "e4");
        assert!(log.list(&filter, Page::new(2, 1)).await.unwrap().is_empty());

        let all = log.list(&Filter::new(), Page::first(100)).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].raw_body, Bytes::from(all[0].payload.to_string()));
    }

    #[tokio::test]
    async fn senders_sharing_a_prefix_keep_separate_records() {
        let (log, store) = log();

        let first = log.insert_if_absent(&record("a", "b:c", "order_processed")).await.unwrap();
        let second = log.insert_if_absent(&record("a:b", "c", "order_processed")).await.unwrap();

        assert_eq!(first, InsertOutcome::Inserted);
        assert_eq!(second, InsertOutcome::Inserted);
        assert_eq!(store.count(EVENTS_COLLECTION).await, 2);
        let stored = log.find(&EventKey::new("a:b", "c")).await.unwrap().unwrap();
        assert_eq!(stored.sender, "a:b");
    }
}
