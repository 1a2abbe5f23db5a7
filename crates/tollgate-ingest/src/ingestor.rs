//! Idempotent event ingestion.
//!
//! The duplicate check and the audit write are one atomic
//! `insert_if_absent` on the event log: whichever delivery inserts first owns
//! the event and is the only one that reaches a handler. Everything after the
//! insert is best effort and never changes the result returned to the sender.

use std::sync::Arc;

use bytes::Bytes;
use tollgate_core::{
    DispatchOutcome, DispatchResult, EventLog, EventRecord, InboundEvent, IngestEvent,
    InsertOutcome,
};
use tracing::{debug, info, instrument, warn};

use crate::{
    dispatcher::{DispatchJob, Dispatcher},
    error::Result,
    registry::{DispatchContext, HandlerRegistry},
    worker_pool::DispatchQueue,
};

/// Records inbound events once and dispatches them to their handlers.
#[derive(Debug, Clone)]
pub struct Ingestor {
    registry: Arc<HandlerRegistry>,
    dispatcher: Dispatcher,
    queue: Option<DispatchQueue>,
}

impl Ingestor {
    /// Creates an ingestor that runs handlers inline before returning.
    ///
    /// Inline dispatch runs on a detached task, so a caller that stops
    /// waiting still gets the outcome recorded.
    pub fn new(registry: Arc<HandlerRegistry>, dispatcher: Dispatcher) -> Self {
        Self { registry, dispatcher, queue: None }
    }

    /// Hands handlers to a background pool instead of running them inline.
    #[must_use]
    pub fn with_queue(mut self, queue: DispatchQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    /// The event log backing the duplicate check.
    pub fn event_log(&self) -> &Arc<dyn EventLog> {
        self.dispatcher.event_log()
    }

    /// The handler registry.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Parses a verified body, stamping it with the current time.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` if the body is not a JSON object.
    pub fn parse_event(&self, sender: &str, body: Bytes) -> tollgate_core::Result<InboundEvent> {
        InboundEvent::from_raw(sender, body, self.dispatcher.clock().now_utc())
    }

    /// Ingests one event.
    ///
    /// Returns `processed` for a first delivery, `duplicate` for a
    /// redelivery, and `rejected` when `event_id` or `event_type` is blank.
    /// Handler failures are recorded on the event, not returned.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::Storage` if the event log cannot be written;
    /// the sender should redeliver.
    #[instrument(
        name = "ingest",
        skip(self, event),
        fields(sender = %event.sender, event_id = %event.event_id, event_type = %event.event_type)
    )]
    pub async fn ingest(&self, event: InboundEvent) -> Result<DispatchResult> {
        let observer = self.dispatcher.observer();

        if let Err(reason) = event.validate() {
            warn!(reason = %reason, "rejecting malformed event");
            let sender = event.sender.clone();
            observer.observe(IngestEvent::Rejected { sender, reason: reason.clone() }).await;
            return Ok(DispatchResult::rejected(reason));
        }

        let handler = self.registry.get(&event.event_type);
        let initial = match handler {
            Some(_) => DispatchOutcome::Pending,
            None => DispatchOutcome::NoHandler,
        };

        let record = EventRecord::received(&event, initial);
        if self.event_log().insert_if_absent(&record).await? == InsertOutcome::AlreadyExists {
            info!("duplicate delivery ignored");
            observer
                .observe(IngestEvent::Duplicate { key: event.key(), event_type: event.event_type })
                .await;
            return Ok(DispatchResult::duplicate());
        }

        observer
            .observe(IngestEvent::Recorded {
                key: event.key(),
                event_type: event.event_type.clone(),
                outcome: initial,
                received_at: event.received_at,
            })
            .await;

        let Some(handler) = handler else {
            info!("no handler registered for event type");
            return Ok(DispatchResult::processed());
        };

        let job = DispatchJob {
            context: DispatchContext {
                key: event.key(),
                event_type: event.event_type,
                received_at: event.received_at,
            },
            payload: event.payload,
            handler,
        };

        match &self.queue {
            Some(queue) => {
                debug!("handing event to dispatch pool");
                queue.submit(job);
            },
            None => {
                // Own task: dropping the request future must not skip the outcome write.
                let dispatcher = self.dispatcher.clone();
                let task = tokio::spawn(async move { dispatcher.run(job).await });
                if let Err(e) = task.await {
                    warn!(error = %e, "inline dispatch task failed");
                }
            },
        }

        Ok(DispatchResult::processed())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use chrono::Utc;
    use serde_json::{json, Value};
    use tollgate_core::{
        CoreError, DatastoreEventLog, DispatchStatus, EventKey, EventType, MemoryDatastore,
        NoOpObserver, RealClock,
    };

    use super::*;
    use crate::error::{HandlerError, IngestError};

    #[derive(Debug, Default)]
    struct Counting(AtomicUsize);

    #[async_trait::async_trait]
    impl crate::registry::EventHandler for Counting {
        async fn handle(
            &self,
            _ctx: &DispatchContext,
            _payload: &Value,
        ) -> std::result::Result<(), HandlerError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Failing;

    #[async_trait::async_trait]
    impl crate::registry::EventHandler for Failing {
        async fn handle(
            &self,
            _ctx: &DispatchContext,
            _payload: &Value,
        ) -> std::result::Result<(), HandlerError> {
            Err(HandlerError::Other("notification gateway down".into()))
        }
    }

    struct Fixture {
        store: MemoryDatastore,
        log: DatastoreEventLog,
        counter: Arc<Counting>,
        ingestor: Ingestor,
    }

    fn fixture() -> Fixture {
        let store = MemoryDatastore::new();
        let log = DatastoreEventLog::new(Arc::new(store.clone()));
        let counter = Arc::new(Counting::default());
        let registry = HandlerRegistry::new()
            .with(EventType::ConversationStarted, counter.clone())
            .with(EventType::OrderProcessed, Arc::new(Failing));
        let dispatcher = Dispatcher::new(
            Arc::new(log.clone()),
            Arc::new(NoOpObserver),
            Arc::new(RealClock::new()),
            Duration::from_secs(5),
        );
        let ingestor = Ingestor::new(Arc::new(registry), dispatcher);
        Fixture { store, log, counter, ingestor }
    }

    fn event(event_id: &str, event_type: &str) -> InboundEvent {
        InboundEvent::new(
            "atlas",
            event_id,
            EventType::parse(event_type),
            json!({"event_id": event_id, "event_type": event_type, "conversation_id": "conv_1"}),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn redelivery_is_a_duplicate_and_handler_runs_once() {
        let fx = fixture();

        let first = fx.ingestor.ingest(event("evt_1", "conversation_started")).await.unwrap();
        let second = fx.ingestor.ingest(event("evt_1", "conversation_started")).await.unwrap();

        assert_eq!(first.status, DispatchStatus::Processed);
        assert_eq!(second.status, DispatchStatus::Duplicate);
        assert_eq!(fx.counter.0.load(Ordering::SeqCst), 1);

        let record = fx.log.find(&EventKey::new("atlas", "evt_1")).await.unwrap().unwrap();
        assert_eq!(record.outcome, DispatchOutcome::DispatchedOk);
    }

    #[tokio::test]
    async fn unknown_type_is_recorded_without_handler() {
        let fx = fixture();

        let result = fx.ingestor.ingest(event("evt_9", "future_event_v2")).await.unwrap();

        assert_eq!(result, DispatchResult::processed());
        let record = fx.log.find(&EventKey::new("atlas", "evt_9")).await.unwrap().unwrap();
        assert_eq!(record.outcome, DispatchOutcome::NoHandler);
        assert_eq!(fx.counter.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_event_id_is_rejected_and_not_written() {
        let fx = fixture();

        let result = fx.ingestor.ingest(event("", "conversation_started")).await.unwrap();

        assert_eq!(result.status, DispatchStatus::Rejected);
        assert_eq!(result.reason.as_deref(), Some("missing event_id"));
        assert_eq!(fx.store.count(tollgate_core::storage::event_log::EVENTS_COLLECTION).await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_deliveries_record_once() {
        let fx = fixture();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let ingestor = fx.ingestor.clone();
                tokio::spawn(async move {
                    ingestor.ingest(event("evt_2", "conversation_started")).await.unwrap()
                })
            })
            .collect();

        let mut processed = 0;
        for task in tasks {
            match task.await.unwrap().status {
                DispatchStatus::Processed => processed += 1,
                DispatchStatus::Duplicate => {},
                DispatchStatus::Rejected => panic!("unexpected rejection"),
            }
        }

        assert_eq!(processed, 1);
        assert_eq!(fx.counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_failure_keeps_record_and_reports_processed() {
        let fx = fixture();

        let result = fx.ingestor.ingest(event("evt_3", "order_processed")).await.unwrap();

        assert_eq!(result.status, DispatchStatus::Processed);
        let record = fx.log.find(&EventKey::new("atlas", "evt_3")).await.unwrap().unwrap();
        assert_eq!(record.outcome, DispatchOutcome::DispatchedError);
        assert_eq!(record.outcome_detail.as_deref(), Some("notification gateway down"));
    }

    #[tokio::test]
    async fn storage_outage_is_an_error() {
        let fx = fixture();
        fx.store.set_unavailable(true);

        let err = fx.ingestor.ingest(event("evt_4", "conversation_started")).await.unwrap_err();

        assert!(matches!(err, IngestError::Storage(CoreError::Unavailable(_))));
        assert!(err.is_retryable());
        assert_eq!(fx.counter.0.load(Ordering::SeqCst), 0);
    }

    #[derive(Debug)]
    struct Slow(Duration, AtomicUsize);

    #[async_trait::async_trait]
    impl crate::registry::EventHandler for Slow {
        async fn handle(
            &self,
            _ctx: &DispatchContext,
            _payload: &Value,
        ) -> std::result::Result<(), HandlerError> {
            tokio::time::sleep(self.0).await;
            self.1.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn abandoned_inline_ingest_still_records_outcome() {
        let store = MemoryDatastore::new();
        let log = DatastoreEventLog::new(Arc::new(store.clone()));
        let slow = Arc::new(Slow(Duration::from_millis(200), AtomicUsize::new(0)));
        let registry = HandlerRegistry::new().with(EventType::OrderProcessed, slow.clone());
        let dispatcher = Dispatcher::new(
            Arc::new(log.clone()),
            Arc::new(NoOpObserver),
            Arc::new(RealClock::new()),
            Duration::from_secs(5),
        );
        let ingestor = Ingestor::new(Arc::new(registry), dispatcher);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            ingestor.ingest(event("evt_slow", "order_processed")),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(slow.1.load(Ordering::SeqCst), 1);
        let record = log.find(&EventKey::new("atlas", "evt_slow")).await.unwrap().unwrap();
        assert_eq!(record.outcome, DispatchOutcome::DispatchedOk);
    }

    #[tokio::test]
    async fn parse_event_derives_id_from_conversation() {
        let fx = fixture();

        let parsed = fx
            .ingestor
            .parse_event(
                "atlas",
                Bytes::from_static(br#"{"event_type":"conversation_ended","conversation_id":"c9"}"#),
            )
            .unwrap();

        assert_eq!(parsed.event_id, "c9:conversation_ended");
        assert_eq!(parsed.sender, "atlas");
    }
}
