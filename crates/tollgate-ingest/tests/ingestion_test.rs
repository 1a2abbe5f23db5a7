//! End-to-end ingestion tests against the in-memory datastore.
//!
//! Covers background dispatch through the worker pool and the product
//! handler catalogue reacting to a full conversation lifecycle.

#![allow(clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tollgate_core::{
    Datastore, DatastoreEventLog, DispatchOutcome, DispatchStatus, EventKey, EventLog, EventType,
    Filter, InboundEvent, MemoryDatastore, Page, RealClock,
};
use tollgate_ingest::{
    default_registry, DispatchPool, Dispatcher, HandlerRegistry, Ingestor, PoolConfig,
};
use tollgate_testing::{fixtures, CountingHandler, RecordingNotifier, RecordingObserver};

fn dispatcher(store: &MemoryDatastore, observer: Arc<RecordingObserver>) -> Dispatcher {
    Dispatcher::new(
        Arc::new(DatastoreEventLog::new(Arc::new(store.clone()))),
        observer,
        Arc::new(RealClock::new()),
        Duration::from_secs(5),
    )
}

fn parse(ingestor: &Ingestor, sender: &str, payload: &serde_json::Value) -> InboundEvent {
    ingestor.parse_event(sender, Bytes::from(payload.to_string())).unwrap()
}

/// Background dispatch answers before handlers finish, and shutdown waits
/// for every queued job.
#[tokio::test]
async fn background_pool_drains_on_shutdown() {
    let store = MemoryDatastore::new();
    let observer = Arc::new(RecordingObserver::new());
    let handler = CountingHandler::with_delay(Duration::from_millis(20));
    let registry =
        HandlerRegistry::new().with(EventType::OrderProcessed, Arc::new(handler.clone()));

    let dispatcher = dispatcher(&store, observer);
    let mut pool = DispatchPool::new(
        dispatcher.clone(),
        PoolConfig { worker_count: 2, queue_size: 4 },
        CancellationToken::new(),
    );
    pool.spawn_workers();
    let ingestor = Ingestor::new(Arc::new(registry), dispatcher).with_queue(pool.queue());

    for i in 0..12 {
        let payload = fixtures::event(&format!("evt_{i}"), "order_processed");
        let result = ingestor.ingest(parse(&ingestor, "atlas", &payload)).await.unwrap();
        assert_eq!(result.status, DispatchStatus::Processed);
    }

    pool.shutdown_graceful(Duration::from_secs(10)).await.unwrap();

    assert_eq!(handler.calls(), 12);
    for i in 0..12 {
        let key = EventKey::new("atlas", format!("evt_{i}"));
        let record = ingestor.event_log().find(&key).await.unwrap().unwrap();
        assert_eq!(record.outcome, DispatchOutcome::DispatchedOk);
    }
}

/// A full call, from greeting to trial sign-up, through the product
/// handlers.
#[tokio::test]
async fn conversation_lifecycle_reaches_every_handler() {
    let store = MemoryDatastore::new();
    let notifier = Arc::new(RecordingNotifier::new());
    let observer = Arc::new(RecordingObserver::new());
    let registry = default_registry(Arc::new(store.clone()), notifier.clone());
    let ingestor = Ingestor::new(Arc::new(registry), dispatcher(&store, observer));

    let events = [
        fixtures::conversation_started("evt_1", "conv_trial"),
        fixtures::trial_started("evt_2", "+234 801 234 5678", "Chidi Stores"),
        serde_json::json!({
            "event_id": "evt_3",
            "event_type": "conversation_ended",
            "conversation_id": "conv_trial",
            "metadata": { "duration_seconds": 240, "total_exchanges": 9 },
        }),
    ];
    for payload in &events {
        let result = ingestor.ingest(parse(&ingestor, "lexi", payload)).await.unwrap();
        assert_eq!(result.status, DispatchStatus::Processed);
    }

    let conversation = store.get("conversations", "conv_trial").await.unwrap().unwrap();
    assert_eq!(conversation["status"], "completed");
    assert_eq!(conversation["duration_seconds"], 240);

    let customer = store.get("customers", "2348012345678").await.unwrap().unwrap();
    assert_eq!(customer["subscription_status"], "trial");
    assert_eq!(customer["business_name"], "Chidi Stores");
    assert_eq!(store.count("follow_ups").await, 2);

    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "whatsapp:+2348012345678");

    let log = DatastoreEventLog::new(Arc::new(store.clone()));
    let all = log.list(&Filter::new(), Page::first(10)).await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.iter().all(|r| r.outcome == DispatchOutcome::DispatchedOk));
}

/// Replaying a whole batch changes nothing.
#[tokio::test]
async fn replayed_batch_is_all_duplicates() {
    let store = MemoryDatastore::new();
    let notifier = Arc::new(RecordingNotifier::new());
    let registry = default_registry(Arc::new(store.clone()), notifier.clone());
    let observer = Arc::new(RecordingObserver::new());
    let ingestor = Ingestor::new(Arc::new(registry), dispatcher(&store, observer));

    let batch = [
        fixtures::order_processed("evt_o1", "ord_1", "+2348011111111"),
        fixtures::order_processed("evt_o2", "ord_2", "+2348022222222"),
    ];
    for payload in &batch {
        ingestor.ingest(parse(&ingestor, "atlas", payload)).await.unwrap();
    }

    let received_at = Utc::now();
    for payload in &batch {
        let mut event = parse(&ingestor, "atlas", payload);
        event.received_at = received_at;
        let result = ingestor.ingest(event).await.unwrap();
        assert_eq!(result.status, DispatchStatus::Duplicate);
    }

    assert_eq!(store.count("orders").await, 2);
    assert_eq!(notifier.sent().len(), 2);
}
