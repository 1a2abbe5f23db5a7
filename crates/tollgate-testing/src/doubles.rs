//! Recording test doubles for the ingestion collaborators.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use serde_json::Value;
use tollgate_core::{IngestEvent, IngestObserver};
use tollgate_ingest::{DispatchContext, EventHandler, HandlerError, Notifier, NotifyError};

/// Handler that counts its invocations.
///
/// Clones share the counter.
#[derive(Debug, Clone, Default)]
pub struct CountingHandler {
    calls: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl CountingHandler {
    /// Creates a handler that returns immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a handler that sleeps for `delay` before counting.
    pub fn with_delay(delay: Duration) -> Self {
        Self { calls: Arc::default(), delay: Some(delay) }
    }

    /// Number of completed invocations.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl EventHandler for CountingHandler {
    async fn handle(&self, _ctx: &DispatchContext, _payload: &Value) -> Result<(), HandlerError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Handler that always fails with the same message.
#[derive(Debug, Clone)]
pub struct FailingHandler {
    message: String,
}

impl FailingHandler {
    /// Creates a handler failing with `message`.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

#[async_trait::async_trait]
impl EventHandler for FailingHandler {
    async fn handle(&self, _ctx: &DispatchContext, _payload: &Value) -> Result<(), HandlerError> {
        Err(HandlerError::Other(self.message.clone()))
    }
}

/// Notifier that keeps every message instead of sending it.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    /// Creates a notifier that accepts every message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later send fail as a gateway rejection.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Messages accepted so far as `(destination, message)`.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, destination: &str, message: &str) -> Result<(), NotifyError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError::Rejected { status: 503, body: "gateway down".to_string() });
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((destination.to_string(), message.to_string()));
        Ok(())
    }
}

/// Observer that keeps every milestone in order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<IngestEvent>>,
}

impl RecordingObserver {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Milestones observed so far.
    pub fn events(&self) -> Vec<IngestEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of observed milestones matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&IngestEvent) -> bool) -> usize {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events.iter().filter(|event| predicate(*event)).count()
    }
}

#[async_trait::async_trait]
impl IngestObserver for RecordingObserver {
    async fn observe(&self, event: IngestEvent) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
    }
}
