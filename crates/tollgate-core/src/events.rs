//! Ingestion milestones and the observer contract.
//!
//! The ingestor publishes an `IngestEvent` at each milestone of an event's
//! life. Observers subscribe without the ingestor knowing about them; handler
//! failures reach operators here, never the HTTP caller.
//!
//! ```text
//!  ┌──────────┐   Recorded / Duplicate / Rejected   ┌───────────────────┐
//!  │ Ingestor │ ───────────────────────────────────▶│ MulticastObserver │
//!  └──────────┘                                     └───────────────────┘
//!  ┌────────────┐  Dispatched / DispatchFailed                │
//!  │ Dispatcher │ ───────────────────────────────────▶        ▼
//!  └────────────┘                                  TracingObserver, test
//!                                                  recorders, ...
//! ```

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::TollgateError,
    models::{DispatchOutcome, EventKey, EventType},
};

/// Milestones emitted during ingestion and dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IngestEvent {
    /// First delivery was durably recorded.
    Recorded {
        /// Idempotency key.
        key: EventKey,
        /// Event type tag.
        event_type: EventType,
        /// Initial dispatch state (`pending` or `no_handler`).
        outcome: DispatchOutcome,
        /// Arrival time.
        received_at: DateTime<Utc>,
    },

    /// Redelivery short-circuited before any handler ran.
    Duplicate {
        /// Idempotency key.
        key: EventKey,
        /// Event type tag.
        event_type: EventType,
    },

    /// Malformed event refused without being written.
    Rejected {
        /// Sender that delivered the event.
        sender: String,
        /// Why it was refused.
        reason: String,
    },

    /// Handler completed.
    Dispatched {
        /// Idempotency key.
        key: EventKey,
        /// Event type tag.
        event_type: EventType,
        /// Handler wall time.
        elapsed: Duration,
    },

    /// Handler failed or timed out.
    DispatchFailed {
        /// Idempotency key.
        key: EventKey,
        /// Event type tag.
        event_type: EventType,
        /// Handler error description.
        error: String,
    },
}

impl IngestEvent {
    /// Short milestone name, used as a log field.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Recorded { .. } => "recorded",
            Self::Duplicate { .. } => "duplicate",
            Self::Rejected { .. } => "rejected",
            Self::Dispatched { .. } => "dispatched",
            Self::DispatchFailed { .. } => "dispatch_failed",
        }
    }
}

/// Subscriber to ingestion milestones.
///
/// Implementations must not block ingestion. Errors are theirs to log.
#[async_trait::async_trait]
pub trait IngestObserver: Send + Sync + std::fmt::Debug {
    /// Receives one milestone.
    async fn observe(&self, event: IngestEvent);
}

/// Observer that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpObserver;

#[async_trait::async_trait]
impl IngestObserver for NoOpObserver {
    async fn observe(&self, _event: IngestEvent) {}
}

/// Observer that writes each milestone to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

#[async_trait::async_trait]
impl IngestObserver for TracingObserver {
    async fn observe(&self, event: IngestEvent) {
        match event {
            IngestEvent::Recorded { key, event_type, outcome, .. } => {
                tracing::info!(
                    sender = %key.sender,
                    event_id = %key.event_id,
                    event_type = %event_type,
                    outcome = %outcome,
                    "event recorded"
                );
            },
            IngestEvent::Duplicate { key, event_type } => {
                tracing::info!(
                    sender = %key.sender,
                    event_id = %key.event_id,
                    event_type = %event_type,
                    "duplicate delivery ignored"
                );
            },
            IngestEvent::Rejected { sender, reason } => {
                tracing::warn!(sender = %sender, reason = %reason, "event rejected");
            },
            IngestEvent::Dispatched { key, event_type, elapsed } => {
                tracing::debug!(
                    sender = %key.sender,
                    event_id = %key.event_id,
                    event_type = %event_type,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "handler completed"
                );
            },
            IngestEvent::DispatchFailed { key, event_type, error } => {
                let err = TollgateError::Handler {
                    event_id: key.event_id.clone(),
                    event_type: event_type.to_string(),
                    message: error,
                };
                tracing::error!(
                    sender = %key.sender,
                    event_id = %key.event_id,
                    event_type = %event_type,
                    code = err.code(),
                    error = %err,
                    "handler failed"
                );
            },
        }
    }
}

/// Forwards milestones to every subscriber concurrently.
#[derive(Debug, Clone, Default)]
pub struct MulticastObserver {
    observers: Vec<Arc<dyn IngestObserver>>,
}

impl MulticastObserver {
    /// Creates a multicast observer with no subscribers.
    pub fn new() -> Self {
        Self { observers: Vec::new() }
    }

    /// Adds a subscriber.
    pub fn add_subscriber(&mut self, observer: Arc<dyn IngestObserver>) {
        self.observers.push(observer);
    }

    /// Returns the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.observers.len()
    }
}

#[async_trait::async_trait]
impl IngestObserver for MulticastObserver {
    async fn observe(&self, event: IngestEvent) {
        let futures = self.observers.iter().map(|observer| {
            let event = event.clone();
            async move {
                observer.observe(event).await;
            }
        });

        futures::future::join_all(futures).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug)]
    struct CountingObserver {
        count: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl IngestObserver for CountingObserver {
        async fn observe(&self, _event: IngestEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn duplicate_event() -> IngestEvent {
        IngestEvent::Duplicate {
            key: EventKey::new("atlas", "evt_1"),
            event_type: EventType::ConversationStarted,
        }
    }

    #[tokio::test]
    async fn multicast_reaches_every_subscriber() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let mut multicast = MulticastObserver::new();
        multicast.add_subscriber(Arc::new(CountingObserver { count: first.clone() }));
        multicast.add_subscriber(Arc::new(CountingObserver { count: second.clone() }));
        assert_eq!(multicast.subscriber_count(), 2);

        multicast.observe(duplicate_event()).await;

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_multicast_and_noop_accept_events() {
        MulticastObserver::new().observe(duplicate_event()).await;
        NoOpObserver.observe(duplicate_event()).await;
        TracingObserver
            .observe(IngestEvent::DispatchFailed {
                key: EventKey::new("lexi", "evt_3"),
                event_type: EventType::OrderProcessed,
                error: "gateway down".to_string(),
            })
            .await;
    }

    #[test]
    fn kinds_are_distinct() {
        assert_eq!(duplicate_event().kind(), "duplicate");
        assert_eq!(
            IngestEvent::Rejected { sender: "atlas".into(), reason: "missing event_id".into() }
                .kind(),
            "rejected"
        );
    }
}
